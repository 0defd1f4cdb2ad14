use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aravis;
pub mod format;
pub mod net;

pub use net::{decimal_to_ip, decimal_to_mac};

/// Erreur liée à la caméra
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Erreur d'initialisation de la caméra: {0}")]
    InitError(String),

    #[error("Erreur de configuration de la caméra: {0}")]
    ConfigError(String),

    #[error("Erreur d'acquisition d'image: {0}")]
    AcquisitionError(String),

    #[error("Caméra non trouvée: {0}")]
    NotFound(String),

    #[error("Erreur de conversion d'image: {0}")]
    ConversionError(String),

    #[error("Erreur d'aravis: {0}")]
    AravisError(String),

    /// Le device sous-jacent n'est pas ouvert.
    #[error("Caméra {0} indisponible (non ouverte)")]
    DeviceUnavailable(String),

    /// Ni le nom moderne ni le nom legacy de la feature ne sont exposés par le device.
    #[error("Feature '{feature}' non supportée par la caméra {camera} (dialecte {dialect:?})")]
    FeatureUnsupported {
        camera: String,
        feature: &'static str,
        dialect: Dialect,
    },
}

/// Dialecte de firmware: détermine quel jeu de noms de features utiliser.
///
/// Résolu une seule fois à l'ouverture en sondant la présence du nom moderne
/// de la feature PTP (`PtpEnable`); un device qui ne l'expose pas est considéré
/// `Legacy` et retombe sur le jeu de noms `GevIEEE1588*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    Modern,
    Legacy,
}

/// Nom logique d'une feature, indépendant du dialecte de firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalFeature {
    PtpEnable,
    PtpStatus,
    PtpOffset,
    PtpLatch,
    TimestampLatch,
    TimestampValue,
    ExposureTime,
    FrameRate,
    LinkSpeed,
    PacketSize,
    PacketDelay,
    FrameTxDelay,
}

impl LogicalFeature {
    /// Résout le nom de feature concret pour un dialecte donné.
    ///
    /// Table indexée par dialecte plutôt que des essais/rattrapages dispersés:
    /// chaque opération du handle la consulte une fois.
    pub fn name(self, dialect: Dialect) -> &'static str {
        use Dialect::*;
        use LogicalFeature::*;
        match (self, dialect) {
            (PtpEnable, Modern) => "PtpEnable",
            (PtpEnable, Legacy) => "GevIEEE1588",
            (PtpStatus, Modern) => "PtpStatus",
            (PtpStatus, Legacy) => "GevIEEE1588Status",
            (PtpOffset, Modern) => "PtpOffsetFromMaster",
            (PtpOffset, Legacy) => "GevIEEE1588OffsetFromMaster",
            (PtpLatch, Modern) => "PtpDataSetLatch",
            (PtpLatch, Legacy) => "GevIEEE1588DataSetLatch",
            (TimestampLatch, Modern) => "TimestampLatch",
            (TimestampLatch, Legacy) => "GevTimestampControlLatch",
            (TimestampValue, Modern) => "TimestampLatchValue",
            (TimestampValue, Legacy) => "GevTimestampValue",
            (ExposureTime, Modern) => "ExposureTime",
            (ExposureTime, Legacy) => "ExposureTimeAbs",
            (FrameRate, Modern) => "AcquisitionFrameRate",
            (FrameRate, Legacy) => "AcquisitionFrameRateAbs",
            (LinkSpeed, Modern) => "DeviceLinkSpeed",
            (LinkSpeed, Legacy) => "GevLinkSpeed",
            (PacketSize, _) => "GevSCPSPacketSize",
            (PacketDelay, _) => "GevSCPD",
            (FrameTxDelay, _) => "GevSCFTD",
        }
    }
}

/// Format d'image supporté, traité comme une étiquette opaque en entrée
/// de la table de décodage (voir `format`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Mono8,
    Mono16,
    RGB8,
    BGR8,
    RGBA8,
    BGRA8,
    YUV422,
    YUV422Packed,
    BayerRG8,
    BayerGB8,
    BayerGR8,
    BayerBG8,
}

impl PixelFormat {
    /// Bits par pixel, utilisé par le calcul de bande passante.
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Mono8 => 8,
            PixelFormat::BayerRG8 | PixelFormat::BayerGB8 => 8,
            PixelFormat::BayerGR8 | PixelFormat::BayerBG8 => 8,
            PixelFormat::Mono16 => 16,
            PixelFormat::RGB8 | PixelFormat::BGR8 => 24,
            PixelFormat::RGBA8 | PixelFormat::BGRA8 => 32,
            PixelFormat::YUV422 | PixelFormat::YUV422Packed => 16,
        }
    }
}

/// Attributs stables d'une caméra, indépendants de sa configuration courante.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraIdentity {
    pub id: String,
    pub serial_number: String,
    pub vendor: String,
    pub model: String,
    pub mac_address: String,
    pub current_ip: String,
    pub dialect: Dialect,
}

/// Configuration applicable à une caméra.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub exposure_micros: f64,
    pub gain_db: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Mono8,
            width: 1280,
            height: 1024,
            exposure_micros: 10_000.0,
            gain_db: 0.0,
        }
    }
}

/// Rôle PTP d'une caméra dans le cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PtpRole {
    Initializing,
    Master,
    Slave,
    Unknown,
}

impl PtpRole {
    pub fn parse(status: &str) -> Self {
        match status {
            "Initializing" => PtpRole::Initializing,
            "Master" => PtpRole::Master,
            "Slave" => PtpRole::Slave,
            _ => PtpRole::Unknown,
        }
    }
}

/// Dernier état PTP connu d'une caméra, renseigné uniquement par `latch_ptp_state`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PtpState {
    pub enabled: bool,
    pub role: PtpRole,
    pub offset_from_master_ns: i64,
    pub latched_timestamp_ns: u64,
}

impl Default for PtpState {
    fn default() -> Self {
        Self {
            enabled: false,
            role: PtpRole::Unknown,
            offset_from_master_ns: 0,
            latched_timestamp_ns: 0,
        }
    }
}

/// Paramètres réseau calculés par l'ordonnanceur de bande passante et
/// écrits sur la caméra.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub link_speed_bps: i64,
    pub packet_size_b: u32,
    pub buffer_percent: f64,
    pub packet_delay_ns: i64,
    pub transmission_delay_ns: i64,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            link_speed_bps: 0,
            packet_size_b: 0,
            buffer_percent: 0.0,
            packet_delay_ns: 0,
            transmission_delay_ns: 0,
        }
    }
}

/// Image brute telle que livrée par le producteur, avant décodage canonique.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub device_timestamp_ns: u64,
    pub frame_id: u64,
}

/// Interface d'une caméra GigE Vision logique ("Camera Handle").
///
/// Chaque implémentation résout son dialecte de firmware à l'ouverture et
/// exprime toutes ses opérations en fonction de la table `LogicalFeature`.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Ouvre la caméra en mode de contrôle; doit être idempotent si déjà ouverte.
    async fn open(&mut self) -> Result<(), CameraError>;

    /// Ferme la caméra; libère le node-map distant sur tous les chemins de sortie.
    async fn close(&mut self) -> Result<(), CameraError>;

    fn identity(&self) -> &CameraIdentity;

    fn config(&self) -> &CameraConfig;

    async fn set_exposure_micros(&mut self, exposure_micros: f64) -> Result<(), CameraError>;

    async fn set_gain(&mut self, gain_db: f64) -> Result<(), CameraError>;

    async fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError>;

    async fn set_width(&mut self, width: u32) -> Result<(), CameraError>;

    async fn set_height(&mut self, height: u32) -> Result<(), CameraError>;

    async fn set_frame_rate(&mut self, fps: f64) -> Result<(), CameraError>;

    async fn set_free_run_mode(&mut self) -> Result<(), CameraError>;

    /// Active ou désactive PTP; sur activation, relit et mémorise `linkSpeedBps`.
    async fn set_ptp(&mut self, enable: bool) -> Result<(), CameraError>;

    fn ptp_state(&self) -> PtpState;

    /// Déclenche le latch PTP puis relit rôle, activation et offset.
    async fn latch_ptp_state(&mut self) -> Result<PtpState, CameraError>;

    /// Déclenche le latch d'horodatage et relit la valeur 64 bits.
    async fn latch_timestamp(&mut self) -> Result<u64, CameraError>;

    fn network_parameters(&self) -> NetworkParameters;

    /// Quantize puis écrit GevSCPSPacketSize/GevSCPD/GevSCFTD.
    async fn write_bandwidth(
        &mut self,
        packet_delay_ns: i64,
        transmission_delay_ns: i64,
        packet_size_b: u32,
    ) -> Result<NetworkParameters, CameraError>;

    async fn start_acquisition(&mut self) -> Result<(), CameraError>;

    async fn stop_acquisition(&mut self) -> Result<(), CameraError>;

    /// Bloque jusqu'à `timeout_ms` en attente d'une trame; `None` sur timeout
    /// ou buffer incomplet (distingués d'un `CameraError` réservé aux échecs
    /// durs de communication avec le device).
    async fn acquire_frame(&mut self, timeout_ms: u64) -> Result<Option<CameraFrame>, CameraError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_resolves_distinct_feature_names() {
        assert_eq!(LogicalFeature::PtpEnable.name(Dialect::Modern), "PtpEnable");
        assert_eq!(LogicalFeature::PtpEnable.name(Dialect::Legacy), "GevIEEE1588");
        assert_eq!(
            LogicalFeature::ExposureTime.name(Dialect::Legacy),
            "ExposureTimeAbs"
        );
    }

    #[test]
    fn packet_and_delay_features_are_dialect_invariant() {
        for dialect in [Dialect::Modern, Dialect::Legacy] {
            assert_eq!(LogicalFeature::PacketSize.name(dialect), "GevSCPSPacketSize");
            assert_eq!(LogicalFeature::PacketDelay.name(dialect), "GevSCPD");
            assert_eq!(LogicalFeature::FrameTxDelay.name(dialect), "GevSCFTD");
        }
    }

    #[test]
    fn ptp_role_parses_known_strings_and_falls_back_to_unknown() {
        assert_eq!(PtpRole::parse("Master"), PtpRole::Master);
        assert_eq!(PtpRole::parse("Slave"), PtpRole::Slave);
        assert_eq!(PtpRole::parse("Initializing"), PtpRole::Initializing);
        assert_eq!(PtpRole::parse("garbage"), PtpRole::Unknown);
    }

    #[test]
    fn bits_per_pixel_matches_known_formats() {
        assert_eq!(PixelFormat::Mono8.bits_per_pixel(), 8);
        assert_eq!(PixelFormat::BGR8.bits_per_pixel(), 24);
        assert_eq!(PixelFormat::BGRA8.bits_per_pixel(), 32);
        assert_eq!(PixelFormat::Mono16.bits_per_pixel(), 16);
    }
}
