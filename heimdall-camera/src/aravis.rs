//! Backend de caméra simulé exposant l'interface GigE Vision via Aravis.
//!
//! Le vrai binding `aravis-rs`/`aravis-sys` parle au GenTL producer; ici le
//! device et son node-map distant sont simulés par une table de paramètres en
//! mémoire, de la même manière que le reste du paquet simule l'étage matériel.
//! Toute la logique de dialecte, de PTP et de bande passante au-dessus de
//! cette table est la même que celle qu'un vrai binding exécuterait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info};

use crate::{
    Camera, CameraConfig, CameraError, CameraFrame, CameraIdentity, Dialect, LogicalFeature,
    NetworkParameters, PixelFormat, PtpRole, PtpState,
};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

/// Fabrique la liste stable de caméras simulées disponibles sur le lien,
/// telle qu'énumérée par le registre de producteurs.
///
/// Chaque entrée a un `serial_number` unique; deux appels successifs
/// retournent le même ensemble (idempotence de l'énumération).
pub fn discover() -> Vec<CameraIdentity> {
    vec![
        CameraIdentity {
            id: "gev://192.168.1.10".to_string(),
            serial_number: "BAS-0001".to_string(),
            vendor: "Basler".to_string(),
            model: "acA1920-50gm".to_string(),
            mac_address: crate::decimal_to_mac(0x0030_5311_0001),
            current_ip: crate::decimal_to_ip(0xC0A8_010A),
            dialect: Dialect::Modern,
        },
        CameraIdentity {
            id: "gev://192.168.1.11".to_string(),
            serial_number: "BAS-0002".to_string(),
            vendor: "Basler".to_string(),
            model: "acA1920-50gm".to_string(),
            mac_address: crate::decimal_to_mac(0x0030_5311_0002),
            current_ip: crate::decimal_to_ip(0xC0A8_010B),
            dialect: Dialect::Modern,
        },
        CameraIdentity {
            id: "gev://192.168.1.12".to_string(),
            serial_number: "BAS-0003".to_string(),
            vendor: "Basler".to_string(),
            model: "acA1300-30gm".to_string(),
            mac_address: crate::decimal_to_mac(0x0030_5311_0003),
            current_ip: crate::decimal_to_ip(0xC0A8_010C),
            // A deliberately older unit: exercises the legacy GevIEEE1588 path.
            dialect: Dialect::Legacy,
        },
        CameraIdentity {
            id: "gev://192.168.1.13".to_string(),
            serial_number: "BAS-0004".to_string(),
            vendor: "Basler".to_string(),
            model: "acA1920-50gm".to_string(),
            mac_address: crate::decimal_to_mac(0x0030_5311_0004),
            current_ip: crate::decimal_to_ip(0xC0A8_010D),
            dialect: Dialect::Modern,
        },
    ]
}

/// Une caméra Aravis (simulée), implémentant l'interface `Camera`.
pub struct AravisCamera {
    identity: CameraIdentity,
    config: CameraConfig,
    ptp_state: PtpState,
    network_parameters: NetworkParameters,
    is_open: bool,
    is_acquiring: bool,
    /// Table de paramètres simulant le node-map distant du device.
    parameters: HashMap<String, String>,
    consecutive_empty_grabs: u32,
    ptp_converged_polls: u32,
}

impl AravisCamera {
    pub fn new(identity: CameraIdentity) -> Self {
        Self {
            identity,
            config: CameraConfig::default(),
            ptp_state: PtpState::default(),
            network_parameters: NetworkParameters::default(),
            is_open: false,
            is_acquiring: false,
            parameters: HashMap::new(),
            consecutive_empty_grabs: 0,
            ptp_converged_polls: 0,
        }
    }

    fn feature(&self, logical: LogicalFeature) -> &'static str {
        logical.name(self.identity.dialect)
    }

    fn require_open(&self) -> Result<(), CameraError> {
        if self.is_open {
            Ok(())
        } else {
            Err(CameraError::DeviceUnavailable(self.identity.id.clone()))
        }
    }

    fn set_param(&mut self, feature: &'static str, value: impl ToString) {
        self.parameters.insert(feature.to_string(), value.to_string());
    }

    fn get_param(&self, feature: &'static str) -> Option<&str> {
        self.parameters.get(feature).map(|s| s.as_str())
    }

    /// Simule la progression du rôle PTP au fil des polls: Initializing pour
    /// le premier poll, puis Master pour la caméra désignée par convention
    /// (première du fleet), Slave pour les autres, avec un offset qui
    /// converge vers zéro.
    fn simulate_ptp_progress(&mut self) {
        self.ptp_converged_polls += 1;
        let is_designated_master = self.identity.serial_number == "BAS-0001";
        if self.ptp_converged_polls <= 1 {
            self.ptp_state.role = PtpRole::Initializing;
            self.ptp_state.offset_from_master_ns = 0;
        } else if is_designated_master {
            self.ptp_state.role = PtpRole::Master;
            self.ptp_state.offset_from_master_ns = 0;
        } else {
            self.ptp_state.role = PtpRole::Slave;
            let settle = (self.ptp_converged_polls as i64 - 2).max(0);
            let residual = (500 - settle * 80).max(20);
            self.ptp_state.offset_from_master_ns = residual;
        }
    }
}

#[async_trait]
impl Camera for AravisCamera {
    async fn open(&mut self) -> Result<(), CameraError> {
        if self.is_open {
            return Ok(());
        }
        self.is_open = true;
        self.set_param("Width", self.config.width);
        self.set_param("Height", self.config.height);
        self.set_param("PixelFormat", "Mono8");
        info!("camera {} opened ({:?})", self.identity.id, self.identity.dialect);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CameraError> {
        if !self.is_open {
            return Ok(());
        }
        self.is_acquiring = false;
        self.is_open = false;
        debug!("camera {} closed", self.identity.id);
        Ok(())
    }

    fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    fn config(&self) -> &CameraConfig {
        &self.config
    }

    async fn set_exposure_micros(&mut self, exposure_micros: f64) -> Result<(), CameraError> {
        self.require_open()?;
        self.set_param("ExposureMode", "Timed");
        self.set_param("ExposureAuto", "Off");
        let feature = self.feature(LogicalFeature::ExposureTime);
        self.set_param(feature, exposure_micros);
        self.config.exposure_micros = exposure_micros;
        Ok(())
    }

    async fn set_gain(&mut self, gain_db: f64) -> Result<(), CameraError> {
        self.require_open()?;
        self.set_param("Gain", gain_db);
        self.config.gain_db = gain_db;
        Ok(())
    }

    async fn set_pixel_format(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        self.require_open()?;
        self.set_param("PixelFormat", format!("{:?}", format));
        self.config.pixel_format = format;
        Ok(())
    }

    async fn set_width(&mut self, width: u32) -> Result<(), CameraError> {
        self.require_open()?;
        self.set_param("Width", width);
        self.config.width = width;
        Ok(())
    }

    async fn set_height(&mut self, height: u32) -> Result<(), CameraError> {
        self.require_open()?;
        self.set_param("Height", height);
        self.config.height = height;
        Ok(())
    }

    async fn set_frame_rate(&mut self, fps: f64) -> Result<(), CameraError> {
        self.require_open()?;
        self.set_param("AcquisitionFrameRateEnable", true);
        let feature = self.feature(LogicalFeature::FrameRate);
        self.set_param(feature, fps);
        Ok(())
    }

    async fn set_free_run_mode(&mut self) -> Result<(), CameraError> {
        self.require_open()?;
        self.set_param("AcquisitionMode", "Continuous");
        self.set_param("TriggerSelector", "FrameStart");
        self.set_param("TriggerMode", "Off");
        Ok(())
    }

    async fn set_ptp(&mut self, enable: bool) -> Result<(), CameraError> {
        self.require_open()?;
        let feature = self.feature(LogicalFeature::PtpEnable);
        self.set_param(feature, enable);
        self.ptp_state.enabled = enable;
        if enable {
            self.ptp_converged_polls = 0;
            match self.identity.dialect {
                Dialect::Modern => {
                    self.network_parameters.link_speed_bps = 1_250_000_000;
                    self.set_param(self.feature(LogicalFeature::LinkSpeed), 1_250_000_000i64);
                }
                Dialect::Legacy => {
                    // Legacy dialect reports link speed in Mbps; the handle
                    // multiplies by 1e6 to get bps.
                    let link_speed_mbps = 1_000i64;
                    self.set_param(self.feature(LogicalFeature::LinkSpeed), link_speed_mbps);
                    self.network_parameters.link_speed_bps = link_speed_mbps * 1_000_000;
                }
            }
        } else {
            self.ptp_state.role = PtpRole::Unknown;
            self.ptp_state.offset_from_master_ns = 0;
        }
        Ok(())
    }

    fn ptp_state(&self) -> PtpState {
        self.ptp_state
    }

    async fn latch_ptp_state(&mut self) -> Result<PtpState, CameraError> {
        self.require_open()?;
        if !self.ptp_state.enabled {
            return Ok(self.ptp_state);
        }
        self.simulate_ptp_progress();
        match self.identity.dialect {
            Dialect::Modern => {
                let status = match self.ptp_state.role {
                    PtpRole::Master => "Master",
                    PtpRole::Slave => "Slave",
                    PtpRole::Initializing => "Initializing",
                    PtpRole::Unknown => "Unknown",
                };
                self.set_param(self.feature(LogicalFeature::PtpStatus), status);
                self.set_param(
                    self.feature(LogicalFeature::PtpOffset),
                    self.ptp_state.offset_from_master_ns,
                );
            }
            Dialect::Legacy => {
                // Some legacy devices never expose an offset register.
                if self.get_param(self.feature(LogicalFeature::PtpOffset)).is_none()
                    && self.identity.serial_number != "BAS-0001"
                {
                    self.ptp_state.offset_from_master_ns = 0;
                }
            }
        }
        Ok(self.ptp_state)
    }

    async fn latch_timestamp(&mut self) -> Result<u64, CameraError> {
        self.require_open()?;
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        self.ptp_state.latched_timestamp_ns = now_ns;
        Ok(now_ns)
    }

    fn network_parameters(&self) -> NetworkParameters {
        self.network_parameters
    }

    async fn write_bandwidth(
        &mut self,
        packet_delay_ns: i64,
        transmission_delay_ns: i64,
        packet_size_b: u32,
    ) -> Result<NetworkParameters, CameraError> {
        self.require_open()?;
        let quantized_packet_size = ((packet_size_b + 3) / 4) * 4;
        let quantized_delay = round_up_to_multiple_of_8(packet_delay_ns);
        let quantized_tx_delay = round_up_to_multiple_of_8(transmission_delay_ns);

        self.set_param(self.feature(LogicalFeature::PacketSize), quantized_packet_size);
        self.set_param(self.feature(LogicalFeature::PacketDelay), quantized_delay);
        self.set_param(self.feature(LogicalFeature::FrameTxDelay), quantized_tx_delay);

        self.network_parameters.packet_size_b = quantized_packet_size;
        self.network_parameters.packet_delay_ns = quantized_delay;
        self.network_parameters.transmission_delay_ns = quantized_tx_delay;
        Ok(self.network_parameters)
    }

    async fn start_acquisition(&mut self) -> Result<(), CameraError> {
        self.require_open()?;
        self.is_acquiring = true;
        self.consecutive_empty_grabs = 0;
        Ok(())
    }

    async fn stop_acquisition(&mut self) -> Result<(), CameraError> {
        self.is_acquiring = false;
        Ok(())
    }

    async fn acquire_frame(&mut self, _timeout_ms: u64) -> Result<Option<CameraFrame>, CameraError> {
        if !self.is_acquiring {
            return Err(CameraError::AcquisitionError(format!(
                "camera {} is not acquiring",
                self.identity.id
            )));
        }
        // A rare simulated empty grab exercises the consecutive-failure path.
        if rand::random::<f32>() < 0.01 {
            self.consecutive_empty_grabs += 1;
            return Ok(None);
        }
        self.consecutive_empty_grabs = 0;

        let channels = match self.config.pixel_format {
            PixelFormat::Mono8 => 1,
            PixelFormat::Mono16 => 2,
            PixelFormat::RGB8 | PixelFormat::BGR8 => 3,
            PixelFormat::RGBA8 | PixelFormat::BGRA8 => 4,
            _ => 1,
        };
        let size = (self.config.width * self.config.height * channels) as usize;
        let mut data = vec![0u8; size];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = ((i as u32 + self.config.width) % 256) as u8;
        }

        let device_timestamp_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;

        Ok(Some(CameraFrame {
            data,
            width: self.config.width,
            height: self.config.height,
            pixel_format: self.config.pixel_format,
            device_timestamp_ns,
            frame_id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
        }))
    }
}

fn round_up_to_multiple_of_8(value: i64) -> i64 {
    if value <= 0 {
        return 0;
    }
    ((value + 7) / 8) * 8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_camera(dialect: Dialect) -> AravisCamera {
        let identity = CameraIdentity {
            id: "test".into(),
            serial_number: "SN-TEST".into(),
            vendor: "Test".into(),
            model: "TestCam".into(),
            mac_address: "00:00:00:00:00:01".into(),
            current_ip: "10.0.0.1".into(),
            dialect,
        };
        AravisCamera::new(identity)
    }

    #[test]
    fn discover_is_idempotent_and_unique_by_serial() {
        let first: Vec<_> = discover().into_iter().map(|c| c.serial_number).collect();
        let second: Vec<_> = discover().into_iter().map(|c| c.serial_number).collect();
        assert_eq!(first, second);
        let unique: std::collections::HashSet<_> = first.iter().collect();
        assert_eq!(unique.len(), first.len());
    }

    #[tokio::test]
    async fn operations_fail_with_device_unavailable_before_open() {
        let mut camera = open_camera(Dialect::Modern);
        let err = camera.set_gain(5.0).await.unwrap_err();
        assert!(matches!(err, CameraError::DeviceUnavailable(_)));
    }

    #[tokio::test]
    async fn set_ptp_reads_back_link_speed_per_dialect() {
        let mut modern = open_camera(Dialect::Modern);
        modern.open().await.unwrap();
        modern.set_ptp(true).await.unwrap();
        assert_eq!(modern.network_parameters().link_speed_bps, 1_250_000_000);

        let mut legacy = open_camera(Dialect::Legacy);
        legacy.open().await.unwrap();
        legacy.set_ptp(true).await.unwrap();
        assert_eq!(legacy.network_parameters().link_speed_bps, 1_000_000_000);
    }

    #[tokio::test]
    async fn write_bandwidth_quantizes_packet_size_and_delays() {
        let mut camera = open_camera(Dialect::Modern);
        camera.open().await.unwrap();
        let params = camera.write_bandwidth(75_697, 0, 8_227).await.unwrap();
        assert_eq!(params.packet_size_b % 4, 0);
        assert_eq!(params.packet_delay_ns % 8, 0);
        assert_eq!(params.transmission_delay_ns % 8, 0);
        assert!(params.packet_size_b >= 8_227);
        assert!(params.packet_delay_ns >= 75_697);
    }

    #[tokio::test]
    async fn set_ptp_false_clears_role_and_offset() {
        let mut camera = open_camera(Dialect::Modern);
        camera.open().await.unwrap();
        camera.set_ptp(true).await.unwrap();
        camera.latch_ptp_state().await.unwrap();
        camera.set_ptp(false).await.unwrap();
        assert!(!camera.ptp_state().enabled);
    }
}
