//! # Orchestration de flotte GigE Vision
//!
//! Enchaîne les sous-systèmes d'une session d'acquisition multi-caméras:
//!
//! - [`registry`] — énumère les caméras joignables sur le lien (Producer Registry)
//! - [`device_manager`] — ouvre/ferme les caméras et applique les opérations
//!   en éventail (Device Manager)
//! - [`ptp`] — amène le cluster à convergence PTP (Contrôleur de synchronisation)
//! - [`bandwidth`] — calcule et écrit les délais inter-paquet/transmission
//!   (Ordonnanceur de bande passante)
//! - [`acquisition`] — capture et compose les flux en continu (Moteur d'acquisition)
//! - [`lifecycle`] — drapeau d'arrêt partagé et gestionnaire SIGINT
//!
//! [`GigeSession`] relie ces pièces dans l'ordre attendu par une exécution
//! de CLI typique: découverte, ouverture, synchronisation, ordonnancement,
//! acquisition, puis arrêt.
//!
//! ## Exemple
//!
//! ```no_run
//! use heimdall_gige::{GigeSession, SessionConfig};
//! use heimdall_gige::acquisition::LoggingCompositeSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = GigeSession::new(SessionConfig::default());
//!     let cameras = session.discover()?;
//!     let ids: Vec<String> = cameras.into_iter().map(|c| c.id).collect();
//!     session.open(&ids).await;
//!
//!     session.synchronize("demo_session").await?;
//!     session.schedule_bandwidth("demo_session").await?;
//!
//!     let stop_flag = session.stop_flag();
//!     heimdall_gige::lifecycle::install_interrupt_handler(stop_flag)?;
//!     session.run_acquisition("demo_session", 30.0, Arc::new(LoggingCompositeSink))?;
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use log::info;

pub mod acquisition;
pub mod bandwidth;
pub mod config;
pub mod device_manager;
pub mod diagnostics;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod overlay;
pub mod persistence;
pub mod ptp;
pub mod registry;
pub mod utils;

pub use acquisition::{AcquisitionEngine, CompositeSink, LoggingCompositeSink};
pub use bandwidth::BandwidthPlan;
pub use config::SessionConfig;
pub use diagnostics::DiagnosticReport;
pub use error::GigEError;
pub use frame::{Frame, LatestFrames};
pub use lifecycle::StopFlag;
pub use ptp::PtpControllerState;

/// Version du module.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Point d'entrée d'une session d'acquisition: possède le `DeviceManager` et
/// le drapeau d'arrêt partagés par tous les sous-systèmes.
pub struct GigeSession {
    config: SessionConfig,
    devices: device_manager::DeviceManager,
    stop_flag: lifecycle::StopFlag,
}

impl GigeSession {
    pub fn new(config: SessionConfig) -> Self {
        let registry = registry::ProducerRegistry::new();
        Self {
            config,
            devices: device_manager::DeviceManager::new(registry),
            stop_flag: lifecycle::StopFlag::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stop_flag(&self) -> lifecycle::StopFlag {
        self.stop_flag.clone()
    }

    pub fn devices_mut(&mut self) -> &mut device_manager::DeviceManager {
        &mut self.devices
    }

    /// Rafraîchit puis renvoie les caméras joignables sur le lien.
    pub fn discover(&mut self) -> Result<Vec<heimdall_camera::CameraIdentity>, GigEError> {
        self.devices.refresh_available()?;
        Ok(self.devices.available())
    }

    /// Ouvre les caméras demandées; renvoie les ids effectivement ouverts.
    pub async fn open(&mut self, ids: &[String]) -> Vec<String> {
        let _ = self.devices.refresh_available();
        self.devices.open(ids).await
    }

    /// Amène les caméras ouvertes à convergence PTP, puis journalise
    /// l'historique d'offset collecté pendant la convergence.
    pub async fn synchronize(&mut self, session_id: &str) -> Result<PtpControllerState, GigEError> {
        let ids = self.devices.opened_ids();
        let mut controller = ptp::PtpController::new(&self.config);
        let state = controller.run(&mut self.devices).await?;
        write_offset_history(&self.config, session_id, &ids, controller.history())?;
        Ok(state)
    }

    /// Calcule les délais de bande passante, les écrit sur chaque caméra
    /// ouverte, et persiste le plan retenu.
    pub async fn schedule_bandwidth(&mut self, session_id: &str) -> Result<BandwidthPlan, GigEError> {
        let plan = bandwidth::run(&mut self.devices, &self.config).await?;
        persistence::write_bandwidth_csv(&self.config.bandwidth_csv_path(session_id), &plan)?;
        Ok(plan)
    }

    /// Démarre le moteur d'acquisition et bloque jusqu'à l'arrêt (signal ou
    /// instabilité d'une caméra).
    pub fn run_acquisition(
        &mut self,
        session_id: &str,
        initial_fps_ceiling: f64,
        sink: Arc<dyn CompositeSink>,
    ) -> Result<(), GigEError> {
        let engine = AcquisitionEngine::new(self.config.clone());
        engine.run(
            &mut self.devices,
            session_id,
            initial_fps_ceiling,
            self.stop_flag.clone(),
            sink,
        )
    }

    /// Instantané de diagnostic des caméras actuellement ouvertes.
    pub fn diagnose(&mut self) -> DiagnosticReport {
        diagnostics::collect(&mut self.devices)
    }

    /// Ferme toutes les caméras ouvertes; dernière étape de l'arrêt (§5, §7).
    pub async fn shutdown(&mut self) -> Result<(), GigEError> {
        info!("shutting down session, closing all opened cameras");
        self.devices.close_all().await
    }
}

/// Reconstitue les lignes "une par scrutation" à partir des anneaux
/// d'historique par caméra collectés pendant la convergence PTP.
///
/// Les scrutations à une seule caméra court-circuitent avant toute
/// collecte d'historique (§4.D): aucun fichier n'est créé dans ce cas.
fn write_offset_history(
    config: &SessionConfig,
    session_id: &str,
    ids: &[String],
    history: &ptp::OffsetHistory,
) -> Result<(), GigEError> {
    if ids.len() < 2 {
        return Ok(());
    }
    let path = config.offset_csv_path(session_id);
    let mut writer = persistence::OffsetCsvWriter::create(&path)?;
    let max_len = ids
        .iter()
        .map(|id| history.samples(id).len())
        .max()
        .unwrap_or(0);
    for i in 0..max_len {
        let row: Vec<(String, i64)> = ids
            .iter()
            .filter_map(|id| history.samples(id).get(i).map(|sample| (id.clone(), sample.offset_ns)))
            .collect();
        if !row.is_empty() {
            writer.append_poll(&row)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_opens_discovers_and_shuts_down_cleanly() {
        let mut session = GigeSession::new(SessionConfig::default());
        let cameras = session.discover().unwrap();
        assert!(!cameras.is_empty());

        let ids: Vec<String> = cameras.into_iter().take(1).map(|c| c.id).collect();
        let opened = session.open(&ids).await;
        assert_eq!(opened, ids);

        session.shutdown().await.unwrap();
        assert!(session.devices_mut().is_empty());
    }

    #[tokio::test]
    async fn single_camera_session_skips_offset_history_file() {
        let mut config = SessionConfig::default();
        config.output_dir = std::env::temp_dir().join("heimdall_lib_test_single");
        let session_id = "lib_test_single_camera";

        let mut session = GigeSession::new(config.clone());
        let cameras = session.discover().unwrap();
        let ids: Vec<String> = cameras.into_iter().take(1).map(|c| c.id).collect();
        session.open(&ids).await;
        session.synchronize(session_id).await.unwrap();

        assert!(!config.offset_csv_path(session_id).exists());
    }
}
