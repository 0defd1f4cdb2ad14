//! Diagnostics de flotte: instantané de l'état PTP et réseau de chaque
//! caméra ouverte, utilisé par `--list --cameras` pour inspecter une session
//! sans déclencher d'acquisition.

use std::fmt;

use heimdall_camera::{Dialect, NetworkParameters, PtpState};

use crate::device_manager::DeviceManager;

/// État courant d'une caméra ouverte.
#[derive(Debug, Clone)]
pub struct CameraStatus {
    pub id: String,
    pub vendor: String,
    pub model: String,
    pub dialect: Dialect,
    pub ptp: PtpState,
    pub network: NetworkParameters,
}

/// Rapport de diagnostic d'une flotte de caméras ouvertes.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub camera_statuses: Vec<CameraStatus>,
}

impl DiagnosticReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_camera_status(&mut self, status: CameraStatus) {
        self.camera_statuses.push(status);
    }

    pub fn all_synchronized(&self) -> bool {
        !self.camera_statuses.is_empty()
            && self
                .camera_statuses
                .iter()
                .all(|status| status.ptp.role == heimdall_camera::PtpRole::Master || status.ptp.role == heimdall_camera::PtpRole::Slave)
    }

    pub fn summary(&self) -> String {
        let synchronized = self
            .camera_statuses
            .iter()
            .filter(|status| status.ptp.enabled)
            .count();
        format!(
            "{} caméra(s), {} avec PTP actif",
            self.camera_statuses.len(),
            synchronized
        )
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rapport de diagnostic - {}", self.summary())?;
        for status in &self.camera_statuses {
            writeln!(
                f,
                "  {} ({} {}, dialecte {:?})",
                status.id, status.vendor, status.model, status.dialect
            )?;
            writeln!(
                f,
                "    PTP: enabled={} role={:?} offset={}ns",
                status.ptp.enabled, status.ptp.role, status.ptp.offset_from_master_ns
            )?;
            writeln!(
                f,
                "    Réseau: link_speed={}bps packet_size={}B Dp={}ns Dt={}ns",
                status.network.link_speed_bps,
                status.network.packet_size_b,
                status.network.packet_delay_ns,
                status.network.transmission_delay_ns
            )?;
        }
        Ok(())
    }
}

/// Construit un rapport en interrogeant chaque caméra actuellement ouverte.
/// Ne touche pas à l'acquisition: uniquement des lectures d'état déjà
/// connues du handle (pas de latch PTP ni de grab).
pub fn collect(devices: &mut DeviceManager) -> DiagnosticReport {
    let mut report = DiagnosticReport::new();
    for id in devices.opened_ids() {
        if let Some(camera) = devices.camera_mut(&id) {
            let identity = camera.identity();
            report.add_camera_status(CameraStatus {
                id: identity.id.clone(),
                vendor: identity.vendor.clone(),
                model: identity.model.clone(),
                dialect: identity.dialect,
                ptp: camera.ptp_state(),
                network: camera.network_parameters(),
            });
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProducerRegistry;

    #[tokio::test]
    async fn collect_reports_one_status_per_opened_camera() {
        let mut registry = ProducerRegistry::new();
        registry.enumerate().unwrap();
        let mut manager = DeviceManager::new(registry);
        let ids: Vec<String> = manager.available().into_iter().take(2).map(|d| d.id).collect();
        manager.open(&ids).await;

        let report = collect(&mut manager);
        assert_eq!(report.camera_statuses.len(), 2);
    }

    #[test]
    fn summary_counts_cameras_with_ptp_enabled() {
        let mut report = DiagnosticReport::new();
        report.add_camera_status(CameraStatus {
            id: "CAM_A".to_string(),
            vendor: "Basler".to_string(),
            model: "acA2500".to_string(),
            dialect: Dialect::Modern,
            ptp: PtpState {
                enabled: true,
                ..Default::default()
            },
            network: NetworkParameters::default(),
        });
        assert_eq!(report.summary(), "1 caméra(s), 1 avec PTP actif");
    }
}
