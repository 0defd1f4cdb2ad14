//! Contrôleur de synchronisation PTP: amène le cluster de caméras ouvertes
//! à un état où exactement une caméra est maître, toutes les autres sont
//! esclaves, et leur offset par rapport au maître reste sous le seuil
//! configuré pendant plusieurs scrutations consécutives.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use heimdall_camera::PtpRole;
use log::{info, warn};
use tracing::{instrument, Instrument};

use crate::config::SessionConfig;
use crate::device_manager::DeviceManager;
use crate::error::GigEError;

/// Échantillon d'offset PTP pour une caméra, horodaté par l'horloge hôte.
#[derive(Debug, Clone, Copy)]
pub struct OffsetSample {
    pub offset_ns: i64,
    pub timestamp_ns: u64,
}

/// Anneau borné d'échantillons par caméra.
#[derive(Debug, Default)]
pub struct OffsetHistory {
    rings: std::collections::HashMap<String, VecDeque<OffsetSample>>,
    capacity: usize,
}

impl OffsetHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: std::collections::HashMap::new(),
            capacity,
        }
    }

    pub fn push(&mut self, camera_id: &str, sample: OffsetSample) {
        let ring = self.rings.entry(camera_id.to_string()).or_default();
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    pub fn samples(&self, camera_id: &str) -> &[OffsetSample] {
        self.rings
            .get(camera_id)
            .map(|r| r.as_slices().0)
            .unwrap_or(&[])
    }
}

/// État courant du contrôleur de synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpControllerState {
    EnablingPtp,
    WaitingForRoles,
    VerifyingOffset,
    Synchronized,
    Failed,
}

pub struct PtpController<'a> {
    config: &'a SessionConfig,
    history: OffsetHistory,
}

impl<'a> PtpController<'a> {
    pub fn new(config: &'a SessionConfig) -> Self {
        Self {
            config,
            history: OffsetHistory::new(config.ring_buffer_size),
        }
    }

    pub fn history(&self) -> &OffsetHistory {
        &self.history
    }

    /// Exécute la machine d'état jusqu'à `Synchronized` ou `Failed`.
    ///
    /// Un cluster à une seule caméra n'a pas de contrat maître/esclave: il est
    /// déclaré synchronisé sans passer par la scrutation des rôles.
    #[instrument(skip(self, devices))]
    pub async fn run(&mut self, devices: &mut DeviceManager) -> Result<PtpControllerState, GigEError> {
        let ids = devices.opened_ids();
        let n = ids.len();

        for id in &ids {
            if let Some(camera) = devices.camera_mut(id) {
                camera.set_ptp(true).await?;
            }
        }

        if n < 2 {
            info!("single-camera session, PTP controller short-circuits to Synchronized");
            return Ok(PtpControllerState::Synchronized);
        }

        let wait_deadline = Instant::now() + Duration::from_millis(self.config.monitor_ptp_status_timeout_ms);
        async {
            loop {
                if Instant::now() >= wait_deadline {
                    warn!("PTP role convergence timed out after {:?}", wait_deadline.elapsed());
                    return Err(GigEError::PtpSyncTimeout(
                        Duration::from_millis(self.config.monitor_ptp_status_timeout_ms),
                        "roles did not converge to 1 master / N-1 slaves".to_string(),
                    ));
                }

                let (n_master, n_slave, n_init) = self.poll_roles(devices, &ids).await?;
                if n_master == 1 && n_slave == n - 1 && n_init == 0 {
                    return Ok(());
                }

                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            }
        }
        .instrument(tracing::info_span!("waiting_for_roles", cameras = n))
        .await?;

        let mut consecutive_ok = 0u32;
        let verify_deadline = Instant::now() + Duration::from_millis(self.config.monitor_ptp_status_timeout_ms);
        let verify_span = tracing::info_span!("verifying_offset", required_consecutive = self.config.ptp_max_check);
        async {
            loop {
                if Instant::now() >= verify_deadline {
                    return Err(GigEError::PtpSyncTimeout(
                        Duration::from_millis(self.config.monitor_ptp_status_timeout_ms),
                        "offset did not stay within threshold for the required consecutive polls".to_string(),
                    ));
                }

                let within_threshold = self.poll_offsets(devices, &ids).await?;
                if within_threshold {
                    consecutive_ok += 1;
                } else {
                    consecutive_ok = 0;
                }

                if consecutive_ok >= self.config.ptp_max_check {
                    info!("PTP cluster synchronized after {consecutive_ok} consecutive passing polls");
                    return Ok(PtpControllerState::Synchronized);
                }

                tokio::time::sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            }
        }
        .instrument(verify_span)
        .await
    }

    /// Une scrutation: compte les rôles. Les compteurs sont réinitialisés à
    /// chaque appel — un décompte périmé ne doit jamais fuiter vers le poll suivant.
    async fn poll_roles(
        &mut self,
        devices: &mut DeviceManager,
        ids: &[String],
    ) -> Result<(usize, usize, usize), GigEError> {
        let (mut n_master, mut n_slave, mut n_init) = (0, 0, 0);
        for id in ids {
            if let Some(camera) = devices.camera_mut(id) {
                let state = camera.latch_ptp_state().await?;
                self.history.push(
                    id,
                    OffsetSample {
                        offset_ns: state.offset_from_master_ns,
                        timestamp_ns: state.latched_timestamp_ns,
                    },
                );
                match state.role {
                    PtpRole::Master => n_master += 1,
                    PtpRole::Slave => n_slave += 1,
                    PtpRole::Initializing => n_init += 1,
                    PtpRole::Unknown => {}
                }
            }
        }
        Ok((n_master, n_slave, n_init))
    }

    async fn poll_offsets(&mut self, devices: &mut DeviceManager, ids: &[String]) -> Result<bool, GigEError> {
        let mut all_within = true;
        for id in ids {
            if let Some(camera) = devices.camera_mut(id) {
                let state = camera.latch_ptp_state().await?;
                self.history.push(
                    id,
                    OffsetSample {
                        offset_ns: state.offset_from_master_ns,
                        timestamp_ns: state.latched_timestamp_ns,
                    },
                );
                if state.role == PtpRole::Slave
                    && state.offset_from_master_ns.abs() > self.config.ptp_offset_threshold_ns
                {
                    all_within = false;
                }
            }
        }
        Ok(all_within)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_history_is_bounded_and_fifo() {
        let mut history = OffsetHistory::new(3);
        for i in 0..5 {
            history.push(
                "CAM_A",
                OffsetSample {
                    offset_ns: i,
                    timestamp_ns: i as u64,
                },
            );
        }
        let samples = history.samples("CAM_A");
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].offset_ns, 2);
        assert_eq!(samples[2].offset_ns, 4);
    }

    #[tokio::test]
    async fn single_camera_short_circuits_to_synchronized() {
        let config = SessionConfig::default();
        let mut registry = crate::registry::ProducerRegistry::new();
        registry.enumerate().unwrap();
        let mut devices = DeviceManager::new(registry);
        let id = devices.available().first().unwrap().id.clone();
        devices.open(&[id]).await;

        let mut controller = PtpController::new(&config);
        let state = controller.run(&mut devices).await.unwrap();
        assert_eq!(state, PtpControllerState::Synchronized);
    }

    #[tokio::test]
    async fn two_cameras_converge_to_synchronized() {
        let mut config = SessionConfig::default();
        config.poll_interval_ms = 1;
        config.monitor_ptp_status_timeout_ms = 5_000;
        config.ptp_max_check = 2;

        let mut registry = crate::registry::ProducerRegistry::new();
        registry.enumerate().unwrap();
        let mut devices = DeviceManager::new(registry);
        let ids: Vec<String> = devices.available().into_iter().take(2).map(|d| d.id).collect();
        devices.open(&ids).await;

        let mut controller = PtpController::new(&config);
        let state = controller.run(&mut devices).await.unwrap();
        assert_eq!(state, PtpControllerState::Synchronized);
    }
}
