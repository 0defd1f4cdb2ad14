//! Moteur d'acquisition multi-flux: une tâche de capture `std::thread` par
//! caméra ouverte, plus un agrégateur qui lit `LatestFrames` et compose la
//! vue mosaïque. Le chemin chaud reste en threads natifs plutôt qu'en tâches
//! tokio (§5): chaque boucle de capture bloque sur `acquire_frame`, et un
//! exécuteur asynchrone à vol de tâches n'apporterait rien ici.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use heimdall_camera::Camera;
use log::{debug, error, info, warn};
use metrics::{counter, gauge};

use crate::config::SessionConfig;
use crate::device_manager::DeviceManager;
use crate::error::{with_recovery, GigEError};
use crate::frame::{Frame, LatestFrames};
use crate::lifecycle::StopFlag;
use crate::overlay;
use crate::persistence::save_frame_png;

/// Moyenne glissante de cadence instantanée, fenêtrée à `ptpMaxCheck`
/// échantillons (même fenêtre que la vérification de convergence PTP, pour
/// que "stable" signifie la même chose aux deux endroits du système).
struct FpsEstimator {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl FpsEstimator {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, instantaneous_fps: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(instantaneous_fps);
    }

    fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.samples.iter().sum::<f64>() / self.samples.len() as f64
        }
    }

    /// Stable au sens de la persistance (§9): la moyenne courante est à moins
    /// d'1 Hz du dernier plafond appliqué à la caméra.
    fn is_stable_around(&self, applied_ceiling: f64) -> bool {
        !self.samples.is_empty() && (self.mean() - applied_ceiling).abs() <= 1.0
    }
}

/// Plafond de cadence partagé entre toutes les tâches de capture.
///
/// Garantie de cliquet: `throttle` ne peut que faire décroître la valeur
/// courante (réduction de 2 %), jamais l'augmenter, et ne descend jamais
/// sous `floor` (`fpsLowerBound`).
pub struct FpsCeiling {
    value: Mutex<f64>,
    floor: f64,
}

impl FpsCeiling {
    pub fn new(initial: f64, floor: f64) -> Self {
        Self {
            value: Mutex::new(initial.max(floor)),
            floor,
        }
    }

    pub fn current(&self) -> f64 {
        *self.value.lock().unwrap()
    }

    pub fn floor(&self) -> f64 {
        self.floor
    }

    /// Applique une réduction de 2 %, plafonnée par le plancher; renvoie la
    /// valeur retenue (identique à l'ancienne si elle était déjà au plancher).
    pub fn throttle(&self) -> f64 {
        let mut current = self.value.lock().unwrap();
        let candidate = (*current * 0.98).max(self.floor);
        if candidate < *current {
            *current = candidate;
        }
        *current
    }
}

/// Détermine la grille de la vue composite pour `n` caméras (N ≤ 6).
pub fn composite_layout(n: usize) -> (usize, usize) {
    match n {
        0 | 1 => (1, 1),
        2 => (1, 2),
        3 | 4 => (2, 2),
        _ => (2, 3),
    }
}

/// Point de sortie de la vue composite. La mosaïque elle-même (rendu GUI)
/// est hors périmètre; par défaut on journalise simplement le taux de
/// remplissage, ce qui suffit pour vérifier que l'agrégateur tourne.
pub trait CompositeSink: Send + Sync {
    fn publish(&self, tiles: &[Option<Frame>], layout: (usize, usize));
}

#[derive(Debug, Default)]
pub struct LoggingCompositeSink;

impl CompositeSink for LoggingCompositeSink {
    fn publish(&self, tiles: &[Option<Frame>], layout: (usize, usize)) {
        let present = tiles.iter().filter(|tile| tile.is_some()).count();
        debug!(
            "composite {}x{}: {}/{} slots populated",
            layout.0,
            layout.1,
            present,
            tiles.len()
        );
    }
}

fn canonical_channels(canonical: &heimdall_camera::format::Canonical) -> u32 {
    match canonical {
        heimdall_camera::format::Canonical::Mono(_) => 1,
        heimdall_camera::format::Canonical::Bgr(_) => 3,
    }
}

/// Boucle de capture d'une seule caméra, exécutée sur son propre thread natif
/// avec un petit runtime tokio mono-thread pour appeler le `Camera` async.
///
/// Rend la caméra à l'appelant en sortie de boucle (arrêt demandé ou
/// instabilité), pour que `DeviceManager` puisse la refermer en dernier lieu.
fn run_grab_task(
    camera_id: String,
    slot_index: usize,
    mut camera: Box<dyn Camera>,
    config: SessionConfig,
    session: String,
    stop_flag: StopFlag,
    latest_frames: Arc<LatestFrames>,
    fps_ceiling: Arc<FpsCeiling>,
) -> (String, Box<dyn Camera>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build grab task runtime");

    runtime.block_on(async {
        if let Err(err) = camera.start_acquisition().await {
            error!("camera {camera_id} failed to start acquisition: {err}");
            return;
        }

        let mut consecutive_failures: u32 = 0;
        let mut estimator = FpsEstimator::new(config.ptp_max_check as usize);
        let mut last_frame_at: Option<Instant> = None;
        let mut last_applied_ceiling = fps_ceiling.current();

        while !stop_flag.is_stopped() {
            let grab_timeout_ms = config.grab_timeout_ms;
            let grab_result = with_recovery(
                || camera.acquire_frame(grab_timeout_ms),
                GigEError::from,
            )
            .await;

            match grab_result {
                Ok(Some(raw)) => {
                    consecutive_failures = 0;

                    let now = Instant::now();
                    if let Some(previous) = last_frame_at {
                        let dt = now.duration_since(previous).as_secs_f64();
                        if dt > 0.0 {
                            estimator.push(1.0 / dt);
                        }
                    }
                    last_frame_at = Some(now);

                    let mean_fps = estimator.mean();
                    if (mean_fps - last_applied_ceiling).abs() > 1.0 {
                        let new_ceiling = fps_ceiling.throttle();
                        if let Err(err) = camera.set_frame_rate(new_ceiling).await {
                            warn!("camera {camera_id} failed to apply throttled frame rate: {err}");
                        }
                        last_applied_ceiling = new_ceiling;
                        gauge!("heimdall_gige.fps.ceiling", new_ceiling, "camera" => camera_id.clone());
                    }

                    let device_timestamp_ns = camera
                        .latch_timestamp()
                        .await
                        .unwrap_or(raw.device_timestamp_ns);

                    let canonical = heimdall_camera::format::decode(&raw)
                        .resize(config.display_width, config.display_height);
                    let channels = canonical_channels(&canonical);
                    let width = canonical.width();
                    let height = canonical.height();

                    // La trame persistée reste non annotée; seule la copie publiée
                    // pour l'affichage reçoit la surimpression id + FPS (§4.F étape 6).
                    let persisted_pixels = canonical.clone().into_raw();
                    let mut display_canonical = canonical;
                    overlay::draw_camera_overlay(&mut display_canonical, &camera_id, mean_fps);
                    let display_pixels = display_canonical.into_raw();

                    let stable = estimator.is_stable_around(last_applied_ceiling);
                    if config.save_frames && stable {
                        let path = config.frame_path(&session, &camera_id, device_timestamp_ns);
                        let _ = save_frame_png(&path, width, height, channels, &persisted_pixels);
                    }

                    let frame = Frame {
                        pixels: display_pixels,
                        width,
                        height,
                        pixel_format_tag: raw.pixel_format,
                        device_timestamp_ns,
                        camera_id: camera_id.clone(),
                    };
                    latest_frames.publish(slot_index, frame);
                    counter!("heimdall_gige.frames.acquired", 1, "camera" => camera_id.clone());
                }
                Ok(None) => {
                    consecutive_failures += 1;
                    if consecutive_failures > config.consecutive_failure_threshold {
                        error!(
                            "camera {camera_id} exceeded {} consecutive grab failures, abandoning stream",
                            config.consecutive_failure_threshold
                        );
                        break;
                    }
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!("camera {camera_id} grab error: {err}");
                    if consecutive_failures > config.consecutive_failure_threshold {
                        error!(
                            "camera {camera_id} exceeded {} consecutive grab failures, abandoning stream",
                            config.consecutive_failure_threshold
                        );
                        break;
                    }
                }
            }
        }

        let _ = camera.stop_acquisition().await;
    });

    (camera_id, camera)
}

/// Moteur d'acquisition: possède la durée de vie des threads de capture et
/// de l'agrégateur pour une session.
pub struct AcquisitionEngine {
    config: SessionConfig,
}

impl AcquisitionEngine {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    /// Démarre une tâche de capture par caméra ouverte et bloque en
    /// agrégateur jusqu'à ce que toutes les tâches soient terminées
    /// (arrêt demandé via `stop_flag`, ou instabilité d'acquisition).
    ///
    /// Retire temporairement chaque caméra de `devices` (chaque thread en
    /// devient l'unique propriétaire) puis la restitue à la sortie, pour que
    /// l'appelant puisse fermer proprement via `DeviceManager::close_all`.
    pub fn run(
        &self,
        devices: &mut DeviceManager,
        session: &str,
        initial_fps_ceiling: f64,
        stop_flag: StopFlag,
        sink: Arc<dyn CompositeSink>,
    ) -> Result<(), GigEError> {
        let ids = devices.opened_ids();
        let n = ids.len();
        if n == 0 {
            return Ok(());
        }

        let latest_frames = Arc::new(LatestFrames::new(n));
        let fps_ceiling = Arc::new(FpsCeiling::new(
            initial_fps_ceiling,
            self.config.fps_lower_bound,
        ));
        let layout = composite_layout(n);

        let mut handles = Vec::with_capacity(n);
        for (index, id) in ids.iter().enumerate() {
            let camera = devices
                .take(id)
                .ok_or_else(|| GigEError::DeviceUnavailable(id.clone()))?;
            let camera_id = id.clone();
            let config = self.config.clone();
            let session = session.to_string();
            let task_stop_flag = stop_flag.clone();
            let task_latest_frames = Arc::clone(&latest_frames);
            let task_fps_ceiling = Arc::clone(&fps_ceiling);
            handles.push(thread::spawn(move || {
                run_grab_task(
                    camera_id,
                    index,
                    camera,
                    config,
                    session,
                    task_stop_flag,
                    task_latest_frames,
                    task_fps_ceiling,
                )
            }));
        }

        info!("acquisition engine started: {n} camera(s), layout {}x{}", layout.0, layout.1);

        while !handles.iter().all(|handle| handle.is_finished()) {
            let snapshot = latest_frames.snapshot();
            sink.publish(&snapshot, layout);
            thread::sleep(Duration::from_millis(50));
        }

        for handle in handles {
            match handle.join() {
                Ok((id, camera)) => devices.restore(id, camera),
                Err(_) => error!("a grab task panicked"),
            }
        }

        info!("acquisition engine stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heimdall_camera::PixelFormat;

    #[test]
    fn fps_estimator_mean_reflects_bounded_window() {
        let mut estimator = FpsEstimator::new(3);
        for sample in [10.0, 20.0, 30.0, 40.0] {
            estimator.push(sample);
        }
        // The first sample (10.0) should have rolled off the window.
        assert_eq!(estimator.mean(), 30.0);
    }

    #[test]
    fn fps_estimator_is_stable_only_within_one_hz() {
        let mut estimator = FpsEstimator::new(2);
        estimator.push(29.6);
        estimator.push(30.2);
        assert!(estimator.is_stable_around(30.0));
        assert!(!estimator.is_stable_around(40.0));
    }

    #[test]
    fn throttle_triggers_whether_measured_fps_drops_below_or_exceeds_ceiling() {
        // §8 scenario 4: fpsUpperBound = 10, measured mean drops to 8.4 —
        // below the ceiling, not above it — and the drop alone must still
        // trigger the 2% back-off.
        let last_applied_ceiling = 10.0;
        let mean_fps = 8.4;
        assert!((mean_fps - last_applied_ceiling).abs() > 1.0);

        let ceiling = FpsCeiling::new(last_applied_ceiling, 1.0);
        let throttled = ceiling.throttle();
        assert!((throttled - 9.8).abs() < 1e-9);

        let next = ceiling.throttle();
        assert!((next - 9.604).abs() < 1e-9);
    }

    #[test]
    fn fps_ceiling_never_increases_and_respects_floor() {
        let ceiling = FpsCeiling::new(30.0, 10.0);
        let first = ceiling.throttle();
        assert!(first < 30.0);
        let mut previous = first;
        for _ in 0..500 {
            let next = ceiling.throttle();
            assert!(next <= previous);
            previous = next;
        }
        assert!(previous >= 10.0);
    }

    #[test]
    fn composite_layout_matches_camera_count_bands() {
        assert_eq!(composite_layout(1), (1, 1));
        assert_eq!(composite_layout(2), (1, 2));
        assert_eq!(composite_layout(3), (2, 2));
        assert_eq!(composite_layout(4), (2, 2));
        assert_eq!(composite_layout(5), (2, 3));
        assert_eq!(composite_layout(6), (2, 3));
    }

    #[test]
    fn canonical_channels_distinguishes_mono_from_bgr() {
        let frame = heimdall_camera::CameraFrame {
            data: vec![0u8; 16],
            width: 4,
            height: 4,
            pixel_format: PixelFormat::Mono8,
            device_timestamp_ns: 0,
            frame_id: 0,
        };
        let canonical = heimdall_camera::format::decode(&frame);
        assert_eq!(canonical_channels(&canonical), 1);
    }

    #[test]
    fn logging_composite_sink_does_not_panic_on_empty_slots() {
        let sink = LoggingCompositeSink;
        sink.publish(&[None, None], (1, 2));
    }
}
