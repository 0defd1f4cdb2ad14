//! Ordonnanceur de bande passante: calcule le délai inter-paquet `Dp` et le
//! décalage de transmission par caméra `Dt(i)` pour qu'un ensemble de
//! caméras partageant un même lien n'entrent pas en collision sur le câble,
//! puis en dérive un plafond de cadence atteignable.

use log::info;

use heimdall_camera::PixelFormat;

use crate::config::SessionConfig;
use crate::device_manager::DeviceManager;
use crate::error::GigEError;

/// Délais calculés pour une caméra, dans l'ordre d'ouverture.
#[derive(Debug, Clone, Copy)]
pub struct CameraDelays {
    pub camera_index: usize,
    pub packet_delay_ns: i64,
    pub transmission_delay_ns: i64,
}

/// Résultat complet d'une exécution de l'ordonnanceur.
#[derive(Debug, Clone)]
pub struct BandwidthPlan {
    pub per_camera: Vec<(String, CameraDelays)>,
    pub fps_ceiling: f64,
}

/// Arrondit `value` au multiple de 8 supérieur ou égal; les valeurs
/// négatives ou nulles n'ont pas de délai à appliquer.
fn round_up_to_multiple_of_8(value: f64) -> i64 {
    if value <= 0.0 {
        return 0;
    }
    let whole = value.ceil() as i64;
    ((whole + 7) / 8) * 8
}

/// `Dp`, en nanosecondes, pour `n` caméras partageant le lien.
///
/// `N = 1` n'a pas de contention à éviter: `Dp = 0`.
pub fn packet_delay_ns(n: usize, packet_size_b: u32, link_speed_bps: i64, buffer_percent: f64) -> i64 {
    if n <= 1 || link_speed_bps <= 0 {
        return 0;
    }
    let per_packet_time_ns = packet_size_b as f64 * 1e9 / link_speed_bps as f64;
    let buffer_ns = per_packet_time_ns * buffer_percent / 100.0;
    let dp = (per_packet_time_ns + buffer_ns) * (n - 1) as f64;
    round_up_to_multiple_of_8(dp)
}

/// `Dt(i) = Dp * (N - 1 - i)`, arrondi au multiple de 8 supérieur.
pub fn transmission_delay_ns(packet_delay_ns: i64, n: usize, index: usize) -> i64 {
    if n == 0 {
        return 0;
    }
    let slots_remaining = (n - 1).saturating_sub(index) as i64;
    round_up_to_multiple_of_8((packet_delay_ns * slots_remaining) as f64)
}

/// Plafond de cadence atteignable compte tenu de `Dp` et de la charge utile
/// d'une trame, pour un lien à `link_speed_bps` bit/s.
pub fn fps_ceiling(
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    packet_size_b: u32,
    link_speed_bps: i64,
    dp_ns: i64,
) -> f64 {
    if link_speed_bps <= 0 || packet_size_b == 0 {
        return 0.0;
    }
    let raw_frame_bytes = width as f64 * height as f64 * pixel_format.bits_per_pixel() as f64 / 8.0;
    let packets_per_frame = (raw_frame_bytes / packet_size_b as f64).ceil();
    let frame_transmission_cycle =
        raw_frame_bytes / (link_speed_bps as f64 / 8.0) + packets_per_frame * dp_ns as f64 * 1e-9;
    if frame_transmission_cycle <= 0.0 {
        return 0.0;
    }
    (1.0 / frame_transmission_cycle).floor()
}

/// Calcule et écrit les délais de bande passante sur chaque caméra ouverte.
///
/// Le débit de lien retenu est le minimum rapporté par les caméras
/// (un lien partagé ne peut pas dépasser son maillon le plus lent); en cas
/// de débit nul (PTP jamais activé), la bande passante se dégrade à
/// `Dp = Dt = 0` plutôt que d'échouer la session.
pub async fn run(devices: &mut DeviceManager, config: &SessionConfig) -> Result<BandwidthPlan, GigEError> {
    let ids = devices.opened_ids();
    let n = ids.len();

    let mut link_speed_bps = i64::MAX;
    for id in &ids {
        if let Some(camera) = devices.camera_mut(id) {
            let params = camera.network_parameters();
            if params.link_speed_bps > 0 {
                link_speed_bps = link_speed_bps.min(params.link_speed_bps);
            }
        }
    }
    if link_speed_bps == i64::MAX {
        link_speed_bps = 0;
    }

    let dp = packet_delay_ns(n, config.packet_size_b, link_speed_bps, config.buffer_percent);

    let mut per_camera = Vec::with_capacity(n);
    let mut width = 0u32;
    let mut height = 0u32;
    let mut pixel_format = PixelFormat::Mono8;

    for (index, id) in ids.iter().enumerate() {
        let dt = transmission_delay_ns(dp, n, index);
        if let Some(camera) = devices.camera_mut(id) {
            camera.write_bandwidth(dp, dt, config.packet_size_b).await?;
            let cfg = camera.config();
            width = cfg.width;
            height = cfg.height;
            pixel_format = cfg.pixel_format;
        }
        per_camera.push((
            id.clone(),
            CameraDelays {
                camera_index: index,
                packet_delay_ns: dp,
                transmission_delay_ns: dt,
            },
        ));
    }

    let ceiling = if n == 0 {
        0.0
    } else {
        fps_ceiling(width, height, pixel_format, config.packet_size_b, link_speed_bps, dp)
    };

    info!(
        "bandwidth scheduler: n={n} Dp={dp}ns link_speed={link_speed_bps}bps fps_ceiling={ceiling}"
    );

    Ok(BandwidthPlan {
        per_camera,
        fps_ceiling: ceiling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_camera_happy_path_matches_worked_example() {
        let dp = packet_delay_ns(2, 8_228, 125_000_000, 15.0);
        assert_eq!(dp, 75_704);
        assert_eq!(transmission_delay_ns(dp, 2, 0), 75_704);
        assert_eq!(transmission_delay_ns(dp, 2, 1), 0);
    }

    #[test]
    fn single_camera_has_zero_delays() {
        assert_eq!(packet_delay_ns(1, 8_228, 125_000_000, 15.0), 0);
        assert_eq!(transmission_delay_ns(0, 1, 0), 0);
    }

    #[test]
    fn delays_are_always_multiples_of_8() {
        let dp = packet_delay_ns(5, 1_500, 1_000_000_000, 22.5);
        assert_eq!(dp % 8, 0);
        for i in 0..5 {
            assert_eq!(transmission_delay_ns(dp, 5, i) % 8, 0);
        }
    }

    #[test]
    fn transmission_delay_decreases_with_camera_index() {
        let dp = packet_delay_ns(4, 8_228, 125_000_000, 15.0);
        let delays: Vec<i64> = (0..4).map(|i| transmission_delay_ns(dp, 4, i)).collect();
        for window in delays.windows(2) {
            assert!(window[0] >= window[1]);
        }
        assert_eq!(delays[3], 0);
    }

    #[test]
    fn fps_ceiling_is_positive_for_a_reasonable_link() {
        let dp = packet_delay_ns(2, 8_228, 125_000_000, 15.0);
        let ceiling = fps_ceiling(1920, 1080, PixelFormat::Mono8, 8_228, 125_000_000, dp);
        assert!(ceiling > 0.0);
    }

    #[test]
    fn zero_link_speed_degrades_to_zero_rather_than_panicking() {
        assert_eq!(packet_delay_ns(3, 1_500, 0, 15.0), 0);
        assert_eq!(fps_ceiling(640, 480, PixelFormat::Mono8, 1_500, 0, 0), 0.0);
    }
}
