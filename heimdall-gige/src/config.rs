//! Configuration de session pour le système GigE Vision
//!
//! Valeur unique chargée une fois au démarrage (fichier + environnement +
//! recouvrement CLI) et propagée à chaque contrôleur, en remplacement de
//! l'état global ad hoc.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration d'une session d'acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Taille de paquet réseau choisie par l'opérateur (en octets, multiple de 4).
    pub packet_size_b: u32,

    /// Marge de tampon appliquée au délai inter-paquet, en pourcentage ∈ [10, 30].
    pub buffer_percent: f64,

    /// Seuil de convergence PTP (offset maximal toléré), en nanosecondes.
    pub ptp_offset_threshold_ns: i64,

    /// Période de scrutation du contrôleur PTP, en millisecondes.
    pub poll_interval_ms: u64,

    /// Délai maximal d'attente des rôles PTP avant `Failed`, en millisecondes.
    pub monitor_ptp_status_timeout_ms: u64,

    /// Nombre de scrutations consécutives requises pour déclarer la convergence.
    pub ptp_max_check: u32,

    /// Délai de capture d'une trame avant timeout, en millisecondes.
    pub grab_timeout_ms: u64,

    /// Plancher de la cadence dynamique, en images par seconde.
    pub fps_lower_bound: f64,

    /// Répertoire racine de sortie (CSV, trames persistées).
    pub output_dir: PathBuf,

    /// Largeur d'affichage de la vue composite.
    pub display_width: u32,

    /// Hauteur d'affichage de la vue composite.
    pub display_height: u32,

    /// Nombre d'échecs de capture consécutifs tolérés avant abandon d'une caméra.
    pub consecutive_failure_threshold: u32,

    /// Taille de l'anneau d'échantillons d'offset PTP conservés par caméra.
    pub ring_buffer_size: usize,

    /// Si vrai, persiste les trames canoniques sur disque.
    pub save_frames: bool,

    /// Port d'exportation Prometheus, si activé.
    pub metrics_port: Option<u16>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            packet_size_b: 8228,
            buffer_percent: 15.0,
            ptp_offset_threshold_ns: 1_000,
            poll_interval_ms: 2_000,
            monitor_ptp_status_timeout_ms: 60_000,
            ptp_max_check: 3,
            grab_timeout_ms: 5_000,
            fps_lower_bound: 1.0,
            output_dir: PathBuf::from("./output"),
            display_width: 640,
            display_height: 480,
            consecutive_failure_threshold: 10,
            ring_buffer_size: 20,
            save_frames: true,
            metrics_port: None,
        }
    }
}

impl SessionConfig {
    /// Charge la configuration depuis un fichier optionnel, l'environnement
    /// (préfixe `HEIMDALL_`), puis reçoit les recouvrements CLI via `apply_cli_overrides`.
    ///
    /// L'ordre de priorité, du plus faible au plus fort: défauts < fichier < environnement.
    /// Les recouvrements CLI sont appliqués séparément après coup, par le binaire appelant.
    pub fn load(file_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = file_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("HEIMDALL").separator("__"));

        // Missing keys fall back to `Default::default()` via `#[serde(default)]`.
        builder.build()?.try_deserialize()
    }

    pub fn session_dir(&self, session: &str) -> PathBuf {
        self.output_dir.join("recordings").join(session)
    }

    pub fn bandwidth_csv_path(&self, session: &str) -> PathBuf {
        self.output_dir
            .join("bandwidth")
            .join(format!("bandwidth_delays_{session}.csv"))
    }

    pub fn offset_csv_path(&self, session: &str) -> PathBuf {
        self.output_dir
            .join("offset")
            .join(format!("ptp_offset_history_{session}.csv"))
    }

    pub fn frame_path(&self, session: &str, camera_id: &str, device_timestamp_ns: u64) -> PathBuf {
        self.session_dir(session)
            .join(format!("{camera_id}_{session}"))
            .join(format!("frame_{device_timestamp_ns}.png"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_constants() {
        let config = SessionConfig::default();
        assert_eq!(config.packet_size_b, 8228);
        assert_eq!(config.ptp_max_check, 3);
        assert_eq!(config.ring_buffer_size, 20);
        assert!(config.save_frames);
    }

    #[test]
    fn paths_are_namespaced_by_session_and_camera() {
        let config = SessionConfig::default();
        let path = config.frame_path("20260727_120000", "CAM_A", 42);
        assert_eq!(
            path,
            PathBuf::from("./output/recordings/20260727_120000/CAM_A_20260727_120000/frame_42.png")
        );
    }

    #[test]
    fn load_without_file_falls_back_to_defaults() {
        let config = SessionConfig::load(None).unwrap();
        assert_eq!(config.packet_size_b, 8228);
    }
}
