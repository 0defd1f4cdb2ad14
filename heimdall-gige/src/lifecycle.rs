//! Signal et cycle de vie: installe le gestionnaire d'interruption et
//! porte le drapeau d'arrêt partagé par lequel toutes les boucles longues
//! sont annulées.
//!
//! Le seul état véritablement global du système: toutes les autres valeurs
//! process-wide (horodatage de session, plafond de cadence) transitent par
//! `SessionConfig`/`BandwidthPlan` explicitement passés aux contrôleurs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use crate::error::GigEError;

/// Drapeau d'arrêt partagé, construit une fois par session et cloné (par
/// `Arc`) vers chaque tâche longue: boucles de capture, agrégateur,
/// journal d'offset PTP.
#[derive(Debug, Clone)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Installe le gestionnaire `ctrlc`; SIGINT/SIGTERM arme le drapeau partagé.
///
/// N'installe qu'un seul gestionnaire par processus: un second appel
/// renverrait une erreur d'Aravis/ctrlc, donc le binaire appelant ne doit le
/// faire qu'une fois par lancement.
pub fn install_interrupt_handler(stop_flag: StopFlag) -> Result<(), GigEError> {
    ctrlc::set_handler(move || {
        info!("interrupt received, signaling shutdown");
        stop_flag.stop();
    })
    .map_err(|err| GigEError::Other(format!("failed to install interrupt handler: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_starts_unset_and_latches_once_stopped() {
        let flag = StopFlag::new();
        assert!(!flag.is_stopped());
        flag.stop();
        assert!(flag.is_stopped());
    }

    #[test]
    fn clones_observe_the_same_underlying_flag() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        clone.stop();
        assert!(flag.is_stopped());
    }
}
