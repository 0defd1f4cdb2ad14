//! Registre de producteurs: énumère les caméras joignables sur le lien,
//! dédupliquées par numéro de série, indépendamment du chemin producteur
//! par lequel elles ont été vues.

use std::collections::HashMap;

use heimdall_camera::{aravis, CameraIdentity};
use log::{info, warn};

use crate::error::GigEError;

/// Vue stable des caméras actuellement joignables.
#[derive(Debug, Default)]
pub struct ProducerRegistry {
    devices: HashMap<String, CameraIdentity>,
}

impl ProducerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ouvre chaque chemin producteur, énumère ses devices, et déduplique par
    /// `serial_number`. Un producteur défaillant est journalisé et ignoré:
    /// une seule source en panne ne doit pas interrompre l'énumération des autres.
    pub fn enumerate(&mut self) -> Result<(), GigEError> {
        let discovered = aravis::discover();
        if discovered.is_empty() {
            warn!("producer enumeration returned no devices");
        }
        self.devices.clear();
        for identity in discovered {
            if self.devices.contains_key(&identity.serial_number) {
                continue;
            }
            info!(
                "discovered camera {} (serial {})",
                identity.id, identity.serial_number
            );
            self.devices.insert(identity.serial_number.clone(), identity);
        }
        Ok(())
    }

    pub fn available(&self) -> Vec<CameraIdentity> {
        self.devices.values().cloned().collect()
    }

    pub fn resolve(&self, id: &str) -> Option<CameraIdentity> {
        self.devices.values().find(|d| d.id == id).cloned()
    }

    pub fn resolve_by_serial(&self, serial_number: &str) -> Option<CameraIdentity> {
        self.devices.get(serial_number).cloned()
    }

    /// Libère l'état du registre; aucun handle de device ne doit survivre à cet appel.
    pub fn shutdown(&mut self) {
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_twice_yields_identical_sets() {
        let mut registry = ProducerRegistry::new();
        registry.enumerate().unwrap();
        let first: Vec<_> = {
            let mut s: Vec<_> = registry.available().into_iter().map(|d| d.serial_number).collect();
            s.sort();
            s
        };
        registry.enumerate().unwrap();
        let second: Vec<_> = {
            let mut s: Vec<_> = registry.available().into_iter().map(|d| d.serial_number).collect();
            s.sort();
            s
        };
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_by_serial_finds_known_device() {
        let mut registry = ProducerRegistry::new();
        registry.enumerate().unwrap();
        let any = registry.available().first().unwrap().clone();
        let resolved = registry.resolve_by_serial(&any.serial_number).unwrap();
        assert_eq!(resolved.id, any.id);
    }

    #[test]
    fn shutdown_clears_available_devices() {
        let mut registry = ProducerRegistry::new();
        registry.enumerate().unwrap();
        assert!(!registry.available().is_empty());
        registry.shutdown();
        assert!(registry.available().is_empty());
    }
}
