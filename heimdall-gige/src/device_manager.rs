//! Gestionnaire de devices: suit les caméras disponibles et ouvertes, et
//! fournit les opérations en éventail appliquées à toutes les caméras ouvertes.

use std::collections::HashMap;

use heimdall_camera::{Camera, CameraIdentity, PixelFormat};
use log::warn;

use crate::error::GigEError;
use crate::registry::ProducerRegistry;

/// Caméras disponibles (issues du registre) et caméras actuellement ouvertes.
pub struct DeviceManager {
    registry: ProducerRegistry,
    opened: HashMap<String, Box<dyn Camera>>,
}

impl DeviceManager {
    pub fn new(registry: ProducerRegistry) -> Self {
        Self {
            registry,
            opened: HashMap::new(),
        }
    }

    pub fn refresh_available(&mut self) -> Result<(), GigEError> {
        self.registry.enumerate()
    }

    pub fn available(&self) -> Vec<CameraIdentity> {
        self.registry.available()
    }

    pub fn opened_ids(&self) -> Vec<String> {
        self.opened.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.opened.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opened.is_empty()
    }

    /// Ouvre chaque id demandé. Un échec de construction pour un id donné est
    /// journalisé et l'id ignoré; les autres ouvertures continuent.
    pub async fn open(&mut self, ids: &[String]) -> Vec<String> {
        let mut opened_ids = Vec::new();
        for id in ids {
            if self.opened.contains_key(id) {
                opened_ids.push(id.clone());
                continue;
            }
            let identity = match self.registry.resolve(id) {
                Some(identity) => identity,
                None => {
                    warn!("camera {id} not found in producer registry, skipping");
                    continue;
                }
            };
            let mut camera = heimdall_camera::aravis::AravisCamera::new(identity);
            match camera.open().await {
                Ok(()) => {
                    self.opened.insert(id.clone(), Box::new(camera));
                    opened_ids.push(id.clone());
                }
                Err(err) => {
                    warn!("failed to open camera {id}: {err}");
                }
            }
        }
        opened_ids
    }

    pub async fn close(&mut self, id: &str) -> Result<(), GigEError> {
        if let Some(mut camera) = self.opened.remove(id) {
            camera.close().await?;
        }
        Ok(())
    }

    pub async fn close_all(&mut self) -> Result<(), GigEError> {
        let ids: Vec<String> = self.opened.keys().cloned().collect();
        for id in ids {
            self.close(&id).await?;
        }
        Ok(())
    }

    pub fn camera_mut(&mut self, id: &str) -> Option<&mut Box<dyn Camera>> {
        self.opened.get_mut(id)
    }

    /// Retire temporairement une caméra du jeu `opened`, en transférant sa
    /// propriété à l'appelant (le moteur d'acquisition, qui en donne chacune
    /// à sa propre tâche de capture). `restore` la replace une fois la
    /// tâche terminée, avant la fermeture finale par `close_all`.
    pub fn take(&mut self, id: &str) -> Option<Box<dyn Camera>> {
        self.opened.remove(id)
    }

    pub fn restore(&mut self, id: String, camera: Box<dyn Camera>) {
        self.opened.insert(id, camera);
    }

    pub fn cameras_mut(&mut self) -> impl Iterator<Item = (&String, &mut Box<dyn Camera>)> {
        self.opened.iter_mut()
    }

    pub fn cameras(&self) -> impl Iterator<Item = (&String, &Box<dyn Camera>)> {
        self.opened.iter()
    }

    /// Applique `setPixelFormat` à toutes les caméras ouvertes; agrège les erreurs
    /// par id plutôt que d'interrompre l'opération au premier échec.
    pub async fn set_pixel_format_all(&mut self, format: PixelFormat) -> Vec<(String, GigEError)> {
        let mut errors = Vec::new();
        for (id, camera) in self.opened.iter_mut() {
            if let Err(err) = camera.set_pixel_format(format).await {
                errors.push((id.clone(), GigEError::from(err)));
            }
        }
        errors
    }

    pub async fn set_exposure_time_all(&mut self, exposure_micros: f64) -> Vec<(String, GigEError)> {
        let mut errors = Vec::new();
        for (id, camera) in self.opened.iter_mut() {
            if let Err(err) = camera.set_exposure_micros(exposure_micros).await {
                errors.push((id.clone(), GigEError::from(err)));
            }
        }
        errors
    }

    pub async fn set_gain_all(&mut self, gain_db: f64) -> Vec<(String, GigEError)> {
        let mut errors = Vec::new();
        for (id, camera) in self.opened.iter_mut() {
            if let Err(err) = camera.set_gain(gain_db).await {
                errors.push((id.clone(), GigEError::from(err)));
            }
        }
        errors
    }

    pub async fn set_width_all(&mut self, width: u32) -> Vec<(String, GigEError)> {
        let mut errors = Vec::new();
        for (id, camera) in self.opened.iter_mut() {
            if let Err(err) = camera.set_width(width).await {
                errors.push((id.clone(), GigEError::from(err)));
            }
        }
        errors
    }

    pub async fn set_height_all(&mut self, height: u32) -> Vec<(String, GigEError)> {
        let mut errors = Vec::new();
        for (id, camera) in self.opened.iter_mut() {
            if let Err(err) = camera.set_height(height).await {
                errors.push((id.clone(), GigEError::from(err)));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager_with_two_open() -> DeviceManager {
        let mut registry = ProducerRegistry::new();
        registry.enumerate().unwrap();
        let mut manager = DeviceManager::new(registry);
        let ids: Vec<String> = manager.available().into_iter().take(2).map(|d| d.id).collect();
        manager.open(&ids).await;
        manager
    }

    #[tokio::test]
    async fn open_skips_unknown_ids_without_failing_others() {
        let mut registry = ProducerRegistry::new();
        registry.enumerate().unwrap();
        let known = registry.available().first().unwrap().id.clone();
        let mut manager = DeviceManager::new(registry);
        let opened = manager.open(&[known.clone(), "gev://nonexistent".to_string()]).await;
        assert_eq!(opened, vec![known]);
    }

    #[tokio::test]
    async fn opened_never_contains_duplicates() {
        let mut manager = manager_with_two_open().await;
        let before = manager.len();
        let ids = manager.opened_ids();
        manager.open(&ids).await;
        assert_eq!(manager.len(), before);
    }

    #[tokio::test]
    async fn close_all_empties_opened_set() {
        let mut manager = manager_with_two_open().await;
        assert!(!manager.is_empty());
        manager.close_all().await.unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn fan_out_setter_applies_to_every_opened_camera() {
        let mut manager = manager_with_two_open().await;
        let errors = manager.set_exposure_time_all(20_000.0).await;
        assert!(errors.is_empty());
        for (_, camera) in manager.cameras() {
            assert_eq!(camera.config().exposure_micros, 20_000.0);
        }
    }
}
