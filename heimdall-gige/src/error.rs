//! Gestion des erreurs pour le module GigE Vision
//!
//! Ce module définit les types d'erreurs spécifiques au module GigE Vision
//! et les stratégies de reprise associées.

use std::fmt;
use std::io;
use std::time::Duration;

use backoff::ExponentialBackoff;
use thiserror::Error;

/// Erreur du module GigE Vision
#[derive(Error, Debug)]
pub enum GigEError {
    /// Erreur d'initialisation
    #[error("Erreur d'initialisation: {0}")]
    InitError(String),
    
    /// Erreur de configuration
    #[error("Erreur de configuration: {0}")]
    ConfigError(String),
    
    /// Erreur d'acquisition
    #[error("Erreur d'acquisition: {0}")]
    AcquisitionError(String),
    
    /// Erreur de synchronisation
    #[error("Erreur de synchronisation: {0}")]
    SyncError(String),
    
    /// Erreur réseau
    #[error("Erreur réseau: {0}")]
    NetworkError(String),
    
    /// Erreur de périphérique
    #[error("Erreur de périphérique: {0}")]
    DeviceError(String),
    
    /// Erreur de timeout
    #[error("Timeout: {0}")]
    TimeoutError(String),
    
    /// Erreur de buffer
    #[error("Erreur de buffer: {0}")]
    BufferError(String),
    
    /// Erreur de conversion
    #[error("Erreur de conversion: {0}")]
    ConversionError(String),
    
    /// Erreur d'Aravis
    #[error("Erreur d'Aravis: {0}")]
    AravisError(String),

    /// Erreur d'entrée/sortie
    #[error("Erreur d'E/S: {0}")]
    IoError(#[from] io::Error),

    /// Erreur de sérialisation/désérialisation
    #[error("Erreur de sérialisation: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Aucun périphérique trouvé lors de l'énumération
    #[error("Aucune caméra trouvée sur le lien")]
    NoDevicesFound,

    /// Device indisponible (fermé, débranché, ou jamais ouvert)
    #[error("Caméra {0} indisponible")]
    DeviceUnavailable(String),

    /// Ni le nom moderne ni le nom legacy de la feature ne sont exposés par le device
    #[error("Feature '{feature}' non supportée par la caméra {camera}")]
    FeatureUnsupported { camera: String, feature: &'static str },

    /// Le cluster n'a pas convergé vers Synchronized dans le délai imparti
    #[error("Synchronisation PTP expirée après {0:?}: {1}")]
    PtpSyncTimeout(Duration, String),

    /// Trop d'échecs de capture consécutifs sur une caméra
    #[error("Instabilité d'acquisition sur la caméra {camera}: {consecutive_failures} échecs consécutifs")]
    GrabInstability { camera: String, consecutive_failures: u32 },

    /// Échec de persistance d'une trame ou d'un enregistrement CSV
    #[error("Erreur de persistance: {0}")]
    PersistenceError(String),

    /// Arrêt demandé par signal pendant une opération encore en cours
    #[error("Arrêt demandé")]
    ShutdownRequested,

    /// Erreur générique
    #[error("Erreur: {0}")]
    Other(String),
}

impl From<heimdall_camera::CameraError> for GigEError {
    fn from(err: heimdall_camera::CameraError) -> Self {
        match err {
            heimdall_camera::CameraError::InitError(msg) => GigEError::InitError(msg),
            heimdall_camera::CameraError::ConfigError(msg) => GigEError::ConfigError(msg),
            heimdall_camera::CameraError::AcquisitionError(msg) => GigEError::AcquisitionError(msg),
            heimdall_camera::CameraError::NotFound(msg) => GigEError::DeviceError(msg),
            heimdall_camera::CameraError::ConversionError(msg) => GigEError::ConversionError(msg),
            heimdall_camera::CameraError::AravisError(msg) => GigEError::AravisError(msg),
            heimdall_camera::CameraError::DeviceUnavailable(msg) => GigEError::DeviceUnavailable(msg),
            heimdall_camera::CameraError::FeatureUnsupported { camera, feature, .. } => {
                GigEError::FeatureUnsupported { camera, feature }
            }
        }
    }
}

impl From<anyhow::Error> for GigEError {
    fn from(err: anyhow::Error) -> Self {
        GigEError::Other(err.to_string())
    }
}

/// Catégorie d'erreur
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Erreur temporaire qui peut être résolue par une nouvelle tentative
    Transient,
    
    /// Erreur permanente qui nécessite une intervention
    Permanent,
    
    /// Erreur fatale qui nécessite un redémarrage du système
    Fatal,
}

/// Stratégie de reprise
#[derive(Debug, Clone)]
pub struct RecoveryStrategy {
    /// Catégorie d'erreur
    pub category: ErrorCategory,
    
    /// Nombre de tentatives
    pub retry_count: u32,
    
    /// Délai entre les tentatives
    pub retry_delay: Duration,
    
    /// Action de reprise
    pub action: RecoveryAction,
}

/// Action de reprise
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// Réessayer l'opération
    Retry,
    
    /// Réinitialiser le périphérique
    ResetDevice,
    
    /// Réinitialiser la connexion
    ResetConnection,
    
    /// Redémarrer le système
    RestartSystem,
    
    /// Action personnalisée
    Custom(String),
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Retry => write!(f, "Réessayer l'opération"),
            RecoveryAction::ResetDevice => write!(f, "Réinitialiser le périphérique"),
            RecoveryAction::ResetConnection => write!(f, "Réinitialiser la connexion"),
            RecoveryAction::RestartSystem => write!(f, "Redémarrer le système"),
            RecoveryAction::Custom(action) => write!(f, "Action personnalisée: {}", action),
        }
    }
}

/// Détermine la stratégie de reprise pour une erreur donnée
pub fn determine_recovery_strategy(error: &GigEError) -> RecoveryStrategy {
    match error {
        GigEError::NetworkError(_) => RecoveryStrategy {
            category: ErrorCategory::Transient,
            retry_count: 5,
            retry_delay: Duration::from_millis(100),
            action: RecoveryAction::Retry,
        },
        
        GigEError::TimeoutError(_) => RecoveryStrategy {
            category: ErrorCategory::Transient,
            retry_count: 3,
            retry_delay: Duration::from_millis(200),
            action: RecoveryAction::Retry,
        },
        
        GigEError::AcquisitionError(_) => RecoveryStrategy {
            category: ErrorCategory::Transient,
            retry_count: 3,
            retry_delay: Duration::from_millis(50),
            action: RecoveryAction::Retry,
        },
        
        GigEError::DeviceError(_) => RecoveryStrategy {
            category: ErrorCategory::Permanent,
            retry_count: 1,
            retry_delay: Duration::from_secs(1),
            action: RecoveryAction::ResetDevice,
        },
        
        GigEError::BufferError(_) => RecoveryStrategy {
            category: ErrorCategory::Transient,
            retry_count: 2,
            retry_delay: Duration::from_millis(50),
            action: RecoveryAction::Retry,
        },
        
        GigEError::AravisError(_) => RecoveryStrategy {
            category: ErrorCategory::Permanent,
            retry_count: 1,
            retry_delay: Duration::from_secs(1),
            action: RecoveryAction::ResetConnection,
        },
        
        GigEError::InitError(_) | GigEError::ConfigError(_) => RecoveryStrategy {
            category: ErrorCategory::Permanent,
            retry_count: 0,
            retry_delay: Duration::from_secs(0),
            action: RecoveryAction::RestartSystem,
        },

        GigEError::NoDevicesFound | GigEError::PtpSyncTimeout(_, _) => RecoveryStrategy {
            category: ErrorCategory::Fatal,
            retry_count: 0,
            retry_delay: Duration::from_secs(0),
            action: RecoveryAction::RestartSystem,
        },

        GigEError::DeviceUnavailable(_) => RecoveryStrategy {
            category: ErrorCategory::Permanent,
            retry_count: 1,
            retry_delay: Duration::from_secs(1),
            action: RecoveryAction::ResetDevice,
        },

        GigEError::GrabInstability { .. } => RecoveryStrategy {
            category: ErrorCategory::Permanent,
            retry_count: 0,
            retry_delay: Duration::from_secs(0),
            action: RecoveryAction::ResetDevice,
        },

        GigEError::FeatureUnsupported { .. } | GigEError::ShutdownRequested => RecoveryStrategy {
            category: ErrorCategory::Fatal,
            retry_count: 0,
            retry_delay: Duration::from_secs(0),
            action: RecoveryAction::Custom("Aucune reprise possible".to_string()),
        },

        GigEError::PersistenceError(_) => RecoveryStrategy {
            category: ErrorCategory::Transient,
            retry_count: 1,
            retry_delay: Duration::from_millis(200),
            action: RecoveryAction::Retry,
        },

        _ => RecoveryStrategy {
            category: ErrorCategory::Permanent,
            retry_count: 1,
            retry_delay: Duration::from_secs(1),
            action: RecoveryAction::Custom("Vérifier la configuration et les connexions".to_string()),
        },
    }
}

/// Exécute une opération avec une stratégie de reprise.
///
/// La première erreur classe la stratégie (catégorie, nombre de tentatives,
/// délai de base); les tentatives suivantes sont ensuite pilotées par
/// `backoff::future::retry` avec un `ExponentialBackoff` borné par cette
/// stratégie, de la même manière que la boucle d'acquisition du code source
/// le fait pour chaque caméra individuellement.
pub async fn with_recovery<F, T, E, Fut>(
    mut operation: F,
    error_mapper: impl Fn(E) -> GigEError,
) -> Result<T, GigEError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    let first_error = match operation().await {
        Ok(result) => return Ok(result),
        Err(err) => error_mapper(err),
    };
    let strategy = determine_recovery_strategy(&first_error);
    if strategy.retry_count == 0 {
        return Err(first_error);
    }

    log::warn!(
        "Erreur lors de l'opération: {}. Stratégie: {}. {} nouvelle(s) tentative(s) prévue(s).",
        first_error,
        strategy.action,
        strategy.retry_count
    );

    let backoff = ExponentialBackoff {
        initial_interval: strategy.retry_delay,
        max_elapsed_time: Some(strategy.retry_delay * (strategy.retry_count + 1)),
        ..Default::default()
    };

    let attempts_left = std::sync::atomic::AtomicU32::new(strategy.retry_count);
    backoff::future::retry(backoff, || {
        let error_mapper = &error_mapper;
        let attempts_left = &attempts_left;
        let operation = &mut operation;
        async move {
            operation().await.map_err(|err| {
                let gige_error = error_mapper(err);
                if attempts_left.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) > 1 {
                    backoff::Error::transient(gige_error)
                } else {
                    backoff::Error::permanent(gige_error)
                }
            })
        }
    })
    .await
    .map_err(|err| match err {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_error_categories() {
        let network_error = GigEError::NetworkError("Connexion perdue".to_string());
        let strategy = determine_recovery_strategy(&network_error);
        assert_eq!(strategy.category, ErrorCategory::Transient);
        
        let init_error = GigEError::InitError("Échec d'initialisation".to_string());
        let strategy = determine_recovery_strategy(&init_error);
        assert_eq!(strategy.category, ErrorCategory::Permanent);
    }
    
    #[tokio::test]
    async fn test_with_recovery_success() {
        let result = with_recovery(
            || async { Ok::<_, &str>(42) },
            |e| GigEError::Other(e.to_string()),
        ).await;
        
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), 42);
    }
    
    #[tokio::test]
    async fn test_with_recovery_failure() {
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result = with_recovery(
            || async {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Err::<i32, _>("Erreur de test")
            },
            |e| GigEError::NetworkError(e.to_string()),
        ).await;

        assert!(result.is_err());
        assert!(attempts.load(std::sync::atomic::Ordering::SeqCst) > 1); // Devrait avoir fait plusieurs tentatives
    }
}