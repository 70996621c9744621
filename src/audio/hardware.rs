//! Audio-Hardware als austauschbare Capability
//!
//! Der Controller spricht die Geräte-Audio-API nur über diesen Trait an.
//! Benachrichtigungen der Hardware kommen als `HardwareEvent` zurück.

use super::state::{
    AudioConfiguration, AudioRoute, DeviceOrientation, OutputPort, RouteChangeReason,
};
use crate::store::StoreError;
use async_trait::async_trait;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("Activation failed: {0}")]
    Activation(String),

    #[error("Configuration rejected: {0}")]
    Configuration(String),

    #[error("Output override failed: {0}")]
    OutputOverride(String),

    #[error("Stereo routing failed: {0}")]
    Stereo(String),

    #[error("Audio unit error: {0}")]
    AudioUnit(String),
}

impl From<HardwareError> for StoreError {
    fn from(e: HardwareError) -> Self {
        StoreError::ReducerFailed(e.to_string())
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Benachrichtigungen der Audio-Hardware
#[derive(Debug, Clone, PartialEq)]
pub enum HardwareEvent {
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
    RouteChanged {
        reason: RouteChangeReason,
        previous: AudioRoute,
        current: AudioRoute,
    },
    MediaServicesLost,
    MediaServicesReset,
    RecordPermissionChanged { granted: bool },
}

/// Benachrichtigungen des Telefonie-Stacks des Betriebssystems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelephonyEvent {
    Activated,
    Deactivated,
}

/// Zustand der Hardware beim Erstellen des Controllers
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HardwareSnapshot {
    pub configuration: AudioConfiguration,
    pub route: AudioRoute,
    pub has_recording_permission: bool,
}

// ============================================================================
// CAPABILITY
// ============================================================================

#[async_trait]
pub trait AudioHardware: Send + Sync {
    fn snapshot(&self) -> HardwareSnapshot;

    fn set_active(&self, active: bool) -> Result<(), HardwareError>;

    fn set_configuration(&self, configuration: &AudioConfiguration) -> Result<(), HardwareError>;

    fn override_output_port(&self, port: OutputPort) -> Result<(), HardwareError>;

    /// Startet/stoppt die Audio-Verarbeitung (Audio Units)
    fn set_audio_enabled(&self, enabled: bool) -> Result<(), HardwareError>;

    fn set_use_manual_audio(&self, enabled: bool) -> Result<(), HardwareError>;

    fn set_prefers_no_interruptions(&self, enabled: bool) -> Result<(), HardwareError>;

    /// Wählt die Stereo-Datenquelle des eingebauten Mikrofons passend zur Ausrichtung
    fn set_stereo_input(&self, orientation: DeviceOrientation) -> Result<(), HardwareError>;

    fn restore_default_input(&self) -> Result<(), HardwareError>;

    /// Fragt die Aufnahmeberechtigung beim Nutzer an
    async fn request_record_permission(&self) -> bool;
}
