//! Actions des Audio Session Stores

use super::hardware::{HardwareEvent, TelephonyEvent};
use super::state::{
    AudioCategory, AudioConfiguration, AudioMode, AudioRoute, CategoryOptions, DeviceOrientation,
    OutputPort, RouteChangeReason,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioAction {
    /// Aktiviert/deaktiviert die Session auf der Hardware
    SetActive { value: bool },
    /// Gewünschte Aktivität des Aufrufers
    SetShouldBeActive { value: bool },
    SetAudioEnabled { value: bool },
    SetUseManualAudio { value: bool },
    SetPrefersNoInterruptions { value: bool },
    SetCategory {
        category: AudioCategory,
        mode: AudioMode,
        options: CategoryOptions,
    },
    SetOverrideOutputPort { port: OutputPort },
    /// Erzwingt das erneute Setzen der letzten Konfiguration
    ReapplyConfiguration,

    // Interruptions
    SetInterrupted { value: bool },
    InterruptionEnded { should_resume: bool },

    // Recording
    SetHasRecordingPermission { value: bool },
    SetShouldRecord { value: bool },

    RouteChanged {
        reason: RouteChangeReason,
        previous: AudioRoute,
        current: AudioRoute,
    },

    // Stereo
    SetStereoPreferred { value: bool },
    SetStereoEnabled { value: bool },
    SetOrientation { orientation: DeviceOrientation },

    // Telephony
    SetTelephonyManaged { value: bool },
    TelephonyActivated,
    TelephonyDeactivated,

    MediaServicesLost,
    MediaServicesReset,

    /// Startet die skriptgesteuerte Wiederherstellung (nach Debounce)
    RestartSession,
}

impl AudioAction {
    pub fn set_configuration(configuration: AudioConfiguration) -> Self {
        AudioAction::SetCategory {
            category: configuration.category,
            mode: configuration.mode,
            options: configuration.options,
        }
    }
}

impl From<HardwareEvent> for AudioAction {
    fn from(event: HardwareEvent) -> Self {
        match event {
            HardwareEvent::InterruptionBegan => AudioAction::SetInterrupted { value: true },
            HardwareEvent::InterruptionEnded { should_resume } => {
                AudioAction::InterruptionEnded { should_resume }
            }
            HardwareEvent::RouteChanged {
                reason,
                previous,
                current,
            } => AudioAction::RouteChanged {
                reason,
                previous,
                current,
            },
            HardwareEvent::MediaServicesLost => AudioAction::MediaServicesLost,
            HardwareEvent::MediaServicesReset => AudioAction::MediaServicesReset,
            HardwareEvent::RecordPermissionChanged { granted } => {
                AudioAction::SetHasRecordingPermission { value: granted }
            }
        }
    }
}

impl From<TelephonyEvent> for AudioAction {
    fn from(event: TelephonyEvent) -> Self {
        match event {
            TelephonyEvent::Activated => AudioAction::TelephonyActivated,
            TelephonyEvent::Deactivated => AudioAction::TelephonyDeactivated,
        }
    }
}
