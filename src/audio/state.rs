//! Audio Session State
//!
//! Modelliert die Audio-Konfiguration des Geräts so, wie der Controller sie
//! zuletzt erfolgreich gesetzt (oder von der Hardware gemeldet bekommen) hat.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

// ============================================================================
// CATEGORY / MODE / OPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioCategory {
    Ambient,
    SoloAmbient,
    Playback,
    Record,
    PlayAndRecord,
    MultiRoute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioMode {
    Default,
    VoiceChat,
    VideoChat,
    GameChat,
    VideoRecording,
    Measurement,
    MoviePlayback,
    SpokenAudio,
    VoicePrompt,
}

/// Bitmenge der Category-Optionen
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryOptions(u32);

impl CategoryOptions {
    pub const NONE: Self = Self(0);
    pub const MIX_WITH_OTHERS: Self = Self(1 << 0);
    pub const DUCK_OTHERS: Self = Self(1 << 1);
    pub const ALLOW_BLUETOOTH_HFP: Self = Self(1 << 2);
    pub const DEFAULT_TO_SPEAKER: Self = Self(1 << 3);
    pub const INTERRUPT_SPOKEN_AUDIO_AND_MIX: Self = Self(1 << 4);
    pub const ALLOW_BLUETOOTH_A2DP: Self = Self(1 << 5);
    pub const ALLOW_AIRPLAY: Self = Self(1 << 6);

    const NAMES: [(Self, &'static str); 7] = [
        (Self::MIX_WITH_OTHERS, "mixWithOthers"),
        (Self::DUCK_OTHERS, "duckOthers"),
        (Self::ALLOW_BLUETOOTH_HFP, "allowBluetoothHFP"),
        (Self::DEFAULT_TO_SPEAKER, "defaultToSpeaker"),
        (Self::INTERRUPT_SPOKEN_AUDIO_AND_MIX, "interruptSpokenAudioAndMixWithOthers"),
        (Self::ALLOW_BLUETOOTH_A2DP, "allowBluetoothA2DP"),
        (Self::ALLOW_AIRPLAY, "allowAirPlay"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Prüft ob alle gesetzten Bits in `allowed` enthalten sind
    pub const fn is_subset_of(self, allowed: Self) -> bool {
        self.0 & !allowed.0 == 0
    }
}

impl std::ops::BitOr for CategoryOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for CategoryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "[{}]", names.join(", "))
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Category, Mode und Options als eine Einheit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfiguration {
    pub category: AudioCategory,
    pub mode: AudioMode,
    pub options: CategoryOptions,
}

impl AudioConfiguration {
    pub const fn new(category: AudioCategory, mode: AudioMode, options: CategoryOptions) -> Self {
        Self {
            category,
            mode,
            options,
        }
    }

    /// Konfiguration für einen Anruf mit Mikrofon
    pub const fn voice_chat() -> Self {
        Self::new(
            AudioCategory::PlayAndRecord,
            AudioMode::VoiceChat,
            CategoryOptions::ALLOW_BLUETOOTH_HFP.union(CategoryOptions::ALLOW_BLUETOOTH_A2DP),
        )
    }

    /// Prüft die Kombination gegen die erlaubten Modes/Options der Category
    pub fn is_valid(&self) -> bool {
        use AudioMode::*;
        use CategoryOptions as O;

        let (modes, options): (&[AudioMode], CategoryOptions) = match self.category {
            AudioCategory::Playback => (
                &[Default, MoviePlayback, SpokenAudio, VoicePrompt],
                O::MIX_WITH_OTHERS
                    | O::DUCK_OTHERS
                    | O::INTERRUPT_SPOKEN_AUDIO_AND_MIX
                    | O::DEFAULT_TO_SPEAKER
                    | O::ALLOW_BLUETOOTH_A2DP,
            ),
            AudioCategory::PlayAndRecord => (
                &[
                    Default,
                    VoiceChat,
                    VideoChat,
                    GameChat,
                    VideoRecording,
                    Measurement,
                    SpokenAudio,
                    VoicePrompt,
                ],
                O::MIX_WITH_OTHERS
                    | O::DUCK_OTHERS
                    | O::INTERRUPT_SPOKEN_AUDIO_AND_MIX
                    | O::DEFAULT_TO_SPEAKER
                    | O::ALLOW_BLUETOOTH_HFP
                    | O::ALLOW_BLUETOOTH_A2DP,
            ),
            AudioCategory::Record => (&[Default, Measurement], O::DUCK_OTHERS),
            AudioCategory::MultiRoute => (&[Default, Measurement], O::MIX_WITH_OTHERS),
            AudioCategory::Ambient | AudioCategory::SoloAmbient => (
                &[Default],
                O::MIX_WITH_OTHERS | O::DUCK_OTHERS | O::INTERRUPT_SPOKEN_AUDIO_AND_MIX,
            ),
        };

        modes.contains(&self.mode) && self.options.is_subset_of(options)
    }
}

impl Default for AudioConfiguration {
    fn default() -> Self {
        Self::new(
            AudioCategory::SoloAmbient,
            AudioMode::Default,
            CategoryOptions::NONE,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputPort {
    #[default]
    None,
    Speaker,
}

// ============================================================================
// ROUTE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortType {
    BuiltInMic,
    BuiltInReceiver,
    BuiltInSpeaker,
    HeadsetMic,
    Headphones,
    BluetoothHfp,
    BluetoothA2dp,
    BluetoothLe,
    CarAudio,
    UsbAudio,
    AirPlay,
    LineIn,
    LineOut,
    Other(String),
}

impl PortType {
    /// Alles außer den eingebauten Mikrofon/Lautsprecher/Hörmuschel-Ports
    pub fn is_external(&self) -> bool {
        !matches!(
            self,
            PortType::BuiltInMic | PortType::BuiltInReceiver | PortType::BuiltInSpeaker
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub port_type: PortType,
    pub name: String,
    pub id: String,
}

impl Port {
    pub fn new(port_type: PortType, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.to_lowercase().replace(' ', "-"),
            port_type,
            name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioRoute {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl AudioRoute {
    pub fn new(inputs: Vec<Port>, outputs: Vec<Port>) -> Self {
        Self { inputs, outputs }
    }

    pub fn is_external(&self) -> bool {
        self.outputs.iter().any(|p| p.port_type.is_external())
    }

    pub fn has_external_input(&self) -> bool {
        self.inputs.iter().any(|p| p.port_type.is_external())
    }

    pub fn is_speaker(&self) -> bool {
        self.outputs
            .iter()
            .any(|p| p.port_type == PortType::BuiltInSpeaker)
    }

    pub fn is_receiver(&self) -> bool {
        self.outputs
            .iter()
            .any(|p| p.port_type == PortType::BuiltInReceiver)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteChangeReason {
    Unknown,
    NewDeviceAvailable,
    OldDeviceUnavailable,
    CategoryChange,
    Override,
    WakeFromSleep,
    NoSuitableRouteForCategory,
    RouteConfigurationChange,
}

// ============================================================================
// STEREO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StereoConfiguration {
    pub preferred: bool,
    pub enabled: bool,
}

// ============================================================================
// SESSION STATE
// ============================================================================

/// Vollständiger State des Audio Session Stores
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSessionState {
    pub is_active: bool,
    /// Vom Aufrufer gewünschte Aktivität, überlebt Interruptions
    pub should_be_active: bool,
    pub is_interrupted: bool,
    pub is_audio_enabled: bool,
    pub use_manual_audio: bool,
    pub prefers_no_interruptions: bool,
    pub has_recording_permission: bool,
    pub should_record: bool,
    pub telephony_managed: bool,
    pub configuration: AudioConfiguration,
    pub override_output_port: OutputPort,
    pub current_route: AudioRoute,
    pub stereo: StereoConfiguration,
    pub orientation: DeviceOrientation,
}

impl AudioSessionState {
    /// Wahr wenn der State die Aktiv-impliziert-Audio-Regel einhält
    pub fn is_consistent(&self) -> bool {
        !self.is_active || self.is_audio_enabled
    }

    pub fn is_speaker_on(&self) -> bool {
        match self.configuration.category {
            AudioCategory::PlayAndRecord => self.override_output_port == OutputPort::Speaker,
            _ => self
                .configuration
                .options
                .contains(CategoryOptions::DEFAULT_TO_SPEAKER),
        }
    }
}

impl Default for AudioSessionState {
    fn default() -> Self {
        Self {
            is_active: false,
            should_be_active: false,
            is_interrupted: false,
            is_audio_enabled: false,
            use_manual_audio: false,
            prefers_no_interruptions: false,
            has_recording_permission: false,
            should_record: false,
            telephony_managed: false,
            configuration: AudioConfiguration::default(),
            override_output_port: OutputPort::None,
            current_route: AudioRoute::default(),
            stereo: StereoConfiguration::default(),
            orientation: DeviceOrientation::default(),
        }
    }
}

/// Trace-Darstellung: nur die explizit gelisteten Felder
impl Serialize for AudioSessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("AudioSessionState", 11)?;
        s.serialize_field("isActive", &self.is_active)?;
        s.serialize_field("isInterrupted", &self.is_interrupted)?;
        s.serialize_field("isAudioEnabled", &self.is_audio_enabled)?;
        s.serialize_field("useManualAudio", &self.use_manual_audio)?;
        s.serialize_field("hasRecordingPermission", &self.has_recording_permission)?;
        s.serialize_field("category", &self.configuration.category)?;
        s.serialize_field("mode", &self.configuration.mode)?;
        s.serialize_field("options", &self.configuration.options)?;
        s.serialize_field("overrideOutputPort", &self.override_output_port)?;
        s.serialize_field("currentRoute", &self.current_route)?;
        s.serialize_field("stereo", &self.stereo)?;
        s.end()
    }
}

// ============================================================================
// TESTS
// ============================================================================
