//! Audio Session Policies
//!
//! Eine Policy übersetzt die Call-Einstellungen und die eigenen Rechte des
//! Nutzers in die Ziel-Konfiguration der Audio Session.

use super::state::{AudioCategory, AudioMode, CategoryOptions, OutputPort};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Gewünschter Audio/Video-Zustand des Anrufs (gehört dem Aufrufer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSettings {
    pub audio_on: bool,
    pub video_on: bool,
    pub speaker_on: bool,
    pub audio_output_on: bool,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            audio_on: true,
            video_on: false,
            speaker_on: false,
            audio_output_on: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OwnCapability {
    SendAudio,
    SendVideo,
    Screenshare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// Gerät mit Hörmuschel
    #[default]
    Phone,
    Pad,
}

/// Ziel-Konfiguration, die eine Policy liefert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSessionConfiguration {
    pub is_active: bool,
    pub category: AudioCategory,
    pub mode: AudioMode,
    pub options: CategoryOptions,
    /// `None` bedeutet: Override nicht anfassen
    pub override_output_port: Option<OutputPort>,
}

pub trait AudioSessionPolicy: Send + Sync + fmt::Debug {
    fn configuration(
        &self,
        settings: &CallSettings,
        own_capabilities: &HashSet<OwnCapability>,
    ) -> AudioSessionConfiguration;
}

fn speaker_port(settings: &CallSettings) -> OutputPort {
    if settings.speaker_on {
        OutputPort::Speaker
    } else {
        OutputPort::None
    }
}

fn call_mode(settings: &CallSettings) -> AudioMode {
    if settings.video_on && settings.speaker_on {
        AudioMode::VideoChat
    } else {
        AudioMode::VoiceChat
    }
}

const BLUETOOTH: CategoryOptions =
    CategoryOptions::ALLOW_BLUETOOTH_HFP.union(CategoryOptions::ALLOW_BLUETOOTH_A2DP);

// ============================================================================
// DEFAULT POLICY
// ============================================================================

/// Immer playAndRecord, Lautsprecher folgt den Call-Einstellungen
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAudioSessionPolicy;

impl AudioSessionPolicy for DefaultAudioSessionPolicy {
    fn configuration(
        &self,
        settings: &CallSettings,
        _own_capabilities: &HashSet<OwnCapability>,
    ) -> AudioSessionConfiguration {
        AudioSessionConfiguration {
            is_active: settings.audio_output_on,
            category: AudioCategory::PlayAndRecord,
            mode: call_mode(settings),
            options: BLUETOOTH,
            override_output_port: Some(speaker_port(settings)),
        }
    }
}

// ============================================================================
// OWN CAPABILITIES POLICY
// ============================================================================

/// Wechselt auf reine Wiedergabe, solange nichts aufgenommen werden muss
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnCapabilitiesAudioSessionPolicy {
    pub device_type: DeviceType,
}

impl OwnCapabilitiesAudioSessionPolicy {
    pub fn new(device_type: DeviceType) -> Self {
        Self { device_type }
    }

    fn playback(settings: &CallSettings) -> AudioSessionConfiguration {
        let options = if settings.speaker_on {
            CategoryOptions::DEFAULT_TO_SPEAKER
        } else {
            CategoryOptions::NONE
        };
        AudioSessionConfiguration {
            is_active: settings.audio_output_on,
            category: AudioCategory::Playback,
            mode: AudioMode::Default,
            options,
            override_output_port: None,
        }
    }

    fn record(settings: &CallSettings) -> AudioSessionConfiguration {
        AudioSessionConfiguration {
            is_active: settings.audio_output_on,
            category: AudioCategory::PlayAndRecord,
            mode: call_mode(settings),
            options: BLUETOOTH,
            override_output_port: Some(speaker_port(settings)),
        }
    }
}

impl AudioSessionPolicy for OwnCapabilitiesAudioSessionPolicy {
    fn configuration(
        &self,
        settings: &CallSettings,
        own_capabilities: &HashSet<OwnCapability>,
    ) -> AudioSessionConfiguration {
        if !own_capabilities.contains(&OwnCapability::SendAudio) {
            return Self::playback(settings);
        }

        match (settings.audio_on, settings.speaker_on, self.device_type) {
            (true, _, _) => Self::record(settings),
            // Ohne Mikrofon bleibt nur auf Telefonen playAndRecord nötig,
            // damit zwischen Hörmuschel und Lautsprecher gewechselt werden kann
            (false, true, DeviceType::Phone) => Self::record(settings),
            (false, _, _) => Self::playback(settings),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
