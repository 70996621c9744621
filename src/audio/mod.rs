//! Audio Session Module
//!
//! State Machine der Geräte-Audio-Session auf Basis der Store Engine:
//! - Konfiguration (Category, Mode, Options, Output-Override)
//! - Interruptions mit entprelltem, skriptgesteuertem Neustart
//! - Aufnahmeberechtigung, Stereo-Aufnahme, Routenwechsel
//! - Telefonie-gesteuerte Aktivierung (nur gespiegelt)

mod action;
mod controller;
mod hardware;
mod middleware;
mod policy;
mod reducer;
mod state;

pub use action::AudioAction;
pub use controller::{AudioSessionController, CallAudioIntent};
pub use hardware::{AudioHardware, HardwareError, HardwareEvent, HardwareSnapshot, TelephonyEvent};
pub use middleware::AudioSessionEvent;
pub use policy::{
    AudioSessionConfiguration, AudioSessionPolicy, CallSettings, DefaultAudioSessionPolicy,
    DeviceType, OwnCapabilitiesAudioSessionPolicy, OwnCapability,
};
pub use reducer::AudioSessionReducer;
pub use state::{
    AudioCategory, AudioConfiguration, AudioMode, AudioRoute, AudioSessionState, CategoryOptions,
    DeviceOrientation, OutputPort, Port, PortType, RouteChangeReason, StereoConfiguration,
};

use crate::store::StoreNamespace;

/// Namespace des Audio Session Stores
pub struct AudioSessionNamespace;

impl StoreNamespace for AudioSessionNamespace {
    type State = AudioSessionState;
    type Action = AudioAction;
    const IDENTIFIER: &'static str = "audio-session";
}
