//! Peer Connection Module
//!
//! Schmale Schnittstelle zur WebRTC Engine. Der ICE Adapter und die Call
//! Session sprechen Peer Connections nur über den `PeerConnection` Trait an;
//! `rtc` enthält die Implementierung auf Basis von webrtc-rs.

mod rtc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::broadcast;

pub use rtc::{default_ice_servers, WebRtcPeerConnection};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRTC(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidCandidate(String),

    #[error("Peer connection is closed")]
    Closed,

    #[error("Not supported: {0}")]
    Unsupported(&'static str),
}

// ============================================================================
// TYPES
// ============================================================================

/// Rolle einer Peer Connection gegenüber der SFU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    /// Sendet die eigenen Tracks
    Publisher,
    /// Empfängt die Tracks der anderen Teilnehmer
    Subscriber,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Publisher => write!(f, "publisher"),
            PeerRole::Subscriber => write!(f, "subscriber"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IceConnectionState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            IceConnectionState::Connected | IceConnectionState::Completed
        )
    }
}

/// ICE Candidate im JSON-Format von `RTCIceCandidateInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    pub fn to_json(&self) -> Result<String, PeerError> {
        serde_json::to_string(self).map_err(|e| PeerError::InvalidCandidate(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, PeerError> {
        serde_json::from_str(json).map_err(|e| PeerError::InvalidCandidate(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
    ScreenShare,
}

/// Benachrichtigungen der WebRTC Engine
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    IceConnectionStateChanged(IceConnectionState),
    IceCandidateGenerated(IceCandidate),
    /// Gesammelt; keine weiteren Candidates bis zum nächsten Restart
    IceGatheringComplete,
    SignalingStateChanged(String),
}

// ============================================================================
// CAPABILITY
// ============================================================================

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn role(&self) -> PeerRole;

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, description: SessionDescription)
        -> Result<(), PeerError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn remove_ice_candidates(&self, candidates: Vec<IceCandidate>) -> Result<(), PeerError>;

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;

    fn events(&self) -> broadcast::Receiver<PeerEvent>;
}

// ============================================================================
// TESTS
// ============================================================================
