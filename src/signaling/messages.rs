//! Message Types für das SFU-Signaling-Protokoll
//!
//! JSON über WebSocket. Jede Anfrage trägt eine `requestId`, die die SFU in
//! ihrer `response` zurückschickt; alles andere sind Push-Events.

use crate::peer::{IceCandidate, PeerRole, TrackKind};
use serde::{Deserialize, Serialize};

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Umschlag für alle Client-Nachrichten
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope<T: Serialize> {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: T,
}

/// Parameter eines Join-Versuchs
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JoinRequest {
    pub token: String,
    pub subscriber_sdp: String,
    pub publisher_sdp: Option<String>,
    pub capabilities: Vec<String>,
    /// Wiederaufnahme nach Verbindungsverlust auf demselben Host
    pub reconnect: bool,
}

/// Call beitreten
#[derive(Debug, Clone, Serialize)]
pub struct JoinPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub token: String,
    #[serde(rename = "subscriberSdp")]
    pub subscriber_sdp: String,
    #[serde(rename = "publisherSdp", skip_serializing_if = "Option::is_none")]
    pub publisher_sdp: Option<String>,
    pub capabilities: Vec<String>,
    pub reconnect: bool,
}

impl JoinPayload {
    pub fn new(session_id: String, request: JoinRequest) -> Self {
        Self {
            msg_type: "join",
            session_id,
            token: request.token,
            subscriber_sdp: request.subscriber_sdp,
            publisher_sdp: request.publisher_sdp,
            capabilities: request.capabilities,
            reconnect: request.reconnect,
        }
    }
}

/// Call verlassen
#[derive(Debug, Clone, Serialize)]
pub struct LeavePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub reason: String,
}

impl LeavePayload {
    pub fn new(session_id: String, reason: String) -> Self {
        Self {
            msg_type: "leave",
            session_id,
            reason,
        }
    }
}

/// ICE Candidate an die SFU
#[derive(Debug, Clone, Serialize)]
pub struct IceTricklePayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "peerType")]
    pub peer_type: PeerRole,
    /// Candidate als JSON-String
    #[serde(rename = "iceCandidate")]
    pub ice_candidate: String,
}

impl IceTricklePayload {
    pub fn new(session_id: String, peer_type: PeerRole, ice_candidate: String) -> Self {
        Self {
            msg_type: "ice_trickle",
            session_id,
            peer_type,
            ice_candidate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMuteState {
    #[serde(rename = "trackType")]
    pub track_type: TrackKind,
    pub muted: bool,
}

/// Mute-Status eigener Tracks
#[derive(Debug, Clone, Serialize)]
pub struct UpdateMuteStatesPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "muteStates")]
    pub mute_states: Vec<TrackMuteState>,
}

impl UpdateMuteStatesPayload {
    pub fn new(session_id: String, mute_states: Vec<TrackMuteState>) -> Self {
        Self {
            msg_type: "update_mute_states",
            session_id,
            mute_states,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSubscription {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "trackType")]
    pub track_type: TrackKind,
}

/// Abonnierte Tracks anderer Teilnehmer
#[derive(Debug, Clone, Serialize)]
pub struct UpdateSubscriptionsPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub tracks: Vec<TrackSubscription>,
}

impl UpdateSubscriptionsPayload {
    pub fn new(session_id: String, tracks: Vec<TrackSubscription>) -> Self {
        Self {
            msg_type: "update_subscriptions",
            session_id,
            tracks,
        }
    }
}

/// Publisher-Offer, die Antwort enthält das SDP Answer
#[derive(Debug, Clone, Serialize)]
pub struct SetPublisherPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub sdp: String,
}

impl SetPublisherPayload {
    pub fn new(session_id: String, sdp: String) -> Self {
        Self {
            msg_type: "set_publisher",
            session_id,
            sdp,
        }
    }
}

/// SDP Answer auf ein Subscriber-Offer
#[derive(Debug, Clone, Serialize)]
pub struct SendAnswerPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "peerType")]
    pub peer_type: PeerRole,
    pub sdp: String,
}

impl SendAnswerPayload {
    pub fn new(session_id: String, peer_type: PeerRole, sdp: String) -> Self {
        Self {
            msg_type: "send_answer",
            session_id,
            peer_type,
            sdp,
        }
    }
}

/// Bittet die SFU um einen ICE Restart (Subscriber)
#[derive(Debug, Clone, Serialize)]
pub struct IceRestartPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "peerType")]
    pub peer_type: PeerRole,
}

impl IceRestartPayload {
    pub fn new(session_id: String, peer_type: PeerRole) -> Self {
        Self {
            msg_type: "ice_restart",
            session_id,
            peer_type,
        }
    }
}

/// Health Check
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckPayload {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

impl HealthCheckPayload {
    pub fn new(session_id: String) -> Self {
        Self {
            msg_type: "health_check",
            session_id,
        }
    }
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

/// Alle möglichen Server-Nachrichten
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Antwort auf eine Anfrage
    Response {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default)]
        error: Option<ErrorBody>,
        #[serde(default)]
        result: serde_json::Value,
    },

    ParticipantJoined { participant: Participant },

    ParticipantLeft { participant: Participant },

    TrackPublished {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "trackType")]
        track_type: TrackKind,
    },

    TrackUnpublished {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "trackType")]
        track_type: TrackKind,
    },

    /// ICE Candidate der SFU
    IceTrickle {
        #[serde(rename = "peerType")]
        peer_type: PeerRole,
        #[serde(rename = "iceCandidate")]
        ice_candidate: String,
    },

    /// Neues Offer für die Subscriber-Verbindung
    SubscriberOffer {
        sdp: String,
        #[serde(rename = "iceRestart", default)]
        ice_restart: bool,
    },

    /// Host gibt Last ab, Client muss migrieren
    GoAway {
        #[serde(default)]
        reason: String,
    },

    CallEnded {
        #[serde(default)]
        reason: Option<String>,
    },

    Error {
        code: i32,
        message: String,
        #[serde(rename = "shouldRetry", default)]
        should_retry: bool,
    },

    HealthCheckResponse {
        #[serde(rename = "participantCount", default)]
        participant_count: u32,
    },
}

// ============================================================================
// HELPER TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "publishedTracks", default)]
    pub published_tracks: Vec<TrackKind>,
}

/// Ergebnis eines erfolgreichen Joins
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct JoinResponse {
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub reconnected: bool,
}

/// Push-Events der SFU für den Aufrufer
#[derive(Debug, Clone, PartialEq)]
pub enum SfuEvent {
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
    TrackPublished {
        user_id: String,
        session_id: String,
        track_type: TrackKind,
    },
    TrackUnpublished {
        user_id: String,
        session_id: String,
        track_type: TrackKind,
    },
    IceTrickle {
        peer_type: PeerRole,
        candidate: IceCandidate,
    },
    SubscriberOffer {
        sdp: String,
        ice_restart: bool,
    },
    GoAway {
        reason: String,
    },
    CallEnded {
        reason: Option<String>,
    },
    Error {
        code: i32,
        message: String,
        should_retry: bool,
    },
    HealthCheckResponse {
        participant_count: u32,
    },
}

// ============================================================================
// TESTS
// ============================================================================
