//! ICE State und Actions einer Peer Connection

use crate::peer::{IceCandidate, IceConnectionState, PeerRole};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct IceState {
    pub role: PeerRole,
    pub connection_state: IceConnectionState,
    pub has_remote_description: bool,
    pub is_signaling_connected: bool,
    /// Lokale Candidates, die noch nicht gesendet werden dürfen (FIFO)
    pub pending_local: Vec<IceCandidate>,
    /// Remote Candidates vor der Remote Description (FIFO)
    pub pending_remote: Vec<IceCandidate>,
    /// Id des geplanten Restart-Timers
    pub scheduled_restart: Option<u64>,
    pub restart_generation: u64,
    pub restart_attempts: u32,
    pub is_closed: bool,
}

impl IceState {
    pub fn new(role: PeerRole, is_signaling_connected: bool) -> Self {
        Self {
            role,
            connection_state: IceConnectionState::New,
            has_remote_description: false,
            is_signaling_connected,
            pending_local: Vec::new(),
            pending_remote: Vec::new(),
            scheduled_restart: None,
            restart_generation: 0,
            restart_attempts: 0,
            is_closed: false,
        }
    }

    /// Lokale Candidates dürfen nur mit Signaling und Remote Description raus
    pub fn can_trickle(&self) -> bool {
        self.is_signaling_connected && self.has_remote_description
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IceAction {
    ConnectionStateChanged { state: IceConnectionState },
    LocalCandidateGenerated { candidate: IceCandidate },
    RemoteCandidateReceived { candidate: IceCandidate },
    RemoteDescriptionSet,
    SignalingConnectionChanged { connected: bool },
    /// Restart nach der Grace-Zeit anfordern (z.B. Netzwechsel)
    ScheduleIceRestart,
    RestartTimerFired { id: u64 },
    Close,
}

/// Entscheidung über Restart-Timer für eine Action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPlan {
    Keep,
    Schedule(u64),
    Cancel,
    RestartNow,
    Fire(u64),
}

/// Gemeinsame Entscheidung für Reducer und Middleware
///
/// Beide sehen denselben State vor der Action und kommen deshalb immer zum
/// selben Ergebnis.
pub fn restart_plan(state: &IceState, action: &IceAction) -> RestartPlan {
    if state.is_closed {
        return RestartPlan::Keep;
    }

    let cancel_scheduled = || {
        if state.scheduled_restart.is_some() {
            RestartPlan::Cancel
        } else {
            RestartPlan::Keep
        }
    };
    let schedule = || match state.scheduled_restart {
        Some(_) => RestartPlan::Keep,
        None => RestartPlan::Schedule(state.restart_generation + 1),
    };

    match action {
        IceAction::ConnectionStateChanged { state: next } => match next {
            IceConnectionState::Disconnected => schedule(),
            IceConnectionState::Failed if state.connection_state != IceConnectionState::Failed => {
                RestartPlan::RestartNow
            }
            IceConnectionState::Connected
            | IceConnectionState::Completed
            | IceConnectionState::Closed => cancel_scheduled(),
            _ => RestartPlan::Keep,
        },
        IceAction::ScheduleIceRestart => schedule(),
        IceAction::RestartTimerFired { id } if state.scheduled_restart == Some(*id) => {
            RestartPlan::Fire(*id)
        }
        IceAction::Close => cancel_scheduled(),
        _ => RestartPlan::Keep,
    }
}
