//! Reducer des ICE Stores

use super::state::{restart_plan, IceAction, IceState, RestartPlan};
use super::IceNamespace;
use crate::store::{Reducer, StoreError};

pub struct IceReducer;

impl Reducer<IceNamespace> for IceReducer {
    fn reduce(&self, mut state: IceState, action: &IceAction) -> Result<IceState, StoreError> {
        if state.is_closed {
            return Err(StoreError::InvalidTransition(format!(
                "{} ICE adapter is closed",
                state.role
            )));
        }

        match restart_plan(&state, action) {
            RestartPlan::Keep => {}
            RestartPlan::Schedule(id) => {
                state.scheduled_restart = Some(id);
                state.restart_generation = id;
            }
            RestartPlan::Cancel => state.scheduled_restart = None,
            RestartPlan::RestartNow | RestartPlan::Fire(_) => {
                state.scheduled_restart = None;
                state.restart_attempts += 1;
            }
        }

        match action {
            IceAction::ConnectionStateChanged { state: next } => state.connection_state = *next,

            IceAction::LocalCandidateGenerated { candidate } => {
                if !state.can_trickle() {
                    state.pending_local.push(candidate.clone());
                }
            }

            IceAction::RemoteCandidateReceived { candidate } => {
                if !state.has_remote_description {
                    state.pending_remote.push(candidate.clone());
                }
            }

            IceAction::RemoteDescriptionSet => {
                state.has_remote_description = true;
                state.pending_remote.clear();
                if state.is_signaling_connected {
                    state.pending_local.clear();
                }
            }

            IceAction::SignalingConnectionChanged { connected } => {
                state.is_signaling_connected = *connected;
                if state.can_trickle() {
                    state.pending_local.clear();
                }
            }

            IceAction::Close => {
                state.is_closed = true;
                state.pending_local.clear();
                state.pending_remote.clear();
            }

            IceAction::ScheduleIceRestart | IceAction::RestartTimerFired { .. } => {}
        }

        Ok(state)
    }
}
