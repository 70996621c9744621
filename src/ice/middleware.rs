//! Seiteneffekte des ICE Stores
//!
//! Alle Netzwerk- und Peer-Aufrufe gehen als `IceCommand` an einen einzigen
//! Worker, damit die Reihenfolge auf dem Draht der Reihenfolge der Actions
//! entspricht.

use super::state::{restart_plan, IceAction, IceState, RestartPlan};
use super::IceNamespace;
use crate::peer::IceCandidate;
use crate::store::{Dispatcher, Middleware};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub enum IceCommand {
    /// Lokalen Candidate an die SFU senden
    Trickle(IceCandidate),
    /// Remote Candidate an die Peer Connection geben
    AddRemote(IceCandidate),
    RestartIce,
}

pub struct IceMiddleware {
    commands: mpsc::UnboundedSender<IceCommand>,
    grace: Duration,
    /// Timer werden beim Schließen des Adapters mit abgebrochen
    shutdown: CancellationToken,
    timer: Mutex<Option<CancellationToken>>,
}

impl IceMiddleware {
    pub fn new(
        commands: mpsc::UnboundedSender<IceCommand>,
        grace: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            commands,
            grace,
            shutdown,
            timer: Mutex::new(None),
        }
    }

    fn send(&self, command: IceCommand) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("ICE command worker stopped"))
    }

    fn cancel_timer(&self) {
        if let Some(token) = self.timer.lock().take() {
            token.cancel();
        }
    }

    fn schedule_timer(&self, id: u64, dispatcher: &Dispatcher<IceNamespace>) {
        let token = self.shutdown.child_token();
        if let Some(previous) = self.timer.lock().replace(token.clone()) {
            previous.cancel();
        }

        let dispatcher = dispatcher.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    dispatcher.dispatch(IceAction::RestartTimerFired { id });
                }
            }
        });
    }
}

impl Middleware<IceNamespace> for IceMiddleware {
    fn apply(
        &self,
        state: &IceState,
        action: &IceAction,
        dispatcher: &Dispatcher<IceNamespace>,
    ) -> anyhow::Result<()> {
        if state.is_closed {
            return Ok(());
        }

        match restart_plan(state, action) {
            RestartPlan::Keep => {}
            RestartPlan::Schedule(id) => {
                tracing::info!(
                    "[{}] ICE disconnected, restart #{} in {:?}",
                    state.role,
                    id,
                    self.grace
                );
                self.schedule_timer(id, dispatcher);
            }
            RestartPlan::Cancel => {
                tracing::info!("[{}] Cancelled scheduled ICE restart", state.role);
                self.cancel_timer();
            }
            RestartPlan::RestartNow => {
                tracing::warn!("[{}] ICE failed, restarting now", state.role);
                self.cancel_timer();
                self.send(IceCommand::RestartIce)?;
            }
            RestartPlan::Fire(id) => {
                tracing::info!("[{}] Executing scheduled ICE restart #{}", state.role, id);
                self.timer.lock().take();
                self.send(IceCommand::RestartIce)?;
            }
        }

        match action {
            IceAction::LocalCandidateGenerated { candidate } if state.can_trickle() => {
                self.send(IceCommand::Trickle(candidate.clone()))?;
            }
            IceAction::RemoteCandidateReceived { candidate } if state.has_remote_description => {
                self.send(IceCommand::AddRemote(candidate.clone()))?;
            }
            IceAction::RemoteDescriptionSet => {
                for candidate in &state.pending_remote {
                    self.send(IceCommand::AddRemote(candidate.clone()))?;
                }
                if state.is_signaling_connected {
                    self.flush_local(state)?;
                }
            }
            IceAction::SignalingConnectionChanged { connected: true }
                if state.has_remote_description =>
            {
                self.flush_local(state)?;
            }
            IceAction::Close => self.cancel_timer(),
            _ => {}
        }

        Ok(())
    }
}

impl IceMiddleware {
    fn flush_local(&self, state: &IceState) -> anyhow::Result<()> {
        if !state.pending_local.is_empty() {
            tracing::debug!(
                "[{}] Flushing {} pending ICE candidates",
                state.role,
                state.pending_local.len()
            );
        }
        for candidate in &state.pending_local {
            self.send(IceCommand::Trickle(candidate.clone()))?;
        }
        Ok(())
    }
}
