//! ICE Adapter einer Peer Connection
//!
//! Verbindet Peer-Events, SFU-Trickle-Events und den Signaling-Status mit
//! dem ICE Store und führt dessen Befehle der Reihe nach aus.

use super::middleware::{IceCommand, IceMiddleware};
use super::reducer::IceReducer;
use super::state::{IceAction, IceState};
use super::IceNamespace;
use crate::config::IceConfig;
use crate::peer::{
    IceCandidate, IceConnectionState, PeerConnection, PeerEvent, PeerRole, SessionDescription,
};
use crate::signaling::{ConnectionStatus, SfuAdapter, SfuEvent, SignalingError};
use crate::store::{Dispatcher, Store};
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
enum RestartError {
    #[error(transparent)]
    Peer(#[from] crate::peer::PeerError),

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

pub struct IceAdapter {
    role: PeerRole,
    store: Store<IceNamespace>,
    shutdown: CancellationToken,
}

impl IceAdapter {
    /// Erstellt den Adapter und startet Pumps und Befehls-Worker
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn new(peer: Arc<dyn PeerConnection>, sfu: Arc<SfuAdapter>, config: &IceConfig) -> Self {
        let role = peer.role();
        let shutdown = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        // Vor dem Spawnen abonnieren, damit kein Event verloren geht
        let peer_events = peer.events();
        let sfu_events = sfu.subscribe();
        let status = sfu.connection_status();

        let store = Store::builder(IceState::new(role, sfu.is_connected()))
            .middleware(IceMiddleware::new(
                commands_tx,
                config.disconnected_grace(),
                shutdown.clone(),
            ))
            .reducer(IceReducer)
            .build();

        tokio::spawn(Self::run_commands(
            role,
            Arc::clone(&peer),
            Arc::clone(&sfu),
            commands_rx,
            shutdown.clone(),
        ));
        tokio::spawn(Self::pump_peer_events(
            peer_events,
            store.dispatcher(),
            shutdown.clone(),
        ));
        tokio::spawn(Self::pump_sfu_events(
            role,
            sfu_events,
            store.dispatcher(),
            shutdown.clone(),
        ));
        tokio::spawn(Self::pump_status(status, store.dispatcher(), shutdown.clone()));

        tracing::info!("[{}] ICE adapter started", role);

        Self {
            role,
            store,
            shutdown,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> IceState {
        self.store.state()
    }

    /// Wahr nach `close`, auch wenn die Queue `Close` nicht mehr reduziert hat
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn dispatcher(&self) -> Dispatcher<IceNamespace> {
        self.store.dispatcher()
    }

    pub fn observe_connection_state(&self) -> BoxStream<'static, IceConnectionState> {
        self.store.observe(|s: &IceState| s.connection_state)
    }

    // ========================================================================
    // CALLER COMMANDS
    // ========================================================================

    /// Lokaler Candidate, gesendet sobald erlaubt
    pub fn trickle(&self, candidate: IceCandidate) {
        self.store
            .dispatch(IceAction::LocalCandidateGenerated { candidate });
    }

    /// Remote Candidate, angewendet sobald eine Remote Description existiert
    pub fn add(&self, candidate: IceCandidate) {
        self.store
            .dispatch(IceAction::RemoteCandidateReceived { candidate });
    }

    pub fn did_set_remote_description(&self) {
        self.store.dispatch(IceAction::RemoteDescriptionSet);
    }

    pub fn ice_connection_state_changed(&self, state: IceConnectionState) {
        self.store
            .dispatch(IceAction::ConnectionStateChanged { state });
    }

    pub fn schedule_restart(&self) {
        self.store.dispatch(IceAction::ScheduleIceRestart);
    }

    /// Stoppt Timer, Pumps und Worker; bereits gesendetes bleibt gesendet
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.store.dispatch(IceAction::Close);
        self.store.close();
        tracing::info!("[{}] ICE adapter closed", self.role);
    }

    // ========================================================================
    // TASKS
    // ========================================================================

    async fn run_commands(
        role: PeerRole,
        peer: Arc<dyn PeerConnection>,
        sfu: Arc<SfuAdapter>,
        mut commands: mpsc::UnboundedReceiver<IceCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            let result = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = Self::execute(role, peer.as_ref(), &sfu, command) => result,
            };
            if let Err(e) = result {
                tracing::error!("[{}] ICE command failed: {}", role, e);
            }
        }
        tracing::debug!("[{}] ICE command worker stopped", role);
    }

    async fn execute(
        role: PeerRole,
        peer: &dyn PeerConnection,
        sfu: &SfuAdapter,
        command: IceCommand,
    ) -> Result<(), RestartError> {
        match command {
            IceCommand::Trickle(candidate) => sfu.ice_trickle(role, &candidate).await?,
            IceCommand::AddRemote(candidate) => peer.add_ice_candidate(candidate).await?,
            IceCommand::RestartIce => match role {
                PeerRole::Subscriber => sfu.ice_restart(role).await?,
                PeerRole::Publisher => {
                    let offer = peer.create_offer(true).await?;
                    peer.set_local_description(offer.clone()).await?;
                    let answer = sfu.set_publisher(offer.sdp).await?;
                    peer.set_remote_description(SessionDescription::answer(answer))
                        .await?;
                    tracing::info!("[{}] ICE restart negotiated", role);
                }
            },
        }
        Ok(())
    }

    async fn pump_peer_events(
        mut events: broadcast::Receiver<PeerEvent>,
        dispatcher: Dispatcher<IceNamespace>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(PeerEvent::IceConnectionStateChanged(state)) => {
                    dispatcher.dispatch(IceAction::ConnectionStateChanged { state })
                }
                Ok(PeerEvent::IceCandidateGenerated(candidate)) => {
                    dispatcher.dispatch(IceAction::LocalCandidateGenerated { candidate })
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Dropped {} peer events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn pump_sfu_events(
        role: PeerRole,
        mut events: broadcast::Receiver<SfuEvent>,
        dispatcher: Dispatcher<IceNamespace>,
        shutdown: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(SfuEvent::IceTrickle {
                    peer_type,
                    candidate,
                }) if peer_type == role => {
                    dispatcher.dispatch(IceAction::RemoteCandidateReceived { candidate })
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("[{}] Dropped {} SFU events", role, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn pump_status(
        mut status: tokio::sync::watch::Receiver<ConnectionStatus>,
        dispatcher: Dispatcher<IceNamespace>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let connected = *status.borrow_and_update() == ConnectionStatus::Connected;
                    dispatcher.dispatch(IceAction::SignalingConnectionChanged { connected });
                }
            }
        }
    }
}

impl Drop for IceAdapter {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for IceAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceAdapter")
            .field("role", &self.role)
            .field("state", &self.store.state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakePeerConnection, LoopbackSfu, PeerCall};
    use proptest::prelude::*;
    use std::time::Duration;

    fn candidate(n: usize) -> IceCandidate {
        IceCandidate::new(format!("candidate:{}", n))
    }

    fn adapter(role: PeerRole, sfu: &LoopbackSfu) -> (IceAdapter, Arc<FakePeerConnection>) {
        let peer = FakePeerConnection::new(role);
        let adapter = IceAdapter::new(peer.clone(), sfu.adapter.clone(), &IceConfig::default());
        (adapter, peer)
    }

    async fn wait(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidates_flush_in_order_after_remote_description() {
        let sfu = LoopbackSfu::start();
        let (ice, peer) = adapter(PeerRole::Publisher, &sfu);

        peer.emit(PeerEvent::IceCandidateGenerated(candidate(1)));
        wait(10).await;
        ice.trickle(candidate(2));
        wait(10).await;
        assert!(sfu.trickled_candidates().is_empty());
        assert_eq!(ice.state().pending_local.len(), 2);

        ice.did_set_remote_description();
        ice.trickle(candidate(3));
        wait(50).await;

        assert_eq!(
            sfu.trickled_candidates(),
            vec!["candidate:1", "candidate:2", "candidate:3"]
        );
        assert_eq!(sfu.requests_of("ice_trickle")[0]["peerType"], "publisher");
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_candidates_wait_for_description() {
        let sfu = LoopbackSfu::start();
        let (ice, peer) = adapter(PeerRole::Subscriber, &sfu);

        sfu.push(serde_json::json!({
            "type": "ice_trickle",
            "peerType": "subscriber",
            "iceCandidate": "{\"candidate\":\"candidate:9\"}"
        }))
        .await;
        sfu.push(serde_json::json!({
            "type": "ice_trickle",
            "peerType": "publisher",
            "iceCandidate": "{\"candidate\":\"candidate:8\"}"
        }))
        .await;
        wait(10).await;
        assert!(peer.added_candidates().is_empty());
        assert_eq!(ice.state().pending_remote.len(), 1);

        ice.did_set_remote_description();
        wait(10).await;

        let added = peer.added_candidates();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].candidate, "candidate:9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_disconnect_does_not_restart() {
        let sfu = LoopbackSfu::start();
        let (ice, _peer) = adapter(PeerRole::Subscriber, &sfu);

        ice.ice_connection_state_changed(IceConnectionState::Connected);
        ice.ice_connection_state_changed(IceConnectionState::Disconnected);
        wait(1000).await;
        ice.ice_connection_state_changed(IceConnectionState::Connected);
        wait(5000).await;

        assert!(sfu.requests_of("ice_restart").is_empty());
        assert_eq!(ice.state().restart_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_disconnect_restarts_exactly_once() {
        let sfu = LoopbackSfu::start();
        let (ice, peer) = adapter(PeerRole::Subscriber, &sfu);

        peer.emit(PeerEvent::IceConnectionStateChanged(IceConnectionState::Connected));
        peer.emit(PeerEvent::IceConnectionStateChanged(IceConnectionState::Disconnected));
        wait(500).await;
        peer.emit(PeerEvent::IceConnectionStateChanged(IceConnectionState::Disconnected));
        wait(500).await;
        ice.schedule_restart();
        wait(5000).await;

        assert_eq!(sfu.requests_of("ice_restart").len(), 1);
        assert_eq!(ice.state().restart_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_restarts_without_grace() {
        let sfu = LoopbackSfu::start();
        let (ice, _peer) = adapter(PeerRole::Subscriber, &sfu);

        ice.ice_connection_state_changed(IceConnectionState::Failed);
        wait(10).await;

        let restarts = sfu.requests_of("ice_restart");
        assert_eq!(restarts.len(), 1);
        assert_eq!(restarts[0]["peerType"], "subscriber");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_restart_renegotiates() {
        let sfu = LoopbackSfu::start();
        sfu.reply_with("set_publisher", serde_json::json!({"sdp": "restart-answer"}));
        let (ice, peer) = adapter(PeerRole::Publisher, &sfu);

        ice.ice_connection_state_changed(IceConnectionState::Failed);
        wait(10).await;

        assert_eq!(
            peer.calls(),
            vec![
                PeerCall::CreateOffer { ice_restart: true },
                PeerCall::SetLocal(SessionDescription::offer("offer-publisher")),
                PeerCall::SetRemote(SessionDescription::answer("restart-answer")),
            ]
        );
        assert!(sfu.requests_of("ice_restart").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_scheduled_restart() {
        let sfu = LoopbackSfu::start();
        let (ice, _peer) = adapter(PeerRole::Subscriber, &sfu);

        ice.ice_connection_state_changed(IceConnectionState::Disconnected);
        wait(10).await;
        ice.close();
        wait(5000).await;

        assert!(ice.is_closed());
        assert!(sfu.requests_of("ice_restart").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signaling_loss_buffers_candidates() {
        let sfu = LoopbackSfu::start();
        let (ice, _peer) = adapter(PeerRole::Publisher, &sfu);
        ice.did_set_remote_description();
        wait(10).await;

        sfu.adapter.disconnect();
        wait(10).await;
        ice.trickle(candidate(1));
        wait(10).await;

        assert!(!ice.state().is_signaling_connected);
        assert_eq!(ice.state().pending_local, vec![candidate(1)]);
        assert!(sfu.trickled_candidates().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_every_candidate_sent_once_in_order(count in 1usize..12, split in 0usize..12) {
            let split = split.min(count);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async move {
                let sfu = LoopbackSfu::start();
                let (ice, _peer) = adapter(PeerRole::Publisher, &sfu);

                for n in 0..split {
                    ice.trickle(candidate(n));
                }
                ice.did_set_remote_description();
                for n in split..count {
                    ice.trickle(candidate(n));
                }
                wait(100).await;

                let expected: Vec<String> = (0..count).map(|n| format!("candidate:{}", n)).collect();
                assert_eq!(sfu.trickled_candidates(), expected);
            });
        }
    }
}
