//! Call Session
//!
//! Besitzt alles, was zu genau einem Call auf genau einem SFU-Host gehört:
//! Signaling Adapter, Publisher/Subscriber Peer Connections samt ICE
//! Adaptern und optional den Audio Session Controller. Nach einem Go-Away
//! ist die Session verbraucht; die Migration braucht eine neue Session.

use crate::audio::AudioSessionController;
use crate::config::CallConfig;
use crate::ice::IceAdapter;
use crate::peer::{PeerConnection, PeerError, PeerRole, SessionDescription, TrackKind};
use crate::signaling::{
    JoinRequest, JoinResponse, Participant, SfuAdapter, SfuEvent, SignalingError,
    TrackSubscription,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Peer connection error: {0}")]
    Peer(#[from] PeerError),

    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    Joined,
    /// Host hat Go-Away geschickt
    Migrating { reason: String },
    Ended { reason: Option<String> },
}

impl SessionState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Migrating { .. } | SessionState::Ended { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    ParticipantJoined(Participant),
    ParticipantLeft(Participant),
}

struct Inner {
    sfu: Arc<SfuAdapter>,
    publisher: Arc<dyn PeerConnection>,
    subscriber: Arc<dyn PeerConnection>,
    publisher_ice: IceAdapter,
    subscriber_ice: IceAdapter,
    audio: OnceLock<AudioSessionController>,
    state: Mutex<SessionState>,
    participants: Mutex<HashMap<String, Participant>>,
    event_tx: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
    torn_down: AtomicBool,
}

impl Inner {
    fn set_state(&self, new_state: SessionState) {
        let mut state = self.state.lock();
        if *state == new_state {
            return;
        }
        tracing::info!("Call session state: {:?} -> {:?}", *state, new_state);
        *state = new_state.clone();
        drop(state);
        let _ = self.event_tx.send(SessionEvent::StateChanged(new_state));
    }

    /// Prüfen und Umschalten unter einem Lock, damit nur ein Join startet
    fn begin_join(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if *state != SessionState::Idle {
            return Err(SessionError::InvalidState(format!(
                "cannot join from {:?}",
                *state
            )));
        }
        *state = SessionState::Joining;
        drop(state);

        tracing::info!("Call session state: Idle -> Joining");
        let _ = self
            .event_tx
            .send(SessionEvent::StateChanged(SessionState::Joining));
        Ok(())
    }

    /// Baut alle Komponenten genau einmal ab
    async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shutdown.cancel();
        self.publisher_ice.close();
        self.subscriber_ice.close();
        for peer in [&self.publisher, &self.subscriber] {
            if let Err(e) = peer.close().await {
                tracing::warn!("Failed to close {} connection: {}", peer.role(), e);
            }
        }
        if let Some(audio) = self.audio.get() {
            audio.deactivate();
        }
        self.sfu.disconnect();
        tracing::info!("Call session on {} torn down", self.sfu.hostname());
    }

    /// Vom Server beendet: State setzen, dann abbauen
    async fn end(&self, reason: Option<String>) {
        self.set_state(SessionState::Ended { reason });
        self.teardown().await;
    }
}

// ============================================================================
// CALL SESSION
// ============================================================================

pub struct CallSession {
    inner: Arc<Inner>,
}

impl CallSession {
    /// Erstellt die Session und startet die Subscriber-Verhandlung
    pub fn new(
        sfu: Arc<SfuAdapter>,
        publisher: Arc<dyn PeerConnection>,
        subscriber: Arc<dyn PeerConnection>,
        config: &CallConfig,
    ) -> Self {
        let publisher_ice = IceAdapter::new(Arc::clone(&publisher), Arc::clone(&sfu), &config.ice);
        let subscriber_ice =
            IceAdapter::new(Arc::clone(&subscriber), Arc::clone(&sfu), &config.ice);

        let (event_tx, _) = broadcast::channel(config.signaling.event_buffer.max(1));
        let events = sfu.subscribe();
        let inner = Arc::new(Inner {
            sfu,
            publisher,
            subscriber,
            publisher_ice,
            subscriber_ice,
            audio: OnceLock::new(),
            state: Mutex::new(SessionState::Idle),
            participants: Mutex::new(HashMap::new()),
            event_tx,
            shutdown: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
        });

        tokio::spawn(Self::run_events(events, Arc::clone(&inner)));

        Self { inner }
    }

    /// Übergibt den Audio Session Controller an die Session
    pub fn with_audio(self, audio: AudioSessionController) -> Self {
        if self.inner.audio.set(audio).is_err() {
            tracing::warn!("Call session already owns an audio controller");
        }
        self
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn hostname(&self) -> &str {
        self.inner.sfu.hostname()
    }

    pub fn session_id(&self) -> &str {
        self.inner.sfu.session_id()
    }

    pub fn participants(&self) -> Vec<Participant> {
        let mut participants: Vec<_> = self.inner.participants.lock().values().cloned().collect();
        participants.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        participants
    }

    pub fn ice(&self, role: PeerRole) -> &IceAdapter {
        match role {
            PeerRole::Publisher => &self.inner.publisher_ice,
            PeerRole::Subscriber => &self.inner.subscriber_ice,
        }
    }

    pub fn audio(&self) -> Option<&AudioSessionController> {
        self.inner.audio.get()
    }

    // ========================================================================
    // CALL LIFECYCLE
    // ========================================================================

    /// Tritt dem Call bei und verhandelt die Publisher-Verbindung
    pub async fn join(&self, token: &str) -> Result<JoinResponse, SessionError> {
        self.inner.begin_join()?;

        match self.negotiate_join(token).await {
            Ok(response) => {
                // Go-Away während des Joins gewinnt
                if !self.inner.state.lock().is_terminal() {
                    self.inner.set_state(SessionState::Joined);
                }
                Ok(response)
            }
            Err(e) => {
                tracing::error!("Join on {} failed: {}", self.inner.sfu.hostname(), e);
                if !self.inner.state.lock().is_terminal() {
                    self.inner.set_state(SessionState::Idle);
                }
                Err(e)
            }
        }
    }

    async fn negotiate_join(&self, token: &str) -> Result<JoinResponse, SessionError> {
        let inner = &self.inner;
        let subscriber_sdp = inner.subscriber.create_offer(false).await?.sdp;
        let response = inner
            .sfu
            .join(JoinRequest {
                token: token.to_string(),
                subscriber_sdp,
                publisher_sdp: None,
                capabilities: Vec::new(),
                reconnect: false,
            })
            .await?;

        {
            let mut participants = inner.participants.lock();
            participants.clear();
            for participant in &response.participants {
                participants.insert(participant.session_id.clone(), participant.clone());
            }
        }

        self.negotiate_publisher().await?;
        Ok(response)
    }

    async fn negotiate_publisher(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        let offer = inner.publisher.create_offer(false).await?;
        inner.publisher.set_local_description(offer.clone()).await?;
        let answer = inner.sfu.set_publisher(offer.sdp).await?;
        inner
            .publisher
            .set_remote_description(SessionDescription::answer(answer))
            .await?;
        inner.publisher_ice.did_set_remote_description();
        tracing::info!("Publisher negotiated on {}", inner.sfu.hostname());
        Ok(())
    }

    /// Verlässt den Call und baut alle Komponenten ab
    ///
    /// Hat der Server den Call bereits beendet, entfällt nur die Leave-Nachricht.
    pub async fn leave(&self, reason: &str) -> Result<(), SessionError> {
        let already_ended = matches!(*self.inner.state.lock(), SessionState::Ended { .. });

        let result = if !already_ended && self.inner.sfu.is_connected() {
            self.inner.sfu.leave(reason).await
        } else {
            Ok(())
        };
        self.inner.teardown().await;
        if !already_ended {
            self.inner.set_state(SessionState::Ended {
                reason: Some(reason.to_string()),
            });
        }
        result.map_err(SessionError::from)
    }

    // ========================================================================
    // MEDIA
    // ========================================================================

    /// Schaltet einen eigenen Track stumm und meldet das der SFU
    pub async fn set_muted(&self, kind: TrackKind, muted: bool) -> Result<(), SessionError> {
        self.inner.publisher.set_track_enabled(kind, !muted).await?;
        self.inner.sfu.update_track_mute_state(kind, muted).await?;
        Ok(())
    }

    pub async fn update_subscriptions(
        &self,
        tracks: Vec<TrackSubscription>,
    ) -> Result<(), SessionError> {
        self.inner.sfu.update_subscriptions(tracks).await?;
        Ok(())
    }

    /// Netzwechsel: beide Verbindungen nach der Grace-Zeit neu starten
    pub fn handle_network_change(&self) {
        tracing::info!("Network changed, scheduling ICE restarts");
        self.inner.publisher_ice.schedule_restart();
        self.inner.subscriber_ice.schedule_restart();
    }

    // ========================================================================
    // SFU EVENTS
    // ========================================================================

    async fn run_events(mut events: broadcast::Receiver<SfuEvent>, inner: Arc<Inner>) {
        let shutdown = inner.shutdown.clone();
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(SfuEvent::SubscriberOffer { sdp, ice_restart }) => {
                    tracing::debug!("Subscriber offer (ICE restart: {})", ice_restart);
                    let result = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        result = Self::answer_subscriber(&inner, sdp) => result,
                    };
                    if let Err(e) = result {
                        tracing::error!("Subscriber negotiation failed: {}", e);
                    }
                }
                Ok(SfuEvent::ParticipantJoined(participant)) => {
                    inner
                        .participants
                        .lock()
                        .insert(participant.session_id.clone(), participant.clone());
                    let _ = inner
                        .event_tx
                        .send(SessionEvent::ParticipantJoined(participant));
                }
                Ok(SfuEvent::ParticipantLeft(participant)) => {
                    inner.participants.lock().remove(&participant.session_id);
                    let _ = inner.event_tx.send(SessionEvent::ParticipantLeft(participant));
                }
                Ok(SfuEvent::GoAway { reason }) => {
                    inner.set_state(SessionState::Migrating { reason });
                }
                Ok(SfuEvent::CallEnded { reason }) => {
                    inner.end(reason).await;
                    break;
                }
                Ok(SfuEvent::Error {
                    code,
                    message,
                    should_retry: false,
                }) => {
                    tracing::error!("Fatal SFU error {}: {}", code, message);
                    inner.end(Some(message)).await;
                    break;
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Call session dropped {} SFU events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn answer_subscriber(inner: &Inner, sdp: String) -> Result<(), SessionError> {
        inner
            .subscriber
            .set_remote_description(SessionDescription::offer(sdp))
            .await?;
        inner.subscriber_ice.did_set_remote_description();

        let answer = inner.subscriber.create_answer().await?;
        inner.subscriber.set_local_description(answer.clone()).await?;
        inner
            .sfu
            .send_answer(PeerRole::Subscriber, answer.sdp)
            .await?;
        Ok(())
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("hostname", &self.inner.sfu.hostname())
            .field("session_id", &self.inner.sfu.session_id())
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
