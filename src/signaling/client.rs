//! SFU Signaling Adapter
//!
//! RPC- und Event-Client über eine persistente Verbindung zu genau einem
//! SFU-Host:
//! - Anfragen mit `requestId`-Korrelation und Timeout
//! - Push-Events über einen Broadcast-Channel
//! - Verbindungsstatus über einen Watch-Channel
//!
//! Retry/Backoff bei Transportfehlern ist nicht Aufgabe dieses Adapters.

use super::messages::*;
use crate::config::SignalingConfig;
use crate::peer::{IceCandidate, PeerRole, TrackKind};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to SFU")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("No response after {0:?}")]
    Timeout(Duration),

    #[error("Server error: {code} - {message}")]
    ServerError { code: i32, message: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Status der Signaling-Verbindung
///
/// Ein Adapter existiert erst nach dem Handshake und startet daher verbunden.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
}

type PendingRequests = Arc<Mutex<HashMap<String, oneshot::Sender<Result<serde_json::Value, SignalingError>>>>>;

// ============================================================================
// SFU ADAPTER
// ============================================================================

pub struct SfuAdapter {
    hostname: String,
    session_id: String,
    outbound: mpsc::Sender<String>,
    pending: PendingRequests,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    event_tx: broadcast::Sender<SfuEvent>,
    request_timeout: Duration,
    shutdown: CancellationToken,
}

impl SfuAdapter {
    /// Verbindet per WebSocket mit der SFU
    pub async fn connect(
        config: &SignalingConfig,
        session_id: String,
    ) -> Result<Self, SignalingError> {
        let url = url::Url::parse(&config.url)
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
        let hostname = url.host_str().unwrap_or_default().to_string();

        tracing::info!("Connecting to SFU: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        // Write-Task: Transport-Seite der In-Memory-Channels
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(100);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(100);
        let shutdown = CancellationToken::new();

        let write_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = write_shutdown.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    msg = outbound_rx.recv() => match msg {
                        Some(msg) => {
                            if let Err(e) = write.send(Message::Text(msg)).await {
                                tracing::error!("Failed to send WebSocket message: {}", e);
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        });

        // Read-Task
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by SFU");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self::start(
            hostname,
            session_id,
            outbound_tx,
            inbound_rx,
            config,
            shutdown,
        ))
    }

    /// Läuft über beliebige Transporte, die Text-Frames austauschen
    pub fn from_channels(
        hostname: impl Into<String>,
        session_id: impl Into<String>,
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<String>,
        config: &SignalingConfig,
    ) -> Self {
        Self::start(
            hostname.into(),
            session_id.into(),
            outbound,
            inbound,
            config,
            CancellationToken::new(),
        )
    }

    fn start(
        hostname: String,
        session_id: String,
        outbound: mpsc::Sender<String>,
        mut inbound: mpsc::Receiver<String>,
        config: &SignalingConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let (status_tx, _) = watch::channel(ConnectionStatus::Connected);
        let status_tx = Arc::new(status_tx);
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        let reader_events = event_tx.clone();
        let reader_status = Arc::clone(&status_tx);
        let reader_shutdown = shutdown.clone();
        let reader_host = hostname.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    text = inbound.recv() => match text {
                        Some(text) => Self::handle_text(&text, &reader_pending, &reader_events),
                        None => break,
                    },
                }
            }

            reader_status.send_replace(ConnectionStatus::Disconnected);
            Self::fail_pending(&reader_pending);
            tracing::info!("Disconnected from SFU {}", reader_host);
        });

        tracing::info!("Connected to SFU {} (session {})", hostname, session_id);

        Self {
            hostname,
            session_id,
            outbound,
            pending,
            status_tx,
            event_tx,
            request_timeout: config.request_timeout(),
            shutdown,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SfuEvent> {
        self.event_tx.subscribe()
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.status_tx.borrow() == ConnectionStatus::Connected
    }

    // ========================================================================
    // REQUESTS
    // ========================================================================

    pub async fn join(&self, request: JoinRequest) -> Result<JoinResponse, SignalingError> {
        tracing::info!("Joining call on {} (reconnect: {})", self.hostname, request.reconnect);
        let result = self
            .request(JoinPayload::new(self.session_id.clone(), request))
            .await?;
        serde_json::from_value(result).map_err(|e| SignalingError::InvalidMessage(e.to_string()))
    }

    /// Verlässt den Call ohne auf eine Antwort zu warten
    pub async fn leave(&self, reason: &str) -> Result<(), SignalingError> {
        tracing::info!("Leaving call on {}: {}", self.hostname, reason);
        self.send(
            Uuid::new_v4().to_string(),
            LeavePayload::new(self.session_id.clone(), reason.to_string()),
        )
        .await
    }

    pub async fn ice_trickle(
        &self,
        peer_type: PeerRole,
        candidate: &IceCandidate,
    ) -> Result<(), SignalingError> {
        let json = candidate
            .to_json()
            .map_err(|e| SignalingError::InvalidMessage(e.to_string()))?;
        self.request(IceTricklePayload::new(
            self.session_id.clone(),
            peer_type,
            json,
        ))
        .await
        .map(|_| ())
    }

    pub async fn update_track_mute_state(
        &self,
        track_type: TrackKind,
        muted: bool,
    ) -> Result<(), SignalingError> {
        self.request(UpdateMuteStatesPayload::new(
            self.session_id.clone(),
            vec![TrackMuteState { track_type, muted }],
        ))
        .await
        .map(|_| ())
    }

    pub async fn update_subscriptions(
        &self,
        tracks: Vec<TrackSubscription>,
    ) -> Result<(), SignalingError> {
        self.request(UpdateSubscriptionsPayload::new(
            self.session_id.clone(),
            tracks,
        ))
        .await
        .map(|_| ())
    }

    /// Sendet das Publisher-Offer und gibt das SDP Answer der SFU zurück
    pub async fn set_publisher(&self, sdp: String) -> Result<String, SignalingError> {
        let result = self
            .request(SetPublisherPayload::new(self.session_id.clone(), sdp))
            .await?;
        result
            .get("sdp")
            .and_then(|sdp| sdp.as_str())
            .map(str::to_string)
            .ok_or_else(|| SignalingError::InvalidMessage("set_publisher without sdp".to_string()))
    }

    pub async fn send_answer(&self, peer_type: PeerRole, sdp: String) -> Result<(), SignalingError> {
        self.request(SendAnswerPayload::new(
            self.session_id.clone(),
            peer_type,
            sdp,
        ))
        .await
        .map(|_| ())
    }

    pub async fn ice_restart(&self, peer_type: PeerRole) -> Result<(), SignalingError> {
        tracing::info!("Requesting ICE restart for {}", peer_type);
        self.request(IceRestartPayload::new(self.session_id.clone(), peer_type))
            .await
            .map(|_| ())
    }

    /// Die Antwort kommt als `SfuEvent::HealthCheckResponse`
    pub async fn health_check(&self) -> Result<(), SignalingError> {
        self.send(
            Uuid::new_v4().to_string(),
            HealthCheckPayload::new(self.session_id.clone()),
        )
        .await
    }

    /// Trennt die Verbindung; offene Anfragen schlagen mit `NotConnected` fehl
    pub fn disconnect(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.status_tx.send_replace(ConnectionStatus::Disconnected);
        Self::fail_pending(&self.pending);
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn request<T: Serialize>(&self, payload: T) -> Result<serde_json::Value, SignalingError> {
        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        if let Err(e) = self.send(request_id.clone(), payload).await {
            self.pending.lock().remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SignalingError::NotConnected),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                tracing::warn!("Request {} timed out", request_id);
                Err(SignalingError::Timeout(self.request_timeout))
            }
        }
    }

    async fn send<T: Serialize>(&self, request_id: String, payload: T) -> Result<(), SignalingError> {
        if !self.is_connected() {
            return Err(SignalingError::NotConnected);
        }

        let envelope = RequestEnvelope {
            request_id,
            timestamp: Utc::now().timestamp_millis(),
            payload,
        };
        let json = serde_json::to_string(&envelope)
            .map_err(|e| SignalingError::SendFailed(e.to_string()))?;

        self.outbound
            .send(json)
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    fn handle_text(text: &str, pending: &PendingRequests, event_tx: &broadcast::Sender<SfuEvent>) {
        let message = match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Ignoring invalid SFU message: {}", e);
                return;
            }
        };

        let event = match message {
            ServerMessage::Response {
                request_id,
                error,
                result,
            } => {
                match pending.lock().remove(&request_id) {
                    Some(tx) => {
                        let response = match error {
                            Some(ErrorBody { code, message }) => {
                                Err(SignalingError::ServerError { code, message })
                            }
                            None => Ok(result),
                        };
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!("Response for unknown request {}", request_id),
                }
                return;
            }
            ServerMessage::ParticipantJoined { participant } => {
                SfuEvent::ParticipantJoined(participant)
            }
            ServerMessage::ParticipantLeft { participant } => SfuEvent::ParticipantLeft(participant),
            ServerMessage::TrackPublished {
                user_id,
                session_id,
                track_type,
            } => SfuEvent::TrackPublished {
                user_id,
                session_id,
                track_type,
            },
            ServerMessage::TrackUnpublished {
                user_id,
                session_id,
                track_type,
            } => SfuEvent::TrackUnpublished {
                user_id,
                session_id,
                track_type,
            },
            ServerMessage::IceTrickle {
                peer_type,
                ice_candidate,
            } => match IceCandidate::from_json(&ice_candidate) {
                Ok(candidate) => SfuEvent::IceTrickle {
                    peer_type,
                    candidate,
                },
                Err(e) => {
                    tracing::warn!("Ignoring ICE trickle for {}: {}", peer_type, e);
                    return;
                }
            },
            ServerMessage::SubscriberOffer { sdp, ice_restart } => {
                SfuEvent::SubscriberOffer { sdp, ice_restart }
            }
            ServerMessage::GoAway { reason } => {
                tracing::warn!("SFU requested migration: {}", reason);
                SfuEvent::GoAway { reason }
            }
            ServerMessage::CallEnded { reason } => SfuEvent::CallEnded { reason },
            ServerMessage::Error {
                code,
                message,
                should_retry,
            } => {
                tracing::error!("SFU error {}: {}", code, message);
                SfuEvent::Error {
                    code,
                    message,
                    should_retry,
                }
            }
            ServerMessage::HealthCheckResponse { participant_count } => {
                SfuEvent::HealthCheckResponse { participant_count }
            }
        };

        let _ = event_tx.send(event);
    }

    fn fail_pending(pending: &PendingRequests) {
        for (_, tx) in pending.lock().drain() {
            let _ = tx.send(Err(SignalingError::NotConnected));
        }
    }
}

impl Drop for SfuAdapter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SfuAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SfuAdapter")
            .field("hostname", &self.hostname)
            .field("session_id", &self.session_id)
            .field("status", &*self.status_tx.borrow())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
