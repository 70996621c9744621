//! WebRTC Peer Connection auf Basis von webrtc-rs
//!
//! Verbindet die Callbacks von `RTCPeerConnection` mit dem
//! `PeerEvent`-Broadcast, den der ICE Adapter konsumiert.

use super::{
    IceCandidate, IceConnectionState, PeerConnection, PeerError, PeerEvent, PeerRole, SdpType,
    SessionDescription, TrackKind,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

/// Abtastrate des Opus Tracks
const OPUS_CLOCK_RATE: u32 = 48000;

// ============================================================================
// ICE SERVER CONFIGURATION
// ============================================================================

/// Standard STUN Server; TURN kommt von der SFU beim Join
pub fn default_ice_servers() -> Vec<RTCIceServer> {
    vec![RTCIceServer {
        urls: vec![
            "stun:stun.l.google.com:19302".to_string(),
            "stun:stun1.l.google.com:19302".to_string(),
        ],
        ..Default::default()
    }]
}

fn ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

fn webrtc_error(e: webrtc::Error) -> PeerError {
    PeerError::WebRTC(e.to_string())
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

struct LocalTrack {
    sender: Arc<RTCRtpSender>,
    track: Arc<TrackLocalStaticRTP>,
}

pub struct WebRtcPeerConnection {
    role: PeerRole,
    pc: Arc<RTCPeerConnection>,
    tracks: Mutex<HashMap<TrackKind, LocalTrack>>,
    event_tx: broadcast::Sender<PeerEvent>,
}

impl WebRtcPeerConnection {
    /// Erstellt eine Peer Connection; der Publisher bekommt einen Opus Track
    pub async fn new(role: PeerRole, ice_servers: Vec<RTCIceServer>) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(webrtc_error)?;

        // Interceptors für RTCP, NACK etc.
        let mut registry = Registry::new();
        registry =
            register_default_interceptors(registry, &mut media_engine).map_err(webrtc_error)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await.map_err(webrtc_error)?);
        let (event_tx, _) = broadcast::channel(100);

        let connection = Self {
            role,
            pc,
            tracks: Mutex::new(HashMap::new()),
            event_tx,
        };
        connection.setup_handlers();

        if role == PeerRole::Publisher {
            connection.add_audio_track().await?;
        }

        tracing::info!("Created {} peer connection", role);
        Ok(connection)
    }

    async fn add_audio_track(&self) -> Result<(), PeerError> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: "audio/opus".to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            "sfu-call".to_string(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(webrtc_error)?;

        self.tracks
            .lock()
            .insert(TrackKind::Audio, LocalTrack { sender, track });
        Ok(())
    }

    /// Registriert die Callbacks der Peer Connection
    fn setup_handlers(&self) {
        let role = self.role;

        let event_tx = self.event_tx.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                tracing::info!("[{}] ICE connection state: {}", role, s);
                if let Some(state) = ice_state(s) {
                    let _ = event_tx.send(PeerEvent::IceConnectionStateChanged(state));
                }
                Box::pin(async {})
            }));

        let event_tx = self.event_tx.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate| {
            match candidate {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let _ = event_tx.send(PeerEvent::IceCandidateGenerated(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(e) => tracing::warn!("[{}] Failed to encode ICE candidate: {}", role, e),
                },
                None => {
                    let _ = event_tx.send(PeerEvent::IceGatheringComplete);
                }
            }
            Box::pin(async {})
        }));

        let event_tx = self.event_tx.clone();
        self.pc
            .on_signaling_state_change(Box::new(move |s: RTCSignalingState| {
                let _ = event_tx.send(PeerEvent::SignalingStateChanged(s.to_string()));
                Box::pin(async {})
            }));

        self.pc.on_track(Box::new(move |track, _, _| {
            Box::pin(async move {
                tracing::info!("[{}] Received track: {:?}", role, track.codec());
            })
        }));
    }

    fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
        let result = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        };
        result.map_err(|e| PeerError::InvalidSdp(e.to_string()))
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    fn role(&self) -> PeerRole {
        self.role
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError> {
        let options = ice_restart.then_some(RTCOfferOptions {
            ice_restart: true,
            voice_activity_detection: false,
        });
        let offer = self.pc.create_offer(options).await.map_err(webrtc_error)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self.pc.create_answer(None).await.map_err(webrtc_error)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.pc
            .set_local_description(Self::to_rtc(description)?)
            .await
            .map_err(webrtc_error)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.pc
            .set_remote_description(Self::to_rtc(description)?)
            .await
            .map_err(webrtc_error)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(webrtc_error)
    }

    async fn remove_ice_candidates(&self, candidates: Vec<IceCandidate>) -> Result<(), PeerError> {
        tracing::debug!(
            "[{}] Ignoring removal of {} ICE candidates",
            self.role,
            candidates.len()
        );
        Err(PeerError::Unsupported("ICE candidate removal"))
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), PeerError> {
        let (sender, track) = {
            let tracks = self.tracks.lock();
            let local = tracks
                .get(&kind)
                .ok_or(PeerError::Unsupported("track kind without local track"))?;
            (Arc::clone(&local.sender), Arc::clone(&local.track))
        };

        let replacement = enabled.then(|| track as Arc<dyn TrackLocal + Send + Sync>);
        sender
            .replace_track(replacement)
            .await
            .map_err(webrtc_error)?;

        tracing::debug!("[{}] {:?} track enabled: {}", self.role, kind, enabled);
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc.close().await.map_err(webrtc_error)
    }

    fn events(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }
}

impl std::fmt::Debug for WebRtcPeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcPeerConnection")
            .field("role", &self.role)
            .field("connection_state", &self.pc.connection_state())
            .finish()
    }
}
