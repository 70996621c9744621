//! Fakes für Unit-Tests: Audio-Hardware, Peer Connection und eine
//! Loopback-SFU, die Anfragen aufzeichnet und automatisch beantwortet.

use crate::audio::{
    AudioConfiguration, AudioHardware, DeviceOrientation, HardwareError, HardwareSnapshot,
    OutputPort,
};
use crate::config::SignalingConfig;
use crate::peer::{
    IceCandidate, PeerConnection, PeerError, PeerEvent, PeerRole, SessionDescription, TrackKind,
};
use crate::signaling::SfuAdapter;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// AUDIO HARDWARE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum HardwareCall {
    SetActive(bool),
    SetConfiguration(AudioConfiguration),
    OverrideOutputPort(OutputPort),
    SetAudioEnabled(bool),
    SetUseManualAudio(bool),
    SetPrefersNoInterruptions(bool),
    SetStereoInput(DeviceOrientation),
    RestoreDefaultInput,
}

#[derive(Default)]
pub struct FakeAudioHardware {
    snapshot: Mutex<HardwareSnapshot>,
    calls: Mutex<Vec<HardwareCall>>,
    fail_configuration: AtomicBool,
    permission_answer: AtomicBool,
    permission_requests: AtomicUsize,
}

impl FakeAudioHardware {
    pub fn with_snapshot(snapshot: HardwareSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<HardwareCall> {
        self.calls.lock().clone()
    }

    pub fn fail_configuration(&self, fail: bool) {
        self.fail_configuration.store(fail, Ordering::SeqCst);
    }

    pub fn set_permission_answer(&self, granted: bool) {
        self.permission_answer.store(granted, Ordering::SeqCst);
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    fn record(&self, call: HardwareCall) -> Result<(), HardwareError> {
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl AudioHardware for FakeAudioHardware {
    fn snapshot(&self) -> HardwareSnapshot {
        self.snapshot.lock().clone()
    }

    fn set_active(&self, active: bool) -> Result<(), HardwareError> {
        self.record(HardwareCall::SetActive(active))
    }

    fn set_configuration(&self, configuration: &AudioConfiguration) -> Result<(), HardwareError> {
        if self.fail_configuration.load(Ordering::SeqCst) {
            return Err(HardwareError::Configuration("rejected by fake".to_string()));
        }
        self.record(HardwareCall::SetConfiguration(*configuration))
    }

    fn override_output_port(&self, port: OutputPort) -> Result<(), HardwareError> {
        self.record(HardwareCall::OverrideOutputPort(port))
    }

    fn set_audio_enabled(&self, enabled: bool) -> Result<(), HardwareError> {
        self.record(HardwareCall::SetAudioEnabled(enabled))
    }

    fn set_use_manual_audio(&self, enabled: bool) -> Result<(), HardwareError> {
        self.record(HardwareCall::SetUseManualAudio(enabled))
    }

    fn set_prefers_no_interruptions(&self, enabled: bool) -> Result<(), HardwareError> {
        self.record(HardwareCall::SetPrefersNoInterruptions(enabled))
    }

    fn set_stereo_input(&self, orientation: DeviceOrientation) -> Result<(), HardwareError> {
        self.record(HardwareCall::SetStereoInput(orientation))
    }

    fn restore_default_input(&self) -> Result<(), HardwareError> {
        self.record(HardwareCall::RestoreDefaultInput)
    }

    async fn request_record_permission(&self) -> bool {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        self.permission_answer.load(Ordering::SeqCst)
    }
}

// ============================================================================
// PEER CONNECTION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum PeerCall {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    AddCandidate(IceCandidate),
    SetTrackEnabled(TrackKind, bool),
    Close,
}

pub struct FakePeerConnection {
    role: PeerRole,
    calls: Mutex<Vec<PeerCall>>,
    event_tx: broadcast::Sender<PeerEvent>,
}

impl FakePeerConnection {
    pub fn new(role: PeerRole) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(100);
        Arc::new(Self {
            role,
            calls: Mutex::new(Vec::new()),
            event_tx,
        })
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().clone()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                PeerCall::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    fn role(&self) -> PeerRole {
        self.role
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError> {
        self.record(PeerCall::CreateOffer { ice_restart });
        Ok(SessionDescription::offer(format!("offer-{}", self.role)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer(format!("answer-{}", self.role)))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(PeerCall::SetLocal(description));
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(PeerCall::SetRemote(description));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.record(PeerCall::AddCandidate(candidate));
        Ok(())
    }

    async fn remove_ice_candidates(&self, _candidates: Vec<IceCandidate>) -> Result<(), PeerError> {
        Err(PeerError::Unsupported("ICE candidate removal"))
    }

    async fn set_track_enabled(&self, kind: TrackKind, enabled: bool) -> Result<(), PeerError> {
        self.record(PeerCall::SetTrackEnabled(kind, enabled));
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.record(PeerCall::Close);
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<PeerEvent> {
        self.event_tx.subscribe()
    }
}

// ============================================================================
// LOOPBACK SFU
// ============================================================================

enum Rule {
    Reply(Value),
    Fail(i32, String),
    Ignore,
}

/// In-Memory SFU hinter einem echten `SfuAdapter`
pub struct LoopbackSfu {
    pub adapter: Arc<SfuAdapter>,
    requests: Arc<Mutex<Vec<Value>>>,
    rules: Arc<Mutex<HashMap<String, Rule>>>,
    push_tx: mpsc::Sender<String>,
}

impl LoopbackSfu {
    pub fn start() -> Self {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(100);
        let (inbound_tx, inbound_rx) = mpsc::channel::<String>(100);
        let adapter = Arc::new(SfuAdapter::from_channels(
            "sfu.test",
            "session-1",
            outbound_tx,
            inbound_rx,
            &SignalingConfig::default(),
        ));

        let requests = Arc::new(Mutex::new(Vec::new()));
        let rules: Arc<Mutex<HashMap<String, Rule>>> = Arc::new(Mutex::new(HashMap::new()));

        let server_requests = Arc::clone(&requests);
        let server_rules = Arc::clone(&rules);
        let server_tx = inbound_tx.clone();
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                let Ok(request) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                server_requests.lock().push(request.clone());

                let msg_type = request["type"].as_str().unwrap_or_default().to_string();
                let request_id = request["requestId"].clone();
                let response = match server_rules.lock().get(&msg_type) {
                    Some(Rule::Ignore) => None,
                    Some(Rule::Fail(code, message)) => Some(json!({
                        "type": "response",
                        "requestId": request_id,
                        "error": {"code": code, "message": message},
                    })),
                    Some(Rule::Reply(result)) => Some(json!({
                        "type": "response",
                        "requestId": request_id,
                        "result": result,
                    })),
                    None => Some(json!({
                        "type": "response",
                        "requestId": request_id,
                        "result": {},
                    })),
                };

                if let Some(response) = response {
                    if server_tx.send(response.to_string()).await.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            adapter,
            requests,
            rules,
            push_tx: inbound_tx,
        }
    }

    pub fn reply_with(&self, msg_type: &str, result: Value) {
        self.rules
            .lock()
            .insert(msg_type.to_string(), Rule::Reply(result));
    }

    pub fn fail_with(&self, msg_type: &str, code: i32, message: &str) {
        self.rules
            .lock()
            .insert(msg_type.to_string(), Rule::Fail(code, message.to_string()));
    }

    pub fn ignore(&self, msg_type: &str) {
        self.rules.lock().insert(msg_type.to_string(), Rule::Ignore);
    }

    /// Schickt ein Push-Event an den Adapter
    pub async fn push(&self, event: Value) {
        let _ = self.push_tx.send(event.to_string()).await;
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    pub fn requests_of(&self, msg_type: &str) -> Vec<Value> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r["type"] == msg_type)
            .cloned()
            .collect()
    }

    /// Trickle-Candidates in der Reihenfolge, in der sie ankamen
    pub fn trickled_candidates(&self) -> Vec<String> {
        self.requests_of("ice_trickle")
            .iter()
            .filter_map(|r| r["iceCandidate"].as_str())
            .filter_map(|json| IceCandidate::from_json(json).ok())
            .map(|c| c.candidate)
            .collect()
    }

    pub async fn wait_for_requests(&self, count: usize) {
        while self.requests.lock().len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}
