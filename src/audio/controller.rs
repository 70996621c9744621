//! Audio Session Controller
//!
//! Besitzt den Audio Session Store eines Anrufs und übersetzt
//! Call-Intent, Hardware- und Telefonie-Events in Actions.

use super::action::AudioAction;
use super::hardware::{AudioHardware, HardwareEvent, TelephonyEvent};
use super::middleware::{
    AudioSessionEvent, InterruptionMiddleware, PermissionMiddleware, RestartCoordinator,
    RestartMiddleware, RouteChangeMiddleware, StereoMiddleware,
};
use super::policy::{
    AudioSessionConfiguration, AudioSessionPolicy, CallSettings, DefaultAudioSessionPolicy,
    OwnCapability,
};
use super::reducer::AudioSessionReducer;
use super::state::{AudioCategory, AudioConfiguration, AudioSessionState, DeviceOrientation};
use super::AudioSessionNamespace;
use crate::config::AudioConfig;
use crate::store::{Dispatcher, Step, Store};
use futures::stream::{BoxStream, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Ein Wert des Call-Intent-Streams
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallAudioIntent {
    pub settings: CallSettings,
    pub own_capabilities: HashSet<OwnCapability>,
}

impl CallAudioIntent {
    pub fn new(settings: CallSettings, own_capabilities: HashSet<OwnCapability>) -> Self {
        Self {
            settings,
            own_capabilities,
        }
    }
}

struct Inner {
    store: Store<AudioSessionNamespace>,
    hardware: Arc<dyn AudioHardware>,
    restarts: Arc<RestartCoordinator>,
    policy: RwLock<Arc<dyn AudioSessionPolicy>>,
    last_intent: Mutex<Option<CallAudioIntent>>,
    last_applied: Mutex<Option<AudioSessionConfiguration>>,
    events: broadcast::Sender<AudioSessionEvent>,
}

/// Controller der Geräte-Audio-Session für genau einen Anruf
pub struct AudioSessionController {
    inner: Arc<Inner>,
    intent_pump: Mutex<Option<CancellationToken>>,
}

impl AudioSessionController {
    /// Erstellt den Store und setzt die Anfangskonfiguration
    ///
    /// Muss innerhalb einer Tokio-Runtime aufgerufen werden.
    pub fn new(hardware: Arc<dyn AudioHardware>, config: &AudioConfig) -> Self {
        let snapshot = hardware.snapshot();
        let (events, _) = broadcast::channel(100);
        let restarts = Arc::new(RestartCoordinator::new(
            config.restart_debounce(),
            config.restart_step_delay(),
        ));

        let initial = AudioSessionState {
            configuration: snapshot.configuration,
            current_route: snapshot.route,
            has_recording_permission: snapshot.has_recording_permission,
            telephony_managed: config.telephony_managed,
            ..Default::default()
        };

        let store = Store::builder(initial)
            .middleware(InterruptionMiddleware::new(restarts.clone()))
            .middleware(PermissionMiddleware::new(restarts.clone()))
            .middleware(StereoMiddleware::new(restarts.clone()))
            .middleware(RouteChangeMiddleware::new(events.clone()))
            .middleware(RestartMiddleware::new(restarts.clone(), events.clone()))
            .reducer(AudioSessionReducer::new(hardware.clone()))
            .build();

        store.dispatch(AudioAction::SetPrefersNoInterruptions { value: true });
        store.dispatch(AudioAction::SetUseManualAudio { value: true });
        store.dispatch(AudioAction::SetAudioEnabled { value: false });
        if snapshot.configuration.category != AudioCategory::PlayAndRecord {
            store.dispatch(AudioAction::set_configuration(
                AudioConfiguration::voice_chat(),
            ));
        }

        tracing::info!(
            "Audio session controller created (telephony managed: {})",
            config.telephony_managed
        );

        Self {
            inner: Arc::new(Inner {
                store,
                hardware,
                restarts,
                policy: RwLock::new(Arc::new(DefaultAudioSessionPolicy)),
                last_intent: Mutex::new(None),
                last_applied: Mutex::new(None),
                events,
            }),
            intent_pump: Mutex::new(None),
        }
    }

    // ========================================================================
    // OBSERVATION
    // ========================================================================

    pub fn state(&self) -> AudioSessionState {
        self.inner.store.state()
    }

    pub fn dispatcher(&self) -> Dispatcher<AudioSessionNamespace> {
        self.inner.store.dispatcher()
    }

    pub fn subscribe(&self) -> BoxStream<'static, AudioSessionState> {
        self.inner.store.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<AudioSessionEvent> {
        self.inner.events.subscribe()
    }

    // ========================================================================
    // CALL INTENT
    // ========================================================================

    /// Folgt dem Call-Intent, bis `deactivate` oder `close` aufgerufen wird
    pub fn activate<S>(&self, intents: S)
    where
        S: Stream<Item = CallAudioIntent> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.intent_pump.lock().replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let mut intents = Box::pin(intents);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    intent = intents.next() => match intent {
                        Some(intent) => inner.apply_intent(intent),
                        None => break,
                    },
                }
            }
            tracing::debug!("Audio intent pump stopped");
        });
    }

    /// Beendet die Session und stellt das Standard-Mikrofon wieder her
    pub fn deactivate(&self) {
        if let Some(token) = self.intent_pump.lock().take() {
            token.cancel();
        }
        self.inner.restarts.cancel();
        self.inner.last_applied.lock().take();

        let mut steps: Vec<Step<AudioAction>> =
            vec![AudioAction::SetShouldBeActive { value: false }.into()];
        if !self.state().telephony_managed {
            steps.push(AudioAction::SetActive { value: false }.into());
        }
        steps.push(AudioAction::SetAudioEnabled { value: false }.into());
        steps.push(AudioAction::SetStereoEnabled { value: false }.into());
        self.inner.store.dispatch_sequence(steps);

        tracing::info!("Audio session deactivated");
    }

    /// Tauscht die Policy und wendet den letzten Intent neu an
    pub fn update_policy(&self, policy: Arc<dyn AudioSessionPolicy>) {
        tracing::info!("Audio session policy updated: {:?}", policy);
        *self.inner.policy.write() = policy;
        self.inner.last_applied.lock().take();

        let intent = self.inner.last_intent.lock().clone();
        if let Some(intent) = intent {
            self.inner.apply_intent(intent);
        }
    }

    // ========================================================================
    // HARDWARE / TELEPHONY
    // ========================================================================

    pub fn handle_hardware_event(&self, event: HardwareEvent) {
        if event == HardwareEvent::InterruptionBegan {
            // Eine laufende Sequenz blockiert die Queue; daher hier abbrechen
            self.inner.restarts.cancel();
        }
        self.inner.store.dispatch(event.into());
    }

    pub fn handle_telephony_event(&self, event: TelephonyEvent) {
        tracing::info!("Telephony event: {:?}", event);
        self.inner.store.dispatch(event.into());
    }

    pub fn set_telephony_managed(&self, value: bool) {
        self.inner
            .store
            .dispatch(AudioAction::SetTelephonyManaged { value });
    }

    pub fn set_stereo_preferred(&self, value: bool) {
        self.inner
            .store
            .dispatch(AudioAction::SetStereoPreferred { value });
    }

    pub fn set_orientation(&self, orientation: DeviceOrientation) {
        self.inner
            .store
            .dispatch(AudioAction::SetOrientation { orientation });
    }

    /// Fragt die Aufnahmeberechtigung an und meldet das Ergebnis sofort
    pub async fn request_recording_permission(&self) -> bool {
        if self.state().has_recording_permission {
            return true;
        }

        let granted = self.inner.hardware.request_record_permission().await;
        tracing::info!("Recording permission granted: {}", granted);
        self.inner
            .store
            .dispatch(AudioAction::SetHasRecordingPermission { value: granted });
        granted
    }

    /// Gibt Hardware und Store frei
    pub fn close(&self) {
        if let Some(token) = self.intent_pump.lock().take() {
            token.cancel();
        }
        self.inner.restarts.cancel();
        self.inner.store.close();
    }
}

impl Drop for AudioSessionController {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    fn apply_intent(&self, intent: CallAudioIntent) {
        let policy = self.policy.read().clone();
        let target = policy.configuration(&intent.settings, &intent.own_capabilities);
        *self.last_intent.lock() = Some(intent.clone());

        let should_record =
            target.category == AudioCategory::PlayAndRecord && intent.settings.audio_on;
        self.store
            .dispatch(AudioAction::SetShouldRecord { value: should_record });

        {
            let mut last_applied = self.last_applied.lock();
            if last_applied.as_ref() == Some(&target) {
                return;
            }
            *last_applied = Some(target);
        }

        tracing::debug!("Applying audio configuration: {:?}", target);

        self.store.dispatch(AudioAction::set_configuration(AudioConfiguration::new(
            target.category,
            target.mode,
            target.options,
        )));
        if let Some(port) = target.override_output_port {
            self.store
                .dispatch(AudioAction::SetOverrideOutputPort { port });
        }

        let telephony_managed = self.store.state().telephony_managed;
        let steps: Vec<Step<AudioAction>> = if target.is_active {
            let mut steps = vec![
                AudioAction::SetShouldBeActive { value: true }.into(),
                AudioAction::SetAudioEnabled { value: true }.into(),
            ];
            if !telephony_managed {
                steps.push(AudioAction::SetActive { value: true }.into());
            }
            steps
        } else {
            let mut steps = vec![AudioAction::SetShouldBeActive { value: false }.into()];
            if !telephony_managed {
                steps.push(AudioAction::SetActive { value: false }.into());
            }
            steps.push(AudioAction::SetAudioEnabled { value: false }.into());
            steps
        };
        self.store.dispatch_sequence(steps);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::policy::OwnCapabilitiesAudioSessionPolicy;
    use crate::audio::state::{AudioRoute, OutputPort, Port, PortType, RouteChangeReason};
    use crate::test_support::{FakeAudioHardware, HardwareCall};
    use proptest::prelude::*;
    use std::time::Duration;

    fn config() -> AudioConfig {
        AudioConfig::default()
    }

    fn intent(speaker_on: bool) -> CallAudioIntent {
        CallAudioIntent::new(
            CallSettings {
                speaker_on,
                ..Default::default()
            },
            HashSet::from([OwnCapability::SendAudio]),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    fn controller(hardware: &Arc<FakeAudioHardware>) -> AudioSessionController {
        AudioSessionController::new(hardware.clone(), &config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_configuration() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        settle().await;

        let state = controller.state();
        assert!(state.prefers_no_interruptions);
        assert!(state.use_manual_audio);
        assert!(!state.is_audio_enabled);
        assert_eq!(state.configuration, AudioConfiguration::voice_chat());
        assert_eq!(
            hardware.calls(),
            vec![
                HardwareCall::SetPrefersNoInterruptions(true),
                HardwareCall::SetUseManualAudio(true),
                HardwareCall::SetConfiguration(AudioConfiguration::voice_chat()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_follows_intent() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);

        controller.activate(futures::stream::iter(vec![intent(false), intent(true)]));
        settle().await;

        let state = controller.state();
        assert!(state.is_active);
        assert!(state.is_audio_enabled);
        assert!(state.should_record);
        assert_eq!(state.override_output_port, OutputPort::Speaker);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruption_with_resume_restores_session() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        controller.activate(futures::stream::iter(vec![intent(false)]));
        settle().await;
        assert!(controller.state().is_active);

        controller.handle_hardware_event(HardwareEvent::InterruptionBegan);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let state = controller.state();
        assert!(state.is_interrupted);
        assert!(!state.is_audio_enabled);

        controller.handle_hardware_event(HardwareEvent::InterruptionEnded {
            should_resume: true,
        });
        settle().await;

        let state = controller.state();
        assert!(!state.is_interrupted);
        assert!(state.is_active);
        assert!(state.is_audio_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_triggers_are_debounced() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        let mut events = controller.events();
        controller.activate(futures::stream::iter(vec![intent(false)]));
        settle().await;

        let dispatcher = controller.dispatcher();
        dispatcher.dispatch(AudioAction::SetHasRecordingPermission { value: false });
        dispatcher.dispatch(AudioAction::SetHasRecordingPermission { value: true });
        dispatcher.dispatch(AudioAction::SetHasRecordingPermission { value: false });
        dispatcher.dispatch(AudioAction::SetHasRecordingPermission { value: true });
        settle().await;

        let mut restarts = 0;
        while let Ok(event) = events.try_recv() {
            if event == AudioSessionEvent::RestartStarted {
                restarts += 1;
            }
        }
        assert_eq!(restarts, 1);
        assert!(controller.state().is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_without_recording_intent_does_not_restart() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        let mut events = controller.events();
        settle().await;

        controller
            .dispatcher()
            .dispatch(AudioAction::SetHasRecordingPermission { value: true });
        settle().await;

        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_permission_short_circuits_when_granted() {
        let hardware = Arc::new(FakeAudioHardware::default());
        hardware.set_permission_answer(true);
        let controller = controller(&hardware);

        assert!(controller.request_recording_permission().await);
        settle().await;
        assert!(controller.state().has_recording_permission);

        assert!(controller.request_recording_permission().await);
        assert_eq!(hardware.permission_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telephony_managed_session_never_calls_set_active() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = AudioSessionController::new(
            hardware.clone(),
            &AudioConfig {
                telephony_managed: true,
                ..config()
            },
        );

        controller.activate(futures::stream::iter(vec![intent(false)]));
        controller.handle_telephony_event(TelephonyEvent::Activated);
        settle().await;
        assert!(controller.state().is_active);

        controller.handle_telephony_event(TelephonyEvent::Deactivated);
        settle().await;
        assert!(!controller.state().is_active);

        assert!(hardware
            .calls()
            .iter()
            .all(|call| !matches!(call, HardwareCall::SetActive(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_restores_default_input() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        controller.activate(futures::stream::iter(vec![intent(false)]));
        controller.set_stereo_preferred(true);
        settle().await;
        assert!(controller.state().stereo.enabled);

        controller.deactivate();
        settle().await;

        let state = controller.state();
        assert!(!state.is_active);
        assert!(!state.is_audio_enabled);
        assert!(!state.stereo.enabled);
        assert_eq!(
            hardware.calls().last(),
            Some(&HardwareCall::RestoreDefaultInput)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_change_reports_speaker_mismatch() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        let mut events = controller.events();
        controller.activate(futures::stream::iter(vec![intent(true)]));
        settle().await;

        let headphones = AudioRoute::new(
            vec![Port::new(PortType::HeadsetMic, "Headset")],
            vec![Port::new(PortType::Headphones, "Headset")],
        );
        controller.handle_hardware_event(HardwareEvent::RouteChanged {
            reason: RouteChangeReason::NewDeviceAvailable,
            previous: AudioRoute::default(),
            current: headphones,
        });
        settle().await;

        assert_eq!(
            events.try_recv().unwrap(),
            AudioSessionEvent::SpeakerOnChanged { speaker_on: false }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_policy_reapplies_last_intent() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        let muted = CallAudioIntent::new(
            CallSettings {
                audio_on: false,
                ..Default::default()
            },
            HashSet::from([OwnCapability::SendAudio]),
        );
        controller.activate(futures::stream::iter(vec![muted]));
        settle().await;
        assert_eq!(
            controller.state().configuration.category,
            AudioCategory::PlayAndRecord
        );

        controller.update_policy(Arc::new(OwnCapabilitiesAudioSessionPolicy::default()));
        settle().await;

        assert_eq!(
            controller.state().configuration.category,
            AudioCategory::Playback
        );
    }

    fn drain_restarts(events: &mut broadcast::Receiver<AudioSessionEvent>) -> usize {
        let mut restarts = 0;
        while let Ok(event) = events.try_recv() {
            if event == AudioSessionEvent::RestartStarted {
                restarts += 1;
            }
        }
        restarts
    }

    fn position(calls: &[HardwareCall], predicate: impl Fn(&HardwareCall) -> bool) -> Option<usize> {
        calls.iter().position(predicate)
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_restart_reconfigures_telephony_session() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = AudioSessionController::new(
            hardware.clone(),
            &AudioConfig {
                telephony_managed: true,
                ..config()
            },
        );
        let mut events = controller.events();
        controller.activate(futures::stream::iter(vec![intent(false)]));
        controller.handle_telephony_event(TelephonyEvent::Activated);
        settle().await;
        let before = hardware.calls().len();

        controller
            .dispatcher()
            .dispatch(AudioAction::SetHasRecordingPermission { value: true });
        settle().await;

        assert_eq!(drain_restarts(&mut events), 1);
        let calls = hardware.calls()[before..].to_vec();
        assert!(calls
            .iter()
            .any(|call| matches!(call, HardwareCall::SetConfiguration(_))));
        assert!(calls
            .iter()
            .all(|call| !matches!(call, HardwareCall::SetActive(_) | HardwareCall::SetAudioEnabled(false))));

        let state = controller.state();
        assert!(state.is_active);
        assert!(state.is_audio_enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stereo_toggle_restarts_once_and_restores_input_first() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        let mut events = controller.events();
        controller.activate(futures::stream::iter(vec![intent(false)]));
        settle().await;
        assert_eq!(drain_restarts(&mut events), 0);

        controller.set_stereo_preferred(true);
        settle().await;
        assert_eq!(drain_restarts(&mut events), 1);
        assert!(controller.state().stereo.enabled);
        assert!(hardware
            .calls()
            .iter()
            .any(|call| matches!(call, HardwareCall::SetStereoInput(_))));

        let before = hardware.calls().len();
        controller.set_stereo_preferred(false);
        settle().await;
        assert_eq!(drain_restarts(&mut events), 1);

        let calls = hardware.calls()[before..].to_vec();
        let restored = position(&calls, |call| *call == HardwareCall::RestoreDefaultInput);
        let reapplied = position(&calls, |call| matches!(call, HardwareCall::SetConfiguration(_)));
        assert!(restored.is_some());
        assert!(reapplied.is_some());
        assert!(restored < reapplied);
        assert!(calls
            .iter()
            .all(|call| !matches!(call, HardwareCall::SetStereoInput(_))));

        let state = controller.state();
        assert!(!state.stereo.enabled);
        assert!(state.is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_services_reset_recovers_session() {
        let hardware = Arc::new(FakeAudioHardware::default());
        let controller = controller(&hardware);
        let mut events = controller.events();
        controller.activate(futures::stream::iter(vec![intent(false)]));
        settle().await;
        let before = hardware.calls().len();

        controller.handle_hardware_event(HardwareEvent::MediaServicesLost);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!controller.state().is_active);

        controller.handle_hardware_event(HardwareEvent::MediaServicesReset);
        settle().await;

        assert_eq!(drain_restarts(&mut events), 1);
        let calls = hardware.calls()[before..].to_vec();
        let reapplied = position(&calls, |call| matches!(call, HardwareCall::SetConfiguration(_)));
        let activated = position(&calls, |call| *call == HardwareCall::SetActive(true));
        assert!(reapplied.is_some());
        assert!(reapplied < activated);

        let state = controller.state();
        assert!(state.is_active);
        assert!(state.is_audio_enabled);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_interruptions_restore_pre_interruption_activity(
            active in any::<bool>(),
            interruptions in prop::collection::vec(any::<bool>(), 1..6),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .unwrap();

            runtime.block_on(async move {
                let hardware = Arc::new(FakeAudioHardware::default());
                let controller = controller(&hardware);
                let mut states = controller.subscribe();

                let settings = CallSettings {
                    audio_output_on: active,
                    ..Default::default()
                };
                controller.activate(futures::stream::iter(vec![CallAudioIntent::new(
                    settings,
                    HashSet::from([OwnCapability::SendAudio]),
                )]));
                settle().await;

                for quick in interruptions {
                    controller.handle_hardware_event(HardwareEvent::InterruptionBegan);
                    if quick {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    } else {
                        settle().await;
                    }
                    controller.handle_hardware_event(HardwareEvent::InterruptionEnded {
                        should_resume: true,
                    });
                    if !quick {
                        settle().await;
                    }
                }
                settle().await;

                let state = controller.state();
                assert_eq!(state.is_active, active);
                assert_eq!(state.is_audio_enabled, state.is_active);

                controller.close();
                while let Some(state) = states.next().await {
                    assert!(state.is_consistent(), "{:?}", state);
                }
            });
        }
    }
}
