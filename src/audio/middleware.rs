//! Middleware des Audio Session Stores
//!
//! Alle Wiederherstellungs-Auslöser (Interruption-Ende, Berechtigung,
//! Stereo, Media-Services-Reset) laufen über den `RestartCoordinator`, der
//! mehrere Auslöser innerhalb eines Fensters zu einem Neustart zusammenfasst.

use super::action::AudioAction;
use super::state::{AudioCategory, AudioSessionState};
use super::AudioSessionNamespace;
use crate::store::{Dispatcher, Middleware, Step};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Events an den Aufrufer (Call-Lifecycle)
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSessionEvent {
    /// Die Route passt nicht mehr zur Lautsprecher-Einstellung des Anrufs
    SpeakerOnChanged { speaker_on: bool },
    RestartStarted,
}

// ============================================================================
// RESTART COORDINATOR
// ============================================================================

/// Debounce und Verwaltung der skriptgesteuerten Wiederherstellung
pub struct RestartCoordinator {
    debounce: Duration,
    step_delay: Duration,
    /// Offenes Debounce-Fenster
    pending: Mutex<Option<CancellationToken>>,
    /// Laufende Wiederherstellungssequenz auf der Queue
    in_flight: Mutex<Option<CancellationToken>>,
}

impl RestartCoordinator {
    pub fn new(debounce: Duration, step_delay: Duration) -> Self {
        Self {
            debounce,
            step_delay,
            pending: Mutex::new(None),
            in_flight: Mutex::new(None),
        }
    }

    /// Fordert einen Neustart an; ein schon offenes Fenster wird neu gestartet
    pub fn trigger(&self, dispatcher: &Dispatcher<AudioSessionNamespace>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.lock().replace(token.clone()) {
            previous.cancel();
        }

        let dispatcher = dispatcher.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(debounce) => {
                    if !token.is_cancelled() {
                        dispatcher.dispatch(AudioAction::RestartSession);
                    }
                }
            }
        });
        tracing::debug!("Audio session restart requested");
    }

    /// Bricht das offene Fenster und eine laufende Sequenz ab
    pub fn cancel(&self) {
        if let Some(token) = self.pending.lock().take() {
            token.cancel();
        }
        if let Some(token) = self.in_flight.lock().take() {
            token.cancel();
        }
    }

    /// Die Wiederherstellungssequenz für den aktuellen State
    pub fn recovery_steps(&self, state: &AudioSessionState) -> Vec<Step<AudioAction>> {
        let delay = Step::Delay(self.step_delay);
        let manage_activation = !state.telephony_managed;

        // Vom Telefonie-Stack aktiv gehalten: Audio darf nicht aus, nur neu konfigurieren
        if state.telephony_managed && state.is_active {
            return vec![AudioAction::ReapplyConfiguration.into()];
        }

        let mut steps = Vec::new();
        if manage_activation {
            steps.push(AudioAction::SetActive { value: false }.into());
            steps.push(delay.clone());
        }
        steps.push(AudioAction::SetAudioEnabled { value: false }.into());
        steps.push(delay.clone());
        steps.push(AudioAction::ReapplyConfiguration.into());

        if state.should_be_active {
            steps.push(delay.clone());
            steps.push(AudioAction::SetAudioEnabled { value: true }.into());
            if manage_activation {
                steps.push(delay);
                steps.push(AudioAction::SetActive { value: true }.into());
            }
        }
        steps
    }

    fn start(&self, state: &AudioSessionState, dispatcher: &Dispatcher<AudioSessionNamespace>) {
        let token = dispatcher.dispatch_sequence(self.recovery_steps(state));
        if let Some(previous) = self.in_flight.lock().replace(token) {
            previous.cancel();
        }
    }
}

// ============================================================================
// RESTART
// ============================================================================

/// Führt `RestartSession` als Sequenz auf der Queue aus
pub struct RestartMiddleware {
    coordinator: Arc<RestartCoordinator>,
    events: broadcast::Sender<AudioSessionEvent>,
}

impl RestartMiddleware {
    pub fn new(
        coordinator: Arc<RestartCoordinator>,
        events: broadcast::Sender<AudioSessionEvent>,
    ) -> Self {
        Self {
            coordinator,
            events,
        }
    }
}

impl Middleware<AudioSessionNamespace> for RestartMiddleware {
    fn apply(
        &self,
        state: &AudioSessionState,
        action: &AudioAction,
        dispatcher: &Dispatcher<AudioSessionNamespace>,
    ) -> anyhow::Result<()> {
        match action {
            AudioAction::RestartSession if state.is_interrupted => {
                tracing::info!("Skipping audio session restart while interrupted");
            }
            AudioAction::RestartSession => {
                tracing::info!(
                    "Restarting audio session (should be active: {})",
                    state.should_be_active
                );
                self.coordinator.start(state, dispatcher);
                let _ = self.events.send(AudioSessionEvent::RestartStarted);
            }
            AudioAction::MediaServicesReset => self.coordinator.trigger(dispatcher),
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// INTERRUPTION
// ============================================================================

pub struct InterruptionMiddleware {
    coordinator: Arc<RestartCoordinator>,
}

impl InterruptionMiddleware {
    pub fn new(coordinator: Arc<RestartCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl Middleware<AudioSessionNamespace> for InterruptionMiddleware {
    fn apply(
        &self,
        _state: &AudioSessionState,
        action: &AudioAction,
        dispatcher: &Dispatcher<AudioSessionNamespace>,
    ) -> anyhow::Result<()> {
        match action {
            AudioAction::SetInterrupted { value: true } => {
                tracing::info!("Audio session interruption began");
                self.coordinator.cancel();
            }
            AudioAction::InterruptionEnded { should_resume } => {
                tracing::info!("Audio session interruption ended (resume: {})", should_resume);
                if *should_resume {
                    self.coordinator.trigger(dispatcher);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

// ============================================================================
// RECORDING PERMISSION
// ============================================================================

pub struct PermissionMiddleware {
    coordinator: Arc<RestartCoordinator>,
}

impl PermissionMiddleware {
    pub fn new(coordinator: Arc<RestartCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl Middleware<AudioSessionNamespace> for PermissionMiddleware {
    fn apply(
        &self,
        state: &AudioSessionState,
        action: &AudioAction,
        dispatcher: &Dispatcher<AudioSessionNamespace>,
    ) -> anyhow::Result<()> {
        if let AudioAction::SetHasRecordingPermission { value: true } = action {
            // Nur die Änderung zählt, nicht jede Wiederholung
            if !state.has_recording_permission && state.should_record && state.is_active {
                tracing::info!("Recording permission granted, restarting audio session");
                self.coordinator.trigger(dispatcher);
            }
        }
        Ok(())
    }
}

// ============================================================================
// STEREO
// ============================================================================

pub struct StereoMiddleware {
    coordinator: Arc<RestartCoordinator>,
}

impl StereoMiddleware {
    pub fn new(coordinator: Arc<RestartCoordinator>) -> Self {
        Self { coordinator }
    }
}

impl Middleware<AudioSessionNamespace> for StereoMiddleware {
    fn apply(
        &self,
        state: &AudioSessionState,
        action: &AudioAction,
        dispatcher: &Dispatcher<AudioSessionNamespace>,
    ) -> anyhow::Result<()> {
        if let AudioAction::SetStereoPreferred { value } = action {
            if state.stereo.preferred == *value {
                return Ok(());
            }

            // Stereo nur über das eingebaute Mikrofon
            let enable = *value && !state.current_route.has_external_input();
            tracing::info!("Stereo capture preferred: {} (enabling: {})", value, enable);
            dispatcher.dispatch(AudioAction::SetStereoEnabled { value: enable });
            self.coordinator.trigger(dispatcher);
        }
        Ok(())
    }
}

// ============================================================================
// ROUTE CHANGE
// ============================================================================

pub struct RouteChangeMiddleware {
    events: broadcast::Sender<AudioSessionEvent>,
}

impl RouteChangeMiddleware {
    pub fn new(events: broadcast::Sender<AudioSessionEvent>) -> Self {
        Self { events }
    }
}

impl Middleware<AudioSessionNamespace> for RouteChangeMiddleware {
    fn apply(
        &self,
        state: &AudioSessionState,
        action: &AudioAction,
        dispatcher: &Dispatcher<AudioSessionNamespace>,
    ) -> anyhow::Result<()> {
        let AudioAction::RouteChanged {
            reason, current, ..
        } = action
        else {
            return Ok(());
        };

        tracing::debug!("Audio route changed ({:?}): {:?}", reason, current);

        let speaker_on = state.is_speaker_on();
        let mismatch = match (speaker_on, current.is_speaker()) {
            (true, false) => Some(false),
            (false, true) if state.configuration.category == AudioCategory::PlayAndRecord => {
                Some(true)
            }
            _ => None,
        };
        if let Some(speaker_on) = mismatch {
            tracing::warn!(
                "Audio route speaker state {} differs from session, notifying call",
                speaker_on
            );
            let _ = self
                .events
                .send(AudioSessionEvent::SpeakerOnChanged { speaker_on });
        }

        if state.stereo.enabled && current.has_external_input() {
            tracing::info!("External input route, disabling stereo capture");
            dispatcher.dispatch(AudioAction::SetStereoEnabled { value: false });
        }
        Ok(())
    }
}
