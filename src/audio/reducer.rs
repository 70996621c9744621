//! Reducer des Audio Session Stores
//!
//! Wendet Konfigurationsbefehle auf die Hardware an und schreibt nur bei
//! Erfolg den neuen State. Schlägt ein Hardware-Aufruf fehl, bleibt der
//! letzte funktionierende Zustand erhalten.

use super::action::AudioAction;
use super::hardware::AudioHardware;
use super::state::{AudioCategory, AudioConfiguration, AudioSessionState, CategoryOptions, OutputPort};
use super::AudioSessionNamespace;
use crate::store::{Reducer, StoreError};
use std::sync::Arc;

pub struct AudioSessionReducer {
    hardware: Arc<dyn AudioHardware>,
}

impl AudioSessionReducer {
    pub fn new(hardware: Arc<dyn AudioHardware>) -> Self {
        Self { hardware }
    }

    fn apply_configuration(
        &self,
        state: &mut AudioSessionState,
        configuration: AudioConfiguration,
    ) -> Result<(), StoreError> {
        if state.configuration == configuration {
            return Ok(());
        }
        if !configuration.is_valid() {
            return Err(StoreError::ReducerFailed(format!(
                "Invalid audio configuration: {:?}",
                configuration
            )));
        }

        self.hardware.set_configuration(&configuration)?;
        state.configuration = configuration;
        Ok(())
    }

    fn apply_output_port(
        &self,
        state: &mut AudioSessionState,
        port: OutputPort,
    ) -> Result<(), StoreError> {
        if state.configuration.category == AudioCategory::PlayAndRecord {
            if state.override_output_port != port {
                self.hardware.override_output_port(port)?;
            }
        } else {
            // Außerhalb von playAndRecord gibt es keinen Override, nur die Option
            let mut configuration = state.configuration;
            match port {
                OutputPort::Speaker => configuration.options.insert(CategoryOptions::DEFAULT_TO_SPEAKER),
                OutputPort::None => configuration.options.remove(CategoryOptions::DEFAULT_TO_SPEAKER),
            }
            self.apply_configuration(state, configuration)?;
        }

        state.override_output_port = port;
        Ok(())
    }
}

impl Reducer<AudioSessionNamespace> for AudioSessionReducer {
    fn reduce(
        &self,
        mut state: AudioSessionState,
        action: &AudioAction,
    ) -> Result<AudioSessionState, StoreError> {
        match action {
            AudioAction::SetActive { value } => {
                if state.is_active != *value {
                    if state.telephony_managed {
                        return Err(StoreError::InvalidTransition(
                            "activation is owned by the telephony stack".into(),
                        ));
                    }
                    if *value && !state.is_audio_enabled {
                        return Err(StoreError::InvalidTransition(
                            "cannot activate while audio is disabled".into(),
                        ));
                    }
                    if *value && state.is_interrupted {
                        return Err(StoreError::InvalidTransition(
                            "cannot activate while interrupted".into(),
                        ));
                    }
                    self.hardware.set_active(*value)?;
                    state.is_active = *value;
                }
            }

            AudioAction::SetShouldBeActive { value } => state.should_be_active = *value,

            AudioAction::SetAudioEnabled { value } => {
                if state.is_audio_enabled != *value {
                    if !*value && state.is_active {
                        return Err(StoreError::InvalidTransition(
                            "cannot disable audio while active".into(),
                        ));
                    }
                    if *value && state.is_interrupted {
                        return Err(StoreError::InvalidTransition(
                            "cannot enable audio while interrupted".into(),
                        ));
                    }
                    self.hardware.set_audio_enabled(*value)?;
                    state.is_audio_enabled = *value;
                }
            }

            AudioAction::SetUseManualAudio { value } => {
                if state.use_manual_audio != *value {
                    self.hardware.set_use_manual_audio(*value)?;
                    state.use_manual_audio = *value;
                }
            }

            AudioAction::SetPrefersNoInterruptions { value } => {
                if state.prefers_no_interruptions != *value {
                    self.hardware.set_prefers_no_interruptions(*value)?;
                    state.prefers_no_interruptions = *value;
                }
            }

            AudioAction::SetCategory {
                category,
                mode,
                options,
            } => {
                let configuration = AudioConfiguration::new(*category, *mode, *options);
                self.apply_configuration(&mut state, configuration)?;
            }

            AudioAction::SetOverrideOutputPort { port } => {
                self.apply_output_port(&mut state, *port)?;
            }

            AudioAction::ReapplyConfiguration => {
                self.hardware.set_configuration(&state.configuration)?;
                if state.configuration.category == AudioCategory::PlayAndRecord
                    && state.override_output_port == OutputPort::Speaker
                {
                    self.hardware.override_output_port(OutputPort::Speaker)?;
                }
                if state.stereo.enabled {
                    self.hardware.set_stereo_input(state.orientation)?;
                }
            }

            AudioAction::SetInterrupted { value: true } => {
                if state.is_audio_enabled {
                    // Das System hat die Session bereits deaktiviert; ein
                    // Fehler beim Stoppen darf den Interrupt nicht verhindern.
                    if let Err(e) = self.hardware.set_audio_enabled(false) {
                        tracing::warn!("Failed to stop audio on interruption: {}", e);
                    }
                }
                state.is_interrupted = true;
                state.is_active = false;
                state.is_audio_enabled = false;
            }

            AudioAction::SetInterrupted { value: false }
            | AudioAction::InterruptionEnded { .. } => state.is_interrupted = false,

            AudioAction::SetHasRecordingPermission { value } => {
                state.has_recording_permission = *value
            }

            AudioAction::SetShouldRecord { value } => state.should_record = *value,

            AudioAction::RouteChanged { current, .. } => state.current_route = current.clone(),

            AudioAction::SetStereoPreferred { value } => state.stereo.preferred = *value,

            AudioAction::SetStereoEnabled { value } => {
                if state.stereo.enabled != *value {
                    if *value {
                        self.hardware.set_stereo_input(state.orientation)?;
                    } else {
                        self.hardware.restore_default_input()?;
                    }
                    state.stereo.enabled = *value;
                }
            }

            AudioAction::SetOrientation { orientation } => {
                if state.orientation != *orientation {
                    if state.stereo.enabled {
                        self.hardware.set_stereo_input(*orientation)?;
                    }
                    state.orientation = *orientation;
                }
            }

            AudioAction::SetTelephonyManaged { value } => state.telephony_managed = *value,

            AudioAction::TelephonyActivated => {
                if !state.is_audio_enabled {
                    self.hardware.set_audio_enabled(true)?;
                }
                state.is_interrupted = false;
                state.is_audio_enabled = true;
                state.is_active = true;
            }

            AudioAction::TelephonyDeactivated => state.is_active = false,

            AudioAction::MediaServicesLost => {
                state.is_active = false;
                state.is_audio_enabled = false;
            }

            AudioAction::MediaServicesReset | AudioAction::RestartSession => {}
        }

        if !state.is_consistent() {
            return Err(StoreError::InvalidTransition(format!(
                "{:?} would leave the session active with audio disabled",
                action
            )));
        }

        Ok(state)
    }
}

// ============================================================================
// TESTS
// ============================================================================
