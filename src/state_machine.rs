//! Dictation state machine
//!
//! Single-writer pattern: all state transitions go through `reduce()`,
//! which returns the next state and a list of effects to execute. The
//! effect runner performs the work asynchronously and feeds completion
//! events back in.
//!
//! Each listening session carries a fresh id. Events from the
//! recognition engine and the microphone are tagged with the session
//! they belong to; events whose id does not match the current session
//! are dropped, so a late engine "end" from an already-stopped session
//! can never trigger a restart.

use std::sync::Arc;

use uuid::Uuid;

use crate::audio::AnalysisTap;
use crate::recognition::ResultEvent;

/// Listening phase, owned by the toggle controller. Transitions happen
/// on user action only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListeningState {
    #[default]
    Idle,
    Listening {
        session_id: Uuid,
    },
}

/// Authoritative controller state: the listening phase plus the
/// current best-guess transcript (interim or final, overwritten
/// wholesale on every recognition result).
#[derive(Debug, Clone, Default)]
pub struct DictationState {
    pub listening: ListeningState,
    pub transcript: String,
}

impl DictationState {
    pub fn is_listening(&self) -> bool {
        matches!(self.listening, ListeningState::Listening { .. })
    }

    /// Session id of the active listening session, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match &self.listening {
            ListeningState::Idle => None,
            ListeningState::Listening { session_id } => Some(*session_id),
        }
    }
}

/// Events that can trigger state transitions. Sent by the frontend,
/// the recognition session driver, and the microphone acquirer.
#[derive(Debug, Clone)]
pub enum Event {
    /// User pressed the microphone toggle
    Toggle,
    /// User requested stop (a no-op while idle)
    Stop,
    /// User asked to clear the transcript
    ClearTranscript,
    /// User asked to copy the transcript
    CopyTranscript,
    /// Application exit requested
    Exit,

    // Recognition session events
    RecognitionResult {
        id: Uuid,
        update: ResultEvent,
    },
    /// The engine ended the session on its own (not user-initiated)
    RecognitionEnded {
        id: Uuid,
    },
    RecognitionError {
        id: Uuid,
        err: String,
    },

    // Microphone events
    AudioReady {
        id: Uuid,
        tap: Arc<AnalysisTap>,
    },
    AudioUnavailable {
        id: Uuid,
        err: String,
    },
}

/// Effects to be executed after a state transition. `EmitUi` and
/// `AttachVisualization` are handled at the loop edge; the rest go to
/// the effect runner.
#[derive(Debug, Clone)]
pub enum Effect {
    StartRecognition {
        id: Uuid,
    },
    StopRecognition {
        id: Uuid,
    },
    AcquireAudio {
        id: Uuid,
    },
    ReleaseAudio {
        id: Uuid,
    },
    CopyToClipboard {
        text: String,
    },
    /// Hand the acquired analysis tap to the visualization loop
    AttachVisualization {
        tap: Arc<AnalysisTap>,
    },
    /// Publish the current state to the frontend
    EmitUi,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Rules:
/// - Never mutate state directly
/// - Drop events with stale session ids
/// - Emit `EmitUi` whenever the visible state changes
pub fn reduce(state: &DictationState, event: Event) -> (DictationState, Vec<Effect>) {
    use Effect::*;
    use Event::*;

    let current_id = state.session_id();
    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (&state.listening, event) {
        // -----------------
        // Toggle / Stop
        // -----------------
        (ListeningState::Idle, Toggle) => {
            let id = Uuid::new_v4();
            (
                DictationState {
                    listening: ListeningState::Listening { session_id: id },
                    transcript: String::new(),
                },
                // Recognition start is fire-and-forget; audio
                // acquisition resolves asynchronously via AudioReady.
                vec![StartRecognition { id }, AcquireAudio { id }, EmitUi],
            )
        }
        (ListeningState::Listening { session_id }, Toggle)
        | (ListeningState::Listening { session_id }, Stop) => {
            let id = *session_id;
            (
                DictationState {
                    listening: ListeningState::Idle,
                    transcript: state.transcript.clone(),
                },
                vec![StopRecognition { id }, ReleaseAudio { id }, EmitUi],
            )
        }
        (ListeningState::Idle, Stop) => (state.clone(), vec![]),

        // -----------------
        // Recognition events
        // -----------------
        (ListeningState::Listening { session_id }, RecognitionResult { id, update })
            if *session_id == id =>
        {
            (
                DictationState {
                    listening: state.listening.clone(),
                    transcript: update.collapse(),
                },
                vec![EmitUi],
            )
        }
        // The engine tends to end on its own after brief silence;
        // restart as long as this session is still listening.
        (ListeningState::Listening { session_id }, RecognitionEnded { id })
            if *session_id == id =>
        {
            log::info!("Recognition ended while listening, restarting session {}", id);
            (state.clone(), vec![StartRecognition { id }])
        }
        (ListeningState::Listening { session_id }, RecognitionError { id, err })
            if *session_id == id =>
        {
            log::error!("Recognition error, returning to idle: {}", err);
            (
                DictationState {
                    listening: ListeningState::Idle,
                    transcript: state.transcript.clone(),
                },
                vec![ReleaseAudio { id }, EmitUi],
            )
        }

        // -----------------
        // Microphone events
        // -----------------
        (ListeningState::Listening { session_id }, AudioReady { id, tap })
            if *session_id == id =>
        {
            (state.clone(), vec![AttachVisualization { tap }])
        }
        (ListeningState::Listening { session_id }, AudioUnavailable { id, err })
            if *session_id == id =>
        {
            // Visualization stays on the idle routine; recognition is
            // unaffected and keeps whatever audio it receives.
            log::warn!("Microphone unavailable, keeping idle visualization: {}", err);
            (state.clone(), vec![])
        }

        // -----------------
        // Transcript actions
        // -----------------
        (_, ClearTranscript) => (
            DictationState {
                listening: state.listening.clone(),
                transcript: String::new(),
            },
            vec![EmitUi],
        ),
        (_, CopyTranscript) => {
            if state.transcript.is_empty() {
                (state.clone(), vec![])
            } else {
                (
                    state.clone(),
                    vec![CopyToClipboard {
                        text: state.transcript.clone(),
                    }],
                )
            }
        }

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, RecognitionResult { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, RecognitionEnded { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, RecognitionError { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AudioReady { id, .. }) if is_stale(id) => (state.clone(), vec![]),
        (_, AudioUnavailable { id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
