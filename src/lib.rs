//! voicepad - live dictation with waveform visualization
//!
//! The core is a reducer state machine (`state_machine`) coordinating
//! three collaborators: microphone capture (`audio::capture`), the
//! waveform frame emitter (`audio::visualizer`), and the continuous
//! recognition session (`recognition`). The terminal frontend
//! (`terminal`) is a thin shell over events in and state out.

pub mod audio;
pub mod effects;
pub mod recognition;
pub mod settings;
pub mod state_machine;
pub mod terminal;
pub mod transcript;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use audio::{Visualizer, WaveformFrame};
use effects::{DictationEffectRunner, EffectRunner};
use state_machine::{reduce, DictationState, Effect, Event};

/// UI state published to the frontend.
#[derive(Debug, Clone, PartialEq)]
pub enum UiState {
    Idle { transcript: String },
    Listening { transcript: String },
}

fn state_to_ui(state: &DictationState) -> UiState {
    match state.listening {
        state_machine::ListeningState::Idle => UiState::Idle {
            transcript: state.transcript.clone(),
        },
        state_machine::ListeningState::Listening { .. } => UiState::Listening {
            transcript: state.transcript.clone(),
        },
    }
}

/// Run the main state loop: pump events through the reducer, execute
/// effects, drive the visualization routine, and publish UI state.
///
/// The visualizer switches routines on listening transitions: entering
/// or leaving listening restarts the idle chain, and the live chain
/// takes over once the microphone reports ready. A failed acquisition
/// therefore leaves the idle frames running.
pub async fn run_state_loop(
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    ui_tx: watch::Sender<UiState>,
    frames_tx: mpsc::Sender<WaveformFrame>,
) {
    let mut viz = Visualizer::new(frames_tx);
    viz.enter_idle();

    let mut state = DictationState::default();
    let _ = ui_tx.send(state_to_ui(&state));
    log::info!("State loop started");

    while let Some(event) = rx.recv().await {
        log::debug!("Received event: {:?}", event);

        // Handle Exit at the edge
        if matches!(event, Event::Exit) {
            log::info!("Exit requested, shutting down state loop");
            break;
        }

        let was_listening = state.is_listening();
        let (next, effects) = reduce(&state, event);

        if was_listening != next.is_listening() {
            log::info!(
                "Listening state: {} -> {}",
                if was_listening { "listening" } else { "idle" },
                if next.is_listening() { "listening" } else { "idle" }
            );
            // Tear down the current frame chain; the live routine
            // attaches when AudioReady delivers the tap.
            viz.enter_idle();
        }

        state = next;

        for effect in effects {
            match effect {
                Effect::EmitUi => {
                    if ui_tx.send(state_to_ui(&state)).is_err() {
                        log::warn!("UI receiver dropped");
                    }
                }
                Effect::AttachVisualization { tap } => viz.enter_live(tap),
                other => effect_runner.spawn(other, tx.clone()),
            }
        }
    }

    log::info!("State loop ended");
}

/// Application entry point: wire settings, channels, the effect
/// runner, and the terminal frontend, then run the state loop until
/// exit.
pub async fn run() {
    let settings = settings::load_or_init();
    log::info!(
        "Settings: provider={}, model={}, language={}",
        settings.api_provider,
        settings.model,
        settings.language
    );

    let (tx, rx) = mpsc::channel::<Event>(32);
    let (frames_tx, frames_rx) = mpsc::channel::<WaveformFrame>(8);
    let (ui_tx, ui_rx) = watch::channel(UiState::Idle {
        transcript: String::new(),
    });

    let effect_runner: Arc<dyn EffectRunner> = DictationEffectRunner::new();

    let input_task = tokio::spawn(terminal::run_input(tx.clone(), settings));
    let render_task = tokio::spawn(terminal::run_renderer(ui_rx, frames_rx));

    run_state_loop(rx, tx, effect_runner, ui_tx, frames_tx).await;

    input_task.abort();
    render_task.abort();
    println!();
}
