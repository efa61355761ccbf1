//! Terminal frontend
//!
//! Thin shell around the state machine: an input task mapping stdin
//! line commands to events, and a renderer combining listening status,
//! a waveform meter, and the progressively revealed transcript on one
//! status line.

use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};

use crate::audio::WaveformFrame;
use crate::settings::AppSettings;
use crate::state_machine::Event;
use crate::transcript::{reveal_schedule, WordReveal, WORD_REVEAL_STEP};
use crate::UiState;

const METER_WIDTH: usize = 24;
const METER_GLYPHS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Read line commands from stdin and translate them into events.
pub async fn run_input(events: mpsc::Sender<Event>, settings: AppSettings) {
    println!("voicepad - live dictation");
    println!("  enter  toggle listening");
    println!("  c      clear transcript");
    println!("  y      copy transcript");
    println!("  s      stop listening");
    println!("  q      quit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                let _ = events.send(Event::Exit).await;
                break;
            }
            Err(e) => {
                log::warn!("stdin read failed: {}", e);
                let _ = events.send(Event::Exit).await;
                break;
            }
        };

        let event = match line.trim() {
            "" | "t" | "toggle" => Some(Event::Toggle),
            "c" | "clear" => Some(Event::ClearTranscript),
            "y" | "copy" => Some(Event::CopyTranscript),
            "s" | "stop" => Some(Event::Stop),
            "q" | "quit" | "exit" => Some(Event::Exit),
            "settings" => {
                print_settings(&settings);
                None
            }
            other => {
                eprintln!("unknown command: {}", other);
                None
            }
        };

        let quit = matches!(event, Some(Event::Exit));
        if let Some(event) = event {
            if events.send(event).await.is_err() {
                break;
            }
        }
        if quit {
            break;
        }
    }
}

fn print_settings(settings: &AppSettings) {
    println!();
    println!("settings:");
    println!("  use api:        {}", settings.use_api);
    println!("  language:       {}", settings.language);
    println!("  temperature:    {}", settings.temperature);
    println!("  initial prompt: {}", settings.initial_prompt);
    println!("  provider:       {}", settings.api_provider);
    println!(
        "  api key:        {}",
        if settings.api_key.is_empty() {
            "(not set)"
        } else {
            "(set)"
        }
    );
    println!("  model:          {}", settings.model);
}

/// Draw the status line whenever the UI state, the waveform, or the
/// word reveal advances. Every transcript update restarts the reveal
/// from the first word.
pub async fn run_renderer(
    mut ui_rx: watch::Receiver<UiState>,
    mut frames_rx: mpsc::Receiver<WaveformFrame>,
) {
    let mut meter = " ".repeat(METER_WIDTH);
    let mut listening = false;
    let mut transcript = String::new();
    let mut schedule: Vec<WordReveal> = Vec::new();
    let mut shown = 0usize;
    let mut next_word_at: Option<Instant> = None;

    loop {
        let wake = next_word_at.unwrap_or_else(Instant::now);

        tokio::select! {
            changed = ui_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let ui = ui_rx.borrow_and_update().clone();
                let (now_listening, text) = match ui {
                    UiState::Idle { transcript } => (false, transcript),
                    UiState::Listening { transcript } => (true, transcript),
                };
                listening = now_listening;
                if text != transcript {
                    transcript = text;
                    schedule = reveal_schedule(&transcript);
                    shown = 0;
                    next_word_at = if schedule.is_empty() {
                        None
                    } else {
                        Some(Instant::now())
                    };
                }
            }

            frame = frames_rx.recv() => {
                match frame {
                    Some(frame) => meter = render_meter(&frame),
                    None => break,
                }
            }

            _ = sleep_until(wake), if next_word_at.is_some() => {
                shown += 1;
                next_word_at = if shown < schedule.len() {
                    Some(Instant::now() + WORD_REVEAL_STEP)
                } else {
                    None
                };
            }
        }

        redraw(listening, &meter, &schedule[..shown.min(schedule.len())]);
    }
}

/// Map a frame's polyline onto block glyphs.
fn render_meter(frame: &WaveformFrame) -> String {
    if frame.points.is_empty() {
        return " ".repeat(METER_WIDTH);
    }

    (0..METER_WIDTH)
        .map(|i| {
            let index = i * frame.points.len() / METER_WIDTH;
            let value = frame.points[index].abs().clamp(0.0, 1.0);
            let glyph = ((value * (METER_GLYPHS.len() - 1) as f32).round() as usize)
                .min(METER_GLYPHS.len() - 1);
            METER_GLYPHS[glyph]
        })
        .collect()
}

fn redraw(listening: bool, meter: &str, words: &[WordReveal]) {
    let status = if listening { "● listening" } else { "○ idle     " };

    let mut text = String::new();
    for reveal in words {
        text.push_str(&reveal.word);
        text.push(' ');
    }
    if text.is_empty() {
        text = if listening {
            "Listening...".to_string()
        } else {
            "Press Enter to start speaking".to_string()
        };
    }

    print!("\r\x1b[2K{} {} | {}", status, meter, text);
    let _ = io::stdout().flush();
}
