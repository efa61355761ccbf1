//! Effect runner for the dictation state machine
//!
//! Executes the effects produced by `reduce()`: recognition session
//! drivers, microphone acquisition and release, and clipboard copies.
//! Completion events are sent back to the state loop via the provided
//! channel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use uuid::Uuid;

use crate::audio::capture::AudioCapture;
use crate::recognition::run_session;
use crate::state_machine::{Effect, Event};

/// Capacity of the capture-to-recognition sample feed, in batches.
const AUDIO_FEED_CAPACITY: usize = 64;

/// Trait for running effects asynchronously.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Handle to a running recognition session driver.
struct SessionHandle {
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

/// Real effect runner: engine sessions over the WebSocket, microphone
/// capture via cpal, clipboard via arboard.
pub struct DictationEffectRunner {
    /// Sample fan-out from the capture callback; each recognition run
    /// subscribes fresh, which is what makes restarts cheap.
    audio_feed: broadcast::Sender<Vec<i16>>,
    capture: Arc<Mutex<AudioCapture>>,
    sessions: Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
}

impl DictationEffectRunner {
    pub fn new() -> Arc<Self> {
        let (audio_feed, _) = broadcast::channel(AUDIO_FEED_CAPACITY);

        Arc::new(Self {
            capture: Arc::new(Mutex::new(AudioCapture::new(audio_feed.clone()))),
            audio_feed,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl EffectRunner for DictationEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::StartRecognition { id } => {
                // Subscribe before anything async so the session never
                // misses samples that arrive while it is connecting.
                let audio_rx = self.audio_feed.subscribe();
                let sessions = self.sessions.clone();

                tokio::spawn(async move {
                    let (stop_tx, stop_rx) = oneshot::channel();
                    let task = tokio::spawn(run_session(id, audio_rx, stop_rx, tx));

                    let mut guard = sessions.lock().await;
                    if let Some(previous) = guard.insert(
                        id,
                        SessionHandle {
                            stop: stop_tx,
                            task,
                        },
                    ) {
                        // Restart of the same listening session: the
                        // previous engine run already ended.
                        previous.task.abort();
                    }
                });
            }

            Effect::StopRecognition { id } => {
                let sessions = self.sessions.clone();

                tokio::spawn(async move {
                    let handle = sessions.lock().await.remove(&id);
                    match handle {
                        Some(handle) => {
                            // The driver disconnects gracefully and
                            // exits without reporting an engine end.
                            let _ = handle.stop.send(());
                        }
                        None => {
                            log::warn!("StopRecognition: no active session for id={}", id);
                        }
                    }
                });
            }

            Effect::AcquireAudio { id } => {
                let capture = self.capture.clone();

                tokio::spawn(async move {
                    let result = capture.lock().await.acquire().await;
                    match result {
                        Ok(tap) => {
                            let _ = tx.send(Event::AudioReady { id, tap }).await;
                        }
                        Err(e) => {
                            log::error!("Microphone unavailable: {}", e);
                            let _ = tx
                                .send(Event::AudioUnavailable {
                                    id,
                                    err: e.to_string(),
                                })
                                .await;
                        }
                    }
                });
            }

            Effect::ReleaseAudio { id } => {
                let capture = self.capture.clone();

                tokio::spawn(async move {
                    log::debug!("Releasing microphone for session {}", id);
                    capture.lock().await.release();
                });
            }

            Effect::CopyToClipboard { text } => {
                // arboard::Clipboard is not Send, so use a plain thread.
                // On Linux/X11 the clipboard must stay alive until
                // another app takes ownership of the contents.
                std::thread::spawn(move || {
                    let mut clipboard = match arboard::Clipboard::new() {
                        Ok(clipboard) => clipboard,
                        Err(e) => {
                            log::warn!("Clipboard access failed: {}", e);
                            return;
                        }
                    };

                    if let Err(e) = clipboard.set_text(&text) {
                        log::warn!("Clipboard set failed: {}", e);
                        return;
                    }

                    log::info!("Copied {} chars to clipboard", text.len());

                    #[cfg(target_os = "linux")]
                    {
                        use std::time::{Duration, Instant};
                        let start = Instant::now();
                        let timeout = Duration::from_secs(30);

                        while start.elapsed() < timeout {
                            std::thread::sleep(Duration::from_millis(100));
                            match clipboard.get_text() {
                                Ok(current) if current == text => {}
                                _ => {
                                    log::debug!("Clipboard ownership transferred");
                                    break;
                                }
                            }
                        }
                        log::debug!("Clipboard thread exiting after {:?}", start.elapsed());
                    }
                });
            }

            Effect::AttachVisualization { .. } | Effect::EmitUi => {
                unreachable!("handled in run_state_loop")
            }
        }
    }
}

/// Stub effect runner for tests: no devices, no network. Microphone
/// acquisition "succeeds" with an empty analysis tap after a short
/// delay; recognition events are injected by the test itself.
pub struct StubEffectRunner;

impl StubEffectRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl EffectRunner for StubEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::StartRecognition { id } => {
                log::info!("Stub: recognition started for session {}", id);
            }

            Effect::StopRecognition { id } => {
                log::info!("Stub: recognition stopped for session {}", id);
            }

            Effect::AcquireAudio { id } => {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    let tap = Arc::new(crate::audio::AnalysisTap::new());
                    let _ = tx.send(Event::AudioReady { id, tap }).await;
                });
            }

            Effect::ReleaseAudio { id } => {
                log::info!("Stub: microphone released for session {}", id);
            }

            Effect::CopyToClipboard { text } => {
                log::info!("Stub: would copy {} chars to clipboard", text.len());
            }

            Effect::AttachVisualization { .. } | Effect::EmitUi => {
                unreachable!("handled in run_state_loop")
            }
        }
    }
}
