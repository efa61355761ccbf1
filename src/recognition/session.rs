//! Engine connection and session driver
//!
//! `SpeechEngine` owns the WebSocket to the realtime transcription
//! engine: connect with bounded retries, configure continuous
//! dictation, then split into a send half (audio) and a receive half
//! (server events, pumped into a channel by a background task).
//!
//! `run_session` drives one engine run for one listening session: it
//! forwards audio chunks from the capture feed and folds transcript
//! events into result events for the state machine. The stop channel
//! makes a user-initiated stop exit without reporting an engine end,
//! so a late close can never race a stop into a restart.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::HeaderValue,
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

use super::protocol::{ClientMessage, ServerMessage, REALTIME_API_URL};
use super::results::SegmentTracker;
use super::RecognitionError;
use crate::state_machine::Event;

/// Sample rate the engine expects (PCM16 mono).
pub const ENGINE_SAMPLE_RATE: u32 = 24_000;

/// Audio is forwarded to the engine in chunks of this duration.
const CHUNK_DURATION_MS: usize = 100;

/// Samples per forwarded chunk at the engine rate.
const SAMPLES_PER_CHUNK: usize = ENGINE_SAMPLE_RATE as usize * CHUNK_DURATION_MS / 1000;

/// Timeout for the initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for session creation and configuration
const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum attempts for the initial connection
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff between attempts
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Get the recognition API key from the environment.
pub fn get_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

/// Handle to a connected engine session.
pub struct SpeechEngine {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    incoming_rx: Option<mpsc::Receiver<ServerMessage>>,
    engine_session_id: String,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl SpeechEngine {
    /// Connect to the engine, retrying with exponential backoff.
    pub async fn connect(api_key: &str) -> Result<Self, RecognitionError> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                log::info!(
                    "Retrying engine connection in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    MAX_RETRIES
                );
                tokio::time::sleep(delay).await;
            }

            match Self::try_connect(api_key).await {
                Ok(engine) => return Ok(engine),
                Err(e) => {
                    log::warn!("Engine connection attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RecognitionError::ConnectionFailed("Max retries exceeded".to_string())
        }))
    }

    /// Single connection attempt: handshake, wait for session.created,
    /// configure continuous dictation, wait for session.updated.
    async fn try_connect(api_key: &str) -> Result<Self, RecognitionError> {
        let mut request = REALTIME_API_URL
            .into_client_request()
            .map_err(|e| RecognitionError::ConnectionFailed(e.to_string()))?;

        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| RecognitionError::AuthenticationFailed(e.to_string()))?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        log::info!("Connecting to the recognition engine...");

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| RecognitionError::ConnectionFailed("Connection timeout".to_string()))?
        .map_err(|e| RecognitionError::ConnectionFailed(e.to_string()))?;

        let (write, mut read) = ws_stream.split();

        // The engine announces itself before accepting configuration.
        let engine_session_id = timeout(SESSION_TIMEOUT, async {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(ServerMessage::SessionCreated { session }) => {
                            log::info!("Engine session created: {}", session.id);
                            return Ok(session.id);
                        }
                        Ok(ServerMessage::Error { error }) => {
                            return Err(RecognitionError::AuthenticationFailed(error.message));
                        }
                        Ok(_) => {
                            log::debug!("Ignoring message while waiting for session.created");
                        }
                        Err(e) => {
                            log::warn!("Failed to parse engine message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        return Err(RecognitionError::Disconnected(
                            "Connection closed before session created".to_string(),
                        ));
                    }
                    Err(e) => {
                        return Err(RecognitionError::ProtocolError(e.to_string()));
                    }
                    _ => {}
                }
            }
            Err(RecognitionError::Disconnected("Stream ended".to_string()))
        })
        .await
        .map_err(|_| RecognitionError::ConnectionFailed("Session creation timeout".to_string()))??;

        let (incoming_tx, incoming_rx) = mpsc::channel(100);

        let receiver_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if incoming_tx.send(msg).await.is_err() {
                                log::debug!("Engine receiver channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to parse engine message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("WebSocket closed by the engine");
                        break;
                    }
                    Err(e) => {
                        log::warn!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            log::debug!("Engine receiver task exiting");
        });

        let mut engine = Self {
            write,
            incoming_rx: Some(incoming_rx),
            engine_session_id,
            receiver_task,
        };

        engine.configure().await?;

        Ok(engine)
    }

    /// Configure the session for continuous transcription and wait for
    /// the engine to confirm.
    async fn configure(&mut self) -> Result<(), RecognitionError> {
        self.send_message(&ClientMessage::session_update()).await?;

        let incoming_rx = self.incoming_rx.as_mut().ok_or_else(|| {
            RecognitionError::ProtocolError("Incoming receiver already taken".to_string())
        })?;

        match timeout(SESSION_TIMEOUT, async {
            while let Some(msg) = incoming_rx.recv().await {
                match msg {
                    ServerMessage::SessionUpdated { session } => {
                        log::info!("Engine session configured: {:?}", session.modalities);
                        return Ok(());
                    }
                    ServerMessage::Error { error } => {
                        return Err(RecognitionError::ProtocolError(error.message));
                    }
                    _ => {}
                }
            }
            Err(RecognitionError::Disconnected(
                "Channel closed during configuration".to_string(),
            ))
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RecognitionError::ConnectionFailed(
                "Session configuration timeout".to_string(),
            )),
        }
    }

    async fn send_message(&mut self, msg: &ClientMessage) -> Result<(), RecognitionError> {
        let json = serde_json::to_string(msg)
            .map_err(|e| RecognitionError::ProtocolError(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| RecognitionError::SendFailed(e.to_string()))
    }

    /// Send PCM16 mono samples at [`ENGINE_SAMPLE_RATE`].
    pub async fn send_audio(&mut self, samples: &[i16]) -> Result<(), RecognitionError> {
        self.send_message(&ClientMessage::audio_append(samples)).await
    }

    /// Take ownership of the incoming message receiver so server
    /// events can be consumed concurrently with audio sends.
    pub fn take_incoming_receiver(&mut self) -> Option<mpsc::Receiver<ServerMessage>> {
        self.incoming_rx.take()
    }

    /// Engine-assigned session id (distinct from the controller's).
    pub fn engine_session_id(&self) -> &str {
        &self.engine_session_id
    }

    /// Gracefully close the connection.
    pub async fn disconnect(mut self) {
        log::info!("Disconnecting from the recognition engine...");

        self.receiver_task.abort();

        if let Err(e) = self.write.close().await {
            log::warn!("Error closing WebSocket: {}", e);
        }
    }
}

impl Drop for SpeechEngine {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}

/// Drive one engine run for the listening session `id`.
///
/// Exits when:
/// - the stop channel fires (user stop; disconnects silently),
/// - the engine reports an error (`RecognitionError` event, no retry),
/// - the socket closes or a send fails (`RecognitionEnded` event; the
///   controller decides whether to restart).
pub async fn run_session(
    id: Uuid,
    mut audio_rx: broadcast::Receiver<Vec<i16>>,
    mut stop_rx: oneshot::Receiver<()>,
    events: mpsc::Sender<Event>,
) {
    let Some(api_key) = get_api_key() else {
        let _ = events
            .send(Event::RecognitionError {
                id,
                err: RecognitionError::MissingApiKey.to_string(),
            })
            .await;
        return;
    };

    let mut engine = match SpeechEngine::connect(&api_key).await {
        Ok(engine) => engine,
        Err(e) => {
            let _ = events
                .send(Event::RecognitionError {
                    id,
                    err: e.to_string(),
                })
                .await;
            return;
        }
    };

    log::info!(
        "Recognition running for session {} (engine session {})",
        id,
        engine.engine_session_id()
    );

    let Some(mut incoming) = engine.take_incoming_receiver() else {
        let _ = events
            .send(Event::RecognitionError {
                id,
                err: "Engine receiver unavailable".to_string(),
            })
            .await;
        return;
    };

    let mut tracker = SegmentTracker::new();
    let mut pending: Vec<i16> = Vec::with_capacity(SAMPLES_PER_CHUNK * 2);
    let mut audio_open = true;

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                log::debug!("Recognition session {} stopped by the controller", id);
                engine.disconnect().await;
                return;
            }

            chunk = audio_rx.recv(), if audio_open => match chunk {
                Ok(samples) => {
                    pending.extend(samples);
                    while pending.len() >= SAMPLES_PER_CHUNK {
                        let chunk: Vec<i16> = pending.drain(..SAMPLES_PER_CHUNK).collect();
                        if let Err(e) = engine.send_audio(&chunk).await {
                            log::warn!("Audio send failed, treating session as ended: {}", e);
                            let _ = events.send(Event::RecognitionEnded { id }).await;
                            return;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("Audio feed lagged, {} batches skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    log::debug!("Audio feed closed for session {}", id);
                    audio_open = false;
                }
            },

            msg = incoming.recv() => match msg {
                Some(ServerMessage::TranscriptDelta { delta }) => {
                    let update = tracker.apply_delta(&delta);
                    let _ = events.send(Event::RecognitionResult { id, update }).await;
                }
                Some(ServerMessage::TranscriptCompleted { transcript }) => {
                    let update = tracker.apply_completed(&transcript);
                    let _ = events.send(Event::RecognitionResult { id, update }).await;
                }
                Some(ServerMessage::Error { error }) => {
                    let _ = events
                        .send(Event::RecognitionError {
                            id,
                            err: error.message,
                        })
                        .await;
                    return;
                }
                Some(ServerMessage::SpeechStarted { .. }) => {
                    log::debug!("Engine detected speech start");
                }
                Some(ServerMessage::SpeechStopped { .. }) => {
                    log::debug!("Engine detected speech stop");
                }
                Some(_) => {}
                None => {
                    // Socket closed without a user stop: report an end
                    // and let the controller decide about restarting.
                    log::info!("Recognition session {} ended by the engine", id);
                    let _ = events.send(Event::RecognitionEnded { id }).await;
                    return;
                }
            }
        }
    }
}
