//! Continuous speech recognition
//!
//! Wraps the realtime transcription engine behind a WebSocket. The
//! engine runs in continuous mode: server-side turn detection segments
//! utterances, and each utterance produces a stream of interim deltas
//! followed by an authoritative completed transcript. The session
//! driver folds those wire events into result events for the state
//! machine.

pub mod protocol;
pub mod results;
pub mod session;

pub use results::{Hypothesis, ResultEvent, SegmentTracker};
pub use session::{get_api_key, run_session, SpeechEngine, ENGINE_SAMPLE_RATE};

/// Errors produced while talking to the recognition engine.
#[derive(Debug, Clone)]
pub enum RecognitionError {
    /// API key not configured in the environment
    MissingApiKey,
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// Authentication with the engine failed
    AuthenticationFailed(String),
    /// WebSocket protocol error
    ProtocolError(String),
    /// Connection was closed unexpectedly
    Disconnected(String),
    /// Failed to send audio data
    SendFailed(String),
}

impl std::fmt::Display for RecognitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecognitionError::MissingApiKey => {
                write!(
                    f,
                    "Recognition API key not configured. Set OPENAI_API_KEY in the environment."
                )
            }
            RecognitionError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to the recognition engine: {}", e)
            }
            RecognitionError::AuthenticationFailed(e) => {
                write!(f, "Authentication failed: {}", e)
            }
            RecognitionError::ProtocolError(e) => {
                write!(f, "WebSocket protocol error: {}", e)
            }
            RecognitionError::Disconnected(e) => {
                write!(f, "WebSocket disconnected: {}", e)
            }
            RecognitionError::SendFailed(e) => {
                write!(f, "Failed to send audio: {}", e)
            }
        }
    }
}

impl std::error::Error for RecognitionError {}
