//! Wire protocol for the realtime transcription engine
//!
//! JSON messages exchanged with the engine over the WebSocket:
//!
//! 1. Connect, receive `session.created`
//! 2. Send `session.update` configuring continuous transcription
//! 3. Stream audio via `input_audio_buffer.append`
//! 4. Receive transcript `delta` / `completed` events as the engine's
//!    server-side turn detection segments utterances

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

/// Realtime engine endpoint
pub const REALTIME_API_URL: &str =
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17";

/// Session configuration for continuous dictation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Output modalities - text only for transcription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// Input audio format - "pcm16" for raw PCM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Transcription model settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionConfig>,

    /// Turn detection - server VAD segments utterances for us
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modalities: Some(vec!["text".to_string()]),
            input_audio_format: Some("pcm16".to_string()),
            input_audio_transcription: Some(TranscriptionConfig {
                model: "whisper-1".to_string(),
            }),
            turn_detection: Some(TurnDetection {
                detection_type: "server_vad".to_string(),
            }),
        }
    }
}

/// Transcription model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

/// Turn detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: String,
}

/// Session information returned by the engine
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub id: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub modalities: Vec<String>,
}

/// Error information from the engine
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", default)]
    pub error_type: String,

    #[serde(default)]
    pub code: Option<String>,

    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Client messages (sent TO the engine)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    /// Append audio data to the input buffer
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend {
        /// Base64-encoded PCM16 audio data
        audio: String,
    },
}

impl ClientMessage {
    /// Session update message with the continuous-dictation defaults
    pub fn session_update() -> Self {
        Self::SessionUpdate {
            session: SessionConfig::default(),
        }
    }

    /// Audio append message from raw PCM16 samples
    pub fn audio_append(samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|&s| s.to_le_bytes()).collect();

        Self::AudioAppend {
            audio: STANDARD.encode(&bytes),
        }
    }
}

// ============================================================================
// Server messages (received FROM the engine)
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionInfo },

    #[serde(rename = "error")]
    Error { error: ErrorInfo },

    /// Interim transcript fragment for the current utterance
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptDelta { delta: String },

    /// Authoritative transcript for the current utterance
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptCompleted { transcript: String },

    /// Server VAD detected the start of speech
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    /// Server VAD detected the end of speech
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    /// Catch-all so unknown message types don't fail deserialization
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            ServerMessage::SessionCreated { session } => Some(&session.id),
            ServerMessage::SessionUpdated { session } => Some(&session.id),
            _ => None,
        }
    }
}
