// Side-channel message types.
//
// JSON both directions: the client sends one `session.update` after the
// channel opens; the server streams conversation events, of which only
// finalized items carrying text become transcript entries.

use serde::{Deserialize, Serialize};

/// Voice-activity-detection parameters for the remote endpoint
#[derive(Debug, Clone, Serialize)]
pub struct VadConfig {
    /// Energy threshold for speech detection
    pub threshold: f32,
    /// Leading padding kept before detected speech, in milliseconds
    pub prefix_padding_ms: u32,
    /// Trailing silence that closes a turn, in milliseconds
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    /// The backend must transcribe only, never answer with speech
    pub create_response: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionModel {
    pub model: String,
}

/// Session configuration declared once per side channel
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeSessionConfig {
    pub modalities: Vec<String>,
    pub input_audio_format: String,
    pub input_audio_transcription: TranscriptionModel,
    pub turn_detection: TurnDetection,
}

impl RealtimeSessionConfig {
    /// Transcription-only configuration: text modality, PCM16 input,
    /// server-side VAD, automatic spoken responses disabled.
    pub fn transcription_only(model: &str, vad: &VadConfig) -> Self {
        Self {
            modalities: vec!["text".to_string()],
            input_audio_format: "pcm16".to_string(),
            input_audio_transcription: TranscriptionModel {
                model: model.to_string(),
            },
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
                threshold: vad.threshold,
                prefix_padding_ms: vad.prefix_padding_ms,
                silence_duration_ms: vad.silence_duration_ms,
                create_response: false,
            },
        }
    }
}

/// Messages sent to the backend over the side channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: RealtimeSessionConfig },
}

/// One content part of a conversation item
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

/// A conversational item created by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// Extract transcribed text when this item is actionable: finalized
    /// (completed, or with no status at all) and carrying text content.
    pub fn transcript_text(&self) -> Option<String> {
        match self.status.as_deref() {
            None | Some("completed") => {}
            Some(_) => return None,
        }

        let text: Vec<&str> = self
            .content
            .iter()
            .filter_map(|part| {
                part.text
                    .as_deref()
                    .or(part.transcript.as_deref())
                    .filter(|t| !t.is_empty())
            })
            .collect();

        if text.is_empty() {
            None
        } else {
            Some(text.join(" "))
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

/// Messages received from the backend over the side channel
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { item: ConversationItem },

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    /// Unhandled event types must never fail deserialization
    #[serde(other)]
    Unknown,
}
