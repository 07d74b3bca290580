use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether capture is currently active
    pub is_recording: bool,

    /// When the current (or last) recording started
    pub started_at: Option<DateTime<Utc>>,

    /// Recording duration in seconds
    pub duration_secs: f64,

    /// Number of audio chunks delivered to the transport
    pub chunks_sent: usize,

    /// Number of transcript entries received
    pub transcript_entries: usize,
}
