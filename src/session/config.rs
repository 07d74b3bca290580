use std::time::Duration;

use crate::audio::MixPolicy;
use crate::transport::TransportKind;

/// Configuration for one capture session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier
    pub session_id: String,

    /// Microphone device id, platform default when absent.
    /// Used only as a selection key; never persisted.
    pub device_id: Option<String>,

    /// Sample rate the pipeline normalizes to before mixing/sending
    pub sample_rate: u32,

    /// Interval between outgoing chunks on the socket transport
    pub chunk_interval: Duration,

    /// Mixing policy for the combined stream
    pub mix_policy: MixPolicy,

    /// Selected transport strategy
    pub transport: TransportKind,

    /// Whether to run the spectrum analyzer on the combined stream
    pub visualize: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("session-{}", uuid::Uuid::new_v4()),
            device_id: None,
            sample_rate: 16000,
            chunk_interval: Duration::from_millis(1000),
            mix_policy: MixPolicy::Additive,
            transport: TransportKind::Socket,
            visualize: false,
        }
    }
}
