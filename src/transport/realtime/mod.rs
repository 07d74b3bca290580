//! Realtime peer transport (negotiated session).
//!
//! Connection flow:
//! 1. Fetch an ephemeral credential from the session-bootstrap endpoint
//! 2. Create the peer connection, attach both raw audio tracks, open the
//!    `oai-events` side channel
//! 3. On side-channel open, send one `session.update` configuration
//! 4. Offer/answer exchange against the negotiation endpoint (bearer auth,
//!    `application/sdp`)
//! 5. Transcript events arrive as `conversation.item.created` side-channel
//!    messages; any inbound remote audio track is ignored

mod bootstrap;
mod events;
mod peer;
mod sdp;

pub use bootstrap::fetch_ephemeral_credential;
pub use events::{ClientEvent, ConversationItem, RealtimeSessionConfig, ServerEvent, VadConfig};
pub use peer::{RealtimePeerFactory, RealtimePeerTransport};
pub use sdp::{negotiate, negotiation_url};

/// Endpoints and model selection for one realtime deployment
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Session-bootstrap endpoint serving ephemeral credentials
    pub bootstrap_url: String,
    /// Negotiation endpoint base URL
    pub base_url: String,
    /// Transcription model requested in negotiation and configuration
    pub model: String,
    /// Voice-activity-detection parameters sent in `session.update`
    pub vad: VadConfig,
}
