//! Audio delivery to the transcription backend.
//!
//! One contract, two strategies: a plain bidirectional socket carrying
//! PCM16 chunks (socket), and a negotiated peer connection carrying raw
//! per-source tracks with a JSON side channel (realtime). Both deliver the
//! session's audio out and stream transcript events back; the session
//! selects one per deployment through `TransportFactory`.

pub mod realtime;
pub mod socket;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::AudioFrame;
use crate::error::CaptureError;
use crate::transcript::TranscriptEvent;

/// Transport strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Persistent socket, combined-stream chunks (Design A)
    Socket,
    /// Negotiated peer connection, raw per-source tracks (Design B)
    Realtime,
}

/// An open connection to the transcription backend.
///
/// `send_audio` performs a readiness check on every call: a chunk offered
/// while the connection is not open is dropped silently (reliability is an
/// explicit non-goal), never an error. `close` is idempotent.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    fn is_open(&self) -> bool;

    async fn send_audio(&mut self, frame: &AudioFrame) -> Result<(), CaptureError>;

    async fn close(&mut self) -> Result<(), CaptureError>;
}

/// A connected transport plus its inbound transcript-event stream
pub struct TransportHandle {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::Receiver<TranscriptEvent>,
}

/// Connects a transport for a starting session.
///
/// Any failure here aborts the whole start sequence; there is no retry.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self) -> Result<TransportHandle, CaptureError>;
}
