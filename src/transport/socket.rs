// Socket transport: one persistent WebSocket to the ingest backend.
//
// Outbound frames are raw PCM16 little-endian bytes (one binary message per
// chunk); inbound text frames are JSON transcript messages. Chunks offered
// while the socket is closed are dropped without buffering, and malformed
// inbound JSON is logged and dropped — neither ends the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::audio::{pcm, AudioFrame};
use crate::error::CaptureError;
use crate::transcript;

use super::{Transport, TransportFactory, TransportHandle, TransportKind};

/// Capacity of the inbound transcript-event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Factory for the socket transport
pub struct SocketTransportFactory {
    pub url: String,
}

#[async_trait]
impl TransportFactory for SocketTransportFactory {
    async fn connect(&self) -> Result<TransportHandle, CaptureError> {
        SocketTransport::connect(&self.url).await
    }
}

/// WebSocket transport to the audio ingest backend
pub struct SocketTransport {
    write: WsSink,
    open: Arc<AtomicBool>,
    reader_task: Option<JoinHandle<()>>,
}

impl SocketTransport {
    /// Open the connection and spawn the inbound reader.
    ///
    /// Connection failure is a `NegotiationFailed`: it aborts the start
    /// sequence like any other acquisition failure.
    pub async fn connect(url: &str) -> Result<TransportHandle, CaptureError> {
        info!("Connecting audio ingest socket: {}", url);

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

        let (write, mut read) = ws.split();
        let open = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let open_flag = Arc::clone(&open);
        let reader_task = tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => match transcript::parse_wire(&text) {
                        Ok(Some(event)) => {
                            if event_tx.send(event).await.is_err() {
                                debug!("Transcript consumer gone, reader stopping");
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Dropping malformed inbound message: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Ingest socket closed by server");
                        break;
                    }
                    Ok(_) => {} // binary/ping/pong from the server: ignored
                    Err(e) => {
                        warn!("Ingest socket error: {}", e);
                        break;
                    }
                }
            }
            open_flag.store(false, Ordering::SeqCst);
            debug!("Ingest socket reader exiting");
        });

        info!("Audio ingest socket connected");

        Ok(TransportHandle {
            transport: Box::new(Self {
                write,
                open,
                reader_task: Some(reader_task),
            }),
            events: event_rx,
        })
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send_audio(&mut self, frame: &AudioFrame) -> Result<(), CaptureError> {
        if !self.is_open() {
            warn!(
                "Socket not open, dropping chunk ({} samples)",
                frame.samples.len()
            );
            return Ok(());
        }

        let bytes = pcm::pcm16_to_le_bytes(&frame.samples);
        if let Err(e) = self.write.send(Message::Binary(bytes)).await {
            warn!("Chunk send failed, marking socket closed: {}", e);
            self.open.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        if let Some(task) = self.reader_task.take() {
            self.open.store(false, Ordering::SeqCst);
            if let Err(e) = self.write.send(Message::Close(None)).await {
                debug!("Close frame not delivered: {}", e);
            }
            let _ = self.write.close().await;
            task.abort();
            info!("Audio ingest socket closed");
        }
        Ok(())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        // The reader task holds the read half; make sure it never outlives
        // the transport even when close() was skipped.
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}
