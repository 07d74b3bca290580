// Peer transport: raw per-source tracks plus the `oai-events` side channel.
//
// The remote service does its own mixing/diarization, so the mic and
// system tracks go up unmixed; local mixing stays visualizer-only in this
// design. The side-channel configuration is sent from the open callback
// and nowhere else, so it can never precede the open event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::audio::{pcm, AudioFrame, AudioStreamSource};
use crate::error::CaptureError;
use crate::transcript::TranscriptEvent;
use crate::transport::{Transport, TransportFactory, TransportHandle, TransportKind};

use super::events::{ClientEvent, RealtimeSessionConfig, ServerEvent};
use super::{bootstrap, sdp, RealtimeConfig};

/// Capacity of the inbound transcript-event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Track payload clock rate (G.711 PCMU)
const TRACK_SAMPLE_RATE: u32 = 8000;

/// Factory for the realtime peer transport
pub struct RealtimePeerFactory {
    pub config: RealtimeConfig,
}

#[async_trait]
impl TransportFactory for RealtimePeerFactory {
    async fn connect(&self) -> Result<TransportHandle, CaptureError> {
        RealtimePeerTransport::connect(&self.config).await
    }
}

/// Negotiated peer connection to the realtime transcription service
pub struct RealtimePeerTransport {
    peer: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    mic_track: Arc<TrackLocalStaticSample>,
    system_track: Arc<TrackLocalStaticSample>,
    connected: Arc<AtomicBool>,
    closed: bool,
}

impl RealtimePeerTransport {
    /// Run the whole connection flow; any failure tears down whatever was
    /// already built and surfaces a `NegotiationFailed`.
    pub async fn connect(config: &RealtimeConfig) -> Result<TransportHandle, CaptureError> {
        let http = reqwest::Client::new();
        let credential = bootstrap::fetch_ephemeral_credential(&http, &config.bootstrap_url).await?;

        let peer = new_peer_connection().await?;

        match Self::negotiate_session(&peer, &http, &credential, config).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                // Rollback: the peer connection is the only resource held
                if let Err(close_err) = peer.close().await {
                    warn!("Peer rollback close failed: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn negotiate_session(
        peer: &Arc<RTCPeerConnection>,
        http: &reqwest::Client,
        credential: &str,
        config: &RealtimeConfig,
    ) -> Result<TransportHandle, CaptureError> {
        let connected = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let state_flag = Arc::clone(&connected);
        peer.on_peer_connection_state_change(Box::new(move |state| {
            match state {
                RTCPeerConnectionState::Connected => {
                    info!("Peer connection established");
                    state_flag.store(true, Ordering::SeqCst);
                }
                RTCPeerConnectionState::Disconnected
                | RTCPeerConnectionState::Failed
                | RTCPeerConnectionState::Closed => {
                    state_flag.store(false, Ordering::SeqCst);
                }
                _ => {}
            }
            Box::pin(async {})
        }));

        // Inbound remote audio (the service speaking back) is optional and
        // never required for transcript correctness; log and ignore it.
        peer.on_track(Box::new(move |_track, _receiver, _transceiver| {
            debug!("Ignoring inbound remote audio track");
            Box::pin(async {})
        }));

        let mic_track = new_audio_track("mic-audio");
        let system_track = new_audio_track("system-audio");
        for track in [&mic_track, &system_track] {
            let sender = peer
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;
            // Drain RTCP so the sender's interceptors keep running
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
            });
        }

        let channel = peer
            .create_data_channel("oai-events", None)
            .await
            .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

        // Configuration is sent from the open callback and only there, so
        // it can never be sent before the channel reports open.
        let session_config =
            RealtimeSessionConfig::transcription_only(&config.model, &config.vad);
        let config_json = serde_json::to_string(&ClientEvent::SessionUpdate {
            session: session_config,
        })
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

        let channel_for_open = Arc::clone(&channel);
        channel.on_open(Box::new(move || {
            let channel = Arc::clone(&channel_for_open);
            let payload = config_json.clone();
            Box::pin(async move {
                info!("Side channel open, sending session configuration");
                if let Err(e) = channel.send_text(payload).await {
                    warn!("Failed to send session configuration: {}", e);
                }
            })
        }));

        channel.on_message(Box::new(move |message: DataChannelMessage| {
            let event_tx = event_tx.clone();
            Box::pin(async move {
                handle_side_channel_message(&message.data, &event_tx).await;
            })
        }));

        let offer = peer
            .create_offer(None)
            .await
            .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;
        let mut gather_complete = peer.gathering_complete_promise().await;
        peer.set_local_description(offer)
            .await
            .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;
        let _ = gather_complete.recv().await;

        let local = peer.local_description().await.ok_or_else(|| {
            CaptureError::NegotiationFailed("local description missing after gathering".to_string())
        })?;

        let answer_sdp = sdp::negotiate(
            http,
            &config.base_url,
            &config.model,
            credential,
            &local.sdp,
        )
        .await?;

        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;
        peer.set_remote_description(answer)
            .await
            .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

        info!("Realtime session negotiated");

        Ok(TransportHandle {
            transport: Box::new(RealtimePeerTransport {
                peer: Arc::clone(peer),
                channel,
                mic_track,
                system_track,
                connected,
                closed: false,
            }),
            events: event_rx,
        })
    }
}

#[async_trait]
impl Transport for RealtimePeerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Realtime
    }

    fn is_open(&self) -> bool {
        !self.closed && self.connected.load(Ordering::SeqCst)
    }

    async fn send_audio(&mut self, frame: &AudioFrame) -> Result<(), CaptureError> {
        if !self.is_open() {
            debug!("Peer not connected, dropping {:?} frame", frame.source);
            return Ok(());
        }

        let track = match frame.source {
            AudioStreamSource::Microphone => &self.mic_track,
            AudioStreamSource::System => &self.system_track,
        };

        let narrowband = pcm::downsample(&frame.samples, frame.sample_rate, TRACK_SAMPLE_RATE);
        let duration_ms = (narrowband.len() as u64 * 1000) / TRACK_SAMPLE_RATE as u64;
        let sample = Sample {
            data: Bytes::from(pcm::encode_mulaw(&narrowband)),
            duration: Duration::from_millis(duration_ms.max(1)),
            ..Default::default()
        };

        if let Err(e) = track.write_sample(&sample).await {
            warn!("Track write failed, dropping frame: {}", e);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.connected.store(false, Ordering::SeqCst);

        if let Err(e) = self.channel.close().await {
            debug!("Side channel close: {}", e);
        }
        self.peer
            .close()
            .await
            .map_err(|e| CaptureError::TransportUnavailable(e.to_string()))?;

        info!("Realtime session closed");
        Ok(())
    }
}

async fn new_peer_connection() -> Result<Arc<RTCPeerConnection>, CaptureError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

    let registry = register_default_interceptors(Registry::new(), &mut media_engine)
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let peer = api
        .new_peer_connection(RTCConfiguration::default())
        .await
        .map_err(|e| CaptureError::NegotiationFailed(e.to_string()))?;

    Ok(Arc::new(peer))
}

fn new_audio_track(id: &str) -> Arc<TrackLocalStaticSample> {
    Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_PCMU.to_owned(),
            clock_rate: TRACK_SAMPLE_RATE,
            channels: 1,
            ..Default::default()
        },
        id.to_owned(),
        "thera-scribe".to_owned(),
    ))
}

/// Decode one side-channel payload and forward any actionable transcript.
///
/// Malformed payloads are logged and dropped; they never end the session.
async fn handle_side_channel_message(data: &[u8], event_tx: &mpsc::Sender<TranscriptEvent>) {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            warn!("Dropping non-UTF8 side-channel message: {}", e);
            return;
        }
    };

    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::ConversationItemCreated { item }) => {
            if let Some(text) = item.transcript_text() {
                let event = TranscriptEvent {
                    speaker: item.role.clone(),
                    text,
                    // The event carries no timestamp; ingest stamps arrival
                    timestamp: None,
                };
                if event_tx.send(event).await.is_err() {
                    debug!("Transcript consumer gone");
                }
            }
        }
        Ok(ServerEvent::Error { error }) => {
            warn!("Realtime service error: {} ({})", error.message, error.error_type);
        }
        Ok(ServerEvent::Unknown) => {
            debug!("Ignoring unhandled side-channel event");
        }
        Err(e) => {
            warn!("Dropping malformed side-channel message: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_conversation_item_forwarded_as_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let payload = br#"{
            "type": "conversation.item.created",
            "item": {
                "status": "completed",
                "role": "user",
                "content": [{"type": "input_audio", "transcript": "me siento mejor"}]
            }
        }"#;

        handle_side_channel_message(payload, &tx).await;

        let event = rx.recv().await.expect("one transcript event");
        assert_eq!(event.text, "me siento mejor");
        assert_eq!(event.speaker.as_deref(), Some("user"));
        assert_eq!(event.timestamp, None);
    }

    #[tokio::test]
    async fn test_malformed_side_channel_message_is_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        handle_side_channel_message(b"not json", &tx).await;
        handle_side_channel_message(&[0xFF, 0xFE], &tx).await;

        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_non_actionable_items_produce_no_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let in_progress = br#"{
            "type": "conversation.item.created",
            "item": {"status": "in_progress", "content": [{"type": "text", "text": "..."}]}
        }"#;
        handle_side_channel_message(in_progress, &tx).await;

        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
