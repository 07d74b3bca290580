// Integration tests for the capture session lifecycle.
//
// These tests drive the session through fake capture sources and a fake
// transport, verifying acquisition rollback, ordered teardown and the
// transcript flow without touching audio hardware or the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use thera_scribe::audio::{AudioFrame, AudioStreamSource, CaptureFactory, CaptureSource};
use thera_scribe::error::CaptureError;
use thera_scribe::session::{CaptureSession, SessionConfig};
use thera_scribe::transcript::TranscriptEvent;
use thera_scribe::transport::{Transport, TransportFactory, TransportHandle, TransportKind};
use thera_scribe::{AuthProvider, StaticAuthProvider};
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fakes

struct FakeSource {
    label: &'static str,
    fail_with: Option<fn() -> CaptureError>,
    started: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    frames: Vec<AudioFrame>,
}

impl CaptureSource for FakeSource {
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        if let Some(fail) = self.fail_with {
            return Err(fail());
        }
        self.started.store(true, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        for frame in self.frames.drain(..) {
            let _ = tx.try_send(frame);
        }
        // Sender drops here: the source delivers its canned frames and the
        // stream then reads as ended, which is fine for these tests.
        Ok(rx)
    }

    fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        self.label
    }
}

#[derive(Default)]
struct FakeCaptureFactory {
    mic_started: Arc<AtomicBool>,
    mic_active: Arc<AtomicBool>,
    system_started: Arc<AtomicBool>,
    system_active: Arc<AtomicBool>,
    system_fails: bool,
    requested_device: Arc<StdMutex<Option<String>>>,
    mic_frames: Vec<AudioFrame>,
    system_frames: Vec<AudioFrame>,
}

impl CaptureFactory for FakeCaptureFactory {
    fn microphone(&self, device_id: Option<&str>) -> Box<dyn CaptureSource> {
        *self.requested_device.lock().unwrap() = device_id.map(str::to_owned);
        Box::new(FakeSource {
            label: "fake-mic",
            fail_with: None,
            started: Arc::clone(&self.mic_started),
            active: Arc::clone(&self.mic_active),
            frames: self.mic_frames.clone(),
        })
    }

    fn system_audio(&self) -> Box<dyn CaptureSource> {
        let fail_with = if self.system_fails {
            Some(
                (|| CaptureError::PermissionDenied("display capture refused".to_string()))
                    as fn() -> CaptureError,
            )
        } else {
            None
        };
        Box::new(FakeSource {
            label: "fake-system",
            fail_with,
            started: Arc::clone(&self.system_started),
            active: Arc::clone(&self.system_active),
            frames: self.system_frames.clone(),
        })
    }
}

struct FakeTransport {
    sent: Arc<StdMutex<Vec<AudioFrame>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for FakeTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn send_audio(&mut self, frame: &AudioFrame) -> Result<(), CaptureError> {
        if self.is_open() {
            self.sent.lock().unwrap().push(frame.clone());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeTransportFactory {
    fails: bool,
    sent: Arc<StdMutex<Vec<AudioFrame>>>,
    closed: Arc<AtomicBool>,
    canned_events: Vec<TranscriptEvent>,
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn connect(&self) -> Result<TransportHandle, CaptureError> {
        if self.fails {
            return Err(CaptureError::NegotiationFailed(
                "backend unreachable".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(64);
        for event in self.canned_events.clone() {
            let _ = tx.try_send(event);
        }
        Ok(TransportHandle {
            transport: Box::new(FakeTransport {
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }),
            events: rx,
        })
    }
}

fn mic_frame(samples: Vec<i16>, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: 16000,
        channels: 1,
        timestamp_ms,
        source: AudioStreamSource::Microphone,
    }
}

fn quick_config() -> SessionConfig {
    SessionConfig {
        chunk_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

fn signed_in() -> Arc<dyn AuthProvider> {
    Arc::new(StaticAuthProvider::signed_in("therapist-1"))
}

// ---------------------------------------------------------------------------
// Tests

#[tokio::test]
async fn test_system_failure_rolls_back_microphone() {
    let sources = Arc::new(FakeCaptureFactory {
        system_fails: true,
        ..Default::default()
    });
    let transports = Arc::new(FakeTransportFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        transports,
    );

    let result = session.start().await;
    assert!(matches!(result, Err(CaptureError::PermissionDenied(_))));

    // The microphone was acquired, then released before the error surfaced
    assert!(sources.mic_started.load(Ordering::SeqCst));
    assert!(!sources.mic_active.load(Ordering::SeqCst));
    assert!(!session.is_recording().await);
}

#[tokio::test]
async fn test_transport_failure_rolls_back_both_sources() {
    let sources = Arc::new(FakeCaptureFactory::default());
    let transports = Arc::new(FakeTransportFactory {
        fails: true,
        ..Default::default()
    });
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        transports,
    );

    let result = session.start().await;
    assert!(matches!(result, Err(CaptureError::NegotiationFailed(_))));

    assert!(sources.mic_started.load(Ordering::SeqCst));
    assert!(!sources.mic_active.load(Ordering::SeqCst));
    assert!(sources.system_started.load(Ordering::SeqCst));
    assert!(!sources.system_active.load(Ordering::SeqCst));
    assert!(!session.is_recording().await);
}

#[tokio::test]
async fn test_start_requires_signed_in_user() {
    let sources = Arc::new(FakeCaptureFactory::default());
    let transports = Arc::new(FakeTransportFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        Arc::new(StaticAuthProvider::signed_out()),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        transports,
    );

    let result = session.start().await;
    assert!(matches!(result, Err(CaptureError::NotAuthenticated)));
    // Nothing was acquired
    assert!(!sources.mic_started.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_selected_device_id_reaches_acquisition() {
    let sources = Arc::new(FakeCaptureFactory::default());
    let transports = Arc::new(FakeTransportFactory::default());
    let config = SessionConfig {
        device_id: Some("mic-1".to_string()),
        ..quick_config()
    };
    let session = CaptureSession::new(
        config,
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        transports,
    );

    session.start().await.unwrap();
    assert_eq!(
        sources.requested_device.lock().unwrap().as_deref(),
        Some("mic-1")
    );
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_start_rejected_while_recording() {
    let sources = Arc::new(FakeCaptureFactory::default());
    let transports = Arc::new(FakeTransportFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        transports,
    );

    session.start().await.unwrap();
    assert!(matches!(
        session.start().await,
        Err(CaptureError::AlreadyActive)
    ));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_twice_is_a_noop() {
    let sources = Arc::new(FakeCaptureFactory::default());
    let transports = Arc::new(FakeTransportFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        Arc::clone(&transports) as Arc<dyn TransportFactory>,
    );

    session.start().await.unwrap();

    let first = session.stop().await.unwrap();
    assert!(!first.is_recording);
    assert!(transports.closed.load(Ordering::SeqCst));

    // Second stop must not double-release anything
    let second = session.stop().await.unwrap();
    assert!(!second.is_recording);
}

#[tokio::test]
async fn test_stop_closes_transport_and_sources_in_order() {
    let sources = Arc::new(FakeCaptureFactory::default());
    let transports = Arc::new(FakeTransportFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        Arc::clone(&transports) as Arc<dyn TransportFactory>,
    );

    session.start().await.unwrap();
    assert!(session.is_recording().await);
    assert!(sources.mic_active.load(Ordering::SeqCst));
    assert!(sources.system_active.load(Ordering::SeqCst));

    session.stop().await.unwrap();

    assert!(transports.closed.load(Ordering::SeqCst));
    assert!(!sources.mic_active.load(Ordering::SeqCst));
    assert!(!sources.system_active.load(Ordering::SeqCst));
    assert!(!session.is_recording().await);
}

#[tokio::test]
async fn test_captured_audio_reaches_transport_as_chunks() {
    let sources = Arc::new(FakeCaptureFactory {
        mic_frames: vec![
            mic_frame(vec![100; 160], 0),
            mic_frame(vec![200; 160], 10),
            mic_frame(vec![300; 160], 20),
        ],
        ..Default::default()
    });
    let transports = Arc::new(FakeTransportFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        Arc::clone(&transports) as Arc<dyn TransportFactory>,
    );

    session.start().await.unwrap();
    // Let the frames propagate through normalize -> mix -> chunk ticks
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = session.stop().await.unwrap();

    let sent = transports.sent.lock().unwrap();
    assert!(!sent.is_empty(), "expected at least one delivered chunk");
    let delivered: usize = sent.iter().map(|f| f.samples.len()).sum();
    assert_eq!(delivered, 480, "all captured samples delivered exactly once");
    assert!(stats.chunks_sent >= 1);
}

#[tokio::test]
async fn test_channel_separated_preserves_source_provenance() {
    let sources = Arc::new(FakeCaptureFactory {
        mic_frames: vec![mic_frame(vec![1000; 160], 0)],
        system_frames: vec![AudioFrame {
            samples: vec![-2000; 160],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
            source: AudioStreamSource::System,
        }],
        ..Default::default()
    });
    let transports = Arc::new(FakeTransportFactory::default());
    let config = SessionConfig {
        mix_policy: thera_scribe::MixPolicy::ChannelSeparated,
        ..quick_config()
    };
    let session = CaptureSession::new(
        config,
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        Arc::clone(&transports) as Arc<dyn TransportFactory>,
    );

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.stop().await.unwrap();

    let sent = transports.sent.lock().unwrap();
    assert!(!sent.is_empty());

    let mut left_energy = 0usize;
    let mut right_energy = 0usize;
    for chunk in sent.iter() {
        assert_eq!(chunk.channels, 2);
        for pair in chunk.samples.chunks_exact(2) {
            // Left carries only the microphone tone, right only the system
            // tone; silence fills whichever side has no frame that round
            assert!(pair[0] == 1000 || pair[0] == 0, "foreign sample on left: {}", pair[0]);
            assert!(pair[1] == -2000 || pair[1] == 0, "foreign sample on right: {}", pair[1]);
            if pair[0] != 0 {
                left_energy += 1;
            }
            if pair[1] != 0 {
                right_energy += 1;
            }
        }
    }
    assert_eq!(left_energy, 160, "all mic samples on the left channel");
    assert_eq!(right_energy, 160, "all system samples on the right channel");
}

#[tokio::test]
async fn test_transcript_events_sorted_by_timestamp() {
    let transports = Arc::new(FakeTransportFactory {
        canned_events: vec![
            TranscriptEvent {
                speaker: Some("A".to_string()),
                text: "hola".to_string(),
                timestamp: Some(100),
            },
            TranscriptEvent {
                speaker: Some("B".to_string()),
                text: "qué tal".to_string(),
                timestamp: Some(50),
            },
        ],
        ..Default::default()
    });
    let sources = Arc::new(FakeCaptureFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        Arc::clone(&transports) as Arc<dyn TransportFactory>,
    );

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop().await.unwrap();

    let transcript = session.transcript().await;
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].speaker.as_deref(), Some("B"));
    assert_eq!(transcript[0].text, "qué tal");
    assert_eq!(transcript[0].timestamp, 50);
    assert_eq!(transcript[1].speaker.as_deref(), Some("A"));
    assert_eq!(transcript[1].text, "hola");
    assert_eq!(transcript[1].timestamp, 100);
}

#[tokio::test]
async fn test_events_without_timestamp_get_arrival_time() {
    let transports = Arc::new(FakeTransportFactory {
        canned_events: vec![TranscriptEvent {
            speaker: None,
            text: "sin marca".to_string(),
            timestamp: None,
        }],
        ..Default::default()
    });
    let sources = Arc::new(FakeCaptureFactory::default());
    let session = CaptureSession::new(
        quick_config(),
        signed_in(),
        Arc::clone(&sources) as Arc<dyn CaptureFactory>,
        Arc::clone(&transports) as Arc<dyn TransportFactory>,
    );

    let before = chrono::Utc::now().timestamp_millis();
    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop().await.unwrap();
    let after = chrono::Utc::now().timestamp_millis();

    let transcript = session.transcript().await;
    assert_eq!(transcript.len(), 1);
    assert!(transcript[0].timestamp >= before && transcript[0].timestamp <= after);
}
