use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{
    pcm, AudioFrame, CaptureFactory, CaptureSource, MixerConfig, SpectrumAnalyzer, SpectrumConfig,
    SpectrumFrame, StreamMixer,
};
use crate::auth::{AuthProvider, AuthState};
use crate::error::CaptureError;
use crate::transcript::{TranscriptEntry, TranscriptEvent, TranscriptLog};
use crate::transport::{Transport, TransportFactory, TransportKind};

use super::config::SessionConfig;
use super::stats::SessionStats;

/// Capacity of the internal frame channels
const PIPELINE_CHANNEL_CAPACITY: usize = 256;

/// Resources held only while recording.
///
/// Materialized all-or-nothing by `start`: at any observable instant the
/// session either holds all of these or none of them.
struct ActiveCapture {
    mic: Box<dyn CaptureSource>,
    system: Box<dyn CaptureSource>,
    /// Signals the pump to stop encoding, after which it closes the transport
    stop_tx: watch::Sender<bool>,
    pump_task: JoinHandle<()>,
    ingest_task: JoinHandle<()>,
}

/// One capture session: owns both live sources, the combined stream, the
/// transport handle and the transcript list for the lifetime of one
/// recording. The surrounding UI holds one instance and never reconstructs
/// it mid-session.
pub struct CaptureSession {
    config: SessionConfig,
    auth: Arc<dyn AuthProvider>,
    sources: Arc<dyn CaptureFactory>,
    transports: Arc<dyn TransportFactory>,

    active: Mutex<Option<ActiveCapture>>,
    transcript: Arc<Mutex<TranscriptLog>>,
    chunks_sent: Arc<AtomicUsize>,
    started_at: std::sync::Mutex<Option<DateTime<Utc>>>,
    spectrum: std::sync::Mutex<Option<mpsc::Receiver<SpectrumFrame>>>,
}

impl CaptureSession {
    pub fn new(
        config: SessionConfig,
        auth: Arc<dyn AuthProvider>,
        sources: Arc<dyn CaptureFactory>,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            config,
            auth,
            sources,
            transports,
            active: Mutex::new(None),
            transcript: Arc::new(Mutex::new(TranscriptLog::new())),
            chunks_sent: Arc::new(AtomicUsize::new(0)),
            started_at: std::sync::Mutex::new(None),
            spectrum: std::sync::Mutex::new(None),
        }
    }

    /// Start capturing.
    ///
    /// Acquires the microphone, the system-audio source and the transport
    /// in order; any failure rolls back everything already acquired and
    /// surfaces as the start error. Duplicate start while starting or
    /// recording is rejected.
    pub async fn start(&self) -> Result<(), CaptureError> {
        let mut active = self
            .active
            .try_lock()
            .map_err(|_| CaptureError::AlreadyActive)?;
        if active.is_some() {
            return Err(CaptureError::AlreadyActive);
        }

        match self.auth.current_user() {
            AuthState::SignedIn(user) => {
                info!("Starting capture session {} for {}", self.config.session_id, user.user_id);
            }
            AuthState::Pending | AuthState::SignedOut => {
                return Err(CaptureError::NotAuthenticated);
            }
        }

        // Microphone first; nothing to roll back if it fails
        let mut mic = self.sources.microphone(self.config.device_id.as_deref());
        let mic_rx = mic.start()?;

        // System audio; roll the microphone back on failure
        let mut system = self.sources.system_audio();
        let system_rx = match system.start() {
            Ok(rx) => rx,
            Err(e) => {
                warn!("System-audio acquisition failed, rolling back microphone");
                mic.stop();
                return Err(e);
            }
        };

        // Transport handshake; roll both sources back on failure
        let handle = match self.transports.connect().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Transport handshake failed, rolling back capture sources");
                mic.stop();
                system.stop();
                return Err(e);
            }
        };

        // All acquisitions succeeded: wire the pipeline and go live
        let (stop_tx, stop_rx) = watch::channel(false);
        let sample_rate = self.config.sample_rate;

        let (merged_tx, merged_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
        spawn_normalizer(mic_rx, merged_tx.clone(), sample_rate);
        spawn_normalizer(system_rx, merged_tx, sample_rate);

        let mixer_config = MixerConfig {
            sample_rate,
            max_buffer_delay_ms: 200,
            policy: self.config.mix_policy,
        };

        let pump_task = match self.config.transport {
            TransportKind::Socket => {
                // Combined stream feeds the transport; tee a copy into the
                // visualizer when requested
                let (mixed_tx, mixed_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
                tokio::spawn(StreamMixer::new(mixer_config).run(merged_rx, mixed_tx));

                let pump_rx = if self.config.visualize {
                    let (main_tx, main_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
                    let viz_rx = spawn_tee(mixed_rx, main_tx);
                    self.install_spectrum(viz_rx);
                    main_rx
                } else {
                    mixed_rx
                };

                tokio::spawn(run_chunked_pump(
                    handle.transport,
                    pump_rx,
                    stop_rx,
                    self.config.chunk_interval,
                    sample_rate,
                    Arc::clone(&self.chunks_sent),
                ))
            }
            TransportKind::Realtime => {
                // Raw per-source frames go straight to the peer tracks; the
                // combined stream is local-only, feeding the visualizer
                let pump_rx = if self.config.visualize {
                    let (main_tx, main_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
                    let viz_merged_rx = spawn_tee(merged_rx, main_tx);
                    let (mixed_tx, mixed_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
                    tokio::spawn(StreamMixer::new(mixer_config).run(viz_merged_rx, mixed_tx));
                    self.install_spectrum(mixed_rx);
                    main_rx
                } else {
                    merged_rx
                };

                tokio::spawn(run_direct_pump(
                    handle.transport,
                    pump_rx,
                    stop_rx,
                    Arc::clone(&self.chunks_sent),
                ))
            }
        };

        let ingest_task = tokio::spawn(run_ingest(handle.events, Arc::clone(&self.transcript)));

        self.chunks_sent.store(0, Ordering::SeqCst);
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Utc::now());
        }

        *active = Some(ActiveCapture {
            mic,
            system,
            stop_tx,
            pump_task,
            ingest_task,
        });

        info!("Capture session {} recording", self.config.session_id);
        Ok(())
    }

    /// Stop capturing.
    ///
    /// Ordered teardown: (1) stop the encoder pump, (2) close the transport
    /// (the pump closes it after its last send), (3) stop every capture
    /// source, (4) clear the active state. A second stop is a no-op.
    pub async fn stop(&self) -> Result<SessionStats, CaptureError> {
        let mut guard = self.active.lock().await;
        let Some(mut active) = guard.take() else {
            debug!("Stop on idle session is a no-op");
            return Ok(self.stats_with_recording(false).await);
        };

        info!("Stopping capture session {}", self.config.session_id);

        // (1) + (2): the pump stops encoding on the signal, then closes the
        // transport itself, guaranteeing no send after close
        let _ = active.stop_tx.send(true);
        if let Err(e) = active.pump_task.await {
            error!("Pump task failed: {}", e);
        }

        // The ingest task ends when the transport's event stream closes;
        // abort covers transports whose callbacks outlive the close
        active.ingest_task.abort();
        let _ = active.ingest_task.await;

        // (3) release every acquired media source
        active.mic.stop();
        active.system.stop();

        // (4) state cleared by dropping ActiveCapture (guard already took it)
        if let Ok(mut spectrum) = self.spectrum.lock() {
            *spectrum = None;
        }

        info!("Capture session {} stopped", self.config.session_id);
        Ok(self.stats_with_recording(false).await)
    }

    /// Whether a recording is currently active
    pub async fn is_recording(&self) -> bool {
        match self.active.try_lock() {
            Ok(guard) => guard.is_some(),
            // Locked means a start or stop is in flight
            Err(_) => true,
        }
    }

    /// Take the live spectrum stream, when the session was configured with
    /// visualization. Yields `None` once taken.
    pub fn take_spectrum(&self) -> Option<mpsc::Receiver<SpectrumFrame>> {
        self.spectrum.lock().ok().and_then(|mut s| s.take())
    }

    /// Transcript entries received so far, sorted ascending by timestamp
    pub async fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.lock().await.entries().to_vec()
    }

    /// Current session statistics
    pub async fn stats(&self) -> SessionStats {
        let recording = self.is_recording().await;
        self.stats_with_recording(recording).await
    }

    async fn stats_with_recording(&self, recording: bool) -> SessionStats {
        let started_at = self.started_at.lock().ok().and_then(|s| *s);
        let duration_secs = started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);
        let transcript_entries = self.transcript.lock().await.len();

        SessionStats {
            is_recording: recording,
            started_at,
            duration_secs,
            chunks_sent: self.chunks_sent.load(Ordering::SeqCst),
            transcript_entries,
        }
    }

    fn install_spectrum(&self, rx: mpsc::Receiver<AudioFrame>) {
        let spectrum_rx = SpectrumAnalyzer::spawn(SpectrumConfig::default(), rx);
        if let Ok(mut spectrum) = self.spectrum.lock() {
            *spectrum = Some(spectrum_rx);
        }
    }
}

/// Normalize captured frames to the pipeline format (mono, target rate)
fn spawn_normalizer(
    mut rx: mpsc::Receiver<AudioFrame>,
    tx: mpsc::Sender<AudioFrame>,
    target_rate: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let frame = normalize_frame(frame, target_rate);
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    })
}

fn normalize_frame(frame: AudioFrame, target_rate: u32) -> AudioFrame {
    let samples = pcm::to_mono(&frame.samples, frame.channels);
    let samples = pcm::downsample(&samples, frame.sample_rate, target_rate);
    AudioFrame {
        samples,
        // Decimation cannot upsample; a slower device keeps its native rate
        // and the mixer drops the mismatch with a warning
        sample_rate: frame.sample_rate.min(target_rate),
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
        source: frame.source,
    }
}

/// Forward frames to `tx`, returning a best-effort copy stream
fn spawn_tee(
    mut rx: mpsc::Receiver<AudioFrame>,
    tx: mpsc::Sender<AudioFrame>,
) -> mpsc::Receiver<AudioFrame> {
    let (copy_tx, copy_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            // The copy consumer is cosmetic; never let it stall the pipeline
            let _ = copy_tx.try_send(frame.clone());
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    });
    copy_rx
}

/// Socket-mode pump: accumulate the combined stream and emit one chunk per
/// interval. The transport performs its own readiness check; a chunk
/// arriving while the socket is down is dropped there, not buffered here.
async fn run_chunked_pump(
    mut transport: Box<dyn Transport>,
    mut rx: mpsc::Receiver<AudioFrame>,
    mut stop_rx: watch::Receiver<bool>,
    interval: Duration,
    sample_rate: u32,
    chunks_sent: Arc<AtomicUsize>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut pending: Vec<i16> = Vec::new();
    let mut channels: u16 = 1;
    let mut latest_ts: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            maybe_frame = rx.recv() => match maybe_frame {
                Some(frame) => {
                    channels = frame.channels;
                    latest_ts = frame.timestamp_ms;
                    pending.extend_from_slice(&frame.samples);
                }
                None => break,
            },
            _ = tick.tick() => {
                flush_chunk(
                    &mut *transport,
                    &mut pending,
                    channels,
                    latest_ts,
                    sample_rate,
                    &chunks_sent,
                )
                .await;
            }
        }
    }

    // Final flush, then close: the encoder is quiet before the transport
    // goes away
    flush_chunk(
        &mut *transport,
        &mut pending,
        channels,
        latest_ts,
        sample_rate,
        &chunks_sent,
    )
    .await;
    if let Err(e) = transport.close().await {
        warn!("Transport close failed: {}", e);
    }
}

async fn flush_chunk(
    transport: &mut dyn Transport,
    pending: &mut Vec<i16>,
    channels: u16,
    timestamp_ms: u64,
    sample_rate: u32,
    chunks_sent: &AtomicUsize,
) {
    if pending.is_empty() {
        return;
    }
    let chunk = AudioFrame {
        samples: std::mem::take(pending),
        sample_rate,
        channels,
        timestamp_ms,
        source: crate::audio::AudioStreamSource::Microphone,
    };
    if let Err(e) = transport.send_audio(&chunk).await {
        warn!("Chunk delivery failed: {}", e);
    } else {
        chunks_sent.fetch_add(1, Ordering::SeqCst);
    }
}

/// Realtime-mode pump: raw per-source frames go straight to the transport
async fn run_direct_pump(
    mut transport: Box<dyn Transport>,
    mut rx: mpsc::Receiver<AudioFrame>,
    mut stop_rx: watch::Receiver<bool>,
    chunks_sent: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            maybe_frame = rx.recv() => match maybe_frame {
                Some(frame) => {
                    if let Err(e) = transport.send_audio(&frame).await {
                        warn!("Frame delivery failed: {}", e);
                    } else {
                        chunks_sent.fetch_add(1, Ordering::SeqCst);
                    }
                }
                None => break,
            },
        }
    }

    if let Err(e) = transport.close().await {
        warn!("Transport close failed: {}", e);
    }
}

/// Append transcript events to the log, stamping arrival time on events
/// that carry no timestamp. Ends when the transport's event stream closes.
async fn run_ingest(
    mut events: mpsc::Receiver<TranscriptEvent>,
    transcript: Arc<Mutex<TranscriptLog>>,
) {
    while let Some(event) = events.recv().await {
        let arrival_ms = Utc::now().timestamp_millis();
        let mut log = transcript.lock().await;
        let entry = log.insert(event, arrival_ms);
        debug!(
            "Transcript entry at {}: {} chars",
            entry.timestamp,
            entry.text.len()
        );
    }
    debug!("Transcript event stream closed");
}
