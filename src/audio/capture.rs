// Dual-source live audio capture.
//
// Each source owns a cpal input stream on a dedicated capture thread and
// forwards interleaved PCM16 frames over a tokio channel. The microphone
// source opens the device named by the caller (platform default otherwise);
// the system source opens a loopback/monitor input so the remote
// participant's audio is captured without a second physical device. Both
// sources emit audio-only frames; there is never a video track downstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::CaptureError;

use super::frame::{AudioFrame, AudioStreamSource};
use super::pcm;

/// Channel capacity between a capture thread and the async pipeline
const FRAME_CHANNEL_CAPACITY: usize = 100;

/// How often a capture thread checks its stop flag
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A live audio source that can be started once and stopped idempotently.
///
/// Implementations forward frames until stopped; dropping the receiver does
/// not stop the device, `stop()` does.
pub trait CaptureSource: Send {
    /// Start capturing; returns the frame receiver.
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Stop capturing and release the device. Safe to call more than once.
    fn stop(&mut self);

    /// Whether the source is currently capturing
    fn is_active(&self) -> bool;

    /// Source name for logging
    fn name(&self) -> &str;
}

/// Creates the two live sources for a capture session.
///
/// The session depends on this seam rather than on cpal directly, so the
/// acquisition-rollback path is testable without audio hardware.
pub trait CaptureFactory: Send + Sync {
    fn microphone(&self, device_id: Option<&str>) -> Box<dyn CaptureSource>;
    fn system_audio(&self) -> Box<dyn CaptureSource>;
}

/// cpal-backed factory used by the binary
pub struct CpalCaptureFactory {
    /// Explicit loopback/monitor device name, when configured
    pub system_device: Option<String>,
}

impl CaptureFactory for CpalCaptureFactory {
    fn microphone(&self, device_id: Option<&str>) -> Box<dyn CaptureSource> {
        Box::new(MicrophoneSource::new(device_id.map(str::to_owned)))
    }

    fn system_audio(&self) -> Box<dyn CaptureSource> {
        Box::new(SystemAudioSource::new(self.system_device.clone()))
    }
}

/// Microphone capture via cpal
pub struct MicrophoneSource {
    device_id: Option<String>,
    worker: Option<CaptureWorker>,
}

impl MicrophoneSource {
    pub fn new(device_id: Option<String>) -> Self {
        Self {
            device_id,
            worker: None,
        }
    }
}

impl CaptureSource for MicrophoneSource {
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let device_id = self.device_id.clone();
        let (worker, rx) = CaptureWorker::spawn(AudioStreamSource::Microphone, move || {
            open_microphone(device_id.as_deref())
        })?;
        self.worker = Some(worker);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "microphone"
    }
}

/// System/loopback audio capture via cpal monitor devices
pub struct SystemAudioSource {
    device_name: Option<String>,
    worker: Option<CaptureWorker>,
}

impl SystemAudioSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
        }
    }
}

impl CaptureSource for SystemAudioSource {
    fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        let device_name = self.device_name.clone();
        let (worker, rx) = CaptureWorker::spawn(AudioStreamSource::System, move || {
            open_loopback(device_name.as_deref())
        })?;
        self.worker = Some(worker);
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "system-audio"
    }
}

/// Owns the capture thread holding a cpal stream.
///
/// The stream is created and kept on its own thread because cpal streams
/// are not `Send`; startup errors are reported back synchronously so
/// `CaptureSource::start` can fail before any frame flows.
struct CaptureWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureWorker {
    fn spawn<F>(
        source: AudioStreamSource,
        open_device: F,
    ) -> Result<(Self, mpsc::Receiver<AudioFrame>), CaptureError>
    where
        F: FnOnce() -> Result<Device, CaptureError> + Send + 'static,
    {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(), CaptureError>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::spawn(move || {
            let result = open_device().and_then(|device| build_stream(&device, source, frame_tx));
            let stream = match result {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(map_access_error(&e.to_string())));
                return;
            }
            let _ = ready_tx.send(Ok(()));

            while !stop_flag.load(Ordering::SeqCst) {
                thread::sleep(STOP_POLL_INTERVAL);
            }
            drop(stream);
            debug!("{:?} capture thread exiting", source);
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("{:?} capture started", source);
                Ok((
                    Self {
                        stop,
                        thread: Some(thread),
                    },
                    frame_rx,
                ))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::DeviceUnavailable(
                    "capture thread died during startup".to_string(),
                ))
            }
        }
    }

    fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        // A worker dropped without stop() still signals its thread to exit;
        // no join here, the capture thread owns nothing that must flush.
        self.stop.store(true, Ordering::SeqCst);
    }
}

fn open_microphone(device_id: Option<&str>) -> Result<Device, CaptureError> {
    let host = cpal::default_host();
    match device_id {
        Some(id) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| map_access_error(&e.to_string()))?;
            devices
                .find(|d| d.name().map(|n| n == id).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no input named '{id}'")))
        }
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string())),
    }
}

/// Find a loopback/monitor input carrying system audio.
///
/// An explicit device name wins; otherwise the first input whose name marks
/// it as a monitor source is used (PulseAudio/PipeWire convention).
fn open_loopback(device_name: Option<&str>) -> Result<Device, CaptureError> {
    let host = cpal::default_host();
    let mut devices = host
        .input_devices()
        .map_err(|e| map_access_error(&e.to_string()))?;

    match device_name {
        Some(name) => devices
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable(format!("no loopback device named '{name}'"))
            }),
        None => devices
            .find(|d| {
                d.name()
                    .map(|n| {
                        let lower = n.to_lowercase();
                        lower.contains("monitor") || lower.contains("loopback")
                    })
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                CaptureError::DeviceUnavailable(
                    "no loopback/monitor input found for system audio".to_string(),
                )
            }),
    }
}

fn build_stream(
    device: &Device,
    source: AudioStreamSource,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, CaptureError> {
    let supported = device
        .default_input_config()
        .map_err(|e| map_access_error(&e.to_string()))?;

    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;
    let started = Instant::now();

    info!(
        "Opening {:?} stream: {}Hz, {} channels, {:?}",
        source, sample_rate, channels, sample_format
    );

    let err_fn = move |e: cpal::StreamError| warn!("{:?} stream error: {}", source, e);

    let stream = match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    forward_frame(
                        pcm::f32_buffer_to_pcm16(data),
                        sample_rate,
                        channels,
                        started,
                        source,
                        &frame_tx,
                    );
                },
                err_fn,
                None,
            )
            .map_err(|e| map_access_error(&e.to_string()))?,
        SampleFormat::I16 => device
            .build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    forward_frame(
                        data.to_vec(),
                        sample_rate,
                        channels,
                        started,
                        source,
                        &frame_tx,
                    );
                },
                err_fn,
                None,
            )
            .map_err(|e| map_access_error(&e.to_string()))?,
        SampleFormat::U16 => device
            .build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    forward_frame(
                        pcm::u16_buffer_to_pcm16(data),
                        sample_rate,
                        channels,
                        started,
                        source,
                        &frame_tx,
                    );
                },
                err_fn,
                None,
            )
            .map_err(|e| map_access_error(&e.to_string()))?,
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported sample format: {other:?}"
            )))
        }
    };

    Ok(stream)
}

/// Push one frame from the capture callback into the async pipeline.
///
/// The callback must never block; when the channel is full the frame is
/// dropped and counted against the consumer, not the device.
fn forward_frame(
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
    started: Instant,
    source: AudioStreamSource,
    frame_tx: &mpsc::Sender<AudioFrame>,
) {
    let frame = AudioFrame {
        samples,
        sample_rate,
        channels,
        timestamp_ms: started.elapsed().as_millis() as u64,
        source,
    };
    if frame_tx.try_send(frame).is_err() {
        warn!("{:?} frame dropped: pipeline backlog", source);
    }
}

/// Classify a platform error message into the pipeline taxonomy
fn map_access_error(message: &str) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("denied") || lower.contains("permission") || lower.contains("not allowed") {
        CaptureError::PermissionDenied(message.to_string())
    } else {
        CaptureError::DeviceUnavailable(message.to_string())
    }
}
