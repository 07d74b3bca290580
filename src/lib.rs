pub mod audio;
pub mod auth;
pub mod config;
pub mod error;
pub mod session;
pub mod transcript;
pub mod transport;

pub use audio::{
    list_audio_inputs, AudioDeviceDescriptor, AudioFrame, AudioStreamSource, CaptureFactory,
    CaptureSource, CpalCaptureFactory, MixPolicy, MixerConfig, SpectrumAnalyzer, SpectrumConfig,
    SpectrumFrame, StreamMixer,
};
pub use auth::{AuthProvider, AuthState, StaticAuthProvider, UserIdentity};
pub use config::Config;
pub use error::CaptureError;
pub use session::{CaptureSession, SessionConfig, SessionStats};
pub use transcript::{TranscriptEntry, TranscriptEvent, TranscriptLog};
pub use transport::{Transport, TransportFactory, TransportHandle, TransportKind};
