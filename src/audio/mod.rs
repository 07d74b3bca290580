pub mod capture;
pub mod device;
pub mod frame;
pub mod mixer;
pub mod pcm;
pub mod visualizer;

pub use capture::{CaptureFactory, CaptureSource, CpalCaptureFactory, MicrophoneSource, SystemAudioSource};
pub use device::list_audio_inputs;
pub use frame::{AudioDeviceDescriptor, AudioFrame, AudioStreamSource};
pub use mixer::{MixPolicy, MixerConfig, StreamMixer};
pub use visualizer::{SpectrumAnalyzer, SpectrumConfig, SpectrumFrame};
