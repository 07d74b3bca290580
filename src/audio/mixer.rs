// Mixer for the microphone and system-audio streams.
//
// Frames from both live sources arrive tagged on one channel; the mixer
// buffers them per source, aligns them by timestamp, and produces combined
// frames under one of two policies:
// - additive: both sources summed into mono with clipping
// - channel-separated: microphone on the left channel, system audio on the
//   right, preserving speaker provenance at the signal level

use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::frame::{AudioFrame, AudioStreamSource};

/// Mixing policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixPolicy {
    /// Sum both sources into the available output channel(s)
    Additive,
    /// Microphone to the left channel, system audio to the right
    ChannelSeparated,
}

impl MixPolicy {
    /// Channel count of the combined stream under this policy
    pub fn output_channels(&self) -> u16 {
        match self {
            MixPolicy::Additive => 1,
            MixPolicy::ChannelSeparated => 2,
        }
    }
}

/// Configuration for the stream mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Sample rate both inputs must already be normalized to
    pub sample_rate: u32,
    /// Maximum buffering delay in milliseconds; older frames are dropped
    /// to prevent unbounded buffering
    pub max_buffer_delay_ms: u64,
    /// Mixing policy
    pub policy: MixPolicy,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            max_buffer_delay_ms: 200,
            policy: MixPolicy::Additive,
        }
    }
}

/// Combines the two mono input streams into one combined stream.
///
/// Inputs must be mono at the configured sample rate; mismatched frames are
/// dropped with a warning. The combined stream carries audio only.
pub struct StreamMixer {
    config: MixerConfig,
    buffers: HashMap<AudioStreamSource, VecDeque<AudioFrame>>,
    current_position_ms: u64,
}

impl StreamMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            "Stream mixer initialized: {}Hz, policy {:?}",
            config.sample_rate, config.policy
        );

        let mut buffers = HashMap::new();
        buffers.insert(AudioStreamSource::Microphone, VecDeque::new());
        buffers.insert(AudioStreamSource::System, VecDeque::new());

        Self {
            config,
            buffers,
            current_position_ms: 0,
        }
    }

    /// Consume tagged frames until the input closes, forwarding combined
    /// frames. Returns when either side of the pipeline goes away.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<AudioFrame>,
        tx: mpsc::Sender<AudioFrame>,
    ) {
        while let Some(frame) = rx.recv().await {
            self.buffer_frame(frame);
            while let Some(mixed) = self.mix_next() {
                if tx.send(mixed).await.is_err() {
                    debug!("Combined stream consumer gone, mixer stopping");
                    return;
                }
            }
        }

        // Flush whatever is still buffered
        while let Some(mixed) = self.mix_next() {
            if tx.send(mixed).await.is_err() {
                break;
            }
        }
        debug!("Mixer input closed, mixer stopping");
    }

    /// Buffer a frame under its source, enforcing the input format
    fn buffer_frame(&mut self, frame: AudioFrame) {
        if frame.sample_rate != self.config.sample_rate {
            warn!(
                "Frame sample rate mismatch: expected {}, got {}. Dropping frame.",
                self.config.sample_rate, frame.sample_rate
            );
            return;
        }
        if frame.channels != 1 {
            warn!(
                "Mixer inputs must be mono, got {} channels. Dropping frame.",
                frame.channels
            );
            return;
        }

        if let Some(buffer) = self.buffers.get_mut(&frame.source) {
            buffer.push_back(frame);
        }
        self.drop_stale_frames();
    }

    /// Remove frames older than the max buffer delay
    fn drop_stale_frames(&mut self) {
        let cutoff = self
            .current_position_ms
            .saturating_sub(self.config.max_buffer_delay_ms);

        for (source, buffer) in &mut self.buffers {
            while let Some(frame) = buffer.front() {
                if frame.timestamp_ms < cutoff {
                    warn!(
                        "Dropping stale {:?} frame at {}ms (position {}ms)",
                        source, frame.timestamp_ms, self.current_position_ms
                    );
                    buffer.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Produce the next combined frame, if any input is available
    fn mix_next(&mut self) -> Option<AudioFrame> {
        let mic = self
            .buffers
            .get_mut(&AudioStreamSource::Microphone)
            .and_then(VecDeque::pop_front);
        let system = self
            .buffers
            .get_mut(&AudioStreamSource::System)
            .and_then(VecDeque::pop_front);

        if mic.is_none() && system.is_none() {
            return None;
        }

        let mixed = match self.config.policy {
            MixPolicy::Additive => self.mix_additive(mic, system),
            MixPolicy::ChannelSeparated => self.mix_channel_separated(mic, system),
        };
        self.current_position_ms = mixed.timestamp_ms;
        Some(mixed)
    }

    /// Sum both sources sample-by-sample with clipping
    fn mix_additive(&self, mic: Option<AudioFrame>, system: Option<AudioFrame>) -> AudioFrame {
        let timestamp_ms = earliest_timestamp(&mic, &system);
        let mic_samples = mic.map(|f| f.samples).unwrap_or_default();
        let system_samples = system.map(|f| f.samples).unwrap_or_default();
        let len = mic_samples.len().max(system_samples.len());

        let mut samples = Vec::with_capacity(len);
        for i in 0..len {
            let a = mic_samples.get(i).copied().unwrap_or(0) as i32;
            let b = system_samples.get(i).copied().unwrap_or(0) as i32;
            samples.push((a + b).clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }

        AudioFrame {
            samples,
            sample_rate: self.config.sample_rate,
            channels: 1,
            timestamp_ms,
            source: AudioStreamSource::Microphone,
        }
    }

    /// Interleave microphone left, system audio right
    fn mix_channel_separated(
        &self,
        mic: Option<AudioFrame>,
        system: Option<AudioFrame>,
    ) -> AudioFrame {
        let timestamp_ms = earliest_timestamp(&mic, &system);
        let mic_samples = mic.map(|f| f.samples).unwrap_or_default();
        let system_samples = system.map(|f| f.samples).unwrap_or_default();
        let len = mic_samples.len().max(system_samples.len());

        let mut samples = Vec::with_capacity(len * 2);
        for i in 0..len {
            samples.push(mic_samples.get(i).copied().unwrap_or(0));
            samples.push(system_samples.get(i).copied().unwrap_or(0));
        }

        AudioFrame {
            samples,
            sample_rate: self.config.sample_rate,
            channels: 2,
            timestamp_ms,
            source: AudioStreamSource::Microphone,
        }
    }
}

fn earliest_timestamp(a: &Option<AudioFrame>, b: &Option<AudioFrame>) -> u64 {
    match (a, b) {
        (Some(a), Some(b)) => a.timestamp_ms.min(b.timestamp_ms),
        (Some(a), None) => a.timestamp_ms,
        (None, Some(b)) => b.timestamp_ms,
        (None, None) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(source: AudioStreamSource, samples: Vec<i16>, timestamp_ms: u64) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate: 16000,
            channels: 1,
            timestamp_ms,
            source,
        }
    }

    #[test]
    fn test_additive_sums_both_sources() {
        let mut mixer = StreamMixer::new(MixerConfig::default());
        mixer.buffer_frame(frame(AudioStreamSource::Microphone, vec![100, 200, 300], 0));
        mixer.buffer_frame(frame(AudioStreamSource::System, vec![50, 100, 150], 0));

        let mixed = mixer.mix_next().unwrap();
        assert_eq!(mixed.channels, 1);
        assert_eq!(mixed.samples, vec![150, 300, 450]);
    }

    #[test]
    fn test_additive_clips_overflow() {
        let mut mixer = StreamMixer::new(MixerConfig::default());
        mixer.buffer_frame(frame(
            AudioStreamSource::Microphone,
            vec![i16::MAX - 100],
            0,
        ));
        mixer.buffer_frame(frame(AudioStreamSource::System, vec![200], 0));

        let mixed = mixer.mix_next().unwrap();
        assert_eq!(mixed.samples, vec![i16::MAX]);
    }

    #[test]
    fn test_additive_pads_shorter_frame() {
        let mut mixer = StreamMixer::new(MixerConfig::default());
        mixer.buffer_frame(frame(AudioStreamSource::Microphone, vec![100, 200], 0));
        mixer.buffer_frame(frame(
            AudioStreamSource::System,
            vec![50, 100, 150, 200],
            0,
        ));

        let mixed = mixer.mix_next().unwrap();
        assert_eq!(mixed.samples, vec![150, 300, 150, 200]);
    }

    #[test]
    fn test_channel_separated_routes_mic_left_system_right() {
        let config = MixerConfig {
            policy: MixPolicy::ChannelSeparated,
            ..Default::default()
        };
        let mut mixer = StreamMixer::new(config);
        mixer.buffer_frame(frame(AudioStreamSource::Microphone, vec![1000, 2000], 0));
        mixer.buffer_frame(frame(AudioStreamSource::System, vec![-500, -600], 0));

        let mixed = mixer.mix_next().unwrap();
        assert_eq!(mixed.channels, 2);
        // Interleaved LRLR
        assert_eq!(mixed.samples, vec![1000, -500, 2000, -600]);

        let left: Vec<i16> = mixed.samples.iter().step_by(2).copied().collect();
        let right: Vec<i16> = mixed.samples.iter().skip(1).step_by(2).copied().collect();
        assert_eq!(left, vec![1000, 2000]);
        assert_eq!(right, vec![-500, -600]);
    }

    #[test]
    fn test_channel_separated_silences_missing_source() {
        let config = MixerConfig {
            policy: MixPolicy::ChannelSeparated,
            ..Default::default()
        };
        let mut mixer = StreamMixer::new(config);
        mixer.buffer_frame(frame(AudioStreamSource::Microphone, vec![700, 800], 10));

        let mixed = mixer.mix_next().unwrap();
        assert_eq!(mixed.samples, vec![700, 0, 800, 0]);
        assert_eq!(mixed.timestamp_ms, 10);
    }

    #[test]
    fn test_mismatched_sample_rate_dropped() {
        let mut mixer = StreamMixer::new(MixerConfig::default());
        mixer.buffer_frame(AudioFrame {
            samples: vec![1, 2, 3],
            sample_rate: 48000,
            channels: 1,
            timestamp_ms: 0,
            source: AudioStreamSource::Microphone,
        });
        assert!(mixer.mix_next().is_none());
    }

    #[test]
    fn test_stale_frames_dropped() {
        let config = MixerConfig {
            max_buffer_delay_ms: 200,
            ..Default::default()
        };
        let mut mixer = StreamMixer::new(config);

        // Advance the mixer position to 1000ms
        mixer.buffer_frame(frame(AudioStreamSource::Microphone, vec![1], 1000));
        assert!(mixer.mix_next().is_some());

        // A frame from 500ms is beyond the 200ms delay window
        mixer.buffer_frame(frame(AudioStreamSource::System, vec![2], 500));
        assert!(mixer.mix_next().is_none());
    }

    #[tokio::test]
    async fn test_run_forwards_until_input_closes() {
        let (in_tx, in_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);

        let mixer = StreamMixer::new(MixerConfig::default());
        let task = tokio::spawn(mixer.run(in_rx, out_tx));

        in_tx
            .send(frame(AudioStreamSource::Microphone, vec![10, 20], 0))
            .await
            .unwrap();
        drop(in_tx);

        let mixed = out_rx.recv().await.expect("one combined frame");
        assert_eq!(mixed.samples, vec![10, 20]);
        assert!(out_rx.recv().await.is_none());
        task.await.unwrap();
    }
}
