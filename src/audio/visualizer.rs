// Live spectrum analysis for the capture streams.
//
// Purely cosmetic consumer: a frame-rate tick loop reads recent samples
// from a ring buffer, runs an FFT, and emits normalized frequency-bin
// magnitudes. The loop ends and the analysis state is dropped as soon as
// the input stream closes or the consumer goes away; a leaked loop or a
// dangling analysis buffer is a defect.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::frame::AudioFrame;

/// Configuration for the spectrum analyzer
#[derive(Debug, Clone)]
pub struct SpectrumConfig {
    /// FFT window size (power of two)
    pub fft_size: usize,
    /// Number of frequency bars emitted per frame
    pub bars: usize,
    /// Emission interval in milliseconds (~30 fps)
    pub frame_interval_ms: u64,
    /// EMA smoothing factor (1.0 = no smoothing)
    pub smoothing: f32,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            bars: 24,
            frame_interval_ms: 33,
            smoothing: 0.3,
        }
    }
}

/// One emitted view of the spectrum, bars normalized to 0.0..=1.0
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    pub bars: Vec<f32>,
}

/// Spectrum analyzer over a live audio-frame stream
pub struct SpectrumAnalyzer {
    config: SpectrumConfig,
    fft: Arc<dyn Fft<f32>>,
    window: VecDeque<i16>,
    smoothed: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new(config: SpectrumConfig) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(config.fft_size);
        let smoothed = vec![0.0; config.bars];
        Self {
            config,
            fft,
            window: VecDeque::new(),
            smoothed,
        }
    }

    /// Spawn the analysis loop over `rx`, returning the spectrum stream.
    ///
    /// The task exits when `rx` closes or the returned receiver is dropped.
    pub fn spawn(config: SpectrumConfig, rx: mpsc::Receiver<AudioFrame>) -> mpsc::Receiver<SpectrumFrame> {
        let (tx, out_rx) = mpsc::channel(16);
        let analyzer = SpectrumAnalyzer::new(config);
        let _task: JoinHandle<()> = tokio::spawn(analyzer.run(rx, tx));
        out_rx
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<AudioFrame>,
        tx: mpsc::Sender<SpectrumFrame>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.frame_interval_ms));
        loop {
            tokio::select! {
                maybe_frame = rx.recv() => match maybe_frame {
                    Some(frame) => self.push_samples(&frame.samples),
                    None => break,
                },
                _ = tick.tick() => {
                    let frame = SpectrumFrame { bars: self.analyze() };
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Spectrum analyzer stopped");
    }

    /// Append samples, keeping only the newest FFT window
    pub fn push_samples(&mut self, samples: &[i16]) {
        for &s in samples {
            self.window.push_back(s);
        }
        while self.window.len() > self.config.fft_size {
            self.window.pop_front();
        }
    }

    /// Compute the current bar magnitudes from the sample window
    pub fn analyze(&mut self) -> Vec<f32> {
        let n = self.config.fft_size;
        let mut buffer: Vec<Complex<f32>> = self
            .window
            .iter()
            .map(|&s| Complex::new(s as f32 / i16::MAX as f32, 0.0))
            .collect();
        buffer.resize(n, Complex::new(0.0, 0.0));

        self.fft.process(&mut buffer);

        // Only the first half of the FFT output is meaningful for real input
        let half = n / 2;
        let magnitudes: Vec<f32> = buffer[..half]
            .iter()
            .map(|c| c.norm() / half as f32)
            .collect();

        let per_bar = (half / self.config.bars).max(1);
        let alpha = self.config.smoothing;
        let mut bars = Vec::with_capacity(self.config.bars);
        for (i, smoothed) in self.smoothed.iter_mut().enumerate() {
            let start = i * per_bar;
            let end = ((i + 1) * per_bar).min(half);
            let peak = if start < end {
                magnitudes[start..end]
                    .iter()
                    .fold(0.0f32, |acc, &m| acc.max(m))
            } else {
                0.0
            };
            *smoothed = alpha * peak.min(1.0) + (1.0 - alpha) * *smoothed;
            bars.push(*smoothed);
        }
        bars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::AudioStreamSource;

    #[test]
    fn test_silence_produces_zero_bars() {
        let mut analyzer = SpectrumAnalyzer::new(SpectrumConfig::default());
        analyzer.push_samples(&vec![0i16; 256]);
        let bars = analyzer.analyze();
        assert_eq!(bars.len(), 24);
        assert!(bars.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_tone_raises_some_bar() {
        let config = SpectrumConfig {
            smoothing: 1.0,
            ..Default::default()
        };
        let mut analyzer = SpectrumAnalyzer::new(config);

        // 1/8 of the sample rate: a tone well inside the analyzed band
        let samples: Vec<i16> = (0..256)
            .map(|i| {
                let phase = i as f32 * std::f32::consts::TAU / 8.0;
                (phase.sin() * 20000.0) as i16
            })
            .collect();
        analyzer.push_samples(&samples);

        let bars = analyzer.analyze();
        assert!(bars.iter().any(|&b| b > 0.1), "expected spectral energy");
    }

    #[test]
    fn test_window_keeps_newest_samples() {
        let config = SpectrumConfig {
            fft_size: 8,
            ..Default::default()
        };
        let mut analyzer = SpectrumAnalyzer::new(config);
        analyzer.push_samples(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(analyzer.window.len(), 8);
        assert_eq!(*analyzer.window.front().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_loop_stops_when_stream_closes() {
        let (tx, rx) = mpsc::channel(4);
        let mut spectrum = SpectrumAnalyzer::spawn(SpectrumConfig::default(), rx);

        tx.send(AudioFrame {
            samples: vec![1000i16; 256],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: 0,
            source: AudioStreamSource::Microphone,
        })
        .await
        .unwrap();

        // Closing the input must end the analysis loop, which closes the
        // spectrum stream after draining.
        drop(tx);
        while spectrum.recv().await.is_some() {}
    }
}
