use std::time::Duration;

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::audio::MixPolicy;
use crate::session::SessionConfig;
use crate::transport::realtime::VadConfig;
use crate::transport::TransportKind;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub mixer: MixerSettings,
    pub transport: TransportSettings,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Outgoing chunk interval for the socket transport (1000-3000 ms)
    pub chunk_interval_ms: u64,
    /// Loopback/monitor device for system audio, autodetected when absent
    pub system_device: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MixerSettings {
    /// "additive" or "channel-separated"
    pub policy: String,
}

#[derive(Debug, Deserialize)]
pub struct TransportSettings {
    /// "socket" or "realtime"
    pub kind: String,
    /// Ingest socket URL (socket transport)
    pub socket_url: String,
    /// Session-bootstrap endpoint (realtime transport)
    pub bootstrap_url: String,
    /// Negotiation endpoint base URL (realtime transport)
    pub base_url: String,
    /// Transcription model (realtime transport)
    pub model: String,
    pub vad: VadSettings,
}

#[derive(Debug, Deserialize)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "thera-scribe")?
            .set_default("audio.sample_rate", 16000)?
            .set_default("audio.chunk_interval_ms", 1000)?
            .set_default("mixer.policy", "additive")?
            .set_default("transport.kind", "socket")?
            .set_default("transport.socket_url", "wss://ingest.example.com/audio")?
            .set_default("transport.bootstrap_url", "https://sessions.example.com")?
            .set_default("transport.base_url", "https://api.example.com/v1/realtime")?
            .set_default("transport.model", "scribe-realtime-1")?
            .set_default("transport.vad.threshold", 0.5)?
            .set_default("transport.vad.prefix_padding_ms", 300)?
            .set_default("transport.vad.silence_duration_ms", 500)?
            .add_source(config::File::with_name(path).required(false))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn mix_policy(&self) -> Result<MixPolicy> {
        match self.mixer.policy.as_str() {
            "additive" => Ok(MixPolicy::Additive),
            "channel-separated" => Ok(MixPolicy::ChannelSeparated),
            other => bail!("unknown mixer policy '{other}'"),
        }
    }

    pub fn transport_kind(&self) -> Result<TransportKind> {
        match self.transport.kind.as_str() {
            "socket" => Ok(TransportKind::Socket),
            "realtime" => Ok(TransportKind::Realtime),
            other => bail!("unknown transport kind '{other}'"),
        }
    }

    pub fn vad(&self) -> VadConfig {
        VadConfig {
            threshold: self.transport.vad.threshold,
            prefix_padding_ms: self.transport.vad.prefix_padding_ms,
            silence_duration_ms: self.transport.vad.silence_duration_ms,
        }
    }

    /// Session configuration derived from this deployment config
    pub fn session_config(&self, device_id: Option<String>) -> Result<SessionConfig> {
        Ok(SessionConfig {
            device_id,
            sample_rate: self.audio.sample_rate,
            chunk_interval: Duration::from_millis(self.audio.chunk_interval_ms),
            mix_policy: self.mix_policy()?,
            transport: self.transport_kind()?,
            ..Default::default()
        })
    }
}
