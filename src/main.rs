use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use thera_scribe::transport::realtime::{RealtimeConfig, RealtimePeerFactory};
use thera_scribe::transport::socket::SocketTransportFactory;
use thera_scribe::{
    list_audio_inputs, CaptureSession, Config, CpalCaptureFactory, StaticAuthProvider,
    TransportFactory, TransportKind,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "thera-scribe", about = "Therapy-session capture and transcription client")]
struct Cli {
    /// Config file path (TOML)
    #[arg(long, default_value = "config/thera-scribe")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available audio-input devices
    Devices,
    /// Record until interrupted, printing the transcript on stop
    Record {
        /// Microphone device id (from `devices`)
        #[arg(long)]
        device: Option<String>,
        /// Print live spectrum bars while recording
        #[arg(long)]
        spectrum: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Devices => {
            let devices = list_audio_inputs()?;
            if devices.is_empty() {
                println!("No audio input devices found.");
            }
            for device in devices {
                println!("{}", device.device_id);
            }
        }
        Command::Record { device, spectrum } => {
            record(&cfg, device, spectrum).await?;
        }
    }

    Ok(())
}

async fn record(cfg: &Config, device: Option<String>, spectrum: bool) -> Result<()> {
    let mut session_config = cfg.session_config(device)?;
    session_config.visualize = spectrum;

    let transports: Arc<dyn TransportFactory> = match session_config.transport {
        TransportKind::Socket => Arc::new(SocketTransportFactory {
            url: cfg.transport.socket_url.clone(),
        }),
        TransportKind::Realtime => Arc::new(RealtimePeerFactory {
            config: RealtimeConfig {
                bootstrap_url: cfg.transport.bootstrap_url.clone(),
                base_url: cfg.transport.base_url.clone(),
                model: cfg.transport.model.clone(),
                vad: cfg.vad(),
            },
        }),
    };

    let sources = Arc::new(CpalCaptureFactory {
        system_device: cfg.audio.system_device.clone(),
    });

    // The surrounding product performs real authentication before this
    // point; the CLI stands in for a signed-in operator.
    let auth = Arc::new(StaticAuthProvider::signed_in("cli-operator"));

    let session = CaptureSession::new(session_config, auth, sources, transports);
    session.start().await?;
    info!("Recording. Press Ctrl-C to stop.");

    if let Some(mut frames) = session.take_spectrum() {
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                print!("\r{}", render_bars(&frame.bars));
                use std::io::Write;
                let _ = std::io::stdout().flush();
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    println!();

    let stats = session.stop().await?;
    info!(
        "Stopped after {:.1}s: {} chunks sent, {} transcript entries",
        stats.duration_secs, stats.chunks_sent, stats.transcript_entries
    );

    for entry in session.transcript().await {
        let speaker = entry.speaker.as_deref().unwrap_or("Sistema");
        println!("[{}] {}: {}", entry.timestamp, speaker, entry.text);
    }

    Ok(())
}

fn render_bars(bars: &[f32]) -> String {
    const GLYPHS: [char; 5] = [' ', '▂', '▄', '▆', '█'];
    bars.iter()
        .map(|&level| {
            let idx = ((level * (GLYPHS.len() - 1) as f32).round() as usize).min(GLYPHS.len() - 1);
            GLYPHS[idx]
        })
        .collect()
}
