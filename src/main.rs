use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use voicedock::chat::{ChatConfig, HttpChatClient};
use voicedock::config::{load_api_config, ApiConfig, DockConfig};
use voicedock::discovery;
use voicedock::history::{FileHistory, HistorySink};
use voicedock::session::{
    Collaborators, ConnectionState, DeviceSession, SessionEvent, SessionObserver,
};
use voicedock::transcribe::{HttpTranscriber, TranscriberConfig};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Host-side session engine for a serial voice-assistant peripheral",
    long_about = None
)]
struct Args {
    /// List candidate serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Serial port path; auto-detected when omitted
    #[arg(long)]
    port: Option<String>,

    /// Run without the transcription and chat services
    #[arg(long)]
    offline: bool,

    /// Directory where captured utterances are archived
    #[arg(long, default_value = "utterances")]
    history_dir: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_ports {
        return print_ports();
    }

    log::info!("🚀 Starting voicedock");

    let port = match &args.port {
        Some(path) => path.clone(),
        None => autodetect_port()?,
    };

    let session = DeviceSession::new(DockConfig::default())
        .with_collaborators(build_collaborators(&args))
        .with_observer(console_observer())
        .spawn();

    session
        .connect(&port)
        .await
        .context("session task rejected connect")?;

    println!("🎧 Talking to the peripheral on {}", port);
    println!("   Press Ctrl+C to exit");

    let mut watch = session.watch();
    let failure = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received Ctrl+C, shutting down...");
                break None;
            }
            changed = watch.changed() => {
                if changed.is_err() {
                    break Some("session task stopped unexpectedly".to_string());
                }
                let state = watch.borrow_and_update().state.clone();
                if let ConnectionState::Error(reason) = state {
                    break Some(reason);
                }
            }
        }
    };

    session.shutdown().await;
    match failure {
        Some(reason) => anyhow::bail!("session ended with error: {}", reason),
        None => {
            println!("\n👋 Goodbye!");
            Ok(())
        }
    }
}

fn print_ports() -> anyhow::Result<()> {
    let ports = discovery::scan_ports().context("failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let marker = if port.is_likely_peripheral() {
            "📡"
        } else {
            "  "
        };
        println!("{} {}  [{}]", marker, port.path, port.tags.join(", "));
        if port.name != port.path {
            println!("     {}", port.name);
        }
    }
    Ok(())
}

fn autodetect_port() -> anyhow::Result<String> {
    let candidates =
        discovery::likely_peripherals().context("failed to enumerate serial ports")?;
    match candidates.as_slice() {
        [] => anyhow::bail!(
            "no likely peripheral found; run with --list-ports or pass --port <path>"
        ),
        [only] => {
            log::info!("📡 Auto-selected {} ({})", only.path, only.name);
            Ok(only.path.clone())
        }
        many => {
            eprintln!("Multiple candidate peripherals found:");
            for candidate in many {
                eprintln!("  {}  ({})", candidate.path, candidate.name);
            }
            anyhow::bail!("pass --port <path> to choose one")
        }
    }
}

/// Wire up the speech services. Missing API keys degrade to archive-only
/// instead of refusing to start; the session itself never needs them.
fn build_collaborators(args: &Args) -> Collaborators {
    let history = match FileHistory::new(&args.history_dir) {
        Ok(history) => Some(Arc::new(history) as Arc<dyn HistorySink>),
        Err(e) => {
            log::warn!("📝 Utterance archive disabled: {}", e);
            None
        }
    };

    if args.offline {
        log::info!("Running offline; utterances are archived but not transcribed");
        return Collaborators {
            history,
            ..Default::default()
        };
    }

    match load_api_config() {
        Ok(api) => {
            let ApiConfig {
                transcribe_key,
                transcribe_url,
                transcribe_model,
                chat_key,
                chat_url,
                chat_model,
            } = api;
            let transcriber = HttpTranscriber::with_config(
                transcribe_key,
                TranscriberConfig {
                    url: transcribe_url,
                    model: transcribe_model,
                    ..Default::default()
                },
            );
            let chat = HttpChatClient::with_config(
                chat_key,
                ChatConfig {
                    url: chat_url,
                    model: chat_model,
                    ..Default::default()
                },
            );
            Collaborators {
                transcriber: Some(Arc::new(transcriber)),
                chat: Some(Arc::new(chat)),
                history,
            }
        }
        Err(e) => {
            log::warn!(
                "⚠️ Speech services unavailable ({}); captures are archived only",
                e
            );
            Collaborators {
                history,
                ..Default::default()
            }
        }
    }
}

fn console_observer() -> SessionObserver {
    Box::new(|event| match event {
        SessionEvent::StateChanged(state) => println!("🔌 Session {}", state),
        SessionEvent::StatusUpdated(status) => println!(
            "📡 Device: phase={} wake_word={:?} wifi={} api={}",
            status.voice_assistant_phase,
            status.wake_word,
            status.wifi_connected,
            status.api_connected
        ),
        SessionEvent::WakeWordOptions(options) => {
            println!("👂 Available wake words: {}", options.join(", "));
        }
        SessionEvent::ConfigApplied => println!("✅ Config applied"),
        SessionEvent::WakeWordDetected => println!("🎯 Wake word detected"),
        SessionEvent::ButtonPressed => println!("🎯 Button pressed"),
        SessionEvent::CaptureStarted => println!("🎤 Recording..."),
        SessionEvent::CaptureDiscarded { samples } => {
            println!("🎤 Too short, discarded ({} samples)", samples);
        }
        SessionEvent::UtteranceCaptured {
            samples,
            duration_ms,
        } => println!("🎤 Captured {} ms of speech ({} samples)", duration_ms, samples),
        SessionEvent::TranscriptReady(text) => println!("✨ You said: \"{}\"", text),
        SessionEvent::ResponseReady(text) => println!("🗣️  Response: {}", text),
        SessionEvent::PipelineError { stage, error } => println!("❌ {} failed: {}", stage, error),
        SessionEvent::DeviceTimeout(kind) => println!("⚠️ Device reported {}", kind),
        SessionEvent::VadStart | SessionEvent::VadEnd => {}
    })
}
