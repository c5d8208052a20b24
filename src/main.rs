use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voicelink::{Config, Location, StreamUploadClient, VoiceSession};

#[derive(Parser)]
#[command(name = "voicelink", version, about = "Voice conversation and live stream upload clients")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, default_value = "config/voicelink")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hold a text-driven conversation with the voice agent
    Voice {
        /// Messages to send, in order
        #[arg(long = "message", short = 'm')]
        messages: Vec<String>,

        /// Seconds to keep listening after the last message
        #[arg(long, default_value_t = 10)]
        listen_secs: u64,
    },

    /// Stream a file to the ingestion backend chunk by chunk
    Upload {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        user_id: u64,

        /// Session identifier (generated if omitted)
        #[arg(long)]
        session_id: Option<String>,

        #[arg(long, default_value_t = 0.0)]
        lat: f64,

        #[arg(long, default_value_t = 0.0)]
        lng: f64,

        /// End the session as cancelled instead of completed
        #[arg(long)]
        cancel: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("voicelink v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Voice {
            messages,
            listen_secs,
        } => run_voice(cfg, messages, Duration::from_secs(listen_secs)).await,
        Command::Upload {
            file,
            user_id,
            session_id,
            lat,
            lng,
            cancel,
        } => {
            let session_id =
                session_id.unwrap_or_else(|| format!("stream-{}", uuid::Uuid::new_v4()));
            run_upload(cfg, file, user_id, session_id, Location { lat, lng }, cancel).await
        }
    }
}

async fn run_voice(cfg: Config, messages: Vec<String>, listen: Duration) -> Result<()> {
    if !cfg.voice.is_configured() {
        warn!("Voice service is not configured; set voice.api_key or ELEVENLABS_API_KEY");
    }

    let mut session = VoiceSession::new(cfg.voice);
    session.on_transcript(|t| println!("[{}] {}", t.role, t.text));
    session.on_audio(|audio| info!("Received {} bytes of agent audio", audio.len()));
    session.on_error(|e| error!("Voice session error: {}", e));

    session
        .connect()
        .await
        .context("Failed to connect to voice service")?;

    for message in messages {
        session.send_text(message);
    }

    tokio::time::sleep(listen).await;
    session.disconnect().await;

    let history = session.history().await;
    info!("Conversation finished with {} transcript lines", history.len());

    Ok(())
}

async fn run_upload(
    cfg: Config,
    file: PathBuf,
    user_id: u64,
    session_id: String,
    location: Location,
    cancel: bool,
) -> Result<()> {
    let chunk_size = cfg.upload.chunk_size.max(1);
    let mut client = StreamUploadClient::new(cfg.upload);
    info!("Uploading {} to {}", file.display(), client.endpoint());

    let mut reader = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let ack = client
        .start_session(user_id, session_id, location)
        .await
        .context("Failed to start stream session")?;
    info!("Stream session started: {}", ack);

    let mut buffer = vec![0u8; chunk_size];
    let mut chunks = 0usize;
    let mut result = Ok(());

    if !cancel {
        loop {
            let read = match reader.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    result = Err(anyhow::Error::from(e).context("Failed to read input file"));
                    break;
                }
            };

            if let Err(e) = client.upload_chunk(&buffer[..read]).await {
                result = Err(anyhow::Error::from(e).context(format!("Failed to upload chunk {}", chunks)));
                break;
            }
            chunks += 1;
        }
    }

    let cancelled = cancel || result.is_err();
    match client.end_session(cancelled).await {
        Ok(ack) => info!("Stream session closed after {} chunks: {}", chunks, ack),
        Err(e) => error!("Failed to end stream session: {}", e),
    }

    client.disconnect().await;
    result
}
