use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use anyhow::anyhow;

use voicebridge_gateway::{
    ServerConfig,
    client::{
        BridgeConnection, Conversation, ConversationConfig, WavOutput, bridge_url,
        conversation::DEFAULT_FRAME_SAMPLES, read_wav_samples,
    },
    core::realtime::ScenarioParameters,
    core::turn::{Role, TranscriptMessage},
    routes,
    state::AppState,
};

/// Voice Bridge Gateway - realtime speech-to-speech conversation bridge
#[derive(Parser, Debug)]
#[command(name = "voicebridge-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to serving)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the bridge server
    Serve,

    /// Hold one conversation turn against a running bridge
    Converse(ConverseArgs),
}

#[derive(Args, Debug)]
struct ConverseArgs {
    /// Bridge WebSocket endpoint
    #[arg(long, default_value = "ws://127.0.0.1:3001/realtime")]
    url: String,

    /// Voice id or alias (e.g. alloy, AndrewNeural)
    #[arg(long)]
    voice: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Mono 16-bit 24 kHz WAV file streamed as microphone input
    #[arg(short = 'i', long, value_name = "WAV")]
    input: Option<PathBuf>,

    /// Typed message sent instead of audio
    #[arg(short = 't', long, conflicts_with = "input")]
    text: Option<String>,

    /// Where the agent's audio is written
    #[arg(short = 'o', long, value_name = "WAV", default_value = "reply.wav")]
    output: PathBuf,

    #[arg(long)]
    persona: Option<String>,

    #[arg(long)]
    scenario: Option<String>,

    #[arg(long)]
    mood: Option<String>,

    #[arg(long)]
    language: Option<String>,

    /// Seconds to wait for the reply to finish
    #[arg(long, default_value_t = 60)]
    timeout: u64,
}

impl ConverseArgs {
    fn parameters(&self) -> Option<ScenarioParameters> {
        if self.persona.is_none()
            && self.scenario.is_none()
            && self.mood.is_none()
            && self.language.is_none()
        {
            return None;
        }
        Some(ScenarioParameters {
            voice: self.voice.clone(),
            temperature: self.temperature,
            persona: self.persona.clone(),
            scenario: self.scenario.clone(),
            mood: self.mood.clone(),
            language: self.language.clone(),
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Converse(args)) => converse(args).await,
        Some(Commands::Serve) | None => serve(cli.config).await,
    }
}

async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    // Load configuration from file or environment
    let config = if let Some(config_path) = config_path {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; upstream connections are made without credentials");
    }

    let address = config.address();
    info!(
        upstream = %config.upstream_endpoint(),
        default_voice = %config.default_voice,
        "Starting server on {address}"
    );

    // Create application state
    let app_state = AppState::new(config).map_err(|e| anyhow!(e.to_string()))?;
    let app = routes::build_router(app_state);

    // Parse socket address
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    println!("Server listening on http://{}", socket_addr);

    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn converse(args: ConverseArgs) -> anyhow::Result<()> {
    let input = match &args.input {
        Some(path) => Some(read_wav_samples(path)?),
        None => None,
    };
    if input.is_none() && args.text.is_none() {
        anyhow::bail!("Either --input or --text is required");
    }

    let url = bridge_url(&args.url, args.voice.as_deref(), args.temperature)?;
    let connection = BridgeConnection::connect(url.as_str()).await?;
    println!("Connected, session {}", connection.session_id());

    let (transcript_tx, mut transcript_rx) = mpsc::unbounded_channel::<TranscriptMessage>();
    let printer = tokio::spawn(async move {
        while let Some(message) = transcript_rx.recv().await {
            let speaker = match message.role {
                Role::User => "you",
                Role::Assistant => "agent",
            };
            let marker = if message.interrupted { " [interrupted]" } else { "" };
            println!("{speaker}: {}{marker}", message.text);
        }
    });

    let config = ConversationConfig {
        response_timeout: Duration::from_secs(args.timeout),
        ..Default::default()
    };
    let mut conversation = Conversation::new(
        connection,
        WavOutput::create(&args.output),
        Box::new(transcript_tx),
        config,
    );

    if let Some(parameters) = args.parameters() {
        conversation.configure(parameters)?;
    }

    let result = async {
        match (&input, &args.text) {
            (Some(samples), _) => {
                conversation.start_capture()?;
                conversation
                    .stream_samples(samples, DEFAULT_FRAME_SAMPLES)
                    .await?;
                conversation.stop_capture().await;
            }
            (None, Some(text)) => conversation.send_text(text)?,
            (None, None) => {}
        }
        conversation.wait_until_idle().await
    }
    .await;

    conversation.shutdown().await;
    let _ = printer.await;
    result?;

    println!("Agent audio written to {}", args.output.display());
    Ok(())
}
