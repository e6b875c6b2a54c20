use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use heychef::api::{self, ApiState};
use heychef::session::SessionDefaults;
use heychef::voice::{AudioInput, AudioPlayback, Microphone, tts, vad};
use heychef::{
    Config, Error, FileRecipe, LiveBackend, NotionRecipe, PersonaPromptStore, RecipeSource,
    SessionManager, StartRequest, StopSignal,
};

/// Hey Chef - hands-free cooking assistant
#[derive(Parser)]
#[command(name = "heychef", version, about)]
struct Cli {
    /// Persona to answer with (e.g., "normal", "sassy")
    #[arg(short, long, env = "HEYCHEF_PERSONA")]
    persona: Option<String>,

    /// Recipe file to start a session with (text, markdown or YAML)
    #[arg(short, long, env = "HEYCHEF_RECIPE")]
    recipe: Option<PathBuf>,

    /// Notion page id to read the recipe from (needs NOTION_API_TOKEN)
    #[arg(long, env = "HEYCHEF_RECIPE_PAGE", conflicts_with = "recipe")]
    recipe_page: Option<String>,

    /// Treat every question independently instead of keeping a conversation
    #[arg(long)]
    no_history: bool,

    /// Speak while the answer is still being generated
    #[arg(long)]
    streaming: bool,

    /// Port for the HTTP control surface
    #[arg(long, env = "HEYCHEF_PORT")]
    port: Option<u16>,

    /// Do not start the HTTP control surface
    #[arg(long)]
    no_api: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List available personas
    Personas,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,heychef=info",
        1 => "info,heychef=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let persona = cli.persona.clone();

    // Subcommands use blocking audio and HTTP clients
    if let Some(cmd) = cli.command {
        return tokio::task::spawn_blocking(move || match cmd {
            Command::TestMic { duration } => test_mic(persona.as_deref(), duration),
            Command::TestSpeaker => test_speaker(),
            Command::TestTts { text } => test_tts(persona.as_deref(), &text),
            Command::Personas => list_personas(persona.as_deref()),
        })
        .await?;
    }

    let mut config = Config::load(persona.as_deref())?;
    if cli.no_history {
        config.session.maintain_history = false;
    }
    if cli.streaming {
        config.session.streaming = true;
    }
    if let Some(path) = cli.recipe {
        config.session.recipe_path = Some(path);
    }
    if let Some(page) = cli.recipe_page {
        config.session.recipe_page = Some(page);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    let personas = PersonaPromptStore::load(&config.persona_dir)?;
    personas.get(&config.session.persona)?;

    let defaults = SessionDefaults::from(&config);
    let recipe = StartupRecipe::from_config(&config);
    let port = config.server.port;
    let backend = Arc::new(LiveBackend::new(Arc::new(config)));
    let session = Arc::new(SessionManager::new(backend, Arc::new(personas), defaults));

    if cli.no_api && recipe.is_none() {
        anyhow::bail!(
            "nothing to do: pass --recipe or --recipe-page, or leave the HTTP control surface enabled"
        );
    }

    let server = (!cli.no_api).then(|| {
        let state = Arc::new(ApiState::new(Arc::clone(&session)));
        tokio::spawn(async move { api::serve(state, port).await })
    });

    if let Some(source) = recipe {
        let starter = Arc::clone(&session);
        let session_id = tokio::task::spawn_blocking(move || {
            let recipe = source.fetch()?;
            starter.start(StartRequest::new(recipe))
        })
        .await??;
        tracing::info!(%session_id, "hey chef ready - say \"{}\"", heychef::config::DEFAULT_WAKE_PHRASE);
    }

    match server {
        Some(server) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                result = server => result??,
            }
        }
        None => {
            let waiter = Arc::clone(&session);
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                result = tokio::task::spawn_blocking(move || waiter.wait()) => {
                    let summary = result??;
                    tracing::info!(turns = summary.turns_completed, "voice session ended");
                    return Ok(());
                }
            }
        }
    }

    tracing::info!("shutting down");
    let stopper = Arc::clone(&session);
    match tokio::task::spawn_blocking(move || stopper.stop_and_wait()).await? {
        Ok(summary) => {
            tracing::info!(turns = summary.turns_completed, "voice session ended");
        }
        Err(Error::NotRunning) => {}
        Err(e) => tracing::warn!(error = %e, "voice session ended with error"),
    }

    Ok(())
}

/// Test microphone input
/// Recipe to start a session with at launch
enum StartupRecipe {
    File(PathBuf),
    Notion { page: String, token: String },
}

impl StartupRecipe {
    /// A recipe file wins over a Notion page
    fn from_config(config: &Config) -> Option<Self> {
        if let Some(path) = &config.session.recipe_path {
            return Some(Self::File(path.clone()));
        }
        config.session.recipe_page.as_ref().map(|page| Self::Notion {
            page: page.clone(),
            token: config.api_keys.notion.clone().unwrap_or_default(),
        })
    }

    /// Blocking; call off the async runtime
    fn fetch(self) -> heychef::Result<String> {
        match self {
            Self::File(path) => FileRecipe::new(path).fetch(),
            Self::Notion { page, token } => NotionRecipe::new(token, page)?.fetch(),
        }
    }
}

fn test_mic(persona: Option<&str>, duration: u64) -> anyhow::Result<()> {
    let config = Config::load(persona)?;
    let sample_rate = config.audio.sample_rate;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut source = Microphone::new()?.open(sample_rate)?;
    let mut gate = vad::from_config(&config.audio)?;
    let frame_len = usize::try_from(sample_rate / 10)?;

    let deadline = Instant::now() + Duration::from_secs(duration);
    let mut second = 0;
    let mut window = Vec::new();
    while Instant::now() < deadline {
        let Some(frame) = source.read_frame(frame_len)? else {
            break;
        };
        window.extend_from_slice(&frame);
        if window.len() < usize::try_from(sample_rate)? {
            continue;
        }
        second += 1;

        let energy = vad::rms_energy(&window);
        let speech_frames = window
            .chunks_exact(heychef::voice::recorder::frame_length(
                sample_rate,
                config.audio.frame_duration_ms,
            ))
            .filter(|f| gate.is_speech(f).unwrap_or(false))
            .count();

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{second:2}s] RMS: {energy:.4} | speech frames: {speech_frames:3} | [{meter}]");
        window.clear();
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check your input device and its levels.");

    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = AudioPlayback::new(StopSignal::new())?;

    let sample_rate = 24_000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    playback.play_samples(samples, sample_rate)?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output with the configured provider
fn test_tts(persona: Option<&str>, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load(persona)?;
    println!("Provider: {:?}", config.speech.tts_provider);

    let renderer = tts::from_config(&config, &StopSignal::new())?;
    renderer.render_and_play(text)?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print the personas that can be selected
fn list_personas(persona: Option<&str>) -> anyhow::Result<()> {
    let config = Config::load(persona)?;
    let store = PersonaPromptStore::load(&config.persona_dir)?;

    for p in store.iter() {
        let marker = if p.id == config.session.persona { "*" } else { " " };
        match &p.description {
            Some(description) => println!("{marker} {:<12} {description}", p.id),
            None => println!("{marker} {}", p.id),
        }
    }

    Ok(())
}
