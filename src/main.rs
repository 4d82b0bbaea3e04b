use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};

use jasper::config::file::{read_config, write_config};
use jasper::config::{default_config_path, default_data_dir, default_log_dir};
use jasper::voice::{
    CpalCapture, CpalDeviceProbe, DeviceProbe, FestivalSynthesizer, SpeechSynthesizer,
    calculate_energy, list_devices,
};
use jasper::{ConfigStore, ConversationHistory, Daemon, RuntimeConfig};

/// Jasper - local voice assistant
#[derive(Parser)]
#[command(name = "jasper", version, about)]
struct Cli {
    /// Path to the config file (JSON, or TOML with a .toml extension)
    #[arg(short, long, env = "JASPER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for conversation history
    #[arg(long, env = "JASPER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory for log files
    #[arg(long, env = "JASPER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List audio devices
    Devices,
    /// Inspect or clear the conversation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
    /// Inspect or initialize the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print stored turns
    Show,
    /// Delete all stored turns
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Resolved filesystem locations
struct Paths {
    config: PathBuf,
    data_dir: PathBuf,
    log_dir: PathBuf,
}

impl Paths {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone().unwrap_or_else(default_config_path),
            data_dir: cli.data_dir.clone().unwrap_or_else(default_data_dir),
            log_dir: cli.log_dir.clone().unwrap_or_else(default_log_dir),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let paths = Paths::from_cli(&cli);

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info",
        1 => "info,jasper=debug",
        2 => "debug",
        _ => "trace",
    };

    // Only the daemon writes a log file; one-shot commands log to stdout.
    // The guard flushes the file sink when main returns.
    let (active_log, _log_guard) = if cli.command.is_none() {
        match jasper::logs::init_tracing(&paths.log_dir, filter) {
            Ok((path, guard)) => (Some(path), Some(guard)),
            Err(e) => {
                eprintln!("failed to set up logging: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .init();
        (None, None)
    };

    match run(cli, paths, active_log).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli, paths: Paths, active_log: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&paths, duration).await,
            Command::TestTts { text } => test_tts(&paths, &text).await,
            Command::Devices => cmd_devices(&paths),
            Command::History { action } => cmd_history(&paths, &action),
            Command::Config { action } => cmd_config(&paths, &action),
        };
    }

    tracing::info!(
        config = %paths.config.display(),
        log = ?active_log,
        "starting jasper"
    );

    let daemon = Daemon::new(paths.config, paths.data_dir, paths.log_dir).with_active_log(active_log);
    daemon.run().await?;

    Ok(())
}

/// Effective configuration, defaults when the file is missing or unreadable
fn load_config(path: &Path) -> RuntimeConfig {
    read_config(path).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "using default configuration");
        RuntimeConfig::default()
    })
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(paths: &Paths, duration: u64) -> anyhow::Result<()> {
    let config = load_config(&paths.config);

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CpalCapture::new(&config.input_device, config.sample_rate);
    capture.start()?;

    println!("Device: {}", config.input_device);
    println!("Sample rate: {} Hz", config.sample_rate);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        // Clear buffer each second
        capture.clear_buffer();
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Check audio_input_device in {}", paths.config.display());

    Ok(())
}

/// Test TTS output through Festival
#[allow(clippy::future_not_send)]
async fn test_tts(paths: &Paths, text: &str) -> anyhow::Result<()> {
    let config = load_config(&paths.config);

    println!("Testing TTS with text: \"{text}\"\n");

    let mut synthesizer = FestivalSynthesizer::new(&config.output_device);
    if !synthesizer.is_installed() {
        anyhow::bail!("text2wave not found; install festival");
    }

    println!("Synthesizing speech at volume {}...", config.volume());
    synthesizer.speak(text, config.volume()).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// List audio devices and probe the configured input
fn cmd_devices(paths: &Paths) -> anyhow::Result<()> {
    let config = load_config(&paths.config);
    let (inputs, outputs) = list_devices()?;

    println!("Input devices:");
    for name in &inputs {
        println!("  {name}");
    }
    println!("Output devices:");
    for name in &outputs {
        println!("  {name}");
    }

    let probe = CpalDeviceProbe::new(&config.input_device, config.sample_rate);
    let status = if probe.input_available() {
        "available"
    } else {
        "unavailable"
    };
    println!("\nConfigured input \"{}\": {status}", config.input_device);

    Ok(())
}

fn cmd_history(paths: &Paths, action: &HistoryAction) -> anyhow::Result<()> {
    let mut history = ConversationHistory::load(paths.data_dir.join(jasper::daemon::HISTORY_FILE));

    match action {
        HistoryAction::Show => {
            if history.is_empty() {
                println!("No conversation history");
            }
            for turn in history.turns() {
                println!(
                    "[{}] {}: {}",
                    turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    turn.role,
                    turn.content
                );
            }
        }
        HistoryAction::Clear => {
            let count = history.len();
            history.clear()?;
            println!("Cleared {count} turns");
        }
    }

    Ok(())
}

fn cmd_config(paths: &Paths, action: &ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let store = ConfigStore::open(&paths.config);
            println!("# {}", paths.config.display());
            println!("{}", serde_json::to_string_pretty(&*store.current())?);
        }
        ConfigAction::Init { force } => {
            if paths.config.exists() && !force {
                anyhow::bail!(
                    "config already exists: {} (use --force to overwrite)",
                    paths.config.display()
                );
            }
            write_config(&paths.config, &RuntimeConfig::default())?;
            println!("Wrote default config to {}", paths.config.display());
        }
    }

    Ok(())
}
