//! Capture CLI - Command-line interface for Synheart Capture
//!
//! Commands:
//! - replay: Drive a capture session from an NDJSON event script
//! - config: Print the default configuration or check a config file
//! - schema: Print event and message shapes

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use synheart_capture::{
    CaptureConfig, CaptureError, CaptureEvent, CaptureSession, WriterTransport, CAPTURE_VERSION,
    PRODUCER_NAME,
};

/// Capture - On-device capture core for behavioral biometric sessions
#[derive(Parser)]
#[command(name = "capture")]
#[command(author = "Synheart AI Inc")]
#[command(version = CAPTURE_VERSION)]
#[command(about = "Replay and inspect behavioral biometric capture sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a session from an event script and emit collector messages
    Replay {
        /// Event script, one JSON event per line (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Write collector messages to this file (use - for stdout)
        #[arg(short, long, default_value = "-", conflicts_with = "connect")]
        output: PathBuf,

        /// Stream collector messages to a TCP peer instead (host:port)
        #[arg(long)]
        connect: Option<String>,

        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Start with the channel closed until the script opens it
        #[arg(long)]
        offline: bool,

        /// Print a session summary to stderr when the script ends
        #[arg(long)]
        summary: bool,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to validate
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,
    },
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Host events accepted by a session
    Events,
    /// Messages sent to the collector
    Messages,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr so stdout stays a clean message stream
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_ansi(atty::is(atty::Stream::Stderr));

    if let Err(e) = Registry::default().with(filter).with(fmt_layer).try_init() {
        eprintln!("failed to initialise logging: {e}");
    }
}

fn run(cli: Cli) -> Result<(), CaptureCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            connect,
            config,
            offline,
            summary,
        } => cmd_replay(&input, &output, connect.as_deref(), config.as_deref(), offline, summary),

        Commands::Config { check } => cmd_config(check.as_deref()),

        Commands::Schema { schema_type } => cmd_schema(schema_type),
    }
}

fn load_config(path: Option<&Path>) -> Result<CaptureConfig, CaptureCliError> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)?;
            Ok(CaptureConfig::from_toml_str(&raw)?)
        }
        None => Ok(CaptureConfig::default()),
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    connect: Option<&str>,
    config: Option<&Path>,
    offline: bool,
    summary: bool,
) -> Result<(), CaptureCliError> {
    let config = load_config(config)?;

    let reader: Box<dyn BufRead> = if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            return Err(CaptureCliError::NoInput);
        }
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(input)?))
    };

    let writer: Box<dyn Write> = match connect {
        Some(addr) => {
            info!(peer = addr, "connecting to collector");
            Box::new(TcpStream::connect(addr)?)
        }
        None if output.to_string_lossy() == "-" => Box::new(io::stdout()),
        None => Box::new(fs::File::create(output)?),
    };

    let transport = if offline {
        WriterTransport::offline(writer)
    } else {
        WriterTransport::new(writer)
    };
    let mut session = CaptureSession::new(config, transport)?;
    info!(session_id = %session.id(), producer = PRODUCER_NAME, "replay started");

    let mut events = 0usize;
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event: CaptureEvent = serde_json::from_str(trimmed).map_err(|e| {
            CaptureCliError::Script {
                line: index + 1,
                message: e.to_string(),
            }
        })?;

        match event {
            CaptureEvent::ChannelOpened => session.channel_mut().transport_mut().set_open(true),
            CaptureEvent::ChannelClosed => session.channel_mut().transport_mut().set_open(false),
            _ => {}
        }

        for notification in session.handle(event) {
            debug!(kind = notification.kind(), "{}", serde_json::to_string(&notification)?);
        }
        events += 1;
    }

    let snapshot = session.snapshot();
    info!(
        events,
        stage = ?snapshot.stage,
        sent = snapshot.sent_messages,
        pending = snapshot.pending_messages,
        faults = snapshot.delivery_faults,
        "replay finished"
    );

    if summary {
        eprintln!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    Ok(())
}

fn cmd_config(check: Option<&Path>) -> Result<(), CaptureCliError> {
    match check {
        Some(path) => {
            let config = load_config(Some(path))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "valid": true,
                    "path": path.display().to_string(),
                    "config": config,
                }))?
            );
        }
        None => print!("{}", CaptureConfig::default().to_toml_string()?),
    }
    Ok(())
}

fn cmd_schema(schema_type: SchemaType) -> Result<(), CaptureCliError> {
    match schema_type {
        SchemaType::Events => {
            println!("Capture events (one JSON object per line, tagged by \"event\")");
            println!();
            println!("- subject_entered: {{ subject }}");
            println!("- permission_resolved: {{ granted }}");
            println!("- start");
            println!(
                "- motion: {{ rotation: {{ alpha, beta, gamma }}, \
                 acceleration: {{ x, y, z }} }}"
            );
            println!("- tick: {{ at_ms }}");
            println!("- digit: {{ digit }}");
            println!("- surface_resized: {{ width, height }}");
            println!("- pointer_down / pointer_move: {{ x, y, at_ms }}");
            println!("- pointer_up");
            println!("- clear_gesture, save_gesture");
            println!("- channel_opened, channel_closed");
        }
        SchemaType::Messages => {
            println!("Collector messages (one JSON object per line, tagged by \"type\")");
            println!();
            println!(
                "- imu_log: {{ subject, stage, data: [ {{ uid, stage, accX, accY, accZ, \
                 gyroX, gyroY, gyroZ, timestamp }} ] }}"
            );
            println!("- gesture_stroke: {{ subject, stage, data: [ {{ x, y, t }} ] }}");
            println!();
            println!("Stage labels: CODE<n>, PAT<n>, GES<n> (1-based attempt number)");
        }
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum CaptureCliError {
    Io(io::Error),
    Capture(CaptureError),
    Json(serde_json::Error),
    Script { line: usize, message: String },
    NoInput,
}

impl From<io::Error> for CaptureCliError {
    fn from(e: io::Error) -> Self {
        CaptureCliError::Io(e)
    }
}

impl From<CaptureError> for CaptureCliError {
    fn from(e: CaptureError) -> Self {
        CaptureCliError::Capture(e)
    }
}

impl From<serde_json::Error> for CaptureCliError {
    fn from(e: serde_json::Error) -> Self {
        CaptureCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CaptureCliError> for CliError {
    fn from(e: CaptureCliError) -> Self {
        match e {
            CaptureCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths, permissions and the collector address".to_string()),
            },
            CaptureCliError::Capture(
                e @ (CaptureError::InvalidConfig(_) | CaptureError::ConfigParse(_)),
            ) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'capture config' to see a valid configuration".to_string()),
            },
            CaptureCliError::Capture(e) => CliError {
                code: "CAPTURE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            CaptureCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CaptureCliError::Script { line, message } => CliError {
                code: "SCRIPT_ERROR".to_string(),
                message: format!("line {line}: {message}"),
                hint: Some("Run 'capture schema events' for the accepted events".to_string()),
            },
            CaptureCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal; expected an event script".to_string(),
                hint: Some("Pipe an NDJSON script or pass --input <file>".to_string()),
            },
        }
    }
}
