//! Watch CLI - Command-line interface for Posture Watch
//!
//! Commands:
//! - replay: Run recorded detector output through the monitor
//! - estimate: Compute a single viewing-distance estimate
//! - config: Print the default configuration or check a config file
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use posture_watch::replay::{self, Replayer};
use posture_watch::{
    DistanceEstimator, MonitorConfig, MonitorError, MonitorEvent, PostureIssue, RecordedEvent,
    PRODUCER_NAME, WATCH_VERSION,
};

/// Watch - Posture and viewing-distance monitoring core
#[derive(Parser)]
#[command(name = "watch")]
#[command(version = WATCH_VERSION)]
#[command(about = "Fuse pose and face detector output into posture alerts", long_about = None)]
struct Cli {
    /// Enable debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run recorded detector output through the monitor
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Monitor configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the proximity alert threshold in centimeters
        #[arg(long)]
        distance_threshold_cm: Option<f64>,

        /// Print session counters to stderr when done
        #[arg(long)]
        stats: bool,
    },

    /// Compute the viewing distance for one face box
    Estimate {
        /// Height of the analyzed image in pixels
        #[arg(long)]
        image_height: u32,

        /// Height of the face bounding box in pixels
        #[arg(long)]
        face_height: f64,

        /// Monitor configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration, or check an existing file
    Config {
        /// Validate this configuration file instead of printing defaults
        #[arg(long)]
        check: Option<PathBuf>,

        /// Write the default configuration to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check this configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one recorded event per line)
    Ndjson,
    /// JSON array of recorded events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one monitor event per line)
    Ndjson,
    /// JSON array of monitor events
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let report = serde_json::to_string(&CliError::from(e))
                .unwrap_or_else(|_| "Unknown error".to_string());
            eprintln!("{}", report);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("posture_watch=debug,watch=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), WatchCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            input_format,
            output_format,
            config,
            distance_threshold_cm,
            stats,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(threshold) = distance_threshold_cm {
                config.alerts.distance_threshold_cm = threshold;
                config.validate()?;
            }
            cmd_replay(&input, &output, input_format, output_format, config, stats)
        }

        Commands::Estimate {
            image_height,
            face_height,
            config,
        } => cmd_estimate(image_height, face_height, config.as_deref()),

        Commands::Config { check, output } => cmd_config(check.as_deref(), output.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig, WatchCliError> {
    match path {
        Some(path) => Ok(MonitorConfig::load(path)?),
        None => Ok(MonitorConfig::default()),
    }
}

fn open_input(input: &Path) -> Result<Box<dyn BufRead>, WatchCliError> {
    if input.to_string_lossy() == "-" {
        Ok(Box::new(BufReader::new(io::stdin())))
    } else {
        Ok(Box::new(BufReader::new(fs::File::open(input)?)))
    }
}

fn open_output(output: &Path) -> Result<Box<dyn Write>, WatchCliError> {
    if output.to_string_lossy() == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(fs::File::create(output)?))
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: MonitorConfig,
    print_stats: bool,
) -> Result<(), WatchCliError> {
    let mut reader = open_input(input)?;
    let mut writer = open_output(output)?;
    let replayer = Replayer::new(config)?;
    let mut collected: Vec<MonitorEvent> = Vec::new();
    let mut applied = 0usize;

    match input_format {
        InputFormat::Ndjson => {
            // Stream line by line so long recordings never sit in memory
            for (line_num, line) in reader.lines().enumerate() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let event = serde_json::from_str::<RecordedEvent>(trimmed).map_err(|e| {
                    let line = line_num + 1;
                    WatchCliError::ParseError(format!("Failed to parse line {}: {}", line, e))
                })?;
                applied += 1;
                emit(&mut writer, &output_format, &mut collected, replayer.apply(&event))?;
            }
        }
        InputFormat::Json => {
            let mut buffer = String::new();
            reader.read_to_string(&mut buffer)?;
            for event in replay::parse_array(&buffer)? {
                applied += 1;
                emit(&mut writer, &output_format, &mut collected, replayer.apply(&event))?;
            }
        }
    }

    if applied == 0 {
        return Err(WatchCliError::NoEvents);
    }

    let (tail, stats) = replayer.finish();
    emit(&mut writer, &output_format, &mut collected, tail)?;

    match output_format {
        OutputFormat::Ndjson => {}
        OutputFormat::Json => writeln!(writer, "{}", serde_json::to_string(&collected)?)?,
        OutputFormat::JsonPretty => {
            writeln!(writer, "{}", serde_json::to_string_pretty(&collected)?)?
        }
    }
    writer.flush()?;

    if print_stats {
        eprintln!("{}", serde_json::to_string(&stats)?);
    }
    Ok(())
}

/// Write NDJSON immediately; array formats are collected and written at the end
fn emit(
    writer: &mut dyn Write,
    format: &OutputFormat,
    collected: &mut Vec<MonitorEvent>,
    events: Vec<MonitorEvent>,
) -> Result<(), WatchCliError> {
    match format {
        OutputFormat::Ndjson => {
            for event in &events {
                writeln!(writer, "{}", serde_json::to_string(event)?)?;
            }
        }
        OutputFormat::Json | OutputFormat::JsonPretty => collected.extend(events),
    }
    Ok(())
}

fn cmd_estimate(
    image_height: u32,
    face_height: f64,
    config: Option<&Path>,
) -> Result<(), WatchCliError> {
    let config = load_config(config)?;
    let estimator = DistanceEstimator::new(config.camera.clone())?;
    let distance = estimator.estimate(image_height, face_height);

    let report = EstimateReport {
        image_height_px: image_height,
        face_height_px: face_height,
        distance_cm: distance.centimeters(),
        too_close: distance
            .centimeters()
            .map(|cm| cm < config.alerts.distance_threshold_cm),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_config(check: Option<&Path>, output: Option<&Path>) -> Result<(), WatchCliError> {
    if let Some(path) = check {
        let config = MonitorConfig::load(path)?;
        println!("{}", config.to_json()?);
        return Ok(());
    }

    let config = MonitorConfig::default();
    match output {
        Some(path) => config.save(path)?,
        None => println!("{}", config.to_json()?),
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), WatchCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "watch_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Posture Watch version {}", WATCH_VERSION),
    });

    checks.push(DoctorCheck {
        name: "posture_issues".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "Recognized issues: {}",
            PostureIssue::ALL
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    });

    if let Some(config_path) = config {
        if config_path.exists() {
            match MonitorConfig::load(config_path) {
                Ok(config) => {
                    checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Config valid (alert below {} cm)",
                            config.alerts.distance_threshold_cm
                        ),
                    });
                    if config.alerts.indeterminate_dwell_ms.is_none() {
                        checks.push(DoctorCheck {
                            name: "indeterminate_dwell".to_string(),
                            status: CheckStatus::Warning,
                            message: "Overlay stays shown while no face is visible".to_string(),
                        });
                    }
                }
                Err(e) => {
                    checks.push(DoctorCheck {
                        name: "config".to_string(),
                        status: CheckStatus::Error,
                        message: e.to_string(),
                    });
                }
            }
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Config file does not exist, defaults will be used".to_string(),
            });
        }
    }

    // Check stdin is available (for streaming replay)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming replay ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: WATCH_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Watch Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(WatchCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum WatchCliError {
    Io(io::Error),
    Monitor(MonitorError),
    Json(serde_json::Error),
    NoEvents,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for WatchCliError {
    fn from(e: io::Error) -> Self {
        WatchCliError::Io(e)
    }
}

impl From<MonitorError> for WatchCliError {
    fn from(e: MonitorError) -> Self {
        WatchCliError::Monitor(e)
    }
}

impl From<serde_json::Error> for WatchCliError {
    fn from(e: serde_json::Error) -> Self {
        WatchCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<WatchCliError> for CliError {
    fn from(e: WatchCliError) -> Self {
        match e {
            WatchCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            WatchCliError::Monitor(e) => {
                let (code, hint) = match &e {
                    MonitorError::InvalidConfig(_) | MonitorError::IntrinsicsUnavailable(_) => {
                        ("CONFIG_ERROR", "Run 'watch config' to see a valid configuration")
                    }
                    MonitorError::ParseError(_) | MonitorError::JsonError(_) => {
                        ("PARSE_ERROR", "Ensure input is a recorded detector event log")
                    }
                    _ => ("MONITOR_ERROR", "Rerun with --verbose for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            WatchCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            WatchCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            WatchCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            WatchCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct EstimateReport {
    image_height_px: u32,
    face_height_px: f64,
    distance_cm: Option<f64>,
    too_close: Option<bool>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
