//! invflash CLI - Command-line tool for updating inverter firmware.
//!
//! ## Features
//!
//! - Update ARM or DSP firmware over a serial link
//! - Firmware images from a file or a catalog
//! - Remembered serial port with automatic reconnect
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use invflash::TargetType;
use log::{debug, warn};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the operator pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// invflash - Firmware updates for inverters over a serial link.
///
/// Environment variables:
///   INVFLASH_PORT              - Default serial port
///   INVFLASH_TARGET            - Default target (arm, dsp)
///   INVFLASH_TIMEOUT           - Per-step response timeout in seconds
///   INVFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "invflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (remembered or selected if not specified).
    #[arg(short, long, global = true, env = "INVFLASH_PORT")]
    pub port: Option<String>,

    /// Firmware target.
    #[arg(short, long, global = true, env = "INVFLASH_TARGET")]
    pub target: Option<Target>,

    /// Per-step response timeout in seconds.
    #[arg(long, global = true, env = "INVFLASH_TIMEOUT", value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "INVFLASH_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported firmware targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Target {
    /// ARM (STM32) application firmware.
    Arm,
    /// DSP (TMS320) application firmware.
    Dsp,
}

impl From<Target> for TargetType {
    fn from(target: Target) -> Self {
        match target {
            Target::Arm => Self::Arm,
            Target::Dsp => Self::Dsp,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Update the inverter firmware.
    Update {
        /// Firmware image file (overrides config and catalog).
        #[arg(short, long, value_name = "PATH")]
        image: Option<PathBuf>,

        /// Print the final update state as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Errors that map to a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup.
    #[error("{0}")]
    Usage(String),
    /// Operator cancelled.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update { image, json } => {
            commands::update::cmd_update(cli, &mut config, image.as_deref(), *json)
        },
        Commands::ListPorts { json } => {
            commands::ports::cmd_list_ports(*json, config.port.serial.as_deref())
        },
        Commands::Completions { shell, install } => {
            if *install {
                return commands::completions::cmd_completions_install(*shell);
            }
            let Some(shell) = shell else {
                return Err(CliError::Usage(
                    "specify a shell type, e.g.: invflash completions bash\n  \
                     Or use `invflash completions --install` to auto-install completions."
                        .into(),
                )
                .into());
            };
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    init_logging(&cli);
    debug!(
        "invflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        warn!("Could not install Ctrl-C handler: {e}");
    }

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}
