//! Eidolon CLI
//!
//! Runs episodes against a local root (artifact store, ledgers, skills and
//! run directories) and audits what they committed.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use eidolon_episode::{EidolonConfig, EpisodeError};
use eidolon_verify::kernel_from_name;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Exit code for a refusal or a failed audit.
pub const EXIT_REFUSED: u8 = 1;
/// Exit code for usage and configuration errors.
pub const EXIT_USAGE: u8 = 2;

/// Eidolon CLI application
#[derive(Debug, Parser)]
#[command(name = "eidolon")]
#[command(about = "Eidolon - verifiable task-execution kernel", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "EIDOLON_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for the store, ledgers, skills and runs
    #[arg(long)]
    root: Option<PathBuf>,

    /// Kernel collaborator
    #[arg(long)]
    kernel: Option<String>,

    /// Log level
    #[arg(long, env = "EIDOLON_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "EIDOLON_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one episode
    Run {
        /// Task text, e.g. `ARITH: 2 + 3 * 4` or `BVPS: abs(int)->int`
        task: String,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Structured task payload as JSON
        #[arg(long)]
        data: Option<String>,
    },

    /// Run every task of a file, one per line (text or `{"task": ...}`)
    Suite {
        file: PathBuf,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Verify the hash chain and its SQL mirror
    VerifyLedger,

    /// Print the summary of a run directory and check its UCR hash
    Show { run_dir: PathBuf },
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Defaults, then the TOML file, then `EIDOLON_*`, then flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<EidolonConfig> {
    let mut config = EidolonConfig::load(cli.config.as_deref())?;
    config.apply_overrides(|key| std::env::var(key).ok())?;
    if let Some(root) = &cli.root {
        config.paths.root = root.clone();
    }
    if let Some(kernel) = &cli.kernel {
        config.kernel.name = kernel.clone();
    }
    config.validate()?;
    kernel_from_name(&config.kernel.name).map_err(EpisodeError::from)?;
    Ok(config)
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let usage = err
        .downcast_ref::<EpisodeError>()
        .map(EpisodeError::is_usage)
        .unwrap_or(false)
        || err.downcast_ref::<serde_json::Error>().is_some();
    if usage {
        EXIT_USAGE
    } else {
        EXIT_REFUSED
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<u8> {
    if let Commands::Show { run_dir } = &cli.command {
        return commands::show(run_dir);
    }
    let config = resolve_config(&cli)?;
    match cli.command {
        Commands::Run { task, seed, data } => {
            commands::run(config, &task, data.as_deref(), seed).await
        }
        Commands::Suite { file, seed } => commands::suite(config, &file, seed).await,
        Commands::VerifyLedger => commands::verify_ledger(config).await,
        Commands::Show { .. } => Ok(0),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_parses_flags() {
        let cli = Cli::try_parse_from([
            "eidolon",
            "--root",
            "/tmp/eid",
            "run",
            "ARITH: 1 + 1",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/eid")));
        match cli.command {
            Commands::Run { task, seed, data } => {
                assert_eq!(task, "ARITH: 1 + 1");
                assert_eq!(seed, 7);
                assert!(data.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_kernel_flag_is_a_usage_error() {
        let cli = Cli::try_parse_from(["eidolon", "--kernel", "oracle", "verify-ledger"]).unwrap();
        let err = resolve_config(&cli).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_USAGE);
    }

    #[test]
    fn runtime_errors_map_to_refusal_code() {
        let err = anyhow::Error::new(EpisodeError::Io(std::io::Error::other("disk full")));
        assert_eq!(exit_code_for(&err), EXIT_REFUSED);
        let err = anyhow::Error::new(EpisodeError::Schema("bad task".into()));
        assert_eq!(exit_code_for(&err), EXIT_USAGE);
    }
}
