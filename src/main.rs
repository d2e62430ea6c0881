// src/main.rs

use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use crossterm::style::Stylize;
use scannerv2::core::{ProbeRegistry, ResultStore, ScanConfig, ScanError, ScanOrchestrator};
use scannerv2::{logging, ui};
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const EXIT_FAILURE: u8 = 1;
const EXIT_INVALID_TARGET: u8 = 2;
const EXIT_ALL_PROBES_FAILED: u8 = 3;
const EXIT_SAVE_FAILED: u8 = 4;

#[derive(Debug, Parser)]
#[command(name = "scannerv2", version, about = "Concurrent website vulnerability scanner")]
struct Cli {
    /// Directory where reports are saved.
    #[arg(long, global = true, env = "SCANNERV2_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Mirror log output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan a website and save the report.
    Scan(ScanArgs),
    /// List the most recent saved reports.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print a saved report.
    Show { id: String },
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Target URL. `https://` is assumed when no scheme is given.
    url: String,

    /// Per-probe timeout in seconds.
    #[arg(long, env = "SCANNERV2_TIMEOUT", value_parser = parse_seconds)]
    timeout: Option<Duration>,

    /// Deadline for the whole scan in seconds.
    #[arg(long, env = "SCANNERV2_DEADLINE", value_parser = parse_seconds)]
    deadline: Option<Duration>,

    /// Maximum number of probes running at once.
    #[arg(long, env = "SCANNERV2_MAX_CONCURRENCY", value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    max_concurrency: Option<usize>,

    /// Print the report without saving it.
    #[arg(long)]
    no_save: bool,
}

impl ScanArgs {
    fn config(&self) -> ScanConfig {
        let mut config = ScanConfig::default();
        if let Some(timeout) = self.timeout {
            config = config.with_probe_timeout(timeout);
        }
        if let Some(deadline) = self.deadline {
            config = config.with_scan_deadline(deadline);
        }
        if let Some(max) = self.max_concurrency {
            config = config.with_max_concurrency(max);
        }
        config
    }
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw.parse().map_err(|_| format!("'{raw}' is not a number of seconds"))?;
    if secs <= 0.0 {
        return Err("must be greater than zero".to_string());
    }
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

/// Prepends `https://` to input that carries no scheme, e.g. `example.com`.
fn with_default_scheme(input: &str) -> String {
    let input = input.trim();
    if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{input}")
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    logging::initialize_logging(cli.verbose)?;

    let data_dir = cli.data_dir.unwrap_or_else(ResultStore::default_dir);
    match cli.command {
        Command::Scan(args) => run_scan(args, data_dir).await,
        Command::History { limit } => {
            let store = ResultStore::open(data_dir)?;
            let summaries = store.list(limit)?;
            ui::write_history(&mut stdout().lock(), &summaries)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { id } => {
            let store = ResultStore::open(data_dir)?;
            match store.get(&id) {
                Ok(report) => {
                    ui::write_report(&mut stdout().lock(), &report, None)?;
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    eprintln!("{} {e}", "error:".red().bold());
                    Ok(ExitCode::from(EXIT_FAILURE))
                }
            }
        }
    }
}

async fn run_scan(args: ScanArgs, data_dir: PathBuf) -> Result<ExitCode> {
    let orchestrator = ScanOrchestrator::new(args.config())?;
    let registry = ProbeRegistry::with_default_probes();

    let abort = CancellationToken::new();
    let on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finalizing the partial report.");
            on_ctrl_c.cancel();
        }
    });

    let target = with_default_scheme(&args.url);
    let report = match orchestrator.scan_with_cancel(&target, &registry, abort).await {
        Ok(report) => report,
        Err(ScanError::InvalidTarget(e)) => {
            eprintln!("{} {e}", "error:".red().bold());
            return Ok(ExitCode::from(EXIT_INVALID_TARGET));
        }
        Err(e) => return Err(e).wrap_err("scan could not start"),
    };

    let mut saved_as = None;
    let mut save_error = None;
    if !args.no_save {
        match ResultStore::open(data_dir).and_then(|store| store.save(&report)) {
            Ok(id) => saved_as = Some(id),
            Err(e) => {
                error!(error = %e, "Failed to save report.");
                save_error = Some(e);
            }
        }
    }

    let mut out = stdout().lock();
    ui::write_report(&mut out, &report, saved_as.as_ref())?;
    out.flush()?;

    if report.all_probes_failed() {
        info!(target = %report.target(), "Every probe failed.");
        eprintln!("{} every probe failed", "error:".red().bold());
        return Ok(ExitCode::from(EXIT_ALL_PROBES_FAILED));
    }
    if let Some(e) = save_error {
        eprintln!("{} report not saved: {e}", "error:".red().bold());
        return Ok(ExitCode::from(EXIT_SAVE_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}
