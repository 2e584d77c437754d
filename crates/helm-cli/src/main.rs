use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use uuid::Uuid;

use helm_broker::paper::{PaperConfig, PaperSession};
use helm_broker::BrokerSession;
use helm_config::{resolve_credentials, Config, Mindset};
use helm_runtime::{shutdown_flag, ControlLoop};

mod trade;

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "helm")]
#[command(about = "Helm autonomous trading loop", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MindsetArg {
    Aggressive,
    Balanced,
    Conservative,
}

impl From<MindsetArg> for Mindset {
    fn from(m: MindsetArg) -> Self {
        match m {
            MindsetArg::Aggressive => Mindset::Aggressive,
            MindsetArg::Balanced => Mindset::Balanced,
            MindsetArg::Conservative => Mindset::Conservative,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the autonomous trading loop.
    Run {
        #[arg(long)]
        config: PathBuf,

        /// Synthesise fills instead of placing orders.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[arg(long, value_enum, default_value = "info")]
        log_level: LogLevel,

        /// Risk temperament preset overriding the config file's.
        #[arg(long, value_enum)]
        mindset: Option<MindsetArg>,
    },

    /// Manual trade utility. Orders placed here carry the system magic tag,
    /// so the loop adopts them on its next reconciliation.
    Trade {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        symbol: Option<String>,

        /// BUY or SELL (with --symbol and --volume).
        #[arg(long)]
        side: Option<String>,

        /// Volume in lots.
        #[arg(long)]
        volume: Option<f64>,

        /// List open positions carrying the system magic tag.
        #[arg(long, default_value_t = false)]
        list: bool,

        /// Close one position by ticket.
        #[arg(long)]
        close: Option<i64>,

        /// Close every position carrying the system magic tag.
        #[arg(long, default_value_t = false)]
        close_all: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.cmd {
        Commands::Run {
            config,
            dry_run,
            log_level,
            mindset,
        } => run_loop(config, dry_run, log_level, mindset).await,
        Commands::Trade {
            config,
            symbol,
            side,
            volume,
            list,
            close,
            close_all,
        } => {
            init_logging(LogLevel::Info);
            let loaded = match helm_config::load(&config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("configuration invalid: {e:#}");
                    return ExitCode::from(EXIT_CONFIG);
                }
            };
            let action = trade::TradeArgs {
                symbol,
                side,
                volume,
                list,
                close,
                close_all,
            };
            match trade::execute(&loaded, action) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("trade command failed: {e:#}");
                    ExitCode::from(EXIT_FATAL)
                }
            }
        }
    }
}

fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_loop(
    config_path: PathBuf,
    dry_run: bool,
    log_level: LogLevel,
    mindset: Option<MindsetArg>,
) -> ExitCode {
    init_logging(log_level);

    let config = match helm_config::load_with_overrides(
        &config_path,
        mindset.map(Mindset::from),
        dry_run,
    ) {
        Ok(c) => c,
        Err(e) => {
            error!(error = format!("{e:#}"), "configuration invalid");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    info!(
        config_hash = %config.config_hash,
        symbol = %config.trading.symbol,
        dry_run = config.dry_run,
        "configuration loaded"
    );

    let shutdown = shutdown_flag();
    {
        let flag = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing current phase");
                flag.store(true, Ordering::Relaxed);
            }
        });
    }

    let interrupted = shutdown.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<_> {
        let session = build_session(&config)?;
        let run_id = Uuid::new_v4();
        let mut control =
            ControlLoop::from_config(&config, session, shutdown, run_id, Utc::now())?;
        control.run()
    })
    .await;

    match outcome {
        Ok(Ok(summary)) => {
            info!(
                ticks = summary.ticks,
                left_open = summary.left_open.len(),
                "loop finished"
            );
            if interrupted.load(Ordering::Relaxed) {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::SUCCESS
            }
        }
        Ok(Err(e)) => {
            error!(error = format!("{e:#}"), "fatal loop error");
            ExitCode::from(EXIT_FATAL)
        }
        Err(e) => {
            error!(error = %e, "loop task panicked");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

/// Build the broker session for this run. The live terminal adapter is an
/// out-of-tree implementation of `BrokerSession`; this binary bundles the
/// deterministic paper session for dry runs and the `paper` server.
fn build_session(config: &Config) -> Result<PaperSession> {
    if !config.dry_run && !config.broker.server.eq_ignore_ascii_case("paper") {
        // Resolve credentials anyway so operators learn about missing env
        // vars before wiring a live adapter.
        let creds = resolve_credentials(&config.broker)
            .context("broker credentials")?;
        bail!(
            "no live terminal adapter is bundled for server '{}' (login {}); \
             run with --dry-run or broker.server: paper",
            creds.server,
            creds.masked_login()
        );
    }

    let paper_cfg = PaperConfig {
        symbol: config.trading.symbol.clone(),
        timeframe: config.trading.timeframe,
        start_time: Utc::now(),
        start_price_micros: 100_000_000,
        start_balance_micros: 10_000_000_000,
        history_len: config.trading.lookback_bars.max(120),
    };
    let mut session = PaperSession::new(paper_cfg);
    session
        .connect()
        .map_err(|e| anyhow::anyhow!("paper session connect: {e}"))?;
    Ok(session)
}
