use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use vwap_trader::control::{JsonStateFile, StateSource};
use vwap_trader::execution::broker::{OpenAlgoBroker, OrderSink, PaperBroker, RetryPolicy, DEFAULT_OPENALGO_URL};
use vwap_trader::execution::{ExecutionMode, StrategyConfig};
use vwap_trader::journal::{CsvJournal, TradeJournal, TradeRecord};
use vwap_trader::runner::{self, ActionDispatcher, LiveOptions};
use vwap_trader::streams::{load_ticks, FeedConfig, DEFAULT_WS_URL};
use vwap_trader::trading_core::{EntryControl, PrevSessionLevels};

#[derive(Parser, Debug)]
#[command(name = "vwap-trader")]
#[command(about = "Intraday VWAP option-buying engine for OpenAlgo")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Also write logs (without colours) to this file
    #[arg(long, global = true, env = "VWAP_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
struct StrategyArgs {
    /// Strategy tag sent with every order
    #[arg(long, default_value = "NIFTY_VWAP_OPTIONS")]
    strategy_name: String,

    /// Order exchange
    #[arg(long, default_value = "NFO")]
    exchange: String,

    /// Order product type
    #[arg(long, default_value = "MIS")]
    product: String,

    /// Bar interval in minutes
    #[arg(long, default_value = "5")]
    bar_minutes: u32,

    /// Initial stop distance in points
    #[arg(long, default_value = "15.0")]
    risk_points: f64,

    /// Reward multiple for breakeven/trailing
    #[arg(long, default_value = "2.0")]
    reward_multiple: f64,

    /// Realized PnL (points) at which new entries stop for the day
    #[arg(long, default_value = "-2000", allow_hyphen_values = true)]
    daily_loss_floor: f64,

    /// Units per lot
    #[arg(long, default_value = "75")]
    lot_size: u32,

    /// Clear the VWAP accumulator at each session start
    #[arg(long)]
    vwap_session_reset: bool,

    /// Leave an open position unmanaged on shutdown instead of flattening it
    #[arg(long)]
    no_flatten_on_shutdown: bool,

    /// Prior-session high (with --prev-low and --prev-close)
    #[arg(long, requires_all = ["prev_low", "prev_close"])]
    prev_high: Option<f64>,

    /// Prior-session low
    #[arg(long, requires_all = ["prev_high", "prev_close"])]
    prev_low: Option<f64>,

    /// Prior-session close
    #[arg(long, requires_all = ["prev_high", "prev_low"])]
    prev_close: Option<f64>,
}

impl StrategyArgs {
    fn config(&self, mode: ExecutionMode) -> StrategyConfig {
        StrategyConfig {
            mode,
            strategy_name: self.strategy_name.clone(),
            exchange: self.exchange.clone(),
            product: self.product.clone(),
            bar_interval_minutes: self.bar_minutes,
            fixed_risk_points: self.risk_points,
            reward_multiple: self.reward_multiple,
            daily_loss_floor: self.daily_loss_floor,
            lot_size: self.lot_size,
            vwap_session_reset: self.vwap_session_reset,
            flatten_on_shutdown: !self.no_flatten_on_shutdown,
            ..Default::default()
        }
    }

    fn prev_session(&self) -> Option<PrevSessionLevels> {
        Some(PrevSessionLevels {
            high: self.prev_high?,
            low: self.prev_low?,
            close: self.prev_close?,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trade live ticks from the OpenAlgo WebSocket
    Run {
        /// OpenAlgo API key
        #[arg(long, env = "OPENALGO_API_KEY", hide_env_values = true)]
        api_key: String,

        /// OpenAlgo REST host
        #[arg(long, env = "OPENALGO_HOST", default_value = DEFAULT_OPENALGO_URL)]
        host: String,

        /// OpenAlgo WebSocket URL
        #[arg(long, env = "OPENALGO_WS_URL", default_value = DEFAULT_WS_URL)]
        ws_url: String,

        /// Execution mode: paper or live
        #[arg(long, default_value = "paper")]
        mode: String,

        /// Traded symbol (defaults to the symbol in the control file)
        #[arg(long)]
        symbol: Option<String>,

        /// Feed symbol (defaults to the traded symbol)
        #[arg(long)]
        feed_symbol: Option<String>,

        /// Feed exchange (defaults to the order exchange)
        #[arg(long)]
        feed_exchange: Option<String>,

        /// Treat feed volume as per-tick instead of session-cumulative
        #[arg(long)]
        raw_volume: bool,

        /// Control file with the enable flag and lot count
        #[arg(long, env = "VWAP_STATE_FILE", default_value = "strategies/nifty_vwap_state.json")]
        state_file: PathBuf,

        /// Control file poll interval in seconds
        #[arg(long, default_value = "2")]
        poll_secs: u64,

        /// Tick queue capacity
        #[arg(long, default_value = "4096")]
        queue_capacity: usize,

        /// Directory for daily trade reports
        #[arg(long, default_value = "reports")]
        reports_dir: PathBuf,

        #[command(flatten)]
        strategy: StrategyArgs,
    },

    /// Replay a CSV tick file through the engine with paper orders
    Replay {
        /// CSV file with timestamp,price[,volume]
        #[arg(short, long)]
        ticks: PathBuf,

        /// Symbol to attach to replayed ticks
        #[arg(long, default_value = "NIFTY")]
        symbol: String,

        /// Lots per entry
        #[arg(long, default_value = "1")]
        lots: u32,

        /// Write daily trade reports here
        #[arg(long)]
        reports_dir: Option<PathBuf>,

        #[command(flatten)]
        strategy: StrategyArgs,
    },
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("vwap_trader=info".parse::<tracing_subscriber::filter::Directive>()?);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn parse_mode(mode: &str) -> Result<Option<ExecutionMode>> {
    match mode.to_lowercase().as_str() {
        "paper" => Ok(Some(ExecutionMode::Paper)),
        "live" => {
            // Require confirmation for live mode
            println!("\n⚠️  WARNING: LIVE TRADING MODE ⚠️");
            println!("This will send real orders to OpenAlgo.");
            println!("Type 'CONFIRM' to proceed or anything else to cancel:");

            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;

            if input.trim() != "CONFIRM" {
                println!("Live trading cancelled.");
                return Ok(None);
            }
            Ok(Some(ExecutionMode::Live))
        }
        other => bail!("Unknown mode '{}', expected paper or live", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;

    match args.command {
        Commands::Run {
            api_key,
            host,
            ws_url,
            mode,
            symbol,
            feed_symbol,
            feed_exchange,
            raw_volume,
            state_file,
            poll_secs,
            queue_capacity,
            reports_dir,
            strategy,
        } => {
            let Some(mode) = parse_mode(&mode)? else {
                return Ok(());
            };
            let config = strategy.config(mode);
            config.validate().context("Invalid strategy configuration")?;

            let symbol = match symbol {
                Some(s) => s,
                None => {
                    let state = JsonStateFile::new(&state_file)
                        .read()
                        .await
                        .context("No --symbol given and the control file is unreadable")?;
                    if state.symbol.is_empty() {
                        bail!("No option symbol provided in {:?}", state_file);
                    }
                    state.symbol
                }
            };

            info!("=== VWAP OPTION BUYING ===");
            info!("Mode: {}", config.mode);
            info!("Symbol: {} ({})", symbol, config.exchange);
            info!(
                "Risk: {} pts | RR: {} | Loss floor: {}",
                config.fixed_risk_points, config.reward_multiple, config.daily_loss_floor
            );

            let sink: Arc<dyn OrderSink> = match config.mode {
                ExecutionMode::Paper => Arc::new(PaperBroker::new()),
                ExecutionMode::Live => Arc::new(OpenAlgoBroker::new(&host, &api_key)?),
            };
            let dispatcher = ActionDispatcher::new(sink, RetryPolicy::default(), Box::new(CsvJournal::new(reports_dir)));

            let mut feed = FeedConfig::new(
                ws_url,
                api_key,
                feed_symbol.unwrap_or_else(|| symbol.clone()),
                feed_exchange.unwrap_or_else(|| config.exchange.clone()),
            );
            feed.cumulative_volume = !raw_volume;
            feed.timezone = config.timezone;

            let options = LiveOptions {
                feed,
                control_file: state_file,
                poll_interval: Duration::from_secs(poll_secs.max(1)),
                queue_capacity,
                prev_session: strategy.prev_session(),
            };

            let report = runner::run_live(config, symbol, options, dispatcher).await?;
            runner::print_summary("SESSION RESULTS", &report);
        }

        Commands::Replay {
            ticks,
            symbol,
            lots,
            reports_dir,
            strategy,
        } => {
            let config = strategy.config(ExecutionMode::Paper);
            let prev_session = strategy.prev_session();
            if prev_session.is_none() {
                warn!("No prior-session levels given; only the VWAP condition can trigger");
            }

            let data = load_ticks(&ticks, &symbol)?;
            info!("Loaded {} ticks from {:?}", data.len(), ticks);

            let journal: Box<dyn TradeJournal> = match reports_dir {
                Some(dir) => Box::new(CsvJournal::new(dir)),
                None => Box::new(Vec::<TradeRecord>::new()),
            };
            let control = EntryControl {
                enabled: true,
                lots: lots.max(1),
            };

            let report = runner::run_replay(config, &symbol, &data, prev_session, control, journal).await?;
            info!("Replayed {} ticks, {} orders", report.ticks, report.orders);
            runner::print_summary("REPLAY TRADING RESULTS", &report);
        }
    }

    Ok(())
}
