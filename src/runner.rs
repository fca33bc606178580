//! Task wiring for live trading and replay.
//!
//! Live: feed task -> bounded queue -> one engine task. The control poller
//! publishes the enable flag over a watch channel and reads engine snapshots
//! back for status logging. Orders are placed from the engine task in the
//! order the engine emits them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::control::{ControlPoller, ControlState, JsonStateFile};
use crate::execution::broker::{submit_with_retry, OrderSink, PaperBroker, RetryPolicy};
use crate::execution::config::StrategyConfig;
use crate::execution::order::OrderIntent;
use crate::journal::{TradeJournal, TradeRecord};
use crate::streams::live::{run_feed, FeedConfig, FeedEvent};
use crate::trading_core::{EngineSnapshot, EntryControl, PrevSessionLevels, StrategyEngine, Tick, TradeAction, TradingSummary};

/// Places orders and journals exits for the actions an engine emits.
///
/// `dispatch` awaits each order, retries included, on the caller's task. In
/// `run_live` that is the engine task, so ticks queue up behind a slow broker
/// and stop/EOD handling resumes once the order settles. `RetryPolicy::total_budget`
/// caps that wait per intent.
pub struct ActionDispatcher {
    sink: Arc<dyn OrderSink>,
    policy: RetryPolicy,
    journal: Box<dyn TradeJournal>,
    placed: usize,
    failed: usize,
}

impl ActionDispatcher {
    pub fn new(sink: Arc<dyn OrderSink>, policy: RetryPolicy, journal: Box<dyn TradeJournal>) -> Self {
        Self {
            sink,
            policy,
            journal,
            placed: 0,
            failed: 0,
        }
    }

    /// Orders acknowledged so far
    pub fn placed(&self) -> usize {
        self.placed
    }

    /// Orders that could not be placed
    pub fn failed(&self) -> usize {
        self.failed
    }

    async fn submit(&mut self, intent: &OrderIntent) {
        // failures are alerted inside submit_with_retry
        match submit_with_retry(self.sink.as_ref(), intent, &self.policy).await {
            Ok(_) => self.placed += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn begin_session(&mut self, date: NaiveDate) {
        if let Err(e) = self.journal.begin_session(date) {
            error!("Trade journal unavailable for {}: {}", date, e);
        }
    }

    pub async fn dispatch(&mut self, instrument: &str, action: TradeAction) {
        match action {
            TradeAction::Enter { intent, entry_price, stop_loss, trigger } => {
                info!(
                    "ENTRY {} | {} x{} @ {:.2} | SL={:.2} | trigger={}",
                    intent.action, instrument, intent.quantity, entry_price, stop_loss, trigger
                );
                self.submit(&intent).await;
            }
            TradeAction::UpdateStop { from, to, adjustment } => {
                debug!("Stop {:?}: {:.2} -> {:.2}", adjustment, from, to);
            }
            TradeAction::Exit { intent, trade } => {
                info!(
                    "EXIT {} | {} x{} @ {:.2} | PnL={:.2} | Daily PnL={:.2}",
                    trade.reason, instrument, trade.quantity, trade.exit_price, trade.pnl, trade.cumulative_pnl
                );
                self.submit(&intent).await;

                if let Err(e) = self.journal.record(&TradeRecord::from_closed(&trade, instrument)) {
                    error!("Failed to journal trade: {}", e);
                }
            }
        }
    }
}

/// Live run settings beyond the strategy config
#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub feed: FeedConfig,
    pub control_file: PathBuf,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
    /// Overrides levels bootstrapped from the feed
    pub prev_session: Option<PrevSessionLevels>,
}

fn handle_event(engine: &mut StrategyEngine, event: FeedEvent, control: &EntryControl, prev_pinned: bool) -> Vec<TradeAction> {
    match event {
        FeedEvent::PrevSession(levels) => {
            if prev_pinned {
                debug!("Ignoring feed prev-session levels, set from command line");
            } else {
                engine.set_prev_session(levels);
            }
            Vec::new()
        }
        FeedEvent::Tick(tick) => engine.on_tick(&tick, control),
    }
}

/// A bar has closed but no prior-session levels have arrived
fn lacks_prev_session(engine: &StrategyEngine) -> bool {
    !engine.levels().has_prev_session() && !engine.bars().closed_bars().is_empty()
}

/// Run the live engine until Ctrl-C
pub async fn run_live(
    config: StrategyConfig,
    symbol: String,
    options: LiveOptions,
    mut dispatcher: ActionDispatcher,
) -> Result<RunReport> {
    let today = Utc::now().with_timezone(&config.timezone).date_naive();
    let mut engine = StrategyEngine::new(config, &symbol).context("Invalid strategy configuration")?;

    let prev_pinned = options.prev_session.is_some();
    if let Some(levels) = options.prev_session {
        engine.set_prev_session(levels);
    }
    engine.begin_session(today);
    dispatcher.begin_session(today);

    let mut ticks = 0usize;
    let (event_tx, mut event_rx) = mpsc::channel::<FeedEvent>(options.queue_capacity.max(1));
    let (control_tx, control_rx) = watch::channel(ControlState::default());
    let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::default());
    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let mut shutdown_rx = shutdown_tx.subscribe();

    let feed_shutdown = shutdown_tx.subscribe();
    let feed_config = options.feed.clone();
    let feed_handle = tokio::spawn(async move {
        if let Err(e) = run_feed(feed_config, event_tx, feed_shutdown).await {
            error!("Feed task error: {}", e);
        }
    });

    let state_file = JsonStateFile::new(&options.control_file);
    if let Err(e) = state_file.ensure_exists(engine.symbol()).await {
        warn!("{}", e);
    }
    info!("Polling control file {} every {:?}", state_file.path().display(), options.poll_interval);
    let poller = ControlPoller::new(state_file, options.poll_interval);
    let poller_shutdown = shutdown_tx.subscribe();
    let poller_handle = tokio::spawn(poller.run(control_tx, snapshot_rx, poller_shutdown));

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = signal_tx.send(());
        }
    });

    info!("Engine started for {} ({})", engine.symbol(), engine.config().mode);

    let mut levels_warned = false;
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if matches!(event, FeedEvent::Tick(_)) {
                    ticks += 1;
                }
                let control = control_rx.borrow().entry_control();
                for action in handle_event(&mut engine, event, &control, prev_pinned) {
                    dispatcher.dispatch(engine.symbol(), action).await;
                }
                if !levels_warned && lacks_prev_session(&engine) {
                    warn!("First bar closed without prior-session levels; only the VWAP condition can trigger");
                    levels_warned = true;
                }
                snapshot_tx.send_replace(engine.snapshot());
            }
        }
    }

    // stop producers, then drain what is already queued
    let _ = shutdown_tx.send(());
    event_rx.close();
    while let Some(event) = event_rx.recv().await {
        if matches!(event, FeedEvent::Tick(_)) {
            ticks += 1;
        }
        let control = control_rx.borrow().entry_control();
        for action in handle_event(&mut engine, event, &control, prev_pinned) {
            dispatcher.dispatch(engine.symbol(), action).await;
        }
    }

    if let Some(action) = engine.shutdown() {
        dispatcher.dispatch(engine.symbol(), action).await;
    }

    let _ = feed_handle.await;
    let _ = poller_handle.await;

    info!("Final status: {}", engine.status());
    Ok(RunReport::new(&engine, &dispatcher, ticks))
}

/// Outcome of a live or replay run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub ticks: usize,
    pub bars: usize,
    pub orders: usize,
    pub failed_orders: usize,
    pub summary: TradingSummary,
}

impl RunReport {
    fn new(engine: &StrategyEngine, dispatcher: &ActionDispatcher, ticks: usize) -> Self {
        Self {
            ticks,
            bars: engine.bars().closed_bars().len(),
            orders: dispatcher.placed(),
            failed_orders: dispatcher.failed(),
            summary: engine.summary().clone(),
        }
    }
}

/// Feed recorded ticks through the live engine with paper order routing
pub async fn run_replay(
    config: StrategyConfig,
    symbol: &str,
    ticks: &[Tick],
    prev_session: Option<PrevSessionLevels>,
    control: EntryControl,
    journal: Box<dyn TradeJournal>,
) -> Result<RunReport> {
    let mut engine = StrategyEngine::new(config, symbol).context("Invalid strategy configuration")?;
    if let Some(levels) = prev_session {
        engine.set_prev_session(levels);
    }

    let mut dispatcher = ActionDispatcher::new(Arc::new(PaperBroker::new()), RetryPolicy::default(), journal);

    for tick in ticks {
        let date = tick.ts.date();
        if engine.session_date() != Some(date) {
            engine.begin_session(date);
            dispatcher.begin_session(date);
        }
        for action in engine.on_tick(tick, &control) {
            dispatcher.dispatch(engine.symbol(), action).await;
        }
    }

    if let Some(action) = engine.shutdown() {
        dispatcher.dispatch(engine.symbol(), action).await;
    }

    Ok(RunReport::new(&engine, &dispatcher, ticks.len()))
}

pub fn print_summary(title: &str, report: &RunReport) {
    let summary = &report.summary;
    println!("\n═══════════════════════════════════════════════════════════");
    println!("              {}", title);
    println!("═══════════════════════════════════════════════════════════\n");

    println!("Ticks Processed:   {}", report.ticks);
    println!("Bars Processed:    {}", report.bars);
    println!("Total Trades:      {}", summary.total_trades);
    println!("Wins:              {} ({:.1}%)", summary.wins, summary.win_rate());
    println!("Losses:            {}", summary.losses);
    println!("Breakevens:        {}", summary.breakevens);
    println!();
    println!("Largest Win:       {:+.2} pts", summary.largest_win);
    println!("Largest Loss:      {:+.2} pts", summary.largest_loss);
    println!("Total P&L:         {:+.2} pts", summary.realized_pnl);
    println!();
    println!("Orders Placed:     {}", report.orders);
    if report.failed_orders > 0 {
        println!("Orders FAILED:     {}", report.failed_orders);
    }

    println!("\n═══════════════════════════════════════════════════════════\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::CsvJournal;
    use crate::trading_core::ExitReason;

    fn tick(h: u32, m: u32, price: f64) -> Tick {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap().and_hms_opt(h, m, 0).unwrap();
        Tick::new("NIFTY", price, 10.0, ts)
    }

    fn config() -> StrategyConfig {
        StrategyConfig { lot_size: 1, ..Default::default() }
    }

    #[tokio::test]
    async fn test_replay_enters_and_exits_at_eod() {
        let ticks = vec![
            tick(14, 55, 150.0),
            tick(15, 0, 151.0),
            tick(15, 5, 152.0),
            tick(15, 10, 152.0),
        ];
        let levels = PrevSessionLevels { high: 160.0, low: 120.0, close: 130.0 };

        let report = run_replay(
            config(),
            "NIFTY",
            &ticks,
            Some(levels),
            EntryControl { enabled: true, lots: 1 },
            Box::new(Vec::<TradeRecord>::new()),
        )
        .await
        .unwrap();

        assert_eq!(report.ticks, 4);
        assert_eq!(report.summary.total_trades, 1);
        assert_eq!(report.summary.realized_pnl, 2.0);
        // one BUY and one SELL
        assert_eq!(report.orders, 2);
    }

    #[tokio::test]
    async fn test_replay_disabled_places_nothing() {
        let ticks = vec![tick(10, 0, 150.0), tick(10, 5, 150.0), tick(10, 10, 150.0)];
        let report = run_replay(
            config(),
            "NIFTY",
            &ticks,
            Some(PrevSessionLevels { high: 160.0, low: 120.0, close: 130.0 }),
            EntryControl::disabled(),
            Box::new(Vec::<TradeRecord>::new()),
        )
        .await
        .unwrap();

        assert_eq!(report.orders, 0);
        assert_eq!(report.summary.total_trades, 0);
    }

    #[tokio::test]
    async fn test_dispatcher_journals_exits() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(PaperBroker::new());
        let mut dispatcher = ActionDispatcher::new(
            broker.clone(),
            RetryPolicy::default(),
            Box::new(CsvJournal::new(dir.path())),
        );
        dispatcher.begin_session(NaiveDate::from_ymd_opt(2026, 1, 20).unwrap());

        let mut engine = StrategyEngine::new(config(), "NIFTY").unwrap();
        engine.set_prev_session(PrevSessionLevels { high: 160.0, low: 120.0, close: 130.0 });
        let on = EntryControl { enabled: true, lots: 1 };
        let mut actions = engine.on_tick(&tick(10, 0, 150.0), &on);
        actions.extend(engine.on_tick(&tick(10, 5, 150.0), &on));
        actions.extend(engine.on_tick(&tick(10, 6, 134.0), &on));

        for action in actions {
            dispatcher.dispatch("NIFTY", action).await;
        }

        assert_eq!(broker.placed().len(), 2);

        let rows: Vec<TradeRecord> = csv::Reader::from_path(dir.path().join("200126.csv"))
            .unwrap()
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].exit_reason, ExitReason::Stoploss);
        assert_eq!(rows[0].pnl, -16.0);
    }

    #[test]
    fn test_missing_levels_flagged_after_first_bar() {
        let mut engine = StrategyEngine::new(config(), "NIFTY").unwrap();
        let on = EntryControl { enabled: true, lots: 1 };

        engine.on_tick(&tick(10, 0, 150.0), &on);
        assert!(!lacks_prev_session(&engine));

        engine.on_tick(&tick(10, 5, 151.0), &on);
        assert!(lacks_prev_session(&engine));

        handle_event(
            &mut engine,
            FeedEvent::PrevSession(PrevSessionLevels { high: 160.0, low: 120.0, close: 130.0 }),
            &on,
            false,
        );
        assert!(!lacks_prev_session(&engine));
    }

    #[tokio::test]
    async fn test_replay_journals_under_engine_symbol() {
        let ticks = vec![tick(10, 0, 150.0), tick(10, 5, 150.0), tick(10, 6, 134.0)];
        let dir = tempfile::tempdir().unwrap();
        run_replay(
            config(),
            "NIFTY20JAN2625400CE",
            &ticks,
            Some(PrevSessionLevels { high: 160.0, low: 120.0, close: 130.0 }),
            EntryControl { enabled: true, lots: 1 },
            Box::new(CsvJournal::new(dir.path())),
        )
        .await
        .unwrap();

        let rows: Vec<TradeRecord> = csv::Reader::from_path(dir.path().join("200126.csv"))
            .unwrap()
            .deserialize()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].instrument, "NIFTY20JAN2625400CE");
    }

    #[test]
    fn test_feed_levels_ignored_when_pinned() {
        let mut engine = StrategyEngine::new(config(), "NIFTY").unwrap();
        let pinned = PrevSessionLevels { high: 1.0, low: 1.0, close: 1.0 };
        engine.set_prev_session(pinned);

        let feed = PrevSessionLevels { high: 2.0, low: 2.0, close: 2.0 };
        handle_event(&mut engine, FeedEvent::PrevSession(feed), &EntryControl::disabled(), true);
        assert_eq!(engine.levels().prev_high(), Some(1.0));

        handle_event(&mut engine, FeedEvent::PrevSession(feed), &EntryControl::disabled(), false);
        assert_eq!(engine.levels().prev_high(), Some(2.0));
    }
}
