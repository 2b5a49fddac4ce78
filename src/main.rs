//! # Emitter: scheduled emission daemon
//!
//! Generates per-recipient synthetic profit events, notifies each one when it
//! falls due, and fans out a rendered broadcast several times a day inside a
//! configured window.
//!
//! Usage:
//!   emitter                              # Run the daemon (same as `emitter run`)
//!   emitter --config ./emitter.toml      # Custom config file
//!   emitter plan                         # Show today's broadcast plan
//!   emitter broadcast-now                # Run one broadcast cycle and exit
//!   emitter poll-once                    # Deliver everything due now and exit
//!   emitter generate --force             # Regenerate today's profit batches
//!   emitter recipient 12345 --daily-total 42.5

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use emitter_channels::TelegramChannel;
use emitter_core::EmitterConfig;
use emitter_scheduler::{
    BroadcastDispatcher, BroadcastScheduler, BroadcastWindow, CommandRenderer, DeliveryRetrier, DueNotifier,
    EmitterDb, ProfitEventGenerator, RetryPolicy,
};

#[derive(Parser)]
#[command(name = "emitter", version, about = "📣 Emitter: scheduled profit events and broadcasts")]
struct Cli {
    /// Config file (default: ~/.emitter/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon
    Run,
    /// Print today's broadcast plan without arming it
    Plan,
    /// Run one broadcast cycle immediately
    BroadcastNow,
    /// Deliver every profit event due now
    PollOnce,
    /// Generate today's profit batches
    Generate {
        /// Regenerate recipients that already have a batch today
        #[arg(long)]
        force: bool,
    },
    /// Add or update a recipient
    Recipient {
        id: String,
        /// Synthetic profit for the current day
        #[arg(long)]
        daily_total: Option<f64>,
        /// Account status (`active` makes the recipient eligible)
        #[arg(long)]
        status: Option<String>,
    },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<EmitterConfig> {
    let config = match path {
        Some(path) => EmitterConfig::load_from(path)?,
        None => EmitterConfig::load()?,
    };
    Ok(config)
}

fn open_db(config: &EmitterConfig) -> Result<Arc<EmitterDb>> {
    let db_path = expand_path(&config.database.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = EmitterDb::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?;
    Ok(Arc::new(db))
}

fn telegram(config: &EmitterConfig) -> Result<Arc<TelegramChannel>> {
    match &config.channel.telegram {
        Some(tg) if tg.enabled && !tg.bot_token.is_empty() => Ok(Arc::new(TelegramChannel::new(tg.clone()))),
        _ => anyhow::bail!("[channel.telegram] with a bot_token is required"),
    }
}

fn retrier(config: &EmitterConfig) -> DeliveryRetrier {
    DeliveryRetrier::new(RetryPolicy::from_config(&config.delivery))
}

fn notifier(config: &EmitterConfig, db: Arc<EmitterDb>, channel: Arc<TelegramChannel>) -> Result<DueNotifier> {
    Ok(DueNotifier::new(db, channel, retrier(config), config.offset()?)
        .with_claim_lease(Duration::from_secs(config.profit.claim_lease_secs))
        .with_currency(config.profit.currency.clone())
        .with_send_spacing(Duration::from_millis(config.profit.send_delay_ms))
        .with_poll_interval(Duration::from_secs(config.profit.poll_interval_secs)))
}

fn dispatcher(config: &EmitterConfig, db: Arc<EmitterDb>, channel: Arc<TelegramChannel>) -> BroadcastDispatcher {
    BroadcastDispatcher::new(
        channel,
        Arc::new(CommandRenderer::from_config(&config.renderer)),
        db,
        retrier(config),
        Duration::from_millis(config.broadcast.inter_send_delay_ms),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "emitter=debug,emitter_scheduler=debug,emitter_channels=debug"
    } else {
        "emitter=info,emitter_scheduler=info,emitter_channels=info"
    };
    let logger = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false);
    if cli.log_json {
        logger.json().init();
    } else {
        logger.init();
    }

    let config_path = cli.config.as_deref().map(expand_path);
    let config = load_config(config_path.as_ref())?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, config_path).await,
        Command::Plan => {
            let window = BroadcastWindow::from_config(&config)?;
            let now = Utc::now();
            let fires = window.plan(now, &mut rand::thread_rng());
            println!("📅 Broadcast plan ({} posts, offset {})", fires.len(), window.offset);
            for fire in fires {
                println!(
                    "   {} local  {} UTC{}",
                    fire.local_time.format("%H:%M"),
                    fire.fire_at.format("%Y-%m-%d %H:%M"),
                    if fire.deferred { "  (tomorrow)" } else { "" }
                );
            }
            Ok(())
        }
        Command::BroadcastNow => {
            let db = open_db(&config)?;
            let channel = telegram(&config)?;
            let summary = dispatcher(&config, db, channel).run_cycle().await?;
            println!(
                "✅ {} recipients: {} delivered, {} unreachable, {} failed",
                summary.recipients, summary.delivered, summary.unreachable, summary.failed
            );
            Ok(())
        }
        Command::PollOnce => {
            let db = open_db(&config)?;
            let channel = telegram(&config)?;
            let summary = notifier(&config, db, channel)?.poll_once(Utc::now()).await?;
            println!(
                "✅ {} claimed: {} delivered, {} unreachable, {} exhausted",
                summary.claimed, summary.delivered, summary.unreachable, summary.exhausted
            );
            Ok(())
        }
        Command::Generate { force } => {
            let db = open_db(&config)?;
            let generator = ProfitEventGenerator::from_config(&config)?;
            let summary = generator
                .generate_all(db.as_ref(), db.as_ref(), Utc::now(), !force)
                .await?;
            println!(
                "✅ {} batches, {} events ({} skipped, {} failed)",
                summary.batches, summary.events, summary.skipped, summary.failed
            );
            Ok(())
        }
        Command::Recipient {
            id,
            daily_total,
            status,
        } => {
            let db = open_db(&config)?;
            if let Some(total) = daily_total {
                db.upsert_recipient(&id, total)?;
                println!("✅ Recipient {id}: daily total {total:.2}");
            }
            if let Some(status) = status {
                if !db.set_recipient_status(&id, &status)? {
                    anyhow::bail!("unknown recipient {id}");
                }
                println!("✅ Recipient {id}: status {status}");
            }
            Ok(())
        }
    }
}

async fn run(config: EmitterConfig, config_path: Option<PathBuf>) -> Result<()> {
    println!("📣 Emitter v{}", env!("CARGO_PKG_VERSION"));

    let db = open_db(&config)?;
    let channel = telegram(&config)?;
    match channel.get_me().await {
        Ok(me) => tracing::info!("✅ Telegram bot @{}", me.username.unwrap_or(me.first_name)),
        Err(e) => tracing::warn!("⚠️ Telegram token check failed: {e}"),
    }

    let mut services = Services::default();
    if config.profit.enabled {
        let generator = Arc::new(ProfitEventGenerator::from_config(&config)?);
        tokio::spawn(emitter_scheduler::spawn_daily_generation(
            generator,
            db.clone(),
            db.clone(),
        ));
        let notifier = Arc::new(notifier(&config, db.clone(), channel.clone())?);
        tokio::spawn(emitter_scheduler::spawn_notifier(notifier.clone()));
        services.notifier = Some(notifier);
    } else {
        tracing::info!("Profit events disabled");
    }

    if config.broadcast.enabled {
        let window = BroadcastWindow::from_config(&config)?;
        let dispatcher = Arc::new(dispatcher(&config, db.clone(), channel.clone()));
        let scheduler = Arc::new(BroadcastScheduler::new(window, dispatcher.clone()));
        tokio::spawn(emitter_scheduler::spawn_broadcast_scheduler(scheduler.clone()));
        services.dispatcher = Some(dispatcher);
        services.scheduler = Some(scheduler);
    } else {
        tracing::info!("Broadcasts disabled");
    }

    wait_for_shutdown(&services, config_path).await?;
    if let Some(scheduler) = &services.scheduler {
        scheduler.cancel_all().await;
    }
    tracing::info!("👋 Shutting down");
    Ok(())
}

/// Running services whose settings follow the config file.
#[derive(Default)]
struct Services {
    notifier: Option<Arc<DueNotifier>>,
    dispatcher: Option<Arc<BroadcastDispatcher>>,
    scheduler: Option<Arc<BroadcastScheduler>>,
}

impl Services {
    /// Push reloaded settings into every running service. Enabling a
    /// disabled service still needs a restart.
    async fn reconfigure(&self, config: &EmitterConfig) -> Result<()> {
        let window = BroadcastWindow::from_config(config)?;
        let policy = RetryPolicy::from_config(&config.delivery);

        if let Some(notifier) = &self.notifier {
            notifier
                .reconfigure(
                    policy.clone(),
                    Duration::from_millis(config.profit.send_delay_ms),
                    Duration::from_secs(config.profit.poll_interval_secs),
                )
                .await;
        } else if config.profit.enabled {
            tracing::warn!("⚠️ Profit events were disabled at startup; restart to enable them");
        }

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher
                .reconfigure(policy, Duration::from_millis(config.broadcast.inter_send_delay_ms))
                .await;
        }
        match &self.scheduler {
            Some(scheduler) => {
                scheduler.reconfigure(window, Utc::now()).await;
            }
            None if config.broadcast.enabled => {
                tracing::warn!("⚠️ Broadcasts were disabled at startup; restart to enable them");
            }
            None => {}
        }
        Ok(())
    }
}

/// Reload the configuration on SIGHUP until Ctrl-C.
#[cfg(unix)]
async fn wait_for_shutdown(services: &Services, config_path: Option<PathBuf>) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = hangup.recv() => {
                tracing::info!("🔁 SIGHUP: reloading configuration");
                let reloaded = match load_config(config_path.as_ref()) {
                    Ok(config) => services.reconfigure(&config).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = reloaded {
                    tracing::error!("❌ Reload failed, keeping current settings: {e}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_services: &Services, _config_path: Option<PathBuf>) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
