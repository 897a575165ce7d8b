//! kidlingo-sync: command-line front end for the KidLingo progress and
//! offline-sync engine.
//!
//! Every command opens the local state database, applies its change to the
//! learner's progress or the downloaded content, and pushes queued changes
//! to the backend when one is configured and reachable.

#![warn(clippy::all)]

mod cli;
mod config;
mod shutdown;
mod types;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use kidlingo_sync::clock::{Clock, FixedClock, SystemClock};
use kidlingo_sync::content::{ContentStore, FsStorageEstimator, OfflineProgressDelta, QuotaGuard};
use kidlingo_sync::progress::{ContentId, ProgressStore, ProgressUpdate, StreakEvent};
use kidlingo_sync::state::SqliteKvStore;
use kidlingo_sync::sync::{
    Connectivity, ConnectivityMonitor, DrainOutcome, HttpBackend, SyncEngine, SyncQueue,
};

use cli::Command;
use config::Config;

/// Everything a command needs, wired once per invocation.
struct App {
    config: Config,
    kv: Arc<SqliteKvStore>,
    queue: Arc<SyncQueue>,
    progress: Arc<ProgressStore>,
    connectivity: ConnectivityMonitor,
}

impl App {
    async fn open(config: Config) -> anyhow::Result<Self> {
        let kv = Arc::new(SqliteKvStore::open(&config.db_path()).await?);
        let queue = Arc::new(SyncQueue::open(kv.clone()).await?);
        let clock: Arc<dyn Clock> = match config.today {
            Some(today) => Arc::new(FixedClock::new(today)),
            None => Arc::new(SystemClock),
        };
        let progress = Arc::new(
            ProgressStore::open(
                config.learner_id.clone(),
                config.rules.clone(),
                clock,
                kv.clone(),
                queue.clone(),
            )
            .await?,
        );
        let connectivity = ConnectivityMonitor::new(if config.offline || config.server.is_none() {
            Connectivity::Offline
        } else {
            Connectivity::Online
        });
        Ok(Self {
            config,
            kv,
            queue,
            progress,
            connectivity,
        })
    }

    fn backend(&self) -> anyhow::Result<Arc<HttpBackend>> {
        let server = self
            .config
            .server
            .as_deref()
            .context("No backend configured; pass --server or set KIDLINGO_SERVER")?;
        Ok(Arc::new(HttpBackend::new(server, self.config.token.clone())?))
    }

    async fn content(&self) -> anyhow::Result<Arc<ContentStore>> {
        let root = self.config.content_dir();
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create {}", root.display()))?;
        let guard = QuotaGuard::new(
            Arc::new(FsStorageEstimator::new(&root)),
            self.config.content_budget_bytes,
        );
        let store = ContentStore::open(
            root,
            self.kv.clone(),
            self.queue.clone(),
            guard,
            self.config.sync.retry.clone(),
        )
        .await?;
        Ok(Arc::new(store))
    }

    async fn engine(&self) -> anyhow::Result<SyncEngine> {
        let engine = SyncEngine::new(
            self.queue.clone(),
            self.backend()?,
            self.progress.clone(),
            self.connectivity.clone(),
            self.config.sync.clone(),
        );
        Ok(engine.with_content(self.content().await?))
    }

    /// Send queued changes right away when the backend is reachable.
    async fn flush(&self) {
        if !self.connectivity.is_online() {
            println!("Queued for sync ({} pending).", self.queue.len());
            return;
        }
        match self.engine().await {
            Ok(engine) => print_drain(&engine.drain().await, self.queue.len()),
            Err(e) => tracing::warn!(error = %e, "Sync unavailable, changes stay queued"),
        }
    }
}

fn print_update(update: &ProgressUpdate, app: &App) {
    if update.duplicate {
        println!("Already completed, no XP awarded.");
        return;
    }
    if update.xp_awarded > 0 {
        println!("+{} XP", update.xp_awarded);
    }
    match update.streak {
        Some(StreakEvent::Started) => println!("Streak started!"),
        Some(StreakEvent::Continued) => println!("Streak continued!"),
        Some(StreakEvent::BrokenAndRestarted) => println!("Streak restarted at 1 day."),
        Some(StreakEvent::Unchanged) => println!("Already practised today."),
        None => {}
    }
    if let Some(days) = update.milestone {
        println!("{days}-day streak milestone!");
    }
    if update.levels_gained > 0 {
        println!("Level up! (+{})", update.levels_gained);
    }
    for badge in &update.badges_awarded {
        println!("New badge: {badge}");
    }

    let s = app.progress.snapshot();
    println!(
        "Level {} ({}/{} XP), streak {} day(s)",
        s.level,
        s.xp,
        app.progress.rules().curve.threshold(s.level),
        s.streak_days
    );
}

fn print_drain(outcome: &DrainOutcome, remaining: usize) {
    match outcome {
        DrainOutcome::Offline => println!("Offline, {remaining} item(s) stay queued."),
        DrainOutcome::Empty => println!("Nothing to sync."),
        DrainOutcome::AlreadyDraining => println!("A sync is already running."),
        DrainOutcome::Drained(report) => {
            println!("Sent {} item(s).", report.transmitted);
            if !report.failed.is_empty() {
                println!(
                    "{} item(s) failed; see `status --failed` and `retry-failed`.",
                    report.failed.len()
                );
            }
            if report.interrupted {
                println!("Went offline, {remaining} item(s) still queued.");
            }
            if report.reconciled {
                println!("Progress updated from the server.");
            }
            if report.persistence_errors > 0 {
                println!(
                    "Warning: {} local write(s) failed; they will be retried.",
                    report.persistence_errors
                );
            }
        }
    }
}

/// Run the status command.
async fn run_status(app: &App, failed: bool) -> anyhow::Result<()> {
    let s = app.progress.snapshot();
    let curve = app.progress.rules().curve;

    println!("Learner: {}", app.progress.learner_id());
    println!(
        "  Level:       {} ({}/{} XP)",
        s.level,
        s.xp,
        curve.threshold(s.level)
    );
    println!("  Lifetime XP: {}", app.progress.lifetime_xp());
    match s.last_practice_date {
        Some(date) => println!("  Streak:      {} day(s), last practised {date}", s.streak_days),
        None => println!("  Streak:      none yet"),
    }
    println!("  Completed:   {}", s.completed_content_ids.len());
    if !s.badges.is_empty() {
        println!("  Badges:");
        for (badge, earned_at) in &s.badges {
            println!("    {badge} ({})", earned_at.format("%Y-%m-%d"));
        }
    }
    println!();

    let failures = app.queue.failures();
    println!("Sync queue:");
    println!("  Pending: {}", app.queue.len());
    println!("  Failed:  {}", failures.len());
    if failed && !failures.is_empty() {
        println!();
        println!("Failed items:");
        for f in &failures {
            println!(
                "  {} {:?} after {} retries - {}",
                f.item.id, f.item.item_type, f.item.retry_count, f.error
            );
        }
    }
    println!();

    let content = app.content().await?;
    let records = content.records();
    println!("Downloaded content: {}", records.len());
    println!(
        "  Storage used: {:.1} MB",
        content.used_bytes() as f64 / (1024.0 * 1024.0)
    );
    for r in &records {
        println!(
            "  {} {} for {} ({:?}, {} pts)",
            r.content_id, r.package_id, r.child_id, r.sync_status, r.offline_progress.points_earned
        );
    }
    Ok(())
}

/// Run the sync command.
async fn run_sync(app: &App, watch: bool) -> anyhow::Result<()> {
    let engine = app.engine().await?;
    if !watch {
        print_drain(&engine.drain().await, app.queue.len());
        return Ok(());
    }

    let shutdown_token = shutdown::install_signal_handler();
    tracing::info!(pending = app.queue.len(), "Watching sync queue, Ctrl+C to stop");
    engine.run(shutdown_token).await;
    println!("{} item(s) still queued.", app.queue.len());
    Ok(())
}

/// Run the reset command.
async fn run_reset(app: &App, yes: bool) -> anyhow::Result<()> {
    if !yes {
        println!(
            "This will erase all progress for learner '{}'.",
            app.progress.learner_id()
        );
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let discarded = app.progress.reset().await?;
    println!("Progress reset ({discarded} queued change(s) discarded).");
    app.flush().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = Config::from_cli(&cli)?;
    tracing::debug!(?config, "Starting kidlingo-sync");
    let app = App::open(config).await?;
    let learner = app.config.learner_id.clone();

    match cli.command {
        Command::Status { failed } => run_status(&app, failed).await?,
        Command::Xp { amount } => {
            let update = app.progress.record_xp(amount).await?;
            print_update(&update, &app);
            app.flush().await;
        }
        Command::Practice => {
            let update = app.progress.record_practice().await?;
            print_update(&update, &app);
            app.flush().await;
        }
        Command::Complete { content, xp } => {
            let content_id: ContentId = content.parse()?;
            let update = app.progress.record_content_completion(content_id, xp).await?;
            print_update(&update, &app);
            if !update.duplicate {
                app.flush().await;
            }
        }
        Command::Sync { watch } => run_sync(&app, watch).await?,
        Command::Pull => {
            let engine = app.engine().await?;
            if engine.pull().await? {
                println!("Progress updated from the server.");
            } else {
                println!("Local progress already up to date.");
            }
        }
        Command::RetryFailed => {
            let engine = app.engine().await?;
            let outcome = engine.retry_failed().await?;
            print_drain(&outcome, app.queue.len());
        }
        Command::Download { package, child } => {
            let backend = app.backend()?;
            let content = app.content().await?;
            let child = child.unwrap_or(learner);
            let record = content.download(backend.as_ref(), &package, &child).await?;
            println!(
                "Downloaded {} for {} ({} bytes) as {}",
                record.package_id, record.child_id, record.storage_bytes_used, record.content_id
            );
        }
        Command::OfflineProgress {
            package,
            child,
            completed,
            points,
            seconds,
        } => {
            let content = app.content().await?;
            let child = child.unwrap_or(learner);
            let delta = OfflineProgressDelta {
                package_id: package,
                completed_items: completed,
                points_earned: points,
                time_spent_secs: seconds,
            };
            let record = content.update_offline_progress(&child, delta).await?;
            println!(
                "{}: {} item(s), {} pts, {} s",
                record.package_id,
                record.offline_progress.completed_items.len(),
                record.offline_progress.points_earned,
                record.offline_progress.time_spent_secs
            );
            app.flush().await;
        }
        Command::DeleteContent { content_id } => {
            let content = app.content().await?;
            let removed = content.delete(content_id).await?;
            println!(
                "Deleted {} ({} bytes freed)",
                removed.package_id, removed.storage_bytes_used
            );
        }
        Command::Reset { yes } => run_reset(&app, yes).await?,
    }

    Ok(())
}
