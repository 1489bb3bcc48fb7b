//! Periodic ledger maintenance

use super::calendar::next_reset;
use crate::config::SchedulerConfig;
use crate::error::DaemonResult;
use chrono::{DateTime, Utc, Weekday};
use logi_ledger::{Ledger, Reconciler, SyncReport};
use logi_types::{Caller, LeaderboardEntry};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

/// Runs the decay, dashboard, audit flush and leaderboard tasks.
///
/// Each task runs on its own schedule. A tick that fires while the
/// previous run of the same task is still busy is skipped rather than
/// queued.
pub struct Scheduler {
    config: SchedulerConfig,
    reset_weekday: Weekday,
    ledger: Arc<Ledger>,
    reconciler: Arc<Reconciler>,
    running: watch::Sender<bool>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        ledger: Arc<Ledger>,
        reconciler: Arc<Reconciler>,
    ) -> DaemonResult<Arc<Self>> {
        let reset_weekday = config.reset_weekday()?;
        let (running, _) = watch::channel(false);
        Ok(Arc::new(Self {
            config,
            reset_weekday,
            ledger,
            reconciler,
            running,
        }))
    }

    /// Start the scheduler background tasks and wait until [`stop`] is
    /// called
    ///
    /// [`stop`]: Scheduler::stop
    pub async fn start(self: Arc<Self>) {
        self.running.send_replace(true);
        tracing::info!(
            decay_secs = self.config.decay_interval_secs,
            display_secs = self.config.display_interval_secs,
            flush_secs = self.config.audit_flush_interval_secs,
            reset = %format!("{} {:02}:00 UTC", self.reset_weekday, self.config.leaderboard_reset_hour),
            "Scheduler started"
        );

        let decay = tokio::spawn(self.clone().every(self.config.decay_interval(), |s| async move {
            if let Err(e) = s.decay_tick().await {
                tracing::error!(error = %e, "Decay tick failed");
            }
        }));

        let display = tokio::spawn(self.clone().every(self.config.display_interval(), |s| async move {
            s.display_tick().await;
        }));

        let flush = tokio::spawn(self.clone().every(self.config.audit_flush_interval(), |s| async move {
            s.flush_tick().await;
        }));

        let leaderboard = tokio::spawn(self.clone().weekly());

        for (name, handle) in [
            ("decay", decay),
            ("display", display),
            ("flush", flush),
            ("leaderboard", leaderboard),
        ] {
            if let Err(e) = handle.await {
                tracing::error!(task = name, error = %e, "Scheduler task aborted");
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Stop the scheduler
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Settle decay for every tunnel up to now
    pub async fn decay_tick(&self) -> DaemonResult<f64> {
        Ok(self.ledger.apply_decay(Utc::now()).await?)
    }

    /// Push current ledger state to every bound dashboard
    pub async fn display_tick(&self) -> SyncReport {
        self.reconciler.sync_all(&self.ledger).await
    }

    /// Emit buffered audit lines
    pub async fn flush_tick(&self) -> usize {
        self.ledger.audit().flush().await
    }

    /// Close the weekly leaderboard period
    pub async fn leaderboard_tick(&self) -> DaemonResult<Vec<LeaderboardEntry>> {
        let standings = self
            .ledger
            .close_leaderboard_period(&Caller::system())
            .await?;
        for entry in &standings {
            tracing::info!(rank = entry.rank, user = %entry.user, total = entry.total, "Weekly standings");
        }
        Ok(standings)
    }

    async fn every<F, Fut>(self: Arc<Self>, period: Duration, task: F)
    where
        F: Fn(Arc<Self>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut running = self.running.subscribe();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately; startup already caught up
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stopped(&mut running) => break,
            }
            task(self.clone()).await;
        }
    }

    /// First reset strictly after `after`
    pub fn following_reset(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        next_reset(after, self.reset_weekday, self.config.leaderboard_reset_hour)
    }

    async fn weekly(self: Arc<Self>) {
        let mut running = self.running.subscribe();
        let mut due = self.following_reset(Utc::now());
        loop {
            tracing::debug!(due = %due, "Next leaderboard reset scheduled");

            tokio::select! {
                _ = wait_until(due, Utc::now) => {}
                _ = stopped(&mut running) => break,
            }

            if let Err(e) = self.leaderboard_tick().await {
                tracing::error!(error = %e, "Leaderboard reset failed");
            }
            // next period starts from the one just closed, not from the clock
            due = self.following_reset(due);
        }
    }
}

/// Sleep until `clock` reaches `due`, going back to sleep when the timer
/// fires early
async fn wait_until(due: DateTime<Utc>, clock: impl Fn() -> DateTime<Utc>) {
    loop {
        let remaining = (due - clock()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return;
        }
        tokio::time::sleep(remaining).await;
    }
}

/// Resolves once the running flag drops to false
async fn stopped(running: &mut watch::Receiver<bool>) {
    loop {
        let still_running = *running.borrow_and_update();
        if !still_running || running.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logi_ledger::{AuditLog, InMemoryStore, MemoryAuditSink, MemorySurface};
    use logi_types::{GuildId, SurfaceId};

    struct Rig {
        scheduler: Arc<Scheduler>,
        ledger: Arc<Ledger>,
        sink: Arc<MemoryAuditSink>,
        surface: Arc<MemorySurface>,
    }

    async fn rig(config: SchedulerConfig) -> Rig {
        let sink = Arc::new(MemoryAuditSink::new());
        let audit = Arc::new(AuditLog::new(sink.clone()));
        let ledger = Arc::new(
            Ledger::open(Arc::new(InMemoryStore::new()), audit)
                .await
                .unwrap(),
        );
        let surface = Arc::new(MemorySurface::new());
        let reconciler = Arc::new(Reconciler::new(surface.clone()));
        let scheduler = Scheduler::new(config, ledger.clone(), reconciler).unwrap();
        Rig {
            scheduler,
            ledger,
            sink,
            surface,
        }
    }

    #[tokio::test]
    async fn test_leaderboard_tick_zeroes_period_totals() {
        let rig = rig(SchedulerConfig::default()).await;
        let officer = Caller::officer("officer");
        rig.ledger
            .add_tunnel(&officer, "North", "T1", 0.0, 0.0, "")
            .await
            .unwrap();
        rig.ledger
            .add_supplies(&Caller::member("alice"), "T1", 40, None)
            .await
            .unwrap();

        let standings = rig.scheduler.leaderboard_tick().await.unwrap();
        assert_eq!(standings.len(), 1);
        assert_eq!(standings[0].total, 40);
        assert!(rig.ledger.leaderboard(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_flush_tick_drains_audit_buffer() {
        let rig = rig(SchedulerConfig::default()).await;
        rig.ledger
            .add_tunnel(&Caller::officer("officer"), "North", "T1", 0.0, 0.0, "")
            .await
            .unwrap();
        rig.ledger
            .add_supplies(&Caller::member("alice"), "T1", 7, None)
            .await
            .unwrap();

        assert_eq!(rig.scheduler.flush_tick().await, 1);
        assert!(rig
            .sink
            .texts()
            .contains(&"alice added supplies to T1 (7 today)".to_string()));
    }

    #[tokio::test]
    async fn test_next_period_follows_closed_one() {
        let rig = rig(SchedulerConfig::default()).await;
        let due = rig.scheduler.following_reset(Utc::now());

        assert_eq!(rig.scheduler.following_reset(due), due + chrono::Duration::weeks(1));
        // a wake slightly before the due time still maps to the same reset
        let early = due - chrono::Duration::milliseconds(5);
        assert_eq!(rig.scheduler.following_reset(early), due);
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_wake_sleeps_again() {
        let due = Utc::now() + chrono::Duration::hours(1);
        let readings = std::sync::Mutex::new(vec![
            due,
            due - chrono::Duration::seconds(2),
            due - chrono::Duration::hours(1),
        ]);
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let clock = || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            readings.lock().unwrap().pop().unwrap_or(due)
        };

        wait_until(due, clock).await;
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_run_and_stop() {
        let config = SchedulerConfig {
            decay_interval_secs: 1,
            display_interval_secs: 1,
            audit_flush_interval_secs: 1,
            ..Default::default()
        };
        let rig = rig(config).await;
        let officer = Caller::officer("officer");
        rig.ledger
            .add_tunnel(&officer, "North", "T1", 10.0, 0.0, "")
            .await
            .unwrap();
        rig.ledger
            .bind_display(&officer, GuildId::new("g"), "North", SurfaceId::new("chan"))
            .await
            .unwrap();

        let handle = tokio::spawn(rig.scheduler.clone().start());
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(rig.scheduler.is_running());
        assert_eq!(rig.surface.len(), 1);

        rig.scheduler.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(!rig.scheduler.is_running());
    }
}
