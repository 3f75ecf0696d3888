//! C9 — two-tier scheduler: hot/cold periodic groups, bounded concurrency,
//! lag-skip, graceful shutdown, self-healing.
//!
//! The tick/interval/lag-skip shape is grounded on the teacher's trading
//! loop (`cycle_start`, `cycle_duration`, `sleep_time =
//! interval.saturating_sub(cycle_duration)`), generalized here to two
//! independent groups instead of one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::apis::DexScreenerClient;
use crate::lifecycle::{self, LifecycleContext};
use crate::repository::TokenRepository;
use crate::scoring::{score_token, ScoringOutcome};
use crate::settings::{keys, Settings};
use crate::types::SchedulerGroup;

const HOT_CONCURRENCY: usize = 12;
const COLD_CONCURRENCY: usize = 16;

/// Bounded self-healing attempts before a group gives up and asks the
/// process to restart (`spec.md` §4.9).
const MAX_RESTART_ATTEMPTS: u32 = 3;

/// Snapshot of scheduler health for an (out-of-scope) external supervisor
/// to poll, per `SPEC_FULL.md` §9 A1's ambient health surface.
#[derive(Debug, Clone, Default)]
pub struct SchedulerHealth {
    /// Wall-clock time of the hot group's last completed tick.
    pub hot_last_tick: Option<chrono::DateTime<Utc>>,
    /// Wall-clock time of the cold group's last completed tick.
    pub cold_last_tick: Option<chrono::DateTime<Utc>>,
    /// Number of ticks skipped for lagging, hot group.
    pub hot_lag_count: u64,
    /// Number of ticks skipped for lagging, cold group.
    pub cold_lag_count: u64,
    /// Number of times a group was restarted by the self-healing watchdog.
    pub restart_count: u64,
    /// Set once a group exhausts its bounded restart attempts and the
    /// process needs a full restart from its supervisor.
    pub restart_requested: bool,
}

/// Owns the two periodic groups and the collaborators a per-token
/// operation needs.
pub struct Scheduler {
    client: Arc<DexScreenerClient>,
    repository: Arc<dyn TokenRepository>,
    settings: Arc<Settings>,
    health: Arc<tokio::sync::Mutex<SchedulerHealth>>,
}

impl Scheduler {
    /// Builds a scheduler over the given collaborators.
    pub fn new(
        client: Arc<DexScreenerClient>,
        repository: Arc<dyn TokenRepository>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            client,
            repository,
            settings,
            health: Arc::new(tokio::sync::Mutex::new(SchedulerHealth::default())),
        }
    }

    /// Current health snapshot.
    pub async fn health(&self) -> SchedulerHealth {
        self.health.lock().await.clone()
    }

    /// Runs both groups until `shutdown` is signalled or a group exhausts
    /// its self-healing attempts, then waits up to
    /// `graceful_shutdown_timeout` for in-flight operations to drain before
    /// cancelling whatever remains. Returns `false` when it stopped because
    /// a group requested a full process restart rather than because of a
    /// clean shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>, graceful_shutdown_timeout: Duration) -> bool {
        let hot_scheduler = Arc::clone(&self);
        let hot_shutdown = shutdown.clone();
        let mut hot_handle =
            tokio::spawn(async move { hot_scheduler.run_group(SchedulerGroup::Hot, hot_shutdown).await });

        let cold_scheduler = Arc::clone(&self);
        let cold_shutdown = shutdown.clone();
        let mut cold_handle =
            tokio::spawn(async move { cold_scheduler.run_group(SchedulerGroup::Cold, cold_shutdown).await });

        // Wait for the shutdown signal, or for a group to exit unprompted
        // (self-healing exhaustion requesting a full process restart). A
        // completed handle is never polled again afterwards, so we return
        // directly from those branches instead of falling through to the
        // join below.
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = &mut hot_handle => {
                let _ = (&mut cold_handle).await;
                return !self.health.lock().await.restart_requested;
            }
            _ = &mut cold_handle => {
                let _ = (&mut hot_handle).await;
                return !self.health.lock().await.restart_requested;
            }
        }

        info!(
            timeout_secs = graceful_shutdown_timeout.as_secs(),
            "scheduler shutting down, draining in-flight operations"
        );

        let drained = tokio::time::timeout(
            graceful_shutdown_timeout,
            futures::future::join_all([&mut hot_handle, &mut cold_handle]),
        )
        .await;

        if drained.is_err() {
            warn!("graceful shutdown timeout elapsed, cancelling remaining in-flight operations");
            hot_handle.abort();
            cold_handle.abort();
        }

        !self.health.lock().await.restart_requested
    }

    /// Runs a single group's periodic loop, matching the teacher's
    /// `cycle_start` / `cycle_duration` / `saturating_sub` lag-skip shape.
    /// A tick that hangs for ≥ 2x the group's interval is treated as a
    /// failed restart attempt (`spec.md` §4.9); after `MAX_RESTART_ATTEMPTS`
    /// the group gives up and flags the scheduler for a full process
    /// restart.
    ///
    /// Shutdown is deliberately not raced against an in-flight tick: the
    /// tick is left to run to completion (bounded only by its own hang
    /// timeout) so `Scheduler::run`'s `graceful_shutdown_timeout` window has
    /// real in-flight work to drain instead of everything having already
    /// been cancelled the instant `shutdown` flips. `shutdown` is checked
    /// between ticks and while sleeping instead.
    async fn run_group(&self, group: SchedulerGroup, mut shutdown: watch::Receiver<bool>) {
        let mut restart_attempts = 0u32;

        loop {
            if *shutdown.borrow() {
                return;
            }

            let interval_sec = self.interval_for(group).await;
            let tick_started = Instant::now();
            let hang_timeout = Duration::from_secs(interval_sec.max(1) as u64 * 2);

            if tokio::time::timeout(hang_timeout, self.tick(group)).await.is_err() {
                restart_attempts += 1;
                warn!(%group, restart_attempts, "tick exceeded 2x its interval, restarting group");
                self.record_restart(group).await;

                if restart_attempts >= MAX_RESTART_ATTEMPTS {
                    error!(%group, "exceeded bounded self-healing attempts, requesting process restart");
                    self.request_process_restart().await;
                    return;
                }
                continue;
            }

            self.record_tick(group).await;

            let cycle_duration = tick_started.elapsed();
            let interval = Duration::from_secs(interval_sec.max(1) as u64);

            if cycle_duration >= interval {
                warn!(%group, "tick exceeded its interval, skipping next tick");
                self.record_lag(group).await;
                continue;
            }

            if restart_attempts > 0 {
                info!(%group, restart_attempts, "group recovered");
                restart_attempts = 0;
            }

            if *shutdown.borrow() {
                return;
            }

            let sleep_time = interval.saturating_sub(cycle_duration);
            tokio::select! {
                _ = tokio::time::sleep(sleep_time) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn interval_for(&self, group: SchedulerGroup) -> i64 {
        match group {
            SchedulerGroup::Hot => self.settings.get_typed(keys::HOT_INTERVAL_SEC, 10).await,
            SchedulerGroup::Cold => self.settings.get_typed(keys::COLD_INTERVAL_SEC, 45).await,
        }
    }

    async fn record_tick(&self, group: SchedulerGroup) {
        let mut health = self.health.lock().await;
        match group {
            SchedulerGroup::Hot => health.hot_last_tick = Some(Utc::now()),
            SchedulerGroup::Cold => health.cold_last_tick = Some(Utc::now()),
        }
    }

    async fn record_lag(&self, group: SchedulerGroup) {
        let mut health = self.health.lock().await;
        match group {
            SchedulerGroup::Hot => health.hot_lag_count += 1,
            SchedulerGroup::Cold => health.cold_lag_count += 1,
        }
    }

    async fn record_restart(&self, _group: SchedulerGroup) {
        self.health.lock().await.restart_count += 1;
    }

    async fn request_process_restart(&self) {
        self.health.lock().await.restart_requested = true;
    }

    /// Runs one tick for `group`: fetch due tokens, dispatch with bounded
    /// concurrency, evaluate lifecycle per token.
    pub async fn tick(&self, group: SchedulerGroup) {
        let interval_sec = self.interval_for(group).await;
        let min_score = self.settings.get_typed(keys::MIN_SCORE, 0.1).await;
        let limit = match group {
            SchedulerGroup::Hot => HOT_CONCURRENCY as i64 * 4,
            SchedulerGroup::Cold => COLD_CONCURRENCY as i64 * 4,
        };

        let due = match self
            .repository
            .list_due(group, Utc::now(), interval_sec, min_score, limit)
            .await
        {
            Ok(tokens) => tokens,
            Err(err) => {
                warn!(%group, %err, "list_due failed, skipping this tick");
                return;
            }
        };

        let concurrency = match group {
            SchedulerGroup::Hot => HOT_CONCURRENCY,
            SchedulerGroup::Cold => COLD_CONCURRENCY,
        };

        let client = &self.client;
        let repository = self.repository.as_ref();
        let settings = &self.settings;

        stream::iter(due)
            .map(|token| async move {
                let outcome = score_token(&token, client, repository, settings).await;
                if let ScoringOutcome::Scored(_) = &outcome {
                    self.evaluate_lifecycle(&token).await;
                }
            })
            .buffer_unordered(concurrency)
            .for_each(|_| async {})
            .await;
    }

    async fn evaluate_lifecycle(&self, token: &crate::types::Token) {
        let activation_min_liquidity_usd = self
            .settings
            .get_typed(keys::ACTIVATION_MIN_LIQUIDITY_USD, 200.0)
            .await;
        let archive_below_hours = self.settings.get_typed(keys::ARCHIVE_BELOW_HOURS, 12.0).await;
        let monitoring_timeout_hours = self
            .settings
            .get_typed(keys::MONITORING_TIMEOUT_HOURS, 12.0)
            .await;
        let min_score = self.settings.get_typed(keys::MIN_SCORE, 0.1).await;

        let latest = self.repository.latest_snapshot(token.id).await.ok().flatten();

        let has_qualifying_external_pool = latest
            .as_ref()
            .map(|s| {
                s.metrics.pools.iter().any(|(dex, _, _, liquidity_usd)| {
                    !lifecycle::is_launchpad_native(dex) && *liquidity_usd >= activation_min_liquidity_usd
                })
            })
            .unwrap_or(false);

        let hours_below_min_score = latest
            .as_ref()
            .map(|s| if s.smoothed_total < min_score { archive_below_hours } else { 0.0 })
            .unwrap_or(0.0);

        let ctx = LifecycleContext {
            token,
            metrics: latest.as_ref().map(|s| &s.metrics),
            activation_min_liquidity_usd,
            has_qualifying_external_pool,
            hours_below_min_score,
            archive_below_hours,
            monitoring_timeout_hours,
            now: Utc::now(),
        };

        if let Some(next) = lifecycle::next_status(&ctx) {
            if let Err(err) = self.repository.set_status(token.id, next).await {
                warn!(mint = %token.mint_address, %err, "failed to persist lifecycle transition");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTokenRepository;

    fn scheduler() -> Scheduler {
        // `connect_lazy` never opens a connection; fine here since these
        // tests only exercise the in-memory health bookkeeping, never a
        // query through `Settings`.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction does not touch the network");

        Scheduler::new(
            Arc::new(DexScreenerClient::new("http://localhost")),
            Arc::new(InMemoryTokenRepository::new()),
            Arc::new(Settings::new(pool)),
        )
    }

    #[tokio::test]
    async fn health_starts_clean() {
        let s = scheduler();
        let health = s.health().await;
        assert_eq!(health.restart_count, 0);
        assert!(!health.restart_requested);
    }

    #[tokio::test]
    async fn restart_attempts_below_bound_do_not_request_process_restart() {
        let s = scheduler();
        for _ in 0..MAX_RESTART_ATTEMPTS - 1 {
            s.record_restart(SchedulerGroup::Hot).await;
        }
        let health = s.health().await;
        assert_eq!(health.restart_count, (MAX_RESTART_ATTEMPTS - 1) as u64);
        assert!(!health.restart_requested);
    }

    #[tokio::test]
    async fn exhausting_restart_attempts_flags_process_restart() {
        let s = scheduler();
        for _ in 0..MAX_RESTART_ATTEMPTS {
            s.record_restart(SchedulerGroup::Cold).await;
        }
        s.request_process_restart().await;
        let health = s.health().await;
        assert_eq!(health.restart_count, MAX_RESTART_ATTEMPTS as u64);
        assert!(health.restart_requested);
    }
}
