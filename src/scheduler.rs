use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::refresh::RefreshStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstTick {
    /// Run a cycle as soon as the scheduler starts.
    Immediate,
    /// Wait one full period first (the cache was already warmed from the store).
    AfterPeriod,
}

/// Drives a refresh strategy on a fixed period, one cycle at a time.
///
/// Cycles are awaited inline, so a slow cycle delays the next tick instead of overlapping
/// it; ticks missed meanwhile are skipped, not queued.
pub struct Scheduler {
    strategy: Arc<dyn RefreshStrategy>,
    period: Duration,
    first_tick: FirstTick,
}

/// Running scheduler. Dropping it without `shutdown` leaves the task running.
pub struct SchedulerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling. A cycle already running is allowed to finish; this waits for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!("Scheduler task ended abnormally: {e}");
        }
    }
}

impl Scheduler {
    pub fn new(
        strategy: Arc<dyn RefreshStrategy>,
        period: Duration,
        first_tick: FirstTick,
    ) -> Self {
        Self {
            strategy,
            period,
            first_tick,
        }
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SchedulerHandle { shutdown_tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if self.first_tick == FirstTick::AfterPeriod {
            ticker.tick().await; // consume immediate first tick
        }

        info!(
            mode = self.strategy.mode(),
            period_secs = self.period.as_secs(),
            "Scheduler started",
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }
            if *shutdown.borrow() {
                break;
            }

            let result = self.strategy.run_cycle().await;
            debug!(outcome = %result, "Scheduled cycle finished");

            if !self.strategy.periodic() {
                info!(
                    mode = self.strategy.mode(),
                    "Strategy is one-shot, no further cycles scheduled"
                );
                return;
            }
        }

        info!("Scheduler stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CycleResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PERIOD: Duration = Duration::from_secs(60);

    #[derive(Default)]
    struct CountingStrategy {
        started: AtomicUsize,
        finished: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        cycle_time: Duration,
        one_shot: bool,
    }

    impl CountingStrategy {
        fn new(cycle_time: Duration, one_shot: bool) -> Arc<Self> {
            Arc::new(Self {
                cycle_time,
                one_shot,
                ..Default::default()
            })
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RefreshStrategy for CountingStrategy {
        async fn run_cycle(&self) -> CycleResult {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);
            if !self.cycle_time.is_zero() {
                tokio::time::sleep(self.cycle_time).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.finished.fetch_add(1, Ordering::SeqCst);
            CycleResult::Success(1)
        }

        fn periodic(&self) -> bool {
            !self.one_shot
        }

        fn mode(&self) -> &'static str {
            "TEST"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_first_tick_then_fixed_period() {
        let strategy = CountingStrategy::new(Duration::ZERO, false);
        let handle = Scheduler::new(strategy.clone(), PERIOD, FirstTick::Immediate).spawn();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(strategy.finished(), 1);

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(strategy.finished(), 4);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn after_period_defers_first_cycle() {
        let strategy = CountingStrategy::new(Duration::ZERO, false);
        let handle = Scheduler::new(strategy.clone(), PERIOD, FirstTick::AfterPeriod).spawn();

        tokio::time::sleep(PERIOD / 2).await;
        assert_eq!(strategy.finished(), 0);

        tokio::time::sleep(PERIOD / 2 + Duration::from_millis(1)).await;
        assert_eq!(strategy.finished(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_strategy_runs_once() {
        let strategy = CountingStrategy::new(Duration::ZERO, true);
        let handle = Scheduler::new(strategy.clone(), PERIOD, FirstTick::Immediate).spawn();

        tokio::time::sleep(PERIOD * 5).await;
        assert_eq!(strategy.finished(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_in_flight_cycle_finish_and_starts_no_more() {
        let strategy = CountingStrategy::new(Duration::from_secs(10), false);
        let handle = Scheduler::new(strategy.clone(), PERIOD, FirstTick::Immediate).spawn();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(strategy.started(), 1);
        assert_eq!(strategy.finished(), 0);

        handle.shutdown().await;
        assert_eq!(strategy.finished(), 1);

        tokio::time::sleep(PERIOD * 3).await;
        assert_eq!(strategy.started(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycles_never_overlap() {
        let strategy = CountingStrategy::new(PERIOD * 5 / 2, false);
        let handle = Scheduler::new(strategy.clone(), PERIOD, FirstTick::Immediate).spawn();

        tokio::time::sleep(PERIOD * 10).await;
        handle.shutdown().await;

        assert_eq!(strategy.max_running.load(Ordering::SeqCst), 1);
        let started = strategy.started();
        assert!(started <= 5, "started {started} cycles");
        assert_eq!(strategy.started(), strategy.finished());
    }
}
