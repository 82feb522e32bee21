//! Batched admission loop.
//!
//! The controller never parallelises mutating calls. It trusts one
//! external signal, the platform's count of installations currently
//! updating, as the admission gate:
//!
//! ```text
//! loop until cursor == len:
//!     deadline passed?          → Timeout { remaining }
//!     updating >= max_concurrent → wait min(poll_interval, time left), recheck
//!     take up to batch_size items at the cursor, advance the cursor past each
//!     execute each; call_delay after every applied mutation
//!     anything applied and items left → wait poll_interval
//! ```
//!
//! Skipped items are never revisited. Any step error aborts the loop;
//! already-applied mutations stay applied.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use fleet_core::SkipReason;
use fleet_provisioner::{Provisioner, ProvisionerResult};

use crate::error::{ReconcileError, ReconcileResult};

/// Loop tuning. Defaults match the controller's command-line defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Admission closes while at least this many installations are updating.
    pub max_concurrent: u64,
    /// Items attempted between two admission checks.
    pub batch_size: usize,
    /// Pause after each applied mutation.
    pub call_delay: Duration,
    /// Wait between admission checks, and after a batch that applied work.
    pub poll_interval: Duration,
    /// Wall-clock ceiling for the whole loop.
    pub deadline: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            batch_size: 3,
            call_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(15),
            deadline: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> ReconcileResult<()> {
        if self.batch_size == 0 {
            return Err(ReconcileError::InvalidConfig(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(ReconcileError::InvalidConfig(
                "max concurrent updates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// The admission signal: how many installations are mid-transition.
#[async_trait]
pub trait AdmissionGauge: Send + Sync {
    async fn currently_updating(&self) -> ProvisionerResult<u64>;
}

#[async_trait]
impl<P: Provisioner + ?Sized> AdmissionGauge for P {
    async fn currently_updating(&self) -> ProvisionerResult<u64> {
        self.installations_updating().await
    }
}

/// What happened to one item.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Applied,
    Skipped(SkipReason),
}

/// Per-item work executed by the loop.
#[async_trait]
pub trait BatchStep<T: Sync>: Send {
    async fn execute(&mut self, item: &T) -> ReconcileResult<StepOutcome>;
}

/// Runs items through a [`BatchStep`] under the admission gauge.
#[derive(Debug, Clone)]
pub struct BatchLoop {
    config: BatchConfig,
}

impl BatchLoop {
    pub fn new(config: BatchConfig) -> ReconcileResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every item once, in order. Returns the number applied.
    pub async fn run<T, G, S>(&self, items: &[T], gauge: &G, step: &mut S) -> ReconcileResult<usize>
    where
        T: Sync,
        G: AdmissionGauge + ?Sized,
        S: BatchStep<T> + ?Sized,
    {
        let total = items.len();
        let deadline = Instant::now() + self.config.deadline;
        let mut cursor = 0;
        let mut applied = 0;

        while cursor < total {
            self.admit(gauge, deadline, total - cursor, total).await?;

            let end = (cursor + self.config.batch_size).min(total);
            let mut applied_in_batch = 0;
            for item in &items[cursor..end] {
                cursor += 1;
                match step.execute(item).await? {
                    StepOutcome::Applied => {
                        applied += 1;
                        applied_in_batch += 1;
                        tokio::time::sleep(self.config.call_delay).await;
                    }
                    StepOutcome::Skipped(reason) => {
                        debug!(reason = %reason, "batch item skipped at execution");
                    }
                }
            }

            debug!(processed = cursor, total, applied_in_batch, "batch complete");

            if applied_in_batch > 0 && cursor < total {
                sleep_until_or_deadline(self.config.poll_interval, deadline).await;
            }
        }

        Ok(applied)
    }

    /// Wait until the gauge drops below the limit or the deadline passes.
    async fn admit<G>(
        &self,
        gauge: &G,
        deadline: Instant,
        remaining: usize,
        total: usize,
    ) -> ReconcileResult<()>
    where
        G: AdmissionGauge + ?Sized,
    {
        loop {
            if Instant::now() >= deadline {
                return Err(ReconcileError::Timeout { remaining, total });
            }

            let updating = gauge.currently_updating().await?;
            if updating < self.config.max_concurrent {
                return Ok(());
            }

            info!(
                updating,
                max = self.config.max_concurrent,
                remaining,
                wait_secs = self.config.poll_interval.as_secs(),
                "too many installations updating; waiting"
            );
            sleep_until_or_deadline(self.config.poll_interval, deadline).await;
        }
    }
}

async fn sleep_until_or_deadline(wait: Duration, deadline: Instant) {
    let wake = (Instant::now() + wait).min(deadline);
    tokio::time::sleep_until(wake).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Gauge with scripted readings; the last one repeats.
    struct ScriptedGauge {
        readings: Mutex<VecDeque<u64>>,
        checks: Mutex<Vec<Instant>>,
    }

    impl ScriptedGauge {
        fn new(readings: impl IntoIterator<Item = u64>) -> Self {
            Self {
                readings: Mutex::new(readings.into_iter().collect()),
                checks: Mutex::new(Vec::new()),
            }
        }

        fn checks(&self) -> usize {
            self.checks.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl AdmissionGauge for ScriptedGauge {
        async fn currently_updating(&self) -> ProvisionerResult<u64> {
            self.checks.lock().unwrap().push(Instant::now());
            let mut readings = self.readings.lock().unwrap();
            let value = if readings.len() > 1 {
                readings.pop_front()
            } else {
                readings.front().copied()
            };
            Ok(value.unwrap_or(0))
        }
    }

    /// Records the gauge check count seen by each execution.
    struct Recorder<'a> {
        gauge: &'a ScriptedGauge,
        seen: Vec<(u32, usize)>,
        skip: Vec<u32>,
    }

    #[async_trait]
    impl BatchStep<u32> for Recorder<'_> {
        async fn execute(&mut self, item: &u32) -> ReconcileResult<StepOutcome> {
            self.seen.push((*item, self.gauge.checks()));
            if self.skip.contains(item) {
                return Ok(StepOutcome::Skipped(SkipReason::NotFound));
            }
            Ok(StepOutcome::Applied)
        }
    }

    fn config(batch_size: usize) -> BatchConfig {
        BatchConfig {
            max_concurrent: 5,
            batch_size,
            call_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(15),
            deadline: Duration::from_secs(60),
        }
    }

    #[test]
    fn rejects_zero_batch_size() {
        assert!(matches!(
            BatchLoop::new(config(0)),
            Err(ReconcileError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn processes_items_in_order_in_batches() {
        let gauge = ScriptedGauge::new([0]);
        let mut step = Recorder {
            gauge: &gauge,
            seen: Vec::new(),
            skip: Vec::new(),
        };
        let items: Vec<u32> = (1..=7).collect();

        let applied = BatchLoop::new(config(3))
            .unwrap()
            .run(&items, &gauge, &mut step)
            .await
            .unwrap();

        assert_eq!(applied, 7);
        let order: Vec<u32> = step.seen.iter().map(|(item, _)| *item).collect();
        assert_eq!(order, items);
        // Three admission checks: before items 1, 4 and 7.
        assert_eq!(gauge.checks(), 3);
        for (item, checks) in &step.seen {
            assert_eq!(*checks, ((*item as usize) - 1) / 3 + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_batch_size_between_checks() {
        let gauge = ScriptedGauge::new([0]);
        let mut step = Recorder {
            gauge: &gauge,
            seen: Vec::new(),
            skip: Vec::new(),
        };
        let items: Vec<u32> = (0..10).collect();
        // Four poll waits between five batches fit inside the deadline.
        let config = BatchConfig {
            deadline: Duration::from_secs(5 * 60),
            ..config(2)
        };

        let applied = BatchLoop::new(config)
            .unwrap()
            .run(&items, &gauge, &mut step)
            .await
            .unwrap();

        assert_eq!(applied, 10);
        assert_eq!(gauge.checks(), 5);
        let mut per_check = std::collections::BTreeMap::new();
        for (_, checks) in &step.seen {
            *per_check.entry(*checks).or_insert(0) += 1;
        }
        assert_eq!(
            per_check.into_iter().collect::<Vec<_>>(),
            vec![(1, 2), (2, 2), (3, 2), (4, 2), (5, 2)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_items_are_not_revisited() {
        let gauge = ScriptedGauge::new([0]);
        let mut step = Recorder {
            gauge: &gauge,
            seen: Vec::new(),
            skip: vec![2, 3],
        };
        let items = vec![1, 2, 3, 4];

        let applied = BatchLoop::new(config(3))
            .unwrap()
            .run(&items, &gauge, &mut step)
            .await
            .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(step.seen.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_gauge_to_drop() {
        let gauge = ScriptedGauge::new([9, 7, 2]);
        let mut step = Recorder {
            gauge: &gauge,
            seen: Vec::new(),
            skip: Vec::new(),
        };
        let started = Instant::now();

        let applied = BatchLoop::new(config(3))
            .unwrap()
            .run(&[1u32], &gauge, &mut step)
            .await
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(gauge.checks(), 3);
        // Two poll waits before admission, then one call delay.
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(started.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_the_deadline() {
        let gauge = ScriptedGauge::new([10]);
        let mut step = Recorder {
            gauge: &gauge,
            seen: Vec::new(),
            skip: Vec::new(),
        };
        let started = Instant::now();

        let err = BatchLoop::new(config(3))
            .unwrap()
            .run(&[1u32, 2, 3, 4], &gauge, &mut step)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Timeout {
                remaining: 4,
                total: 4
            }
        ));
        assert!(step.seen.is_empty());
        assert!(started.elapsed() <= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_unprocessed_remainder() {
        // Admits the first batch, then the gauge stays high.
        let gauge = ScriptedGauge::new([0, 10]);
        let mut step = Recorder {
            gauge: &gauge,
            seen: Vec::new(),
            skip: Vec::new(),
        };

        let err = BatchLoop::new(config(2))
            .unwrap()
            .run(&[1u32, 2, 3, 4, 5], &gauge, &mut step)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Timeout {
                remaining: 3,
                total: 5
            }
        ));
        assert_eq!(step.seen.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_makes_no_gauge_calls() {
        let gauge = ScriptedGauge::new([0]);
        let mut step = Recorder {
            gauge: &gauge,
            seen: Vec::new(),
            skip: Vec::new(),
        };

        let applied = BatchLoop::new(config(3))
            .unwrap()
            .run(&[] as &[u32], &gauge, &mut step)
            .await
            .unwrap();

        assert_eq!(applied, 0);
        assert_eq!(gauge.checks(), 0);
    }
}
