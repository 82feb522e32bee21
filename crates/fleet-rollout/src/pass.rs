//! Plan-then-execute reconciliation pass.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleet_core::{
    ActionKind, Installation, InstallationFilter, ReconciliationAction, RunSummary, SkipReason,
};
use fleet_provisioner::{Provisioner, ProvisionerResult};

use crate::batch::{BatchConfig, BatchLoop, BatchStep, StepOutcome};
use crate::error::{GuardError, ReconcileResult};
use crate::guard::with_mutation;
use crate::reconciler::{Plan, Reconciler, lock_gate};

/// Progress is logged every this many planned candidates.
const PROGRESS_EVERY: usize = 10;

/// One entry of the candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Found(Installation),
    /// Requested by id but unknown to the platform.
    Missing(String),
}

impl Candidate {
    pub fn id(&self) -> &str {
        match self {
            Self::Found(installation) => &installation.id,
            Self::Missing(id) => id,
        }
    }
}

/// List candidates matching `filter`.
pub async fn list_candidates(
    provisioner: &dyn Provisioner,
    filter: &InstallationFilter,
) -> ProvisionerResult<Vec<Candidate>> {
    let installations = provisioner.list_installations(filter).await?;
    info!(
        count = installations.len(),
        state = ?filter.state,
        owner = ?filter.owner,
        group = ?filter.group,
        "obtained installations"
    );
    Ok(installations.into_iter().map(Candidate::Found).collect())
}

/// Fetch candidates by id, keeping ids the platform does not know.
pub async fn fetch_candidates(
    provisioner: &dyn Provisioner,
    ids: &[String],
) -> ProvisionerResult<Vec<Candidate>> {
    let mut candidates = Vec::with_capacity(ids.len());
    for id in ids {
        match provisioner.get_installation(id).await? {
            Some(installation) => candidates.push(Candidate::Found(installation)),
            None => {
                warn!(installation = %id, "installation not found");
                candidates.push(Candidate::Missing(id.clone()));
            }
        }
    }
    Ok(candidates)
}

/// Drives one reconciliation command from candidate list to summary.
pub struct ReconcilePass<'a> {
    provisioner: &'a dyn Provisioner,
    batch: BatchLoop,
    dry_run: bool,
    shuffle: bool,
}

impl<'a> ReconcilePass<'a> {
    /// Dry run by default.
    pub fn new(provisioner: &'a dyn Provisioner, config: BatchConfig) -> ReconcileResult<Self> {
        Ok(Self {
            provisioner,
            batch: BatchLoop::new(config)?,
            dry_run: true,
            shuffle: false,
        })
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    /// Plan every candidate, tallying `summary`. Returns approved actions
    /// in candidate order.
    pub async fn plan(
        &self,
        reconciler: &dyn Reconciler,
        candidates: &[Candidate],
        summary: &mut RunSummary,
    ) -> ReconcileResult<Vec<ReconciliationAction>> {
        let total = candidates.len();
        let mut actions = Vec::new();
        info!(command = reconciler.command(), total, "calculating actions");

        for (index, candidate) in candidates.iter().enumerate() {
            if (index + 1) % PROGRESS_EVERY == 0 {
                debug!(current = index + 1, total, "processing installation");
            }
            summary.considered += 1;

            let plan = match candidate {
                Candidate::Missing(_) => Plan::Skip(SkipReason::NotFound),
                Candidate::Found(installation) => reconciler.plan(installation).await?,
            };

            match plan {
                Plan::Act(action) => {
                    debug!(
                        installation = %action.installation_id,
                        action = %action.kind,
                        reason = %action.reason,
                        "action approved"
                    );
                    summary.approved += 1;
                    actions.push(action);
                }
                Plan::Skip(reason) => {
                    if reason.is_error() {
                        warn!(
                            installation = %candidate.id(),
                            reason = %reason,
                            "skipping installation"
                        );
                    } else {
                        info!(
                            installation = %candidate.id(),
                            reason = %reason,
                            "skipping installation"
                        );
                    }
                    summary.record_skip(candidate.id(), &reason);
                }
                Plan::Keep => {}
            }
        }

        info!(
            command = reconciler.command(),
            approved = summary.approved,
            skipped = summary.skipped.total(),
            not_eligible = summary.skipped.not_eligible,
            locked = summary.skipped.locked,
            metrics_unavailable = summary.skipped.metrics_unavailable,
            population_exempt = summary.skipped.population_exempt,
            "action calculations complete"
        );
        Ok(actions)
    }

    /// Run the full pass: optional shuffle, plan, then (unless dry run)
    /// execute through the batch loop and lock guard.
    pub async fn run(
        &self,
        reconciler: &dyn Reconciler,
        mut candidates: Vec<Candidate>,
    ) -> ReconcileResult<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.dry_run);

        if self.shuffle {
            candidates.shuffle(&mut rand::thread_rng());
        }

        let actions = self.plan(reconciler, &candidates, &mut summary).await?;

        if self.dry_run {
            for action in &actions {
                info!(
                    installation = %action.installation_id,
                    action = %action.kind,
                    reason = %action.reason,
                    "dry run: would apply"
                );
            }
            info!(approved = actions.len(), "dry run complete");
        } else if !actions.is_empty() {
            info!(count = actions.len(), "applying actions");
            let mut step = MutationStep {
                provisioner: self.provisioner,
                allow_unlock: reconciler.allow_unlock(),
                summary: &mut summary,
            };
            let applied = self.batch.run(&actions, self.provisioner, &mut step).await?;
            summary.completed = applied;
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }
}

/// Executes one approved action against a fresh fetch of its installation.
struct MutationStep<'s> {
    provisioner: &'s dyn Provisioner,
    allow_unlock: bool,
    summary: &'s mut RunSummary,
}

impl MutationStep<'_> {
    /// Re-check the fresh record before touching it.
    fn recheck(&self, kind: &ActionKind, fresh: Option<&Installation>) -> Option<SkipReason> {
        let Some(installation) = fresh else {
            return Some(SkipReason::NotFound);
        };
        let expected = kind.required_state();
        if installation.state != expected {
            return Some(SkipReason::UnexpectedState {
                expected,
                actual: installation.state,
            });
        }
        lock_gate(installation, self.allow_unlock)
    }
}

#[async_trait]
impl BatchStep<ReconciliationAction> for MutationStep<'_> {
    async fn execute(&mut self, action: &ReconciliationAction) -> ReconcileResult<StepOutcome> {
        let id = action.installation_id.as_str();
        let fresh = self.provisioner.get_installation(id).await?;

        if let Some(reason) = self.recheck(&action.kind, fresh.as_ref()) {
            warn!(installation = %id, reason = %reason, "skipping action after re-check");
            self.summary.record_skip(id, &reason);
            return Ok(StepOutcome::Skipped(reason));
        }
        let Some(installation) = fresh else {
            return Ok(StepOutcome::Skipped(SkipReason::NotFound));
        };

        info!(installation = %id, action = %action.kind, "applying action");
        let provisioner = self.provisioner;
        let result = with_mutation(
            provisioner,
            &installation,
            self.allow_unlock,
            move || async move {
                match &action.kind {
                    ActionKind::Scale { to, .. } => provisioner.update_size(id, to).await.map(drop),
                    ActionKind::Hibernate => provisioner.hibernate(id).await.map(drop),
                    ActionKind::WakeUp => provisioner.wake_up(id).await.map(drop),
                    ActionKind::Delete => provisioner.delete(id).await,
                }
            },
        )
        .await;

        match result {
            Ok(guarded) => {
                if let Some(relock) = guarded.relock_error {
                    self.summary.record_relock_failure(id, &relock);
                }
                Ok(StepOutcome::Applied)
            }
            Err(GuardError::Locked { .. }) => {
                self.summary.record_skip(id, &SkipReason::Locked);
                Ok(StepOutcome::Skipped(SkipReason::Locked))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::LifecycleState;
    use fleet_provisioner::{Call, InMemoryProvisioner};
    use std::time::Duration;

    fn installation(id: &str, state: LifecycleState) -> Installation {
        Installation {
            id: id.to_string(),
            owner_id: "owner".to_string(),
            group_id: None,
            state,
            size: "cloud10users".to_string(),
            api_security_lock: false,
            create_at: None,
        }
    }

    /// Wakes every hibernating candidate it sees.
    struct WakeAll;

    #[async_trait]
    impl Reconciler for WakeAll {
        fn command(&self) -> &'static str {
            "wake-up"
        }

        fn allow_unlock(&self) -> bool {
            false
        }

        async fn plan(&self, installation: &Installation) -> ReconcileResult<Plan> {
            if let Some(reason) = lock_gate(installation, false) {
                return Ok(Plan::Skip(reason));
            }
            Ok(Plan::Act(ReconciliationAction::new(
                &installation.id,
                ActionKind::WakeUp,
                "test",
            )))
        }
    }

    fn fast_config() -> BatchConfig {
        BatchConfig {
            call_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(10),
            ..BatchConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_plans_without_mutating() {
        let platform = InMemoryProvisioner::with_installations([
            installation("a", LifecycleState::Hibernating),
            installation("b", LifecycleState::Hibernating),
        ]);
        let candidates = list_candidates(
            &platform,
            &InstallationFilter::in_state(LifecycleState::Hibernating),
        )
        .await
        .unwrap();

        let summary = ReconcilePass::new(&platform, fast_config())
            .unwrap()
            .run(&WakeAll, candidates)
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.considered, 2);
        assert_eq!(summary.approved, 2);
        assert_eq!(summary.completed, 0);
        assert!(platform.calls().is_empty());
        assert_eq!(platform.status_queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn execution_rechecks_fresh_state() {
        let platform = InMemoryProvisioner::with_installations([
            installation("a", LifecycleState::Hibernating),
            installation("b", LifecycleState::Hibernating),
            installation("c", LifecycleState::Hibernating),
        ]);
        let candidates = list_candidates(&platform, &InstallationFilter::default())
            .await
            .unwrap();

        // Changed by another actor after the candidate list was built.
        platform.remove("b");
        platform.insert(installation("c", LifecycleState::WakeUpRequested));

        let summary = ReconcilePass::new(&platform, fast_config())
            .unwrap()
            .dry_run(false)
            .run(&WakeAll, candidates)
            .await
            .unwrap();

        assert_eq!(summary.approved, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped.not_eligible, 2);
        assert_eq!(platform.mutations(), vec![Call::WakeUp("a".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ids_are_recorded_as_skips() {
        let platform = InMemoryProvisioner::with_installations([installation(
            "a",
            LifecycleState::Hibernating,
        )]);
        let ids = vec!["a".to_string(), "ghost".to_string()];

        let candidates = fetch_candidates(&platform, &ids).await.unwrap();
        assert_eq!(candidates[1], Candidate::Missing("ghost".to_string()));

        let summary = ReconcilePass::new(&platform, fast_config())
            .unwrap()
            .dry_run(false)
            .run(&WakeAll, candidates)
            .await
            .unwrap();

        assert_eq!(summary.considered, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped.not_eligible, 1);
        assert_eq!(
            summary.errors,
            vec!["ghost: installation not found".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shuffle_keeps_every_candidate() {
        let platform = InMemoryProvisioner::with_installations(
            (0..20).map(|i| installation(&format!("i{i}"), LifecycleState::Hibernating)),
        );
        let candidates = list_candidates(&platform, &InstallationFilter::default())
            .await
            .unwrap();

        let summary = ReconcilePass::new(&platform, fast_config())
            .unwrap()
            .shuffle(true)
            .dry_run(false)
            .run(&WakeAll, candidates)
            .await
            .unwrap();

        assert_eq!(summary.completed, 20);
        let mut woken: Vec<Call> = platform.mutations();
        woken.sort_by_key(|c| format!("{c:?}"));
        woken.dedup();
        assert_eq!(woken.len(), 20);
    }
}
