//! Hibernate, wake-up and delete planners.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use fleet_core::{ActionKind, Installation, LifecycleState, ReconciliationAction, SkipReason};
use fleet_metrics::{MetricsProvider, MetricsResult, UserSnapshot};
use fleet_rollout::{Plan, ReconcileResult, Reconciler, lock_gate};

use crate::classifier::{HibernationPolicy, HibernationVerdict, classify};

/// Pause before each per-installation metrics query.
const QUERY_DELAY: Duration = Duration::from_millis(100);

/// Proposes hibernation for inactive stable installations.
pub struct HibernatePlanner<'m> {
    metrics: Paced<'m>,
    users: UserSnapshot,
    policy: HibernationPolicy,
    now: DateTime<Utc>,
}

impl<'m> HibernatePlanner<'m> {
    pub fn new(
        metrics: &'m dyn MetricsProvider,
        users: UserSnapshot,
        policy: HibernationPolicy,
    ) -> Self {
        Self {
            metrics: Paced {
                inner: metrics,
                delay: QUERY_DELAY,
            },
            users,
            policy,
            now: Utc::now(),
        }
    }

    /// Take the active-user snapshot for this pass. A metrics failure
    /// aborts the pass.
    pub async fn prepare(
        metrics: &'m dyn MetricsProvider,
        policy: HibernationPolicy,
    ) -> ReconcileResult<Self> {
        info!("gathering installation user metrics");
        let users = metrics.active_users().await?;
        info!(installations = users.len(), "obtained user metrics");
        Ok(Self::new(metrics, users, policy))
    }

    /// Evaluate creation age against `now` instead of the construction time.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.metrics.delay = delay;
        self
    }

    pub fn policy(&self) -> &HibernationPolicy {
        &self.policy
    }
}

#[async_trait]
impl Reconciler for HibernatePlanner<'_> {
    fn command(&self) -> &'static str {
        "hibernate"
    }

    fn allow_unlock(&self) -> bool {
        self.policy.allow_unlock
    }

    async fn plan(&self, installation: &Installation) -> ReconcileResult<Plan> {
        let verdict = classify(
            installation,
            &self.users,
            &self.metrics,
            &self.policy,
            self.now,
        )
        .await;

        Ok(match verdict {
            HibernationVerdict::Eligible => Plan::Act(ReconciliationAction::new(
                &installation.id,
                ActionKind::Hibernate,
                format!("no new content in {} days", self.policy.inactivity_days),
            )),
            HibernationVerdict::ExemptEligible(reason)
            | HibernationVerdict::NotEligible(reason)
            | HibernationVerdict::Error(reason) => Plan::Skip(reason),
        })
    }
}

/// Spaces out new-content queries so a large fleet does not hammer the
/// metrics backend.
struct Paced<'m> {
    inner: &'m dyn MetricsProvider,
    delay: Duration,
}

#[async_trait]
impl MetricsProvider for Paced<'_> {
    async fn active_users(&self) -> MetricsResult<UserSnapshot> {
        self.inner.active_users().await
    }

    async fn new_content_count(
        &self,
        installation_id: &str,
        window_days: u32,
    ) -> MetricsResult<Option<f64>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner
            .new_content_count(installation_id, window_days)
            .await
    }
}

/// Shared rule for commands acting on hibernating installations.
fn plan_for_hibernating(
    installation: &Installation,
    allow_unlock: bool,
    kind: ActionKind,
) -> Plan {
    if let Some(reason) = lock_gate(installation, allow_unlock) {
        return Plan::Skip(reason);
    }
    if installation.state != LifecycleState::Hibernating {
        return Plan::Skip(SkipReason::UnexpectedState {
            expected: LifecycleState::Hibernating,
            actual: installation.state,
        });
    }
    Plan::Act(ReconciliationAction::new(
        &installation.id,
        kind,
        "hibernating",
    ))
}

/// Wakes hibernating installations.
#[derive(Debug, Clone)]
pub struct WakeUpPlanner {
    allow_unlock: bool,
}

impl WakeUpPlanner {
    pub fn new(allow_unlock: bool) -> Self {
        Self { allow_unlock }
    }
}

#[async_trait]
impl Reconciler for WakeUpPlanner {
    fn command(&self) -> &'static str {
        "wake-up"
    }

    fn allow_unlock(&self) -> bool {
        self.allow_unlock
    }

    async fn plan(&self, installation: &Installation) -> ReconcileResult<Plan> {
        Ok(plan_for_hibernating(
            installation,
            self.allow_unlock,
            ActionKind::WakeUp,
        ))
    }
}

/// Deletes hibernating installations. Anything not hibernating is
/// considered in use and never deleted.
#[derive(Debug, Clone)]
pub struct DeletePlanner {
    allow_unlock: bool,
}

impl DeletePlanner {
    pub fn new(allow_unlock: bool) -> Self {
        Self { allow_unlock }
    }
}

#[async_trait]
impl Reconciler for DeletePlanner {
    fn command(&self) -> &'static str {
        "delete"
    }

    fn allow_unlock(&self) -> bool {
        self.allow_unlock
    }

    async fn plan(&self, installation: &Installation) -> ReconcileResult<Plan> {
        Ok(plan_for_hibernating(
            installation,
            self.allow_unlock,
            ActionKind::Delete,
        ))
    }
}
