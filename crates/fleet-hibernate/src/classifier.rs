//! Hibernation eligibility classifier.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use fleet_core::{Installation, LifecycleState, SkipReason};
use fleet_metrics::{MetricsProvider, UserSnapshot};

/// Knobs for the eligibility rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HibernationPolicy {
    pub allow_unlock: bool,
    /// Trailing window checked for new content.
    pub inactivity_days: u32,
    /// Installations with at least this many active users are never
    /// hibernated automatically.
    pub max_exempt_users: i64,
    /// Installations younger than this are left alone.
    pub min_age: Duration,
}

impl Default for HibernationPolicy {
    fn default() -> Self {
        Self {
            allow_unlock: false,
            inactivity_days: 7,
            max_exempt_users: 100,
            min_age: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

/// Outcome of classifying one installation.
#[derive(Debug, Clone, PartialEq)]
pub enum HibernationVerdict {
    Eligible,
    /// Inactive, but spared by policy. Carries the exemption reason.
    ExemptEligible(SkipReason),
    NotEligible(SkipReason),
    /// Could not be judged safely.
    Error(SkipReason),
}

impl HibernationVerdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Decide whether `installation` should be hibernated.
///
/// `users` is the pass's active-user snapshot; `metrics` answers the
/// per-installation new-content query. Query failures and missing data
/// never lead to hibernation.
pub async fn classify(
    installation: &Installation,
    users: &UserSnapshot,
    metrics: &dyn MetricsProvider,
    policy: &HibernationPolicy,
    now: DateTime<Utc>,
) -> HibernationVerdict {
    use HibernationVerdict::*;

    if installation.is_locked() && !policy.allow_unlock {
        return Error(SkipReason::Locked);
    }
    if installation.state != LifecycleState::Stable {
        return Error(SkipReason::UnexpectedState {
            expected: LifecycleState::Stable,
            actual: installation.state,
        });
    }
    if created_too_recently(installation, policy.min_age, now) {
        return NotEligible(SkipReason::TooRecentlyCreated);
    }

    match metrics
        .new_content_count(&installation.id, policy.inactivity_days)
        .await
    {
        Err(e) => return Error(SkipReason::MetricsUnavailable(e.to_string())),
        Ok(None) => {
            return Error(SkipReason::MetricsUnavailable(
                "no new content data".to_string(),
            ));
        }
        Ok(Some(count)) if count != 0.0 => {
            return NotEligible(SkipReason::Active { new_content: count });
        }
        Ok(Some(_)) => {}
    }

    match users.get(&installation.id) {
        None => Error(SkipReason::NoUserMetrics),
        Some(0) => Error(SkipReason::ZeroUserCount),
        Some(count) if count >= policy.max_exempt_users => {
            ExemptEligible(SkipReason::PopulationExempt {
                users: count,
                threshold: policy.max_exempt_users,
            })
        }
        Some(_) => Eligible,
    }
}

fn created_too_recently(
    installation: &Installation,
    min_age: Duration,
    now: DateTime<Utc>,
) -> bool {
    let cutoff = TimeDelta::from_std(min_age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age));
    match (installation.created_at(), cutoff) {
        (Some(created), Some(cutoff)) => created > cutoff,
        // An unrepresentable age or timestamp is never old enough.
        _ => true,
    }
}
