//! Domain types shared by every reconciliation command.
//!
//! `Installation` mirrors the provisioning platform's JSON representation;
//! the controller only ever holds a read-only snapshot of it per pass.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque installation identifier assigned by the provisioning platform.
pub type InstallationId = String;

// ── Installation ──────────────────────────────────────────────────

/// Lifecycle phase of an installation as reported by the platform.
///
/// The set is owned by the platform; the controller only tests membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    CreationRequested,
    CreationInProgress,
    Stable,
    UpdateRequested,
    UpdateInProgress,
    HibernationRequested,
    HibernationInProgress,
    Hibernating,
    WakeUpRequested,
    DeletionRequested,
    DeletionInProgress,
    Deleted,
    #[serde(other)]
    Unknown,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreationRequested => "creation-requested",
            Self::CreationInProgress => "creation-in-progress",
            Self::Stable => "stable",
            Self::UpdateRequested => "update-requested",
            Self::UpdateInProgress => "update-in-progress",
            Self::HibernationRequested => "hibernation-requested",
            Self::HibernationInProgress => "hibernation-in-progress",
            Self::Hibernating => "hibernating",
            Self::WakeUpRequested => "wake-up-requested",
            Self::DeletionRequested => "deletion-requested",
            Self::DeletionInProgress => "deletion-in-progress",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a single installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    #[serde(rename = "ID")]
    pub id: InstallationId,
    #[serde(rename = "OwnerID", default)]
    pub owner_id: String,
    #[serde(rename = "GroupID", default)]
    pub group_id: Option<String>,
    #[serde(rename = "State")]
    pub state: LifecycleState,
    /// Size tier name, e.g. `cloud10users` or `1000users`.
    #[serde(rename = "Size")]
    pub size: String,
    /// When set, the platform rejects mutating calls until unlocked.
    #[serde(rename = "APISecurityLock", default)]
    pub api_security_lock: bool,
    /// Creation time in milliseconds since the Unix epoch. `None` when
    /// the platform did not report one.
    #[serde(rename = "CreateAt", default, skip_serializing_if = "Option::is_none")]
    pub create_at: Option<i64>,
}

impl Installation {
    /// Creation timestamp, if the platform reported a valid one. A zero
    /// or negative value is an unset field, not the epoch.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.create_at
            .filter(|&millis| millis > 0)
            .and_then(DateTime::from_timestamp_millis)
    }

    pub fn is_locked(&self) -> bool {
        self.api_security_lock
    }
}

/// Filter applied when listing installations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallationFilter {
    pub state: Option<LifecycleState>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl InstallationFilter {
    pub fn in_state(state: LifecycleState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, owner: Option<String>) -> Self {
        self.owner = owner.filter(|o| !o.is_empty());
        self
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group.filter(|g| !g.is_empty());
        self
    }

    /// Whether an installation passes this filter.
    pub fn matches(&self, installation: &Installation) -> bool {
        if let Some(state) = self.state
            && installation.state != state
        {
            return false;
        }
        if let Some(owner) = &self.owner
            && &installation.owner_id != owner
        {
            return false;
        }
        if let Some(group) = &self.group
            && installation.group_id.as_ref() != Some(group)
        {
            return false;
        }
        true
    }
}

// ── Actions ───────────────────────────────────────────────────────

/// The mutation a reconciliation command wants to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Scale { from: String, to: String },
    Hibernate,
    WakeUp,
    Delete,
}

impl ActionKind {
    /// Lifecycle state the installation must still be in right before
    /// the mutation is issued.
    pub fn required_state(&self) -> LifecycleState {
        match self {
            Self::Scale { .. } | Self::Hibernate => LifecycleState::Stable,
            Self::WakeUp | Self::Delete => LifecycleState::Hibernating,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Scale { .. } => "scale",
            Self::Hibernate => "hibernate",
            Self::WakeUp => "wake-up",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scale { from, to } => write!(f, "scale {from} -> {to}"),
            other => f.write_str(other.name()),
        }
    }
}

/// An approved action for one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationAction {
    pub installation_id: InstallationId,
    pub kind: ActionKind,
    /// Human-readable justification, used for audit logs only.
    pub reason: String,
}

impl ReconciliationAction {
    pub fn new(installation_id: &str, kind: ActionKind, reason: impl Into<String>) -> Self {
        Self {
            installation_id: installation_id.to_string(),
            kind,
            reason: reason.into(),
        }
    }
}

// ── Skips ─────────────────────────────────────────────────────────

/// Why a candidate was not acted on.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The platform no longer knows the installation.
    NotFound,
    UnexpectedState {
        expected: LifecycleState,
        actual: LifecycleState,
    },
    TooRecentlyCreated,
    /// Locked and the run has no unlock permission.
    Locked,
    /// New content was produced inside the inactivity window.
    Active { new_content: f64 },
    MetricsUnavailable(String),
    NoUserMetrics,
    /// A zero count is treated as bad data, never as inactivity.
    ZeroUserCount,
    UnknownSize(String),
    /// Meets the inactivity bar but is large enough to be spared.
    PopulationExempt { users: i64, threshold: i64 },
}

/// Reporting bucket for a skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCategory {
    NotEligible,
    Locked,
    MetricsUnavailable,
    PopulationExempt,
}

impl SkipReason {
    pub fn category(&self) -> SkipCategory {
        match self {
            Self::NotFound
            | Self::UnexpectedState { .. }
            | Self::TooRecentlyCreated
            | Self::Active { .. }
            | Self::UnknownSize(_) => SkipCategory::NotEligible,
            Self::Locked => SkipCategory::Locked,
            Self::MetricsUnavailable(_) | Self::NoUserMetrics | Self::ZeroUserCount => {
                SkipCategory::MetricsUnavailable
            }
            Self::PopulationExempt { .. } => SkipCategory::PopulationExempt,
        }
    }

    /// Whether the skip reflects a problem worth surfacing in reports,
    /// as opposed to an installation that simply needs nothing.
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            Self::Active { .. } | Self::TooRecentlyCreated | Self::PopulationExempt { .. }
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("installation not found"),
            Self::UnexpectedState { expected, actual } => {
                write!(f, "expected only {expected} installations ({actual})")
            }
            Self::TooRecentlyCreated => f.write_str("too recently created"),
            Self::Locked => f.write_str("locked, unlock not permitted"),
            Self::Active { new_content } => write!(f, "active ({new_content} new posts)"),
            Self::MetricsUnavailable(detail) => write!(f, "metrics unavailable: {detail}"),
            Self::NoUserMetrics => f.write_str("no user metrics"),
            Self::ZeroUserCount => f.write_str("zero user count"),
            Self::UnknownSize(size) => write!(f, "no scale values found for size {size}"),
            Self::PopulationExempt { users, threshold } => write!(
                f,
                "exempt due to population ({users} users, threshold {threshold})"
            ),
        }
    }
}

// ── Run summary ───────────────────────────────────────────────────

/// Skip counts partitioned by reporting bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub not_eligible: usize,
    pub locked: usize,
    pub metrics_unavailable: usize,
    pub population_exempt: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.not_eligible + self.locked + self.metrics_unavailable + self.population_exempt
    }
}

/// Counts gathered during one reconciliation pass. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub considered: usize,
    pub approved: usize,
    pub completed: usize,
    pub skipped: SkipCounts,
    pub relock_failures: usize,
    /// One line per error-class skip or relock failure.
    pub errors: Vec<String>,
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Default::default()
        }
    }

    pub fn record_skip(&mut self, installation_id: &str, reason: &SkipReason) {
        match reason.category() {
            SkipCategory::NotEligible => self.skipped.not_eligible += 1,
            SkipCategory::Locked => self.skipped.locked += 1,
            SkipCategory::MetricsUnavailable => self.skipped.metrics_unavailable += 1,
            SkipCategory::PopulationExempt => self.skipped.population_exempt += 1,
        }
        if reason.is_error() {
            self.errors.push(format!("{installation_id}: {reason}"));
        }
    }

    pub fn record_relock_failure(&mut self, installation_id: &str, error: &dyn fmt::Display) {
        self.relock_failures += 1;
        self.errors
            .push(format!("{installation_id}: relock failed: {error}"));
    }
}
