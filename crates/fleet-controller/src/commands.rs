//! The four reconciliation commands.
//!
//! Each command builds its candidate list and planner, hands both to a
//! [`ReconcilePass`], then reports the summary. Clients are passed in so
//! the same code runs against the live platform and the in-memory fakes.

use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use tracing::{error, info};

use fleet_autoscale::{ScalePlanner, SizeLadder};
use fleet_core::{LifecycleState, RunSummary};
use fleet_hibernate::{DeletePlanner, HibernatePlanner, HibernationPolicy, WakeUpPlanner};
use fleet_metrics::MetricsProvider;
use fleet_notify::{Notifier, Payload, RunReport, wrap_inline_code};
use fleet_provisioner::Provisioner;
use fleet_rollout::{Candidate, ReconcilePass, Reconciler, fetch_candidates, list_candidates};

use crate::cli::{HibernateArgs, PassArgs, SelectArgs};

/// What every command needs besides its own options.
pub struct RunContext<'a> {
    pub run_id: &'a str,
    pub provisioner: &'a dyn Provisioner,
    pub notifier: Option<&'a dyn Notifier>,
}

pub async fn scale(
    ctx: &RunContext<'_>,
    pass: &PassArgs,
    select: &SelectArgs,
    metrics: &dyn MetricsProvider,
) -> anyhow::Result<RunSummary> {
    let started = Instant::now();
    let runner = runner(ctx, pass)?.shuffle(select.shuffle);

    let candidates = list_candidates(ctx.provisioner, &select.filter(LifecycleState::Stable))
        .await
        .context("failed to get installations")?;
    let planner = ScalePlanner::prepare(metrics, SizeLadder::standard(), pass.unlock)
        .await
        .context("failed to get user metrics")?;

    let summary = execute(&runner, &planner, candidates).await?;
    let filters = owner_filters(select);
    deliver(ctx, "Scale Report", started, filters, &summary).await;
    Ok(summary)
}

pub async fn hibernate(
    ctx: &RunContext<'_>,
    pass: &PassArgs,
    select: &SelectArgs,
    metrics: &dyn MetricsProvider,
    args: &HibernateArgs,
) -> anyhow::Result<RunSummary> {
    let started = Instant::now();
    let runner = runner(ctx, pass)?.shuffle(select.shuffle);

    let candidates = list_candidates(ctx.provisioner, &select.filter(LifecycleState::Stable))
        .await
        .context("failed to get installations")?;
    let policy = HibernationPolicy {
        allow_unlock: pass.unlock,
        inactivity_days: args.days,
        max_exempt_users: args.max_users,
        min_age: args.min_age,
    };
    let planner = HibernatePlanner::prepare(metrics, policy)
        .await
        .context("failed to get user metrics")?;

    let summary = execute(&runner, &planner, candidates).await?;

    let mut filters = vec![
        ("Days Without New Content", args.days.to_string()),
        ("Exempt At Users", args.max_users.to_string()),
        ("Minimum Age", format!("{:?}", args.min_age)),
    ];
    filters.extend(owner_filters(select));
    deliver(ctx, "Hibernation Report", started, filters, &summary).await;
    Ok(summary)
}

pub async fn wake_up(
    ctx: &RunContext<'_>,
    pass: &PassArgs,
    select: &SelectArgs,
) -> anyhow::Result<RunSummary> {
    let started = Instant::now();
    let runner = runner(ctx, pass)?.shuffle(select.shuffle);

    let filter = select.filter(LifecycleState::Hibernating);
    let candidates = list_candidates(ctx.provisioner, &filter)
        .await
        .context("failed to get installations")?;
    let summary = execute(&runner, &WakeUpPlanner::new(pass.unlock), candidates).await?;

    let filters = owner_filters(select);
    deliver(ctx, "Wake Up Report", started, filters, &summary).await;
    Ok(summary)
}

/// Delete the hibernating installations among `ids`, in file order.
/// `source` names where the ids came from in the report.
pub async fn delete(
    ctx: &RunContext<'_>,
    pass: &PassArgs,
    ids: &[String],
    source: &str,
) -> anyhow::Result<RunSummary> {
    let started = Instant::now();
    let runner = runner(ctx, pass)?;

    let candidates = fetch_candidates(ctx.provisioner, ids)
        .await
        .context("failed to get installations")?;
    let summary = execute(&runner, &DeletePlanner::new(pass.unlock), candidates).await?;

    let filters = vec![("Installation File", wrap_inline_code(source))];
    deliver(ctx, "Deletion Report", started, filters, &summary).await;
    Ok(summary)
}

/// One installation id per line. Surrounding whitespace and blank lines
/// are ignored.
pub fn read_installation_ids(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read installation IDs from {}", path.display()))?;
    Ok(parse_installation_ids(&content))
}

fn parse_installation_ids(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builds the pass up front so invalid loop settings fail before any
/// platform call.
fn runner<'a>(ctx: &RunContext<'a>, pass: &PassArgs) -> anyhow::Result<ReconcilePass<'a>> {
    Ok(ReconcilePass::new(ctx.provisioner, pass.batch_config())?.dry_run(pass.dry_run))
}

async fn execute(
    runner: &ReconcilePass<'_>,
    reconciler: &dyn Reconciler,
    candidates: Vec<Candidate>,
) -> anyhow::Result<RunSummary> {
    let summary = runner
        .run(reconciler, candidates)
        .await
        .with_context(|| format!("{} pass failed", reconciler.command()))?;

    info!(
        command = reconciler.command(),
        considered = summary.considered,
        approved = summary.approved,
        completed = summary.completed,
        skipped = summary.skipped.total(),
        relock_failures = summary.relock_failures,
        dry_run = summary.dry_run,
        elapsed = ?summary.elapsed,
        "pass complete"
    );
    Ok(summary)
}

fn owner_filters(select: &SelectArgs) -> Vec<(&'static str, String)> {
    let mut filters = Vec::new();
    if let Some(owner) = &select.owner {
        filters.push(("Owner ID", wrap_inline_code(owner)));
    }
    if let Some(group) = &select.group {
        filters.push(("Group ID", wrap_inline_code(group)));
    }
    filters
}

/// Send the run report. Delivery problems are logged, never fatal.
async fn deliver(
    ctx: &RunContext<'_>,
    title: &str,
    started: Instant,
    filters: Vec<(&str, String)>,
    summary: &RunSummary,
) {
    let Some(notifier) = ctx.notifier else {
        return;
    };
    let text = RunReport {
        title,
        run_id: ctx.run_id,
        runtime: started.elapsed(),
        filters,
        summary,
    }
    .render();

    if let Err(e) = notifier.send(&Payload::new(text)).await {
        error!(error = %e, "failed to send run report");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fleet_core::Installation;
    use fleet_metrics::{StaticMetrics, UserSnapshot};
    use fleet_notify::MemoryNotifier;
    use fleet_provisioner::{Call, InMemoryProvisioner, Operation};

    use super::*;

    fn installation(id: &str, state: LifecycleState, size: &str) -> Installation {
        Installation {
            id: id.to_string(),
            owner_id: "owner1".to_string(),
            group_id: None,
            state,
            size: size.to_string(),
            api_security_lock: false,
            create_at: Some(1_600_000_000_000),
        }
    }

    fn pass_args(dry_run: bool) -> PassArgs {
        PassArgs {
            server: None,
            dry_run,
            unlock: false,
            max_updating: 5,
            batch_size: 3,
            call_delay: Duration::from_millis(500),
            poll_interval: Duration::from_secs(15),
            deadline: Duration::from_secs(3 * 3600),
        }
    }

    fn hibernate_args() -> HibernateArgs {
        HibernateArgs {
            days: 7,
            max_users: 100,
            min_age: Duration::from_secs(7 * 86400),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scale_resizes_and_reports() {
        let provisioner = InMemoryProvisioner::with_installations([
            installation("small", LifecycleState::Stable, "cloud10users"),
            installation("steady", LifecycleState::Stable, "cloud100users"),
            installation("asleep", LifecycleState::Hibernating, "cloud10users"),
        ]);
        let metrics = StaticMetrics::with_users(
            [("small", 40), ("steady", 40), ("asleep", 900)]
                .into_iter()
                .collect::<UserSnapshot>(),
        );
        let notifier = MemoryNotifier::new();
        let ctx = RunContext {
            run_id: "run-1",
            provisioner: &provisioner,
            notifier: Some(&notifier),
        };

        let summary = scale(&ctx, &pass_args(false), &SelectArgs::default(), &metrics)
            .await
            .unwrap();

        assert_eq!(summary.considered, 2);
        assert_eq!(summary.approved, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(
            provisioner.mutations(),
            vec![Call::UpdateSize("small".to_string(), "cloud100users".to_string())]
        );

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.starts_with("### Scale Report"));
        assert!(sent[0].text.contains("| Actions Applied | 1 |"));
    }

    #[tokio::test(start_paused = true)]
    async fn hibernate_dry_run_never_mutates() {
        let provisioner = InMemoryProvisioner::with_installations([installation(
            "idle",
            LifecycleState::Stable,
            "cloud10users",
        )]);
        let metrics = StaticMetrics::with_users([("idle", 3)].into_iter().collect());
        metrics.set_default_new_content(Some(0.0));
        let ctx = RunContext {
            run_id: "run-2",
            provisioner: &provisioner,
            notifier: None,
        };

        let select = SelectArgs::default();
        let summary = hibernate(&ctx, &pass_args(true), &select, &metrics, &hibernate_args())
            .await
            .unwrap();

        assert!(summary.dry_run);
        assert_eq!(summary.approved, 1);
        assert_eq!(summary.completed, 0);
        assert!(provisioner.mutations().is_empty());
    }

    #[tokio::test]
    async fn user_metrics_failure_aborts_before_mutations() {
        let provisioner = InMemoryProvisioner::with_installations([installation(
            "idle",
            LifecycleState::Stable,
            "cloud10users",
        )]);
        let metrics = StaticMetrics::new();
        metrics.fail_users("thanos unreachable");
        let ctx = RunContext {
            run_id: "run-3",
            provisioner: &provisioner,
            notifier: None,
        };

        let err = scale(&ctx, &pass_args(false), &SelectArgs::default(), &metrics)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to get user metrics"));
        assert!(provisioner.mutations().is_empty());
    }

    #[tokio::test]
    async fn zero_batch_size_fails_before_platform_calls() {
        let provisioner = InMemoryProvisioner::new();
        provisioner.fail_on(Operation::List, "should not be called");
        let ctx = RunContext {
            run_id: "run-4",
            provisioner: &provisioner,
            notifier: None,
        };
        let mut pass = pass_args(false);
        pass.batch_size = 0;

        let err = wake_up(&ctx, &pass, &SelectArgs::default())
            .await
            .unwrap_err();
        assert!(!format!("{err:#}").contains("should not be called"));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_only_touches_hibernating_listed_ids() {
        let provisioner = InMemoryProvisioner::with_installations([
            installation("old", LifecycleState::Hibernating, "cloud10users"),
            installation("busy", LifecycleState::Stable, "cloud10users"),
        ]);
        let notifier = MemoryNotifier::new();
        let ctx = RunContext {
            run_id: "run-5",
            provisioner: &provisioner,
            notifier: Some(&notifier),
        };
        let ids = parse_installation_ids("old\n\n  busy \nghost\n");

        let summary = delete(&ctx, &pass_args(false), &ids, "installations.txt")
            .await
            .unwrap();

        assert_eq!(summary.considered, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped.not_eligible, 2);
        assert_eq!(
            provisioner.mutations(),
            vec![Call::Delete("old".to_string())]
        );
        assert!(notifier.sent()[0].text.contains("Installation File: `installations.txt`"));
    }

    #[test]
    fn parses_id_file_lines() {
        assert_eq!(
            parse_installation_ids("a\r\n\n b \n\t\nc"),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_installation_ids("\n\n").is_empty());
    }

    #[test]
    fn missing_id_file_is_an_error() {
        assert!(read_installation_ids(Path::new("/nonexistent/installations.txt")).is_err());
    }
}
