//! Command-line surface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use fleet_core::{InstallationFilter, LifecycleState, parse_duration};
use fleet_rollout::BatchConfig;

#[derive(Parser, Debug)]
#[command(
    name = "fleet-controller",
    about = "Reconciles installation size and lifecycle on a provisioning platform",
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Emit JSON logs.
    #[arg(long, global = true, env = "FC_PRODUCTION_LOGS")]
    pub production_logs: bool,

    /// Incoming webhook URL for run reports and error messages.
    #[arg(long = "webhook-url", global = true, env = "FC_MM_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// TOML file with connection settings.
    #[arg(long, global = true, env = "FC_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resize stable installations to match their active-user count.
    Scale {
        #[command(flatten)]
        pass: PassArgs,
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        metrics: MetricsArgs,
    },
    /// Hibernate stable installations with no recent activity.
    Hibernate {
        #[command(flatten)]
        pass: PassArgs,
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        metrics: MetricsArgs,
        #[command(flatten)]
        policy: HibernateArgs,
    },
    /// Wake up hibernating installations.
    WakeUp {
        #[command(flatten)]
        pass: PassArgs,
        #[command(flatten)]
        select: SelectArgs,
    },
    /// Delete hibernating installations listed in a file. The file is the
    /// only selector; owner and group filters are not accepted.
    Delete {
        #[command(flatten)]
        pass: PassArgs,
        /// File with one installation ID per line.
        #[arg(long, default_value = "installations.txt")]
        file: PathBuf,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scale { .. } => "scale",
            Self::Hibernate { .. } => "hibernate",
            Self::WakeUp { .. } => "wake-up",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Options shared by every reconciliation command.
#[derive(Args, Debug, Clone)]
pub struct PassArgs {
    /// The provisioning server whose API will be queried.
    #[arg(long)]
    pub server: Option<String>,

    /// Compute and report actions without performing them.
    #[arg(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub dry_run: bool,

    /// Unlock locked installations for the mutation, then relock them.
    #[arg(long)]
    pub unlock: bool,

    /// Wait while at least this many installations are updating.
    #[arg(long, default_value_t = 5)]
    pub max_updating: u64,

    /// Actions attempted between two checks of the updating count.
    #[arg(long, default_value_t = 3)]
    pub batch_size: usize,

    /// Pause after each mutating call.
    #[arg(long, default_value = "500ms", value_parser = parse_duration)]
    pub call_delay: Duration,

    /// Wait between checks of the updating count.
    #[arg(long, default_value = "15s", value_parser = parse_duration)]
    pub poll_interval: Duration,

    /// Give up on remaining actions after this long.
    #[arg(long, default_value = "3h", value_parser = parse_duration)]
    pub deadline: Duration,
}

impl PassArgs {
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_concurrent: self.max_updating,
            batch_size: self.batch_size,
            call_delay: self.call_delay,
            poll_interval: self.poll_interval,
            deadline: self.deadline,
        }
    }
}

/// Which listed installations a command considers, and in what order.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// Only consider installations with this owner ID.
    #[arg(long)]
    pub owner: Option<String>,

    /// Only consider installations in this group ID.
    #[arg(long)]
    pub group: Option<String>,

    /// Randomize candidate order once before planning.
    #[arg(long)]
    pub shuffle: bool,
}

impl SelectArgs {
    pub fn filter(&self, state: LifecycleState) -> InstallationFilter {
        InstallationFilter::in_state(state)
            .with_owner(self.owner.clone())
            .with_group(self.group.clone())
    }
}

#[derive(Args, Debug, Clone)]
pub struct MetricsArgs {
    /// Prometheus-compatible query endpoint (Thanos Query works).
    #[arg(long = "metrics-url", visible_alias = "thanos-url")]
    pub metrics_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct HibernateArgs {
    /// Days back to look for new content.
    #[arg(long, default_value_t = 7)]
    pub days: u32,

    /// Installations with at least this many users are never hibernated.
    #[arg(long, default_value_t = 100)]
    pub max_users: i64,

    /// Installations younger than this are never hibernated.
    #[arg(long, default_value = "7d", value_parser = parse_duration)]
    pub min_age: Duration,
}
