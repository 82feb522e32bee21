//! fleet-controller — reconciles installation size and lifecycle on a
//! provisioning platform.
//!
//! Usage:
//!   fleet-controller scale --server http://localhost:8075 --metrics-url http://thanos:9090
//!   fleet-controller hibernate --days 7 --max-users 100 --dry-run=false
//!   fleet-controller wake-up --owner <owner-id>
//!   fleet-controller delete --file installations.txt --unlock

mod cli;
mod commands;
mod config;

use anyhow::Context;
use clap::Parser;
use tracing::{Instrument, error, info, info_span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use fleet_metrics::{PrometheusClient, PrometheusMetrics};
use fleet_notify::{Notifier, Payload, WebhookNotifier, render_error};
use fleet_provisioner::HttpProvisioner;

use crate::cli::{Cli, Command, MetricsArgs, PassArgs};
use crate::commands::RunContext;
use crate::config::{FleetConfig, WEBHOOK_TIMEOUT};

const DEFAULT_FILTER: &str = "info,fleet_controller=debug,fleet=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.production_logs);

    let run_id = Uuid::new_v4().to_string();
    let span = info_span!("command", command = cli.command.name(), run = %run_id);

    let config = FleetConfig::load(cli.global.config.as_deref());
    let flag_webhook = cli.global.webhook_url.as_deref();
    let webhook_url = match &config {
        Ok(config) => config.webhook_url(flag_webhook),
        Err(_) => flag_webhook,
    };
    let notifier = webhook_url
        .map(|url| WebhookNotifier::new(url, WEBHOOK_TIMEOUT))
        .transpose()
        .context("invalid webhook URL")?;
    let notifier_ref = notifier.as_ref().map(|n| n as &dyn Notifier);

    let result = match config {
        Ok(config) => {
            run(cli.command, &config, notifier_ref, &run_id)
                .instrument(span.clone())
                .await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        report_failure(notifier_ref, &run_id, e)
            .instrument(span)
            .await;
    }
    result
}

fn init_tracing(production: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if production {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(
    command: Command,
    config: &FleetConfig,
    notifier: Option<&dyn Notifier>,
    run_id: &str,
) -> anyhow::Result<()> {
    info!("fleet controller starting");

    match command {
        Command::Scale {
            pass,
            select,
            metrics,
        } => {
            let provisioner = connect_provisioner(config, &pass)?;
            let metrics = connect_metrics(config, &metrics)?;
            let ctx = RunContext {
                run_id,
                provisioner: &provisioner,
                notifier,
            };
            commands::scale(&ctx, &pass, &select, &metrics).await?;
        }
        Command::Hibernate {
            pass,
            select,
            metrics,
            policy,
        } => {
            let provisioner = connect_provisioner(config, &pass)?;
            let metrics = connect_metrics(config, &metrics)?;
            let ctx = RunContext {
                run_id,
                provisioner: &provisioner,
                notifier,
            };
            commands::hibernate(&ctx, &pass, &select, &metrics, &policy).await?;
        }
        Command::WakeUp { pass, select } => {
            let provisioner = connect_provisioner(config, &pass)?;
            let ctx = RunContext {
                run_id,
                provisioner: &provisioner,
                notifier,
            };
            commands::wake_up(&ctx, &pass, &select).await?;
        }
        Command::Delete { pass, file } => {
            let provisioner = connect_provisioner(config, &pass)?;
            let ids = commands::read_installation_ids(&file)?;
            info!(count = ids.len(), file = %file.display(), "read installation IDs");
            let ctx = RunContext {
                run_id,
                provisioner: &provisioner,
                notifier,
            };
            commands::delete(&ctx, &pass, &ids, &file.display().to_string()).await?;
        }
    }

    info!("fleet controller finished");
    Ok(())
}

fn connect_provisioner(config: &FleetConfig, pass: &PassArgs) -> anyhow::Result<HttpProvisioner> {
    let endpoint = config.provisioner_settings(pass.server.as_deref())?;
    info!(server = %endpoint.url, "using provisioning server");
    HttpProvisioner::new(&endpoint.url, endpoint.timeout).context("invalid server address")
}

fn connect_metrics(config: &FleetConfig, args: &MetricsArgs) -> anyhow::Result<PrometheusMetrics> {
    let endpoint = config.metrics_settings(args.metrics_url.as_deref())?;
    info!(url = %endpoint.url, "using metrics backend");
    let client =
        PrometheusClient::new(&endpoint.url, endpoint.timeout).context("invalid metrics URL")?;
    Ok(PrometheusMetrics::new(client))
}

async fn report_failure(notifier: Option<&dyn Notifier>, run_id: &str, err: &anyhow::Error) {
    let message = format!("{err:#}");
    error!(error = %message, "fleet controller failed");

    let Some(notifier) = notifier else {
        return;
    };
    let payload = Payload::new(render_error(run_id, &message));
    if let Err(e) = notifier.send(&payload).await {
        error!(error = %e, "failed to send error notification");
    }
}
