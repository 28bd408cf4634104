//! ringsync - synchronize a carbon storage node with its ring peers.
//!
//! Lists the local node and its peers, plans the metrics the local node
//! should hold, and pulls them with rsync in batches. The exit code reflects
//! the run status: 0 success, 1 partial failure, 2 all failed, 3 aborted,
//! 130 interrupted.

use anyhow::{Context, Result};
use ringsync::cli::CliArgs;
use ringsync::inventory::{FsMetricLister, MetricInventory};
use ringsync::metrics::SyncMetrics;
use ringsync::remote::{RsyncTransfer, SshMetricLister};
use ringsync::sync::{RunCoordinator, RunStatus, SyncExecutor};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("ringsync=error")
    } else if verbose {
        EnvFilter::new("ringsync=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ringsync=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(args: CliArgs) -> Result<RunStatus> {
    let config = args.to_config().context("Configuration error")?;
    let metrics = Arc::new(SyncMetrics::new());
    let local_node = config.local_node()?;

    let source_cluster = config.remote_cluster().unwrap_or(config.local_cluster());
    info!(
        node = %local_node,
        cluster = %config.local_cluster().name,
        remote_cluster = %source_cluster.name,
        "Starting synchronization"
    );

    let inventory = MetricInventory::new(
        local_node,
        Arc::new(FsMetricLister::new(config.storage_dir())),
        Arc::new(SshMetricLister::new(
            config.storage_dir(),
            config.ssh_options().to_vec(),
        )),
        config.exclusion_filter()?,
    )
    .with_list_timeout(config.list_timeout())
    .with_max_parallel(config.max_parallel())
    .with_metrics(metrics.clone());

    let mut rsync = RsyncTransfer::new(config.storage_dir(), config.ssh_options().to_vec());
    if let Some(dir) = &args.temp_dir {
        rsync = rsync.with_temp_dir(dir);
    }
    let executor = SyncExecutor::new(Arc::new(rsync))
        .with_options(config.rsync_options().to_vec())
        .with_transfer_timeout(config.transfer_timeout())
        .with_max_parallel(config.max_parallel())
        .with_metrics(metrics.clone());

    let coordinator =
        RunCoordinator::new(&config, inventory, executor)?.with_metrics(metrics.clone());

    if args.dry_run {
        let plan = coordinator.plan().await?;
        for item in plan.items() {
            println!(
                "{} {} -> {}{}",
                item.metric,
                item.source,
                item.destination,
                if item.overwrite { " (overwrite)" } else { "" }
            );
        }
        info!(
            items = plan.item_count(),
            batches = plan.batches.len(),
            "Dry run, nothing copied"
        );
        return Ok(RunStatus::Success);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, waiting for running transfers");
            on_signal.cancel();
        }
    });

    let result = coordinator.run(cancel).await?;
    let snapshot = metrics.snapshot();
    debug!(
        success_rate = snapshot.batch_success_rate(),
        metrics = ?snapshot,
        "Run metrics"
    );

    if let Some(path) = &args.report_json {
        let written = serde_json::to_vec_pretty(&result)
            .context("Failed to serialize report")
            .and_then(|json| {
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))
            });
        if let Err(e) = written {
            error!("{:#}", e);
        }
    }
    if let Some(path) = &args.metrics_file {
        if let Err(e) = std::fs::write(path, metrics.to_prometheus()) {
            error!(path = %path.display(), error = %e, "Failed to write metrics");
        }
    }

    Ok(result.status)
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse_args();
    setup_logging(args.verbose, args.quiet);

    let code = match run(args).await {
        Ok(status) => status.exit_code(),
        Err(e) => {
            error!("Error: {:#}", e);
            RunStatus::Aborted.exit_code()
        }
    };
    std::process::exit(code);
}
