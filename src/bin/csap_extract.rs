//! `csap-extract`: the Dispatcher/CLI front end. Probes the given nodes,
//! dispatches one table across them, prints progress, and assembles the
//! kept payload (if requested) once the table completes.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use csap_extract::config::{ExtractArgs, ExtractConfig};
use csap_extract::dispatcher::Dispatcher;
use csap_extract::planner::TableRequest;
use csap_extract::{aggregator, progress, registry};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = ExtractArgs::parse();
    let config: ExtractConfig = args.try_into().context("parsing --cnxn-details as JSON")?;

    let healthy = registry::probe_all(&config.nodes);
    if healthy.is_empty() {
        bail!("no healthy nodes among {:?}", config.nodes);
    }
    tracing::info!(healthy = healthy.len(), total = config.nodes.len(), "node registry ready");

    let meta_node = config
        .meta_node
        .clone()
        .unwrap_or_else(|| healthy[0].clone());

    let queue_capacity = config.parallelism.max(1) + healthy.len();
    let dispatcher = Arc::new(Dispatcher::new(&healthy, config.timeout, queue_capacity));
    let workers = dispatcher.spawn_workers();

    let request = TableRequest {
        table_name: config.table.clone(),
        projection: config.fields.clone(),
        where_clause: config.r#where.clone(),
        r0: config.r0,
        rmax: config.rmax,
        n: config.n,
        destination: config.destination.clone(),
        keep: config.keep,
        tag: config.tag.clone(),
        cnxn_details: config.cnxn_details.clone(),
        meta_node,
    };

    let handle = dispatcher
        .extract(request, config.parallelism)
        .context("starting extraction")?;

    progress::watch(&[handle.clone()]);

    dispatcher.shutdown();
    for worker in workers {
        let _ = worker.join();
    }

    if config.keep {
        let assembled = aggregator::assemble(&handle, None, true)?;
        println!(
            "assembled {} rows x {} columns for {}",
            assembled.rows.len(),
            assembled.columns.len(),
            handle.destination_name()
        );
    }

    Ok(())
}
