//! streamflow broker: runs the partitions of one node and answers
//! line-delimited JSON commands on stdin. Logs go to stderr.

mod config;
mod gateway;

use anyhow::{Context, Result};
use std::sync::Arc;
use streamflow_core::{Cluster, SystemClock};
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::BrokerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = BrokerConfig::load().context("loading broker configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.default_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!(
        partitions = config.engine.partition_count,
        deployment_partition = config.engine.deployment_partition,
        multi_tenancy = config.engine.multi_tenancy_enabled,
        authorizations = config.engine.authorizations_enabled,
        "starting broker"
    );

    let cluster = Arc::new(
        Cluster::start(config.engine.clone(), Arc::new(SystemClock))
            .await
            .context("starting partitions")?,
    );

    gateway::serve(cluster.clone(), BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;

    match Arc::try_unwrap(cluster) {
        Ok(cluster) => cluster.shutdown().await.context("stopping partitions")?,
        Err(_) => tracing::warn!("cluster still referenced, skipping orderly shutdown"),
    }
    tracing::info!("broker stopped");
    Ok(())
}
