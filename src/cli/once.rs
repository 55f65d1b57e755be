use super::serve::{prepare, SourceArgs};
use crate::metrics::MetricsRegistry;
use crate::scheduler::{CycleOutcome, RefreshScheduler};
use crate::upstream::SonarClient;
use anyhow::{bail, Result};
use clap::Args;
use std::sync::Arc;

#[derive(Args)]
pub struct OnceArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

/// Run a single refresh cycle and print the resulting exposition text.
pub async fn run(args: OnceArgs) -> Result<()> {
    let config = prepare(&args.source)?;

    let client = Arc::new(SonarClient::new(&config.sonar)?);
    let registry = Arc::new(MetricsRegistry::new(&config.exporter.metrics)?);
    let scheduler = RefreshScheduler::new(client, Arc::clone(&registry), &config)?;

    let outcome = scheduler.refresh_once().await;
    print!("{}", registry.render()?);

    match outcome {
        CycleOutcome::Succeeded { .. } => Ok(()),
        CycleOutcome::Failed(e) => bail!("Refresh failed: {}", e),
    }
}
