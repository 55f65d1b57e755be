//! Background refresh loop: resolve the catalog, fetch measures, commit them
//! to the registry, then wait for the next tick.

use crate::config::Config;
use crate::metrics::{CyclePhase, CycleSuccess, MetricsRegistry};
use crate::upstream::{fetch_all, resolve_projects, CatalogError, ProjectFilter, SonarApi, TrackedMetric};
use anyhow::{Context, Result};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Succeeded {
        projects: usize,
        fetch_failures: usize,
        evicted: usize,
    },
    Failed(String),
}

pub struct RefreshScheduler<A> {
    api: Arc<A>,
    registry: Arc<MetricsRegistry>,
    filter: ProjectFilter,
    metrics: Vec<TrackedMetric>,
    interval: Duration,
    max_pages: u32,
    fetch_concurrency: usize,
}

impl<A: SonarApi + 'static> RefreshScheduler<A> {
    pub fn new(api: Arc<A>, registry: Arc<MetricsRegistry>, config: &Config) -> Result<Self> {
        let filter = ProjectFilter::new(&config.exporter.project_key_regex).with_context(|| {
            format!("Invalid project key regex: {}", config.exporter.project_key_regex)
        })?;

        Ok(Self {
            api,
            registry,
            filter,
            metrics: config.exporter.metrics.clone(),
            interval: config.exporter.poll_interval(),
            max_pages: config.sonar.max_pages,
            fetch_concurrency: config.exporter.fetch_concurrency,
        })
    }

    /// Run one cycle. Every failure, panics included, ends up in the
    /// registry's operational state instead of escaping.
    pub async fn refresh_once(&self) -> CycleOutcome {
        let started = Instant::now();
        let result = AssertUnwindSafe(self.run_cycle(started)).catch_unwind().await;

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                let duration = started.elapsed();
                warn!(
                    error = %e,
                    duration_ms = duration.as_millis() as u64,
                    "Refresh cycle failed"
                );
                self.registry.record_failure(duration, &e.to_string());
                CycleOutcome::Failed(e.to_string())
            }
            Err(_) => {
                let duration = started.elapsed();
                let message = "refresh cycle panicked".to_string();
                error!(duration_ms = duration.as_millis() as u64, "Refresh cycle panicked");
                self.registry.record_failure(duration, &message);
                CycleOutcome::Failed(message)
            }
        }
    }

    async fn run_cycle(&self, started: Instant) -> Result<CycleOutcome, CatalogError> {
        self.registry.set_phase(CyclePhase::Resolving);
        let projects = resolve_projects(self.api.as_ref(), &self.filter, self.max_pages).await?;
        let project_count = projects.len();

        self.registry.set_phase(CyclePhase::Fetching);
        let report = fetch_all(
            self.api.as_ref(),
            projects,
            &self.metrics,
            self.fetch_concurrency,
        )
        .await;

        self.registry.set_phase(CyclePhase::Updating);
        let success = CycleSuccess {
            finished_at: Utc::now(),
            duration: started.elapsed(),
            fetch_failures: report.failures.len(),
        };
        let summary = self.registry.commit_success(&report.measured, &success);

        info!(
            projects = project_count,
            fetch_failures = success.fetch_failures,
            series = summary.upserted,
            evicted = summary.evicted,
            duration_ms = success.duration.as_millis() as u64,
            "Refresh cycle completed"
        );

        Ok(CycleOutcome::Succeeded {
            projects: project_count,
            fetch_failures: success.fetch_failures,
            evicted: summary.evicted,
        })
    }

    /// Refresh immediately, then once per interval measured from the start of
    /// each cycle. An overrunning cycle skips the ticks it missed. Shutdown is
    /// only observed between cycles.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            pattern = %self.filter.pattern(),
            "Refresh loop started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    info!("Refresh loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    debug!("Refresh tick");
                    self.refresh_once().await;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
