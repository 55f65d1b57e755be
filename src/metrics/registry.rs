use crate::upstream::{ProjectMeasures, TrackedMetric};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

const PROJECT_LABELS: [&str; 2] = ["project_key", "project_name"];
const MAX_ERROR_LABEL_CHARS: usize = 512;

/// Identity of one published series. The project name is part of it, so a
/// renamed project gets a new series and the old one is evicted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub metric: TrackedMetric,
    pub project_key: String,
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub value: f64,
    /// Cycle time the value was last confirmed in.
    pub confirmed_at: DateTime<Utc>,
}

/// Published series count and the oldest confirmation among them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeriesSummary {
    pub count: usize,
    pub oldest_confirmed_at: Option<DateTime<Utc>>,
}

/// Where the refresh loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    #[default]
    Idle,
    Resolving,
    Fetching,
    Updating,
}

/// Health facts of the refresh loop, written only by the scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationalState {
    pub up: bool,
    pub phase: CyclePhase,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_refresh_duration: Option<Duration>,
    pub last_error: Option<String>,
    pub projects: usize,
    pub fetch_failures: usize,
}

/// What a successful cycle reports alongside its measures.
#[derive(Debug, Clone)]
pub struct CycleSuccess {
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub fetch_failures: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub upserted: usize,
    pub evicted: usize,
}

struct Inner {
    registry: Registry,
    project_gauges: BTreeMap<TrackedMetric, GaugeVec>,
    series: BTreeMap<SeriesKey, Series>,
    state: OperationalState,
    up: Gauge,
    last_success: Gauge,
    last_duration: Gauge,
    last_error: GaugeVec,
    projects: IntGauge,
    fetch_failures: IntGauge,
    refresh_total: IntCounterVec,
}

/// Published series plus the exporter's own gauges, behind one lock.
///
/// Scrapes hold the read lock while encoding; cycle commits take the write
/// lock for the in-memory pass only.
pub struct MetricsRegistry {
    inner: RwLock<Inner>,
}

impl MetricsRegistry {
    pub fn new(metrics: &[TrackedMetric]) -> Result<Self> {
        let registry = Registry::new();

        let mut project_gauges = BTreeMap::new();
        for metric in metrics {
            if project_gauges.contains_key(metric) {
                bail!("Tracked metric listed more than once: {}", metric);
            }
            let gauge = GaugeVec::new(
                Opts::new(metric.gauge_name(), format!("SonarQube project metric: {}", metric)),
                &PROJECT_LABELS,
            )?;
            registry.register(Box::new(gauge.clone()))?;
            project_gauges.insert(*metric, gauge);
        }

        let up = Gauge::new(
            "sonar_exporter_up",
            "1 if the last refresh succeeded, 0 otherwise",
        )?;
        let last_success = Gauge::new(
            "sonar_exporter_last_success_unixtime",
            "Unix timestamp of the last successful refresh",
        )?;
        let last_duration = Gauge::new(
            "sonar_exporter_last_refresh_duration_seconds",
            "Duration of the last refresh in seconds",
        )?;
        let last_error = GaugeVec::new(
            Opts::new(
                "sonar_exporter_last_error",
                "Present with value 1 while the last refresh ended in error",
            ),
            &["error"],
        )?;
        let projects = IntGauge::new(
            "sonar_exporter_projects",
            "Projects included by the last successful refresh",
        )?;
        let fetch_failures = IntGauge::new(
            "sonar_exporter_project_fetch_failures",
            "Projects whose measures could not be fetched in the last successful refresh",
        )?;
        let refresh_total = IntCounterVec::new(
            Opts::new("sonar_exporter_refresh_total", "Refresh cycles by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(up.clone()))?;
        registry.register(Box::new(last_success.clone()))?;
        registry.register(Box::new(last_duration.clone()))?;
        registry.register(Box::new(last_error.clone()))?;
        registry.register(Box::new(projects.clone()))?;
        registry.register(Box::new(fetch_failures.clone()))?;
        registry.register(Box::new(refresh_total.clone()))?;

        for outcome in ["success", "failure"] {
            refresh_total.with_label_values(&[outcome]);
        }

        Ok(Self {
            inner: RwLock::new(Inner {
                registry,
                project_gauges,
                series: BTreeMap::new(),
                state: OperationalState::default(),
                up,
                last_success,
                last_duration,
                last_error,
                projects,
                fetch_failures,
                refresh_total,
            }),
        })
    }

    /// Upsert every observed measure, then evict every series this cycle did
    /// not confirm.
    #[cfg(test)]
    pub(crate) fn apply_cycle(&self, results: &[ProjectMeasures], now: DateTime<Utc>) -> ApplySummary {
        let mut guard = self.inner.write();
        apply_locked(&mut guard, results, now)
    }

    /// Apply a successful cycle and record its outcome in one step, so a scrape
    /// never sees new series next to a stale `up`.
    pub fn commit_success(&self, results: &[ProjectMeasures], success: &CycleSuccess) -> ApplySummary {
        let mut guard = self.inner.write();
        let summary = apply_locked(&mut guard, results, success.finished_at);

        let inner = &mut *guard;
        inner.state.up = true;
        inner.state.phase = CyclePhase::Idle;
        inner.state.last_success_time = Some(success.finished_at);
        inner.state.last_refresh_duration = Some(success.duration);
        inner.state.last_error = None;
        inner.state.projects = results.len() + success.fetch_failures;
        inner.state.fetch_failures = success.fetch_failures;

        inner.up.set(1.0);
        inner.last_success.set(success.finished_at.timestamp() as f64);
        inner.last_duration.set(success.duration.as_secs_f64());
        inner.last_error.reset();
        inner.projects.set(inner.state.projects as i64);
        inner.fetch_failures.set(success.fetch_failures as i64);
        inner.refresh_total.with_label_values(&["success"]).inc();

        summary
    }

    /// Record a failed cycle. Published project series are left untouched.
    pub fn record_failure(&self, duration: Duration, error: &str) {
        let mut guard = self.inner.write();
        let inner = &mut *guard;

        let error = truncate(error, MAX_ERROR_LABEL_CHARS);
        inner.state.up = false;
        inner.state.phase = CyclePhase::Idle;
        inner.state.last_refresh_duration = Some(duration);
        inner.state.last_error = Some(error.clone());

        inner.up.set(0.0);
        inner.last_duration.set(duration.as_secs_f64());
        inner.last_error.reset();
        inner.last_error.with_label_values(&[error.as_str()]).set(1.0);
        inner.refresh_total.with_label_values(&["failure"]).inc();
    }

    pub fn set_phase(&self, phase: CyclePhase) {
        self.inner.write().state.phase = phase;
    }

    pub fn state(&self) -> OperationalState {
        self.inner.read().state.clone()
    }

    #[cfg(test)]
    pub(crate) fn series(&self) -> Vec<(SeriesKey, Series)> {
        self.inner
            .read()
            .series
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn series_summary(&self) -> SeriesSummary {
        let inner = self.inner.read();
        SeriesSummary {
            count: inner.series.len(),
            oldest_confirmed_at: inner.series.values().map(|s| s.confirmed_at).min(),
        }
    }

    /// Encode everything in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let families = self.inner.read().registry.gather();

        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder.encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn apply_locked(inner: &mut Inner, results: &[ProjectMeasures], now: DateTime<Utc>) -> ApplySummary {
    let mut seen = BTreeSet::new();

    for measured in results {
        let labels = [measured.project.key.as_str(), measured.project.name.as_str()];

        for (metric, value) in &measured.values {
            let Some(gauge) = inner.project_gauges.get(metric) else {
                continue;
            };
            gauge.with_label_values(&labels).set(*value);

            let key = SeriesKey {
                metric: *metric,
                project_key: measured.project.key.clone(),
                project_name: measured.project.name.clone(),
            };
            inner.series.insert(
                key.clone(),
                Series {
                    value: *value,
                    confirmed_at: now,
                },
            );
            seen.insert(key);
        }
    }

    let stale: Vec<SeriesKey> = inner
        .series
        .keys()
        .filter(|key| !seen.contains(*key))
        .cloned()
        .collect();

    for key in &stale {
        if let Some(gauge) = inner.project_gauges.get(&key.metric) {
            // Already gone is fine.
            let _ = gauge.remove_label_values(&[key.project_key.as_str(), key.project_name.as_str()]);
        }
        inner.series.remove(key);
    }

    ApplySummary {
        upserted: seen.len(),
        evicted: stale.len(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
