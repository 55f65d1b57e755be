use super::{FetchError, Project, RawMeasures, SonarApi, TrackedMetric};
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Coerced measures of one project for one cycle. Metrics SonarQube did not
/// return are simply missing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectMeasures {
    pub project: Project,
    pub values: BTreeMap<TrackedMetric, f64>,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub measured: Vec<ProjectMeasures>,
    pub failures: Vec<(Project, FetchError)>,
}

/// Convert a raw SonarQube value to a sample value.
///
/// Ratings also accept the letter scale (A=1 .. E=5). Anything unparsable
/// yields `None` rather than a guessed number.
pub fn coerce_value(metric: TrackedMetric, raw: &str) -> Option<f64> {
    let raw = raw.trim();

    if let Ok(value) = raw.parse::<f64>() {
        return value.is_finite().then_some(value);
    }

    if metric.is_rating() {
        return match raw.to_ascii_uppercase().as_str() {
            "A" => Some(1.0),
            "B" => Some(2.0),
            "C" => Some(3.0),
            "D" => Some(4.0),
            "E" => Some(5.0),
            _ => None,
        };
    }

    None
}

fn normalize(project: &Project, raw: RawMeasures, metrics: &[TrackedMetric]) -> BTreeMap<TrackedMetric, f64> {
    let mut values = BTreeMap::new();

    for metric in metrics {
        let Some(value) = raw.get(metric.as_str()) else {
            continue;
        };

        match coerce_value(*metric, value) {
            Some(v) => {
                values.insert(*metric, v);
            }
            None => debug!(
                project = %project.key,
                metric = %metric,
                value = %value,
                "Ignoring unparsable measure value"
            ),
        }
    }

    values
}

/// Fetch the tracked measures of every project.
///
/// A failing project is logged and reported in `failures`; it never stops the
/// others. Results keep the catalog order.
pub async fn fetch_all<A: SonarApi>(
    api: &A,
    projects: Vec<Project>,
    metrics: &[TrackedMetric],
    concurrency: usize,
) -> FetchReport {
    let results: Vec<(Project, Result<RawMeasures, FetchError>)> = stream::iter(projects)
        .map(|project| async move {
            let result = api.fetch_measures(&project.key, metrics).await;
            (project, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut report = FetchReport::default();
    for (project, result) in results {
        match result {
            Ok(raw) => {
                let values = normalize(&project, raw, metrics);
                report.measured.push(ProjectMeasures { project, values });
            }
            Err(e) => {
                if e.is_not_found() {
                    warn!(project = %project.key, "Project vanished before its measures were fetched");
                } else {
                    warn!(project = %project.key, error = %e, "Failed to fetch project measures");
                }
                report.failures.push((project, e));
            }
        }
    }

    report
}
