//! SonarQube Web API access: the HTTP client, project catalog resolution and
//! measure fetching.

pub mod catalog;
pub mod client;
pub mod measures;

#[cfg(test)]
pub(crate) mod testing;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use thiserror::Error;

pub use catalog::{resolve_projects, CatalogError, ProjectFilter};
pub use client::SonarClient;
pub use measures::{coerce_value, fetch_all, FetchReport, ProjectMeasures};

/// Measures the exporter publishes, one gauge family each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedMetric {
    Ncloc,
    Bugs,
    Vulnerabilities,
    CodeSmells,
    Coverage,
    DuplicatedLinesDensity,
    SecurityHotspots,
    ReliabilityRating,
    SecurityRating,
    SqaleRating,
}

impl TrackedMetric {
    pub const ALL: [TrackedMetric; 10] = [
        TrackedMetric::Ncloc,
        TrackedMetric::Bugs,
        TrackedMetric::Vulnerabilities,
        TrackedMetric::CodeSmells,
        TrackedMetric::Coverage,
        TrackedMetric::DuplicatedLinesDensity,
        TrackedMetric::SecurityHotspots,
        TrackedMetric::ReliabilityRating,
        TrackedMetric::SecurityRating,
        TrackedMetric::SqaleRating,
    ];

    /// The SonarQube metric key.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedMetric::Ncloc => "ncloc",
            TrackedMetric::Bugs => "bugs",
            TrackedMetric::Vulnerabilities => "vulnerabilities",
            TrackedMetric::CodeSmells => "code_smells",
            TrackedMetric::Coverage => "coverage",
            TrackedMetric::DuplicatedLinesDensity => "duplicated_lines_density",
            TrackedMetric::SecurityHotspots => "security_hotspots",
            TrackedMetric::ReliabilityRating => "reliability_rating",
            TrackedMetric::SecurityRating => "security_rating",
            TrackedMetric::SqaleRating => "sqale_rating",
        }
    }

    /// Ratings are reported on the A..E scale.
    pub fn is_rating(&self) -> bool {
        matches!(
            self,
            TrackedMetric::ReliabilityRating
                | TrackedMetric::SecurityRating
                | TrackedMetric::SqaleRating
        )
    }

    pub fn gauge_name(&self) -> String {
        format!("sonar_project_{}", self.as_str())
    }
}

impl fmt::Display for TrackedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackedMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackedMetric::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown metric: {}", s))
    }
}

/// A project as listed by `api/projects/search`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Project {
    pub key: String,
    pub name: String,
}

impl Project {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectPage {
    pub projects: Vec<Project>,
    pub has_more: bool,
}

/// Raw measure values keyed by SonarQube metric key, before coercion.
pub type RawMeasures = HashMap<String, String>;

/// A failed upstream call. Never carries the token.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request to {endpoint} timed out")]
    Timeout { endpoint: &'static str },

    #[error("transport error calling {endpoint}: {message}")]
    Transport {
        endpoint: &'static str,
        message: String,
    },

    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: &'static str, status: u16 },

    #[error("malformed response from {endpoint}: {reason}")]
    Malformed {
        endpoint: &'static str,
        reason: String,
    },
}

impl FetchError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchError::Status { status: 404, .. })
    }
}

/// The two SonarQube calls the exporter depends on.
pub trait SonarApi: Send + Sync {
    /// Fetch one page of the project listing; pages start at 1.
    fn list_projects_page(
        &self,
        page: u32,
    ) -> impl Future<Output = Result<ProjectPage, FetchError>> + Send;

    /// Fetch the given measures of one project in a single call.
    fn fetch_measures(
        &self,
        project_key: &str,
        metrics: &[TrackedMetric],
    ) -> impl Future<Output = Result<RawMeasures, FetchError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_keys_round_trip_through_from_str() {
        for metric in TrackedMetric::ALL {
            assert_eq!(metric.as_str().parse::<TrackedMetric>(), Ok(metric));
        }
        assert!("alert_status".parse::<TrackedMetric>().is_err());
    }

    #[test]
    fn test_gauge_name() {
        assert_eq!(TrackedMetric::Ncloc.gauge_name(), "sonar_project_ncloc");
        assert_eq!(
            TrackedMetric::DuplicatedLinesDensity.gauge_name(),
            "sonar_project_duplicated_lines_density"
        );
    }

    #[test]
    fn test_serde_names_match_metric_keys() {
        for metric in TrackedMetric::ALL {
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{}\"", metric.as_str()));
        }
    }

    #[test]
    fn test_only_ratings_are_ratings() {
        let ratings: Vec<_> = TrackedMetric::ALL.iter().filter(|m| m.is_rating()).collect();
        assert_eq!(ratings.len(), 3);
        assert!(!TrackedMetric::Coverage.is_rating());
    }
}
