use super::{FetchError, Project, ProjectPage, RawMeasures, SonarApi, TrackedMetric};
use crate::config::SonarConfig;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

const PROJECTS_SEARCH: &str = "/api/projects/search";
const MEASURES_COMPONENT: &str = "/api/measures/component";

/// HTTP client for the SonarQube Web API.
///
/// Authenticates with the user token as the Basic auth username and an empty
/// password. Every call is bounded by the configured connect and request
/// timeouts; nothing is retried here.
pub struct SonarClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    page_size: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    paging: Option<Paging>,
    #[serde(default)]
    components: Option<Vec<Component>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Paging {
    page_index: u64,
    page_size: u64,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct Component {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeasuresResponse {
    component: MeasuredComponent,
}

#[derive(Debug, Deserialize)]
struct MeasuredComponent {
    #[serde(default)]
    measures: Option<Vec<WireMeasure>>,
}

#[derive(Debug, Deserialize)]
struct WireMeasure {
    metric: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl SonarClient {
    pub fn new(config: &SonarConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .context("SonarQube token is required")?;

        if !config.verify_tls {
            warn!(
                url = %config.base_url(),
                "TLS certificate verification is DISABLED for SonarQube requests"
            );
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("sonar-exporter/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url().to_string(),
            token,
            page_size: config.page_size,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{}", self.base_url, endpoint);

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.token, Some(""))
            .query(query)
            .send()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                endpoint,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(endpoint, e))?;

        serde_json::from_slice(&body).map_err(|e| FetchError::Malformed {
            endpoint,
            reason: e.to_string(),
        })
    }
}

impl SonarApi for SonarClient {
    async fn list_projects_page(&self, page: u32) -> Result<ProjectPage, FetchError> {
        let query = [("p", page.to_string()), ("ps", self.page_size.to_string())];
        let response: SearchResponse = self.get_json(PROJECTS_SEARCH, &query).await?;

        let components = response.components.unwrap_or_default();
        let has_more = has_more(components.len(), response.paging.as_ref());

        let projects = components
            .into_iter()
            .filter_map(|c| match (c.key, c.name) {
                (Some(key), Some(name)) if !key.is_empty() && !name.is_empty() => {
                    Some(Project { key, name })
                }
                _ => {
                    debug!(page, "Skipping project entry without key or name");
                    None
                }
            })
            .collect();

        Ok(ProjectPage { projects, has_more })
    }

    async fn fetch_measures(
        &self,
        project_key: &str,
        metrics: &[TrackedMetric],
    ) -> Result<RawMeasures, FetchError> {
        let metric_keys = metrics
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let query = [
            ("component", project_key.to_string()),
            ("metricKeys", metric_keys),
        ];
        let response: MeasuresResponse = self.get_json(MEASURES_COMPONENT, &query).await?;

        let mut measures = RawMeasures::new();
        for measure in response.component.measures.unwrap_or_default() {
            let value = match measure.value {
                Some(serde_json::Value::String(s)) => s,
                Some(serde_json::Value::Number(n)) => n.to_string(),
                _ => continue,
            };
            measures.insert(measure.metric, value);
        }

        Ok(measures)
    }
}

/// Whether another listing page should be requested.
///
/// An empty page always ends the walk. When the response carries paging
/// information the total bounds it as well.
fn has_more(page_len: usize, paging: Option<&Paging>) -> bool {
    if page_len == 0 {
        return false;
    }

    match paging {
        Some(p) => p.page_index.saturating_mul(p.page_size) < p.total,
        None => true,
    }
}

fn transport_error(endpoint: &'static str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout { endpoint }
    } else {
        FetchError::Transport {
            endpoint,
            message: err.to_string(),
        }
    }
}
