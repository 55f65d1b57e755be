//! In-memory SonarQube stand-in for unit tests.

use super::{FetchError, Project, ProjectPage, RawMeasures, SonarApi, TrackedMetric};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FakeSonar {
    pages: Mutex<Vec<Vec<Project>>>,
    measures: Mutex<HashMap<String, RawMeasures>>,
    failing_projects: Mutex<HashSet<String>>,
    failing_page: Mutex<Option<u32>>,
    unreachable: Mutex<bool>,
    /// Keep claiming another page exists after the last one.
    endless: Mutex<bool>,
    /// How long each project listing call takes.
    page_delay: Mutex<Option<Duration>>,
    pub page_calls: AtomicUsize,
    pub measure_calls: AtomicUsize,
}

impl FakeSonar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: Vec<Vec<Project>>) -> Self {
        let fake = Self::new();
        fake.set_pages(pages);
        fake
    }

    pub fn set_pages(&self, pages: Vec<Vec<Project>>) {
        *self.pages.lock() = pages;
    }

    pub fn set_measures(&self, project_key: &str, values: &[(&str, &str)]) {
        let raw = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.measures.lock().insert(project_key.to_string(), raw);
    }

    pub fn fail_project(&self, project_key: &str) {
        self.failing_projects.lock().insert(project_key.to_string());
    }

    pub fn fail_page(&self, page: u32) {
        *self.failing_page.lock() = Some(page);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }

    pub fn set_endless(&self, endless: bool) {
        *self.endless.lock() = endless;
    }

    pub fn set_page_delay(&self, delay: Option<Duration>) {
        *self.page_delay.lock() = delay;
    }

    fn check_reachable(&self, endpoint: &'static str) -> Result<(), FetchError> {
        if *self.unreachable.lock() {
            return Err(FetchError::Transport {
                endpoint,
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

impl SonarApi for FakeSonar {
    async fn list_projects_page(&self, page: u32) -> Result<ProjectPage, FetchError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.page_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.check_reachable("/api/projects/search")?;

        if *self.failing_page.lock() == Some(page) {
            return Err(FetchError::Status {
                endpoint: "/api/projects/search",
                status: 500,
            });
        }

        let pages = self.pages.lock();
        let endless = *self.endless.lock();
        let index = page as usize - 1;

        let projects = match pages.get(index) {
            Some(projects) => projects.clone(),
            // Misbehaving servers repeat their last page.
            None if endless => pages.last().cloned().unwrap_or_default(),
            None => Vec::new(),
        };
        let has_more = endless || (!projects.is_empty() && index + 1 < pages.len());

        Ok(ProjectPage { projects, has_more })
    }

    async fn fetch_measures(
        &self,
        project_key: &str,
        _metrics: &[TrackedMetric],
    ) -> Result<RawMeasures, FetchError> {
        self.measure_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable("/api/measures/component")?;

        if self.failing_projects.lock().contains(project_key) {
            return Err(FetchError::Status {
                endpoint: "/api/measures/component",
                status: 404,
            });
        }

        Ok(self
            .measures
            .lock()
            .get(project_key)
            .cloned()
            .unwrap_or_default())
    }
}
