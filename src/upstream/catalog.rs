use super::{FetchError, Project, SonarApi};
use regex::Regex;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("failed to list projects (page {page}): {source}")]
    Page {
        page: u32,
        #[source]
        source: FetchError,
    },

    #[error("project listing did not end after {max_pages} pages")]
    TooManyPages { max_pages: u32 },
}

/// Inclusion filter over project keys. Matches from the start of the key.
#[derive(Debug, Clone)]
pub struct ProjectFilter {
    pattern: String,
    regex: Regex,
}

impl ProjectFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&format!("^(?:{})", pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// List every project, then keep the ones whose key passes `filter`.
///
/// Paging stops on the first page that reports nothing further, or that adds
/// no key not already seen. Any page failure fails the whole resolution.
pub async fn resolve_projects<A: SonarApi>(
    api: &A,
    filter: &ProjectFilter,
    max_pages: u32,
) -> Result<Vec<Project>, CatalogError> {
    let mut seen = HashSet::new();
    let mut all = Vec::new();

    for page in 1..=max_pages {
        let listing = api
            .list_projects_page(page)
            .await
            .map_err(|source| CatalogError::Page { page, source })?;

        let listed = listing.projects.len();
        let mut added = 0;
        for project in listing.projects {
            if seen.insert(project.key.clone()) {
                all.push(project);
                added += 1;
            }
        }

        debug!(page, listed, added, "Fetched project page");

        if !listing.has_more || (listed > 0 && added == 0) {
            let total = all.len();
            let included: Vec<Project> =
                all.into_iter().filter(|p| filter.matches(&p.key)).collect();

            info!(
                pages = page,
                total,
                included = included.len(),
                pattern = %filter.pattern(),
                "Resolved project catalog"
            );
            return Ok(included);
        }
    }

    Err(CatalogError::TooManyPages { max_pages })
}
