//! Project identifiers and their indexer base URLs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::errors::{IndexerError, IndexerResult};

/// Opaque identifier of one independently hosted indexer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Immutable project -> base URL table supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct ProjectRegistry {
    urls: Arc<HashMap<ProjectId, String>>,
}

impl ProjectRegistry {
    pub fn new<I, P, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, U)>,
        P: Into<ProjectId>,
        U: Into<String>,
    {
        let urls = entries
            .into_iter()
            .map(|(id, url)| {
                let url: String = url.into();
                (id.into(), url.trim_end_matches('/').to_string())
            })
            .collect();
        Self { urls: Arc::new(urls) }
    }

    /// Resolve a project to its base URL (no trailing slash)
    pub fn resolve(&self, project: &ProjectId) -> IndexerResult<&str> {
        self.urls
            .get(project)
            .map(String::as_str)
            .ok_or_else(|| IndexerError::UnknownProject(project.clone()))
    }

    pub fn contains(&self, project: &ProjectId) -> bool {
        self.urls.contains_key(project)
    }

    /// All known projects, sorted for stable iteration
    pub fn projects(&self) -> Vec<ProjectId> {
        let mut ids: Vec<_> = self.urls.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
