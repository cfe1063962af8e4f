//! Deployment configuration
//!
//! Loaded from a TOML file, from `ARCADE_*` environment variables, or from a
//! file with environment overrides on top. `.env` files are honoured.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::indexer::{ProjectId, ProjectRegistry};
use crate::marketplace::{ClientMode, ClientSettings};
use crate::retry::RetryPolicy;

pub const ENV_PROJECTS: &str = "ARCADE_PROJECTS";
pub const ENV_DEFAULT_PROJECT: &str = "ARCADE_DEFAULT_PROJECT";
pub const ENV_CLIENT_MODE: &str = "ARCADE_CLIENT_MODE";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ARCADE_REQUEST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: ProjectId,
    /// Indexer base URL; `/sql` and the client protocol paths hang off it
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub projects: Vec<ProjectConfig>,

    /// Project used when a call names none; defaults to the first project
    #[serde(default)]
    pub default_project: Option<ProjectId>,

    #[serde(default)]
    pub mode: ClientMode,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default = "default_orders_table")]
    pub orders_table: String,

    #[serde(default = "default_books_table")]
    pub books_table: String,

    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_orders_table() -> String {
    "ARCADE-Order".to_string()
}

fn default_books_table() -> String {
    "ARCADE-Book".to_string()
}

fn default_page_size() -> u32 {
    50
}

impl IndexerConfig {
    pub fn new(projects: Vec<ProjectConfig>) -> Self {
        Self {
            projects,
            default_project: None,
            mode: ClientMode::default(),
            request_timeout_ms: default_request_timeout_ms(),
            retry: RetryPolicy::default(),
            orders_table: default_orders_table(),
            books_table: default_books_table(),
            default_page_size: default_page_size(),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(format!("Failed to parse TOML: {e}")))
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("Failed to read config file {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Configuration from the process environment (after loading `.env`)
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// File if given, else environment; environment overrides apply either way
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let lookup = |key: &str| std::env::var(key).ok();
        match path {
            Some(path) => {
                let mut config = Self::from_toml_file(path)?;
                config.apply_overrides(lookup)?;
                Ok(config)
            }
            None => Self::from_lookup(lookup),
        }
    }

    /// `ARCADE_PROJECTS=id=url,id=url` plus the optional overrides
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = lookup(ENV_PROJECTS).ok_or_else(|| ConfigError::MissingEnvVar(ENV_PROJECTS.to_string()))?;
        let projects = parse_projects(&raw)?;
        let mut config = Self::new(projects);
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(project) = lookup(ENV_DEFAULT_PROJECT).filter(|s| !s.trim().is_empty()) {
            self.default_project = Some(ProjectId::from(project.trim()));
        }
        if let Some(mode) = lookup(ENV_CLIENT_MODE) {
            self.mode = mode.parse().map_err(ConfigError::Validation)?;
        }
        if let Some(timeout) = lookup(ENV_REQUEST_TIMEOUT_MS) {
            self.request_timeout_ms = timeout
                .trim()
                .parse()
                .map_err(|_| ConfigError::Validation(format!("{ENV_REQUEST_TIMEOUT_MS} must be an integer")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.projects.is_empty() {
            return Err(ConfigError::Validation("No projects configured".to_string()));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            if !seen.insert(&project.id) {
                return Err(ConfigError::Validation(format!("Duplicate project id '{}'", project.id)));
            }
            if !(project.url.starts_with("http://") || project.url.starts_with("https://")) {
                return Err(ConfigError::Validation(format!(
                    "Project '{}' URL must be http(s): {}",
                    project.id, project.url
                )));
            }
        }

        if let Some(default) = &self.default_project {
            if !seen.contains(default) {
                return Err(ConfigError::Validation(format!("Unknown default project '{default}'")));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation("retry.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Validation("retry.jitter_factor must be within [0, 1]".to_string()));
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::Validation("default_page_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn registry(&self) -> ProjectRegistry {
        ProjectRegistry::new(self.projects.iter().map(|p| (p.id.clone(), p.url.clone())))
    }

    pub fn default_project_id(&self) -> ProjectId {
        self.default_project
            .clone()
            .or_else(|| self.projects.first().map(|p| p.id.clone()))
            .unwrap_or_else(|| ClientSettings::default().default_project)
    }

    pub fn project_ids(&self) -> Vec<ProjectId> {
        self.projects.iter().map(|p| p.id.clone()).collect()
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            default_project: self.default_project_id(),
            orders_table: self.orders_table.clone(),
            books_table: self.books_table.clone(),
            default_page_size: self.default_page_size,
        }
    }
}

fn parse_projects(raw: &str) -> Result<Vec<ProjectConfig>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (id, url) = entry.split_once('=').ok_or_else(|| {
                ConfigError::Validation(format!("{ENV_PROJECTS} entry '{entry}' is not id=url"))
            })?;
            Ok(ProjectConfig {
                id: ProjectId::from(id.trim()),
                url: url.trim().to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
