use thiserror::Error;

use super::registry::ProjectId;

/// Errors raised while talking to one or more project indexers.
///
/// Every variant scoped to a single project carries its [`ProjectId`], so a
/// fan-out caller can retry or report per project.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexerError {
    /// Transport-level errors (network, connection reset, DNS)
    #[error("Transport error: {message} (project: {project})")]
    Transport { project: ProjectId, message: String },

    /// The indexer answered with a non-2xx status
    #[error("HTTP {status} from {endpoint} (project: {project})")]
    HttpStatus {
        project: ProjectId,
        endpoint: String,
        status: u16,
    },

    /// The response body did not have a shape we can read
    #[error("Protocol error: {message} (project: {project})")]
    Protocol { project: ProjectId, message: String },

    /// A structurally required row could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The project id is not known to the registry
    #[error("Unknown project: {0}")]
    UnknownProject(ProjectId),

    /// The shared abort signal fired before the project finished
    #[error("Request cancelled (project: {project})")]
    Cancelled { project: ProjectId },

    #[error("Timeout after {timeout_ms}ms (project: {project})")]
    Timeout { project: ProjectId, timeout_ms: u64 },

    /// Caller bug: the request itself is malformed
    #[error("Usage error: {0}")]
    Usage(String),

    /// A caller-supplied producer failed
    #[error("Producer error: {message} (project: {project})")]
    Producer { project: ProjectId, message: String },
}

impl IndexerError {
    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            IndexerError::Transport { .. } => true,
            IndexerError::Timeout { .. } => true,
            // Server errors and rate limiting
            IndexerError::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),

            IndexerError::Protocol { .. } => false,
            IndexerError::Decode(_) => false,
            IndexerError::UnknownProject(_) => false,
            IndexerError::Cancelled { .. } => false,
            IndexerError::Usage(_) => false,
            IndexerError::Producer { .. } => false,
        }
    }

    /// Get the project this error belongs to, if any
    pub fn project(&self) -> Option<&ProjectId> {
        match self {
            IndexerError::Transport { project, .. } => Some(project),
            IndexerError::HttpStatus { project, .. } => Some(project),
            IndexerError::Protocol { project, .. } => Some(project),
            IndexerError::UnknownProject(project) => Some(project),
            IndexerError::Cancelled { project } => Some(project),
            IndexerError::Timeout { project, .. } => Some(project),
            IndexerError::Producer { project, .. } => Some(project),
            IndexerError::Decode(_) | IndexerError::Usage(_) => None,
        }
    }

    /// Classify a reqwest failure for the given project
    pub fn from_reqwest(err: reqwest::Error, project: &ProjectId, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            IndexerError::Timeout {
                project: project.clone(),
                timeout_ms,
            }
        } else if err.is_decode() {
            IndexerError::Protocol {
                project: project.clone(),
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            IndexerError::HttpStatus {
                project: project.clone(),
                endpoint: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            }
        } else {
            IndexerError::Transport {
                project: project.clone(),
                message: err.to_string(),
            }
        }
    }
}

pub type IndexerResult<T> = Result<T, IndexerError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> ProjectId {
        ProjectId::from("arcade-main")
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(IndexerError::Transport {
            project: project(),
            message: "connection reset".to_string(),
        }
        .is_retryable());

        assert!(IndexerError::HttpStatus {
            project: project(),
            endpoint: "https://x/sql".to_string(),
            status: 503,
        }
        .is_retryable());

        assert!(!IndexerError::HttpStatus {
            project: project(),
            endpoint: "https://x/sql".to_string(),
            status: 400,
        }
        .is_retryable());

        assert!(!IndexerError::Usage("no producer".to_string()).is_retryable());
        assert!(!IndexerError::Cancelled { project: project() }.is_retryable());
    }

    #[test]
    fn test_error_project() {
        let err = IndexerError::Timeout {
            project: project(),
            timeout_ms: 5000,
        };
        assert_eq!(err.project(), Some(&project()));
        assert_eq!(IndexerError::Decode("bad".to_string()).project(), None);
    }

    #[test]
    fn test_http_status_message_names_endpoint() {
        let err = IndexerError::HttpStatus {
            project: project(),
            endpoint: "https://api.example/x/sql".to_string(),
            status: 502,
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("https://api.example/x/sql"));
        assert!(msg.contains("arcade-main"));
    }
}
