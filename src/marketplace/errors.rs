use serde::Serialize;
use thiserror::Error;

use crate::indexer::IndexerError;

/// Read client errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MarketplaceError {
    /// Fetch failed at the indexer layer
    #[error(transparent)]
    Indexer(#[from] IndexerError),

    #[error("{what} not found")]
    NotFound { what: String },

    /// A required collaborator was not supplied; a caller bug
    #[error("missing provider: {0}")]
    MissingProvider(&'static str),

    /// On-chain read through the supplied provider failed
    #[error("provider call failed: {0}")]
    Provider(String),

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl MarketplaceError {
    /// Usage errors indicate a caller bug rather than a data-layer condition
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            MarketplaceError::MissingProvider(_) | MarketplaceError::Indexer(IndexerError::Usage(_))
        )
    }
}

impl Serialize for MarketplaceError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

pub type MarketplaceResult<T> = Result<T, MarketplaceError>;

/// Data-fetch outcome: `error` is `None` only when `data` is complete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataResult<T> {
    pub data: Option<T>,
    pub error: Option<MarketplaceError>,
}

impl<T> DataResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<MarketplaceError>) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
        }
    }

    /// Usable data alongside the error that made it incomplete
    pub fn partial(data: T, error: impl Into<MarketplaceError>) -> Self {
        Self {
            data: Some(data),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> MarketplaceResult<T> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(err)) => Err(err),
            (None, None) => Err(MarketplaceError::NotFound {
                what: "data".to_string(),
            }),
        }
    }
}

impl<T> From<MarketplaceResult<T>> for DataResult<T> {
    fn from(result: MarketplaceResult<T>) -> Self {
        match result {
            Ok(data) => DataResult::ok(data),
            Err(e) => DataResult::err(e),
        }
    }
}
