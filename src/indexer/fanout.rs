//! Fan-out aggregation across project indexers
//!
//! Both transports are lowered to per-project [`ProjectEvent`] streams and
//! merged with `select_all`, so batch and streaming results share one set of
//! error semantics: every project reaches exactly one terminal state, and a
//! failing project never aborts the others.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::callback::{CallbackTransport, Producer};
use super::errors::{IndexerError, IndexerResult};
use super::query::{RowDecoder, SqlTransport};
use super::registry::ProjectId;
use super::signal::AbortSignal;
use super::Row;
use crate::metrics::metrics;
use crate::observability::CorrelationId;
use crate::retry::RetryPolicy;

/// Per-project event produced by a transport
#[derive(Debug)]
pub enum ProjectEvent<T> {
    Item {
        project: ProjectId,
        value: T,
    },
    Finished {
        project: ProjectId,
        result: Result<(), IndexerError>,
        elapsed: Duration,
    },
}

impl<T> ProjectEvent<T> {
    pub(crate) fn finished(project: ProjectId, result: Result<(), IndexerError>, started: Instant) -> Self {
        ProjectEvent::Finished {
            project,
            result,
            elapsed: started.elapsed(),
        }
    }
}

/// What to run against each project
pub enum FanoutOperation<T> {
    Callback(Arc<dyn Producer<T>>),
    Query { sql: Arc<str>, decode: RowDecoder<T> },
}

impl<T> Clone for FanoutOperation<T> {
    fn clone(&self) -> Self {
        match self {
            FanoutOperation::Callback(p) => FanoutOperation::Callback(p.clone()),
            FanoutOperation::Query { sql, decode } => FanoutOperation::Query {
                sql: sql.clone(),
                decode: decode.clone(),
            },
        }
    }
}

pub struct FanoutRequest<T> {
    pub endpoints: Vec<ProjectId>,
    pub operation: FanoutOperation<T>,
}

impl<T: Send + 'static> FanoutRequest<T> {
    pub fn callback<P>(endpoints: Vec<ProjectId>, producer: P) -> Self
    where
        P: Producer<T> + 'static,
    {
        Self {
            endpoints,
            operation: FanoutOperation::Callback(Arc::new(producer)),
        }
    }

    pub fn query_with<F>(endpoints: Vec<ProjectId>, sql: impl Into<Arc<str>>, decode: F) -> Self
    where
        F: Fn(Vec<Row>) -> IndexerResult<T> + Send + Sync + 'static,
    {
        Self {
            endpoints,
            operation: FanoutOperation::Query {
                sql: sql.into(),
                decode: Arc::new(decode),
            },
        }
    }
}

impl<T: From<Vec<Row>> + Send + 'static> FanoutRequest<T> {
    /// Build from loosely-typed parts; exactly one of `producer` / `query`
    /// must be present
    pub fn from_parts(
        endpoints: Vec<ProjectId>,
        producer: Option<Arc<dyn Producer<T>>>,
        query: Option<String>,
    ) -> IndexerResult<Self> {
        let operation = match (producer, query) {
            (Some(producer), None) => FanoutOperation::Callback(producer),
            (None, Some(sql)) => FanoutOperation::Query {
                sql: sql.into(),
                decode: Arc::new(|rows: Vec<Row>| Ok(T::from(rows))),
            },
            (Some(_), Some(_)) => {
                return Err(IndexerError::Usage(
                    "fan-out request takes a producer or a query, not both".to_string(),
                ))
            }
            (None, None) => {
                return Err(IndexerError::Usage(
                    "fan-out request needs a producer or a query".to_string(),
                ))
            }
        };
        Ok(Self { endpoints, operation })
    }
}

impl FanoutRequest<Vec<Row>> {
    pub fn query(endpoints: Vec<ProjectId>, sql: impl Into<Arc<str>>) -> Self {
        Self::query_with(endpoints, sql, Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointData<T> {
    pub endpoint: ProjectId,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointError {
    pub endpoint: ProjectId,
    #[serde(serialize_with = "serialize_display")]
    pub error: IndexerError,
}

fn serialize_display<S: serde::Serializer>(err: &IndexerError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

impl std::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.endpoint, self.error)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutMetadata {
    pub total_endpoints: usize,
    pub successful_endpoints: usize,
    pub failed_endpoints: usize,
}

/// Batch result; `successful_endpoints + failed_endpoints == total_endpoints`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanoutResult<T> {
    pub data: Vec<EndpointData<T>>,
    pub errors: Vec<EndpointError>,
    pub metadata: FanoutMetadata,
}

impl<T> FanoutResult<T> {
    /// At least one project succeeded
    pub fn any_succeeded(&self) -> bool {
        self.metadata.successful_endpoints > 0
    }

    pub fn is_partial(&self) -> bool {
        self.metadata.failed_endpoints > 0 && self.any_succeeded()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.data.iter().map(|d| &d.data)
    }

    /// Transform each project's data, keeping errors and counters
    pub fn map<U>(self, mut f: impl FnMut(&ProjectId, T) -> U) -> FanoutResult<U> {
        FanoutResult {
            data: self
                .data
                .into_iter()
                .map(|d| EndpointData {
                    data: f(&d.endpoint, d.data),
                    endpoint: d.endpoint,
                })
                .collect(),
            errors: self.errors,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamProgress {
    /// Projects in a terminal state so far
    pub completed: usize,
    pub total: usize,
    /// Set on exactly one record: the last project's terminal record
    pub is_last: bool,
}

/// One record of the merged stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRecord<T> {
    pub endpoint: ProjectId,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_opt_display")]
    pub error: Option<IndexerError>,
    /// This record is the project's terminal record
    pub done: bool,
    pub metadata: StreamProgress,
}

fn serialize_opt_display<S: serde::Serializer>(err: &Option<IndexerError>, s: S) -> Result<S::Ok, S::Error> {
    match err {
        Some(e) => s.collect_str(e),
        None => s.serialize_none(),
    }
}

/// Drives N projects concurrently through either transport
#[derive(Clone)]
pub struct Aggregator {
    callback: CallbackTransport,
    query: SqlTransport,
    retry: RetryPolicy,
}

impl Aggregator {
    pub fn new(callback: CallbackTransport, query: SqlTransport, retry: RetryPolicy) -> Self {
        Self { callback, query, retry }
    }

    pub fn sql(&self) -> &SqlTransport {
        &self.query
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Merged stream in completion order; ends once every project is terminal
    pub fn stream<T: Send + 'static>(
        &self,
        request: FanoutRequest<T>,
        signal: AbortSignal,
    ) -> BoxStream<'static, StreamRecord<T>> {
        let correlation_id = CorrelationId::new();
        let total = request.endpoints.len();
        metrics().fanout_requests.inc();
        info!(correlation_id = %correlation_id, endpoints = total, "Starting fan-out");

        let streams: Vec<_> = request
            .endpoints
            .into_iter()
            .map(|project| match &request.operation {
                FanoutOperation::Callback(producer) => {
                    self.callback.project_stream(project, producer.clone(), signal.clone())
                }
                FanoutOperation::Query { sql, decode } => self.query.project_stream(
                    project,
                    sql.clone(),
                    decode.clone(),
                    self.retry.clone(),
                    signal.clone(),
                ),
            })
            .collect();

        let mut completed = 0usize;
        stream::select_all(streams)
            .map(move |event| match event {
                ProjectEvent::Item { project, value } => StreamRecord {
                    endpoint: project,
                    data: Some(value),
                    error: None,
                    done: false,
                    metadata: StreamProgress {
                        completed,
                        total,
                        is_last: false,
                    },
                },
                ProjectEvent::Finished {
                    project,
                    result,
                    elapsed,
                } => {
                    completed += 1;
                    metrics().record_endpoint(project.as_str(), result.is_ok(), elapsed);
                    match &result {
                        Ok(()) => debug!(
                            correlation_id = %correlation_id,
                            project = %project,
                            elapsed_ms = elapsed.as_millis() as u64,
                            completed = completed,
                            total = total,
                            "Project finished"
                        ),
                        Err(e) => warn!(
                            correlation_id = %correlation_id,
                            project = %project,
                            error = %e,
                            completed = completed,
                            total = total,
                            "Project failed"
                        ),
                    }
                    StreamRecord {
                        endpoint: project,
                        data: None,
                        error: result.err(),
                        done: true,
                        metadata: StreamProgress {
                            completed,
                            total,
                            is_last: completed == total,
                        },
                    }
                }
            })
            .boxed()
    }

    /// Wait for every project and return one aggregated result
    pub async fn fetch<T: Send + 'static>(&self, request: FanoutRequest<T>, signal: AbortSignal) -> FanoutResult<T> {
        let mut result = FanoutResult {
            data: Vec::new(),
            errors: Vec::new(),
            metadata: FanoutMetadata {
                total_endpoints: request.endpoints.len(),
                ..FanoutMetadata::default()
            },
        };

        let mut records = self.stream(request, signal);
        while let Some(record) = records.next().await {
            if let Some(data) = record.data {
                result.data.push(EndpointData {
                    endpoint: record.endpoint.clone(),
                    data,
                });
            }
            if record.done {
                match record.error {
                    Some(error) => {
                        result.metadata.failed_endpoints += 1;
                        result.errors.push(EndpointError {
                            endpoint: record.endpoint,
                            error,
                        });
                    }
                    None => result.metadata.successful_endpoints += 1,
                }
            }
        }

        debug!(
            total = result.metadata.total_endpoints,
            succeeded = result.metadata.successful_endpoints,
            failed = result.metadata.failed_endpoints,
            "Fan-out complete"
        );
        result
    }
}
