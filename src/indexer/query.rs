//! Query-mode transport: `POST {base}/sql` with a raw query string
//!
//! Stateless and single-shot. Retries are layered on by the caller.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::errors::{IndexerError, IndexerResult};
use super::fanout::ProjectEvent;
use super::registry::{ProjectId, ProjectRegistry};
use super::signal::AbortSignal;
use super::Row;
use crate::retry::{with_retry_until, RetryError, RetryPolicy};

/// Field names that may wrap the row array, tried in order
pub const ROW_FIELDS: [&str; 3] = ["data", "rows", "result"];

pub type RowDecoder<T> = Arc<dyn Fn(Vec<Row>) -> IndexerResult<T> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SqlTransport {
    registry: ProjectRegistry,
    http: reqwest::Client,
    timeout: Duration,
}

impl SqlTransport {
    pub fn new(registry: ProjectRegistry, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            registry,
            http,
            timeout,
        }
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    /// Post `sql` to one project and return its rows
    pub async fn query(&self, project: &ProjectId, sql: &str) -> IndexerResult<Vec<Row>> {
        let base = self.registry.resolve(project)?;
        let endpoint = format!("{base}/sql");
        let timeout_ms = self.timeout.as_millis() as u64;
        let started = Instant::now();

        let response = self
            .http
            .post(&endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| IndexerError::from_reqwest(e, project, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            warn!(project = %project, endpoint = %endpoint, status = status.as_u16(), "Query rejected");
            return Err(IndexerError::HttpStatus {
                project: project.clone(),
                endpoint,
                status: status.as_u16(),
            });
        }

        let body: Value = response.json().await.map_err(|e| IndexerError::Protocol {
            project: project.clone(),
            message: format!("response from {endpoint} is not JSON: {e}"),
        })?;

        let rows = extract_rows(body);
        debug!(
            project = %project,
            rows = rows.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Query completed"
        );
        Ok(rows)
    }

    /// [`query`](Self::query) raced against `signal`, retrying retryable
    /// failures under `policy`
    pub async fn query_until(
        &self,
        project: &ProjectId,
        sql: &str,
        policy: &RetryPolicy,
        signal: &AbortSignal,
    ) -> IndexerResult<Vec<Row>> {
        let attempts = with_retry_until(policy, signal, |_| async move {
            tokio::select! {
                biased;
                _ = signal.aborted() => Ok(Err(IndexerError::Cancelled { project: project.clone() })),
                rows = self.query(project, sql) => match rows {
                    Ok(rows) => Ok(Ok(rows)),
                    Err(e) if e.is_retryable() => Err(e),
                    Err(e) => Ok(Err(e)),
                },
            }
        })
        .await;

        match attempts {
            Ok(result) => result,
            Err(RetryError::Exhausted { last, .. }) => Err(last),
            Err(RetryError::Cancelled { .. }) => Err(IndexerError::Cancelled {
                project: project.clone(),
            }),
        }
    }

    /// Single-shot event stream for one project
    pub fn project_stream<T: Send + 'static>(
        &self,
        project: ProjectId,
        sql: Arc<str>,
        decode: RowDecoder<T>,
        policy: RetryPolicy,
        signal: AbortSignal,
    ) -> BoxStream<'static, ProjectEvent<T>> {
        let transport = self.clone();
        stream::once(async move {
            let started = Instant::now();
            let result = transport
                .query_until(&project, &sql, &policy, &signal)
                .await
                .and_then(|rows| decode(rows));
            match result {
                Ok(value) => vec![
                    ProjectEvent::Item {
                        project: project.clone(),
                        value,
                    },
                    ProjectEvent::finished(project, Ok(()), started),
                ],
                Err(e) => vec![ProjectEvent::finished(project, Err(e), started)],
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }
}

/// Pull the row array out of a response body.
///
/// Accepts a bare array or an object wrapping the array under one of
/// [`ROW_FIELDS`]; anything else yields no rows. Non-object array entries
/// are skipped.
pub fn extract_rows(body: Value) -> Vec<Row> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let found = ROW_FIELDS
                .iter()
                .find(|field| matches!(map.get(**field), Some(Value::Array(_))))
                .and_then(|field| map.remove(*field));
            match found {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(row) => Some(row),
            _ => None,
        })
        .collect()
}
