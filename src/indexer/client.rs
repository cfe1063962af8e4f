//! Stateful indexer client protocol (token listing, balances)
//!
//! The method surface is treated as a black box beyond paginated
//! `{ items, next_cursor }` pages; rows come back untyped and are decoded by
//! the marketplace layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::errors::{IndexerError, IndexerResult};
use super::registry::ProjectId;
use super::Row;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub direction: PaginationDirection,
}

/// One page of rows; `next_cursor == None` marks the final page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenQuery {
    pub contract_addresses: Vec<String>,
    pub token_ids: Vec<String>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TokenBalanceQuery {
    pub contract_addresses: Vec<String>,
    pub account_addresses: Vec<String>,
    pub token_ids: Vec<String>,
    pub pagination: Pagination,
}

/// Client handle bound to one project's indexer
#[async_trait]
pub trait IndexerClient: Send + Sync {
    async fn tokens(&self, query: &TokenQuery) -> IndexerResult<Page<Row>>;

    async fn token_balances(&self, query: &TokenBalanceQuery) -> IndexerResult<Page<Row>>;
}

/// Builds and frees client handles
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, project: &ProjectId, url: &str) -> IndexerResult<Arc<dyn IndexerClient>>;

    /// Called exactly once per handle returned by `connect`
    fn release(&self, project: &ProjectId, client: Arc<dyn IndexerClient>);
}

/// JSON-over-HTTP implementation of the client protocol
pub struct HttpIndexerClient {
    project: ProjectId,
    base_url: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpIndexerClient {
    pub fn new(project: ProjectId, base_url: &str, http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            project,
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            timeout,
        }
    }

    async fn post_page<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> IndexerResult<Page<Row>> {
        let endpoint = format!("{}/{}", self.base_url, path);
        let timeout_ms = self.timeout.as_millis() as u64;

        let response = self
            .http
            .post(&endpoint)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| IndexerError::from_reqwest(e, &self.project, timeout_ms))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IndexerError::HttpStatus {
                project: self.project.clone(),
                endpoint,
                status: status.as_u16(),
            });
        }

        let page: Page<Row> = response
            .json()
            .await
            .map_err(|e| IndexerError::Protocol {
                project: self.project.clone(),
                message: format!("invalid page from {endpoint}: {e}"),
            })?;

        debug!(
            project = %self.project,
            path = path,
            items = page.items.len(),
            has_next = page.next_cursor.is_some(),
            "Fetched page"
        );
        Ok(page)
    }
}

#[async_trait]
impl IndexerClient for HttpIndexerClient {
    async fn tokens(&self, query: &TokenQuery) -> IndexerResult<Page<Row>> {
        self.post_page("tokens", query).await
    }

    async fn token_balances(&self, query: &TokenBalanceQuery) -> IndexerResult<Page<Row>> {
        self.post_page("token_balances", query).await
    }
}

/// Factory producing [`HttpIndexerClient`] handles over one shared connection pool
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpClientFactory {
    pub fn new(http: reqwest::Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl ClientFactory for HttpClientFactory {
    async fn connect(&self, project: &ProjectId, url: &str) -> IndexerResult<Arc<dyn IndexerClient>> {
        debug!(project = %project, url = url, "Opening indexer client");
        Ok(Arc::new(HttpIndexerClient::new(
            project.clone(),
            url,
            self.http.clone(),
            self.timeout,
        )))
    }

    fn release(&self, project: &ProjectId, client: Arc<dyn IndexerClient>) {
        debug!(project = %project, "Releasing indexer client");
        drop(client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_serializes_lowercase_direction() {
        let p = Pagination {
            limit: 10,
            cursor: None,
            direction: PaginationDirection::Backward,
        };
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["direction"], "backward");
        assert!(json.get("cursor").is_none());
    }

    #[test]
    fn test_page_tolerates_missing_fields() {
        let page: Page<Row> = serde_json::from_str("{}").unwrap();
        assert!(page.items.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_http_client_posts_tokens() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/tokens")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items":[{"token_id":"0x1"}],"next_cursor":"abc"}"#)
            .create_async()
            .await;

        let client = HttpIndexerClient::new(
            "p".into(),
            &server.url(),
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        let page = client.tokens(&TokenQuery::default()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_http_client_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token_balances")
            .with_status(500)
            .create_async()
            .await;

        let client = HttpIndexerClient::new(
            "p".into(),
            &server.url(),
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        let err = client
            .token_balances(&TokenBalanceQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexerError::HttpStatus { status: 500, .. }));
    }
}
