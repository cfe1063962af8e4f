//! Test Utilities Module
//!
//! In-memory indexer clients and a counting client factory for deterministic
//! fan-out and marketplace tests. Only compiled for tests.

#![cfg(test)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::indexer::{
    ClientFactory, IndexerClient, IndexerError, IndexerResult, Page, ProjectId, Row, TokenBalanceQuery,
    TokenQuery,
};
use crate::marketplace::coerce::normalize_token_id;

/// Build a row from a JSON object literal
pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("row() expects an object, got {other}"),
    }
}

/// Serves fixed token and balance rows with offset cursors
#[derive(Debug, Default, Clone)]
pub struct MockIndexerClient {
    pub tokens: Vec<Row>,
    pub balances: Vec<Row>,
    pub fail_with: Option<IndexerError>,
    /// Every balance page advertises this cursor, whatever was asked for
    pub repeat_cursor: Option<String>,
}

impl MockIndexerClient {
    pub fn with_tokens(tokens: Vec<Row>) -> Self {
        Self {
            tokens,
            ..Self::default()
        }
    }

    fn page(rows: Vec<Row>, limit: u32, cursor: Option<&str>) -> Page<Row> {
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let limit = if limit == 0 { rows.len().max(1) } else { limit as usize };
        let items: Vec<Row> = rows.iter().skip(offset).take(limit).cloned().collect();
        let next = offset + items.len();
        Page {
            next_cursor: (next < rows.len()).then(|| next.to_string()),
            items,
        }
    }
}

fn field_matches(row: &Row, field: &str, wanted: &[String]) -> bool {
    if wanted.is_empty() {
        return true;
    }
    // hex ids and addresses compare without padding or composite prefixes
    let value = normalize_token_id(row.get(field).and_then(Value::as_str).unwrap_or_default());
    wanted.iter().any(|w| normalize_token_id(w) == value)
}

#[async_trait]
impl IndexerClient for MockIndexerClient {
    async fn tokens(&self, query: &TokenQuery) -> IndexerResult<Page<Row>> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let rows = self
            .tokens
            .iter()
            .filter(|r| field_matches(r, "token_id", &query.token_ids))
            .cloned()
            .collect();
        Ok(Self::page(rows, query.pagination.limit, query.pagination.cursor.as_deref()))
    }

    async fn token_balances(&self, query: &TokenBalanceQuery) -> IndexerResult<Page<Row>> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let rows = self
            .balances
            .iter()
            .filter(|r| field_matches(r, "account_address", &query.account_addresses))
            .filter(|r| field_matches(r, "token_id", &query.token_ids))
            .cloned()
            .collect();
        let mut page = Self::page(rows, query.pagination.limit, query.pagination.cursor.as_deref());
        if let Some(cursor) = &self.repeat_cursor {
            page.next_cursor = Some(cursor.clone());
        }
        Ok(page)
    }
}

/// Factory that records every connect/release per project
#[derive(Default)]
pub struct CountingFactory {
    clients: Mutex<HashMap<ProjectId, Arc<MockIndexerClient>>>,
    failing: Mutex<HashSet<ProjectId>>,
    connects: Mutex<HashMap<ProjectId, usize>>,
    releases: Mutex<HashMap<ProjectId, usize>>,
}

impl CountingFactory {
    pub fn with_client(self, project: &str, client: MockIndexerClient) -> Self {
        self.clients.lock().insert(project.into(), Arc::new(client));
        self
    }

    pub fn failing_connect(self, project: &str) -> Self {
        self.failing.lock().insert(project.into());
        self
    }

    pub fn connected(&self, project: &str) -> usize {
        self.connects.lock().get(&ProjectId::from(project)).copied().unwrap_or(0)
    }

    pub fn released(&self, project: &str) -> usize {
        self.releases.lock().get(&ProjectId::from(project)).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ClientFactory for CountingFactory {
    async fn connect(&self, project: &ProjectId, _url: &str) -> IndexerResult<Arc<dyn IndexerClient>> {
        if self.failing.lock().contains(project) {
            return Err(IndexerError::Transport {
                project: project.clone(),
                message: "connection refused".to_string(),
            });
        }
        *self.connects.lock().entry(project.clone()).or_default() += 1;
        let client: Arc<dyn IndexerClient> = self
            .clients
            .lock()
            .get(project)
            .cloned()
            .unwrap_or_default();
        Ok(client)
    }

    fn release(&self, project: &ProjectId, _client: Arc<dyn IndexerClient>) {
        *self.releases.lock().entry(project.clone()).or_default() += 1;
    }
}
