//! Integration tests for multi-project fan-out through the public API

use arcade_indexer::indexer::{
    AbortController, AbortSignal, Aggregator, CallbackTransport, ClientFactory, FanoutRequest, IndexerClient,
    IndexerError, IndexerResult, Page, ProducerContext, Produced, ProjectId, ProjectRegistry, Row, SqlTransport,
    TokenBalanceQuery, TokenQuery,
};
use arcade_indexer::marketplace::normalize::normalize_tokens;
use arcade_indexer::retry::RetryPolicy;
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct StaticClient {
    rows: Vec<Row>,
}

#[async_trait]
impl IndexerClient for StaticClient {
    async fn tokens(&self, _query: &TokenQuery) -> IndexerResult<Page<Row>> {
        Ok(Page {
            items: self.rows.clone(),
            next_cursor: None,
        })
    }

    async fn token_balances(&self, _query: &TokenBalanceQuery) -> IndexerResult<Page<Row>> {
        Ok(Page::default())
    }
}

/// Hands every project the same static client and logs releases
#[derive(Default)]
struct StaticFactory {
    rows: Vec<Row>,
    released: Mutex<Vec<ProjectId>>,
}

#[async_trait]
impl ClientFactory for StaticFactory {
    async fn connect(&self, _project: &ProjectId, _url: &str) -> IndexerResult<Arc<dyn IndexerClient>> {
        Ok(Arc::new(StaticClient { rows: self.rows.clone() }))
    }

    fn release(&self, project: &ProjectId, _client: Arc<dyn IndexerClient>) {
        self.released.lock().push(project.clone());
    }
}

fn token_rows(n: usize) -> Vec<Row> {
    (1..=n)
        .filter_map(|i| {
            json!({
                "contract_address": "0x1",
                "token_id": format!("{i:#x}"),
                "metadata": json!({"name": format!("Token {i}")}).to_string(),
            })
            .as_object()
            .cloned()
        })
        .collect()
}

fn no_retry() -> RetryPolicy {
    RetryPolicy::new(1, Duration::ZERO)
}

fn aggregator(registry: ProjectRegistry, factory: Arc<dyn ClientFactory>) -> Aggregator {
    Aggregator::new(
        CallbackTransport::new(registry.clone(), factory, no_retry()),
        SqlTransport::new(registry, reqwest::Client::new(), Duration::from_secs(2)),
        no_retry(),
    )
}

fn ids(names: &[&str]) -> Vec<ProjectId> {
    names.iter().map(|n| ProjectId::from(*n)).collect()
}

#[tokio::test]
async fn test_query_fanout_survives_unreachable_project() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/sql")
        .with_status(200)
        .with_body(json!({ "data": token_rows(3) }).to_string())
        .create_async()
        .await;

    // nothing listens on port 1
    let registry = ProjectRegistry::new([("arcade", server.url()), ("down", "http://127.0.0.1:1".to_string())]);
    let agg = aggregator(registry, Arc::new(StaticFactory::default()));

    let result = agg
        .fetch(
            FanoutRequest::query(ids(&["arcade", "down"]), "SELECT * FROM tokens"),
            AbortSignal::never(),
        )
        .await
        .map(|project, rows| normalize_tokens(project, &rows));

    let tokens: Vec<_> = result.values().flatten().collect();
    assert_eq!(tokens.len(), 3);
    assert!(tokens.iter().all(|t| t.project == ProjectId::from("arcade")));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].endpoint, ProjectId::from("down"));
    assert_eq!(result.metadata.total_endpoints, 2);
    assert_eq!(result.metadata.successful_endpoints, 1);
    assert_eq!(result.metadata.failed_endpoints, 1);
    assert!(result.is_partial());
}

#[tokio::test(start_paused = true)]
async fn test_callback_fanout_with_timed_out_project() {
    let factory = Arc::new(StaticFactory {
        rows: token_rows(3),
        ..StaticFactory::default()
    });
    let registry = ProjectRegistry::new([("arcade", "http://arcade"), ("slow", "http://slow")]);
    let agg = aggregator(registry, factory.clone());

    let producer = |ctx: ProducerContext| {
        Produced::once(async move {
            let budget = Duration::from_millis(50);
            let work = async {
                if ctx.project.as_str() == "slow" {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                ctx.client.tokens(&TokenQuery::default()).await
            };
            match tokio::time::timeout(budget, work).await {
                Ok(page) => page.map(|p| p.items),
                Err(_) => Err(IndexerError::Timeout {
                    project: ctx.project.clone(),
                    timeout_ms: budget.as_millis() as u64,
                }),
            }
        })
    };

    let result = agg
        .fetch(FanoutRequest::callback(ids(&["arcade", "slow"]), producer), AbortSignal::never())
        .await
        .map(|project, rows| normalize_tokens(project, &rows));

    assert_eq!(result.values().flatten().count(), 3);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].endpoint, ProjectId::from("slow"));
    assert!(matches!(result.errors[0].error, IndexerError::Timeout { .. }));
    assert_eq!(result.metadata.failed_endpoints, 1);

    let mut released = factory.released.lock().clone();
    released.sort();
    assert_eq!(released, ids(&["arcade", "slow"]));
}

#[tokio::test]
async fn test_stream_reports_progress_and_one_last_record() {
    let factory = Arc::new(StaticFactory {
        rows: token_rows(1),
        ..StaticFactory::default()
    });
    let registry = ProjectRegistry::new([("a", "http://a"), ("b", "http://b"), ("c", "http://c")]);
    let agg = aggregator(registry, factory);

    let producer = |ctx: ProducerContext| {
        Produced::many(futures::stream::iter(vec![
            Ok(vec![ctx.project.to_string()]),
            Ok(vec![ctx.project.to_string()]),
        ]))
    };

    let records: Vec<_> = agg
        .stream(FanoutRequest::callback(ids(&["a", "b", "c"]), producer), AbortSignal::never())
        .collect()
        .await;

    assert_eq!(records.iter().filter(|r| r.data.is_some()).count(), 6);
    assert_eq!(records.iter().filter(|r| r.done).count(), 3);
    assert_eq!(records.iter().filter(|r| r.metadata.is_last).count(), 1);
    let last = records.last().unwrap();
    assert!(last.metadata.is_last);
    assert_eq!(last.metadata.completed, 3);
    assert_eq!(last.metadata.total, 3);

    let completions: Vec<usize> = records.iter().filter(|r| r.done).map(|r| r.metadata.completed).collect();
    assert_eq!(completions, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_abort_before_start_fails_every_project() {
    let registry = ProjectRegistry::new([("a", "http://a"), ("b", "http://b")]);
    let agg = aggregator(registry, Arc::new(StaticFactory::default()));

    let controller = AbortController::new();
    controller.abort();

    let producer = |ctx: ProducerContext| {
        Produced::once(async move {
            ctx.signal.aborted().await;
            Ok(Vec::<Row>::new())
        })
    };
    let result = agg
        .fetch(FanoutRequest::callback(ids(&["a", "b"]), producer), controller.signal())
        .await;

    assert!(!result.any_succeeded());
    assert_eq!(result.errors.len(), 2);
    assert!(result
        .errors
        .iter()
        .all(|e| matches!(e.error, IndexerError::Cancelled { .. })));
}
