//! Callback-mode transport: one client handle per project, driven by a producer
//!
//! A producer may resolve once or yield many values. Each project becomes a
//! stream of [`ProjectEvent`]s ending in exactly one `Finished` event; the
//! project's [`ClientHandle`] lives inside that stream's state, so it is
//! released when the stream finishes or is dropped mid-flight.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::client::ClientFactory;
use super::errors::{IndexerError, IndexerResult};
use super::fanout::ProjectEvent;
use super::handle::{ClientHandle, ProducerContext};
use super::registry::{ProjectId, ProjectRegistry};
use super::signal::AbortSignal;
use crate::retry::{with_retry_until, RetryError, RetryPolicy};

/// Output of one producer invocation
pub enum Produced<T> {
    Once(BoxFuture<'static, IndexerResult<T>>),
    Many(BoxStream<'static, IndexerResult<T>>),
}

impl<T: Send + 'static> Produced<T> {
    pub fn once<F>(fut: F) -> Self
    where
        F: Future<Output = IndexerResult<T>> + Send + 'static,
    {
        Produced::Once(fut.boxed())
    }

    pub fn many<S>(items: S) -> Self
    where
        S: Stream<Item = IndexerResult<T>> + Send + 'static,
    {
        Produced::Many(items.boxed())
    }

    fn into_stream(self) -> BoxStream<'static, IndexerResult<T>> {
        match self {
            Produced::Once(fut) => stream::once(fut).boxed(),
            Produced::Many(items) => items,
        }
    }
}

/// Caller-supplied work run against each project's client
pub trait Producer<T>: Send + Sync {
    fn produce(&self, ctx: ProducerContext) -> Produced<T>;
}

impl<T, F> Producer<T> for F
where
    F: Fn(ProducerContext) -> Produced<T> + Send + Sync,
{
    fn produce(&self, ctx: ProducerContext) -> Produced<T> {
        self(ctx)
    }
}

#[derive(Clone)]
pub struct CallbackTransport {
    registry: ProjectRegistry,
    factory: Arc<dyn ClientFactory>,
    connect_retry: RetryPolicy,
}

enum Phase<T> {
    Connect {
        producer: Arc<dyn Producer<T>>,
    },
    Running {
        // Dropped before `handle` so the producer never outlives its client
        items: BoxStream<'static, IndexerResult<T>>,
        handle: ClientHandle,
    },
    Done,
}

impl CallbackTransport {
    pub fn new(registry: ProjectRegistry, factory: Arc<dyn ClientFactory>, connect_retry: RetryPolicy) -> Self {
        Self {
            registry,
            factory,
            connect_retry,
        }
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    async fn open(&self, project: &ProjectId, signal: &AbortSignal) -> IndexerResult<ClientHandle> {
        let url = self.registry.resolve(project)?.to_string();
        let factory = self.factory.clone();

        let client = with_retry_until(&self.connect_retry, signal, |_| {
            let factory = factory.clone();
            let url = url.clone();
            async move {
                match factory.connect(project, &url).await {
                    Ok(client) => Ok(Ok(client)),
                    Err(e) if e.is_retryable() => Err(e),
                    Err(e) => Ok(Err(e)),
                }
            }
        })
        .await;

        match client {
            Ok(Ok(client)) => Ok(ClientHandle::new(project.clone(), client, self.factory.clone())),
            Ok(Err(e)) | Err(RetryError::Exhausted { last: e, .. }) => Err(e),
            Err(RetryError::Cancelled { .. }) => Err(IndexerError::Cancelled {
                project: project.clone(),
            }),
        }
    }

    /// Event stream for one project; yields zero or more `Item`s then one `Finished`
    pub fn project_stream<T: Send + 'static>(
        &self,
        project: ProjectId,
        producer: Arc<dyn Producer<T>>,
        signal: AbortSignal,
    ) -> BoxStream<'static, ProjectEvent<T>> {
        let transport = self.clone();
        let started = Instant::now();

        stream::unfold(Phase::Connect { producer }, move |phase| {
            let transport = transport.clone();
            let project = project.clone();
            let signal = signal.clone();
            async move {
                match phase {
                    Phase::Done => None,
                    Phase::Connect { producer } => {
                        let opened = tokio::select! {
                            biased;
                            _ = signal.aborted() => Err(IndexerError::Cancelled { project: project.clone() }),
                            opened = transport.open(&project, &signal) => opened,
                        };
                        match opened.map(|handle| (handle.context(signal.clone()), handle)) {
                            Ok((Some(ctx), handle)) => {
                                debug!(project = %project, "Client opened, starting producer");
                                let items = producer.produce(ctx).into_stream();
                                Some((None, Phase::Running { items, handle }))
                            }
                            Ok((None, _)) => Some((
                                Some(ProjectEvent::finished(
                                    project.clone(),
                                    Err(IndexerError::Usage("client handle released before use".to_string())),
                                    started,
                                )),
                                Phase::Done,
                            )),
                            Err(e) => Some((Some(ProjectEvent::finished(project, Err(e), started)), Phase::Done)),
                        }
                    }
                    Phase::Running { mut items, handle } => {
                        let next = tokio::select! {
                            biased;
                            _ = signal.aborted() => Err(IndexerError::Cancelled { project: project.clone() }),
                            next = items.next() => Ok(next),
                        };
                        match next {
                            Ok(Some(Ok(value))) => Some((
                                Some(ProjectEvent::Item {
                                    project,
                                    value,
                                }),
                                Phase::Running { items, handle },
                            )),
                            Ok(Some(Err(e))) => {
                                drop(items);
                                handle.release();
                                Some((Some(ProjectEvent::finished(project.clone(), Err(tag(e, &project)), started)), Phase::Done))
                            }
                            Ok(None) => {
                                drop(items);
                                handle.release();
                                Some((Some(ProjectEvent::finished(project, Ok(()), started)), Phase::Done))
                            }
                            Err(cancelled) => {
                                drop(items);
                                handle.release();
                                Some((Some(ProjectEvent::finished(project, Err(cancelled), started)), Phase::Done))
                            }
                        }
                    }
                }
            }
        })
        .filter_map(futures::future::ready)
        .boxed()
    }
}

/// Ensure a producer error names the project it came from
fn tag(err: IndexerError, project: &ProjectId) -> IndexerError {
    match err {
        IndexerError::Decode(message) | IndexerError::Usage(message) => IndexerError::Producer {
            project: project.clone(),
            message,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{row, CountingFactory, MockIndexerClient};
    use crate::indexer::TokenQuery;
    use serde_json::json;

    fn transport(factory: Arc<CountingFactory>) -> CallbackTransport {
        let registry = ProjectRegistry::new([("a", "https://a"), ("b", "https://b")]);
        CallbackTransport::new(registry, factory, RetryPolicy::new(1, std::time::Duration::ZERO))
    }

    async fn collect(stream: BoxStream<'static, ProjectEvent<usize>>) -> Vec<ProjectEvent<usize>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_once_producer_releases_handle() {
        let factory = Arc::new(CountingFactory::default().with_client(
            "a",
            MockIndexerClient::with_tokens(vec![row(json!({"token_id": "0x1"}))]),
        ));
        let producer: Arc<dyn Producer<usize>> = Arc::new(|ctx: ProducerContext| {
            Produced::once(async move {
                let page = ctx.client.tokens(&TokenQuery::default()).await?;
                Ok::<_, IndexerError>(page.items.len())
            })
        });

        let events = collect(transport(factory.clone()).project_stream("a".into(), producer, AbortSignal::never())).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ProjectEvent::Item { value: 1, .. }));
        assert!(matches!(events[1], ProjectEvent::Finished { result: Ok(()), .. }));
        assert_eq!(factory.connected("a"), 1);
        assert_eq!(factory.released("a"), 1);
    }

    #[tokio::test]
    async fn test_many_producer_preserves_yield_order() {
        let factory = Arc::new(CountingFactory::default());
        let producer: Arc<dyn Producer<usize>> =
            Arc::new(|_ctx: ProducerContext| Produced::many(stream::iter(vec![Ok(1), Ok(2), Ok(3)])));

        let events = collect(transport(factory.clone()).project_stream("a".into(), producer, AbortSignal::never())).await;
        let values: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ProjectEvent::Item { value, .. } => Some(*value),
                _ => None,
            })
            .collect();

        assert_eq!(values, vec![1, 2, 3]);
        assert_eq!(factory.released("a"), 1);
    }

    #[tokio::test]
    async fn test_producer_error_releases_and_tags_project() {
        let factory = Arc::new(CountingFactory::default());
        let producer: Arc<dyn Producer<usize>> = Arc::new(|_ctx: ProducerContext| {
            Produced::once(async { Err(IndexerError::Decode("bad row".to_string())) })
        });

        let events = collect(transport(factory.clone()).project_stream("b".into(), producer, AbortSignal::never())).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            ProjectEvent::Finished { result: Err(e), .. } => assert_eq!(e.project(), Some(&ProjectId::from("b"))),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(factory.released("b"), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_never_releases() {
        let factory = Arc::new(CountingFactory::default().failing_connect("a"));
        let producer: Arc<dyn Producer<usize>> =
            Arc::new(|_ctx: ProducerContext| Produced::once(async { Ok(1) }));

        let events = collect(transport(factory.clone()).project_stream("a".into(), producer, AbortSignal::never())).await;

        assert!(matches!(events[0], ProjectEvent::Finished { result: Err(IndexerError::Transport { .. }), .. }));
        assert_eq!(factory.released("a"), 0);
    }

    #[tokio::test]
    async fn test_dropping_stream_mid_flight_releases() {
        let factory = Arc::new(CountingFactory::default());
        let producer: Arc<dyn Producer<usize>> = Arc::new(|_ctx: ProducerContext| {
            Produced::many(stream::iter(vec![Ok(1)]).chain(stream::pending()))
        });

        let mut events = transport(factory.clone()).project_stream("a".into(), producer, AbortSignal::never());
        assert!(matches!(events.next().await, Some(ProjectEvent::Item { value: 1, .. })));
        assert_eq!(factory.released("a"), 0);
        drop(events);
        assert_eq!(factory.released("a"), 1);
    }
}
