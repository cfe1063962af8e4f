//! Client handle with release-exactly-once semantics
//!
//! A [`ClientHandle`] hands its client back to the factory either explicitly
//! through [`ClientHandle::release`] or on drop. Drop covers every exit path:
//! producer success, producer error, panic unwinding, and a dropped
//! (cancelled) fan-out stream.

use std::sync::Arc;

use super::client::{ClientFactory, IndexerClient};
use super::registry::ProjectId;
use super::signal::AbortSignal;

pub struct ClientHandle {
    project: ProjectId,
    // None once released
    client: Option<Arc<dyn IndexerClient>>,
    factory: Arc<dyn ClientFactory>,
}

impl ClientHandle {
    pub fn new(project: ProjectId, client: Arc<dyn IndexerClient>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            project,
            client: Some(client),
            factory,
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    /// Shared client for producers; `None` only after release
    pub fn client(&self) -> Option<Arc<dyn IndexerClient>> {
        self.client.clone()
    }

    pub fn is_released(&self) -> bool {
        self.client.is_none()
    }

    /// Explicitly release the handle
    pub fn release(mut self) {
        self.release_internal();
    }

    fn release_internal(&mut self) {
        if let Some(client) = self.client.take() {
            self.factory.release(&self.project, client);
        }
    }

    pub(crate) fn context(&self, signal: AbortSignal) -> Option<ProducerContext> {
        self.client().map(|client| ProducerContext {
            project: self.project.clone(),
            client,
            signal,
        })
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        self.release_internal();
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("project", &self.project)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

/// What a producer receives for one project
#[derive(Clone)]
pub struct ProducerContext {
    pub project: ProjectId,
    pub client: Arc<dyn IndexerClient>,
    pub signal: AbortSignal,
}

impl std::fmt::Debug for ProducerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerContext")
            .field("project", &self.project)
            .field("aborted", &self.signal.is_aborted())
            .finish_non_exhaustive()
    }
}
