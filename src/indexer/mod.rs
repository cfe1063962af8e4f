//! Per-project indexer access and fan-out aggregation
//!
//! - `registry`: project id → base URL
//! - `client` / `handle` / `callback`: stateful client protocol (callback mode)
//! - `query`: stateless `POST /sql` transport (query mode)
//! - `fanout`: concurrent dispatch over either transport, batch and streaming

pub mod callback;
pub mod client;
pub mod errors;
pub mod fanout;
pub mod handle;
pub mod query;
pub mod registry;
pub mod signal;

/// Untyped indexer row
pub type Row = serde_json::Map<String, serde_json::Value>;

pub use callback::{CallbackTransport, Produced, Producer};
pub use client::{
    ClientFactory, HttpClientFactory, HttpIndexerClient, IndexerClient, Page, Pagination, PaginationDirection,
    TokenBalanceQuery, TokenQuery,
};
pub use errors::{IndexerError, IndexerResult};
pub use fanout::{
    Aggregator, EndpointData, EndpointError, FanoutMetadata, FanoutOperation, FanoutRequest, FanoutResult,
    ProjectEvent, StreamProgress, StreamRecord,
};
pub use handle::{ClientHandle, ProducerContext};
pub use query::{extract_rows, RowDecoder, SqlTransport};
pub use registry::{ProjectId, ProjectRegistry};
pub use signal::{AbortController, AbortSignal};
