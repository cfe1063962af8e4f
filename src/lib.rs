//! Arcade Indexer - multi-project indexer fan-out and marketplace reads
//!
//! Layers, bottom up:
//!
//! - [`retry`]: bounded exponential backoff with jitter and cancellation
//! - [`indexer`]: project registry, callback and query transports, and the
//!   fan-out [`indexer::Aggregator`] with batch and streaming results
//! - [`filter`]: trait filter SQL builder, client-side matcher and trait
//!   count aggregation
//! - [`marketplace`]: the typed read client (collections, tokens, orders,
//!   listings with ownership verification, fees, royalties, traits)
//! - [`bench`]: latency benchmark harness and reports

pub mod bench;
pub mod config;
pub mod filter;
pub mod indexer;
pub mod marketplace;
pub mod metrics;
pub mod observability;
pub mod retry;

#[cfg(test)]
mod test_utils;

pub use config::{ConfigError, IndexerConfig};
pub use indexer::{Aggregator, FanoutRequest, FanoutResult, IndexerError, ProjectId};
pub use marketplace::{create_marketplace_client, ClientMode, DataResult, MarketplaceClient, MarketplaceError};
