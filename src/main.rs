//! Arcade Indexer - operator CLI
//!
//! Runs single read-client calls against a configured deployment and prints
//! the result as JSON, for manual inspection and debugging.

#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use arcade_indexer::config::IndexerConfig;
use arcade_indexer::filter::ActiveFilterSet;
use arcade_indexer::indexer::ProjectId;
use arcade_indexer::marketplace::types::*;
use arcade_indexer::marketplace::{create_marketplace_client, ClientMode};
use arcade_indexer::metrics::metrics;
use arcade_indexer::observability::init_logging;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML deployment file; `ARCADE_*` variables are used when omitted
    #[arg(short, long, env = "ARCADE_CONFIG")]
    config: Option<PathBuf>,

    /// Client runtime (edge or full); overrides the configured mode
    #[arg(short, long)]
    mode: Option<ClientMode>,

    /// Project to query; defaults to the configured default project
    #[arg(short, long)]
    project: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long)]
    json_logs: bool,

    /// Dump Prometheus metrics to stderr after the call
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Summary of one collection
    Collection {
        /// Collection contract address
        address: String,
    },

    /// Collections across all (or the given) projects
    Collections {
        /// Restrict to these projects
        #[arg(long = "in", value_delimiter = ',')]
        projects: Vec<String>,
    },

    /// One page of a collection's tokens
    Tokens {
        address: String,

        #[arg(long)]
        cursor: Option<String>,

        #[arg(short, long)]
        limit: Option<u32>,

        /// Attribute filter, repeatable: `--filter Background=Red`
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },

    /// One token with its orders and live listings
    Token {
        address: String,
        token_id: String,

        /// Skip the ownership re-check of listings
        #[arg(long)]
        no_verify: bool,
    },

    /// Live sell orders of a collection
    Listings {
        address: String,

        #[arg(long)]
        token_id: Option<String>,

        /// Skip the ownership re-check
        #[arg(long)]
        no_verify: bool,
    },

    /// Raw orders of a collection
    Orders {
        address: String,

        #[arg(long)]
        token_id: Option<String>,

        #[arg(short, long)]
        limit: Option<u32>,
    },

    /// Marketplace fee configuration
    Fees,

    /// Trait counts and the derived filter table
    Traits {
        address: String,

        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TRAIT=VALUE, got '{raw}'"))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to encode result")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json_logs)?;

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting arcade-indexer");
    let config = IndexerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let mode = args.mode.unwrap_or(config.mode);
    let client = create_marketplace_client(&config, mode).context("Failed to build marketplace client")?;
    let project = args.project.map(ProjectId::from);

    match args.command {
        Commands::Collection { address } => {
            let options = CollectionOptions {
                project,
                contract_address: address,
            };
            print_json(&client.get_collection(&options).await)?;
        }
        Commands::Collections { projects } => {
            let projects: Vec<ProjectId> = if projects.is_empty() {
                config.project_ids()
            } else {
                projects.into_iter().map(ProjectId::from).collect()
            };
            let result = client.list_collections(&projects).await;
            info!(
                succeeded = result.metadata.successful_endpoints,
                failed = result.metadata.failed_endpoints,
                "Collections fetched"
            );
            print_json(&result)?;
        }
        Commands::Tokens {
            address,
            cursor,
            limit,
            filters,
        } => {
            let options = TokenListOptions {
                project,
                contract_address: address,
                cursor,
                limit,
                attribute_filters: filters.into_iter().collect::<ActiveFilterSet>(),
                token_ids: Vec::new(),
            };
            print_json(&client.list_collection_tokens(&options).await)?;
        }
        Commands::Token {
            address,
            token_id,
            no_verify,
        } => {
            let options = TokenDetailOptions {
                project,
                collection: address,
                token_id,
                verify_ownership: !no_verify,
            };
            print_json(&client.get_token(&options).await)?;
        }
        Commands::Listings {
            address,
            token_id,
            no_verify,
        } => {
            let options = ListingOptions {
                project,
                collection: address,
                token_id,
                verify_ownership: !no_verify,
                limit: None,
            };
            print_json(&client.list_collection_listings(&options).await)?;
        }
        Commands::Orders {
            address,
            token_id,
            limit,
        } => {
            let options = OrderOptions {
                project,
                collection: address,
                token_id,
                limit,
                ..OrderOptions::default()
            };
            print_json(&client.get_collection_orders(&options).await)?;
        }
        Commands::Fees => {
            print_json(&client.get_fees(&FeeOptions { project }).await)?;
        }
        Commands::Traits { address, filters } => {
            let options = TraitOptions {
                projects: project.into_iter().collect(),
                collection: address,
                filters: filters.into_iter().collect(),
            };
            print_json(&client.collection_traits(&options).await)?;
        }
    }

    if args.metrics {
        eprintln!("{}", metrics().encode_text().context("Failed to encode metrics")?);
    }
    Ok(())
}
