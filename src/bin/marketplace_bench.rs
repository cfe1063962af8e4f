//! Marketplace Bench - read-client latency report
//!
//! Driven entirely by environment variables:
//!
//! - `BENCH_CONFIG` optional TOML deployment file (else `ARCADE_*` variables)
//! - `BENCH_MODE` `edge` or `full`, defaults to the configured mode
//! - `BENCH_PROJECT`, `BENCH_COLLECTION` (required), `BENCH_TOKEN_ID`
//! - `BENCH_ITERATIONS`, `BENCH_WARMUP`, `BENCH_TIMEOUT_MS`
//! - `BENCH_OUTPUT` (`bench-report.json`), `BENCH_SUMMARY` (`bench-summary.md`)
//! - `BENCH_BASE_REPORT` earlier report to compare against

use anyhow::{Context, Result};
use arcade_indexer::bench::{
    compare_reports, render_markdown, run_benchmark, BenchmarkConfig, BenchmarkReport, BenchmarkResult,
};
use arcade_indexer::config::IndexerConfig;
use arcade_indexer::indexer::ProjectId;
use arcade_indexer::marketplace::types::*;
use arcade_indexer::marketplace::{create_marketplace_client, ClientMode};
use arcade_indexer::observability::init_logging;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{key}={raw} is invalid: {e}")),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging(env_opt("BENCH_VERBOSE").is_some(), false)?;

    let config_path = env_opt("BENCH_CONFIG").map(PathBuf::from);
    let config = IndexerConfig::load(config_path.as_deref()).context("Failed to load indexer configuration")?;
    let mode = match env_opt("BENCH_MODE") {
        Some(raw) => ClientMode::from_str(&raw).map_err(anyhow::Error::msg)?,
        None => config.mode,
    };
    let client = create_marketplace_client(&config, mode).context("Failed to build marketplace client")?;

    let project = env_opt("BENCH_PROJECT")
        .map(ProjectId::from)
        .unwrap_or_else(|| config.default_project_id());
    let collection = env_opt("BENCH_COLLECTION").context("BENCH_COLLECTION is required")?;
    let token_id = env_opt("BENCH_TOKEN_ID");

    let bench = BenchmarkConfig {
        warmup: env_parse("BENCH_WARMUP", 2)?,
        iterations: env_parse("BENCH_ITERATIONS", 10)?,
        timeout: match env_parse::<u64>("BENCH_TIMEOUT_MS", 30_000)? {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        },
    };
    let output = PathBuf::from(env_opt("BENCH_OUTPUT").unwrap_or_else(|| "bench-report.json".to_string()));
    let summary = PathBuf::from(env_opt("BENCH_SUMMARY").unwrap_or_else(|| "bench-summary.md".to_string()));

    info!(project = %project, collection = %collection, mode = %mode, iterations = bench.iterations, "Benchmarking");

    let project = Some(project);
    let client = client.as_ref();
    let mut results: Vec<BenchmarkResult> = Vec::new();

    let options = &CollectionOptions {
        project: project.clone(),
        contract_address: collection.clone(),
    };
    results.push(
        run_benchmark("get_collection", &bench, move || async move {
            client.get_collection(options).await.into_result()
        })
        .await,
    );

    let options = &TokenListOptions {
        project: project.clone(),
        contract_address: collection.clone(),
        ..TokenListOptions::default()
    };
    results.push(
        run_benchmark("list_collection_tokens", &bench, move || async move {
            client.list_collection_tokens(options).await.into_result()
        })
        .await,
    );

    let options = &OrderOptions {
        project: project.clone(),
        collection: collection.clone(),
        ..OrderOptions::default()
    };
    results.push(
        run_benchmark("get_collection_orders", &bench, move || async move {
            client.get_collection_orders(options).await.into_result()
        })
        .await,
    );

    let options = &ListingOptions {
        project: project.clone(),
        collection: collection.clone(),
        verify_ownership: true,
        ..ListingOptions::default()
    };
    results.push(
        run_benchmark("list_collection_listings", &bench, move || async move {
            client.list_collection_listings(options).await.into_result()
        })
        .await,
    );

    let options = &FeeOptions {
        project: project.clone(),
    };
    results.push(
        run_benchmark("get_fees", &bench, move || async move {
            client.get_fees(options).await.into_result()
        })
        .await,
    );

    let options = &TraitOptions {
        projects: project.iter().cloned().collect(),
        collection: collection.clone(),
        ..TraitOptions::default()
    };
    results.push(
        run_benchmark("collection_traits", &bench, move || async move {
            client.collection_traits(options).await.into_result()
        })
        .await,
    );

    if let Some(token_id) = token_id {
        let options = &TokenDetailOptions {
            project: project.clone(),
            collection: collection.clone(),
            token_id,
            verify_ownership: true,
        };
        results.push(
            run_benchmark("get_token", &bench, move || async move {
            client.get_token(options).await.into_result()
        })
        .await,
        );
    }

    let project_name = project.map(|p| p.to_string()).unwrap_or_default();
    let report = BenchmarkReport::new(&project_name, &collection, bench, results);
    report
        .write_to(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    let comparison = match env_opt("BENCH_BASE_REPORT") {
        Some(path) => {
            let base = BenchmarkReport::read_from(&path).with_context(|| format!("Failed to read base report {path}"))?;
            Some(compare_reports(&base, &report))
        }
        None => None,
    };
    let markdown = render_markdown(&report, comparison.as_deref());
    std::fs::write(&summary, &markdown).with_context(|| format!("Failed to write {}", summary.display()))?;

    info!(
        report = %output.display(),
        summary = %summary.display(),
        failures = report.has_failures(),
        "Benchmark complete"
    );
    println!("{markdown}");
    Ok(())
}
