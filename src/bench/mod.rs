//! Latency benchmark harness for read-client operations
//!
//! Warm-up invocations are discarded; every measured invocation either adds a
//! wall-clock sample or, if it errors or overruns the per-invocation timeout,
//! a failure. Stats are always derived from the samples they describe.

pub mod report;

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use report::{compare_reports, render_markdown, BenchmarkComparison, BenchmarkReport};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub warmup: u32,
    pub iterations: u32,
    /// Invocations running longer than this are failures, not slow samples
    #[serde(default, with = "opt_millis")]
    pub timeout: Option<Duration>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            warmup: 2,
            iterations: 10,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Timeout,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkFailure {
    pub iteration: u32,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkStats {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub samples_ms: Vec<f64>,
    pub failures: Vec<BenchmarkFailure>,
}

impl BenchmarkResult {
    /// `None` when every measured invocation failed
    pub fn stats(&self) -> Option<BenchmarkStats> {
        compute_benchmark_stats(&self.samples_ms)
    }

    pub fn timeouts(&self) -> usize {
        self.failures.iter().filter(|f| f.kind == FailureKind::Timeout).count()
    }

    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Nearest-rank percentile over an ascending slice
fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub fn compute_benchmark_stats(samples_ms: &[f64]) -> Option<BenchmarkStats> {
    if samples_ms.is_empty() {
        return None;
    }

    let mut sorted = samples_ms.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    Some(BenchmarkStats {
        count: sorted.len(),
        min_ms: sorted[0],
        max_ms: sorted[sorted.len() - 1],
        mean_ms: sorted.iter().sum::<f64>() / sorted.len() as f64,
        p50_ms: nearest_rank(&sorted, 0.50),
        p95_ms: nearest_rank(&sorted, 0.95),
    })
}

enum Outcome<E> {
    Done(Duration),
    Failed(E),
    TimedOut,
}

async fn invoke<F, Fut, T, E>(op: &mut F, timeout: Option<Duration>) -> Outcome<E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, op()).await {
            Ok(result) => result,
            Err(_) => return Outcome::TimedOut,
        },
        None => op().await,
    };
    match result {
        Ok(_) => Outcome::Done(started.elapsed()),
        Err(e) => Outcome::Failed(e),
    }
}

pub async fn run_benchmark<F, Fut, T, E>(name: &str, config: &BenchmarkConfig, mut op: F) -> BenchmarkResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    for i in 0..config.warmup {
        match invoke(&mut op, config.timeout).await {
            Outcome::Done(_) => {}
            Outcome::Failed(e) => debug!(benchmark = name, warmup = i, error = %e, "Warm-up failed"),
            Outcome::TimedOut => debug!(benchmark = name, warmup = i, "Warm-up timed out"),
        }
    }

    let mut samples_ms = Vec::with_capacity(config.iterations as usize);
    let mut failures = Vec::new();
    for iteration in 0..config.iterations {
        match invoke(&mut op, config.timeout).await {
            Outcome::Done(elapsed) => samples_ms.push(elapsed.as_secs_f64() * 1000.0),
            Outcome::Failed(e) => failures.push(BenchmarkFailure {
                iteration,
                kind: FailureKind::Error,
                message: e.to_string(),
            }),
            Outcome::TimedOut => failures.push(BenchmarkFailure {
                iteration,
                kind: FailureKind::Timeout,
                message: format!("exceeded {:?}", config.timeout.unwrap_or_default()),
            }),
        }
    }

    if !failures.is_empty() {
        warn!(benchmark = name, failures = failures.len(), "Benchmark had failing invocations");
    }
    BenchmarkResult {
        name: name.to_string(),
        samples_ms,
        failures,
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_stats_nearest_rank() {
        let stats = compute_benchmark_stats(&[10.0, 20.0, 30.0, 40.0, 50.0]).unwrap();
        assert_eq!(stats.p50_ms, 30.0);
        assert_eq!(stats.p95_ms, 50.0);
        assert_eq!(stats.mean_ms, 30.0);
        assert_eq!(stats.min_ms, 10.0);
        assert_eq!(stats.max_ms, 50.0);
    }

    #[test]
    fn test_stats_ignore_sample_order() {
        let stats = compute_benchmark_stats(&[50.0, 10.0, 40.0, 30.0, 20.0]).unwrap();
        assert_eq!(stats.p50_ms, 30.0);
        assert_eq!(stats.min_ms, 10.0);
    }

    #[test]
    fn test_stats_empty_and_single() {
        assert!(compute_benchmark_stats(&[]).is_none());
        let stats = compute_benchmark_stats(&[7.5]).unwrap();
        assert_eq!(stats.p50_ms, 7.5);
        assert_eq!(stats.p95_ms, 7.5);
    }

    #[tokio::test]
    async fn test_warmup_is_discarded() {
        let calls = AtomicU32::new(0);
        let config = BenchmarkConfig {
            warmup: 3,
            iterations: 4,
            timeout: None,
        };
        let result = run_benchmark("noop", &config, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 7);
        assert_eq!(result.samples_ms.len(), 4);
        assert!(result.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure_not_a_sample() {
        let calls = AtomicU32::new(0);
        let config = BenchmarkConfig {
            warmup: 0,
            iterations: 3,
            timeout: Some(Duration::from_millis(100)),
        };
        let result = run_benchmark("sometimes-slow", &config, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, String>(())
            }
        })
        .await;

        assert_eq!(result.samples_ms.len(), 2);
        assert_eq!(result.timeouts(), 1);
        assert_eq!(result.failures[0].iteration, 1);
        assert!(result.samples_ms.iter().all(|ms| *ms < 100.0));
    }

    #[tokio::test]
    async fn test_errors_are_recorded() {
        let config = BenchmarkConfig {
            warmup: 1,
            iterations: 2,
            timeout: None,
        };
        let result = run_benchmark("broken", &config, || async { Err::<(), _>("boom") }).await;

        assert!(result.samples_ms.is_empty());
        assert!(result.stats().is_none());
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.failures[0].kind, FailureKind::Error);
        assert_eq!(result.failures[0].message, "boom");
    }
}
