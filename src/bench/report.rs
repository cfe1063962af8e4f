//! Benchmark reports, base/head comparison and the Markdown summary

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

use super::{BenchmarkConfig, BenchmarkResult, BenchmarkStats};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    #[serde(flatten)]
    pub result: BenchmarkResult,
    /// Derived from `result.samples_ms` when the report is built
    pub stats: Option<BenchmarkStats>,
}

impl From<BenchmarkResult> for ReportEntry {
    fn from(result: BenchmarkResult) -> Self {
        let stats = result.stats();
        Self { result, stats }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub generated_at: String,
    pub project: String,
    pub collection: String,
    pub config: BenchmarkConfig,
    pub entries: Vec<ReportEntry>,
}

impl BenchmarkReport {
    pub fn new(project: &str, collection: &str, config: BenchmarkConfig, results: Vec<BenchmarkResult>) -> Self {
        Self {
            generated_at: Utc::now().to_rfc3339(),
            project: project.to_string(),
            collection: collection.to_string(),
            config,
            entries: results.into_iter().map(ReportEntry::from).collect(),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.result.name == name)
    }

    pub fn has_failures(&self) -> bool {
        self.entries.iter().any(|e| !e.result.succeeded())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn read_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }
}

/// One operation present in head, with its base counterpart if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
    pub name: String,
    pub base_p50_ms: Option<f64>,
    pub head_p50_ms: Option<f64>,
    pub p50_delta_pct: Option<f64>,
    pub base_p95_ms: Option<f64>,
    pub head_p95_ms: Option<f64>,
    pub p95_delta_pct: Option<f64>,
}

fn delta_pct(base: Option<f64>, head: Option<f64>) -> Option<f64> {
    match (base, head) {
        (Some(base), Some(head)) if base > 0.0 => Some((head - base) / base * 100.0),
        _ => None,
    }
}

/// Compare by operation name, in head order
pub fn compare_reports(base: &BenchmarkReport, head: &BenchmarkReport) -> Vec<BenchmarkComparison> {
    head.entries
        .iter()
        .map(|entry| {
            let base_stats = base.entry(&entry.result.name).and_then(|e| e.stats);
            let head_stats = entry.stats;
            let base_p50 = base_stats.map(|s| s.p50_ms);
            let head_p50 = head_stats.map(|s| s.p50_ms);
            let base_p95 = base_stats.map(|s| s.p95_ms);
            let head_p95 = head_stats.map(|s| s.p95_ms);
            BenchmarkComparison {
                name: entry.result.name.clone(),
                base_p50_ms: base_p50,
                head_p50_ms: head_p50,
                p50_delta_pct: delta_pct(base_p50, head_p50),
                base_p95_ms: base_p95,
                head_p95_ms: head_p95,
                p95_delta_pct: delta_pct(base_p95, head_p95),
            }
        })
        .collect()
}

fn ms(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
}

fn pct(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:+.1}%"))
}

pub fn render_markdown(head: &BenchmarkReport, comparison: Option<&[BenchmarkComparison]>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "## Marketplace benchmark\n");
    let _ = writeln!(
        out,
        "Project `{}`, collection `{}`, {} iterations after {} warm-up.\n",
        head.project, head.collection, head.config.iterations, head.config.warmup
    );

    let _ = writeln!(out, "| Operation | Samples | Failures | Min ms | Mean ms | p50 ms | p95 ms | Max ms |");
    let _ = writeln!(out, "|---|---:|---:|---:|---:|---:|---:|---:|");
    for entry in &head.entries {
        let stats = entry.stats;
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} | {} |",
            entry.result.name,
            entry.result.samples_ms.len(),
            entry.result.failures.len(),
            ms(stats.map(|s| s.min_ms)),
            ms(stats.map(|s| s.mean_ms)),
            ms(stats.map(|s| s.p50_ms)),
            ms(stats.map(|s| s.p95_ms)),
            ms(stats.map(|s| s.max_ms)),
        );
    }

    if let Some(rows) = comparison {
        let _ = writeln!(out, "\n### Base vs head\n");
        let _ = writeln!(out, "| Operation | Base p50 | Head p50 | Δ p50 | Base p95 | Head p95 | Δ p95 |");
        let _ = writeln!(out, "|---|---:|---:|---:|---:|---:|---:|");
        for row in rows {
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                row.name,
                ms(row.base_p50_ms),
                ms(row.head_p50_ms),
                pct(row.p50_delta_pct),
                ms(row.base_p95_ms),
                ms(row.head_p95_ms),
                pct(row.p95_delta_pct),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, samples: &[f64]) -> BenchmarkResult {
        BenchmarkResult {
            name: name.to_string(),
            samples_ms: samples.to_vec(),
            failures: Vec::new(),
        }
    }

    fn report(results: Vec<BenchmarkResult>) -> BenchmarkReport {
        BenchmarkReport::new("arcade", "0x1", BenchmarkConfig::default(), results)
    }

    #[test]
    fn test_compare_by_name() {
        let base = report(vec![result("get_collection", &[100.0]), result("get_fees", &[40.0])]);
        let head = report(vec![
            result("get_fees", &[50.0]),
            result("get_collection", &[80.0]),
            result("list_collection_tokens", &[10.0]),
        ]);

        let rows = compare_reports(&base, &head);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "get_fees");
        assert_eq!(rows[0].p50_delta_pct, Some(25.0));
        assert_eq!(rows[1].p50_delta_pct, Some(-20.0));
        assert_eq!(rows[2].base_p50_ms, None);
        assert_eq!(rows[2].p50_delta_pct, None);
    }

    #[test]
    fn test_json_report_carries_stats() {
        let head = report(vec![result("get_fees", &[10.0, 20.0, 30.0, 40.0, 50.0])]);
        let json = head.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["entries"][0]["name"], "get_fees");
        assert_eq!(value["entries"][0]["stats"]["p95Ms"], 50.0);

        let parsed = BenchmarkReport::from_json(&json).unwrap();
        assert_eq!(parsed, head);
    }

    #[test]
    fn test_markdown_table() {
        let base = report(vec![result("get_fees", &[40.0])]);
        let head = report(vec![result("get_fees", &[50.0]), result("get_token", &[])]);
        let rows = compare_reports(&base, &head);
        let md = render_markdown(&head, Some(&rows));

        assert!(md.contains("| get_fees | 1 | 0 | 50.0 | 50.0 | 50.0 | 50.0 | 50.0 |"));
        assert!(md.contains("| get_token | 0 | 0 | - | - | - | - | - |"));
        assert!(md.contains("| get_fees | 40.0 | 50.0 | +25.0% |"));
    }
}
