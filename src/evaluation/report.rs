/// Evaluation reporting.
///
/// Aggregates per-query metrics into one report per algorithm, prints single
/// and side-by-side tables, and saves JSON for cross-run comparison.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::QueryResult;
use crate::search::AlgorithmHint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmReport {
    pub algorithm: AlgorithmHint,
    pub timestamp: DateTime<Utc>,
    pub k: usize,
    pub total_queries: usize,
    pub ndcg_at_k: f64,
    pub recall_at_k: f64,
    pub hits_at_1: f64,
    pub mrr: f64,
    pub partial_count: usize,
    pub failed_count: usize,
    pub mean_latency_ms: u64,
    pub p95_latency_ms: u64,
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    if n == 0 { 0.0 } else { values.sum::<f64>() / n as f64 }
}

pub fn generate_report(algorithm: AlgorithmHint, k: usize, results: &[QueryResult]) -> AlgorithmReport {
    let n = results.len();
    let mut latencies: Vec<u64> = results.iter().map(|r| r.latency_ms).collect();

    let mean_latency_ms = if latencies.is_empty() {
        0
    } else {
        latencies.iter().sum::<u64>() / latencies.len() as u64
    };

    let p95_latency_ms = if latencies.is_empty() {
        0
    } else {
        latencies.sort_unstable();
        let idx = ((0.95 * latencies.len() as f64).ceil() as usize).saturating_sub(1);
        latencies[idx.min(latencies.len() - 1)]
    };

    AlgorithmReport {
        algorithm,
        timestamp: Utc::now(),
        k,
        total_queries: n,
        ndcg_at_k: mean(results.iter().map(|r| r.ndcg_at_k), n),
        recall_at_k: mean(results.iter().map(|r| r.recall_at_k), n),
        hits_at_1: mean(results.iter().map(|r| r.hits_at_1), n),
        mrr: mean(results.iter().map(|r| r.reciprocal_rank), n),
        partial_count: results.iter().filter(|r| r.partial).count(),
        failed_count: results.iter().filter(|r| r.error.is_some()).count(),
        mean_latency_ms,
        p95_latency_ms,
    }
}

/// Print a formatted report to stdout.
pub fn print_report(report: &AlgorithmReport) {
    println!("=== Evaluation Report: {} ===", report.algorithm);
    println!("Date: {}", report.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Queries: {}", report.total_queries);
    println!("  {:<12} {:.4}", format!("nDCG@{}:", report.k), report.ndcg_at_k);
    println!("  {:<12} {:.4}", format!("Recall@{}:", report.k), report.recall_at_k);
    println!("  {:<12} {:.4}", "Hits@1:", report.hits_at_1);
    println!("  {:<12} {:.4}", "MRR:", report.mrr);
    println!(
        "Partial responses: {} | Failed searches: {}",
        report.partial_count, report.failed_count
    );
    println!(
        "Latency: mean={}ms, p95={}ms",
        report.mean_latency_ms, report.p95_latency_ms
    );
}

/// Print a side-by-side comparison of multiple reports.
pub fn print_comparison(reports: &[AlgorithmReport]) {
    if reports.is_empty() {
        return;
    }

    println!("=== Algorithm Comparison ===");
    println!();

    let col_width = 10usize;
    let label_width = 14usize;

    let header: Vec<String> = reports
        .iter()
        .map(|r| format!("{:>col_width$}", r.algorithm.name(), col_width = col_width))
        .collect();
    println!("{:<label_width$}| {}", "Metric", header.join(" | "));

    let sep = format!(
        "{:-<label_width$}|-{}",
        "",
        vec![format!("{:-<col_width$}", "", col_width = col_width); reports.len()].join("-|-")
    );
    println!("{}", sep);

    let k = reports[0].k;
    let rows: [(String, fn(&AlgorithmReport) -> f64); 4] = [
        (format!("nDCG@{}", k), |r| r.ndcg_at_k),
        (format!("Recall@{}", k), |r| r.recall_at_k),
        ("Hits@1".to_string(), |r| r.hits_at_1),
        ("MRR".to_string(), |r| r.mrr),
    ];
    for (label, metric) in &rows {
        let values: Vec<String> = reports
            .iter()
            .map(|r| format!("{:>col_width$.4}", metric(r), col_width = col_width))
            .collect();
        println!("{:<label_width$}| {}", label, values.join(" | "));
    }

    println!("{}", sep);
    let latency: Vec<String> = reports
        .iter()
        .map(|r| format!("{:>col_width$}", format!("{}ms", r.p95_latency_ms), col_width = col_width))
        .collect();
    println!("{:<label_width$}| {}", "p95 latency", latency.join(" | "));
}

/// Save report as JSON to a file path.
pub fn save_report(report: &AlgorithmReport, path: &std::path::Path) -> Result<(), anyhow::Error> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Load a previously saved report from JSON.
pub fn load_report(path: &std::path::Path) -> Result<AlgorithmReport, anyhow::Error> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(ndcg: f64, rr: f64, partial: bool, latency_ms: u64) -> QueryResult {
        QueryResult {
            query_id: "q".to_string(),
            algorithm: AlgorithmHint::Fusion,
            ndcg_at_k: ndcg,
            recall_at_k: ndcg,
            hits_at_1: if rr == 1.0 { 1.0 } else { 0.0 },
            reciprocal_rank: rr,
            retrieved_count: 10,
            partial,
            latency_ms,
            error: None,
        }
    }

    #[test]
    fn test_report_averages_metrics() {
        let results = vec![
            result(1.0, 1.0, false, 10),
            result(0.5, 0.5, true, 30),
            result(0.0, 0.0, false, 20),
        ];
        let report = generate_report(AlgorithmHint::Fusion, 10, &results);
        assert_eq!(report.total_queries, 3);
        assert!((report.ndcg_at_k - 0.5).abs() < 1e-12);
        assert!((report.mrr - 0.5).abs() < 1e-12);
        assert!((report.hits_at_1 - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(report.partial_count, 1);
        assert_eq!(report.mean_latency_ms, 20);
        assert_eq!(report.p95_latency_ms, 30);
    }

    #[test]
    fn test_empty_report() {
        let report = generate_report(AlgorithmHint::Bm25, 10, &[]);
        assert_eq!(report.total_queries, 0);
        assert_eq!(report.ndcg_at_k, 0.0);
        assert_eq!(report.p95_latency_ms, 0);
    }

    #[test]
    fn test_save_and_load_report() {
        let path = std::env::temp_dir().join(format!("mosaic-report-{}.json", uuid::Uuid::new_v4()));
        let report = generate_report(AlgorithmHint::Dense, 5, &[result(0.25, 1.0, false, 3)]);
        save_report(&report, &path).unwrap();
        let loaded = load_report(&path).unwrap();
        assert_eq!(loaded.algorithm, AlgorithmHint::Dense);
        assert_eq!(loaded.k, 5);
        std::fs::remove_file(&path).ok();
    }
}
