use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use verdict_core::{MetricResult, TestCase};

use crate::exit_codes::{METRIC_FAILED, SUCCESS};

#[derive(Debug, Serialize)]
pub(crate) struct EvalReport {
    pub generated_at: DateTime<Utc>,
    pub verdict_version: &'static str,
    pub judge: Option<String>,
    pub summary: ReportSummary,
    pub rows: Vec<ReportRow>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub(crate) struct ReportSummary {
    pub cases: usize,
    pub passed_cases: usize,
    pub results: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    /// Mean score per metric name, error rows excluded.
    pub mean_scores: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReportRow {
    pub case_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub success: bool,
    pub results: Vec<MetricResult>,
}

impl EvalReport {
    pub fn new(cases: &[TestCase], rows: Vec<Vec<MetricResult>>, judge: Option<String>) -> Self {
        let rows: Vec<ReportRow> = cases
            .iter()
            .zip(rows)
            .map(|(tc, results)| ReportRow {
                case_id: tc.id.clone(),
                name: tc.name.clone(),
                success: results.iter().all(|r| r.success),
                results,
            })
            .collect();
        Self {
            generated_at: Utc::now(),
            verdict_version: env!("CARGO_PKG_VERSION"),
            judge,
            summary: summarize(&rows),
            rows,
        }
    }

    pub fn exit_code(&self) -> i32 {
        if self.summary.failed + self.summary.errored > 0 {
            METRIC_FAILED
        } else {
            SUCCESS
        }
    }

    pub fn write(&self, output: Option<&Path>) -> anyhow::Result<()> {
        let body = serde_json::to_string_pretty(self)?;
        match output {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                std::fs::write(path, body + "\n")
                    .with_context(|| format!("failed to write report {}", path.display()))?;
            }
            None => println!("{}", body),
        }
        Ok(())
    }

    /// One line per case: status, id, then `metric=score` pairs.
    pub fn summary_lines(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|row| {
                let status = if row.success { "PASS" } else { "FAIL" };
                let scores = row
                    .results
                    .iter()
                    .map(|r| match r.error_kind {
                        Some(kind) => format!("{}=error({})", r.metric, kind),
                        None if r.success => format!("{}={:.2}", r.metric, r.score),
                        None => format!("{}={:.2}!", r.metric, r.score),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{} {} {}", status, row.case_id, scores)
            })
            .collect()
    }
}

fn summarize(rows: &[ReportRow]) -> ReportSummary {
    let mut summary = ReportSummary {
        cases: rows.len(),
        ..Default::default()
    };
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();

    for row in rows {
        if row.success {
            summary.passed_cases += 1;
        }
        for r in &row.results {
            summary.results += 1;
            if r.is_error() {
                summary.errored += 1;
                continue;
            }
            if r.success {
                summary.passed += 1;
            } else {
                summary.failed += 1;
            }
            if let Some(cost) = r.cost {
                *summary.total_cost.get_or_insert(0.0) += cost;
            }
            let entry = sums.entry(r.metric.clone()).or_insert((0.0, 0));
            entry.0 += r.score;
            entry.1 += 1;
        }
    }
    summary.mean_scores = sums
        .into_iter()
        .map(|(name, (sum, n))| (name, sum / n as f64))
        .collect();
    summary
}
