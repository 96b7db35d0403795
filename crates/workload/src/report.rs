//! Results reporting and formatting.

use std::collections::BTreeMap;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use serde::{Deserialize, Serialize};

use crate::events::WorkloadEvent;
use crate::stats::Summary;

/// Outcome of one workload run as seen by the event consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub timestamp: String,
    pub scenario_name: String,
    pub duration_secs: f64,
    pub max_per_minute: u32,
    pub visits: u64,
    pub errors: u64,
    /// Visits per HTTP status code.
    pub status_counts: BTreeMap<u16, u64>,
    pub summary: Summary,
}

impl RunResults {
    pub fn new(scenario_name: impl Into<String>, max_per_minute: u32) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            scenario_name: scenario_name.into(),
            duration_secs: 0.0,
            max_per_minute,
            visits: 0,
            errors: 0,
            status_counts: BTreeMap::new(),
            summary: Summary::default(),
        }
    }

    /// Count one event.
    pub fn observe(&mut self, event: &WorkloadEvent) {
        match event {
            WorkloadEvent::Visit(visit) => {
                self.visits += 1;
                *self.status_counts.entry(visit.response.status).or_default() += 1;
            }
            WorkloadEvent::Error(_) => self.errors += 1,
        }
    }

    pub fn requests_per_minute(&self) -> f64 {
        if self.duration_secs > 0.0 {
            (self.visits + self.errors) as f64 * 60.0 / self.duration_secs
        } else {
            0.0
        }
    }
}

fn ms(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}", v))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Formats run results for output.
pub struct ResultsReport;

impl ResultsReport {
    /// Format results as a console table.
    pub fn format_table(results: &RunResults) -> String {
        let summary = &results.summary;
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![format!("Workload Results: {}", results.scenario_name)]);

        table.add_row(vec!["Duration:", &format!("{:.1}s", results.duration_secs)]);
        table.add_row(vec![
            "Target Rate:",
            &format!("{} req/min", results.max_per_minute),
        ]);
        table.add_row(vec![
            "Actual Rate:",
            &format!("{:.1} req/min", results.requests_per_minute()),
        ]);
        table.add_row(vec!["Visits:", &results.visits.to_string()]);
        table.add_row(vec!["Errors:", &results.errors.to_string()]);
        if !results.status_counts.is_empty() {
            let statuses = results
                .status_counts
                .iter()
                .map(|(status, count)| format!("{}: {}", status, count))
                .collect::<Vec<_>>()
                .join(", ");
            table.add_row(vec!["Status Codes:", &statuses]);
        }

        table.add_row(vec!["", ""]);
        table.add_row(vec!["Response Time (ms)", "avg / p50 / p90 / p99 / max"]);
        table.add_row(vec![
            "",
            &format!(
                "{} / {} / {} / {} / {}",
                ms(summary.avg_response_time),
                ms(summary.p50),
                ms(summary.p90),
                ms(summary.p99),
                ms(summary.max_response_time)
            ),
        ]);

        table.to_string()
    }

    /// Format results as JSON.
    pub fn format_json(results: &RunResults) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(results)?)
    }

    /// Format results as CSV row.
    pub fn format_csv(results: &RunResults) -> String {
        format!(
            "{},{},{:.1},{},{},{},{}",
            results.timestamp,
            results.scenario_name,
            results.duration_secs,
            results.visits,
            results.errors,
            ms(results.summary.avg_response_time),
            ms(results.summary.p99),
        )
    }

    /// CSV header row.
    pub fn csv_header() -> &'static str {
        "timestamp,scenario,duration,visits,errors,avg_ms,p99_ms"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::events::{Visit, VisitError};
    use crate::template::{Headers, OutboundRequest};
    use crate::transport::ResponseMeta;
    use bytes::Bytes;

    fn request() -> OutboundRequest {
        OutboundRequest {
            method: "GET".to_string(),
            url: "http://a.test/".to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    fn visit(status: u16) -> WorkloadEvent {
        WorkloadEvent::Visit(Visit {
            request: request(),
            response: ResponseMeta {
                status,
                headers: Headers::new(),
            },
            body: Bytes::new(),
        })
    }

    #[test]
    fn test_observe_counts_events() {
        let mut results = RunResults::new("demo", 60);
        results.observe(&visit(200));
        results.observe(&visit(200));
        results.observe(&visit(503));
        results.observe(&WorkloadEvent::Error(VisitError {
            request: request(),
            error: TransportError::Timeout,
        }));

        assert_eq!(results.visits, 3);
        assert_eq!(results.errors, 1);
        assert_eq!(results.status_counts[&200], 2);
        assert_eq!(results.status_counts[&503], 1);

        results.duration_secs = 60.0;
        assert_eq!(results.requests_per_minute(), 4.0);
    }

    #[test]
    fn test_table_without_samples() {
        let results = RunResults::new("empty", 12);
        let table = ResultsReport::format_table(&results);
        assert!(table.contains("Workload Results: empty"));
        assert!(table.contains("n/a"));
    }

    #[test]
    fn test_json_and_csv() {
        let mut results = RunResults::new("demo", 60);
        results.summary.avg_response_time = Some(12.5);

        let json = ResultsReport::format_json(&results).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["avg_response_time"], 12.5);

        let row = ResultsReport::format_csv(&results);
        assert_eq!(
            row.split(',').count(),
            ResultsReport::csv_header().split(',').count()
        );
        assert!(row.contains(",12.5,"));
    }
}
