//! Results document and its human-readable rendering.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pass,
    /// The artifact was not visible yet; acceptable on a first run
    #[serde(rename = "expected_404")]
    Expected404,
    Fail,
    Error,
    Skipped,
}

impl TestStatus {
    pub fn is_passing(self) -> bool {
        matches!(self, Self::Pass | Self::Expected404)
    }

    pub fn is_failing(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Expected404 => "EXPECTED_404",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
            Self::Skipped => "SKIPPED",
        }
    }
}

/// `POST /ingest` check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerResult {
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub efs_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `POST /predict` check against the freshly ingested artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerResult {
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConsumerResult {
    pub fn with_status(status: TestStatus) -> Self {
        Self {
            status,
            duration_ms: None,
            status_code: None,
            file_id: None,
            result: None,
            note: None,
            error: None,
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self {
            note: Some(reason.to_string()),
            ..Self::with_status(TestStatus::Skipped)
        }
    }
}

/// Two sequential calls against the same fresh key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdWarmResult {
    pub cold_start_ms: u64,
    pub warm_invocation_ms: u64,
    pub improvement_ms: i64,
    pub improvement_percent: f64,
    pub cold_status_code: u16,
    pub warm_status_code: u16,
}

impl ColdWarmResult {
    pub fn new(cold: (u64, u16), warm: (u64, u16)) -> Self {
        let improvement_ms = cold.0 as i64 - warm.0 as i64;
        let improvement_percent = if cold.0 > 0 {
            round2(improvement_ms as f64 / cold.0 as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            cold_start_ms: cold.0,
            warm_invocation_ms: warm.0,
            improvement_ms,
            improvement_percent,
            cold_status_code: cold.1,
            warm_status_code: warm.1,
        }
    }
}

/// One call of the concurrency test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    pub invocation_id: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Parallel calls against one fresh key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrentResult {
    pub invocations: usize,
    pub successful: usize,
    pub failed: usize,
    pub all_succeeded: bool,
    /// Both "not found" and server errors were observed for the same key
    pub mixed_outcomes: bool,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub min_duration_ms: u64,
    pub total_duration_ms: u64,
    pub details: Vec<Invocation>,
}

impl ConcurrentResult {
    pub fn from_invocations(mut details: Vec<Invocation>, total_duration_ms: u64) -> Self {
        details.sort_by_key(|invocation| invocation.invocation_id);

        let successful = details.iter().filter(|i| i.success).count();
        let durations: Vec<u64> = details
            .iter()
            .filter(|i| i.success)
            .filter_map(|i| i.duration_ms)
            .collect();
        let avg_duration_ms = match durations.len() {
            0 => 0,
            n => durations.iter().sum::<u64>() / n as u64,
        };

        let saw_not_found = details.iter().any(|i| i.status_code == Some(404));
        let saw_server_error = details
            .iter()
            .any(|i| matches!(i.status_code, Some(code) if code >= 500));

        Self {
            invocations: details.len(),
            successful,
            failed: details.len() - successful,
            all_succeeded: successful == details.len(),
            mixed_outcomes: saw_not_found && saw_server_error,
            avg_duration_ms,
            max_duration_ms: durations.iter().copied().max().unwrap_or(0),
            min_duration_ms: durations.iter().copied().min().unwrap_or(0),
            total_duration_ms,
            details,
        }
    }

    pub fn status(&self) -> TestStatus {
        if self.all_succeeded && !self.mixed_outcomes {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        }
    }
}

/// All checks of a run; absent entries did not execute
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_api: Option<ProducerResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_api: Option<ConsumerResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold_vs_warm: Option<ColdWarmResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_access: Option<ConcurrentResult>,
}

impl TestResults {
    fn statuses(&self) -> Vec<TestStatus> {
        let mut statuses = Vec::new();
        if let Some(producer) = &self.producer_api {
            statuses.push(producer.status);
        }
        if let Some(consumer) = &self.consumer_api {
            statuses.push(consumer.status);
        }
        if self.cold_vs_warm.is_some() {
            statuses.push(TestStatus::Pass);
        }
        if let Some(concurrent) = &self.concurrent_access {
            statuses.push(concurrent.status());
        }
        statuses
    }
}

/// A stage that could not complete
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub stage: String,
    pub error: String,
    pub timestamp: String,
}

impl StageError {
    pub fn new(stage: &str, error: impl ToString) -> Self {
        Self {
            stage: stage.to_string(),
            error: error.to_string(),
            timestamp: now(),
        }
    }
}

/// Headline numbers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Summary {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub total_errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold_start_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warm_invocation_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold_warm_improvement_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_invocations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_success_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_avg_duration_ms: Option<u64>,
}

/// Endpoints a run was pointed at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub ingest_url: String,
    pub process_url: String,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub timestamp: String,
    pub configuration: Configuration,
    pub tests: TestResults,
    pub errors: Vec<StageError>,
    #[serde(default)]
    pub summary: Summary,
}

impl RunResults {
    pub fn new(configuration: Configuration) -> Self {
        Self {
            timestamp: now(),
            configuration,
            tests: TestResults::default(),
            errors: Vec::new(),
            summary: Summary::default(),
        }
    }

    /// Recompute the summary from the recorded tests and errors
    pub fn summarize(&mut self) {
        let statuses = self.tests.statuses();
        let tests = &self.tests;

        self.summary = Summary {
            total_tests: statuses.len(),
            passed_tests: statuses.iter().filter(|s| s.is_passing()).count(),
            failed_tests: statuses.iter().filter(|s| s.is_failing()).count(),
            total_errors: self.errors.len(),
            producer_duration_ms: tests.producer_api.as_ref().and_then(|r| r.duration_ms),
            consumer_duration_ms: tests.consumer_api.as_ref().and_then(|r| r.duration_ms),
            cold_start_ms: tests.cold_vs_warm.as_ref().map(|r| r.cold_start_ms),
            warm_invocation_ms: tests.cold_vs_warm.as_ref().map(|r| r.warm_invocation_ms),
            cold_warm_improvement_percent: tests
                .cold_vs_warm
                .as_ref()
                .map(|r| r.improvement_percent),
            concurrent_invocations: tests.concurrent_access.as_ref().map(|r| r.invocations),
            concurrent_success_rate: tests.concurrent_access.as_ref().map(|r| {
                round2(r.successful as f64 / r.invocations.max(1) as f64 * 100.0)
            }),
            concurrent_avg_duration_ms: tests
                .concurrent_access
                .as_ref()
                .map(|r| r.avg_duration_ms),
        };
    }

    /// A run succeeds when no stage errored and no check failed
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty() && self.tests.statuses().iter().all(|s| !s.is_failing())
    }

    /// Render the summary text
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let rule = "-".repeat(40);

        // Writing into a String cannot fail
        let _ = writeln!(out, "Artifact Pipeline Verification Results");
        let _ = writeln!(out, "Generated: {}", self.timestamp);
        let _ = writeln!(out);

        let _ = writeln!(out, "CONFIGURATION\n{rule}");
        let _ = writeln!(out, "Ingest URL: {}", self.configuration.ingest_url);
        let _ = writeln!(out, "Process URL: {}", self.configuration.process_url);
        let _ = writeln!(out);

        let summary = &self.summary;
        let _ = writeln!(out, "SUMMARY\n{rule}");
        let _ = writeln!(out, "Total Tests: {}", summary.total_tests);
        let _ = writeln!(out, "Passed: {}", summary.passed_tests);
        let _ = writeln!(out, "Failed: {}", summary.failed_tests);
        let _ = writeln!(out, "Errors: {}", summary.total_errors);
        let _ = writeln!(out);

        if let Some(producer) = &self.tests.producer_api {
            let _ = writeln!(out, "PRODUCER API TEST\n{rule}");
            let _ = writeln!(out, "Status: {}", producer.status.label());
            let _ = writeln!(out, "Duration: {}", ms(producer.duration_ms));
            let _ = writeln!(out, "File ID: {}", producer.file_id.as_deref().unwrap_or("N/A"));
            let _ = writeln!(out);
        }

        if let Some(consumer) = &self.tests.consumer_api {
            let _ = writeln!(out, "CONSUMER API TEST\n{rule}");
            let _ = writeln!(out, "Status: {}", consumer.status.label());
            let _ = writeln!(out, "Duration: {}", ms(consumer.duration_ms));
            let _ = writeln!(out);
        }

        if let Some(timing) = &self.tests.cold_vs_warm {
            let _ = writeln!(out, "COLD START VS WARM INVOCATION\n{rule}");
            let _ = writeln!(out, "Cold Start: {}ms", timing.cold_start_ms);
            let _ = writeln!(out, "Warm Invocation: {}ms", timing.warm_invocation_ms);
            let _ = writeln!(
                out,
                "Improvement: {}ms ({}%)",
                timing.improvement_ms, timing.improvement_percent
            );
            let _ = writeln!(out);
        }

        if let Some(concurrent) = &self.tests.concurrent_access {
            let _ = writeln!(out, "CONCURRENT ACCESS TEST\n{rule}");
            let _ = writeln!(out, "Total Invocations: {}", concurrent.invocations);
            let _ = writeln!(out, "Successful: {}", concurrent.successful);
            let _ = writeln!(out, "Failed: {}", concurrent.failed);
            let _ = writeln!(out, "Mixed Outcomes: {}", concurrent.mixed_outcomes);
            let _ = writeln!(out, "Average Duration: {}ms", concurrent.avg_duration_ms);
            let _ = writeln!(out, "Min Duration: {}ms", concurrent.min_duration_ms);
            let _ = writeln!(out, "Max Duration: {}ms", concurrent.max_duration_ms);
            let _ = writeln!(out);
        }

        if !self.errors.is_empty() {
            let _ = writeln!(out, "ERRORS\n{rule}");
            for error in &self.errors {
                let _ = writeln!(out, "Stage: {}", error.stage);
                let _ = writeln!(out, "Error: {}", error.error);
                let _ = writeln!(out, "Time: {}", error.timestamp);
                let _ = writeln!(out);
            }
        }

        out
    }

    /// Write the JSON document and the summary text
    pub async fn write(&self, output: &Path, summary: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to encode results")?;
        tokio::fs::write(output, json)
            .await
            .with_context(|| format!("Failed to write results to {}", output.display()))?;
        tokio::fs::write(summary, self.render_text())
            .await
            .with_context(|| format!("Failed to write summary to {}", summary.display()))?;
        Ok(())
    }
}

/// UTC timestamp with millisecond precision
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn ms(value: Option<u64>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| format!("{v}ms"))
}
