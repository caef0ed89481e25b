//! Run reports for CI artifacts.
//!
//! A report summarizes one lockstep run: how far the replicas got, what the
//! commands did and the digest they converged on.

use anyhow::{Context, Result};
use chrono::Utc;
use colonysync_sim::StepReport;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Overall result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestResult {
    /// Every check passed.
    Pass,
    /// Something failed.
    Fail,
    /// Not run.
    Skip,
}

/// Summary of one lockstep run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Test identifier.
    pub test_name: String,
    /// When the report was built (RFC 3339).
    pub timestamp: String,
    /// Overall result.
    pub result: TestResult,
    /// Replicas that took part.
    pub replicas: usize,
    /// World clock at the end of the run.
    pub final_tick: u64,
    /// Command results of one replica.
    pub commands: StepReport,
    /// Converged state digest.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Builder for [`RunReport`].
pub struct RunReportBuilder {
    report: RunReport,
}

impl RunReportBuilder {
    /// Start a passing report stamped with the current time.
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            report: RunReport {
                test_name: test_name.into(),
                timestamp: Utc::now().to_rfc3339(),
                result: TestResult::Pass,
                replicas: 0,
                final_tick: 0,
                commands: StepReport::default(),
                digest: None,
            },
        }
    }

    /// Set the result.
    pub fn result(mut self, result: TestResult) -> Self {
        self.report.result = result;
        self
    }

    /// Set the replica count.
    pub fn replicas(mut self, replicas: usize) -> Self {
        self.report.replicas = replicas;
        self
    }

    /// Set the final tick.
    pub fn final_tick(mut self, tick: u64) -> Self {
        self.report.final_tick = tick;
        self
    }

    /// Set the command results.
    pub fn commands(mut self, commands: StepReport) -> Self {
        self.report.commands = commands;
        self
    }

    /// Set the converged digest.
    pub fn digest(mut self, digest: impl Into<String>) -> Self {
        self.report.digest = Some(digest.into());
        self
    }

    /// Finish.
    pub fn build(self) -> RunReport {
        self.report
    }
}

/// Writes run reports as pretty JSON.
pub struct ReportSink {
    path: PathBuf,
}

impl ReportSink {
    /// Sink at `path`, creating parent directories.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create report directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    /// Write `report`, replacing any previous file.
    pub fn write(&self, report: &RunReport) -> Result<()> {
        let json = serde_json::to_string_pretty(report)?;
        fs::write(&self.path, json).with_context(|| format!("write report {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn report_sink_writes_file() {
        let path = std::env::temp_dir().join(format!(
            "colonysync-report-{}.json",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let report = RunReportBuilder::new("sink_test")
            .replicas(2)
            .final_tick(40)
            .commands(StepReport {
                executed: 3,
                failed: 1,
                stale: 0,
            })
            .digest("abc123")
            .build();

        let sink = ReportSink::create(&path).unwrap();
        sink.write(&report).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("sink_test"));
        assert!(contents.contains("\"result\": \"pass\""));
        assert!(contents.contains("\"executed\": 3"));
        assert!(contents.contains("abc123"));

        fs::remove_file(&path).ok();
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let report = RunReportBuilder::new("ts").result(TestResult::Skip).build();
        assert!(chrono::DateTime::parse_from_rfc3339(&report.timestamp).is_ok());
        assert_eq!(report.result, TestResult::Skip);
        assert!(report.digest.is_none());
    }
}
