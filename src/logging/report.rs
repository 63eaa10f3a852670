//! Run report logging
//!
//! Appends one JSON line per orchestrated run, successful or not, so repeated
//! runs against the same network can be compared afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::orchestrator::{RunFailure, RunReport};

/// Final state of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Verified,
    Failed,
}

/// One line of the report file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    /// Gateway the run went through
    pub gateway: String,
    /// Scenario label ("transfer", "upgrade")
    pub scenario: String,
    pub outcome: RunOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl RunRecord {
    fn base(gateway: &str, scenario: &str, run_id: Uuid, outcome: RunOutcome) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id,
            gateway: gateway.to_string(),
            scenario: scenario.to_string(),
            outcome,
            phase: None,
            error_kind: None,
            error: None,
            transaction_id: None,
            before: None,
            after: None,
            elapsed_ms: None,
        }
    }

    pub fn verified(gateway: &str, scenario: &str, report: &RunReport) -> Self {
        Self {
            transaction_id: Some(report.transaction_id.to_string()),
            before: Some(report.before.clone()),
            after: Some(report.after.clone()),
            elapsed_ms: Some(report.elapsed_ms),
            ..Self::base(gateway, scenario, report.run_id, RunOutcome::Verified)
        }
    }

    pub fn failed(gateway: &str, scenario: &str, failure: &RunFailure) -> Self {
        Self {
            phase: Some(failure.phase.to_string()),
            error_kind: Some(failure.source.kind().to_string()),
            error: Some(failure.source.to_string()),
            ..Self::base(
                gateway,
                scenario,
                failure.run_id.unwrap_or_else(Uuid::new_v4),
                RunOutcome::Failed,
            )
        }
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Writes run records to a JSONL file. Without a file, records are dropped.
#[derive(Clone)]
pub struct ReportLogger {
    inner: Arc<Mutex<ReportLoggerInner>>,
}

struct ReportLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl Default for ReportLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportLogger {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReportLoggerInner {
                writer: None,
                path: None,
            })),
        }
    }

    /// Start appending to `path`, creating it if needed.
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let mut inner = self.inner.lock().await;
        inner.writer = Some(BufWriter::new(file));
        inner.path = Some(path.clone());

        info!("Run reports appended to {}", path.display());
        Ok(())
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }

    pub async fn log(&self, record: RunRecord) {
        let line = match record.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize run record: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;
        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", line) {
                error!("Failed to write run record: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush run report: {}", e);
            }
        }
    }

    /// Record the outcome of a run.
    pub async fn log_outcome(
        &self,
        gateway: &str,
        scenario: &str,
        outcome: &Result<RunReport, RunFailure>,
    ) {
        let record = match outcome {
            Ok(report) => RunRecord::verified(gateway, scenario, report),
            Err(failure) => RunRecord::failed(gateway, scenario, failure),
        };
        self.log(record).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Phase;
    use crate::types::LifecycleError;

    #[tokio::test]
    async fn test_records_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        let logger = ReportLogger::new();
        logger.init_file(path.clone()).await.unwrap();

        let run_id = Uuid::new_v4();
        let failure = RunFailure::new(
            Phase::Verify,
            LifecycleError::Verification {
                before: "200".into(),
                after: "200".into(),
                expected_delta: 1,
            },
        )
        .with_run_id(run_id);
        logger.log_outcome("simulated", "transfer", &Err(failure)).await;
        logger
            .log(RunRecord::base(
                "simulated",
                "upgrade",
                Uuid::new_v4(),
                RunOutcome::Verified,
            ))
            .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: RunRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.outcome, RunOutcome::Failed);
        assert_eq!(first.run_id, run_id);
        assert_eq!(first.phase.as_deref(), Some("verify"));
        assert_eq!(first.error_kind.as_deref(), Some("verification"));
        assert!(lines[1].contains("\"scenario\":\"upgrade\""));
    }

    #[tokio::test]
    async fn test_logger_without_file_drops_records() {
        let logger = ReportLogger::default();
        logger
            .log(RunRecord::base(
                "http",
                "transfer",
                Uuid::new_v4(),
                RunOutcome::Verified,
            ))
            .await;
        assert!(logger.path().await.is_none());
    }
}
