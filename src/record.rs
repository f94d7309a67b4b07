//! Execution record and summary
//!
//! One [`ExecutionRecord`] is created per invocation and mutated by every
//! stage of the controller. [`ExecutionRecord::finish`] freezes it into an
//! [`ExecutionSummary`], whose `exit_code` becomes the process exit code.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::catalog::CatalogEntry;
use crate::error::{FixSuggestion, PgeError};
use crate::error_code::ErrorOffset;
use crate::process::ProcessReport;
use crate::qa::QaReport;
use crate::schema::Violation;

/// File name of the JSON summary in the output directory
pub const SUMMARY_FILE: &str = "pge_summary.json";

/// Controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Loading,
    Validating,
    PreparingDirs,
    Executing,
    Cataloging,
    QaRunning,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Loading => "LOADING",
            Stage::Validating => "VALIDATING",
            Stage::PreparingDirs => "PREPARING_DIRS",
            Stage::Executing => "EXECUTING",
            Stage::Cataloging => "CATALOGING",
            Stage::QaRunning => "QA_RUNNING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Aggregate outcome, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Warning,
    Degraded,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStatus::Success => "success",
            RunStatus::Warning => "warning",
            RunStatus::Degraded => "degraded",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// First fatal failure of a run
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub stage: Stage,
    pub offset: ErrorOffset,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ExecutionRecord {
    started_at: DateTime<Utc>,
    clock: Instant,
    stage: Stage,
    trail: Vec<Stage>,
    status: RunStatus,
    error_code_base: i64,
    pge_name: Option<String>,
    product: Option<String>,
    output_dir: Option<PathBuf>,
    violations: Vec<Violation>,
    warnings: Vec<String>,
    failure: Option<Failure>,
    pub sas: Option<ProcessReport>,
    pub artifacts: Vec<CatalogEntry>,
    pub metadata_path: Option<PathBuf>,
    pub qa: Option<QaReport>,
}

impl Default for ExecutionRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionRecord {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            clock: Instant::now(),
            stage: Stage::Loading,
            trail: Vec::new(),
            status: RunStatus::Success,
            error_code_base: 0,
            pge_name: None,
            product: None,
            output_dir: None,
            violations: Vec::new(),
            warnings: Vec::new(),
            failure: None,
            sas: None,
            artifacts: Vec::new(),
            metadata_path: None,
            qa: None,
        }
    }

    /// Production time shared by every canonical name of this run
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn trail(&self) -> &[Stage] {
        &self.trail
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn error_code_base(&self) -> i64 {
        self.error_code_base
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Move to the next stage; ignored once terminal
    pub fn enter(&mut self, stage: Stage) {
        if self.stage.is_terminal() {
            return;
        }
        info!(stage = %stage, "Entering stage");
        self.stage = stage;
        self.trail.push(stage);
    }

    pub fn set_error_code_base(&mut self, base: i64) {
        self.error_code_base = base;
    }

    pub fn set_output_dir(&mut self, dir: PathBuf) {
        self.output_dir = Some(dir);
    }

    pub fn identify(&mut self, pge_name: &str, product: &str, base: i64) {
        self.pge_name = Some(pge_name.to_string());
        self.product = Some(product.to_string());
        self.error_code_base = base;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
        self.status = self.status.max(RunStatus::Warning);
    }

    /// Products were delivered but judged unfavourably
    pub fn degrade(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "Run degraded");
        self.warnings.push(reason);
        self.status = self.status.max(RunStatus::Degraded);
    }

    /// Record a fatal failure. Only the first failure is kept.
    pub fn fail(&mut self, err: &PgeError) {
        if self.failure.is_some() {
            warn!(error = %err, "Ignoring failure after the run already failed");
            return;
        }
        error!(stage = %self.stage, error = %err, "Stage failed");
        self.violations = err.violations().to_vec();
        self.failure = Some(Failure {
            stage: self.stage,
            offset: err.offset(),
            message: err.to_string(),
            hint: err.fix_suggestion().map(String::from),
        });
        self.status = RunStatus::Failed;
        self.stage = Stage::Failed;
        self.trail.push(Stage::Failed);
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    fn offset(&self) -> ErrorOffset {
        match (&self.failure, self.status) {
            (Some(failure), _) => failure.offset,
            (None, RunStatus::Degraded) => ErrorOffset::QaProductMismatch,
            _ => ErrorOffset::OverallSuccess,
        }
    }

    /// Freeze the record into its summary
    pub fn finish(mut self) -> ExecutionSummary {
        if !self.stage.is_terminal() {
            self.stage = Stage::Done;
            self.trail.push(Stage::Done);
        }
        let offset = self.offset();
        ExecutionSummary {
            pge_name: self.pge_name,
            product: self.product,
            status: self.status,
            final_stage: self.stage,
            exit_code: offset.code(self.error_code_base),
            error_code_base: self.error_code_base,
            offset,
            failure: self.failure,
            violations: self.violations,
            warnings: self.warnings,
            stages: self.trail,
            started_at: self.started_at.to_rfc3339(),
            elapsed_secs: self.clock.elapsed().as_secs_f64(),
            sas: self.sas,
            artifacts: self.artifacts,
            metadata_path: self.metadata_path,
            qa: self.qa,
        }
    }
}

/// Final, serializable outcome of one invocation
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub pge_name: Option<String>,
    pub product: Option<String>,
    pub status: RunStatus,
    pub final_stage: Stage,
    pub exit_code: i64,
    pub error_code_base: i64,
    pub offset: ErrorOffset,
    pub failure: Option<Failure>,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    pub stages: Vec<Stage>,
    pub started_at: String,
    pub elapsed_secs: f64,
    pub sas: Option<ProcessReport>,
    pub artifacts: Vec<CatalogEntry>,
    pub metadata_path: Option<PathBuf>,
    pub qa: Option<QaReport>,
}

impl ExecutionSummary {
    /// Write `pge_summary.json` into `dir`
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

impl std::fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PGE {} ({}) finished: status={} exit_code={} stage={} artifacts={} elapsed={:.2}s",
            self.pge_name.as_deref().unwrap_or("<unknown>"),
            self.product.as_deref().unwrap_or("<unknown>"),
            self.status,
            self.exit_code,
            self.final_stage,
            self.artifacts.len(),
            self.elapsed_secs,
        )?;
        if let Some(failure) = &self.failure {
            write!(f, " error=\"{}\" failed_stage={}", failure.message, failure.stage)?;
        }
        Ok(())
    }
}
