//! QA dispatch
//!
//! The QA program compares the delivered products against expectations and
//! leaves its verdict in `compare_<product>_products.rc` inside the output
//! directory. That file is authoritative; the program's own exit code only
//! tells whether it managed to run at all.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::QaExecutable;
use crate::controller::QA_LOG_FILE;
use crate::error::{PgeError, Result};
use crate::process::{Invocation, ProcessLauncher, ProcessReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QaVerdict {
    Pass,
    InternalFailure,
    ProductMismatch,
}

impl QaVerdict {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(QaVerdict::Pass),
            1 => Some(QaVerdict::InternalFailure),
            2 => Some(QaVerdict::ProductMismatch),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            QaVerdict::Pass => 0,
            QaVerdict::InternalFailure => 1,
            QaVerdict::ProductMismatch => 2,
        }
    }
}

impl std::fmt::Display for QaVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QaVerdict::Pass => "pass",
            QaVerdict::InternalFailure => "internal failure",
            QaVerdict::ProductMismatch => "product mismatch",
        };
        f.write_str(name)
    }
}

pub fn rc_file_name(product: &str) -> String {
    format!("compare_{}_products.rc", product)
}

pub fn results_file_name(product: &str) -> String {
    format!("test_int_{}_results.html", product)
}

/// Read the verdict left by the QA program
pub fn read_verdict(rc_path: &Path) -> Result<QaVerdict> {
    let text = std::fs::read_to_string(rc_path).map_err(|e| PgeError::QaFailed {
        reason: format!("no verdict at '{}': {}", rc_path.display(), e),
    })?;
    text.trim()
        .parse::<i64>()
        .ok()
        .and_then(QaVerdict::from_code)
        .ok_or_else(|| PgeError::QaFailed {
            reason: format!(
                "unrecognized verdict '{}' in '{}'",
                text.trim(),
                rc_path.display()
            ),
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct QaReport {
    pub verdict: QaVerdict,
    pub rc_path: PathBuf,
    /// HTML comparison report, when the QA program wrote one
    pub results_path: Option<PathBuf>,
    pub process: ProcessReport,
}

/// Run the QA program and read its verdict
///
/// Errors when the QA program could not produce a verdict: it failed to
/// launch, exited non-zero, or left no readable result file.
pub async fn dispatch(
    launcher: &dyn ProcessLauncher,
    qa: &QaExecutable,
    output_dir: &Path,
    product: &str,
    via_shell: bool,
) -> Result<QaReport> {
    let program = qa.program_path.as_deref().ok_or_else(|| PgeError::InvalidConfig {
        reason: "QAExecutable is enabled but has no ProgramPath".to_string(),
    })?;
    let rc_path = output_dir.join(rc_file_name(product));
    let html_path = output_dir.join(results_file_name(product));
    for stale in [&rc_path, &html_path] {
        if stale.exists() {
            warn!(path = %stale.display(), "Removing stale QA result");
            std::fs::remove_file(stale).map_err(|e| PgeError::QaFailed {
                reason: format!("cannot remove stale '{}': {}", stale.display(), e),
            })?;
        }
    }

    let invocation = Invocation::new(program, &qa.program_options, output_dir.join(QA_LOG_FILE))
        .via_shell(via_shell);
    let process = launcher.launch(&invocation).await.map_err(|e| PgeError::QaFailed {
        reason: e.to_string(),
    })?;
    if !process.success {
        return Err(PgeError::QaFailed {
            reason: format!(
                "'{}' {} (log: {})",
                program,
                process.status(),
                process.log_path.display()
            ),
        });
    }

    let verdict = read_verdict(&rc_path)?;
    let results_path = Some(html_path).filter(|p| p.exists());
    info!(verdict = %verdict, product, "QA finished");
    Ok(QaReport {
        verdict,
        rc_path,
        results_path,
        process,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::TokioLauncher;
    use tempfile::TempDir;

    fn qa(program: &str) -> QaExecutable {
        QaExecutable {
            enabled: true,
            program_path: Some(program.to_string()),
            program_options: Vec::new(),
        }
    }

    #[test]
    fn verdict_codes() {
        assert_eq!(QaVerdict::from_code(0), Some(QaVerdict::Pass));
        assert_eq!(QaVerdict::from_code(2), Some(QaVerdict::ProductMismatch));
        assert_eq!(QaVerdict::from_code(3), None);
        assert_eq!(QaVerdict::InternalFailure.code(), 1);
    }

    #[test]
    fn file_names() {
        assert_eq!(rc_file_name("dswx_hls"), "compare_dswx_hls_products.rc");
        assert_eq!(results_file_name("dswx_hls"), "test_int_dswx_hls_results.html");
    }

    #[test]
    fn read_verdict_rejects_garbage_and_absence() {
        let dir = TempDir::new().unwrap();
        let rc = dir.path().join("x.rc");
        assert!(read_verdict(&rc).is_err());
        std::fs::write(&rc, "7\n").unwrap();
        assert!(read_verdict(&rc).is_err());
        std::fs::write(&rc, "2\n").unwrap();
        assert_eq!(read_verdict(&rc).unwrap(), QaVerdict::ProductMismatch);
    }

    #[tokio::test]
    async fn result_file_is_authoritative() {
        let dir = TempDir::new().unwrap();
        let script = format!("echo 2 > {}", dir.path().join(rc_file_name("p")).display());
        let report = dispatch(&TokioLauncher, &qa(&script), dir.path(), "p", true)
            .await
            .unwrap();
        assert_eq!(report.verdict, QaVerdict::ProductMismatch);
        assert!(report.process.success);
        assert!(report.results_path.is_none());
    }

    #[tokio::test]
    async fn crash_is_internal_failure_even_with_stale_verdict() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(rc_file_name("p")), "0").unwrap();
        let err = dispatch(&TokioLauncher, &qa("exit 5"), dir.path(), "p", true)
            .await
            .unwrap_err();
        assert!(matches!(err, PgeError::QaFailed { .. }));
        assert!(!dir.path().join(rc_file_name("p")).exists());
    }

    #[tokio::test]
    async fn stale_results_page_is_not_reported() {
        let dir = TempDir::new().unwrap();
        let html = dir.path().join(results_file_name("p"));
        std::fs::write(&html, "<html>old run</html>").unwrap();
        let script = format!("echo 0 > {}", dir.path().join(rc_file_name("p")).display());

        let report = dispatch(&TokioLauncher, &qa(&script), dir.path(), "p", true)
            .await
            .unwrap();
        assert_eq!(report.verdict, QaVerdict::Pass);
        assert!(report.results_path.is_none());
        assert!(!html.exists());
    }

    #[tokio::test]
    async fn missing_verdict_is_internal_failure() {
        let dir = TempDir::new().unwrap();
        let err = dispatch(&TokioLauncher, &qa("true"), dir.path(), "p", true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no verdict"), "{err}");
    }
}
