//! Subprocess launching for the SAS and QA programs
//!
//! Both programs run the same way: argv-style by default, through `sh -c`
//! when the RunConfig asks for shell execution, with stdout and stderr
//! captured into a single log file. A non-zero exit is reported, not
//! treated as an error; the caller decides what it means.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{PgeError, Result};
use crate::usage;

/// How to run one external program
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub via_shell: bool,
    /// Appended with the program's stdout and stderr
    pub log_path: PathBuf,
    /// Resource usage CSV, when sampling is enabled
    pub usage_path: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: &[String], log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: args.to_vec(),
            via_shell: false,
            log_path: log_path.into(),
            usage_path: None,
        }
    }

    pub fn via_shell(mut self, via_shell: bool) -> Self {
        self.via_shell = via_shell;
        self
    }

    pub fn sample_usage(mut self, path: Option<PathBuf>) -> Self {
        self.usage_path = path;
        self
    }

    /// Command line as passed to `sh -c`
    pub fn shell_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        if self.via_shell {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(self.shell_line());
            cmd
        } else {
            let mut cmd = Command::new(&self.program);
            cmd.args(&self.args);
            cmd
        }
    }
}

/// Outcome of a finished program
#[derive(Debug, Clone, Serialize)]
pub struct ProcessReport {
    pub program: String,
    pub exit_code: Option<i32>,
    pub success: bool,
    #[serde(serialize_with = "as_secs")]
    pub elapsed: Duration,
    pub log_path: PathBuf,
    pub usage_path: Option<PathBuf>,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl ProcessReport {
    /// Human-readable termination status
    pub fn status(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exited with code {}", code),
            None => "was terminated by a signal".to_string(),
        }
    }
}

/// Seam between the controller and the operating system
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, invocation: &Invocation) -> Result<ProcessReport>;
}

/// Launches real processes with tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioLauncher;

fn open_log(path: &Path) -> Result<(Stdio, Stdio)> {
    let setup = |e: std::io::Error| PgeError::DirectorySetup {
        path: path.display().to_string(),
        reason: format!("cannot open log file: {}", e),
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(setup)?;
    let stderr = file.try_clone().map_err(setup)?;
    Ok((Stdio::from(file), Stdio::from(stderr)))
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, invocation: &Invocation) -> Result<ProcessReport> {
        let (stdout, stderr) = open_log(&invocation.log_path)?;
        let mut cmd = invocation.command();
        cmd.stdin(Stdio::null()).stdout(stdout).stderr(stderr);

        if invocation.via_shell {
            info!(command = %invocation.shell_line(), "Launching via shell");
        } else {
            info!(program = %invocation.program, args = ?invocation.args, "Launching");
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PgeError::ProgramNotFound {
                program: invocation.program.clone(),
            },
            _ => PgeError::ProgramLaunch {
                program: invocation.program.clone(),
                reason: e.to_string(),
            },
        })?;

        let sampler = match (&invocation.usage_path, child.id()) {
            (Some(path), Some(pid)) => Some(tokio::spawn(usage::sample_process(
                pid,
                usage::SAMPLE_INTERVAL,
                path.clone(),
            ))),
            _ => None,
        };

        let status = child.wait().await.map_err(|e| PgeError::ProgramLaunch {
            program: invocation.program.clone(),
            reason: format!("failed to wait for process: {}", e),
        })?;
        let elapsed = start.elapsed();

        // The sampler notices the reaped pid on its next tick
        if let Some(handle) = sampler {
            match handle.await {
                Ok(Ok(samples)) => debug!(samples, "Usage sampling finished"),
                Ok(Err(e)) => warn!(error = %e, "Usage sampling stopped early"),
                Err(e) => warn!(error = %e, "Usage sampler panicked"),
            }
        }

        let report = ProcessReport {
            program: invocation.program.clone(),
            exit_code: status.code(),
            success: status.success(),
            elapsed,
            log_path: invocation.log_path.clone(),
            usage_path: invocation.usage_path.clone(),
        };
        info!(
            program = %report.program,
            status = %report.status(),
            elapsed_secs = elapsed.as_secs_f64(),
            "Process finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn shell_line_joins_options() {
        let inv = Invocation::new("echo", &["a".into(), "b c".into()], "log");
        assert_eq!(inv.shell_line(), "echo a b c");
    }

    #[tokio::test]
    async fn captures_output_into_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("run.log");
        let inv = Invocation::new("echo hello; echo oops >&2", &[], &log).via_shell(true);

        let report = TokioLauncher.launch(&inv).await.unwrap();
        assert!(report.success);
        assert_eq!(report.exit_code, Some(0));
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("oops"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("run.log");
        let inv = Invocation::new("exit 3", &[], &log).via_shell(true);

        let report = TokioLauncher.launch(&inv).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.status(), "exited with code 3");
    }

    #[tokio::test]
    async fn missing_program_is_not_found() {
        let dir = TempDir::new().unwrap();
        let inv = Invocation::new(
            "/nonexistent/pge-sas-binary",
            &[],
            dir.path().join("run.log"),
        );
        let err = TokioLauncher.launch(&inv).await.unwrap_err();
        assert!(matches!(err, PgeError::ProgramNotFound { .. }));
    }

    #[tokio::test]
    async fn argv_mode_does_not_split_arguments() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("run.log");
        let inv = Invocation::new("printf", &["%s|".into(), "a b".into()], &log);

        let report = TokioLauncher.launch(&inv).await.unwrap();
        assert!(report.success);
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "a b|");
    }
}
