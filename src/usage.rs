//! Resource usage sampling
//!
//! Polls `/proc/<pid>` at a fixed interval while the SAS runs and appends one
//! CSV row per sample. Sampling ends as soon as the process table entry is
//! gone. On systems without procfs it records nothing.
//!
//! Only the launched process itself is sampled. With `ExecuteViaShell` that
//! is the `sh` wrapper, so the SAS children it starts are not counted.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Clock ticks per second used by `/proc/<pid>/stat`
const CLOCK_TICKS: f64 = 100.0;

const CSV_HEADER: &str = "elapsed_secs,cpu_secs,rss_kib,threads\n";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSample {
    pub cpu_secs: f64,
    pub rss_kib: u64,
    pub threads: u64,
}

impl UsageSample {
    fn csv_row(&self, elapsed: Duration) -> String {
        format!(
            "{:.3},{:.2},{},{}\n",
            elapsed.as_secs_f64(),
            self.cpu_secs,
            self.rss_kib,
            self.threads
        )
    }
}

/// Parse `/proc/<pid>/stat` and `/proc/<pid>/status` contents
pub fn parse_sample(stat: &str, status: &str) -> Option<UsageSample> {
    // comm may contain spaces; fields resume after the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest[0] is field 3 (state); utime and stime are fields 14 and 15
    let utime: f64 = fields.get(11)?.parse().ok()?;
    let stime: f64 = fields.get(12)?.parse().ok()?;
    let threads: u64 = fields.get(17)?.parse().ok()?;

    let rss_kib = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Some(UsageSample {
        cpu_secs: (utime + stime) / CLOCK_TICKS,
        rss_kib,
        threads,
    })
}

async fn read_sample(pid: u32) -> Option<UsageSample> {
    let stat = tokio::fs::read_to_string(format!("/proc/{}/stat", pid))
        .await
        .ok()?;
    let status = tokio::fs::read_to_string(format!("/proc/{}/status", pid))
        .await
        .unwrap_or_default();
    parse_sample(&stat, &status)
}

/// Sample `pid` until it disappears; returns the number of rows written
pub async fn sample_process(pid: u32, interval: Duration, csv_path: PathBuf) -> Result<usize> {
    let mut file = tokio::fs::File::create(&csv_path)
        .await
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;
    file.write_all(CSV_HEADER.as_bytes()).await?;

    let start = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    let mut rows = 0;
    loop {
        ticker.tick().await;
        let Some(sample) = read_sample(pid).await else {
            break;
        };
        file.write_all(sample.csv_row(start.elapsed()).as_bytes())
            .await
            .with_context(|| format!("Failed to write {}", csv_path.display()))?;
        rows += 1;
    }
    file.flush().await?;
    debug!(pid, rows, "Process gone, sampler stopping");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "4242 (my sas prog) S 1 4242 4242 0 -1 4194304 500 0 0 0 250 50 0 0 20 0 4 0 100 1000000 300 18446744073709551615";
    const STATUS: &str = "Name:\tmy sas prog\nVmPeak:\t 9000 kB\nVmRSS:\t    1234 kB\nThreads:\t4\n";

    #[test]
    fn parses_cpu_rss_threads() {
        let sample = parse_sample(STAT, STATUS).unwrap();
        assert_eq!(sample.cpu_secs, 3.0);
        assert_eq!(sample.rss_kib, 1234);
        assert_eq!(sample.threads, 4);
    }

    #[test]
    fn zombie_without_rss_reports_zero() {
        let sample = parse_sample(STAT, "Name:\tx\n").unwrap();
        assert_eq!(sample.rss_kib, 0);
    }

    #[test]
    fn truncated_stat_is_rejected() {
        assert!(parse_sample("12 (x) S 1 2", "").is_none());
        assert!(parse_sample("garbage", "").is_none());
    }

    #[tokio::test]
    async fn stops_when_process_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("usage.csv");
        // pid far above any default pid_max
        let rows = sample_process(u32::MAX - 1, Duration::from_millis(10), csv.clone())
            .await
            .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(std::fs::read_to_string(csv).unwrap(), CSV_HEADER);
    }
}
