//! Job record built from accounting output.

use chrono::{Local, TimeZone};
use mailward_parsers::{format_duration, str_from_kbytes};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobError {
    #[error("job {0}: CPU count must be set before deriving usage")]
    CpusNotSet(String),
    #[error("job {0}: wallclock must be set before deriving usage")]
    WallclockNotSet(String),
    #[error("job {0}: used CPU time must be set before deriving usage")]
    UsedCpuNotSet(String),
}

/// One job, array member or het-job component from sacct.
///
/// Fields are filled in by the accounting parser; `derive()` computes the
/// elapsed/accuracy/efficiency values once the required inputs are present.
#[derive(Debug, Clone, Default)]
pub struct Job {
    /// Display id, may carry an `_<index>` or `+<offset>` suffix.
    pub id: String,
    /// JobIdRaw numeric id.
    pub raw_id: u64,
    pub array_id: Option<u64>,
    pub hetjob_id: Option<u64>,

    pub admin_comment: String,
    pub cluster: String,
    pub comment: String,
    pub exit_code: String,
    pub group: String,
    pub name: String,
    pub nodelist: String,
    pub nodes: Option<u32>,
    pub partition: String,
    pub user: String,
    pub workdir: String,

    pub cpus: Option<u32>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    /// Requested time limit in seconds, 0 meaning unlimited.
    pub wallclock: Option<u64>,
    pub used_cpu_usec: Option<u64>,
    /// Peak RSS in kilobytes, harvested from batch-step lines.
    pub max_rss: Option<u64>,
    /// Requested memory in kilobytes.
    pub requested_mem: Option<u64>,

    pub stdout: String,
    pub stderr: String,

    state: Option<String>,
    elapsed: u64,
    wc_accuracy: Option<f64>,
    cpu_efficiency: Option<f64>,
}

impl Job {
    pub fn new(id: String, raw_id: u64) -> Self {
        Job {
            id,
            raw_id,
            stdout: "?".to_string(),
            stderr: "?".to_string(),
            ..Default::default()
        }
    }

    /// Store the sacct job state, normalising TIMEOUT for display.
    pub fn set_state(&mut self, state: &str) {
        if state == "TIMEOUT" {
            self.state = Some("WALLCLOCK EXCEEDED".to_string());
        } else {
            self.state = Some(state.to_string());
        }
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn cancelled(&self) -> bool {
        self.state
            .as_deref()
            .is_some_and(|s| s.contains("CANCELLED"))
    }

    /// A TotalCPU of zero means the job never dispatched, e.g. a pending
    /// job that was cancelled.
    pub fn did_start(&self) -> bool {
        self.used_cpu_usec.unwrap_or(0) > 0
    }

    pub fn is_array(&self) -> bool {
        self.array_id.is_some()
    }

    pub fn is_hetjob(&self) -> bool {
        self.hetjob_id.is_some()
    }

    /// Whether stderr goes to a different file than stdout.
    pub fn separate_output(&self) -> bool {
        self.stderr != self.stdout
    }

    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    /// Compute elapsed time, wall-clock accuracy and CPU efficiency.
    ///
    /// Must be called after the accounting fields are filled in; errors if
    /// the CPU count, wallclock or used CPU time was never set.
    pub fn derive(&mut self) -> Result<(), JobError> {
        let cpus = self.cpus.ok_or_else(|| JobError::CpusNotSet(self.id.clone()))?;
        let wallclock = self
            .wallclock
            .ok_or_else(|| JobError::WallclockNotSet(self.id.clone()))?;
        let used_cpu_usec = self
            .used_cpu_usec
            .ok_or_else(|| JobError::UsedCpuNotSet(self.id.clone()))?;

        if self.did_start() {
            if let (Some(start), Some(end)) = (self.start_ts, self.end_ts) {
                self.elapsed = (end - start).max(0) as u64;
                if wallclock > 0 {
                    self.wc_accuracy = Some(self.elapsed as f64 / wallclock as f64 * 100.0);
                }
                if self.elapsed > 0 {
                    let cpu_wallclock_usec = self.elapsed * cpus as u64 * 1_000_000;
                    self.cpu_efficiency =
                        Some(used_cpu_usec as f64 / cpu_wallclock_usec as f64 * 100.0);
                }
            }
        }
        Ok(())
    }

    // display helpers for the template variables

    pub fn start_str(&self, fmt: &str) -> String {
        format_ts(self.start_ts, fmt)
    }

    pub fn end_str(&self, fmt: &str) -> String {
        format_ts(self.end_ts, fmt)
    }

    pub fn elapsed_str(&self) -> String {
        format_duration(self.elapsed)
    }

    pub fn wc_string(&self) -> String {
        match self.wallclock {
            None => "?".to_string(),
            Some(0) => "Unlimited".to_string(),
            Some(w) => format_duration(w),
        }
    }

    pub fn wc_accuracy_str(&self) -> String {
        match self.wc_accuracy {
            Some(acc) if self.wallclock != Some(0) => format!("{:.2}%", acc),
            _ => "N/A".to_string(),
        }
    }

    pub fn cpu_efficiency_str(&self) -> String {
        match self.cpu_efficiency {
            Some(eff) => format!("{:.2}%", eff),
            None => "?".to_string(),
        }
    }

    pub fn used_cpu_str(&self) -> String {
        match self.used_cpu_usec {
            Some(usec) => format_duration(usec / 1_000_000),
            None => "?".to_string(),
        }
    }

    pub fn max_rss_str(&self) -> String {
        match self.max_rss {
            Some(kb) if kb > 0 => str_from_kbytes(kb),
            _ => "?".to_string(),
        }
    }

    pub fn requested_mem_str(&self) -> String {
        match self.requested_mem {
            Some(kb) if kb > 0 => str_from_kbytes(kb),
            _ => "N/A".to_string(),
        }
    }

    pub fn nodes_str(&self) -> String {
        match self.nodes {
            Some(n) => n.to_string(),
            None => "?".to_string(),
        }
    }
}

fn format_ts(ts: Option<i64>, fmt: &str) -> String {
    match ts.and_then(|t| Local.timestamp_opt(t, 0).single()) {
        Some(dt) => dt.format(fmt).to_string(),
        None => "N/A".to_string(),
    }
}

static OUTPUT_PATTERN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\w").expect("output pattern regex"));

/// Check whether an output file path contains only filename patterns that
/// scontrol has already expanded. Paths with other `%` patterns cannot be
/// tailed because the file on disk has a different name.
pub fn check_output_file_path(path: &str) -> bool {
    const SUPPORTED: [&str; 5] = ["%A", "%a", "%j", "%u", "%x"];
    OUTPUT_PATTERN_RE
        .find_iter(path)
        .all(|m| SUPPORTED.contains(&m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("1000".to_string(), 1000)
    }

    #[test]
    fn test_derive_requires_cpus() {
        let mut j = job();
        j.wallclock = Some(3600);
        j.used_cpu_usec = Some(1);
        assert_eq!(j.derive(), Err(JobError::CpusNotSet("1000".to_string())));
    }

    #[test]
    fn test_derive_requires_wallclock() {
        let mut j = job();
        j.cpus = Some(1);
        j.used_cpu_usec = Some(1);
        assert_eq!(
            j.derive(),
            Err(JobError::WallclockNotSet("1000".to_string()))
        );
    }

    #[test]
    fn test_derive_requires_used_cpu() {
        let mut j = job();
        j.cpus = Some(1);
        j.wallclock = Some(3600);
        assert_eq!(j.derive(), Err(JobError::UsedCpuNotSet("1000".to_string())));
    }

    #[test]
    fn test_derive_computes_usage() {
        let mut j = job();
        j.cpus = Some(2);
        j.wallclock = Some(3600);
        j.used_cpu_usec = Some(1_800_000_000);
        j.start_ts = Some(1_700_000_000);
        j.end_ts = Some(1_700_001_800);
        j.derive().unwrap();
        assert_eq!(j.elapsed(), 1800);
        assert_eq!(j.wc_accuracy_str(), "50.00%");
        // 1800s of CPU over 1800s elapsed on 2 CPUs
        assert_eq!(j.cpu_efficiency_str(), "50.00%");
    }

    #[test]
    fn test_derive_never_started() {
        let mut j = job();
        j.cpus = Some(1);
        j.wallclock = Some(3600);
        j.used_cpu_usec = Some(0);
        j.derive().unwrap();
        assert_eq!(j.elapsed(), 0);
        assert_eq!(j.wc_accuracy_str(), "N/A");
        assert_eq!(j.cpu_efficiency_str(), "?");
    }

    #[test]
    fn test_unlimited_wallclock_accuracy() {
        let mut j = job();
        j.cpus = Some(1);
        j.wallclock = Some(0);
        j.used_cpu_usec = Some(1_000_000);
        j.start_ts = Some(100);
        j.end_ts = Some(200);
        j.derive().unwrap();
        assert_eq!(j.wc_string(), "Unlimited");
        assert_eq!(j.wc_accuracy_str(), "N/A");
    }

    #[test]
    fn test_timeout_state_mapped() {
        let mut j = job();
        j.set_state("TIMEOUT");
        assert_eq!(j.state(), Some("WALLCLOCK EXCEEDED"));
        j.set_state("COMPLETED");
        assert_eq!(j.state(), Some("COMPLETED"));
    }

    #[test]
    fn test_cancelled() {
        let mut j = job();
        j.set_state("CANCELLED by 1000");
        assert!(j.cancelled());
    }

    #[test]
    fn test_check_output_file_path() {
        assert!(check_output_file_path("/home/user/slurm-%j.out"));
        assert!(check_output_file_path("/home/user/out.txt"));
        assert!(check_output_file_path("/data/%x-%A_%a.log"));
        assert!(!check_output_file_path("/home/user/slurm-%N.out"));
    }
}
