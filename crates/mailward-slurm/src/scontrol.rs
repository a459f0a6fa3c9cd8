//! Live job metadata via `scontrol -o show job`.
//!
//! The single-line output is a run of `key=value` pairs where values may
//! contain spaces (e.g. `Comment=my comment JobState=RUNNING`). The pairs
//! are recovered by quoting every value before extraction, mirroring the
//! tool's output contract rather than attempting a general parser.

use camino::Utf8Path;
use mailward_parsers::run_command;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tokio::process::Command;

static EQUALS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r" ?[\w/:]+=").expect("equals regex"));
static EXTRACT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?P<key>[\w/:]+)="(?P<value>.*?)""#).expect("extract regex"));

/// Extract key/value pairs from one line of `scontrol -o show job` output.
pub fn scontrol_values(line: &str) -> HashMap<String, String> {
    // add double quotes around each value so embedded spaces survive
    let mut quoted = String::with_capacity(line.len() + 64);
    let mut last = 0;
    for m in EQUALS_RE.find_iter(line) {
        quoted.push_str(&line[last..m.start()]);
        if m.as_str().starts_with(' ') {
            quoted.push_str("\" ");
            quoted.push_str(m.as_str().trim_start());
        } else {
            quoted.push_str(m.as_str());
        }
        quoted.push('"');
        last = m.end();
    }
    quoted.push_str(&line[last..]);
    quoted.push('"');

    EXTRACT_RE
        .captures_iter(&quoted)
        .map(|caps| (caps["key"].to_string(), caps["value"].to_string()))
        .collect()
}

/// Output file paths reported by scontrol for a running or recent job.
#[derive(Debug, Clone)]
pub struct JobOutputPaths {
    pub stdout: String,
    pub stderr: String,
}

/// Query scontrol for a job's stdout/stderr paths.
///
/// Returns None when scontrol fails, which happens once a finished job has
/// aged out of slurmctld's memory; the caller keeps its placeholder paths.
/// Interactive jobs have no StdOut/StdErr keys and report "N/A".
pub async fn query_job_info(scontrol_exe: &Utf8Path, raw_id: u64) -> Option<JobOutputPaths> {
    let mut cmd = Command::new(scontrol_exe.as_std_path());
    cmd.args(["-o", "show", &format!("job={}", raw_id)]);

    let out = match run_command(&mut cmd, "scontrol").await {
        Ok(out) => out,
        Err(e) => {
            tracing::error!("failed to run scontrol: {}", e);
            return None;
        }
    };
    if !out.success() {
        tracing::error!(
            "scontrol exited with status {}; stdout: {} stderr: {}",
            out.status,
            out.stdout,
            out.stderr
        );
        return None;
    }
    tracing::debug!("scontrol output:\n{}", out.stdout);

    // for the first job of an array scontrol prints every member;
    // the first line is the one we asked about
    let first_line = out.stdout.lines().next().unwrap_or("");
    let values = scontrol_values(first_line);
    Some(JobOutputPaths {
        stdout: values
            .get("StdOut")
            .cloned()
            .unwrap_or_else(|| "N/A".to_string()),
        stderr: values
            .get("StdErr")
            .cloned()
            .unwrap_or_else(|| "N/A".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "JobId=1000 JobName=test_job UserId=alice(1001) GroupId=users(100) \
Priority=4294901759 Nice=0 Account=acct QOS=normal JobState=RUNNING Reason=None \
Comment=a comment with spaces StdErr=/home/alice/slurm-1000.err \
StdIn=/dev/null StdOut=/home/alice/slurm-1000.out WorkDir=/home/alice";

    #[test]
    fn test_scontrol_values() {
        let values = scontrol_values(SAMPLE);
        assert_eq!(values["JobId"], "1000");
        assert_eq!(values["JobName"], "test_job");
        assert_eq!(values["JobState"], "RUNNING");
        assert_eq!(values["StdOut"], "/home/alice/slurm-1000.out");
        assert_eq!(values["StdErr"], "/home/alice/slurm-1000.err");
        // embedded spaces survive the quoting pass
        assert_eq!(values["Comment"], "a comment with spaces");
    }

    #[test]
    fn test_scontrol_values_empty_value() {
        let values = scontrol_values("JobId=1000 Partition= TimeLimit=01:00:00");
        assert_eq!(values["Partition"], "");
        assert_eq!(values["TimeLimit"], "01:00:00");
    }
}
