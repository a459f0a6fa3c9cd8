//! Accounting parser: turns sacct output into `Job` records.

use crate::events::MailState;
use crate::job::{Job, JobError};
use camino::Utf8Path;
use mailward_parsers::{kbytes_from_str, run_command, split_delimited, usec_from_str};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum SacctError {
    #[error("failed to execute sacct: {0}")]
    Execution(String),
    #[error(transparent)]
    Job(#[from] JobError),
}

/// Field list requested from sacct with `-P -n --fields=...`.
/// One pipe-delimited line per job plus one line per step.
const SACCT_FIELDS: [&str; 23] = [
    "JobId",
    "User",
    "Group",
    "Partition",
    "Start",
    "End",
    "State",
    "ReqMem",
    "MaxRSS",
    "NCPUS",
    "TotalCPU",
    "NNodes",
    "WorkDir",
    "Elapsed",
    "ExitCode",
    "AdminComment",
    "Comment",
    "Cluster",
    "NodeList",
    "TimeLimit",
    "TimelimitRaw",
    "JobIdRaw",
    "JobName",
];

// Job lines have a bare id, an array suffix or a het-job offset;
// anything else (e.g. "1000.batch") is a step line.
static JOB_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]+(_[0-9]+)?(\+[0-9]+)?$").expect("job id regex"));

/// Run sacct for `first_job_id` and parse the matching jobs.
///
/// A non-zero exit from sacct is logged and treated as "no jobs found":
/// the notification will be dropped without an e-mail.
pub async fn query_accounting(
    sacct_exe: &Utf8Path,
    first_job_id: u64,
    state: MailState,
) -> Result<Vec<Job>, SacctError> {
    let mut cmd = Command::new(sacct_exe.as_std_path());
    cmd.args(["-j", &first_job_id.to_string(), "-P", "-n"])
        .arg(format!("--fields={}", SACCT_FIELDS.join(",")))
        // epoch timestamps, so Start/End parse without a format string
        .env("SLURM_TIME_FORMAT", "%s");

    let out = run_command(&mut cmd, "sacct")
        .await
        .map_err(|e| SacctError::Execution(e.to_string()))?;
    if !out.success() {
        tracing::error!(
            "sacct exited with status {}; stdout: {} stderr: {}",
            out.status,
            out.stdout,
            out.stderr
        );
        return Ok(Vec::new());
    }
    tracing::debug!("sacct output:\n{}", out.stdout);
    parse_accounting(&out.stdout, first_job_id, state).map_err(SacctError::from)
}

/// Parse pipe-delimited sacct output into jobs matching `first_job_id`.
pub fn parse_accounting(
    stdout: &str,
    first_job_id: u64,
    state: MailState,
) -> Result<Vec<Job>, JobError> {
    let mut jobs: Vec<Job> = Vec::new();

    for line in stdout.lines() {
        let fields = match split_delimited(line, SACCT_FIELDS.len()) {
            Some(f) => f,
            None => continue,
        };
        let row: HashMap<&str, &str> = SACCT_FIELDS.iter().copied().zip(fields).collect();
        let job_id_str = row["JobId"];

        if !JOB_ID_RE.is_match(job_id_str) {
            // step line: harvest peak memory for the current job
            if state != MailState::Began {
                if let Some(job) = jobs.last_mut() {
                    update_max_rss(job, row["MaxRSS"]);
                }
            }
            continue;
        }

        if !matches_requested(job_id_str, first_job_id) {
            continue;
        }

        let raw_id: u64 = match row["JobIdRaw"].parse() {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!("could not parse JobIdRaw '{}'", row["JobIdRaw"]);
                continue;
            }
        };

        let mut job = Job::new(job_id_str.to_string(), raw_id);
        if let Some((base, _)) = job_id_str.split_once('_') {
            job.array_id = base.parse().ok();
        } else if let Some((base, _)) = job_id_str.split_once('+') {
            job.hetjob_id = base.parse().ok();
        }

        job.cluster = row["Cluster"].to_string();
        job.admin_comment = row["AdminComment"].to_string();
        job.comment = row["Comment"].to_string();
        job.cpus = row["NCPUS"].parse().ok();
        job.group = row["Group"].to_string();
        job.name = row["JobName"].to_string();
        job.nodelist = row["NodeList"].to_string();
        job.nodes = row["NNodes"].parse().ok();
        job.partition = row["Partition"].to_string();
        job.requested_mem = parse_requested_mem(row["ReqMem"], job.cpus);

        // "None" means the job was never dispatched, e.g. a pending job
        // that was cancelled
        if row["Start"] != "None" {
            match row["Start"].parse::<i64>() {
                Ok(ts) => job.start_ts = Some(ts),
                Err(_) => tracing::warn!(
                    "job {}: could not parse '{}' for job start timestamp",
                    job.id,
                    row["Start"]
                ),
            }
        }

        job.used_cpu_usec = Some(match usec_from_str(row["TotalCPU"]) {
            Some(usec) => usec,
            None => {
                tracing::warn!(
                    "job {}: could not parse TotalCPU '{}'",
                    job.id,
                    row["TotalCPU"]
                );
                0
            }
        });
        job.user = row["User"].to_string();
        job.workdir = row["WorkDir"].to_string();

        job.wallclock = Some(if row["TimeLimit"] == "UNLIMITED" {
            0
        } else {
            match row["TimelimitRaw"].parse::<u64>() {
                Ok(mins) => mins * 60,
                Err(_) => {
                    tracing::warn!(
                        "job {}: could not parse '{}' for job time limit",
                        job.id,
                        row["TimelimitRaw"]
                    );
                    0
                }
            }
        });

        if state.is_end_state() {
            job.set_state(row["State"]);
            match row["End"].parse::<i64>() {
                Ok(ts) => job.end_ts = Some(ts),
                Err(_) => tracing::warn!(
                    "job {}: could not parse '{}' for job end timestamp",
                    job.id,
                    row["End"]
                ),
            }
            job.exit_code = row["ExitCode"].to_string();
            update_max_rss(&mut job, row["MaxRSS"]);
        }

        job.derive()?;
        jobs.push(job);
    }

    Ok(jobs)
}

fn matches_requested(job_id_str: &str, first_job_id: u64) -> bool {
    let first = first_job_id.to_string();
    job_id_str == first
        || job_id_str.starts_with(&format!("{}_", first))
        || job_id_str.starts_with(&format!("{}+", first))
}

fn update_max_rss(job: &mut Job, max_rss: &str) {
    if max_rss.is_empty() {
        return;
    }
    let kbytes = kbytes_from_str(max_rss);
    if kbytes > job.max_rss.unwrap_or(0) {
        job.max_rss = Some(kbytes);
    }
}

/// Convert a ReqMem value to kilobytes, handling the pre-Slurm-21 format
/// where a trailing 'c' (per core) or 'n' (per node) followed the unit.
fn parse_requested_mem(req_mem: &str, cpus: Option<u32>) -> Option<u64> {
    if req_mem.is_empty() || req_mem.ends_with('?') {
        return None;
    }
    if let Some(stripped) = req_mem.strip_suffix('c') {
        // per-core value: multiply by the CPU count
        let cpus = cpus.unwrap_or(1);
        if stripped.len() >= 2 {
            let (num, unit) = stripped.split_at(stripped.len() - 1);
            if let Ok(amount) = num.parse::<f64>() {
                tracing::debug!("applying ReqMem workaround for Slurm versions < 21");
                return Some(kbytes_from_str(&format!(
                    "{}{}",
                    amount * cpus as f64,
                    unit
                )));
            }
            tracing::error!("failed to convert ReqMem '{}' to a number", num);
        }
        return None;
    }
    if let Some(stripped) = req_mem.strip_suffix('n') {
        tracing::debug!("applying ReqMem workaround for Slurm versions < 21");
        return Some(kbytes_from_str(stripped));
    }
    Some(kbytes_from_str(req_mem))
}

#[cfg(test)]
mod tests {
    use super::*;

    // JobId|User|Group|Partition|Start|End|State|ReqMem|MaxRSS|NCPUS|TotalCPU|NNodes|WorkDir|Elapsed|ExitCode|AdminComment|Comment|Cluster|NodeList|TimeLimit|TimelimitRaw|JobIdRaw|JobName
    const ENDED_SINGLE: &str = "\
1000|alice|users|compute|1700000000|1700001800|COMPLETED|4G||1|25:00.0|1|/home/alice|00:30:00|0:0|||cluster1|node01|01:00:00|60|1000|simulation
1000.batch||||1700000000|1700001800|COMPLETED||1500M|1|25:00.0|1||00:30:00|0:0|||cluster1|node01|||1000.batch|batch";

    const ENDED_ARRAY: &str = "\
1000_1|alice|users|compute|1700000000|1700001800|COMPLETED|2G||1|10:00.0|1|/home/alice|00:30:00|0:0|||cluster1|node01|01:00:00|60|1001|arrayjob
1000_1.batch||||1700000000|1700001800|COMPLETED||800M|1|10:00.0|1||00:30:00|0:0|||cluster1|node01|||1001.batch|batch
1000_2|alice|users|compute|1700000000|1700002000|COMPLETED|2G||1|12:00.0|1|/home/alice|00:33:20|0:0|||cluster1|node02|01:00:00|60|1002|arrayjob
1000_2.batch||||1700000000|1700002000|COMPLETED||900M|1|12:00.0|1||00:33:20|0:0|||cluster1|node02|||1002.batch|batch";

    #[test]
    fn test_parse_single_ended_job() {
        let jobs = parse_accounting(ENDED_SINGLE, 1000, MailState::Ended).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.id, "1000");
        assert_eq!(job.raw_id, 1000);
        assert!(!job.is_array());
        assert_eq!(job.state(), Some("COMPLETED"));
        assert_eq!(job.elapsed(), 1800);
        assert_eq!(job.wc_accuracy_str(), "50.00%");
        // MaxRSS harvested from the batch step line
        assert_eq!(job.max_rss, Some(1500 * 1024));
        assert_eq!(job.requested_mem, Some(4 * 1048576));
        assert_eq!(job.user, "alice");
        assert_eq!(job.name, "simulation");
    }

    #[test]
    fn test_parse_array_members() {
        let jobs = parse_accounting(ENDED_ARRAY, 1000, MailState::Ended).unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "1000_1");
        assert_eq!(jobs[0].raw_id, 1001);
        assert_eq!(jobs[0].array_id, Some(1000));
        assert_eq!(jobs[0].max_rss, Some(800 * 1024));
        assert_eq!(jobs[1].id, "1000_2");
        assert_eq!(jobs[1].max_rss, Some(900 * 1024));
    }

    #[test]
    fn test_other_job_ids_skipped() {
        // job 2000 present in the output must not match a query for 1000
        let other = ENDED_SINGLE.replace("1000", "2000");
        let jobs = parse_accounting(&other, 1000, MailState::Ended).unwrap();
        assert!(jobs.is_empty());
    }

    #[test]
    fn test_began_state_skips_maxrss() {
        let began = "\
1000|alice|users|compute|1700000000|Unknown|RUNNING|4G||1|00:00.0|1|/home/alice|00:00:10|0:0|||cluster1|node01|01:00:00|60|1000|simulation
1000.batch||||1700000000|Unknown|RUNNING||100M|1|00:00.0|1||00:00:10|0:0|||cluster1|node01|||1000.batch|batch";
        let jobs = parse_accounting(began, 1000, MailState::Began).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].max_rss, None);
        assert!(!jobs[0].did_start());
    }

    #[test]
    fn test_never_dispatched_job() {
        let cancelled = "\
1000|alice|users|compute|None||CANCELLED by 500|4G||1|00:00.0|1|/home/alice|00:00:00|0:0|||cluster1|None assigned|01:00:00|60|1000|simulation";
        let jobs = parse_accounting(cancelled, 1000, MailState::Ended).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].start_ts.is_none());
        assert!(!jobs[0].did_start());
        assert!(jobs[0].cancelled());
    }

    #[test]
    fn test_hetjob_component() {
        let het = "\
1000+1|alice|users|compute|1700000000|1700001800|COMPLETED|4G||2|25:00.0|1|/home/alice|00:30:00|0:0|||cluster1|node01|01:00:00|60|1001|hetpart";
        let jobs = parse_accounting(het, 1000, MailState::Ended).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].is_hetjob());
        assert_eq!(jobs[0].hetjob_id, Some(1000));
    }

    #[test]
    fn test_unlimited_time_limit() {
        let unlimited = ENDED_SINGLE.replace("|01:00:00|60|", "|UNLIMITED|UNLIMITED|");
        let jobs = parse_accounting(&unlimited, 1000, MailState::Ended).unwrap();
        assert_eq!(jobs[0].wallclock, Some(0));
        assert_eq!(jobs[0].wc_string(), "Unlimited");
    }

    #[test]
    fn test_req_mem_per_core_workaround() {
        assert_eq!(parse_requested_mem("2Gc", Some(4)), Some(8 * 1048576));
        assert_eq!(parse_requested_mem("512Mn", Some(4)), Some(512 * 1024));
        assert_eq!(parse_requested_mem("4G", Some(4)), Some(4 * 1048576));
        assert_eq!(parse_requested_mem("", Some(4)), None);
        assert_eq!(parse_requested_mem("0?", Some(4)), None);
    }
}
