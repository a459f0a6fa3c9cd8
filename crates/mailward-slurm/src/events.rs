//! Parsing of the notification strings slurmctld passes to its MailProg.
//!
//! The strings are free text of the form
//! `Slurm Job_id=1234 Name=myjob Ended, Run time 01:00:00, COMPLETED`
//! with array and het-job variants. One capturing regex per form; the
//! phrasing is pinned by slurmctld and covered by literal-sample tests.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EventParseError {
    #[error("could not parse Slurm notification: {0}")]
    Unrecognised(String),
    #[error("unknown job state: {0}")]
    UnknownState(String),
}

/// The notification kinds mailward knows how to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailState {
    Began,
    Ended,
    Failed,
    Requeued,
    InvalidDependency,
    StagedOut,
    /// Reached 50/80/90% of the time limit.
    TimeReached(u8),
    TimeLimitReached,
}

impl MailState {
    /// States for which sacct has an end timestamp and exit state.
    pub fn is_end_state(&self) -> bool {
        matches!(
            self,
            MailState::Ended | MailState::Failed | MailState::TimeLimitReached
        )
    }
}

impl fmt::Display for MailState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailState::Began => write!(f, "Began"),
            MailState::Ended => write!(f, "Ended"),
            MailState::Failed => write!(f, "Failed"),
            MailState::Requeued => write!(f, "Requeued"),
            MailState::InvalidDependency => write!(f, "Invalid dependency"),
            MailState::StagedOut => write!(f, "Staged Out"),
            MailState::TimeReached(pct) => write!(f, "Time reached {}%", pct),
            MailState::TimeLimitReached => write!(f, "Time limit reached"),
        }
    }
}

impl FromStr for MailState {
    type Err = EventParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Began" => Ok(MailState::Began),
            "Ended" => Ok(MailState::Ended),
            "Failed" => Ok(MailState::Failed),
            "Requeued" => Ok(MailState::Requeued),
            "Invalid dependency" => Ok(MailState::InvalidDependency),
            "Staged Out" => Ok(MailState::StagedOut),
            "Time reached 50%" => Ok(MailState::TimeReached(50)),
            "Time reached 80%" => Ok(MailState::TimeReached(80)),
            "Time reached 90%" => Ok(MailState::TimeReached(90)),
            "Time limit reached" => Ok(MailState::TimeLimitReached),
            other => Err(EventParseError::UnknownState(other.to_string())),
        }
    }
}

/// A parsed MailProg invocation, ready to be spooled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub job_id: u64,
    pub state: MailState,
    pub array_summary: bool,
}

const STATE_ALT: &str = "Began|Ended|Failed|Requeued|Invalid dependency|Reached time limit|Reached (?P<limit>[0-9]+)% of time limit|Staged Out";

static ARRAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"Slurm ((?P<array_summary>Array Summary)|Array Task) Job_id=[0-9]+_([0-9]+|\*) \((?P<job_id>[0-9]+)\).*?(?P<state>({STATE_ALT}))"
    ))
    .expect("array event regex")
});

static HETJOB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"Slurm HetJob Job_id=[0-9]+\+[0-9]+ \((?P<job_id>[0-9]+)\).*?(?P<state>({STATE_ALT}))"
    ))
    .expect("hetjob event regex")
});

static JOB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"Slurm Job_id=(?P<job_id>[0-9]+).*?(?P<state>({STATE_ALT}))"
    ))
    .expect("job event regex")
});

/// Parse one MailProg notification string.
pub fn parse_event(info: &str) -> Result<Notification, EventParseError> {
    let (caps, array_summary) = if info.contains("Array") {
        let caps = ARRAY_RE
            .captures(info)
            .ok_or_else(|| EventParseError::Unrecognised(info.to_string()))?;
        let summary = caps.name("array_summary").is_some();
        (caps, summary)
    } else if info.contains("HetJob") {
        let caps = HETJOB_RE
            .captures(info)
            .ok_or_else(|| EventParseError::Unrecognised(info.to_string()))?;
        (caps, false)
    } else {
        let caps = JOB_RE
            .captures(info)
            .ok_or_else(|| EventParseError::Unrecognised(info.to_string()))?;
        (caps, false)
    };

    let job_id: u64 = caps["job_id"]
        .parse()
        .map_err(|_| EventParseError::Unrecognised(info.to_string()))?;

    let state = match &caps["state"] {
        "Reached time limit" => MailState::TimeLimitReached,
        s if s.starts_with("Reached ") => {
            let pct: u8 = caps["limit"]
                .parse()
                .map_err(|_| EventParseError::Unrecognised(info.to_string()))?;
            MailState::TimeReached(pct)
        }
        s => s.parse()?,
    };

    Ok(Notification {
        job_id,
        state,
        array_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_job_began() {
        let n = parse_event("Slurm Job_id=1000 Name=test Began, Queued time 00:00:01").unwrap();
        assert_eq!(
            n,
            Notification {
                job_id: 1000,
                state: MailState::Began,
                array_summary: false
            }
        );
    }

    #[test]
    fn test_parse_single_job_ended() {
        let n = parse_event("Slurm Job_id=1000 Name=test Ended, Run time 01:00:00, COMPLETED, ExitCode 0")
            .unwrap();
        assert_eq!(n.state, MailState::Ended);
    }

    #[test]
    fn test_parse_time_limit_phrases() {
        let n = parse_event("Slurm Job_id=1000 Name=test Reached time limit").unwrap();
        assert_eq!(n.state, MailState::TimeLimitReached);

        let n = parse_event("Slurm Job_id=1000 Name=test Reached 80% of time limit").unwrap();
        assert_eq!(n.state, MailState::TimeReached(80));
    }

    #[test]
    fn test_parse_array_task() {
        let n = parse_event(
            "Slurm Array Task Job_id=1000_3 (1003) Name=test Ended, Run time 00:10:00, COMPLETED",
        )
        .unwrap();
        assert_eq!(
            n,
            Notification {
                job_id: 1003,
                state: MailState::Ended,
                array_summary: false
            }
        );
    }

    #[test]
    fn test_parse_array_summary() {
        let n = parse_event("Slurm Array Summary Job_id=1000_* (1000) Name=test Began").unwrap();
        assert!(n.array_summary);
        assert_eq!(n.job_id, 1000);
    }

    #[test]
    fn test_parse_hetjob() {
        let n = parse_event(
            "Slurm HetJob Job_id=1000+1 (1001) Name=test Ended, Run time 00:05:00, COMPLETED",
        )
        .unwrap();
        assert_eq!(n.job_id, 1001);
        assert_eq!(n.state, MailState::Ended);
        assert!(!n.array_summary);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_event("not a slurm notification"),
            Err(EventParseError::Unrecognised(_))
        ));
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            MailState::Began,
            MailState::Ended,
            MailState::Failed,
            MailState::Requeued,
            MailState::InvalidDependency,
            MailState::StagedOut,
            MailState::TimeReached(50),
            MailState::TimeReached(80),
            MailState::TimeReached(90),
            MailState::TimeLimitReached,
        ] {
            assert_eq!(state.to_string().parse::<MailState>().unwrap(), state);
        }
    }

    #[test]
    fn test_unknown_state_string() {
        assert!(matches!(
            "Deadline".parse::<MailState>(),
            Err(EventParseError::UnknownState(_))
        ));
    }
}
