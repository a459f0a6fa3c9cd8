//! Slurm integration for mailward.
//!
//! Builds `Job` records from sacct accounting output, pulls live output-file
//! paths from scontrol, and parses the notification strings slurmctld hands
//! to its MailProg.

pub mod events;
pub mod job;
pub mod sacct;
pub mod scontrol;

pub use events::{parse_event, EventParseError, MailState, Notification};
pub use job::{check_output_file_path, Job, JobError};
pub use sacct::{parse_accounting, query_accounting, SacctError};
pub use scontrol::{query_job_info, scontrol_values, JobOutputPaths};
