//! mailward: enhanced e-mail notifications for Slurm jobs.
//!
//! Library side of the two binaries. `processor` drives one spool file from
//! JSON record to delivered message; `privileges` brackets the effective
//! uid/gid drop used when tailing job output owned by the notifying user.

pub mod privileges;
pub mod processor;
