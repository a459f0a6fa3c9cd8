//! Shared parsing and subprocess utilities for mailward.
//!
//! Conversions between the unit-suffixed strings emitted by Slurm's
//! accounting tools and plain numbers, plus a small wrapper around
//! subprocess execution used by the sacct/scontrol queries.

pub mod command;
pub mod memory;
pub mod time;

pub use command::{run_command, tail_file, CommandOutput};
pub use memory::{kbytes_from_str, str_from_kbytes};
pub use time::{format_duration, usec_from_str};

/// Split a pipe-delimited sacct line and validate the field count.
pub fn split_delimited(line: &str, num_fields: usize) -> Option<Vec<&str>> {
    let fields: Vec<&str> = line.splitn(num_fields, '|').collect();
    if fields.len() != num_fields {
        return None;
    }
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_delimited() {
        let line = "a|b|c|d";
        assert_eq!(split_delimited(line, 4).unwrap(), vec!["a", "b", "c", "d"]);
        assert!(split_delimited(line, 5).is_none());
        // extra delimiters fold into the final field
        assert_eq!(split_delimited("a|b|c|d|e", 4).unwrap()[3], "d|e");
    }
}
