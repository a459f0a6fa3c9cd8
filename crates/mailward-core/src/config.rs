//! TOML configuration shared by the two binaries.
//!
//! Section names follow the original slurm.conf-adjacent layout so that an
//! admin can tell at a glance which program reads which block.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        source: Box<toml::de::Error>,
    },
    #[error("{0} is not a directory")]
    NotADirectory(Utf8PathBuf),
    #[error("{0} does not exist")]
    Missing(Utf8PathBuf),
}

pub const DEFAULT_CONFIG_PATH: &str = "/etc/mailward/mailward.toml";

/// Default pattern for recipient validation, applied as a full match.
pub const DEFAULT_EMAIL_REGEX: &str =
    r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub common: CommonConfig,
    #[serde(rename = "slurm-send-mail")]
    pub send: SendConfig,
    #[serde(rename = "slurm-spool-mail")]
    pub spool: SpoolConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommonConfig {
    pub spool_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendConfig {
    pub log_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub verbose: bool,

    /// Cap on the number of per-member e-mails for one array notification.
    /// 0 disables the cap.
    #[serde(default)]
    pub array_max_notifications: usize,

    pub email_from_address: String,
    #[serde(default = "default_from_name")]
    pub email_from_name: String,
    #[serde(default = "default_subject")]
    pub email_subject: String,
    #[serde(default = "default_email_regex")]
    pub email_regex: String,
    #[serde(default)]
    pub validate_email: bool,

    #[serde(default = "default_sacct")]
    pub sacct_exe: Utf8PathBuf,
    #[serde(default = "default_scontrol")]
    pub scontrol_exe: Utf8PathBuf,
    #[serde(default = "default_tail")]
    pub tail_exe: Utf8PathBuf,
    /// Lines of job output to embed in end-of-job e-mails. 0 disables.
    #[serde(default)]
    pub tail_lines: u32,

    #[serde(default = "default_datetime_format")]
    pub datetime_format: String,

    /// Keep the spool file for a later run when delivery fails.
    #[serde(default = "default_true")]
    pub retry_on_failure: bool,

    pub templates_dir: Utf8PathBuf,
    pub css: Option<Utf8PathBuf>,

    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_use_tls: bool,
    #[serde(default)]
    pub smtp_use_ssl: bool,
    #[serde(default)]
    pub smtp_username: String,
    #[serde(default)]
    pub smtp_password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpoolConfig {
    pub log_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub verbose: bool,
}

fn default_from_name() -> String {
    "Mailward".to_string()
}

fn default_subject() -> String {
    "Job $JOB_ID ($JOB_NAME): $STATE".to_string()
}

fn default_email_regex() -> String {
    DEFAULT_EMAIL_REGEX.to_string()
}

fn default_sacct() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/bin/sacct")
}

fn default_scontrol() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/bin/scontrol")
}

fn default_tail() -> Utf8PathBuf {
    Utf8PathBuf::from("/usr/bin/tail")
}

fn default_datetime_format() -> String {
    "%d/%m/%Y %H:%M:%S".to_string()
}

fn default_smtp_server() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load and parse the configuration file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source: Box::new(source),
        })
    }
}

/// Check that a path exists and is a directory.
pub fn check_dir(path: &Utf8Path) -> Result<(), ConfigError> {
    if !path.is_dir() {
        return Err(ConfigError::NotADirectory(path.to_owned()));
    }
    Ok(())
}

/// Check that a path exists and is a file.
pub fn check_file(path: &Utf8Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::Missing(path.to_owned()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[common]
spool_dir = "/var/spool/mailward"

[slurm-send-mail]
email_from_address = "slurm@example.com"
templates_dir = "/etc/mailward/templates"
smtp_server = "mail.example.com"
smtp_port = 587
smtp_use_tls = true
tail_lines = 20
validate_email = true

[slurm-spool-mail]
log_file = "/var/log/mailward/spool.log"
verbose = true
"#;

    #[test]
    fn test_load_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();
        let config = Config::load(path).unwrap();

        assert_eq!(config.common.spool_dir, "/var/spool/mailward");
        assert_eq!(config.send.email_from_address, "slurm@example.com");
        assert_eq!(config.send.smtp_port, 587);
        assert!(config.send.smtp_use_tls);
        assert!(!config.send.smtp_use_ssl);
        assert_eq!(config.send.tail_lines, 20);
        // defaults
        assert_eq!(config.send.sacct_exe, "/usr/bin/sacct");
        assert!(config.send.retry_on_failure);
        assert_eq!(config.send.email_regex, DEFAULT_EMAIL_REGEX);
        assert!(config.spool.verbose);
    }

    #[test]
    fn test_missing_section_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[common]\nspool_dir = \"/tmp\"\n").unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();
        assert!(matches!(
            Config::load(path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
