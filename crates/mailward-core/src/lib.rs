//! Configuration, spool records and template rendering for mailward.

pub mod config;
pub mod spool;
pub mod template;

pub use config::{check_dir, check_file, CommonConfig, Config, ConfigError, SendConfig, SpoolConfig};
pub use spool::{delete_spool_file, scan_spool_dir, SpoolError, SpoolRecord};
pub use template::{render, TemplateError, TemplateSet, TEMPLATE_NAMES};
