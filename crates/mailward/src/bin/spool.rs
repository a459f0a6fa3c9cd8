//! mailward-spool: drop-in replacement for MailProg in slurm.conf.
//!
//! Instead of sending an e-mail, the details of the notification are
//! written to the spool directory for mailward-send to pick up. slurmctld
//! invokes MailProg as `<prog> -s "<notification string>" <recipient>`.

use camino::Utf8PathBuf;
use mailward_core::config::DEFAULT_CONFIG_PATH;
use mailward_core::{check_dir, Config, SpoolRecord};
use mailward_slurm::parse_event;
use miette::{miette, IntoDiagnostic, Result};

fn init_logging(log_file: Option<&camino::Utf8Path>, verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                check_dir(parent).into_diagnostic()?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .into_diagnostic()?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(file)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_max_level(level).init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let config_path = std::env::var("MAILWARD_CONF")
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|_| Utf8PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path).into_diagnostic()?;

    init_logging(config.spool.log_file.as_deref(), config.spool.verbose)?;
    check_dir(&config.common.spool_dir).into_diagnostic()?;

    let args: Vec<String> = std::env::args().collect();
    tracing::debug!("called with: {:?}", args);
    // slurmctld passes "-s", the notification string and the recipient
    if args.len() != 4 {
        return Err(miette!("incorrect number of command line arguments"));
    }
    let info = &args[2];
    let email = &args[3];

    // a MailProg failure must never disturb slurmctld, so parse problems
    // are logged and swallowed
    let notification = match parse_event(info) {
        Ok(n) => n,
        Err(e) => {
            tracing::error!("{}", e);
            return Ok(());
        }
    };
    tracing::debug!(
        "job id: {}, state: {}, array summary: {}, e-mail to: {}",
        notification.job_id,
        notification.state,
        notification.array_summary,
        email
    );

    let record = SpoolRecord {
        job_id: notification.job_id,
        state: notification.state.to_string(),
        email: email.clone(),
        array_summary: notification.array_summary,
    };
    match record.write(&config.common.spool_dir) {
        Ok(path) => tracing::info!("wrote spool file: {}", path),
        Err(e) => tracing::error!("failed to write spool file: {}", e),
    }
    Ok(())
}
