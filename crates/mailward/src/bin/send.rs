//! mailward-send: process pending Slurm e-mail notifications.
//!
//! Examines the spool directory for notifications written by
//! mailward-spool, enriches them with sacct/scontrol data and sends
//! HTML + plain-text e-mails. Expected to run from cron.

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use mailward::processor::{process_spool_file, ProcessError, SendContext};
use mailward_core::config::DEFAULT_CONFIG_PATH;
use mailward_core::{check_dir, check_file, scan_spool_dir, Config, TemplateSet};
use mailward_smtp::{DeliverError, SmtpMailer, SmtpSettings};
use miette::{miette, IntoDiagnostic, Result};
use regex::Regex;

#[derive(Parser, Debug)]
#[command(name = "mailward-send")]
#[command(about = "Send pending Slurm e-mails to users")]
struct Args {
    /// Turn on debug messages
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: Utf8PathBuf,
}

fn init_logging(log_file: Option<&Utf8Path>, verbose: bool) -> Result<()> {
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

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config).into_diagnostic()?;
    let send = config.send.clone();

    init_logging(send.log_file.as_deref(), args.verbose || send.verbose)?;

    check_dir(&config.common.spool_dir).into_diagnostic()?;
    check_file(&send.sacct_exe).into_diagnostic()?;
    check_file(&send.scontrol_exe).into_diagnostic()?;
    check_file(&send.tail_exe).into_diagnostic()?;

    let templates = TemplateSet::load(&send.templates_dir).into_diagnostic()?;
    let css = match &send.css {
        Some(path) => std::fs::read_to_string(path).into_diagnostic()?,
        None => String::new(),
    };
    let email_regex = Regex::new(&send.email_regex).into_diagnostic()?;

    let mut mailer = SmtpMailer::new(SmtpSettings {
        server: send.smtp_server.clone(),
        port: send.smtp_port,
        use_tls: send.smtp_use_tls,
        use_ssl: send.smtp_use_ssl,
        username: send.smtp_username.clone(),
        password: send.smtp_password.clone(),
    });

    let ctx = SendContext {
        config: send,
        templates,
        css,
        email_regex,
    };

    for file in scan_spool_dir(&config.common.spool_dir).into_diagnostic()? {
        tracing::info!("processing: {}", file);
        match process_spool_file(&file, &ctx, &mut mailer).await {
            Ok(()) => {}
            // no SMTP server at all: stop rather than fail every file
            Err(ProcessError::Deliver(e @ DeliverError::Connect { .. })) => {
                return Err(miette!("{}", e));
            }
            Err(ProcessError::Deliver(e)) => {
                tracing::error!("delivery failed, keeping {} for retry: {}", file, e);
            }
        }
    }
    Ok(())
}
