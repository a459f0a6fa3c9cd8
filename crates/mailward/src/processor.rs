//! Spool-file processing: accounting lookup, template rendering, delivery.

use crate::privileges::{drop_to_user, user_real_name};
use camino::Utf8Path;
use mailward_core::spool::delete_spool_file;
use mailward_core::{render, SendConfig, SpoolRecord, TemplateError, TemplateSet};
use mailward_parsers::{format_duration, tail_file};
use mailward_slurm::{
    check_output_file_path, query_accounting, query_job_info, Job, MailState,
};
use mailward_smtp::{Deliver, DeliverError, OutgoingMail};
use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    /// Delivery failed with retry_on_failure set: the spool file survives.
    #[error(transparent)]
    Deliver(#[from] DeliverError),
}

/// Everything `process_spool_file` needs besides the file itself.
pub struct SendContext {
    pub config: SendConfig,
    pub templates: TemplateSet,
    pub css: String,
    pub email_regex: Regex,
}

/// Process one spool file end to end.
///
/// Every malformed-input path logs, deletes the file and returns Ok: one
/// bad notification must not stall the queue. An error is returned, with
/// the file preserved for the next run, when the SMTP server cannot be
/// reached or when delivery fails while `retry_on_failure` is set.
pub async fn process_spool_file(
    path: &Utf8Path,
    ctx: &SendContext,
    mailer: &mut dyn Deliver,
) -> Result<(), ProcessError> {
    let record = match SpoolRecord::read(path) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("could not parse spool record {}: {}", path, e);
            delete_spool_file(path);
            return Ok(());
        }
    };
    tracing::debug!("spool record: {:?}", record);

    if ctx.config.validate_email && !full_match(&ctx.email_regex, &record.email) {
        tracing::error!("e-mail address not valid: {}", record.email);
        delete_spool_file(path);
        return Ok(());
    }

    let state = match record.state.parse::<MailState>() {
        Ok(state) => state,
        Err(_) => {
            tracing::warn!(
                "unsupported job state '{}' - no e-mails will be generated",
                record.state
            );
            delete_spool_file(path);
            return Ok(());
        }
    };

    let mut jobs = match query_accounting(&ctx.config.sacct_exe, record.job_id, state).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!("accounting query for job {} failed: {}", record.job_id, e);
            delete_spool_file(path);
            return Ok(());
        }
    };
    if jobs.is_empty() {
        tracing::error!("no accounting data found for job {}", record.job_id);
        delete_spool_file(path);
        return Ok(());
    }

    // one e-mail for a summary or a plain job; otherwise one per member,
    // optionally capped
    if record.array_summary || jobs.len() == 1 {
        jobs.truncate(1);
    } else {
        let cap = ctx.config.array_max_notifications;
        if cap > 0 && jobs.len() > cap {
            tracing::info!(
                "array has {} members which exceeds the limit of {}; only the first {} will be notified",
                jobs.len(),
                cap,
                cap
            );
            jobs.truncate(cap);
        }
    }

    for job in &mut jobs {
        if job.did_start() {
            // this fails once the job has aged out of slurmctld; the
            // placeholder paths stay in place
            if let Some(paths) = query_job_info(&ctx.config.scontrol_exe, job.raw_id).await {
                job.stdout = paths.stdout;
                job.stderr = paths.stderr;
            }
        }
    }

    for job in &jobs {
        tracing::debug!("creating templates for job {}", job.id);
        let mail = match compose(ctx, state, &record, job).await {
            Ok(mail) => mail,
            Err(e) => {
                tracing::error!("could not render e-mail for job {}: {}", job.id, e);
                continue;
            }
        };
        if let Err(e) = mailer.deliver(&mail) {
            // an unreachable SMTP server would fail every file the same
            // way, so it always aborts with the spool file intact
            if matches!(e, DeliverError::Connect { .. }) || ctx.config.retry_on_failure {
                return Err(e.into());
            }
            tracing::error!("delivery for job {} failed (not retrying): {}", job.id, e);
        }
    }

    delete_spool_file(path);
    Ok(())
}

fn full_match(re: &Regex, value: &str) -> bool {
    re.find(value)
        .is_some_and(|m| m.start() == 0 && m.end() == value.len())
}

/// Select the template bundle for a notification.
fn bundle_name(state: MailState, job: &Job, array_summary: bool) -> &'static str {
    match state {
        MailState::Began => {
            if job.is_array() {
                if array_summary {
                    "array_summary_started"
                } else {
                    "array_started"
                }
            } else if job.is_hetjob() {
                "hetjob_started"
            } else {
                "started"
            }
        }
        MailState::Ended | MailState::Failed | MailState::Requeued | MailState::TimeLimitReached => {
            if !job.did_start() {
                // cancelled whilst pending
                "never_ran"
            } else if job.is_array() {
                if array_summary {
                    "array_summary_ended"
                } else {
                    "array_ended"
                }
            } else if job.is_hetjob() {
                "hetjob_ended"
            } else {
                "ended"
            }
        }
        MailState::InvalidDependency => "invalid_dependency",
        MailState::StagedOut => "staged_out",
        MailState::TimeReached(_) => "time",
    }
}

/// Wording for the $END_TXT placeholder in the ended family.
fn end_text(state: MailState) -> String {
    match state {
        MailState::TimeLimitReached => "reached its time limit".to_string(),
        other => other.to_string().to_lowercase(),
    }
}

/// State wording used in the subject line.
fn subject_state(state: MailState, job: &Job) -> String {
    if job.cancelled() {
        return "cancelled".to_string();
    }
    match state {
        MailState::TimeReached(pct) => format!("{}% of time limit reached", pct),
        other => other.to_string(),
    }
}

fn job_vars(job: &Job, datetime_format: &str) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    vars.insert("JOB_ID", job.id.clone());
    vars.insert("JOB_NAME", job.name.clone());
    vars.insert("PARTITION", job.partition.clone());
    vars.insert("START", job.start_str(datetime_format));
    vars.insert("END", job.end_str(datetime_format));
    vars.insert("WORKDIR", job.workdir.clone());
    vars.insert(
        "START_TS",
        job.start_ts.map_or_else(|| "N/A".to_string(), |t| t.to_string()),
    );
    vars.insert(
        "END_TS",
        job.end_ts.map_or_else(|| "N/A".to_string(), |t| t.to_string()),
    );
    vars.insert("ELAPSED", job.elapsed_str());
    vars.insert("EXIT_STATE", job.state().unwrap_or("N/A").to_string());
    vars.insert("EXIT_CODE", job.exit_code.clone());
    vars.insert("ADMIN_COMMENT", job.admin_comment.clone());
    vars.insert("COMMENT", job.comment.clone());
    vars.insert("MEMORY", job.requested_mem_str());
    vars.insert("MAX_MEMORY", job.max_rss_str());
    vars.insert("NODES", job.nodes_str());
    vars.insert("NODE_LIST", job.nodelist.clone());
    vars.insert("STDOUT", job.stdout.clone());
    vars.insert("STDERR", job.stderr.clone());
    vars.insert("CPU_EFFICIENCY", job.cpu_efficiency_str());
    vars.insert("CPU_TIME", job.used_cpu_str());
    vars.insert("WALLCLOCK", job.wc_string());
    vars.insert("WALLCLOCK_ACCURACY", job.wc_accuracy_str());
    vars
}

/// Tail the job's output files with the owner's privileges and render the
/// job_output template for both formats. Empty strings when not applicable.
async fn tailed_output(
    ctx: &SendContext,
    job: &Job,
) -> Result<(String, String), TemplateError> {
    let cfg = &ctx.config;
    if cfg.tail_lines == 0
        || !job.did_start()
        || job.stdout == "?"
        || job.stdout == "N/A"
        || !check_output_file_path(&job.stdout)
    {
        return Ok((String::new(), String::new()));
    }

    let mut targets = vec![job.stdout.clone()];
    if job.separate_output() && job.stderr != "?" && job.stderr != "N/A" {
        targets.push(job.stderr.clone());
    }

    let mut html = String::new();
    let mut text = String::new();
    {
        let _guard = drop_to_user(&job.user, &job.group);
        for target in &targets {
            let tail = tail_file(&cfg.tail_exe, target, cfg.tail_lines).await;
            let mut vars: HashMap<&str, String> = HashMap::new();
            vars.insert("OUTPUT_LINES", cfg.tail_lines.to_string());
            vars.insert("OUTPUT_FILE", target.clone());
            vars.insert("JOB_OUTPUT", tail);
            html.push_str(&render(ctx.templates.html("job_output"), &vars)?);
            text.push_str(&render(ctx.templates.text("job_output"), &vars)?);
        }
    }
    Ok((html, text))
}

/// Render the full message for one job.
async fn compose(
    ctx: &SendContext,
    state: MailState,
    record: &SpoolRecord,
    job: &Job,
) -> Result<OutgoingMail, TemplateError> {
    let cfg = &ctx.config;
    let bundle = bundle_name(state, job, record.array_summary);

    let table_vars = job_vars(job, &cfg.datetime_format);
    let job_table_html = render(ctx.templates.html("job_table"), &table_vars)?;
    let job_table_text = render(ctx.templates.text("job_table"), &table_vars)?;

    let mut sig_vars: HashMap<&str, String> = HashMap::new();
    sig_vars.insert("EMAIL_FROM", cfg.email_from_name.clone());
    let signature_html = render(ctx.templates.html("signature"), &sig_vars)?;
    let signature_text = render(ctx.templates.text("signature"), &sig_vars)?;

    let (output_html, output_text) = if state.is_end_state() || state == MailState::Requeued {
        tailed_output(ctx, job).await?
    } else {
        (String::new(), String::new())
    };

    let mut vars = HashMap::new();
    vars.insert("CSS", ctx.css.clone());
    vars.insert("JOB_ID", job.id.clone());
    vars.insert("USER", user_real_name(&job.user));
    vars.insert("CLUSTER", job.cluster.clone());
    vars.insert("END_TXT", end_text(state));
    if let Some(array_id) = job.array_id {
        vars.insert("ARRAY_JOB_ID", array_id.to_string());
    }
    if let Some(het_id) = job.hetjob_id {
        vars.insert("HET_JOB_ID", het_id.to_string());
    }
    if let MailState::TimeReached(pct) = state {
        vars.insert("REACHED", pct.to_string());
        let remaining = job.wallclock.unwrap_or(0) * (100 - pct.min(100) as u64) / 100;
        vars.insert("REMAINING", format_duration(remaining));
    }

    let mut html_vars = vars.clone();
    html_vars.insert("JOB_TABLE", job_table_html);
    html_vars.insert("SIGNATURE", signature_html);
    html_vars.insert("JOB_OUTPUT", output_html);
    let body_html = render(ctx.templates.html(bundle), &html_vars)?;

    let mut text_vars = vars;
    text_vars.insert("JOB_TABLE", job_table_text);
    text_vars.insert("SIGNATURE", signature_text);
    text_vars.insert("JOB_OUTPUT", output_text);
    let body_text = render(ctx.templates.text(bundle), &text_vars)?;

    let mut subject_vars: HashMap<&str, String> = HashMap::new();
    subject_vars.insert("CLUSTER", job.cluster.clone());
    subject_vars.insert("JOB_ID", job.id.clone());
    subject_vars.insert("JOB_NAME", job.name.clone());
    subject_vars.insert("STATE", subject_state(state, job));
    let subject = render(&cfg.email_subject, &subject_vars)?;

    Ok(OutgoingMail {
        from_address: cfg.email_from_address.clone(),
        from_name: cfg.email_from_name.clone(),
        to: record.email.clone(),
        subject,
        body_text,
        body_html,
    })
}
