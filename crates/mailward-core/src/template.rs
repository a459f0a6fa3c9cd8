//! `$NAME` template substitution and template-set loading.
//!
//! The e-mail bodies are plain string templates with named placeholders;
//! no control flow. Each bundle name has an HTML and a plain-text variant
//! so the final message can be multipart/alternative.

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("could not read template {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },
    #[error("no value for placeholder ${0}")]
    MissingValue(String),
}

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(?:\$|(?P<name>[A-Za-z_][A-Za-z0-9_]*)|\{(?P<braced>[A-Za-z_][A-Za-z0-9_]*)\})").expect("placeholder regex"));

/// Substitute `$NAME` / `${NAME}` placeholders from `vars`.
/// `$$` renders a literal dollar; an unbound placeholder is an error.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> Result<String, TemplateError> {
    let mut missing: Option<String> = None;
    let result = PLACEHOLDER_RE.replace_all(template, |caps: &Captures| {
        let name = caps
            .name("name")
            .or_else(|| caps.name("braced"))
            .map(|m| m.as_str());
        match name {
            None => "$".to_string(),
            Some(name) => match vars.get(name) {
                Some(value) => value.clone(),
                None => {
                    if missing.is_none() {
                        missing = Some(name.to_string());
                    }
                    String::new()
                }
            },
        }
    });
    if let Some(name) = missing {
        return Err(TemplateError::MissingValue(name));
    }
    Ok(result.into_owned())
}

/// The template bundles mailward-send can render. Each name maps to
/// `html/<name>.tpl` and `text/<name>.tpl` under the templates directory.
pub const TEMPLATE_NAMES: [&str; 15] = [
    "started",
    "ended",
    "never_ran",
    "array_started",
    "array_ended",
    "array_summary_started",
    "array_summary_ended",
    "hetjob_started",
    "hetjob_ended",
    "invalid_dependency",
    "staged_out",
    "time",
    "job_output",
    "job_table",
    "signature",
];

/// All templates for one output format (HTML or text), loaded at startup.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub html: HashMap<String, String>,
    pub text: HashMap<String, String>,
}

impl TemplateSet {
    /// Load every bundle from `<dir>/html` and `<dir>/text`.
    /// A missing template file is a startup error, not a per-mail one.
    pub fn load(dir: &Utf8Path) -> Result<Self, TemplateError> {
        Ok(TemplateSet {
            html: load_format(&dir.join("html"))?,
            text: load_format(&dir.join("text"))?,
        })
    }

    pub fn html(&self, name: &str) -> &str {
        &self.html[name]
    }

    pub fn text(&self, name: &str) -> &str {
        &self.text[name]
    }
}

fn load_format(dir: &Utf8Path) -> Result<HashMap<String, String>, TemplateError> {
    let mut templates = HashMap::new();
    for name in TEMPLATE_NAMES {
        let path = dir.join(format!("{}.tpl", name));
        let content = std::fs::read_to_string(&path).map_err(|source| TemplateError::Read {
            path: path.clone(),
            source,
        })?;
        templates.insert(name.to_string(), content);
    }
    Ok(templates)
}
