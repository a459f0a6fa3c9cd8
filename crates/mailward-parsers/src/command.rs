//! Subprocess execution for the external Slurm query tools.

use camino::Utf8Path;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("failed to execute {command}: {error}")]
    Execution { command: String, error: String },
}

/// Captured result of a finished subprocess.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Execute a command and capture exit status, stdout and stderr.
///
/// A non-zero exit is not an error here: callers such as the accounting
/// parser treat it as "no jobs found" rather than a failure.
pub async fn run_command(cmd: &mut Command, name: &str) -> Result<CommandOutput, CommandError> {
    tracing::debug!("running {:?}", cmd.as_std());
    let output = cmd.output().await.map_err(|e| CommandError::Execution {
        command: name.to_string(),
        error: e.to_string(),
    })?;
    Ok(CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Return the last `lines` lines of `path` using the configured tail
/// executable. Errors are folded into the returned text so a truncated
/// output file can never abort an e-mail.
pub async fn tail_file(tail_exe: &Utf8Path, path: &str, lines: u32) -> String {
    if !std::path::Path::new(path).exists() {
        let msg = format!("mailward: file {} does not exist", path);
        tracing::error!("{}", msg);
        return msg;
    }
    let mut cmd = Command::new(tail_exe.as_std_path());
    cmd.args(["-n", &lines.to_string(), path]);
    match run_command(&mut cmd, "tail").await {
        Ok(out) if out.success() => out.stdout,
        Ok(_) => {
            let msg = format!(
                "mailward encountered an error trying to read the last {} lines of {}",
                lines, path
            );
            tracing::error!("{}", msg);
            msg
        }
        Err(e) => format!("Unable to return contents of file: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use std::io::Write;

    #[tokio::test]
    async fn test_run_command_success() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_command(&mut cmd, "echo").await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_command_not_found() {
        let mut cmd = Command::new("nonexistent_command_12345");
        let result = run_command(&mut cmd, "nonexistent").await;
        assert!(matches!(result, Err(CommandError::Execution { .. })));
    }

    #[tokio::test]
    async fn test_tail_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "one\ntwo\nthree").unwrap();
        let tail = Utf8PathBuf::from("/usr/bin/tail");
        let out = tail_file(&tail, file.path().to_str().unwrap(), 2).await;
        assert_eq!(out, "two\nthree\n");
    }

    #[tokio::test]
    async fn test_tail_missing_file() {
        let tail = Utf8PathBuf::from("/usr/bin/tail");
        let out = tail_file(&tail, "/no/such/file", 5).await;
        assert!(out.contains("does not exist"));
    }
}
