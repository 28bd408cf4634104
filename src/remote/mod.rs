//! Production listers and transfer facility built on ssh and rsync.
//!
//! Both shell out with `tokio::process`. Children are spawned with
//! `kill_on_drop`, so a timeout or cancellation that drops the future also
//! kills the process.

mod lister;
mod rsync;

pub use lister::{parse_listing, SshMetricLister};
pub use rsync::RsyncTransfer;

use crate::error::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::trace;

/// ssh options always passed first, whatever the user configures.
pub const MANDATORY_SSH_OPTIONS: &[&str] =
    &["-o", "PasswordAuthentication=no", "-o", "LogLevel=quiet"];

/// Mandatory options followed by the user's options.
pub fn ssh_options(user_options: &[String]) -> Vec<String> {
    MANDATORY_SSH_OPTIONS
        .iter()
        .map(|s| s.to_string())
        .chain(user_options.iter().cloned())
        .collect()
}

/// Quote a word for a POSIX shell.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Run a program to completion and return its stdout.
///
/// A non-zero exit becomes [`Error::TransferFailure`] carrying stderr, or
/// stdout when stderr is empty.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<String> {
    trace!(program, ?args, "Running command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if !stderr.trim().is_empty() {
        stderr.trim()
    } else if !stdout.trim().is_empty() {
        stdout.trim()
    } else {
        "<no output>"
    };

    Err(Error::TransferFailure {
        status: output.status.code(),
        output: format!("{} failed: {}", program, text),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_options_order() {
        let options = ssh_options(&["-p".to_string(), "2222".to_string()]);
        assert_eq!(&options[..4], MANDATORY_SSH_OPTIONS);
        assert_eq!(&options[4..], &["-p", "2222"]);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/opt/graphite/storage"), "/opt/graphite/storage");
        assert_eq!(shell_quote("*.wsp"), "'*.wsp'");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_failure_output() {
        let args = vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()];
        match run("sh", &args).await {
            Err(Error::TransferFailure { status, output }) => {
                assert_eq!(status, Some(3));
                assert!(output.contains("boom"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_returns_stdout() {
        let args = vec!["-c".to_string(), "echo hello".to_string()];
        assert_eq!(run("sh", &args).await.unwrap(), "hello\n");
    }
}
