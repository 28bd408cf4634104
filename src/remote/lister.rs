//! Remote metric listing over ssh.

use super::{run, shell_quote, ssh_options};
use crate::error::{Error, Result};
use crate::inventory::MetricLister;
use crate::types::{path_to_metric, MetricEntry, Node, METRIC_FILE_EXT};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Lists a node's metrics by running `find` on it over ssh.
#[derive(Debug, Clone)]
pub struct SshMetricLister {
    storage_dir: PathBuf,
    ssh_options: Vec<String>,
    program: String,
}

impl SshMetricLister {
    /// Create a lister for nodes storing metrics under `storage_dir`.
    pub fn new(storage_dir: impl Into<PathBuf>, ssh_options: Vec<String>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ssh_options,
            program: "ssh".to_string(),
        }
    }

    /// Use another ssh binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// The command run on the remote node, as a single shell string.
    pub fn remote_command(&self) -> String {
        format!(
            "find {} -name {} -printf {}",
            shell_quote(&self.storage_dir.to_string_lossy()),
            shell_quote(&format!("*.{}", METRIC_FILE_EXT)),
            shell_quote(r"%T@ %s %P\n"),
        )
    }

    /// Full ssh argument list for `node`.
    pub fn command_args(&self, node: &Node) -> Vec<String> {
        let mut args = ssh_options(&self.ssh_options);
        args.push(node.ssh_target());
        args.push("--".to_string());
        args.push(self.remote_command());
        args
    }
}

#[async_trait]
impl MetricLister for SshMetricLister {
    async fn list(&self, node: &Node) -> Result<Vec<MetricEntry>> {
        let output = run(&self.program, &self.command_args(node))
            .await
            .map_err(|e| match e {
                Error::TransferFailure { output, .. } => Error::unreachable(&node.id, output),
                other => Error::unreachable(&node.id, other.to_string()),
            })?;

        let entries = parse_listing(&output)?;
        debug!(node = %node, metrics = entries.len(), "Parsed remote listing");
        Ok(entries)
    }
}

/// Parse `find -printf '%T@ %s %P\n'` output.
///
/// Lines for files that are not metric files are skipped. A malformed line
/// fails the whole listing, since a partial listing would look like missing
/// metrics.
pub fn parse_listing(output: &str) -> Result<Vec<MetricEntry>> {
    let mut entries = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut fields = line.splitn(3, ' ');
        let (Some(mtime), Some(size), Some(path)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::Parse(format!("malformed listing line '{}'", line)));
        };

        let mtime: f64 = mtime
            .parse()
            .map_err(|_| Error::Parse(format!("invalid mtime in '{}'", line)))?;
        let size: u64 = size
            .parse()
            .map_err(|_| Error::Parse(format!("invalid size in '{}'", line)))?;

        if let Some(name) = path_to_metric(path) {
            entries.push(MetricEntry::new(name, mtime.max(0.0) as u64, size));
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let output = "1700000000.2500000000 4096 servers/web1/cpu.wsp\n\
                      1600000000.0000000000 12 app/with space.wsp\n\
                      1600000000.0000000000 12 README\n\n";

        let entries = parse_listing(output).unwrap();
        assert_eq!(
            entries,
            vec![
                MetricEntry::new("servers.web1.cpu", 1_700_000_000, 4096),
                MetricEntry::new("app.with space", 1_600_000_000, 12),
            ]
        );
    }

    #[test]
    fn test_parse_listing_rejects_garbage() {
        assert!(matches!(parse_listing("garbage\n"), Err(Error::Parse(_))));
        assert!(matches!(parse_listing("x 1 a.wsp\n"), Err(Error::Parse(_))));
        assert!(matches!(parse_listing("1.0 -1 a.wsp\n"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_command_args() {
        let ssh = vec!["-p".into(), "22".into()];
        let lister = SshMetricLister::new("/opt/graphite/storage/whisper", ssh);
        let node = Node::new("store1").with_ssh_user("graphite");

        let args = lister.command_args(&node);
        let n = args.len();
        assert_eq!(args[0], "-o");
        assert_eq!(args[1], "PasswordAuthentication=no");
        assert_eq!(&args[4..6], &["-p", "22"]);
        assert_eq!(args[n - 3], "graphite@store1");
        assert_eq!(args[n - 2], "--");
        assert_eq!(
            args[n - 1],
            r"find /opt/graphite/storage/whisper -name '*.wsp' -printf '%T@ %s %P\n'"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_is_unreachable() {
        let lister = SshMetricLister::new("/tmp", Vec::new()).with_program("false");
        let err = lister.list(&Node::new("down")).await.unwrap_err();
        assert!(matches!(err, Error::NodeUnreachable { ref node, .. } if node == "down"));
    }
}
