//! Command-line argument parsing.
//!
//! Arguments are grouped by category. Everything except the cluster
//! topology, which lives in the configuration file, is set here.

use crate::config::{ConfigFile, SyncConfig, DEFAULT_CONFIG_FILE, DEFAULT_STORAGE_DIR};
use crate::error::Result;
use crate::sync::DEFAULT_BATCH_SIZE;
use crate::types::Timestamp;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Synchronize a carbon storage node with the nodes owning the same metrics.
#[derive(Parser, Debug, Clone)]
#[command(name = "ringsync")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    // ===== Topology =====
    /// Configuration file listing the clusters
    #[arg(short = 'C', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Cluster the local node belongs to
    #[arg(short = 'c', long = "cluster", default_value = "main")]
    pub cluster: String,

    /// Cluster to fetch from (default: the local cluster)
    #[arg(short = 'S', long = "remote-cluster")]
    pub remote_cluster: Option<String>,

    /// Name of the local node, as in the cluster's destinations
    #[arg(short = 'n', long = "node", env = "HOSTNAME")]
    pub node: String,

    // ===== Selection =====
    /// Comma separated regular expressions of metrics to exclude
    #[arg(long = "exclude", value_delimiter = ',', default_value = r"^carbon\.")]
    pub exclude: Vec<String>,

    /// Sync metrics modified at or after this Unix time
    #[arg(long = "start-time", default_value_t = 0)]
    pub start_time: Timestamp,

    /// Sync metrics modified before this Unix time (default: now)
    #[arg(long = "end-time")]
    pub end_time: Option<Timestamp>,

    /// Replace local copies that differ from the remote ones
    #[arg(long = "overwrite")]
    pub overwrite: bool,

    // ===== Transfer =====
    /// Number of metrics per rsync invocation
    #[arg(short = 'b', long = "batch-size", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Maximum number of concurrent listings and transfers
    #[arg(long = "max-parallel", default_value_t = crate::sync::DEFAULT_MAX_PARALLEL)]
    pub max_parallel: usize,

    /// Seconds before an rsync invocation is killed
    #[arg(long = "transfer-timeout", default_value_t = 3600)]
    pub transfer_timeout: u64,

    /// Seconds before a remote listing is abandoned
    #[arg(long = "list-timeout", default_value_t = 300)]
    pub list_timeout: u64,

    /// Whisper storage directory, identical on every node
    #[arg(long = "storage-dir", default_value = DEFAULT_STORAGE_DIR)]
    pub storage_dir: PathBuf,

    /// Directory for rsync file lists
    #[arg(long = "temp-dir")]
    pub temp_dir: Option<PathBuf>,

    /// Options passed to ssh. Use "--ssh-options=" if they start with '-'
    #[arg(long = "ssh-options", allow_hyphen_values = true)]
    pub ssh_options: Option<String>,

    /// Options passed to rsync. Use "--rsync-options=" if they start with '-'
    #[arg(long = "rsync-options", allow_hyphen_values = true)]
    pub rsync_options: Option<String>,

    // ===== Output =====
    /// Print the transfer plan and exit without copying anything
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Write the run result as JSON to this file
    #[arg(long = "report-json")]
    pub report_json: Option<PathBuf>,

    /// Write run metrics in Prometheus text format to this file
    #[arg(long = "metrics-file")]
    pub metrics_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

impl CliArgs {
    /// Parse the process arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Load the configuration file and resolve the run configuration.
    pub fn to_config(&self) -> Result<SyncConfig> {
        self.resolve(&ConfigFile::load(&self.config)?)
    }

    /// Resolve the run configuration against already loaded clusters.
    pub fn resolve(&self, file: &ConfigFile) -> Result<SyncConfig> {
        let exclude = self.exclude.iter().filter(|p| !p.is_empty()).cloned();
        let mut builder = SyncConfig::builder()
            .local_cluster(file.cluster(&self.cluster)?)
            .local_node(self.node.as_str())
            .storage_dir(self.storage_dir.clone())
            .batch_size(self.batch_size)
            .start_time(self.start_time)
            .overwrite(self.overwrite)
            .exclude(exclude.collect())
            .max_parallel(self.max_parallel)
            .transfer_timeout(Duration::from_secs(self.transfer_timeout))
            .list_timeout(Duration::from_secs(self.list_timeout));

        if let Some(remote) = &self.remote_cluster {
            builder = builder.remote_cluster(file.cluster(remote)?);
        }
        if let Some(end) = self.end_time {
            builder = builder.end_time(end);
        }
        if let Some(options) = &self.ssh_options {
            builder = builder.ssh_options(split_options(options));
        }
        if let Some(options) = &self.rsync_options {
            builder = builder.rsync_options(split_options(options));
        }

        builder.build()
    }
}

/// Split an option string on whitespace.
fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    const CONFIG: &str = r#"
        [clusters.main]
        destinations = ["a:2004:x", "b:2004:x", "c:2004:x"]
        replication_factor = 2

        [clusters.backup]
        destinations = ["x", "y"]
        ssh_user = "graphite"
    "#;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("ringsync").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["-n", "a"]);
        let config = args.resolve(&ConfigFile::parse(CONFIG).unwrap()).unwrap();

        assert_eq!(args.exclude, vec![r"^carbon\."]);
        assert_eq!(config.batch_size(), 1000);
        assert_eq!(config.max_parallel(), 4);
        assert_eq!(config.storage_dir(), std::path::Path::new(DEFAULT_STORAGE_DIR));
        assert_eq!(config.transfer_timeout(), Duration::from_secs(3600));
        assert!(config.remote_cluster().is_none());
        assert!(!args.dry_run);
    }

    #[test]
    fn test_full_arguments() {
        let args = parse(&[
            "-n",
            "b",
            "-S",
            "backup",
            "-b",
            "50",
            "--exclude",
            r"^carbon\.,\.tmp$",
            "--start-time",
            "100",
            "--end-time",
            "200",
            "--overwrite",
            "--ssh-options=-p 2222",
            "--rsync-options=--archive --bwlimit=1000",
        ]);
        let config = args.resolve(&ConfigFile::parse(CONFIG).unwrap()).unwrap();

        assert_eq!(config.batch_size(), 50);
        assert_eq!(config.exclude(), &[r"^carbon\.".to_string(), r"\.tmp$".to_string()]);
        assert!(config.overwrite());
        assert_eq!(config.ssh_options(), &["-p".to_string(), "2222".to_string()]);
        assert_eq!(config.rsync_options().len(), 2);
        assert_eq!(config.remote_cluster().unwrap().name, "backup");

        let window = config.time_window().unwrap();
        assert_eq!((window.start(), window.end()), (100, 200));
    }

    #[test]
    fn test_unknown_cluster() {
        let args = parse(&["-n", "a", "-S", "nope"]);
        let err = args.resolve(&ConfigFile::parse(CONFIG).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let args = parse(&["-n", "a", "-b", "0"]);
        assert!(args.resolve(&ConfigFile::parse(CONFIG).unwrap()).is_err());
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result = CliArgs::try_parse_from(["ringsync", "-n", "a", "-v", "-q"]);
        assert!(result.is_err());
    }
}
