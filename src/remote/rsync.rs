//! Batch transfers with rsync.

use super::{run, ssh_options};
use crate::error::{Error, Result};
use crate::sync::{TransferFacility, TransferMode, TransferRequest};
use crate::types::Node;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const UPDATE_FLAG: &str = "--update";
const IGNORE_TIMES_FLAG: &str = "--ignore-times";
const MODIFY_WINDOW_FLAG: &str = "--modify-window";

/// Whether rsync's quick check is owned by the transfer mode.
fn is_mode_flag(option: &str) -> bool {
    option == UPDATE_FLAG
        || option == IGNORE_TIMES_FLAG
        || option == "-I"
        || option.starts_with(MODIFY_WINDOW_FLAG)
}

/// Copies batches with one `rsync --files-from` invocation each.
///
/// The request's options are passed to rsync as given, except the flags
/// steering the quick check. `--update` is added for update-only batches and
/// `--ignore-times` for forced ones. `--modify-window` is always dropped.
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    storage_dir: PathBuf,
    ssh_options: Vec<String>,
    temp_dir: Option<PathBuf>,
    program: String,
}

impl RsyncTransfer {
    /// Create a facility for nodes storing metrics under `storage_dir`.
    pub fn new(storage_dir: impl Into<PathBuf>, ssh_options: Vec<String>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ssh_options,
            temp_dir: None,
            program: "rsync".to_string(),
        }
    }

    /// Directory for file lists, instead of the system default.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Use another rsync binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// rsync location of a node's storage directory.
    fn endpoint(&self, node: &Node) -> String {
        let dir = self.storage_dir.to_string_lossy();
        let dir = dir.trim_end_matches('/');
        if node.is_local() {
            format!("{}/", dir)
        } else {
            format!("{}:{}/", node.ssh_target(), dir)
        }
    }

    /// Full rsync argument list for a request whose paths are in `files_from`.
    pub fn command_args(
        &self,
        request: &TransferRequest,
        files_from: &Path,
    ) -> Result<Vec<String>> {
        if !request.source.is_local() && !request.destination.is_local() {
            return Err(Error::config(format!(
                "cannot rsync between two remote nodes ({} -> {})",
                request.source, request.destination
            )));
        }

        let mut args = vec![
            "--rsh".to_string(),
            format!("ssh {}", ssh_options(&self.ssh_options).join(" ")),
            format!("--files-from={}", files_from.display()),
        ];
        args.extend(request.options.iter().filter(|o| !is_mode_flag(o)).cloned());
        args.push(match request.mode {
            TransferMode::UpdateOnly => UPDATE_FLAG.to_string(),
            TransferMode::ForceOverwrite => IGNORE_TIMES_FLAG.to_string(),
        });
        args.push(self.endpoint(&request.source));
        args.push(self.endpoint(&request.destination));
        Ok(args)
    }

    fn write_file_list(&self, paths: &[String]) -> Result<NamedTempFile> {
        let mut file = match &self.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };
        for path in paths {
            writeln!(file, "{}", path)?;
        }
        file.flush()?;
        Ok(file)
    }
}

#[async_trait]
impl TransferFacility for RsyncTransfer {
    async fn transfer(&self, request: &TransferRequest) -> Result<()> {
        if request.is_empty() {
            return Ok(());
        }

        // Removed when dropped, after rsync has exited.
        let file_list = self.write_file_list(&request.paths)?;
        let args = self.command_args(request, file_list.path())?;

        debug!(
            peer = %request.remote(),
            source = %request.source,
            destination = %request.destination,
            files = request.len(),
            mode = %request.mode,
            "Running rsync"
        );

        run(&self.program, &args).await.map(|_| ())
    }
}
