use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

use crate::config::{ArchiveRoots, PASSFILE_VAR, require_env};
use crate::error::FetchError;

/// Bulk copy of an archive-relative file list from the remote root into the
/// local root.
pub trait TransferTool {
    fn sync(&self, list_file: &Path, roots: &ArchiveRoots) -> Result<(), FetchError>;
}

#[derive(Debug, Clone)]
pub struct RsyncTool {
    program: PathBuf,
    password_file: Utf8PathBuf,
}

impl RsyncTool {
    pub fn new(program: impl Into<PathBuf>, password_file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            password_file: password_file.into(),
        }
    }

    pub fn from_env() -> Result<Self, FetchError> {
        let program =
            find_in_path("rsync").ok_or_else(|| FetchError::MissingTool("rsync".to_string()))?;
        let password_file = require_env(PASSFILE_VAR)?;
        Ok(Self::new(program, password_file))
    }

    pub fn args(&self, list_file: &Path, roots: &ArchiveRoots) -> Vec<String> {
        vec![
            "-av".to_string(),
            "--password-file".to_string(),
            self.password_file.to_string(),
            format!("--files-from={}", list_file.display()),
            format!("{}/", roots.remote()),
            format!("{}/", roots.local()),
        ]
    }
}

impl TransferTool for RsyncTool {
    fn sync(&self, list_file: &Path, roots: &ArchiveRoots) -> Result<(), FetchError> {
        let args = self.args(list_file, roots);
        info!("running {} {}", self.program.display(), args.join(" "));
        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .map_err(|err| FetchError::ToolFailure {
                tool: self.program.display().to_string(),
                status: format!("failed to start: {err}"),
            })?;
        if status.success() {
            return Ok(());
        }
        let status = match status.code() {
            Some(code) => code.to_string(),
            None => "terminated by signal".to_string(),
        };
        Err(FetchError::ToolFailure {
            tool: self.program.display().to_string(),
            status,
        })
    }
}

/// Write one path per line to a fresh temporary file. The file is removed
/// when the returned handle is dropped.
pub fn write_list_file(paths: &[&Utf8Path]) -> Result<NamedTempFile, FetchError> {
    let mut file = tempfile::Builder::new()
        .prefix("coadd-flist-")
        .suffix(".dat")
        .tempfile()
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    info!("writing file list to: {}", file.path().display());
    for path in paths {
        writeln!(file, "{path}").map_err(|err| FetchError::Filesystem(err.to_string()))?;
    }
    file.flush()
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    Ok(file)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
