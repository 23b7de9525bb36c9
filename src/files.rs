//! Workspace file operations.
//!
//! Every path goes through [`PathGuard`] before anything reaches the
//! sandbox. Reads and writes use the direct file capability; listing and
//! deletion go through escaped shell commands.

use serde::Serialize;
use tracing::info;

use crate::error::{GatewayError, Result};
use crate::exec::ExecutionBridge;
use crate::path_guard::PathGuard;
use crate::sandbox::ExecutionResult;
use crate::shell::shell_escape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileListing {
    pub path: String,
    pub files: Vec<FileEntry>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub path: String,
    pub success: bool,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

pub struct FileService {
    bridge: ExecutionBridge,
    guard: PathGuard,
}

impl FileService {
    pub fn new(bridge: ExecutionBridge, guard: PathGuard) -> Self {
        Self { bridge, guard }
    }

    /// Entries under `path` (the workspace root when absent), one level deep
    /// unless `recursive`.
    pub async fn list(&self, path: Option<&str>, recursive: bool) -> Result<FileListing> {
        let path = self.guard.check(path.unwrap_or(self.guard.root()))?;
        let depth = if recursive { "" } else { " -maxdepth 1" };
        let command = format!(
            "find {} -mindepth 1{} -printf '%y\\t%s\\t%p\\n'",
            shell_escape(&path),
            depth
        );
        let result = self.bridge.exec(&command, None).await?;

        let mut files: Vec<FileEntry> = result.stdout.lines().filter_map(parse_find_line).collect();
        if !result.success()
            && files.is_empty()
            && result.stderr.contains("No such file or directory")
        {
            return Err(GatewayError::not_found(format!("Directory not found: {}", path))
                .with_context("path", path));
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        // find still prints what it could read when a subdirectory fails.
        let stderr = result.stderr.trim();
        Ok(FileListing {
            path,
            files,
            success: result.success(),
            error: (!stderr.is_empty()).then(|| stderr.to_string()),
        })
    }

    /// Returns the normalized path and the file's bytes.
    pub async fn read(&self, path: &str) -> Result<(String, Vec<u8>)> {
        let path = self.guard.check(path)?;
        let content = self.bridge.sandbox().read_file(&path).await?;
        Ok((path, content))
    }

    /// Create or overwrite `path`; parent directories are created as needed.
    pub async fn write(&self, path: &str, content: &[u8]) -> Result<String> {
        let path = self.guard.check(path)?;
        self.bridge.sandbox().write_file(&path, content).await?;
        info!(path = %path, bytes = content.len(), "file written");
        Ok(path)
    }

    pub async fn delete(&self, path: &str) -> Result<DeleteOutcome> {
        let path = self.guard.check(path)?;
        let ExecutionResult {
            stderr, exit_code, ..
        } = self
            .bridge
            .exec(&format!("rm -f -- {}", shell_escape(&path)), None)
            .await?;
        info!(path = %path, exit_code, "file deleted");
        Ok(DeleteOutcome {
            path,
            success: exit_code == 0,
            exit_code,
            stderr: stderr.trim().to_string(),
        })
    }
}

/// Parse one `%y\t%s\t%p` line of `find -printf` output.
fn parse_find_line(line: &str) -> Option<FileEntry> {
    let mut parts = line.splitn(3, '\t');
    let kind = match parts.next()? {
        "f" => FileKind::File,
        "d" => FileKind::Directory,
        "l" => FileKind::Symlink,
        _ => FileKind::Other,
    };
    let size = parts.next()?.parse().unwrap_or(0);
    let path = parts.next()?.to_string();
    let name = path.rsplit('/').next().unwrap_or_default().to_string();
    Some(FileEntry {
        name,
        path,
        kind,
        size,
    })
}
