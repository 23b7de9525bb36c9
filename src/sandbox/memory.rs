//! In-memory backend. Files live in a map, commands are answered by a
//! handler closure and every call is recorded so callers can inspect what
//! reached the sandbox.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{preview_url, ExecutionResult, ExposeOptions, ExposedPort, MountOptions, Sandbox};
use crate::error::CapabilityError;

type ExecHandler = Box<dyn Fn(&str) -> ExecutionResult + Send + Sync>;

/// A bucket mount as received by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub bucket: String,
    pub mount_path: String,
    pub read_only: bool,
}

pub struct MemorySandbox {
    id: String,
    public_host: String,
    exec_handler: ExecHandler,
    unavailable: Option<String>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    exec_log: Mutex<Vec<String>>,
    exposed: Mutex<HashSet<u16>>,
    mounts: Mutex<Vec<MountRecord>>,
    unmounts: Mutex<Vec<String>>,
}

impl MemorySandbox {
    /// Every command succeeds with empty output.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_host: "localhost".to_string(),
            exec_handler: Box::new(|_| ExecutionResult::default()),
            unavailable: None,
            files: Mutex::new(BTreeMap::new()),
            exec_log: Mutex::new(Vec::new()),
            exposed: Mutex::new(HashSet::new()),
            mounts: Mutex::new(Vec::new()),
            unmounts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_exec_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) -> ExecutionResult + Send + Sync + 'static,
    {
        self.exec_handler = Box::new(handler);
        self
    }

    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = host.into();
        self
    }

    /// Make every capability call fail as if the sandbox were unreachable.
    pub fn unavailable(mut self, reason: impl Into<String>) -> Self {
        self.unavailable = Some(reason.into());
        self
    }

    pub async fn exec_log(&self) -> Vec<String> {
        self.exec_log.lock().await.clone()
    }

    pub async fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().await.get(path).cloned()
    }

    pub async fn mount_calls(&self) -> Vec<MountRecord> {
        self.mounts.lock().await.clone()
    }

    pub async fn unmount_calls(&self) -> Vec<String> {
        self.unmounts.lock().await.clone()
    }

    /// Mark a port as exposed without going through [`Sandbox::expose_port`].
    pub async fn mark_exposed(&self, port: u16) {
        self.exposed.lock().await.insert(port);
    }

    fn check_available(&self) -> Result<(), CapabilityError> {
        match &self.unavailable {
            Some(reason) => Err(CapabilityError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, command: &str) -> Result<ExecutionResult, CapabilityError> {
        self.check_available()?;
        self.exec_log.lock().await.push(command.to_string());
        Ok((self.exec_handler)(command))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CapabilityError> {
        self.check_available()?;
        let files = self.files.lock().await;
        if is_directory(&files, path) {
            return Err(CapabilityError::IsDirectory(path.to_string()));
        }
        files
            .get(path)
            .cloned()
            .ok_or_else(|| CapabilityError::NotFound(path.to_string()))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), CapabilityError> {
        self.check_available()?;
        let mut files = self.files.lock().await;
        if is_directory(&files, path) {
            return Err(CapabilityError::IsDirectory(path.to_string()));
        }
        files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn expose_port(
        &self,
        port: u16,
        _options: &ExposeOptions,
    ) -> Result<ExposedPort, CapabilityError> {
        self.check_available()?;
        if !self.exposed.lock().await.insert(port) {
            return Err(CapabilityError::PortAlreadyExposed(port));
        }
        Ok(ExposedPort {
            port,
            url: preview_url(&self.public_host, port),
        })
    }

    async fn mount_bucket(
        &self,
        bucket: &str,
        mount_path: &str,
        options: &MountOptions<'_>,
    ) -> Result<(), CapabilityError> {
        self.check_available()?;
        self.mounts.lock().await.push(MountRecord {
            bucket: bucket.to_string(),
            mount_path: mount_path.to_string(),
            read_only: options.read_only,
        });
        Ok(())
    }

    async fn unmount_bucket(&self, mount_path: &str) -> Result<(), CapabilityError> {
        self.check_available()?;
        self.unmounts.lock().await.push(mount_path.to_string());
        Ok(())
    }
}

/// A path is a directory once some stored file lives below it.
fn is_directory(files: &BTreeMap<String, Vec<u8>>, path: &str) -> bool {
    let prefix = format!("{}/", path.trim_end_matches('/'));
    files
        .range(prefix.clone()..)
        .next()
        .is_some_and(|(name, _)| name.starts_with(&prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_exec_and_uses_handler() {
        let sandbox = MemorySandbox::new("t").with_exec_handler(|cmd| {
            if cmd.starts_with("false") {
                ExecutionResult::failed(1, "")
            } else {
                ExecutionResult::ok("fine")
            }
        });
        assert_eq!(sandbox.exec("true").await.unwrap().stdout, "fine");
        assert_eq!(sandbox.exec("false").await.unwrap().exit_code, 1);
        assert_eq!(sandbox.exec_log().await, vec!["true", "false"]);
    }

    #[tokio::test]
    async fn test_unavailable_fails_every_call() {
        let sandbox = MemorySandbox::new("t").unavailable("connection reset");
        assert!(matches!(
            sandbox.exec("ls").await,
            Err(CapabilityError::Unavailable(_))
        ));
        assert!(sandbox.write_file("/workspace/a", b"x").await.is_err());
        assert!(sandbox.exec_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_parent_of_a_file_is_a_directory() {
        let sandbox = MemorySandbox::new("t");
        sandbox.write_file("/workspace/dir/a.txt", b"x").await.unwrap();
        assert!(matches!(
            sandbox.read_file("/workspace/dir").await,
            Err(CapabilityError::IsDirectory(_))
        ));
        assert!(matches!(
            sandbox.write_file("/workspace/dir/", b"y").await,
            Err(CapabilityError::IsDirectory(_))
        ));
        assert!(matches!(
            sandbox.read_file("/workspace/di").await,
            Err(CapabilityError::NotFound(_))
        ));
    }
}
