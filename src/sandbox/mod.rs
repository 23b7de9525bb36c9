//! Capability layer: the primitives the gateway consumes from a sandbox
//! instance.
//!
//! Everything above this module treats a sandbox as opaque. It can run a
//! shell command, read and write files, expose a port and mount or unmount
//! a bucket. Backends decide how.

mod local;
mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::StorageCredentials;
use crate::error::CapabilityError;

pub use local::LocalSandbox;
pub use memory::{MemorySandbox, MountRecord};

/// Outcome of one command. A non-zero exit code is a normal result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExposeOptions {
    /// Label shown by the platform for the exposure.
    pub name: Option<String>,
}

/// A port the platform has made publicly reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposedPort {
    pub port: u16,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MountOptions<'a> {
    /// S3-compatible endpoint URL.
    pub endpoint: String,
    pub read_only: bool,
    pub credentials: &'a StorageCredentials,
}

/// One isolated container instance.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Run `command` through a shell. Only transport problems are errors.
    async fn exec(&self, command: &str) -> Result<ExecutionResult, CapabilityError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CapabilityError>;

    /// Write `content` to `path`, creating parent directories and replacing
    /// any existing file.
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), CapabilityError>;

    /// Make `port` publicly reachable. Exposing an already exposed port
    /// fails with [`CapabilityError::PortAlreadyExposed`].
    async fn expose_port(
        &self,
        port: u16,
        options: &ExposeOptions,
    ) -> Result<ExposedPort, CapabilityError>;

    async fn mount_bucket(
        &self,
        bucket: &str,
        mount_path: &str,
        options: &MountOptions<'_>,
    ) -> Result<(), CapabilityError>;

    async fn unmount_bucket(&self, mount_path: &str) -> Result<(), CapabilityError>;
}

/// Address at which an exposed port is reachable from outside.
pub fn preview_url(public_host: &str, port: u16) -> String {
    format!("http://{}:{}/", public_host, port)
}
