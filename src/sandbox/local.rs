//! Backend for a gateway running inside the container it controls.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::{umount2, MntFlags};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::{preview_url, ExecutionResult, ExposeOptions, ExposedPort, MountOptions, Sandbox};
use crate::error::CapabilityError;

pub struct LocalSandbox {
    id: String,
    public_host: String,
    exec_timeout: Duration,
    exposed: Mutex<HashSet<u16>>,
}

impl LocalSandbox {
    pub fn new(id: impl Into<String>, public_host: impl Into<String>, exec_timeout: Duration) -> Self {
        Self {
            id: id.into(),
            public_host: public_host.into(),
            exec_timeout,
            exposed: Mutex::new(HashSet::new()),
        }
    }

    async fn run(&self, command: &mut Command) -> Result<Output, CapabilityError> {
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CapabilityError::Unavailable(format!("spawn: {}", e)))?;

        // Dropping the wait future on timeout kills the child.
        tokio::time::timeout(self.exec_timeout, child.wait_with_output())
            .await
            .map_err(|_| CapabilityError::Timeout {
                seconds: self.exec_timeout.as_secs(),
            })?
            .map_err(CapabilityError::Io)
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn exec(&self, command: &str) -> Result<ExecutionResult, CapabilityError> {
        let output = self.run(Command::new("sh").arg("-c").arg(command)).await?;
        let exit_code = output
            .status
            .code()
            .or_else(|| output.status.signal().map(|sig| 128 + sig))
            .unwrap_or(-1);

        Ok(ExecutionResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, CapabilityError> {
        tokio::fs::read(path).await.map_err(|e| file_error(path, e))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), CapabilityError> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content)
            .await
            .map_err(|e| file_error(path, e))
    }

    async fn expose_port(
        &self,
        port: u16,
        options: &ExposeOptions,
    ) -> Result<ExposedPort, CapabilityError> {
        if !self.exposed.lock().await.insert(port) {
            return Err(CapabilityError::PortAlreadyExposed(port));
        }
        info!(sandbox = %self.id, port, name = ?options.name, "port exposed");
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
        let creds = options.credentials;
        let (Some(key), Some(secret)) = (&creds.access_key_id, &creds.secret_access_key) else {
            return Err(CapabilityError::Mount("credentials are incomplete".to_string()));
        };

        tokio::fs::create_dir_all(mount_path).await?;

        // s3fs reads its credentials from a file that must not be group or
        // world readable.
        let passwd = std::env::temp_dir().join(format!(".passwd-s3fs-{}", uuid::Uuid::new_v4()));
        let line = Zeroizing::new(format!("{}:{}\n", key, secret.as_str()));
        write_private(&passwd, line.as_bytes()).await?;

        let mut mount_opts = format!(
            "passwd_file={},url={},use_path_request_style",
            passwd.display(),
            options.endpoint
        );
        if options.read_only {
            mount_opts.push_str(",ro");
        }

        info!(bucket, mount_path, read_only = options.read_only, "mounting bucket");
        let result = self
            .run(Command::new("s3fs").arg(bucket).arg(mount_path).arg("-o").arg(&mount_opts))
            .await;
        if let Err(e) = tokio::fs::remove_file(&passwd).await {
            warn!(error = %e, "failed to remove s3fs password file");
        }

        let output = result?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Mount(format!("s3fs: {}", stderr.trim())));
        }
        Ok(())
    }

    async fn unmount_bucket(&self, mount_path: &str) -> Result<(), CapabilityError> {
        let path = PathBuf::from(mount_path);
        let result = tokio::task::spawn_blocking(move || umount2(&path, MntFlags::MNT_DETACH))
            .await
            .map_err(|e| CapabilityError::Unavailable(e.to_string()))?;

        match result {
            Ok(()) => {
                debug!(mount_path, "unmounted");
                Ok(())
            }
            Err(Errno::EINVAL) | Err(Errno::ENOENT) => {
                Err(CapabilityError::NotFound(format!("no mount at {}", mount_path)))
            }
            Err(e) => Err(CapabilityError::Mount(format!("umount {}: {}", mount_path, e))),
        }
    }
}

fn file_error(path: &str, e: std::io::Error) -> CapabilityError {
    match e.kind() {
        ErrorKind::NotFound => CapabilityError::NotFound(path.to_string()),
        _ if e.raw_os_error() == Some(Errno::EISDIR as i32) => {
            CapabilityError::IsDirectory(path.to_string())
        }
        _ => CapabilityError::Io(e),
    }
}

async fn write_private(path: &Path, content: &[u8]) -> Result<(), CapabilityError> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.flush().await?;
    Ok(())
}
