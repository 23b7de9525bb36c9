//! Object-storage buckets mounted into the sandbox filesystem.
//!
//! Mount state is never tracked here. `status` and `list` ask the sandbox
//! (`mountpoint`, `df`, `/proc/mounts`) so answers stay correct across
//! gateway restarts.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::StorageCredentials;
use crate::error::{GatewayError, Result};
use crate::exec::ExecutionBridge;
use crate::path_guard::PathGuard;
use crate::sandbox::MountOptions;
use crate::shell::shell_escape;
use crate::validate::valid_bucket;

const FUSE_TYPE: &str = "fuse.s3fs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageAction {
    Mount,
    Unmount,
    Status,
    List,
}

impl StorageAction {
    pub const ALL: [StorageAction; 4] = [
        StorageAction::Mount,
        StorageAction::Unmount,
        StorageAction::Status,
        StorageAction::List,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageAction::Mount => "mount",
            StorageAction::Unmount => "unmount",
            StorageAction::Status => "status",
            StorageAction::List => "list",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(StorageAction::as_str).collect()
    }

    pub fn parse(action: Option<&str>) -> Result<Self> {
        let Some(action) = action.filter(|a| !a.is_empty()) else {
            return Err(GatewayError::validation("Missing required field: action")
                .with_context("validActions", Self::names()));
        };
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == action)
            .ok_or_else(|| {
                GatewayError::validation(format!("Unknown action: {}", action))
                    .with_context("validActions", Self::names())
            })
    }
}

/// An active bucket mount as seen in the sandbox's mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountDescriptor {
    /// `None` when s3fs reports its generic source name.
    pub bucket_name: Option<String>,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MountResponse {
    pub success: bool,
    pub bucket: String,
    pub mount_path: String,
    /// For an existing mount, the option found in the mount table; `None`
    /// when the mount is not an s3fs mount.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
    pub already_mounted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmountResponse {
    pub success: bool,
    pub mount_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStatus {
    pub success: bool,
    pub mount_path: String,
    pub mounted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MountList {
    pub success: bool,
    pub mounts: Vec<MountDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StorageStatus {
    Path(PathStatus),
    All(MountList),
}

pub struct StorageManager {
    bridge: ExecutionBridge,
    credentials: StorageCredentials,
    guard: PathGuard,
}

impl StorageManager {
    pub fn new(bridge: ExecutionBridge, credentials: StorageCredentials, mount_root: &str) -> Self {
        Self {
            bridge,
            credentials,
            guard: PathGuard::new(mount_root),
        }
    }

    /// Mount points must sit strictly below the mount root.
    fn mount_point(&self, path: &str) -> Result<String> {
        let path = self.guard.check(path)?;
        if path == self.guard.root() {
            return Err(GatewayError::validation("Mount path must be below the mount root")
                .with_context("mountPath", path)
                .with_context("root", self.guard.root()));
        }
        Ok(path)
    }

    async fn is_mounted(&self, path: &str) -> Result<bool> {
        let result = self
            .bridge
            .exec(&format!("mountpoint -q {}", shell_escape(path)), None)
            .await?;
        Ok(result.success())
    }

    pub async fn mount(
        &self,
        bucket: Option<&str>,
        mount_path: Option<&str>,
        read_only: bool,
    ) -> Result<MountResponse> {
        let missing = self.credentials.missing();
        if !missing.is_empty() {
            let hint = format!(
                "Set {} in the gateway's environment",
                StorageCredentials::NAMES.join(", ")
            );
            return Err(GatewayError::validation("Storage credentials are not configured")
                .with_context("missing", missing)
                .with_context("hint", hint));
        }

        let bucket = bucket
            .filter(|b| !b.is_empty())
            .ok_or_else(|| GatewayError::validation("Missing required field: bucket"))?;
        if !valid_bucket(bucket) {
            return Err(GatewayError::validation(format!("Invalid bucket name: {}", bucket))
                .with_context("bucket", bucket));
        }
        let default_path = format!("{}/{}", self.guard.root().trim_end_matches('/'), bucket);
        let path = self.mount_point(mount_path.unwrap_or(&default_path))?;

        if self.is_mounted(&path).await? {
            let current = self
                .list()
                .await?
                .mounts
                .into_iter()
                .find(|m| m.mount_path == path)
                .map(|m| m.read_only);
            info!(bucket, mount_path = %path, read_only = ?current, "already mounted");
            return Ok(MountResponse {
                success: true,
                bucket: bucket.to_string(),
                mount_path: path,
                read_only: current,
                already_mounted: true,
                listing: None,
                error: None,
            });
        }

        let endpoint = self
            .credentials
            .endpoint()
            .ok_or_else(|| GatewayError::validation("Storage account id is not configured"))?;
        let options = MountOptions {
            endpoint,
            read_only,
            credentials: &self.credentials,
        };
        self.bridge
            .sandbox()
            .mount_bucket(bucket, &path, &options)
            .await?;
        info!(bucket, mount_path = %path, read_only, "bucket mounted");

        let listing = self
            .bridge
            .exec(&format!("ls -la {}", shell_escape(&path)), None)
            .await?;
        if !listing.success() {
            warn!(mount_path = %path, stderr = %listing.stderr.trim(), "mount verification failed");
        }
        Ok(MountResponse {
            success: listing.success(),
            bucket: bucket.to_string(),
            mount_path: path,
            read_only: Some(read_only),
            already_mounted: false,
            error: (!listing.success()).then(|| listing.stderr.trim().to_string()),
            listing: Some(listing.stdout),
        })
    }

    pub async fn unmount(&self, mount_path: Option<&str>) -> Result<UnmountResponse> {
        let path = mount_path
            .filter(|p| !p.is_empty())
            .ok_or_else(|| GatewayError::validation("Missing required field: mountPath"))?;
        let path = self.mount_point(path)?;
        self.bridge.sandbox().unmount_bucket(&path).await?;
        info!(mount_path = %path, "bucket unmounted");
        Ok(UnmountResponse {
            success: true,
            mount_path: path,
        })
    }

    pub async fn status(&self, mount_path: Option<&str>) -> Result<StorageStatus> {
        let Some(path) = mount_path.filter(|p| !p.is_empty()) else {
            return Ok(StorageStatus::All(self.list().await?));
        };
        let path = self.guard.check(path)?;
        let mounted = self.is_mounted(&path).await?;
        let usage = if mounted {
            let df = self
                .bridge
                .exec(&format!("df -h {}", shell_escape(&path)), None)
                .await?;
            df.success().then(|| df.stdout.trim().to_string())
        } else {
            None
        };
        Ok(StorageStatus::Path(PathStatus {
            success: true,
            mount_path: path,
            mounted,
            usage,
        }))
    }

    pub async fn list(&self) -> Result<MountList> {
        let result = self.bridge.exec("cat /proc/mounts", None).await?;
        if !result.success() {
            return Ok(MountList {
                success: false,
                mounts: Vec::new(),
                error: Some(result.stderr.trim().to_string()),
            });
        }
        Ok(MountList {
            success: true,
            mounts: result.stdout.lines().filter_map(parse_mount_line).collect(),
            error: None,
        })
    }
}

/// Parse one `/proc/mounts` line, keeping only s3fs mounts.
fn parse_mount_line(line: &str) -> Option<MountDescriptor> {
    let mut fields = line.split_whitespace();
    let source = fields.next()?;
    let mount_path = unescape_octal(fields.next()?);
    if fields.next()? != FUSE_TYPE {
        return None;
    }
    let read_only = fields.next().is_some_and(|opts| opts.split(',').any(|o| o == "ro"));
    let bucket_name = match source {
        "s3fs" => None,
        bucket => Some(unescape_octal(bucket)),
    };
    Some(MountDescriptor {
        bucket_name,
        mount_path,
        read_only,
    })
}

/// The kernel writes space, tab, newline and backslash as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let digits = bytes
            .get(i + 1..i + 4)
            .filter(|d| bytes[i] == b'\\' && d.iter().all(|b| (b'0'..=b'7').contains(b)));
        if let Some(digits) = digits {
            let code = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecutionResult, MemorySandbox};
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn credentials() -> StorageCredentials {
        StorageCredentials::new(
            Some("acct".into()),
            Some("AKIA".into()),
            Some("secret-key".into()),
        )
    }

    fn manager(sandbox: Arc<MemorySandbox>, credentials: StorageCredentials) -> StorageManager {
        StorageManager::new(ExecutionBridge::new(sandbox), credentials, "/mnt")
    }

    fn not_mounted() -> MemorySandbox {
        MemorySandbox::new("t").with_exec_handler(|cmd| {
            if cmd.starts_with("mountpoint") {
                ExecutionResult::failed(32, "")
            } else {
                ExecutionResult::ok("total 0\n")
            }
        })
    }

    #[tokio::test]
    async fn test_missing_credentials_never_mount() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let creds = StorageCredentials::new(Some("acct".into()), None, None);
        let err = manager(sandbox.clone(), creds)
            .mount(Some("data"), None, false)
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        match &err {
            GatewayError::Validation { context, .. } => {
                let hint = context["hint"].as_str().unwrap();
                for name in StorageCredentials::NAMES {
                    assert!(hint.contains(name));
                }
                assert_eq!(context["missing"].as_array().unwrap().len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(sandbox.mount_calls().await.is_empty());
        assert!(sandbox.exec_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_error_never_echoes_secret() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let err = manager(sandbox, credentials())
            .mount(Some("Bad_Bucket"), None, false)
            .await
            .unwrap_err();
        let body = format!("{:?} {}", err, err);
        assert!(!body.contains("secret-key"));
    }

    #[tokio::test]
    async fn test_mount_defaults_path_and_verifies() {
        let sandbox = Arc::new(not_mounted());
        let response = manager(sandbox.clone(), credentials())
            .mount(Some("data"), None, true)
            .await
            .unwrap();

        assert!(response.success);
        assert!(!response.already_mounted);
        assert_eq!(response.mount_path, "/mnt/data");
        assert_eq!(
            sandbox.mount_calls().await,
            vec![crate::sandbox::MountRecord {
                bucket: "data".into(),
                mount_path: "/mnt/data".into(),
                read_only: true,
            }]
        );
        assert_eq!(
            sandbox.exec_log().await,
            vec!["mountpoint -q '/mnt/data'", "ls -la '/mnt/data'"]
        );
    }

    #[tokio::test]
    async fn test_mount_is_idempotent() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let response = manager(sandbox.clone(), credentials())
            .mount(Some("data"), Some("/mnt/shared"), false)
            .await
            .unwrap();
        assert!(response.success);
        assert!(response.already_mounted);
        assert_eq!(response.read_only, None);
        assert!(sandbox.mount_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_existing_mount_reports_its_own_read_only_flag() {
        let sandbox = Arc::new(MemorySandbox::new("t").with_exec_handler(|cmd| {
            if cmd == "cat /proc/mounts" {
                ExecutionResult::ok("data /mnt/data fuse.s3fs ro,nosuid,nodev 0 0\n")
            } else {
                ExecutionResult::ok("")
            }
        }));
        let response = manager(sandbox.clone(), credentials())
            .mount(Some("data"), None, false)
            .await
            .unwrap();
        assert!(response.already_mounted);
        assert_eq!(response.read_only, Some(true));
        assert!(sandbox.mount_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_mount_path_must_stay_under_root() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let storage = manager(sandbox.clone(), credentials());
        for path in ["/etc", "/mnt/../etc", "/mnt", "/mnt-other/data"] {
            let err = storage.mount(Some("data"), Some(path), false).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST, "{path}");
        }
        assert!(sandbox.exec_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_unmount() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let storage = manager(sandbox.clone(), StorageCredentials::default());
        let err = storage.unmount(None).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let response = storage.unmount(Some("/mnt/data/")).await.unwrap();
        assert_eq!(response.mount_path, "/mnt/data");
        assert_eq!(sandbox.unmount_calls().await, vec!["/mnt/data"]);
    }

    #[tokio::test]
    async fn test_status_for_path() {
        let sandbox = Arc::new(MemorySandbox::new("t").with_exec_handler(|cmd| {
            if cmd.starts_with("df") {
                ExecutionResult::ok("Filesystem Size Used Avail Use% Mounted on\ns3fs 256T 0 256T 0% /mnt/data\n")
            } else {
                ExecutionResult::ok("")
            }
        }));
        let status = manager(sandbox, StorageCredentials::default())
            .status(Some("/mnt/data"))
            .await
            .unwrap();
        match status {
            StorageStatus::Path(status) => {
                assert!(status.mounted);
                assert!(status.usage.unwrap().contains("/mnt/data"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_reads_mount_table() {
        let table = "proc /proc proc rw,nosuid 0 0\n\
                     s3fs /mnt/data fuse.s3fs rw,nosuid,nodev,user_id=0 0 0\n\
                     s3fs /mnt/my\\040logs fuse.s3fs ro,nosuid 0 0\n\
                     tmpfs /tmp tmpfs rw 0 0\n";
        let sandbox = Arc::new(MemorySandbox::new("t").with_exec_handler(move |_| ExecutionResult::ok(table)));
        let list = manager(sandbox, StorageCredentials::default()).list().await.unwrap();
        assert!(list.success);
        assert_eq!(
            list.mounts,
            vec![
                MountDescriptor {
                    bucket_name: None,
                    mount_path: "/mnt/data".into(),
                    read_only: false,
                },
                MountDescriptor {
                    bucket_name: None,
                    mount_path: "/mnt/my logs".into(),
                    read_only: true,
                },
            ]
        );
    }

    #[test]
    fn test_parse_mount_line_with_bucket_source() {
        let mount = parse_mount_line("archive /mnt/archive fuse.s3fs ro 0 0").unwrap();
        assert_eq!(mount.bucket_name.as_deref(), Some("archive"));
        assert!(mount.read_only);
        assert!(parse_mount_line("/dev/sda1 / ext4 rw 0 0").is_none());
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(StorageAction::parse(Some("list")).unwrap(), StorageAction::List);
        assert!(StorageAction::parse(Some("format")).is_err());
        assert!(StorageAction::parse(None).is_err());
    }
}
