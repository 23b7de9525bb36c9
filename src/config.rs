//! Runtime configuration, assembled once from the command line in `main`.

use std::fmt;
use std::time::Duration;

use zeroize::Zeroizing;

/// Which capability backend new sandbox instances are created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// The gateway runs inside the container it controls.
    Local,
    /// In-memory filesystem and scripted command results, for dry runs.
    Memory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Memory => "memory",
        }
    }
}

/// Settings for the zellij web server and its proxy.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Loopback port zellij's web server binds.
    pub zellij_port: u16,
    /// Public port the socat proxy listens on and the platform exposes.
    pub proxy_port: u16,
    /// Fixed wait between spawning a process and probing it.
    pub settle: Duration,
    pub config_dir: String,
    pub token_path: String,
    pub public_host: String,
}

impl ServiceConfig {
    pub fn layouts_dir(&self) -> String {
        format!("{}/layouts", self.config_dir.trim_end_matches('/'))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            zellij_port: 8082,
            proxy_port: 8083,
            settle: Duration::from_millis(2000),
            config_dir: "/root/.config/zellij".to_string(),
            token_path: "/root/.zellij-web-token".to_string(),
            public_host: "localhost".to_string(),
        }
    }
}

/// Object-storage credentials handed to the storage manager.
#[derive(Clone, Default)]
pub struct StorageCredentials {
    pub account_id: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<Zeroizing<String>>,
}

impl StorageCredentials {
    pub const NAMES: [&'static str; 3] =
        ["R2_ACCOUNT_ID", "AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"];

    pub fn new(
        account_id: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    ) -> Self {
        let present = |v: Option<String>| v.filter(|s| !s.is_empty());
        Self {
            account_id: present(account_id),
            access_key_id: present(access_key_id),
            secret_access_key: present(secret_access_key).map(Zeroizing::new),
        }
    }

    /// Names of the credentials that are not set.
    pub fn missing(&self) -> Vec<&'static str> {
        let [account, key, secret] = Self::NAMES;
        let mut missing = Vec::new();
        if self.account_id.is_none() {
            missing.push(account);
        }
        if self.access_key_id.is_none() {
            missing.push(key);
        }
        if self.secret_access_key.is_none() {
            missing.push(secret);
        }
        missing
    }

    /// R2 S3-compatible endpoint for the configured account.
    pub fn endpoint(&self) -> Option<String> {
        self.account_id
            .as_ref()
            .map(|account| format!("https://{}.r2.cloudflarestorage.com", account))
    }
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub workspace_root: String,
    pub backend: Backend,
    pub public_host: String,
    pub mount_root: String,
    pub exec_timeout: Duration,
    pub service: ServiceConfig,
    pub credentials: StorageCredentials,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            workspace_root: "/workspace".to_string(),
            backend: Backend::Local,
            public_host: "localhost".to_string(),
            mount_root: "/mnt".to_string(),
            exec_timeout: Duration::from_secs(300),
            service: ServiceConfig::default(),
            credentials: StorageCredentials::default(),
        }
    }
}
