//! Shared application state and the sandbox instance registry.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::{Backend, Config};
use crate::error::GatewayError;
use crate::sandbox::{LocalSandbox, MemorySandbox, Sandbox};
use crate::validate::valid_id;

/// Header naming the sandbox instance a request addresses.
pub const SANDBOX_ID_HEADER: &str = "x-sandbox-id";
pub const DEFAULT_SANDBOX_ID: &str = "default";

/// Thread-safe instance storage. Instances are created on first reference
/// and live as long as the process.
pub type Instances = Arc<RwLock<HashMap<String, Arc<dyn Sandbox>>>>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub instances: Instances,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            instances: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The instance for `id`, created with the configured backend if this is
    /// its first use.
    pub async fn instance(&self, id: &str) -> Arc<dyn Sandbox> {
        if let Some(sandbox) = self.instances.read().await.get(id) {
            return sandbox.clone();
        }

        let mut instances = self.instances.write().await;
        instances
            .entry(id.to_string())
            .or_insert_with(|| {
                info!(sandbox = id, backend = self.config.backend.as_str(), "creating sandbox instance");
                let sandbox: Arc<dyn Sandbox> = match self.config.backend {
                    Backend::Local => Arc::new(LocalSandbox::new(
                        id,
                        self.config.public_host.clone(),
                        self.config.exec_timeout,
                    )),
                    Backend::Memory => Arc::new(
                        MemorySandbox::new(id).with_public_host(self.config.public_host.clone()),
                    ),
                };
                sandbox
            })
            .clone()
    }

    /// Register a pre-built instance under its own id, replacing any
    /// existing one.
    pub async fn insert_instance(&self, sandbox: Arc<dyn Sandbox>) {
        let id = sandbox.id().to_string();
        self.instances.write().await.insert(id, sandbox);
    }
}

/// Extractor resolving the sandbox instance a request addresses.
pub struct Instance(pub Arc<dyn Sandbox>);

#[axum::async_trait]
impl FromRequestParts<AppState> for Instance {
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = match parts.headers.get(SANDBOX_ID_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .filter(|id| valid_id(id))
                .ok_or_else(|| {
                    GatewayError::validation("Invalid sandbox id")
                        .with_context("header", SANDBOX_ID_HEADER)
                })?,
            None => DEFAULT_SANDBOX_ID,
        };
        Ok(Instance(state.instance(id).await))
    }
}
