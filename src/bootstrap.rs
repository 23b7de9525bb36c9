//! One-shot environment preparation (`/setup`) and tool inventory (`/status`).

use futures_util::future::try_join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::{CapabilityError, Result};
use crate::exec::{ExecutionBridge, StepResult};
use crate::shell::shell_escape;
use crate::zellij::{DEFAULT_LAYOUT, ZELLIJ_CONFIG};

/// Tools the sandbox image is expected to ship.
pub const TOOLS: [&str; 5] = ["zellij", "socat", "git", "s3fs", "bash"];

#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub success: bool,
    pub steps: Vec<StepResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatus {
    pub name: &'static str,
    pub installed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceListing {
    pub path: String,
    pub listing: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub success: bool,
    pub tools: Vec<ToolStatus>,
    pub workspace: WorkspaceListing,
}

pub struct Bootstrap {
    bridge: ExecutionBridge,
    workspace_root: String,
    service: ServiceConfig,
}

impl Bootstrap {
    pub fn new(bridge: ExecutionBridge, workspace_root: impl Into<String>, service: ServiceConfig) -> Self {
        Self {
            bridge,
            workspace_root: workspace_root.into(),
            service,
        }
    }

    async fn command_step(&self, step: &str, command: &str) -> StepResult {
        match self.bridge.exec(command, None).await {
            Ok(result) => StepResult::from_result(step, &result),
            Err(e) => StepResult::failed(step, e.to_string()),
        }
    }

    async fn write_step(&self, step: &str, path: String, content: &str) -> StepResult {
        match self.bridge.sandbox().write_file(&path, content.as_bytes()).await {
            Ok(()) => StepResult::ok(step, Some(path)),
            Err(e) => StepResult::failed(step, e.to_string()),
        }
    }

    /// Runs every step even after a failure so the report shows exactly
    /// which ones broke.
    pub async fn setup(&self) -> SetupReport {
        let config_dir = self.service.config_dir.trim_end_matches('/');
        let steps = vec![
            self.command_step(
                "create-workspace",
                &format!("mkdir -p {}", shell_escape(&self.workspace_root)),
            )
            .await,
            self.command_step(
                "create-zellij-config-dir",
                &format!("mkdir -p {}", shell_escape(&self.service.layouts_dir())),
            )
            .await,
            self.write_step(
                "write-zellij-config",
                format!("{}/config.kdl", config_dir),
                ZELLIJ_CONFIG,
            )
            .await,
            self.write_step(
                "write-default-layout",
                format!("{}/default.kdl", self.service.layouts_dir()),
                DEFAULT_LAYOUT,
            )
            .await,
            self.command_step("verify-tools", "command -v zellij && command -v socat")
                .await,
        ];

        let success = steps.iter().all(|s| s.success);
        if success {
            info!(workspace = %self.workspace_root, "setup complete");
        } else {
            let failed: Vec<&str> = steps.iter().filter(|s| !s.success).map(|s| s.step.as_str()).collect();
            warn!(?failed, "setup finished with failures");
        }
        SetupReport { success, steps }
    }

    async fn probe_tool(&self, name: &'static str) -> std::result::Result<ToolStatus, CapabilityError> {
        let command = format!(
            "command -v {name} >/dev/null 2>&1 && {{ {name} --version 2>&1 | head -n 1; }}"
        );
        let result = self.bridge.exec(&command, None).await?;
        let version = result.stdout.trim();
        Ok(ToolStatus {
            name,
            installed: result.success(),
            version: (result.success() && !version.is_empty()).then(|| version.to_string()),
        })
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let tools = try_join_all(TOOLS.map(|tool| self.probe_tool(tool))).await?;
        let listing = self
            .bridge
            .exec(&format!("ls -la {}", shell_escape(&self.workspace_root)), None)
            .await?;
        Ok(StatusReport {
            success: true,
            tools,
            workspace: WorkspaceListing {
                path: self.workspace_root.clone(),
                listing: if listing.success() {
                    listing.stdout
                } else {
                    listing.stderr
                },
            },
        })
    }
}
