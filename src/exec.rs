//! Thin adapter over [`Sandbox::exec`].

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::CapabilityError;
use crate::sandbox::{ExecutionResult, Sandbox};
use crate::shell::shell_escape;

#[derive(Clone)]
pub struct ExecutionBridge {
    sandbox: Arc<dyn Sandbox>,
}

impl ExecutionBridge {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self { sandbox }
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// Run `command`, first changing into `cwd` when given. A failing
    /// command comes back as a result with a non-zero exit code; only
    /// transport failures are errors.
    pub async fn exec(
        &self,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<ExecutionResult, CapabilityError> {
        let command = match cwd {
            Some(dir) => format!("cd {} || exit 1; {}", shell_escape(dir), command),
            None => command.to_string(),
        };
        debug!(sandbox = %self.sandbox.id(), %command, "exec");
        let result = self.sandbox.exec(&command).await?;
        debug!(
            exit_code = result.exit_code,
            stdout_len = result.stdout.len(),
            stderr_len = result.stderr.len(),
            "exec finished"
        );
        Ok(result)
    }
}

/// One step of a multi-step operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    pub step: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepResult {
    pub fn ok(step: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            step: step.into(),
            success: true,
            detail,
        }
    }

    pub fn failed(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            success: false,
            detail: Some(detail.into()),
        }
    }

    /// Step outcome from a command result; failures carry stderr, or stdout
    /// when stderr is empty.
    pub fn from_result(step: impl Into<String>, result: &ExecutionResult) -> Self {
        if result.success() {
            let out = result.stdout.trim();
            Self::ok(step, (!out.is_empty()).then(|| out.to_string()))
        } else {
            let err = match result.stderr.trim() {
                "" => result.stdout.trim(),
                err => err,
            };
            Self::failed(step, format!("exit code {}: {}", result.exit_code, err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MemorySandbox;

    #[tokio::test]
    async fn test_cwd_is_escaped_prefix() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let bridge = ExecutionBridge::new(sandbox.clone());
        bridge.exec("ls", Some("/workspace/it's here")).await.unwrap();
        bridge.exec("pwd", None).await.unwrap();
        assert_eq!(
            sandbox.exec_log().await,
            vec![r"cd '/workspace/it'\''s here' || exit 1; ls", "pwd"]
        );
    }

    #[tokio::test]
    async fn test_failing_command_is_a_result() {
        let sandbox = Arc::new(
            MemorySandbox::new("t").with_exec_handler(|_| ExecutionResult::failed(2, "no such file")),
        );
        let result = ExecutionBridge::new(sandbox).exec("cat nope", None).await.unwrap();
        assert_eq!(result.exit_code, 2);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let sandbox = Arc::new(MemorySandbox::new("t").unavailable("sandbox gone"));
        let err = ExecutionBridge::new(sandbox).exec("ls", None).await.unwrap_err();
        assert!(matches!(err, CapabilityError::Unavailable(_)));
    }

    #[test]
    fn test_step_from_result() {
        let ok = StepResult::from_result("probe", &ExecutionResult::ok("zellij 0.43.1\n"));
        assert!(ok.success);
        assert_eq!(ok.detail.as_deref(), Some("zellij 0.43.1"));

        let failed = StepResult::from_result("probe", &ExecutionResult::failed(127, "not found\n"));
        assert!(!failed.success);
        assert_eq!(failed.detail.as_deref(), Some("exit code 127: not found"));
    }
}
