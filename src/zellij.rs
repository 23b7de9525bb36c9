//! Lifecycle of the zellij web front end.
//!
//! Two background processes make up the service: zellij's web server bound
//! to loopback, and a socat proxy that republishes it on a public port.
//! Neither is tracked in memory. Every call re-derives their state from
//! `pgrep` and a loopback connection attempt, so repeated or concurrent
//! starts (even from separate gateway processes) never spawn duplicates.

use futures_util::future::try_join;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{CapabilityError, GatewayError, Result};
use crate::exec::{ExecutionBridge, StepResult};
use crate::sandbox::{preview_url, ExposeOptions};
use crate::shell::shell_escape;
use crate::validate::valid_label;

/// Written verbatim to `<config dir>/config.kdl` by setup.
pub const ZELLIJ_CONFIG: &str = r#"// Managed by sandbox-gateway
default_layout "default"
default_shell "bash"
pane_frames false
copy_on_select true
session_serialization true
web_server_ip "127.0.0.1"
web_sharing "on"
"#;

pub const DEFAULT_LAYOUT: &str = r#"layout {
    pane size=1 borderless=true {
        plugin location="zellij:tab-bar"
    }
    pane
    pane size=2 borderless=true {
        plugin location="zellij:status-bar"
    }
}
"#;

const DEV_LAYOUT: &str = r#"layout {
    cwd "/workspace"
    default_tab_template {
        pane size=1 borderless=true {
            plugin location="zellij:tab-bar"
        }
        children
        pane size=2 borderless=true {
            plugin location="zellij:status-bar"
        }
    }
    tab name="code" focus=true {
        pane split_direction="vertical" {
            pane size="60%"
            pane split_direction="horizontal" {
                pane
                pane
            }
        }
    }
    tab name="shell" {
        pane
    }
}
"#;

/// Built-in layouts `setup-layout` can install.
pub const LAYOUTS: &[(&str, &str)] = &[("default", DEFAULT_LAYOUT), ("dev", DEV_LAYOUT)];

const ZELLIJ_LOG: &str = "/tmp/zellij-web.log";
const PROXY_LOG: &str = "/tmp/zellij-proxy.log";
const NO_SESSIONS: &str = "No active zellij sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZellijAction {
    Version,
    ListSessions,
    Layouts,
    SetupLayout,
    StartWeb,
    CreateToken,
    WebStatus,
    GetUrl,
    KillSession,
}

impl ZellijAction {
    pub const ALL: [ZellijAction; 9] = [
        ZellijAction::Version,
        ZellijAction::ListSessions,
        ZellijAction::Layouts,
        ZellijAction::SetupLayout,
        ZellijAction::StartWeb,
        ZellijAction::CreateToken,
        ZellijAction::WebStatus,
        ZellijAction::GetUrl,
        ZellijAction::KillSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ZellijAction::Version => "version",
            ZellijAction::ListSessions => "list-sessions",
            ZellijAction::Layouts => "layouts",
            ZellijAction::SetupLayout => "setup-layout",
            ZellijAction::StartWeb => "start-web",
            ZellijAction::CreateToken => "create-token",
            ZellijAction::WebStatus => "web-status",
            ZellijAction::GetUrl => "get-url",
            ZellijAction::KillSession => "kill-session",
        }
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(ZellijAction::as_str).collect()
    }

    /// Unknown or missing actions are a client error naming the valid set.
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

/// Derived from probes, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    Stopped,
    RunningUnreachable,
    RunningReady,
}

impl ServiceState {
    pub fn derive(status: &ProcessStatus) -> Self {
        match (status.running, status.reachable) {
            (false, _) => ServiceState::Stopped,
            (true, false) => ServiceState::RunningUnreachable,
            (true, true) => ServiceState::RunningReady,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessStatus {
    pub running: bool,
    pub reachable: bool,
    pub port: u16,
}

/// Mapping from the loopback service port to its public address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExposedEndpoint {
    pub internal_port: u16,
    pub public_port: u16,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exposure {
    #[serde(flatten)]
    pub endpoint: ExposedEndpoint,
    pub already_exposed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionList {
    pub success: bool,
    pub sessions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutList {
    pub success: bool,
    pub directory: String,
    pub layouts: Vec<String>,
    pub available: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LayoutInstalled {
    pub success: bool,
    pub layout: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWebReport {
    pub success: bool,
    pub state: ServiceState,
    pub zellij: ProcessStatus,
    pub proxy: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<ExposedEndpoint>,
    pub steps: Vec<StepResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebStatus {
    pub success: bool,
    pub state: ServiceState,
    pub zellij: ProcessStatus,
    pub proxy: ProcessStatus,
    pub raw_status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlResponse {
    pub success: bool,
    #[serde(flatten)]
    pub exposure: Exposure,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenIssued {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKilled {
    pub session: String,
    #[serde(flatten)]
    pub outcome: CommandOutcome,
}

/// A background process the manager can probe and spawn.
struct ServiceProcess {
    name: &'static str,
    /// `pgrep -f` pattern; the bracket keeps it from matching the probing
    /// shell's own command line.
    pattern: String,
    port: u16,
    spawn: String,
    log: &'static str,
}

pub struct ZellijManager {
    bridge: ExecutionBridge,
    config: ServiceConfig,
}

impl ZellijManager {
    pub fn new(bridge: ExecutionBridge, config: ServiceConfig) -> Self {
        Self { bridge, config }
    }

    fn web_server(&self) -> ServiceProcess {
        let port = self.config.zellij_port;
        // Matches the server's own command line only, not `zellij web --status`
        // or `--create-token` runs.
        ServiceProcess {
            name: "zellij",
            pattern: format!("[z]ellij web --start --ip 127[.]0[.]0[.]1 --port {}( |$)", port),
            port,
            spawn: format!("zellij web --start --ip 127.0.0.1 --port {}", port),
            log: ZELLIJ_LOG,
        }
    }

    fn proxy(&self) -> ServiceProcess {
        ServiceProcess {
            name: "proxy",
            pattern: format!("[s]ocat TCP-LISTEN:{}", self.config.proxy_port),
            port: self.config.proxy_port,
            spawn: format!(
                "socat TCP-LISTEN:{},fork,reuseaddr,bind=0.0.0.0 TCP:127.0.0.1:{}",
                self.config.proxy_port, self.config.zellij_port
            ),
            log: PROXY_LOG,
        }
    }

    pub async fn version(&self) -> Result<CommandOutcome> {
        let result = self.bridge.exec("zellij --version", None).await?;
        Ok(CommandOutcome {
            success: result.success(),
            output: result.stdout.trim().to_string(),
            stderr: result.stderr.trim().to_string(),
            exit_code: result.exit_code,
        })
    }

    pub async fn list_sessions(&self) -> Result<SessionList> {
        let result = self
            .bridge
            .exec("zellij list-sessions --short --no-formatting", None)
            .await?;

        if result.success() {
            let sessions = result
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(SessionList {
                success: true,
                sessions,
                error: None,
            });
        }
        // zellij exits non-zero when there is nothing to list.
        let no_sessions = result.stderr.contains(NO_SESSIONS) || result.stdout.contains(NO_SESSIONS);
        Ok(SessionList {
            success: no_sessions,
            sessions: Vec::new(),
            error: (!no_sessions).then(|| result.stderr.trim().to_string()),
        })
    }

    pub async fn layouts(&self) -> Result<LayoutList> {
        let directory = self.config.layouts_dir();
        let result = self
            .bridge
            .exec(&format!("ls -1 -- {} 2>/dev/null", shell_escape(&directory)), None)
            .await?;
        // A missing directory just means nothing is installed yet.
        let mut layouts: Vec<String> = result
            .stdout
            .lines()
            .filter_map(|l| l.trim().strip_suffix(".kdl"))
            .map(str::to_string)
            .collect();
        layouts.sort();
        Ok(LayoutList {
            success: true,
            directory,
            layouts,
            available: LAYOUTS.iter().map(|(name, _)| *name).collect(),
        })
    }

    pub async fn setup_layout(&self, layout: Option<&str>) -> Result<LayoutInstalled> {
        let name = layout.unwrap_or("default");
        let blob = LAYOUTS
            .iter()
            .find(|(n, _)| *n == name && valid_label(name))
            .map(|(_, blob)| *blob)
            .ok_or_else(|| {
                GatewayError::validation(format!("Unknown layout: {}", name)).with_context(
                    "available",
                    LAYOUTS.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
                )
            })?;

        let path = format!("{}/{}.kdl", self.config.layouts_dir(), name);
        self.bridge
            .sandbox()
            .write_file(&path, blob.as_bytes())
            .await?;
        info!(layout = name, path = %path, "layout installed");
        Ok(LayoutInstalled {
            success: true,
            layout: name.to_string(),
            path,
        })
    }

    async fn is_running(&self, process: &ServiceProcess) -> std::result::Result<bool, CapabilityError> {
        let command = format!("pgrep -f {} >/dev/null 2>&1", shell_escape(&process.pattern));
        let running = self.bridge.exec(&command, None).await?.success();
        debug!(process = process.name, running, "process probe");
        Ok(running)
    }

    async fn is_reachable(&self, port: u16) -> std::result::Result<bool, CapabilityError> {
        let connect = format!("</dev/tcp/127.0.0.1/{}", port);
        let command = format!("timeout 2 bash -c {} >/dev/null 2>&1", shell_escape(&connect));
        let reachable = self.bridge.exec(&command, None).await?.success();
        debug!(port, reachable, "socket probe");
        Ok(reachable)
    }

    async fn probe(&self, process: &ServiceProcess) -> std::result::Result<ProcessStatus, CapabilityError> {
        let (running, reachable) =
            try_join(self.is_running(process), self.is_reachable(process.port)).await?;
        Ok(ProcessStatus {
            running,
            reachable,
            port: process.port,
        })
    }

    /// Start `process` unless it already runs, then probe its port once.
    /// Outcomes are appended to `steps`; nothing here is retried.
    async fn ensure_running(&self, process: &ServiceProcess, steps: &mut Vec<StepResult>) -> ProcessStatus {
        let mut status = ProcessStatus {
            running: false,
            reachable: false,
            port: process.port,
        };
        let start_step = format!("start-{}", process.name);

        match self.is_running(process).await {
            Ok(true) => {
                status.running = true;
                steps.push(StepResult::ok(start_step, Some("already running".to_string())));
            }
            Ok(false) => {
                let spawn = format!("nohup {} > {} 2>&1 &", process.spawn, process.log);
                match self.bridge.exec(&spawn, None).await {
                    Ok(result) if result.success() => {
                        info!(process = process.name, "spawned, waiting to settle");
                        tokio::time::sleep(self.config.settle).await;
                        match self.is_running(process).await {
                            Ok(true) => {
                                status.running = true;
                                steps.push(StepResult::ok(start_step, Some("started".to_string())));
                            }
                            Ok(false) => steps.push(StepResult::failed(
                                start_step,
                                format!("process exited after spawn, see {}", process.log),
                            )),
                            Err(e) => steps.push(StepResult::failed(start_step, e.to_string())),
                        }
                    }
                    Ok(result) => steps.push(StepResult::from_result(start_step, &result)),
                    Err(e) => steps.push(StepResult::failed(start_step, e.to_string())),
                }
            }
            Err(e) => steps.push(StepResult::failed(start_step, e.to_string())),
        }

        if status.running {
            let probe_step = format!("probe-{}", process.name);
            match self.is_reachable(process.port).await {
                Ok(true) => {
                    status.reachable = true;
                    steps.push(StepResult::ok(probe_step, None));
                }
                Ok(false) => steps.push(StepResult::failed(
                    probe_step,
                    format!("port {} is not accepting connections", process.port),
                )),
                Err(e) => steps.push(StepResult::failed(probe_step, e.to_string())),
            }
        }
        if !status.reachable {
            warn!(process = process.name, running = status.running, "service not ready");
        }
        status
    }

    /// Expose the proxy port. An existing exposure counts as success and the
    /// URL is rebuilt from the configured public host.
    pub async fn expose(&self) -> std::result::Result<Exposure, CapabilityError> {
        let options = ExposeOptions {
            name: Some("zellij-web".to_string()),
        };
        let public_port = self.config.proxy_port;
        let (url, already_exposed) = match self
            .bridge
            .sandbox()
            .expose_port(public_port, &options)
            .await
        {
            Ok(exposed) => (exposed.url, false),
            Err(CapabilityError::PortAlreadyExposed(port)) => {
                info!(port, "port already exposed");
                (preview_url(&self.config.public_host, port), true)
            }
            Err(e) => return Err(e),
        };
        Ok(Exposure {
            endpoint: ExposedEndpoint {
                internal_port: self.config.zellij_port,
                public_port,
                url,
            },
            already_exposed,
        })
    }

    pub async fn start_web(&self) -> StartWebReport {
        let mut steps = Vec::new();
        let zellij = self.ensure_running(&self.web_server(), &mut steps).await;
        let proxy = self.ensure_running(&self.proxy(), &mut steps).await;

        let mut endpoint = None;
        if proxy.running {
            match self.expose().await {
                Ok(exposure) => {
                    steps.push(StepResult::ok("expose", Some(exposure.endpoint.url.clone())));
                    endpoint = Some(exposure.endpoint);
                }
                Err(e) => steps.push(StepResult::failed("expose", e.to_string())),
            }
        } else {
            steps.push(StepResult::failed("expose", "proxy is not running"));
        }

        StartWebReport {
            success: steps.iter().all(|s| s.success),
            state: ServiceState::derive(&zellij),
            zellij,
            proxy,
            endpoint,
            steps,
        }
    }

    pub async fn web_status(&self) -> Result<WebStatus> {
        let (zellij, proxy) = try_join(self.probe(&self.web_server()), self.probe(&self.proxy())).await?;
        let raw = self.bridge.exec("zellij web --status 2>&1", None).await?;
        Ok(WebStatus {
            success: true,
            state: ServiceState::derive(&zellij),
            zellij,
            proxy,
            raw_status: raw.stdout.trim().to_string(),
        })
    }

    pub async fn get_url(&self) -> Result<UrlResponse> {
        let exposure = self.expose().await?;
        Ok(UrlResponse {
            success: true,
            exposure,
        })
    }

    /// Ask the running web server for a new login token and persist it,
    /// readable only by its owner, at the configured token path.
    pub async fn create_token(&self) -> Result<TokenIssued> {
        if !self.is_running(&self.web_server()).await? {
            return Err(GatewayError::validation("zellij web server is not running")
                .with_context("hint", "run the start-web action first"));
        }

        let result = self.bridge.exec("zellij web --create-token", None).await?;
        if !result.success() {
            return Ok(TokenIssued {
                success: false,
                token: None,
                saved_to: None,
                error: Some(StepResult::from_result("create-token", &result).detail.unwrap_or_default()),
            });
        }
        let Some(token) = parse_token(&result.stdout) else {
            return Ok(TokenIssued {
                success: false,
                token: None,
                saved_to: None,
                error: Some("no token in zellij output".to_string()),
            });
        };

        // Create the file 0600 before the token is written into it.
        let path = &self.config.token_path;
        let prepare = format!(
            "mkdir -p -- \"$(dirname -- {path})\" && install -m 600 /dev/null {path}",
            path = shell_escape(path)
        );
        let prepared = self.bridge.exec(&prepare, None).await?;
        if !prepared.success() {
            warn!(path = %path, exit_code = prepared.exit_code, "could not create token file");
            return Ok(TokenIssued {
                success: false,
                token: None,
                saved_to: None,
                error: Some(
                    StepResult::from_result("prepare-token-file", &prepared)
                        .detail
                        .unwrap_or_default(),
                ),
            });
        }
        self.bridge
            .sandbox()
            .write_file(path, format!("{}\n", token).as_bytes())
            .await?;
        info!(path = %path, "web token created");

        Ok(TokenIssued {
            success: true,
            token: Some(token),
            saved_to: Some(path.clone()),
            error: None,
        })
    }

    pub async fn kill_session(&self, session: Option<&str>) -> Result<SessionKilled> {
        let Some(session) = session.map(str::trim).filter(|s| !s.is_empty()) else {
            return Err(GatewayError::validation("Missing required field: session"));
        };
        let result = self
            .bridge
            .exec(&format!("zellij kill-session {}", shell_escape(session)), None)
            .await?;
        info!(session, exit_code = result.exit_code, "kill-session");
        Ok(SessionKilled {
            session: session.to_string(),
            outcome: CommandOutcome {
                success: result.success(),
                output: result.stdout.trim().to_string(),
                stderr: result.stderr.trim().to_string(),
                exit_code: result.exit_code,
            },
        })
    }
}

/// The token is the last non-empty line, minus any `name: ` prefix.
fn parse_token(output: &str) -> Option<String> {
    let line = output.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let token = line.rsplit_once(": ").map_or(line, |(_, t)| t).trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecutionResult, MemorySandbox};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Emulates the sandbox's process table: the first spawn of each process
    /// makes it visible to `pgrep` and opens its port.
    fn fake_host(spawns: Arc<[AtomicUsize; 2]>, ports_open: bool) -> MemorySandbox {
        MemorySandbox::new("t").with_exec_handler(move |cmd| {
            let idx = if cmd.contains("socat") || cmd.contains("8083") { 1 } else { 0 };
            if cmd.starts_with("pgrep") {
                if spawns[idx].load(Ordering::SeqCst) > 0 {
                    ExecutionResult::ok("")
                } else {
                    ExecutionResult::failed(1, "")
                }
            } else if cmd.starts_with("nohup") {
                spawns[idx].fetch_add(1, Ordering::SeqCst);
                ExecutionResult::ok("")
            } else if cmd.starts_with("timeout") {
                let up = ports_open && spawns[idx].load(Ordering::SeqCst) > 0;
                if up {
                    ExecutionResult::ok("")
                } else {
                    ExecutionResult::failed(1, "")
                }
            } else if cmd == "zellij web --create-token" {
                ExecutionResult::ok("Created token successfully\n\ntoken_1: 0d3c4e5f-aaaa\n")
            } else {
                ExecutionResult::ok("")
            }
        })
    }

    fn manager(sandbox: Arc<MemorySandbox>) -> ZellijManager {
        let config = ServiceConfig {
            settle: Duration::ZERO,
            ..ServiceConfig::default()
        };
        ZellijManager::new(ExecutionBridge::new(sandbox), config)
    }

    #[test]
    fn test_parse_action() {
        assert_eq!(ZellijAction::parse(Some("start-web")).unwrap(), ZellijAction::StartWeb);
        for action in ZellijAction::ALL {
            assert_eq!(ZellijAction::parse(Some(action.as_str())).unwrap(), action);
        }
        let err = ZellijAction::parse(Some("reboot")).unwrap_err();
        match err {
            GatewayError::Validation { context, .. } => {
                assert_eq!(context["validActions"].as_array().unwrap().len(), 9)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(ZellijAction::parse(None).is_err());
    }

    #[test]
    fn test_parse_token() {
        assert_eq!(
            parse_token("Created token successfully\n\ntoken_1: abc-123\n").as_deref(),
            Some("abc-123")
        );
        assert_eq!(parse_token("abc-123").as_deref(), Some("abc-123"));
        assert_eq!(parse_token("\n  \n"), None);
    }

    #[test]
    fn test_state_derivation() {
        let status = |running, reachable| ProcessStatus { running, reachable, port: 1 };
        assert_eq!(ServiceState::derive(&status(false, false)), ServiceState::Stopped);
        assert_eq!(ServiceState::derive(&status(true, false)), ServiceState::RunningUnreachable);
        assert_eq!(ServiceState::derive(&status(true, true)), ServiceState::RunningReady);
    }

    #[tokio::test]
    async fn test_start_web_twice_spawns_once() {
        let spawns = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
        let sandbox = Arc::new(fake_host(spawns.clone(), true));
        let manager = manager(sandbox.clone());

        let first = manager.start_web().await;
        assert!(first.success, "{:?}", first.steps);
        assert_eq!(first.state, ServiceState::RunningReady);
        assert_eq!(first.endpoint.as_ref().unwrap().url, "http://localhost:8083/");

        let second = manager.start_web().await;
        assert!(second.success, "{:?}", second.steps);
        assert_eq!(spawns[0].load(Ordering::SeqCst), 1);
        assert_eq!(spawns[1].load(Ordering::SeqCst), 1);
        assert_eq!(second.steps[0].detail.as_deref(), Some("already running"));
        assert_eq!(second.endpoint.unwrap().public_port, 8083);
    }

    #[tokio::test]
    async fn test_start_web_reports_unreachable_service() {
        let spawns = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
        let manager = manager(Arc::new(fake_host(spawns, false)));

        let report = manager.start_web().await;
        assert!(!report.success);
        assert_eq!(report.state, ServiceState::RunningUnreachable);
        assert!(report.zellij.running && !report.zellij.reachable);
        let failed: Vec<_> = report.steps.iter().filter(|s| !s.success).map(|s| s.step.as_str()).collect();
        assert_eq!(failed, vec!["probe-zellij", "probe-proxy"]);
    }

    #[tokio::test]
    async fn test_start_web_reports_failed_spawn() {
        let sandbox = MemorySandbox::new("t").with_exec_handler(|cmd| {
            if cmd.starts_with("nohup socat") {
                ExecutionResult::failed(127, "socat: not found")
            } else if cmd.starts_with("pgrep -f '[s]ocat") {
                ExecutionResult::failed(1, "")
            } else {
                ExecutionResult::ok("")
            }
        });
        let report = manager(Arc::new(sandbox)).start_web().await;
        assert!(!report.success);
        assert!(report.zellij.running);
        assert!(!report.proxy.running);
        let last = report.steps.last().unwrap();
        assert_eq!(last.step, "expose");
        assert!(!last.success);
    }

    #[tokio::test]
    async fn test_get_url_when_already_exposed() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        sandbox.mark_exposed(8083).await;

        let response = manager(sandbox).get_url().await.unwrap();
        assert!(response.success);
        assert!(response.exposure.already_exposed);
        assert_eq!(response.exposure.endpoint.url, "http://localhost:8083/");
    }

    #[tokio::test]
    async fn test_get_url_transport_failure() {
        let sandbox = Arc::new(MemorySandbox::new("t").unavailable("platform down"));
        let err = manager(sandbox).get_url().await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_web_status_reports_each_process() {
        let spawns = Arc::new([AtomicUsize::new(1), AtomicUsize::new(0)]);
        let status = manager(Arc::new(fake_host(spawns, true))).web_status().await.unwrap();
        assert_eq!(status.state, ServiceState::RunningReady);
        assert!(status.zellij.running && status.zellij.reachable);
        assert!(!status.proxy.running && !status.proxy.reachable);
    }

    #[tokio::test]
    async fn test_create_token_requires_running_server() {
        let spawns = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
        let err = manager(Arc::new(fake_host(spawns, true))).create_token().await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_token_persists_token() {
        let spawns = Arc::new([AtomicUsize::new(1), AtomicUsize::new(0)]);
        let sandbox = Arc::new(fake_host(spawns, true));
        let issued = manager(sandbox.clone()).create_token().await.unwrap();
        assert!(issued.success);
        assert_eq!(issued.token.as_deref(), Some("0d3c4e5f-aaaa"));
        assert_eq!(
            sandbox.file("/root/.zellij-web-token").await.unwrap(),
            b"0d3c4e5f-aaaa\n"
        );
        let log = sandbox.exec_log().await;
        assert!(log.iter().any(|c| c.contains("install -m 600 /dev/null '/root/.zellij-web-token'")));
    }

    #[tokio::test]
    async fn test_create_token_needs_private_file() {
        let sandbox = Arc::new(MemorySandbox::new("t").with_exec_handler(|cmd| {
            if cmd == "zellij web --create-token" {
                ExecutionResult::ok("token_1: abc-123\n")
            } else if cmd.starts_with("mkdir -p --") {
                ExecutionResult::failed(1, "install: cannot create regular file: Read-only file system")
            } else {
                ExecutionResult::ok("")
            }
        }));

        let issued = manager(sandbox.clone()).create_token().await.unwrap();
        assert!(!issued.success);
        assert!(issued.token.is_none());
        assert!(issued.error.unwrap().contains("Read-only file system"));
        assert!(sandbox.file("/root/.zellij-web-token").await.is_none());
    }

    #[tokio::test]
    async fn test_only_the_web_server_counts_as_running() {
        use crate::sandbox::LocalSandbox;
        use tokio::process::{Child, Command};

        let config = ServiceConfig {
            zellij_port: 18082,
            ..ServiceConfig::default()
        };
        let sandbox = Arc::new(LocalSandbox::new("t", "localhost", Duration::from_secs(10)));
        let manager = ZellijManager::new(ExecutionBridge::new(sandbox), config);
        let spawn = |line: &str| -> Child {
            Command::new("sh")
                .arg("-c")
                .arg(format!("sleep 30; : {}", line))
                .kill_on_drop(true)
                .spawn()
                .unwrap()
        };

        let others = [
            spawn("zellij web --status"),
            spawn("zellij web --create-token"),
            spawn("zellij web --start --ip 127.0.0.1 --port 180820"),
        ];
        assert!(!manager.is_running(&manager.web_server()).await.unwrap());
        drop(others);

        let _server = spawn("zellij web --start --ip 127.0.0.1 --port 18082");
        assert!(manager.is_running(&manager.web_server()).await.unwrap());
    }

    #[tokio::test]
    async fn test_kill_session_escapes_name() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let killed = manager(sandbox.clone()).kill_session(Some("it's; rm -rf /")).await.unwrap();
        assert!(killed.outcome.success);
        assert_eq!(
            sandbox.exec_log().await,
            vec![r"zellij kill-session 'it'\''s; rm -rf /'"]
        );

        let err = manager(sandbox).kill_session(Some("  ")).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_sessions_without_sessions() {
        let sandbox = MemorySandbox::new("t")
            .with_exec_handler(|_| ExecutionResult::failed(1, "No active zellij sessions found.\n"));
        let list = manager(Arc::new(sandbox)).list_sessions().await.unwrap();
        assert!(list.success);
        assert!(list.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_setup_layout() {
        let sandbox = Arc::new(MemorySandbox::new("t"));
        let installed = manager(sandbox.clone()).setup_layout(Some("dev")).await.unwrap();
        assert_eq!(installed.path, "/root/.config/zellij/layouts/dev.kdl");
        assert_eq!(
            sandbox.file(&installed.path).await.unwrap(),
            DEV_LAYOUT.as_bytes()
        );

        let err = manager(sandbox).setup_layout(Some("../evil")).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_layouts_lists_kdl_files() {
        let sandbox = MemorySandbox::new("t")
            .with_exec_handler(|_| ExecutionResult::ok("dev.kdl\nREADME\ndefault.kdl\n"));
        let list = manager(Arc::new(sandbox)).layouts().await.unwrap();
        assert_eq!(list.layouts, vec!["default", "dev"]);
    }
}
