//! sandbox-gateway - HTTP gateway into an isolated container instance.
//!
//! Usage:
//!   sandbox-gateway serve [--port 8080] [--backend local|memory]

use std::process::exit;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use sandbox_gateway::{http_server, AppState, Backend, Config, ServiceConfig, StorageCredentials};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// No Debug: the arguments carry the storage secret.
#[derive(Parser)]
#[command(name = "sandbox-gateway")]
#[command(about = "HTTP gateway for commands, files and services inside a sandbox")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),
}

#[derive(Args)]
struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "GATEWAY_PORT", default_value = "8080")]
    port: u16,

    /// Directory file operations are confined to
    #[arg(long, env = "GATEWAY_WORKSPACE_ROOT", default_value = "/workspace")]
    workspace_root: String,

    /// Capability backend for sandbox instances
    #[arg(long, env = "GATEWAY_BACKEND", value_enum, default_value = "local")]
    backend: Backend,

    /// Host name used in exposed-port URLs
    #[arg(long, env = "GATEWAY_PUBLIC_HOST", default_value = "localhost")]
    public_host: String,

    /// Directory bucket mounts are confined to
    #[arg(long, env = "GATEWAY_MOUNT_ROOT", default_value = "/mnt")]
    mount_root: String,

    /// Loopback port of the zellij web server
    #[arg(long, env = "ZELLIJ_WEB_PORT", default_value = "8082")]
    zellij_port: u16,

    /// Public port of the proxy in front of zellij
    #[arg(long, env = "ZELLIJ_PROXY_PORT", default_value = "8083")]
    proxy_port: u16,

    /// Wait after spawning a service before probing it, in milliseconds
    #[arg(long, env = "GATEWAY_SETTLE_MS", default_value = "2000")]
    settle_ms: u64,

    /// Upper bound for a single command, in seconds
    #[arg(long, env = "GATEWAY_EXEC_TIMEOUT_SECS", default_value = "300")]
    exec_timeout_secs: u64,

    /// Zellij configuration directory; layouts are written below it
    #[arg(long, env = "ZELLIJ_CONFIG_DIR", default_value = "/root/.config/zellij")]
    zellij_config_dir: String,

    /// Where create-token stores the web login token
    #[arg(long, env = "ZELLIJ_TOKEN_PATH", default_value = "/root/.zellij-web-token")]
    token_path: String,

    /// Cloudflare account id for R2 bucket mounts
    #[arg(long, env = "R2_ACCOUNT_ID")]
    r2_account_id: Option<String>,

    /// Access key id for R2 bucket mounts
    #[arg(long, env = "AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,

    /// Secret access key for R2 bucket mounts
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,
}

impl ServeArgs {
    fn into_config(self) -> Config {
        Config {
            port: self.port,
            workspace_root: self.workspace_root,
            backend: self.backend,
            public_host: self.public_host.clone(),
            mount_root: self.mount_root,
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
            service: ServiceConfig {
                zellij_port: self.zellij_port,
                proxy_port: self.proxy_port,
                settle: Duration::from_millis(self.settle_ms),
                config_dir: self.zellij_config_dir,
                token_path: self.token_path,
                public_host: self.public_host,
            },
            credentials: StorageCredentials::new(
                self.r2_account_id,
                self.aws_access_key_id,
                self.aws_secret_access_key,
            ),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = args.into_config();
            let missing = config.credentials.missing();
            if !missing.is_empty() {
                info!(?missing, "storage credentials incomplete, bucket mounts disabled");
            }
            info!(
                backend = config.backend.as_str(),
                workspace = %config.workspace_root,
                "configuration loaded"
            );

            if let Err(e) = http_server::run_server(AppState::new(config)).await {
                error!("Server error: {}", e);
                exit(1);
            }
        }
    }
}
