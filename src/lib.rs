//! Sandbox gateway - HTTP front door for an isolated container instance.
//!
//! Accepts commands, manages workspace files, runs the zellij web front end
//! behind a TCP proxy and mounts object-storage buckets, all through the
//! capability layer in [`sandbox`].

#[cfg(not(target_os = "linux"))]
compile_error!("This program only works on Linux.");

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod exec;
pub mod files;
pub mod http_server;
pub mod path_guard;
pub mod sandbox;
pub mod shell;
pub mod state;
pub mod storage;
pub mod validate;
pub mod zellij;

pub use config::{Backend, Config, ServiceConfig, StorageCredentials};
pub use error::{CapabilityError, GatewayError};
pub use state::AppState;
