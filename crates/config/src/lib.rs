//! Configuration for clawlink: gateway connection settings and the local
//! deployment the control client manages.
//!
//! Loaded from TOML (`~/.config/clawlink/clawlink.toml` by default) with
//! environment overrides for the gateway endpoint and token.

pub mod error;
pub mod loader;
pub mod schema;

pub use {
    error::{Error, Result},
    loader::{ENV_GATEWAY_TOKEN, ENV_GATEWAY_URL, config_dir, default_config_path, load, parse},
    schema::{ClawlinkConfig, ClientSection, DeploySection, GatewaySection, ReconnectSection},
};
