use std::path::{Path, PathBuf};

use {secrecy::Secret, tracing::debug};

use crate::{
    error::{Error, Result},
    schema::ClawlinkConfig,
};

/// Overrides `gateway.url`.
pub const ENV_GATEWAY_URL: &str = "CLAWLINK_GATEWAY_URL";
/// Overrides `gateway.token`.
pub const ENV_GATEWAY_TOKEN: &str = "CLAWLINK_GATEWAY_TOKEN";

const CONFIG_FILE_NAME: &str = "clawlink.toml";

/// Returns `~/.config/clawlink` (or the platform equivalent).
pub fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "clawlink", "clawlink")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".").join(".clawlink"))
}

pub fn default_config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, the default location is read
/// when present and built-in defaults are used otherwise. Environment
/// overrides are applied last.
pub fn load(path: Option<&Path>) -> Result<ClawlinkConfig> {
    let mut config = match path {
        Some(path) => read_file(path)?,
        None => {
            let default_path = default_config_path();
            if default_path.is_file() {
                read_file(&default_path)?
            } else {
                debug!(path = %default_path.display(), "no config file, using defaults");
                ClawlinkConfig::default()
            }
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

/// Parse configuration from TOML text.
pub fn parse(text: &str, origin: &str) -> Result<ClawlinkConfig> {
    toml::from_str(text).map_err(|source| Error::Parse {
        path: origin.to_string(),
        source,
    })
}

fn read_file(path: &Path) -> Result<ClawlinkConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    parse(&text, &path.display().to_string())
}

fn apply_env_overrides(config: &mut ClawlinkConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_GATEWAY_URL).filter(|v| !v.is_empty()) {
        config.gateway.url = url;
    }
    if let Some(token) = lookup(ENV_GATEWAY_TOKEN).filter(|v| !v.is_empty()) {
        config.gateway.token = Secret::new(token);
    }
}

fn validate(config: &ClawlinkConfig) -> Result<()> {
    let gateway = &config.gateway;
    if gateway.min_protocol > gateway.max_protocol {
        return Err(Error::message(format!(
            "gateway.min_protocol ({}) is greater than gateway.max_protocol ({})",
            gateway.min_protocol, gateway.max_protocol
        )));
    }
    if !(gateway.url.starts_with("ws://") || gateway.url.starts_with("wss://")) {
        return Err(Error::message(format!(
            "gateway.url must be a ws:// or wss:// URL, got {}",
            gateway.url
        )));
    }
    if gateway.reconnect.multiplier < 1.0 {
        return Err(Error::message("gateway.reconnect.multiplier must be >= 1.0"));
    }
    Ok(())
}
