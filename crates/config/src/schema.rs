use std::{path::PathBuf, time::Duration};

use {
    clawlink_protocol::{ClientInfo, ProtocolRange, scopes},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClawlinkConfig {
    pub gateway: GatewaySection,
    pub deploy: DeploySection,
}

// ── Gateway ──────────────────────────────────────────────────────────────────

/// Connection settings for the agent gateway.
///
/// Timeouts are in milliseconds; `0` disables the request and health
/// timeouts. The handshake timeout cannot be disabled.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    /// WebSocket endpoint, e.g. `ws://10.0.0.5:18789`.
    pub url: String,

    /// Gateway auth token sent in the `connect` request.
    #[serde(serialize_with = "serialize_secret")]
    pub token: Secret<String>,

    /// Identity reported during the handshake.
    pub client: ClientSection,

    pub min_protocol: u32,
    pub max_protocol: u32,

    pub handshake_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Close a ready connection after this long without any inbound frame.
    pub health_timeout_ms: u64,

    pub reconnect: ReconnectSection,
}

impl GatewaySection {
    pub fn protocol_range(&self) -> ProtocolRange {
        ProtocolRange {
            min: self.min_protocol,
            max: self.max_protocol,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.request_timeout_ms)
    }

    pub fn health_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.health_timeout_ms)
    }

    pub fn has_token(&self) -> bool {
        !self.token.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for GatewaySection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySection")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("client", &self.client)
            .field("min_protocol", &self.min_protocol)
            .field("max_protocol", &self.max_protocol)
            .field("handshake_timeout_ms", &self.handshake_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("health_timeout_ms", &self.health_timeout_ms)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:18789".into(),
            token: Secret::new(String::new()),
            client: ClientSection::default(),
            min_protocol: clawlink_protocol::PROTOCOL_VERSION,
            max_protocol: clawlink_protocol::PROTOCOL_VERSION,
            handshake_timeout_ms: clawlink_protocol::HANDSHAKE_TIMEOUT_MS,
            request_timeout_ms: clawlink_protocol::REQUEST_TIMEOUT_MS,
            health_timeout_ms: clawlink_protocol::HEALTH_TIMEOUT_MS,
            reconnect: ReconnectSection::default(),
        }
    }
}

/// Client descriptor sent once at handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    pub caps: Vec<String>,
    pub scopes: Vec<String>,
}

impl ClientSection {
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.clone(),
            display_name: (!self.display_name.is_empty()).then(|| self.display_name.clone()),
            version: self.version.clone(),
            platform: self.platform.clone(),
            mode: self.mode.clone(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            id: "openclaw-control-ui".into(),
            display_name: "Clawlink".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            platform: std::env::consts::OS.into(),
            mode: "ui".into(),
            caps: Vec::new(),
            scopes: vec![scopes::READ.into(), scopes::WRITE.into(), scopes::ADMIN.into()],
        }
    }
}

/// Exponential backoff used after an unexpected disconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

// ── Deployment ───────────────────────────────────────────────────────────────

/// The locally managed gateway deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySection {
    /// Directory holding the rendered compose project. Defaults to
    /// `~/.clawlink/openclaw`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Backend used to register a new deployment.
    pub backend_url: String,

    /// Container runtime CLI (`docker` or `podman`).
    pub runtime_cli: String,

    /// Name of the gateway container inside the compose project.
    pub container: String,

    pub poll_interval_ms: u64,

    /// Stop polling once the gateway container reports `running`.
    pub stop_when_running: bool,

    pub log_lines: u32,

    /// Grace period after `compose up` before post-deploy commands run.
    pub settle_delay_ms: u64,
}

impl DeploySection {
    pub fn deployment_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            directories::BaseDirs::new()
                .map(|dirs| dirs.home_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".clawlink")
                .join("openclaw")
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for DeploySection {
    fn default() -> Self {
        Self {
            dir: None,
            backend_url: "http://127.0.0.1:8000/api".into(),
            runtime_cli: "docker".into(),
            container: "openclaw".into(),
            poll_interval_ms: 5_000,
            stop_when_running: false,
            log_lines: 200,
            settle_delay_ms: 10_000,
        }
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ClawlinkConfig::default();
        assert_eq!(cfg.gateway.url, "ws://127.0.0.1:18789");
        assert!(!cfg.gateway.has_token());
        assert_eq!(cfg.gateway.protocol_range(), ProtocolRange { min: 3, max: 3 });
        assert_eq!(cfg.gateway.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.gateway.health_timeout(), Some(Duration::from_secs(15)));
        assert!(cfg.gateway.reconnect.enabled);
        assert_eq!(cfg.deploy.container, "openclaw");
        assert_eq!(cfg.deploy.poll_interval(), Duration::from_secs(5));
        assert!(!cfg.deploy.stop_when_running);
    }

    #[test]
    fn zero_disables_optional_timeouts() {
        let gateway = GatewaySection {
            request_timeout_ms: 0,
            health_timeout_ms: 0,
            handshake_timeout_ms: 0,
            ..GatewaySection::default()
        };
        assert!(gateway.request_timeout().is_none());
        assert!(gateway.health_timeout().is_none());
        assert_eq!(gateway.handshake_timeout(), Duration::from_millis(1));
    }

    #[test]
    fn debug_redacts_token() {
        let gateway = GatewaySection {
            token: Secret::new("super-secret".into()),
            ..GatewaySection::default()
        };
        let debug = format!("{gateway:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret"));
    }

    #[test]
    fn client_info_omits_empty_display_name() {
        let section = ClientSection {
            display_name: String::new(),
            ..ClientSection::default()
        };
        assert!(section.client_info().display_name.is_none());
        assert_eq!(
            ClientSection::default().client_info().display_name.as_deref(),
            Some("Clawlink")
        );
    }

    #[test]
    fn explicit_deployment_dir_wins() {
        let section = DeploySection {
            dir: Some(PathBuf::from("/srv/openclaw")),
            ..DeploySection::default()
        };
        assert_eq!(section.deployment_dir(), PathBuf::from("/srv/openclaw"));
    }
}
