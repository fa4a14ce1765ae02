//! [`CommandBridge`] backed by a local container runtime and `compose`.
//!
//! The deployment lives in one directory holding the compose project, the
//! gateway config and its `.env`. Every lifecycle command shells out to the
//! runtime CLI (`docker` by default) against that project.

use std::{
    path::{Path, PathBuf},
    process::{Output, Stdio},
    time::Duration,
};

use {
    async_trait::async_trait,
    clawlink_config::DeploySection,
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tracing::{debug, info, warn},
};

use crate::{
    bridge::{BridgeError, CommandBridge, commands},
    templates,
    types::{ContainerStatus, DeploymentState, HostPrerequisites, OperationResult, SetupConfig},
};

const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);
const GATEWAY_CLI: &[&str] = &["node", "/app/openclaw.mjs"];

type BridgeResult<T> = Result<T, BridgeError>;

pub struct ComposeBridge {
    dir: PathBuf,
    runtime: String,
    container: String,
    backend_url: String,
    settle_delay: Duration,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterArgs {
    bot_token: String,
    model: String,
}

#[derive(Deserialize)]
struct SetupArgs {
    config: SetupConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptimizeArgs {
    model_slug: String,
}

#[derive(Deserialize)]
struct LogsArgs {
    lines: u32,
}

impl ComposeBridge {
    pub fn from_config(config: &DeploySection) -> Self {
        Self {
            dir: config.deployment_dir(),
            runtime: config.runtime_cli.clone(),
            container: config.container.clone(),
            backend_url: config.backend_url.trim_end_matches('/').to_string(),
            settle_delay: config.settle_delay(),
            http: reqwest::Client::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn compose_file(&self) -> PathBuf {
        self.dir.join("docker-compose.yml")
    }

    // ── Process helpers ──────────────────────────────────────────────────────

    async fn run(&self, args: &[&str]) -> BridgeResult<Output> {
        debug!(runtime = %self.runtime, ?args, "running container runtime");
        tokio::process::Command::new(&self.runtime)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BridgeError::Unavailable(format!("failed to run {}: {e}", self.runtime)))
    }

    async fn compose(&self, args: &[&str]) -> BridgeResult<Output> {
        let file = self.compose_file();
        let file = file.to_string_lossy();
        let mut full = vec!["compose", "-f", &*file];
        full.extend_from_slice(args);
        self.run(&full).await
    }

    /// Run the gateway CLI inside its container. Failures are logged only.
    async fn gateway_cli(&self, args: &[&str]) {
        let mut full = vec!["exec", self.container.as_str()];
        full.extend_from_slice(GATEWAY_CLI);
        full.extend_from_slice(args);
        match self.run(&full).await {
            Ok(out) if out.status.success() => {},
            Ok(out) => warn!(?args, stderr = %stderr(&out), "gateway cli command failed"),
            Err(e) => warn!(?args, error = %e, "gateway cli command failed"),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn check_docker(&self) -> BridgeResult<HostPrerequisites> {
        let version = match self.run(&["--version"]).await {
            Ok(out) if out.status.success() => {
                String::from_utf8_lossy(&out.stdout).trim().to_string()
            },
            _ => return Ok(HostPrerequisites::default()),
        };
        let compose_available = self
            .run(&["compose", "version"])
            .await
            .is_ok_and(|out| out.status.success());
        let runtime_active = self.run(&["info"]).await.is_ok_and(|out| out.status.success());
        Ok(HostPrerequisites {
            installed: true,
            version,
            compose_available,
            runtime_active,
        })
    }

    async fn register(&self, args: RegisterArgs) -> BridgeResult<Value> {
        let url = format!("{}/desktop/register/", self.backend_url);
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "bot_token": args.bot_token,
                "model": args.model,
                "platform": std::env::consts::OS,
            }))
            .timeout(REGISTER_TIMEOUT)
            .send()
            .await
            .map_err(|e| BridgeError::Failed(format!("Network error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Failed(format!("Registration failed ({status}): {body}")));
        }
        resp.json()
            .await
            .map_err(|e| BridgeError::Failed(format!("Parse error: {e}")))
    }

    async fn setup(&self, config: &SetupConfig) -> BridgeResult<OperationResult> {
        for sub in ["searxng", "data"] {
            tokio::fs::create_dir_all(self.dir.join(sub))
                .await
                .map_err(|e| BridgeError::Failed(format!("Failed to create {sub} dir: {e}")))?;
        }

        let files = [
            ("Dockerfile", templates::DOCKERFILE.to_string()),
            ("docker-compose.yml", templates::compose(&self.container)),
            (".env", templates::env_file(config)),
            ("openclaw-config.yaml", templates::gateway_config(config)),
            ("searxng/settings.yml", templates::searxng_settings()),
            ("searxng-adapter.js", templates::SEARXNG_ADAPTER.to_string()),
        ];
        for (name, contents) in files {
            tokio::fs::write(self.dir.join(name), contents)
                .await
                .map_err(|e| BridgeError::Failed(format!("Failed to write {name}: {e}")))?;
        }

        info!(dir = %self.dir.display(), model = %config.model_slug, "deployment configured");
        Ok(OperationResult::ok("Configuration generated"))
    }

    async fn deploy(&self) -> BridgeResult<OperationResult> {
        let out = self.compose(&["up", "-d", "--build"]).await?;
        if !out.status.success() {
            return Err(BridgeError::Failed(format!("Docker compose failed: {}", stderr(&out))));
        }

        tokio::time::sleep(self.settle_delay).await;

        let owner = self
            .run(&[
                "exec",
                "-u",
                "root",
                self.container.as_str(),
                "chown",
                "-R",
                "node:node",
                "/home/node/.openclaw",
            ])
            .await;
        if let Err(e) = owner {
            warn!(error = %e, "failed to fix config volume ownership");
        }
        self.gateway_cli(&[
            "browser",
            "create-profile",
            "--name",
            "headless",
            "--color",
            "#00FF00",
            "--driver",
            "openclaw",
        ])
        .await;
        for (key, value) in [
            ("browser.defaultProfile", "headless"),
            ("browser.noSandbox", "true"),
            ("browser.headless", "true"),
        ] {
            self.gateway_cli(&["config", "set", key, value]).await;
        }
        self.gateway_cli(&["doctor", "--fix"]).await;
        self.gateway_cli(&["config", "set", "gateway.mode", "local"]).await;

        info!(container = %self.container, "deployment started");
        Ok(OperationResult::ok("Docker containers started"))
    }

    async fn apply_optimizations(&self, model_slug: &str) -> BridgeResult<OperationResult> {
        for &(key, value) in templates::OPTIMIZATIONS {
            self.gateway_cli(&["config", "set", key, value]).await;
        }

        self.gateway_cli(&["models", "fallbacks", "clear"]).await;
        for model in templates::fallback_models(model_slug) {
            self.gateway_cli(&["models", "fallbacks", "add", model]).await;
        }

        self.gateway_cli(&["config", "set", "agents.defaults.models", templates::MODEL_ALIASES])
            .await;
        self.gateway_cli(&["browser", "start", "--browser-profile", "headless"])
            .await;

        Ok(OperationResult::ok("Optimizations applied"))
    }

    async fn teardown(&self) -> BridgeResult<OperationResult> {
        let out = self.compose(&["down", "-v"]).await?;
        if !out.status.success() {
            return Err(BridgeError::Failed(format!("Teardown failed: {}", stderr(&out))));
        }
        Ok(OperationResult::ok("Containers stopped and removed"))
    }

    async fn lifecycle(&self, subcommand: &str, done: &str) -> BridgeResult<Value> {
        let out = self.compose(&[subcommand]).await?;
        if !out.status.success() {
            return Err(BridgeError::Failed(stderr(&out)));
        }
        Ok(Value::String(done.to_string()))
    }

    async fn status(&self) -> BridgeResult<DeploymentState> {
        let out = self
            .compose(&["ps", "--format", "{{.Name}}\t{{.State}}\t{{.Status}}"])
            .await?;
        if !out.status.success() {
            return Err(BridgeError::Failed(stderr(&out)));
        }
        Ok(parse_compose_ps(&String::from_utf8_lossy(&out.stdout), &self.container))
    }

    async fn logs(&self, lines: u32) -> BridgeResult<String> {
        let tail = format!("--tail={lines}");
        let out = self.compose(&["logs", tail.as_str(), self.container.as_str()]).await?;
        Ok(format!(
            "{}{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        ))
    }
}

#[async_trait]
impl CommandBridge for ComposeBridge {
    async fn invoke(&self, command: &str, args: Value) -> BridgeResult<Value> {
        match command {
            commands::CHECK_DOCKER => to_value(self.check_docker().await?),
            commands::REGISTER_DESKTOP => self.register(parse_args(command, args)?).await,
            commands::SETUP_OPENCLAW => {
                let SetupArgs { config } = parse_args(command, args)?;
                to_value(self.setup(&config).await?)
            },
            commands::DEPLOY_OPENCLAW => to_value(self.deploy().await?),
            commands::APPLY_OPTIMIZATIONS => {
                let OptimizeArgs { model_slug } = parse_args(command, args)?;
                to_value(self.apply_optimizations(&model_slug).await?)
            },
            commands::TEARDOWN_OPENCLAW => to_value(self.teardown().await?),
            commands::START_OPENCLAW => self.lifecycle("start", "Started").await,
            commands::STOP_OPENCLAW => self.lifecycle("stop", "Stopped").await,
            commands::RESTART_OPENCLAW => self.lifecycle("restart", "Restarted").await,
            commands::GET_OPENCLAW_STATUS => to_value(self.status().await?),
            commands::GET_OPENCLAW_LOGS => {
                let LogsArgs { lines } = parse_args(command, args)?;
                Ok(Value::String(self.logs(lines).await?))
            },
            other => Err(BridgeError::Failed(format!("unknown command: {other}"))),
        }
    }
}

/// Parse `compose ps` output in `name<TAB>state<TAB>status` form. The
/// deployment counts as running when `container` reports `running`.
pub fn parse_compose_ps(stdout: &str, container: &str) -> DeploymentState {
    let containers: Vec<ContainerStatus> = stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let (name, state, status) = (parts.next()?, parts.next()?, parts.next()?);
            Some(ContainerStatus {
                name: name.trim().to_string(),
                runtime_state: state.trim().to_string(),
                status_text: status.trim().to_string(),
            })
        })
        .collect();
    let running = containers
        .iter()
        .any(|c| c.name == container && c.runtime_state == "running");
    DeploymentState { running, containers }
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).trim().to_string()
}

fn parse_args<T: DeserializeOwned>(command: &str, args: Value) -> BridgeResult<T> {
    serde_json::from_value(args)
        .map_err(|e| BridgeError::Failed(format!("invalid arguments for {command}: {e}")))
}

fn to_value<T: serde::Serialize>(value: T) -> BridgeResult<Value> {
    serde_json::to_value(value).map_err(|e| BridgeError::Failed(e.to_string()))
}
