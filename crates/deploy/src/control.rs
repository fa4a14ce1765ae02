//! Typed deployment operations over a [`CommandBridge`].
//!
//! Every operation is a single bridge round trip (setup is two) and is
//! never retried here: setup and deploy are not idempotent, and a repeated
//! start or stop is the caller's decision.

use std::sync::Arc;

use {
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tracing::{debug, info, warn},
};

use crate::{
    bridge::{BridgeError, CommandBridge, commands},
    error::{Error, Result},
    types::{
        ControlAction, DeploymentState, HostPrerequisites, OperationResult, Registration,
        SetupConfig,
    },
};

/// Upper bound for a single log request.
pub const MAX_LOG_LINES: u32 = 5_000;

#[derive(Clone)]
pub struct DeploymentControl {
    bridge: Arc<dyn CommandBridge>,
}

impl DeploymentControl {
    pub fn new(bridge: Arc<dyn CommandBridge>) -> Self {
        Self { bridge }
    }

    pub async fn check_host_prerequisites(&self) -> Result<HostPrerequisites> {
        self.call(commands::CHECK_DOCKER, Value::Null, Error::BridgeUnavailable)
            .await
    }

    pub async fn register_deployment(&self, bot_token: &str, model: &str) -> Result<Registration> {
        let registration: Registration = self
            .call(
                commands::REGISTER_DESKTOP,
                json!({ "botToken": bot_token, "model": model }),
                Error::RegistrationFailed,
            )
            .await?;
        info!(model, "deployment registered");
        Ok(registration)
    }

    /// Render the deployment directory, then bring the stack up.
    pub async fn configure_and_deploy(&self, config: &SetupConfig) -> Result<OperationResult> {
        let config = serde_json::to_value(config).map_err(|e| Error::SetupFailed(e.to_string()))?;
        let setup: OperationResult = self
            .call(commands::SETUP_OPENCLAW, json!({ "config": config }), Error::SetupFailed)
            .await?;
        if !setup.success {
            return Err(Error::SetupFailed(setup.message));
        }
        debug!(message = %setup.message, "deployment configured");

        let deployed: OperationResult = self
            .call(commands::DEPLOY_OPENCLAW, Value::Null, Error::SetupFailed)
            .await?;
        if !deployed.success {
            return Err(Error::SetupFailed(deployed.message));
        }
        info!(message = %deployed.message, "deployment started");
        Ok(deployed)
    }

    pub async fn apply_optimizations(&self, model_slug: &str) -> Result<OperationResult> {
        let result: OperationResult = self
            .call(
                commands::APPLY_OPTIMIZATIONS,
                json!({ "modelSlug": model_slug }),
                Error::OptimizationFailed,
            )
            .await?;
        if !result.success {
            return Err(Error::OptimizationFailed(result.message));
        }
        Ok(result)
    }

    pub async fn teardown(&self) -> Result<OperationResult> {
        let result: OperationResult = self
            .call(commands::TEARDOWN_OPENCLAW, Value::Null, Error::TeardownFailed)
            .await?;
        if !result.success {
            return Err(Error::TeardownFailed(result.message));
        }
        info!("deployment removed");
        Ok(result)
    }

    pub async fn start(&self) -> Result<String> {
        self.control(ControlAction::Start).await
    }

    pub async fn stop(&self) -> Result<String> {
        self.control(ControlAction::Stop).await
    }

    pub async fn restart(&self) -> Result<String> {
        self.control(ControlAction::Restart).await
    }

    pub async fn control(&self, action: ControlAction) -> Result<String> {
        let text: String = self
            .call(action.command(), Value::Null, |message| Error::ControlFailed {
                action: action.as_str(),
                message,
            })
            .await?;
        info!(action = action.as_str(), result = %text, "deployment control");
        Ok(text)
    }

    pub async fn status(&self) -> Result<DeploymentState> {
        self.call(commands::GET_OPENCLAW_STATUS, Value::Null, Error::StatusUnavailable)
            .await
    }

    /// The last `lines` lines of gateway output, clamped to `1..=MAX_LOG_LINES`.
    pub async fn logs(&self, lines: u32) -> Result<String> {
        let lines = lines.clamp(1, MAX_LOG_LINES);
        self.call(commands::GET_OPENCLAW_LOGS, json!({ "lines": lines }), Error::LogsUnavailable)
            .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        command: &str,
        args: Value,
        fail: impl Fn(String) -> Error,
    ) -> Result<T> {
        let value = self.bridge.invoke(command, args).await.map_err(|e| {
            warn!(command, error = %e, "bridge command failed");
            match e {
                BridgeError::Unavailable(message) | BridgeError::Failed(message) => fail(message),
            }
        })?;
        serde_json::from_value(value).map_err(|e| {
            warn!(command, error = %e, "unexpected bridge result");
            fail(format!("unexpected result from {command}: {e}"))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use {
        super::*,
        async_trait::async_trait,
        secrecy::{ExposeSecret, Secret},
    };

    type Reply = std::result::Result<Value, BridgeError>;

    /// Answers each command from a script and records every invocation.
    #[derive(Default)]
    struct ScriptedBridge {
        replies: Mutex<HashMap<&'static str, Reply>>,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedBridge {
        fn reply(self, command: &'static str, reply: Reply) -> Self {
            self.replies.lock().unwrap().insert(command, reply);
            self
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandBridge for ScriptedBridge {
        async fn invoke(&self, command: &str, args: Value) -> Reply {
            self.calls.lock().unwrap().push((command.to_string(), args));
            self.replies
                .lock()
                .unwrap()
                .get(command)
                .cloned()
                .unwrap_or_else(|| failed(&format!("unscripted command {command}")))
        }
    }

    fn harness(bridge: ScriptedBridge) -> (DeploymentControl, Arc<ScriptedBridge>) {
        let bridge = Arc::new(bridge);
        (DeploymentControl::new(bridge.clone()), bridge)
    }

    fn failed(message: &str) -> Reply {
        Err(BridgeError::Failed(message.into()))
    }

    fn setup_config() -> SetupConfig {
        SetupConfig {
            provider_key: Secret::new("sk-or-1".into()),
            bot_token: Secret::new("123:abc".into()),
            gateway_token: Secret::new("gw-1".into()),
            model_slug: "claude-sonnet-4".into(),
        }
    }

    #[tokio::test]
    async fn host_check_maps_fields() {
        let (control, bridge) = harness(ScriptedBridge::default().reply(
            commands::CHECK_DOCKER,
            Ok(json!({
                "installed": true,
                "version": "Docker version 27.3.1",
                "compose": true,
                "running": true,
            })),
        ));
        let prereq = control.check_host_prerequisites().await.unwrap();
        assert!(prereq.ready());
        assert_eq!(prereq.version, "Docker version 27.3.1");
        assert_eq!(bridge.calls(), vec![("check_docker".to_string(), Value::Null)]);
    }

    #[tokio::test]
    async fn host_check_failure_is_bridge_unavailable() {
        let (control, _) = harness(
            ScriptedBridge::default()
                .reply(commands::CHECK_DOCKER, Err(BridgeError::Unavailable("no host".into()))),
        );
        let err = control.check_host_prerequisites().await.unwrap_err();
        assert_eq!(err, Error::BridgeUnavailable("no host".into()));
    }

    #[tokio::test]
    async fn register_sends_camel_case_args() {
        let (control, bridge) = harness(ScriptedBridge::default().reply(
            commands::REGISTER_DESKTOP,
            Ok(json!({
                "openrouter_key": "sk-or-1",
                "gateway_token": "gw-1",
                "auth_token": "a-1",
            })),
        ));
        let registration = control.register_deployment("123:abc", "gpt-4o").await.unwrap();
        assert_eq!(registration.gateway_token.expose_secret(), "gw-1");
        assert_eq!(bridge.calls(), vec![(
            "register_desktop".to_string(),
            json!({ "botToken": "123:abc", "model": "gpt-4o" })
        )]);
    }

    #[tokio::test]
    async fn register_failure_keeps_reason_verbatim() {
        let (control, _) = harness(ScriptedBridge::default().reply(
            commands::REGISTER_DESKTOP,
            failed("Registration failed (400 Bad Request): bad token"),
        ));
        let err = control.register_deployment("x", "gpt-4o").await.unwrap_err();
        assert_eq!(
            err,
            Error::RegistrationFailed("Registration failed (400 Bad Request): bad token".into())
        );
    }

    #[tokio::test]
    async fn malformed_registration_is_registration_failed() {
        let (control, _) = harness(
            ScriptedBridge::default()
                .reply(commands::REGISTER_DESKTOP, Ok(json!({ "detail": "ok" }))),
        );
        let err = control.register_deployment("x", "gpt-4o").await.unwrap_err();
        assert!(matches!(err, Error::RegistrationFailed(_)));
    }

    #[tokio::test]
    async fn configure_runs_setup_then_deploy() {
        let (control, bridge) = harness(
            ScriptedBridge::default()
                .reply(
                    commands::SETUP_OPENCLAW,
                    Ok(json!({ "success": true, "message": "Configuration generated" })),
                )
                .reply(
                    commands::DEPLOY_OPENCLAW,
                    Ok(json!({ "success": true, "message": "Docker containers started" })),
                ),
        );
        let result = control.configure_and_deploy(&setup_config()).await.unwrap();
        assert_eq!(result, OperationResult::ok("Docker containers started"));

        let calls = bridge.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "setup_openclaw");
        assert_eq!(calls[0].1["config"]["openrouter_key"], "sk-or-1");
        assert_eq!(calls[0].1["config"]["model_slug"], "claude-sonnet-4");
        assert_eq!(calls[1].0, "deploy_openclaw");
    }

    #[tokio::test]
    async fn failed_setup_skips_deploy() {
        let (control, bridge) = harness(
            ScriptedBridge::default()
                .reply(commands::SETUP_OPENCLAW, failed("Failed to write .env: permission denied")),
        );
        let err = control.configure_and_deploy(&setup_config()).await.unwrap_err();
        assert_eq!(err, Error::SetupFailed("Failed to write .env: permission denied".into()));
        assert_eq!(bridge.calls().len(), 1);
    }

    #[tokio::test]
    async fn unsuccessful_deploy_is_setup_failed() {
        let (control, _) = harness(
            ScriptedBridge::default()
                .reply(commands::SETUP_OPENCLAW, Ok(json!({ "success": true, "message": "ok" })))
                .reply(
                    commands::DEPLOY_OPENCLAW,
                    Ok(json!({ "success": false, "message": "compose exited 1" })),
                ),
        );
        let err = control.configure_and_deploy(&setup_config()).await.unwrap_err();
        assert_eq!(err.message(), "compose exited 1");
    }

    #[tokio::test]
    async fn optimizations_pass_model_slug() {
        let (control, bridge) = harness(ScriptedBridge::default().reply(
            commands::APPLY_OPTIMIZATIONS,
            Ok(json!({ "success": true, "message": "Optimizations applied" })),
        ));
        control.apply_optimizations("gpt-4o").await.unwrap();
        assert_eq!(bridge.calls()[0].1, json!({ "modelSlug": "gpt-4o" }));

        let (control, _) = harness(
            ScriptedBridge::default().reply(commands::APPLY_OPTIMIZATIONS, failed("exec failed")),
        );
        assert_eq!(
            control.apply_optimizations("gpt-4o").await.unwrap_err(),
            Error::OptimizationFailed("exec failed".into())
        );
    }

    #[tokio::test]
    async fn teardown_maps_failure() {
        let (control, _) = harness(ScriptedBridge::default().reply(
            commands::TEARDOWN_OPENCLAW,
            failed("Teardown failed: no such project"),
        ));
        assert_eq!(
            control.teardown().await.unwrap_err(),
            Error::TeardownFailed("Teardown failed: no such project".into())
        );
    }

    #[tokio::test]
    async fn lifecycle_commands_return_text() {
        let (control, bridge) = harness(
            ScriptedBridge::default()
                .reply(commands::START_OPENCLAW, Ok(json!("Started")))
                .reply(commands::STOP_OPENCLAW, Ok(json!("Stopped")))
                .reply(commands::RESTART_OPENCLAW, failed("container openclaw is restarting")),
        );
        assert_eq!(control.start().await.unwrap(), "Started");
        assert_eq!(control.stop().await.unwrap(), "Stopped");
        assert_eq!(control.restart().await.unwrap_err(), Error::ControlFailed {
            action: "restart",
            message: "container openclaw is restarting".into(),
        });
        let commands: Vec<String> = bridge.calls().into_iter().map(|(c, _)| c).collect();
        assert_eq!(commands, ["start_openclaw", "stop_openclaw", "restart_openclaw"]);
    }

    #[tokio::test]
    async fn status_decodes_snapshot() {
        let (control, _) = harness(ScriptedBridge::default().reply(
            commands::GET_OPENCLAW_STATUS,
            Ok(json!({
                "running": true,
                "containers": [
                    { "name": "openclaw", "state": "running", "status": "Up 3 minutes" },
                    { "name": "searxng", "state": "exited", "status": "Exited (1)" },
                ],
            })),
        ));
        let state = control.status().await.unwrap();
        assert!(state.running);
        assert_eq!(state.containers.len(), 2);
        assert_eq!(state.containers[1].runtime_state, "exited");
    }

    #[tokio::test]
    async fn status_failure_is_status_unavailable() {
        let (control, _) = harness(
            ScriptedBridge::default()
                .reply(commands::GET_OPENCLAW_STATUS, failed("daemon not running")),
        );
        assert_eq!(
            control.status().await.unwrap_err(),
            Error::StatusUnavailable("daemon not running".into())
        );
    }

    #[tokio::test]
    async fn log_line_count_is_clamped() {
        let (control, bridge) = harness(
            ScriptedBridge::default()
                .reply(commands::GET_OPENCLAW_LOGS, Ok(json!("gateway listening\n"))),
        );
        assert_eq!(control.logs(0).await.unwrap(), "gateway listening\n");
        control.logs(200).await.unwrap();
        control.logs(1_000_000).await.unwrap();
        let lines: Vec<Value> = bridge
            .calls()
            .into_iter()
            .map(|(_, args)| args["lines"].clone())
            .collect();
        assert_eq!(lines, [json!(1), json!(200), json!(5000)]);
    }

    #[tokio::test]
    async fn logs_failure_is_logs_unavailable() {
        let (control, _) = harness(
            ScriptedBridge::default().reply(commands::GET_OPENCLAW_LOGS, failed("no container")),
        );
        assert_eq!(
            control.logs(10).await.unwrap_err(),
            Error::LogsUnavailable("no container".into())
        );
    }
}
