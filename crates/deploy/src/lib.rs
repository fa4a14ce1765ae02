//! Deployment control: a typed client over the host command bridge, a
//! status poller, and a Docker Compose implementation of the bridge.

pub mod bridge;
pub mod compose;
pub mod control;
pub mod error;
pub mod poller;
mod templates;
pub mod types;

pub use {
    bridge::{BridgeError, CommandBridge, commands},
    compose::ComposeBridge,
    control::DeploymentControl,
    error::{Error, Result},
    poller::{PollerState, StatusPoller, StatusSource},
    types::{
        ContainerStatus, ControlAction, DeploymentState, HostPrerequisites, OperationResult,
        Registration, SetupConfig,
    },
};
