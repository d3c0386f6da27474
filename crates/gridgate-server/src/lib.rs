pub mod core;
pub mod listeners;
pub mod services;
pub mod supervisor;

pub use crate::core::GatewayCore;
pub use listeners::{bind_listeners, BindOutcome, BoundListeners};
pub use services::{DeploymentHook, HoldingHttpService, HttpService, NoopDeployment};
pub use supervisor::{Collaborators, NodeSupervisor, Phase, SupervisorStatus};
