//! Types and traits shared with the orchestrator that drives the connector.
//!
//! The orchestrator owns machines and their persistence; the connector only
//! reads them and proposes state changes.

use std::fmt;

use thiserror::Error;

use crate::properties::PropertyBag;

/// Coarse lifecycle state tracked by the orchestrator.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MachineState {
    /// Creation or power-on is in progress.
    Starting,
    /// The machine is up and its address is known.
    Started,
    /// Shutdown is in progress.
    Stopping,
    /// The machine is gone or powered off.
    Stopped,
    /// The provider reports a failure.
    NotResponding,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::NotResponding => "NOT_RESPONDING",
        };
        f.write_str(name)
    }
}

/// Orchestrator account the compute center belongs to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Account {
    /// Account name.
    pub name: String,
    /// Access key agents present when they register.
    pub access_key: String,
}

/// A configured CloudStack installation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComputeCenter {
    /// Display name of the compute-center type, used in messages.
    pub type_name: String,
    /// Owning account.
    pub account: Account,
    /// Connection properties (`Api Key`, `Secret Key`, `Client End Point Url`).
    pub properties: PropertyBag,
}

/// A configured image store.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageStore {
    /// Display name of the image-store type, used in messages.
    pub type_name: String,
    /// Connection properties.
    pub properties: PropertyBag,
}

/// A registered image; its properties carry the `Template Id`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Image {
    /// Image properties.
    pub properties: PropertyBag,
}

/// Per-machine deploy settings chosen by the operator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MachineDescriptor {
    /// Deploy properties (`Zone Id`, `Service Offering Id`, ...).
    pub properties: PropertyBag,
}

/// Orchestrator view of one machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Machine {
    /// Orchestrator identifier.
    pub id: String,
    /// Remote instance id.
    pub name: String,
    /// Last known address.
    pub ip_address: String,
    /// Coarse lifecycle state.
    pub state: MachineState,
    /// Compute center the machine runs in.
    pub compute_center: ComputeCenter,
}

/// Inputs for the agent identity encoder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AgentIdentity {
    /// Controller host agents report to.
    pub controller_host: String,
    /// Controller port agents report to.
    pub controller_port: u16,
    /// Orchestrator account name.
    pub account_name: String,
    /// Orchestrator account access key.
    pub access_key: String,
}

/// Output of the agent identity encoder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedIdentity {
    /// Opaque payload passed to the instance as user data.
    pub user_data: String,
    /// Host identifier the new machine is registered under.
    pub host_identifier: String,
}

/// Everything the orchestrator needs to register a freshly deployed instance.
#[derive(Clone, Copy, Debug)]
pub struct MachineRegistration<'a> {
    /// Remote instance id.
    pub server_id: &'a str,
    /// Unique host identifier seeded into the instance.
    pub host_identifier: &'a str,
    /// Compute center the instance was deployed into.
    pub compute_center: &'a ComputeCenter,
    /// Descriptor used for the deploy.
    pub descriptor: &'a MachineDescriptor,
    /// Image used for the deploy.
    pub image: &'a Image,
    /// Port the agent listens on.
    pub agent_port: u16,
}

/// Failure reported by an orchestrator collaborator.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct OrchestratorError {
    /// Description supplied by the collaborator.
    pub message: String,
}

impl OrchestratorError {
    /// Wraps a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Produces the user data and host identity seeded into new instances.
pub trait AgentIdentityEncoder: Send + Sync {
    /// Encodes `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the payload cannot be produced.
    fn encode(&self, identity: &AgentIdentity) -> Result<EncodedIdentity, OrchestratorError>;
}

/// Services the orchestrator exposes to the connector.
pub trait ControllerServices: Send + Sync {
    /// Registers a deployed instance as an orchestrator machine.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when registration fails.
    fn create_machine_instance(
        &self,
        registration: &MachineRegistration<'_>,
    ) -> Result<Machine, OrchestratorError>;

    /// Port agents listen on unless configured otherwise.
    fn default_agent_port(&self) -> u16;
}
