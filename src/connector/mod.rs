//! Connector operations invoked by the orchestrator.
//!
//! [`CloudStackConnector`] ties the pieces together: it resolves credentials
//! from compute-center properties, obtains authenticated clients from the
//! shared [`ClientRegistry`], deploys and registers new machines (rolling the
//! instance back when registration fails), and runs reconciliation ticks.

mod error;
mod names;

use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::ServerHandle;
use crate::cloudstack::{CloudStackClient, CloudStackError, HttpTransport, Transport};
use crate::orchestrator::{
    AgentIdentity, AgentIdentityEncoder, ComputeCenter, ControllerServices, Image, ImageStore,
    Machine, MachineDescriptor, MachineRegistration, MachineState,
};
use crate::properties::{DeployRequest, PropertyBag};
use crate::reconcile::{Reconciliation, reconcile};
use crate::registry::ClientRegistry;

pub use error::ConnectorError;
pub use names::{DEFAULT_DISPLAY_NAME_PREFIX, DisplayNames};

/// Default controller host advertised to agents.
pub const DEFAULT_CONTROLLER_HOST: &str = "localhost";
/// Default controller port advertised to agents.
pub const DEFAULT_CONTROLLER_PORT: u16 = 8090;

/// Settings applied to every machine the connector creates.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConnectorSettings {
    /// Controller host agents report to.
    pub controller_host: String,
    /// Controller port agents report to.
    pub controller_port: u16,
    /// Prefix for generated display names.
    pub display_name_prefix: String,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            controller_host: DEFAULT_CONTROLLER_HOST.to_owned(),
            controller_port: DEFAULT_CONTROLLER_PORT,
            display_name_prefix: DEFAULT_DISPLAY_NAME_PREFIX.to_owned(),
        }
    }
}

/// CloudStack connector.
#[derive(Debug)]
pub struct CloudStackConnector<S, E, T = HttpTransport> {
    registry: Arc<ClientRegistry<T>>,
    services: S,
    encoder: E,
    controller_host: String,
    controller_port: u16,
    display_name_prefix: String,
    names: Arc<DisplayNames>,
}

impl<S, E, T> CloudStackConnector<S, E, T>
where
    S: ControllerServices,
    E: AgentIdentityEncoder,
    T: Transport + Clone,
{
    /// Creates a connector sharing `registry` and `names` with other
    /// callers in the process.
    #[must_use]
    pub fn new(
        registry: Arc<ClientRegistry<T>>,
        names: Arc<DisplayNames>,
        services: S,
        encoder: E,
        settings: ConnectorSettings,
    ) -> Self {
        Self {
            registry,
            services,
            encoder,
            controller_host: settings.controller_host,
            controller_port: settings.controller_port,
            display_name_prefix: settings.display_name_prefix,
            names,
        }
    }

    /// Port agents on new machines listen on.
    #[must_use]
    pub fn agent_port(&self) -> u16 {
        self.services.default_agent_port()
    }

    async fn client_for(
        &self,
        properties: &PropertyBag,
        context: impl Into<String>,
    ) -> Result<Arc<CloudStackClient<T>>, ConnectorError> {
        let credentials = properties.credentials()?;
        self.registry
            .get(&credentials)
            .await
            .map_err(ConnectorError::client(context))
    }

    /// Deploys a new instance and registers it with the orchestrator.
    ///
    /// When anything fails after the deploy succeeded, the instance is
    /// terminated again. If that terminate fails too, the error is
    /// [`ConnectorError::OrphanedInstance`] naming the instance id.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] describing the first failure.
    pub async fn create_machine(
        &self,
        compute_center: &ComputeCenter,
        image: &Image,
        descriptor: &MachineDescriptor,
    ) -> Result<Machine, ConnectorError> {
        let kind = compute_center.type_name.as_str();
        let client = self
            .client_for(&compute_center.properties, format!("creating {kind} instance"))
            .await?;

        let identity = AgentIdentity {
            controller_host: self.controller_host.clone(),
            controller_port: self.controller_port,
            account_name: compute_center.account.name.clone(),
            access_key: compute_center.account.access_key.clone(),
        };
        let encoded = self
            .encoder
            .encode(&identity)
            .map_err(ConnectorError::orchestrator("encoding agent identity"))?;

        let mut request = DeployRequest::from_properties(&descriptor.properties, &image.properties)?;
        request.options.display_name = Some(self.names.next_name(&self.display_name_prefix));
        request.options.user_data = Some(encoded.user_data);

        let server = client
            .deploy(
                &request.service_offering_id,
                &request.template_id,
                &request.zone_id,
                &request.options,
            )
            .await
            .map_err(ConnectorError::client(format!("deploying {kind} instance")))?;
        info!(instance_id = %server.id, "cloudstack instance deployed");

        let registration = MachineRegistration {
            server_id: &server.id,
            host_identifier: &encoded.host_identifier,
            compute_center,
            descriptor,
            image,
            agent_port: self.agent_port(),
        };
        match self.services.create_machine_instance(&registration) {
            Ok(machine) => {
                info!(
                    machine_id = %machine.id,
                    instance_id = %server.id,
                    "{kind} instance created"
                );
                Ok(machine)
            }
            Err(err) => {
                let cause = ConnectorError::Orchestrator {
                    context: format!("registering {kind} instance {}", server.id),
                    source: err,
                };
                Err(Self::roll_back(&client, kind, &server, cause).await)
            }
        }
    }

    async fn roll_back(
        client: &CloudStackClient<T>,
        kind: &str,
        server: &ServerHandle,
        cause: ConnectorError,
    ) -> ConnectorError {
        warn!(instance_id = %server.id, error = %cause, "machine create failed; terminating instance");
        match client.terminate(&server.id).await {
            Ok(_) => cause,
            Err(terminate) => orphaned(kind, &server.id, cause, terminate),
        }
    }

    /// Runs one reconciliation tick for `machine`.
    ///
    /// Machines outside STARTING and STOPPING are returned unchanged without
    /// contacting the remote API.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Reconcile`] when the tick fails, or
    /// [`ConnectorError::Client`] when no client can be obtained.
    pub async fn refresh_machine_state(
        &self,
        machine: &mut Machine,
    ) -> Result<Reconciliation, ConnectorError> {
        if !matches!(machine.state, MachineState::Starting | MachineState::Stopping) {
            return Ok(Reconciliation::Unchanged);
        }
        let client = self
            .client_for(
                &machine.compute_center.properties,
                format!("refreshing state of machine {}", machine.id),
            )
            .await?;
        let machine_id = machine.id.clone();
        reconcile(client.as_ref(), machine)
            .await
            .map_err(|source| ConnectorError::Reconcile { machine_id, source })
    }

    /// Destroys the instance behind `machine`. An instance that is already
    /// gone counts as terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Client`] naming the machine.
    pub async fn terminate_machine(&self, machine: &Machine) -> Result<(), ConnectorError> {
        let context = format!(
            "error terminating {} instance {}",
            machine.compute_center.type_name, machine.id
        );
        let client = self
            .client_for(&machine.compute_center.properties, context.clone())
            .await?;
        client
            .terminate(&machine.name)
            .await
            .map_err(ConnectorError::client(context))?;
        Ok(())
    }

    /// Reboots the instance behind `machine`. Resolves to whether the reboot
    /// job was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Client`] naming the instance.
    pub async fn restart_machine(&self, machine: &Machine) -> Result<bool, ConnectorError> {
        let context = format!(
            "error rebooting {} instance {}",
            machine.compute_center.type_name, machine.name
        );
        let client = self
            .client_for(&machine.compute_center.properties, context.clone())
            .await?;
        let accepted = client
            .reboot(&machine.name)
            .await
            .map_err(ConnectorError::client(context))?;
        if !accepted {
            warn!(instance_id = %machine.name, "reboot request was not accepted");
        }
        Ok(accepted)
    }

    /// Checks that the compute center's credentials authenticate.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidObject`].
    pub async fn validate_compute_center(
        &self,
        compute_center: &ComputeCenter,
    ) -> Result<(), ConnectorError> {
        let subject = format!("{} connector", compute_center.type_name);
        self.validate_properties(&compute_center.properties, subject)
            .await
    }

    /// Checks that the image store's credentials authenticate.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::InvalidObject`].
    pub async fn validate_image_store(&self, store: &ImageStore) -> Result<(), ConnectorError> {
        let subject = format!("{} store", store.type_name);
        self.validate_properties(&store.properties, subject).await
    }

    async fn validate_properties(
        &self,
        properties: &PropertyBag,
        subject: String,
    ) -> Result<(), ConnectorError> {
        match self.client_for(properties, "authenticating").await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(subject = %subject, error = %err, "validation failed");
                Err(ConnectorError::InvalidObject {
                    subject,
                    source: Box::new(err),
                })
            }
        }
    }
}

fn orphaned(
    kind: &str,
    instance_id: &str,
    cause: ConnectorError,
    terminate: CloudStackError,
) -> ConnectorError {
    ConnectorError::OrphanedInstance {
        kind: kind.to_owned(),
        instance_id: instance_id.to_owned(),
        cause: Box::new(cause),
        terminate,
    }
}
