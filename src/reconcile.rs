//! Advances orchestrator machine state from the remote instance status.
//!
//! One call is one poll tick. Only machines in [`MachineState::Starting`] or
//! [`MachineState::Stopping`] are examined; every other state is left alone.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backend::{ComputeApi, ServerStatus};
use crate::orchestrator::{Machine, MachineState};

/// What a reconciliation tick did to the machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reconciliation {
    /// The machine moved to the contained state.
    Transitioned(MachineState),
    /// The instance was powered off; a power-on was requested and the state
    /// is unchanged until a later tick.
    PowerOnRequested,
    /// Nothing changed this tick.
    Unchanged,
}

/// Errors surfaced by [`reconcile`].
#[derive(Debug, Error)]
pub enum ReconcileError<E>
where
    E: std::error::Error + 'static,
{
    /// Querying the remote status of a starting machine failed.
    #[error("unable to retrieve status of instance {instance_id}: {source}")]
    Status {
        /// Remote instance id.
        instance_id: String,
        /// Backend failure.
        #[source]
        source: E,
    },
    /// Powering on a stopped instance failed.
    #[error("unable to power on instance {instance_id}: {source}")]
    PowerOn {
        /// Remote instance id.
        instance_id: String,
        /// Backend failure.
        #[source]
        source: E,
    },
    /// Fetching the address of a running instance failed.
    #[error("unable to retrieve ip address of instance {instance_id}: {source}")]
    Addresses {
        /// Remote instance id.
        instance_id: String,
        /// Backend failure.
        #[source]
        source: E,
    },
    /// The instance is running but reports no address.
    #[error("instance {instance_id} is running but reports no ip address")]
    MissingIpAddress {
        /// Remote instance id.
        instance_id: String,
    },
}

/// Runs one reconciliation tick for `machine`, mutating its state and
/// address in place.
///
/// # Errors
///
/// Returns [`ReconcileError`] when a STARTING machine cannot be examined or
/// powered on. Status failures for a STOPPING machine are not errors: the
/// machine is assumed stopped.
pub async fn reconcile<A>(
    api: &A,
    machine: &mut Machine,
) -> Result<Reconciliation, ReconcileError<A::Error>>
where
    A: ComputeApi + ?Sized,
{
    match machine.state {
        MachineState::Starting => reconcile_starting(api, machine).await,
        MachineState::Stopping => Ok(reconcile_stopping(api, machine).await),
        MachineState::Started | MachineState::Stopped | MachineState::NotResponding => {
            Ok(Reconciliation::Unchanged)
        }
    }
}

async fn reconcile_starting<A>(
    api: &A,
    machine: &mut Machine,
) -> Result<Reconciliation, ReconcileError<A::Error>>
where
    A: ComputeApi + ?Sized,
{
    let instance_id = machine.name.clone();
    let status = api
        .status(&instance_id)
        .await
        .map_err(|source| ReconcileError::Status {
            instance_id: instance_id.clone(),
            source,
        })?;

    match status {
        None | Some(ServerStatus::Destroyed) => Ok(transition(machine, MachineState::Stopped)),
        Some(ServerStatus::Stopped) => {
            let accepted = api
                .reboot(&instance_id)
                .await
                .map_err(|source| ReconcileError::PowerOn {
                    instance_id: instance_id.clone(),
                    source,
                })?;
            if accepted {
                debug!(instance_id = %instance_id, "requested power-on of stopped instance");
            } else {
                warn!(instance_id = %instance_id, "power-on request was not accepted");
            }
            Ok(Reconciliation::PowerOnRequested)
        }
        Some(ServerStatus::Running) => {
            let addresses = api
                .list_ip_addresses(&instance_id)
                .await
                .map_err(|source| ReconcileError::Addresses {
                    instance_id: instance_id.clone(),
                    source,
                })?;
            let Some(address) = addresses.into_iter().next() else {
                return Err(ReconcileError::MissingIpAddress { instance_id });
            };
            if machine.ip_address != address {
                debug!(instance_id = %instance_id, ip_address = %address, "updating machine address");
                machine.ip_address = address;
            }
            Ok(transition(machine, MachineState::Started))
        }
        Some(ServerStatus::Error | ServerStatus::Expunging) => {
            Ok(transition(machine, MachineState::NotResponding))
        }
        Some(ServerStatus::Starting | ServerStatus::Unknown) => Ok(Reconciliation::Unchanged),
    }
}

async fn reconcile_stopping<A>(api: &A, machine: &mut Machine) -> Reconciliation
where
    A: ComputeApi + ?Sized,
{
    let status = match api.status(&machine.name).await {
        Ok(status) => status,
        Err(err) => {
            debug!(
                instance_id = %machine.name,
                error = %err,
                "status query failed for stopping instance; assuming stopped"
            );
            return transition(machine, MachineState::Stopped);
        }
    };

    match status {
        None
        | Some(ServerStatus::Stopped | ServerStatus::Destroyed | ServerStatus::Unknown) => {
            transition(machine, MachineState::Stopped)
        }
        Some(ServerStatus::Error | ServerStatus::Expunging) => {
            transition(machine, MachineState::NotResponding)
        }
        Some(ServerStatus::Running | ServerStatus::Starting) => Reconciliation::Unchanged,
    }
}

fn transition(machine: &mut Machine, next: MachineState) -> Reconciliation {
    info!(
        machine_id = %machine.id,
        instance_id = %machine.name,
        from = %machine.state,
        to = %next,
        "machine state changed"
    );
    machine.state = next;
    Reconciliation::Transitioned(next)
}
