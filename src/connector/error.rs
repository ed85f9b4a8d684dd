//! Errors surfaced by connector operations.

use thiserror::Error;

use crate::cloudstack::CloudStackError;
use crate::orchestrator::OrchestratorError;
use crate::properties::PropertyError;
use crate::reconcile::ReconcileError;

/// Errors raised by [`super::CloudStackConnector`].
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Raised when a CloudStack call fails.
    #[error("{context}: {source}")]
    Client {
        /// Operation and machine the call was made for.
        context: String,
        /// Underlying client failure.
        #[source]
        source: CloudStackError,
    },
    /// Raised when orchestrator properties are missing or malformed.
    #[error("invalid properties: {0}")]
    Properties(#[from] PropertyError),
    /// Raised when an orchestrator collaborator fails.
    #[error("{context}: {source}")]
    Orchestrator {
        /// Operation that invoked the collaborator.
        context: String,
        /// Collaborator failure.
        #[source]
        source: OrchestratorError,
    },
    /// Raised when a reconciliation tick fails.
    #[error("unable to refresh state of machine {machine_id}: {source}")]
    Reconcile {
        /// Orchestrator machine id.
        machine_id: String,
        /// Reconciler failure.
        #[source]
        source: ReconcileError<CloudStackError>,
    },
    /// Raised when a compute center or image store fails validation.
    #[error("failed to validate the {subject} properties: {source}")]
    InvalidObject {
        /// What was validated, for example `CloudStack connector`.
        subject: String,
        /// Validation failure.
        #[source]
        source: Box<ConnectorError>,
    },
    /// Raised when creation failed after the instance was deployed and the
    /// rollback terminate failed too. The instance needs manual cleanup.
    #[error(
        "machine create failed and terminate failed as well; orphaned {kind} instance \
         {instance_id} must be shut down manually. create failure: {cause}; terminate \
         failure: {terminate}"
    )]
    OrphanedInstance {
        /// Compute-center type name.
        kind: String,
        /// Remote id of the orphaned instance.
        instance_id: String,
        /// Failure that triggered the rollback.
        #[source]
        cause: Box<ConnectorError>,
        /// Failure reported by the rollback terminate.
        terminate: CloudStackError,
    },
}

impl ConnectorError {
    pub(crate) fn client(context: impl Into<String>) -> impl FnOnce(CloudStackError) -> Self {
        let context = context.into();
        move |source| Self::Client { context, source }
    }

    pub(crate) fn orchestrator(
        context: impl Into<String>,
    ) -> impl FnOnce(OrchestratorError) -> Self {
        let context = context.into();
        move |source| Self::Orchestrator { context, source }
    }
}
