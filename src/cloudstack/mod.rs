//! CloudStack implementation of the compute API.
//!
//! [`CloudStackClient`] exposes the four commands the connector needs
//! (deploy, reboot, destroy, list) on top of the signer, the transport, and
//! the response interpreter.

mod error;
pub mod response;
pub mod signer;
pub mod transport;

use std::fmt;

use tracing::debug;

use crate::backend::{BackendFuture, ComputeApi, CreateServerOptions, ServerHandle, ServerStatus};
use response::{Outcome, Response, interpret};

pub use error::CloudStackError;
pub use signer::ApiRequest;
pub use transport::{DEFAULT_REQUEST_TIMEOUT, HttpTransport, Transport, TransportFuture};

const DEPLOY_VIRTUAL_MACHINE: &str = "deployVirtualMachine";
const REBOOT_VIRTUAL_MACHINE: &str = "rebootVirtualMachine";
const DESTROY_VIRTUAL_MACHINE: &str = "destroyVirtualMachine";
const LIST_VIRTUAL_MACHINES: &str = "listVirtualMachines";

/// API key pair and endpoint identifying one CloudStack account.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Credentials {
    /// Public API key sent with every request.
    pub api_key: String,
    /// Secret key used to sign requests. Never transmitted.
    pub secret_key: String,
    /// Base URL of the management server, without a trailing slash.
    pub endpoint: String,
}

impl Credentials {
    /// Creates credentials, trimming values and dropping one trailing `/`
    /// from the endpoint.
    #[must_use]
    pub fn new(
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into();
        let trimmed = endpoint.trim();
        Self {
            api_key: api_key.into().trim().to_owned(),
            secret_key: secret_key.into().trim().to_owned(),
            endpoint: trimmed.strip_suffix('/').unwrap_or(trimmed).to_owned(),
        }
    }

    /// URL requests are sent to.
    #[must_use]
    pub fn api_url(&self) -> String {
        format!("{}/api", self.endpoint)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Client for a single set of CloudStack credentials.
#[derive(Clone, Debug)]
pub struct CloudStackClient<T = HttpTransport> {
    credentials: Credentials,
    transport: T,
}

impl<T: Transport> CloudStackClient<T> {
    /// Creates a client. The credentials are not checked; see
    /// [`CloudStackClient::authenticate`].
    #[must_use]
    pub const fn new(credentials: Credentials, transport: T) -> Self {
        Self {
            credentials,
            transport,
        }
    }

    /// Credentials this client signs with.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    async fn execute(&self, request: &ApiRequest) -> Result<String, CloudStackError> {
        let url = request.signed_url(&self.credentials)?;
        debug!(
            command = request.command(),
            endpoint = %self.credentials.endpoint,
            "sending cloudstack request"
        );
        self.transport.get(&url).await
    }

    /// Lists instances to prove the credentials work.
    ///
    /// # Errors
    ///
    /// Returns whatever [`CloudStackClient::list_ids`] fails with.
    pub async fn probe(&self) -> Result<(), CloudStackError> {
        self.list_ids().await.map(|_| ())
    }

    /// Boolean view of [`CloudStackClient::probe`]: every failure kind
    /// (transport, parse, remote error) reads as `false`.
    pub async fn authenticate(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(err) => {
                debug!(endpoint = %self.credentials.endpoint, error = %err, "credential probe failed");
                false
            }
        }
    }

    /// Deploys a new instance.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Api`] with the remote error text, or
    /// [`CloudStackError::MissingElement`] when the response carries no
    /// usable `id`.
    pub async fn deploy(
        &self,
        service_offering_id: &str,
        template_id: &str,
        zone_id: &str,
        options: &CreateServerOptions,
    ) -> Result<ServerHandle, CloudStackError> {
        let mut request = ApiRequest::new(DEPLOY_VIRTUAL_MACHINE)
            .param("serviceofferingid", service_offering_id)
            .param("templateid", template_id)
            .param("zoneid", zone_id);
        for (name, value) in options.named_params() {
            request = request.optional_param(name, value);
        }
        for (index, pair) in options.ip_to_network.iter().enumerate() {
            request = request
                .param(format!("iptonetworklist[{index}].ip"), &pair.ip)
                .param(format!("iptonetworklist[{index}].networkid"), &pair.network_id);
        }

        let body = self.execute(&request).await?;
        let response = match interpret(&body)? {
            Outcome::Success(response) => response,
            Outcome::Failure(message) => {
                return Err(CloudStackError::api("deploying virtual machine", message));
            }
        };
        let id = response.require_text("id")?;
        if id.is_empty() {
            return Err(CloudStackError::MissingElement {
                element: String::from("id"),
                body,
            });
        }
        Ok(ServerHandle { id })
    }

    /// Requests a reboot. Resolves to `true` when a job was accepted.
    ///
    /// An error envelope yields `false` rather than an error.
    ///
    /// # Errors
    ///
    /// Returns transport and parse failures.
    pub async fn reboot(&self, id: &str) -> Result<bool, CloudStackError> {
        let request = ApiRequest::new(REBOOT_VIRTUAL_MACHINE).param("id", id);
        let body = self.execute(&request).await?;
        let accepted = Response::parse(&body)?.has_element("jobid");
        if !accepted {
            debug!(instance_id = id, "reboot returned no job id");
        }
        Ok(accepted)
    }

    /// Destroys an instance. An error response for an id that is no longer
    /// listed counts as success.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Api`] when destroy fails and the instance
    /// is still listed, plus transport and parse failures.
    pub async fn terminate(&self, id: &str) -> Result<bool, CloudStackError> {
        let request = ApiRequest::new(DESTROY_VIRTUAL_MACHINE).param("id", id);
        let body = self.execute(&request).await?;
        match interpret(&body)? {
            Outcome::Success(response) => Ok(response.has_element("jobid")),
            Outcome::Failure(message) => {
                if self.list_ids().await?.iter().any(|known| known == id) {
                    return Err(CloudStackError::api(
                        format!("terminating instance {id}"),
                        message,
                    ));
                }
                debug!(instance_id = id, "destroy failed for an unlisted instance; already gone");
                Ok(true)
            }
        }
    }

    async fn describe_raw(&self, id: &str) -> Result<String, CloudStackError> {
        let request = ApiRequest::new(LIST_VIRTUAL_MACHINES).param("id", id);
        self.execute(&request).await
    }

    /// Returns the raw XML describing one instance.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Api`] when the listing reports an error.
    pub async fn describe(&self, id: &str) -> Result<String, CloudStackError> {
        let body = self.describe_raw(id).await?;
        if let Outcome::Failure(message) = interpret(&body)? {
            return Err(CloudStackError::api(format!("describing instance {id}"), message));
        }
        Ok(body)
    }

    /// Ids of every instance visible to these credentials.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Api`] when the listing reports an error.
    pub async fn list_ids(&self) -> Result<Vec<String>, CloudStackError> {
        let body = self.execute(&ApiRequest::new(LIST_VIRTUAL_MACHINES)).await?;
        match interpret(&body)? {
            Outcome::Success(response) => Ok(response.virtual_machine_ids()),
            Outcome::Failure(message) => Err(CloudStackError::api("retrieving servers", message)),
        }
    }

    /// Every `ipaddress` reported for the instance, in document order.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Api`] when the listing reports an error.
    pub async fn list_ip_addresses(&self, id: &str) -> Result<Vec<String>, CloudStackError> {
        let body = self.describe_raw(id).await?;
        match interpret(&body)? {
            Outcome::Success(response) => Ok(response.all_texts("ipaddress")),
            Outcome::Failure(message) => Err(CloudStackError::api(
                format!("retrieving ip addresses for instance {id}"),
                message,
            )),
        }
    }

    /// Current state of the instance, or `None` when it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Inconsistent`] when describing fails for an
    /// instance that is still listed, plus transport and parse failures.
    pub async fn status(&self, id: &str) -> Result<Option<ServerStatus>, CloudStackError> {
        let body = self.describe_raw(id).await?;
        match interpret(&body)? {
            Outcome::Success(response) => match response.first_text("state") {
                Some(state) => Ok(Some(ServerStatus::parse(&state))),
                None if response.has_element("virtualmachine") => {
                    Err(CloudStackError::MissingElement {
                        element: String::from("state"),
                        body: body.clone(),
                    })
                }
                None => Ok(None),
            },
            Outcome::Failure(message) => {
                if self.list_ids().await?.iter().any(|known| known == id) {
                    return Err(CloudStackError::Inconsistent {
                        instance_id: id.to_owned(),
                        message,
                    });
                }
                Ok(None)
            }
        }
    }
}

impl<T: Transport> ComputeApi for CloudStackClient<T> {
    type Error = CloudStackError;

    fn status<'a>(&'a self, id: &'a str) -> BackendFuture<'a, Option<ServerStatus>, Self::Error> {
        Box::pin(async move { Self::status(self, id).await })
    }

    fn list_ip_addresses<'a>(&'a self, id: &'a str) -> BackendFuture<'a, Vec<String>, Self::Error> {
        Box::pin(async move { Self::list_ip_addresses(self, id).await })
    }

    fn reboot<'a>(&'a self, id: &'a str) -> BackendFuture<'a, bool, Self::Error> {
        Box::pin(async move { Self::reboot(self, id).await })
    }

    fn terminate<'a>(&'a self, id: &'a str) -> BackendFuture<'a, bool, Self::Error> {
        Box::pin(async move { Self::terminate(self, id).await })
    }
}
