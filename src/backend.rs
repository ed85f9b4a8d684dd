//! Backend abstraction for the remote compute API.
//!
//! The lifecycle code talks to the provider only through [`ComputeApi`], which
//! keeps reconciliation testable without HTTP.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Handle returned by a successful deploy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerHandle {
    /// Provider specific identifier for the instance. Never empty.
    pub id: String,
}

/// Remote lifecycle state of an instance.
///
/// Parsing is total: any text the provider sends that is not recognised maps
/// to [`ServerStatus::Unknown`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ServerStatus {
    /// The instance is booting.
    Starting,
    /// The instance is up.
    Running,
    /// The instance exists but is powered off.
    Stopped,
    /// The provider reports a failure.
    Error,
    /// The instance is being removed.
    Expunging,
    /// The instance has been destroyed.
    Destroyed,
    /// Anything else.
    Unknown,
}

impl ServerStatus {
    /// Maps a provider state string, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "STARTING" => Self::Starting,
            "RUNNING" => Self::Running,
            "STOPPED" => Self::Stopped,
            "ERROR" => Self::Error,
            "EXPUNGING" => Self::Expunging,
            "DESTROYED" => Self::Destroyed,
            _ => Self::Unknown,
        }
    }

    /// Upper-case name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Expunging => "EXPUNGING",
            Self::Destroyed => "DESTROYED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl From<&str> for ServerStatus {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static address request binding an IP to a network.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IpToNetwork {
    /// Requested IP address.
    pub ip: String,
    /// Network the address belongs to.
    pub network_id: String,
}

/// Optional settings for a deploy. Absent or blank fields are not sent.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreateServerOptions {
    /// Account that owns the instance.
    pub account: Option<String>,
    /// Data disk offering.
    pub disk_offering_id: Option<String>,
    /// Display name shown in the provider console.
    pub display_name: Option<String>,
    /// Domain of the owning account.
    pub domain_id: Option<String>,
    /// Instance group.
    pub group: Option<String>,
    /// Host to place the instance on.
    pub host_id: Option<String>,
    /// Hypervisor type.
    pub hypervisor: Option<String>,
    /// Fixed IP address on the default network.
    pub ip_address: Option<String>,
    /// Console keyboard layout.
    pub keyboard: Option<String>,
    /// SSH key pair name.
    pub key_pair: Option<String>,
    /// Host name of the instance.
    pub name: Option<String>,
    /// Comma separated network ids.
    pub network_ids: Option<String>,
    /// Owning project.
    pub project_id: Option<String>,
    /// Comma separated security group ids.
    pub security_group_ids: Option<String>,
    /// Comma separated security group names.
    pub security_group_names: Option<String>,
    /// Base64 user-data payload.
    pub user_data: Option<String>,
    /// Disk size in GB for custom disk offerings.
    pub size: Option<String>,
    /// Static IP assignments, sent in order as an indexed parameter block.
    pub ip_to_network: Vec<IpToNetwork>,
}

impl CreateServerOptions {
    /// Named scalar parameters in the form sent to `deployVirtualMachine`.
    #[must_use]
    pub fn named_params(&self) -> [(&'static str, Option<&str>); 17] {
        [
            ("account", self.account.as_deref()),
            ("diskofferingid", self.disk_offering_id.as_deref()),
            ("displayname", self.display_name.as_deref()),
            ("domainid", self.domain_id.as_deref()),
            ("group", self.group.as_deref()),
            ("hostid", self.host_id.as_deref()),
            ("hypervisor", self.hypervisor.as_deref()),
            ("ipaddress", self.ip_address.as_deref()),
            ("keyboard", self.keyboard.as_deref()),
            ("keypair", self.key_pair.as_deref()),
            ("name", self.name.as_deref()),
            ("networkids", self.network_ids.as_deref()),
            ("projectid", self.project_id.as_deref()),
            ("securitygroupids", self.security_group_ids.as_deref()),
            ("securitygroupnames", self.security_group_names.as_deref()),
            ("userdata", self.user_data.as_deref()),
            ("size", self.size.as_deref()),
        ]
    }
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Remote operations the lifecycle code depends on.
pub trait ComputeApi: Send + Sync {
    /// Provider specific error type returned by the backend.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current remote state, or `None` when the instance no longer exists.
    fn status<'a>(&'a self, id: &'a str) -> BackendFuture<'a, Option<ServerStatus>, Self::Error>;

    /// Every IP address reported for the instance, in provider order.
    fn list_ip_addresses<'a>(&'a self, id: &'a str) -> BackendFuture<'a, Vec<String>, Self::Error>;

    /// Requests a reboot (which also powers on a stopped instance). Resolves
    /// to whether the provider accepted the job.
    fn reboot<'a>(&'a self, id: &'a str) -> BackendFuture<'a, bool, Self::Error>;

    /// Destroys the instance; succeeds when it is already gone.
    fn terminate<'a>(&'a self, id: &'a str) -> BackendFuture<'a, bool, Self::Error>;
}
