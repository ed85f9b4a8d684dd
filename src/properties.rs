//! Property-bag lookups for compute centers, images, and machine descriptors.
//!
//! Values are looked up by their human-readable names. A blank value is the
//! same as an absent one.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::backend::{CreateServerOptions, IpToNetwork};
use crate::cloudstack::Credentials;

/// API key property.
pub const API_KEY: &str = "Api Key";
/// Secret key property.
pub const SECRET_KEY: &str = "Secret Key";
/// Management server URL property.
pub const END_POINT: &str = "Client End Point Url";

/// Service offering property.
pub const SERVICE_OFFERING_ID: &str = "Service Offering Id";
/// Zone property.
pub const ZONE_ID: &str = "Zone Id";
/// Template property, read from image properties.
pub const TEMPLATE_ID: &str = "Template Id";
/// Network ids property.
pub const NETWORK_IDS: &str = "Network Ids";
/// Disk offering property.
pub const DISK_OFFERING_ID: &str = "Disk Offering Id";
/// Instance group property.
pub const GROUP: &str = "Group";
/// Host property.
pub const HOST_ID: &str = "Host Id";
/// Hypervisor property.
pub const HYPERVISOR: &str = "Hypervisor";
/// SSH key pair property.
pub const KEY_PAIR: &str = "Key Pair";
/// Security group names property.
pub const SECURITY_GROUP_NAMES: &str = "Security Group Names";
/// Security group ids property.
pub const SECURITY_GROUP_IDS: &str = "Security Group Ids";
/// Disk size property.
pub const SIZE: &str = "Size";
/// Fixed IP address property.
pub const IP_ADDRESS: &str = "Ip Address";
/// Domain property.
pub const DOMAIN_ID: &str = "Domain Id";
/// Account property.
pub const ACCOUNT: &str = "Account";
/// Host name property.
pub const NAME: &str = "Name";
/// Keyboard layout property.
pub const KEYBOARD: &str = "Keyboard";
/// Project property.
pub const PROJECT_ID: &str = "Project Id";
/// Static IP assignments property (`ip,network;ip,network`).
pub const IP_TO_NETWORK_LIST: &str = "Ip To Network List";

/// Errors raised while reading properties.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PropertyError {
    /// Raised when a required property is blank or absent.
    #[error("missing required property '{name}'")]
    Missing {
        /// Property name.
        name: String,
    },
    /// Raised when the IP-to-network list does not consist of pairs.
    #[error("'Ip To Network List' must consist of ip and network id pairs, got '{value}'")]
    UnpairedIpToNetworkList {
        /// Raw property value.
        value: String,
    },
}

/// Named string properties supplied by the orchestrator.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PropertyBag {
    values: BTreeMap<String, String>,
}

impl PropertyBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property, returning the bag.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds or replaces a property.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Trimmed value of `name`; blank values read as absent.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    fn owned(&self, name: &str) -> Option<String> {
        self.value(name).map(str::to_owned)
    }

    fn require(&self, name: &str) -> Result<String, PropertyError> {
        self.owned(name).ok_or_else(|| PropertyError::Missing {
            name: name.to_owned(),
        })
    }

    /// Credentials described by `Api Key`, `Secret Key`, and
    /// `Client End Point Url`.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::Missing`] when any of the three is blank.
    pub fn credentials(&self) -> Result<Credentials, PropertyError> {
        Ok(Credentials::new(
            self.require(API_KEY)?,
            self.require(SECRET_KEY)?,
            self.require(END_POINT)?,
        ))
    }

    /// Parses `Ip To Network List` into ordered pairs. Items are separated by
    /// `,` or `;` and read two at a time.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError::UnpairedIpToNetworkList`] for an odd number of
    /// items.
    pub fn ip_to_network(&self) -> Result<Vec<IpToNetwork>, PropertyError> {
        let Some(raw) = self.value(IP_TO_NETWORK_LIST) else {
            return Ok(Vec::new());
        };
        let items: Vec<&str> = raw.split([',', ';']).map(str::trim).collect();
        let chunks = items.chunks_exact(2);
        if !chunks.remainder().is_empty() {
            return Err(PropertyError::UnpairedIpToNetworkList {
                value: raw.to_owned(),
            });
        }
        Ok(chunks
            .filter_map(|pair| match pair {
                [ip, network_id] => Some(IpToNetwork {
                    ip: (*ip).to_owned(),
                    network_id: (*network_id).to_owned(),
                }),
                _ => None,
            })
            .collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bag = Self::new();
        for (name, value) in iter {
            bag.insert(name, value);
        }
        bag
    }
}

/// Arguments for one `deployVirtualMachine` call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployRequest {
    /// Compute offering.
    pub service_offering_id: String,
    /// Template to boot.
    pub template_id: String,
    /// Target zone.
    pub zone_id: String,
    /// Optional settings.
    pub options: CreateServerOptions,
}

impl DeployRequest {
    /// Assembles a deploy from machine-descriptor and image properties.
    ///
    /// # Errors
    ///
    /// Returns [`PropertyError`] when the offering, template, or zone is
    /// missing, or the IP-to-network list is malformed.
    pub fn from_properties(
        machine: &PropertyBag,
        image: &PropertyBag,
    ) -> Result<Self, PropertyError> {
        let options = CreateServerOptions {
            account: machine.owned(ACCOUNT),
            disk_offering_id: machine.owned(DISK_OFFERING_ID),
            display_name: None,
            domain_id: machine.owned(DOMAIN_ID),
            group: machine.owned(GROUP),
            host_id: machine.owned(HOST_ID),
            hypervisor: machine.owned(HYPERVISOR),
            ip_address: machine.owned(IP_ADDRESS),
            keyboard: machine.owned(KEYBOARD),
            key_pair: machine.owned(KEY_PAIR),
            name: machine.owned(NAME),
            network_ids: machine.owned(NETWORK_IDS),
            project_id: machine.owned(PROJECT_ID),
            security_group_ids: machine.owned(SECURITY_GROUP_IDS),
            security_group_names: machine.owned(SECURITY_GROUP_NAMES),
            user_data: None,
            size: machine.owned(SIZE),
            ip_to_network: machine.ip_to_network()?,
        };
        Ok(Self {
            service_offering_id: machine.require(SERVICE_OFFERING_ID)?,
            template_id: image.require(TEMPLATE_ID)?,
            zone_id: machine.require(ZONE_ID)?,
            options,
        })
    }
}
