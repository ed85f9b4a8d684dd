//! Core library for the Cumulo CloudStack connector.
//!
//! The crate signs and sends CloudStack API requests, interprets the XML
//! responses, caches one authenticated client per credential set, and drives
//! orchestrator machines through their lifecycle (create with rollback,
//! reconcile, restart, terminate).

pub mod backend;
pub mod cloudstack;
pub mod config;
pub mod connector;
pub mod orchestrator;
pub mod properties;
pub mod reconcile;
pub mod registry;
pub mod test_support;

pub use backend::{ComputeApi, CreateServerOptions, ServerHandle, ServerStatus};
pub use cloudstack::{CloudStackClient, CloudStackError, Credentials, HttpTransport, Transport};
pub use config::{ConfigError, CumuloConfig};
pub use connector::{CloudStackConnector, ConnectorError, ConnectorSettings};
pub use orchestrator::{Machine, MachineState};
pub use reconcile::{ReconcileError, Reconciliation, reconcile};
pub use registry::ClientRegistry;
