//! Command-line interface definitions for the `cumulo` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `cumulo` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cumulo",
    about = "Inspect and manage CloudStack virtual machines",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Check that the configured credentials authenticate.
    #[command(name = "validate", about = "Check that the configured credentials authenticate")]
    Validate,
    /// List the ids of every visible instance.
    #[command(name = "list", about = "List the ids of every visible instance")]
    List,
    /// Print the remote state of an instance.
    #[command(name = "status", about = "Print the remote state of an instance")]
    Status(InstanceArgs),
    /// Print the IP addresses of an instance.
    #[command(name = "ips", about = "Print the IP addresses of an instance")]
    Ips(InstanceArgs),
    /// Reboot (or power on) an instance.
    #[command(name = "reboot", about = "Reboot (or power on) an instance")]
    Reboot(InstanceArgs),
    /// Destroy an instance; an instance that is already gone counts as destroyed.
    #[command(name = "terminate", about = "Destroy an instance")]
    Terminate(InstanceArgs),
}

/// Arguments naming a single instance.
#[derive(Debug, Args)]
pub(crate) struct InstanceArgs {
    /// Remote instance id.
    #[arg(value_name = "ID")]
    pub(crate) id: String,
}
