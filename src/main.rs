//! Binary entry point for the Cumulo CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cumulo::backend::ServerStatus;
use cumulo::cloudstack::CloudStackError;
use cumulo::config::ConfigError;
use cumulo::{ClientRegistry, CumuloConfig};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("cloudstack error: {0}")]
    CloudStack(#[from] CloudStackError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    let exit_code = match dispatch(cli, &mut io::stdout()).await {
        Ok(()) => 0,
        Err(err) => {
            write_error(io::stderr(), &err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli, out: &mut impl Write) -> Result<(), CliError> {
    let config = CumuloConfig::load_without_cli_args()?;
    let credentials = config.credentials()?;
    let registry = ClientRegistry::with_timeout(config.request_timeout())?;
    let client = registry.get(&credentials).await?;

    match cli {
        Cli::Validate => {
            writeln!(out, "credentials valid for {}", credentials.endpoint)?;
        }
        Cli::List => {
            for id in client.list_ids().await? {
                writeln!(out, "{id}")?;
            }
        }
        Cli::Status(args) => {
            let status = client.status(&args.id).await?;
            writeln!(out, "{}", render_status(status))?;
        }
        Cli::Ips(args) => {
            for address in client.list_ip_addresses(&args.id).await? {
                writeln!(out, "{address}")?;
            }
        }
        Cli::Reboot(args) => {
            let accepted = client.reboot(&args.id).await?;
            writeln!(out, "{}", render_acceptance(accepted))?;
        }
        Cli::Terminate(args) => {
            let accepted = client.terminate(&args.id).await?;
            writeln!(out, "{}", render_acceptance(accepted))?;
        }
    }
    Ok(())
}

fn render_status(status: Option<ServerStatus>) -> String {
    status.map_or_else(|| String::from("absent"), |value| value.to_string())
}

const fn render_acceptance(accepted: bool) -> &'static str {
    if accepted { "accepted" } else { "not accepted" }
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
