//! Build script for generating the `cumulo` man pages.
//!
//! The packaging pipeline expects the man pages to be available from the
//! build output directory, so we generate them using clap-mangen here: one
//! page for the binary and one per subcommand.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(
    command: Command,
    out_dir: &Path,
    file_name: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    let mut file = File::create(out_dir.join(file_name))?;
    file.write_all(&buffer)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let command = Cli::command();
    for subcommand in command.get_subcommands() {
        let name = format!("cumulo-{}", subcommand.get_name());
        let page = subcommand.clone().name(name.clone());
        render(page, &out_dir, &format!("{name}.1"))?;
    }
    render(command, &out_dir, "cumulo.1")?;

    Ok(())
}
