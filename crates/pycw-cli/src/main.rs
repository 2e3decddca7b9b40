use std::path::PathBuf;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use pycw_core::converter_for;
use tracing::warn;

mod cli;

use cli::{LogLevel, PycWheelCli};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PycWheelCli::parse();
    init_tracing(cli.log);

    let options = cli.convert_options()?;
    let wheels = expand_wheels(&cli.wheel)?;
    if wheels.is_empty() {
        warn!(pattern = %cli.wheel, "no wheels matched");
        return Ok(());
    }

    let python = match &cli.python {
        Some(python) => python.clone(),
        None => pycw_python::detect_interpreter().map_err(|err| eyre!("{err:#}"))?,
    };
    let converter = converter_for(&python)?;

    for wheel in &wheels {
        converter.convert(wheel, &options)?;
    }
    Ok(())
}

fn init_tracing(level: LogLevel) {
    let level = level.directive();
    let filter = format!("pycw_cli={level},pycw_core={level},pycw_python={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .without_time()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Paths matching `pattern`, in glob order; a pattern matching nothing yields none.
fn expand_wheels(pattern: &str) -> Result<Vec<PathBuf>> {
    let mut wheels = Vec::new();
    for entry in glob::glob(pattern)? {
        wheels.push(entry?);
    }
    Ok(wheels)
}
