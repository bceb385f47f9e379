// Copyright 2025 Cornell University
// released under MIT License

use anyhow::Context;
use clap::Parser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
use envmodel::setup::{generate, load_collection, load_config};
use std::path::PathBuf;

/// Generates environment models from a process collection description
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, disable_version_flag = true)]
struct Cli {
    /// Path to the process collection description (JSON)
    #[arg(short, long, value_name = "DESCRIPTION_FILE")]
    input: PathBuf,

    /// Path to the generator configuration (JSON), defaults are used if omitted
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Directory the generated models are written to
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    output: PathBuf,

    /// Users can specify `-v` or `--verbose` to toggle logging
    #[command(flatten)]
    verbosity: Verbosity<WarnLevel>,
}

/// Example:
/// `cargo run -- --input tests/collections/drivers.json --output models -vv`
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // For concision, we disable timestamps in the log
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(cli.verbosity.log_level_filter())
        .init();

    let model = load_collection(&cli.input)?;
    let config = load_config(cli.config.as_deref())?;
    let count = generate(&model, &config, &cli.output)
        .with_context(|| format!("failed to generate models of {}", cli.input.display()))?;
    println!("{count}");
    Ok(())
}
