use clap::{Parser, Subcommand};
use miette::{Context as _, IntoDiagnostic, Result};

mod common;
mod daemon;
mod doctor;
mod enrich;
mod feedback;
mod index;

#[derive(Debug, Subcommand)]
enum Command {
    /// follows the chain head until interrupted
    Daemon(daemon::Args),

    /// indexes an explicit block range and exits
    Index(index::Args),

    /// resolves pending balances against the node
    Enrich(enrich::Args),

    /// commands to inspect and repair the store
    Doctor(doctor::Args),
}

#[derive(Debug, Parser)]
#[clap(name = "ethdex")]
#[clap(bin_name = "ethdex")]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let config = ethdex::settings::load_config(args.config.as_deref())
        .into_diagnostic()
        .context("loading config")?;

    let feedback = feedback::Feedback::default();

    match args.command {
        Command::Daemon(x) => daemon::run(config, &x)?,
        Command::Index(x) => index::run(config, &x, &feedback)?,
        Command::Enrich(x) => enrich::run(config, &x)?,
        Command::Doctor(x) => doctor::run(config, &x, &feedback)?,
    };

    Ok(())
}
