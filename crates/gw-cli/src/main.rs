mod commands;

use clap::{Parser, Subcommand};

/// groundwork CLI -- automated environment setup for project checkouts.
#[derive(Parser)]
#[command(name = "gw", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the development environment for a project (the default).
    Run(commands::run::RunArgs),

    /// Print the effective configuration as TOML.
    Config {
        /// Config file to read instead of ~/.groundwork/config.toml.
        #[arg(long)]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => commands::run::run(commands::run::RunArgs::default()).await,
        Some(Commands::Run(args)) => commands::run::run(args).await,
        Some(Commands::Config { config }) => commands::config::run(config.as_deref()),
    }
}
