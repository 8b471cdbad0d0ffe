use std::path::Path;

use gw_core::config::Config;

/// Run the `config` subcommand: load, validate and print the effective
/// configuration so users can see what a run would actually use.
pub fn run(path: Option<&Path>) -> anyhow::Result<()> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    println!("{}", config.to_toml()?);
    Ok(())
}
