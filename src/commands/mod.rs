mod common;
mod kill;
mod list;
mod logs;
mod rerun;
mod run;

use anyhow::Result;

use crate::cli::Commands;
use crate::config::AppConfig;

/// Dispatches a parsed command and returns the process exit code.
pub async fn run(command: Commands, config: &AppConfig) -> Result<i32> {
    match command {
        Commands::Run { mode, cwd, command } => {
            run::run(config, command.join(" "), mode.into(), cwd).await
        }
        Commands::Rerun { id } => rerun::run(config, id).await,
        Commands::List {
            command,
            dir,
            live,
            json,
        } => list::run(config, command, dir, live, json).map(|()| 0),
        Commands::Logs { id, lines, path } => logs::run(config, id, lines, path).map(|()| 0),
        Commands::Kill { id } => kill::run(config, id).map(|()| 0),
    }
}
