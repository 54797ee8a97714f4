use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::item::Handler;

const BUILD_VERSION: &str = env!("CMDTRACK_BUILD_VERSION");
const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{about-with-newline}
USAGE:
  {usage}

COMMANDS:
{subcommands}

OPTIONS:
{options}
{after-help}
";
const HELP_AFTER: &str = "\
Examples
  cmdtrack run make -j8
  cmdtrack run --mode compile --cwd ~/src/app cargo build
  cmdtrack ls --live
  cmdtrack ls --command '^cargo' --dir ~/src
  cmdtrack log 12 -n 100
  cmdtrack kill 12
  cmdtrack rerun 12
";

#[derive(Debug, Parser)]
#[command(
    name = "cmdtrack",
    version = BUILD_VERSION,
    about = "Track shell and compile commands with their output logs",
    help_template = HELP_TEMPLATE,
    after_help = HELP_AFTER
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a command and track it until it exits.
    Run {
        #[arg(long, value_enum, default_value_t = ModeArg::Shell)]
        mode: ModeArg,
        #[arg(long)]
        cwd: Option<PathBuf>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Run a tracked command again, in its original directory.
    Rerun { id: u64 },
    /// Show tracked commands, newest first.
    #[command(visible_aliases = ["ls"])]
    List {
        /// Only commands matching this regular expression.
        #[arg(long)]
        command: Option<String>,
        /// Only commands started in this directory or below it.
        #[arg(long)]
        dir: Option<String>,
        /// Only commands that are still running.
        #[arg(long)]
        live: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the tail of a command's output log.
    #[command(visible_aliases = ["log"])]
    Logs {
        id: u64,
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        /// Print the log file path instead of its contents.
        #[arg(long)]
        path: bool,
    },
    /// Ask a running command to terminate.
    Kill { id: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Shell,
    Compile,
}

impl From<ModeArg> for Handler {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Shell => Handler::Shell,
            ModeArg::Compile => Handler::Compile,
        }
    }
}
