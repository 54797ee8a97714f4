use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-side identity of a spawned process. Two spawn notifications carrying
/// the same handle describe the same underlying process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(pub u64);

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(i32),
    Signaled(i32),
    /// The host lost track of the process without learning how it ended.
    Vanished,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProcessState::Running)
    }

    /// Status recorded on the item once the process is gone. Signals follow
    /// the shell convention of `128 + signal`.
    pub fn exit_status(self) -> Option<i32> {
        match self {
            ProcessState::Running | ProcessState::Vanished => None,
            ProcessState::Exited(code) => Some(code),
            ProcessState::Signaled(signal) => Some(128 + signal),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Handler {
    Shell,
    Compile,
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dispatch_command())
    }
}

impl Handler {
    /// Resolves the re-invocation capability for a process from the host
    /// command that dispatched it.
    pub fn resolve(provenance: &Provenance) -> Option<Handler> {
        HANDLER_TABLE
            .iter()
            .find(|(matches, _)| matches(provenance.command()))
            .map(|(_, handler)| *handler)
    }

    pub fn dispatch_command(self) -> &'static str {
        match self {
            Handler::Shell => "shell-command",
            Handler::Compile => "compile",
        }
    }
}

type ProvenancePredicate = fn(&str) -> bool;

const HANDLER_TABLE: &[(ProvenancePredicate, Handler)] = &[
    (is_shell_dispatch, Handler::Shell),
    (is_compile_dispatch, Handler::Compile),
];

fn is_shell_dispatch(command: &str) -> bool {
    command == "shell" || command.ends_with("shell-command")
}

fn is_compile_dispatch(command: &str) -> bool {
    matches!(command, "compile" | "recompile" | "project-compile")
}

/// The host dispatch command that launched a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance(String);

impl Provenance {
    pub fn new(command: impl Into<String>) -> Self {
        Self(command.into())
    }

    pub fn command(&self) -> &str {
        &self.0
    }
}

impl From<Handler> for Provenance {
    fn from(handler: Handler) -> Self {
        Self::new(handler.dispatch_command())
    }
}

/// A tracked command invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub handler: Option<Handler>,
    pub directory: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    exit_status: Option<i32>,
    #[serde(default)]
    output_cursor: u64,
}

impl Item {
    pub fn new(
        id: ItemId,
        name: impl Into<String>,
        handler: Option<Handler>,
        directory: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            handler,
            directory: directory.into(),
            start_time,
            pid: None,
            end_time: None,
            exit_status: None,
            output_cursor: 0,
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn output_cursor(&self) -> u64 {
        self.output_cursor
    }

    pub fn is_live(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn target_label(&self) -> String {
        format!("{} ({})", self.id, self.name)
    }

    /// Sets the end time and status. Returns false when the item was already
    /// finalized, in which case nothing changes.
    pub(crate) fn finalize(&mut self, at: DateTime<Utc>, exit_status: Option<i32>) -> bool {
        if self.end_time.is_some() {
            return false;
        }
        self.end_time = Some(at);
        self.exit_status = exit_status;
        true
    }

    pub(crate) fn advance_cursor(&mut self, written: u64) {
        self.output_cursor = self.output_cursor.saturating_add(written);
    }
}
