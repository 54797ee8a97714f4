use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("no such item: {0}")]
    ItemNotFound(u64),
    #[error("no live process for item {0}")]
    NoLiveProcessForKill(String),
    #[error("no live output buffer for item {0}")]
    NoBufferForItem(String),
    #[error("no log file for item {0}")]
    NoLogForItem(String),
    #[error("item {0} cannot be re-invoked")]
    NoHandlerForItem(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
