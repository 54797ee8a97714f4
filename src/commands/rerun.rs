use std::path::PathBuf;

use anyhow::Result;

use crate::config::AppConfig;
use crate::item::ItemId;

use super::common::load_tracker;

pub(crate) async fn run(config: &AppConfig, id: u64) -> Result<i32> {
    let spec = load_tracker(config)?.rerun_spec(ItemId(id))?;
    super::run::run(
        config,
        spec.command,
        spec.handler,
        Some(PathBuf::from(spec.directory)),
    )
    .await
}
