use anyhow::Result;

use crate::config::AppConfig;
use crate::item::ItemId;
use crate::logging::read_last_lines;

use super::common::load_tracker;

pub(crate) fn run(config: &AppConfig, id: u64, lines: usize, path_only: bool) -> Result<()> {
    let tracker = load_tracker(config)?;
    let id = ItemId(id);

    if path_only {
        println!("{}", tracker.log_path(id)?.display());
        return Ok(());
    }

    let path = tracker.log_for(id)?;
    println!("==> {} <==", path.display());
    for line in read_last_lines(&path, lines)? {
        println!("{line}");
    }
    Ok(())
}
