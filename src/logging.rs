//! Incremental copying of live process output into per-item log files.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::item::Item;

/// Live output of a tracked process, as exposed by the host.
pub trait OutputSource: Send + Sync {
    /// Bytes produced at or after `offset`. Returns `None` once the host has
    /// torn the stream down.
    fn read_from(&self, offset: u64) -> Option<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written(u64),
    NothingNew,
    StreamGone,
    AfterFinalize,
}

/// Log file for an item: `<first-word-of-command>-<start-timestamp>.out`.
pub fn log_path(log_dir: &Path, item: &Item) -> PathBuf {
    let stamp = item.start_time.format("%Y%m%dT%H%M%S%.3f");
    log_dir.join(format!("{}-{stamp}.out", command_stem(&item.name)))
}

fn command_stem(command: &str) -> String {
    let first = command.split_whitespace().next().unwrap_or_default();
    let program = first.rsplit('/').next().unwrap_or(first);
    let stem: String = program
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "command".to_string()
    } else {
        stem
    }
}

/// Appends every byte past the item's cursor to `log_path` and advances the
/// cursor by exactly what reached the file. The file is only created when
/// there is something to write.
pub fn flush(item: &mut Item, source: &dyn OutputSource, log_path: &Path) -> Result<FlushOutcome> {
    if !item.is_live() {
        return Ok(FlushOutcome::AfterFinalize);
    }
    let Some(bytes) = source.read_from(item.output_cursor()) else {
        return Ok(FlushOutcome::StreamGone);
    };
    if bytes.is_empty() {
        return Ok(FlushOutcome::NothingNew);
    }

    let mut file = open_log_appender(log_path)?;
    let mut written = 0usize;
    while written < bytes.len() {
        match file.write(&bytes[written..]) {
            Ok(0) => {
                item.advance_cursor(written as u64);
                return Err(io::Error::from(io::ErrorKind::WriteZero))
                    .with_context(|| format!("failed writing {}", log_path.display()));
            }
            Ok(count) => written += count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                item.advance_cursor(written as u64);
                return Err(err).with_context(|| format!("failed writing {}", log_path.display()));
            }
        }
    }
    item.advance_cursor(written as u64);

    Ok(FlushOutcome::Written(written as u64))
}

fn open_log_appender(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }

    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("failed opening {}", path.display()))
}

fn ensure_private_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

pub fn read_last_lines(path: &Path, max_lines: usize) -> Result<Vec<String>> {
    if max_lines == 0 || !path.exists() {
        return Ok(Vec::new());
    }

    let mut file =
        File::open(path).with_context(|| format!("failed opening {}", path.display()))?;
    let total_size = file
        .metadata()
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    if total_size == 0 {
        return Ok(Vec::new());
    }

    const CHUNK_SIZE: u64 = 16 * 1024;
    let mut offset = total_size;
    let mut newline_count = 0usize;
    let mut chunks: Vec<Vec<u8>> = Vec::new();

    while offset > 0 && newline_count <= max_lines {
        let read_len = CHUNK_SIZE.min(offset) as usize;
        offset -= read_len as u64;

        file.seek(SeekFrom::Start(offset))
            .with_context(|| format!("failed seeking {}", path.display()))?;
        let mut chunk = vec![0_u8; read_len];
        file.read_exact(&mut chunk)
            .with_context(|| format!("failed reading {}", path.display()))?;
        newline_count += chunk.iter().filter(|&&byte| byte == b'\n').count();
        chunks.push(chunk);
    }

    let bytes: Vec<u8> = chunks.into_iter().rev().flatten().collect();
    let text = String::from_utf8_lossy(&bytes);

    let mut ring = VecDeque::with_capacity(max_lines.saturating_add(1));
    for line in text.lines() {
        ring.push_back(line.to_string());
        if ring.len() > max_lines {
            ring.pop_front();
        }
    }

    Ok(ring.into_iter().collect())
}
