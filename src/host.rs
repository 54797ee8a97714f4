//! Host side of the tracker: spawns a command, keeps its combined output in
//! memory and answers status queries for the poll scheduler.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::warn;

use crate::item::{ProcessHandle, ProcessState, Provenance};
use crate::logging::OutputSource;
use crate::scheduler::ProcessProbe;
use crate::tracker::SpawnNotice;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// How long an exited child may keep its pipes open (through background
/// grandchildren) before it is reported as finished anyway.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Combined stdout/stderr of a child, readable from any offset until the host
/// tears it down.
#[derive(Default)]
pub struct LiveBuffer {
    data: Mutex<Vec<u8>>,
    open_streams: AtomicUsize,
    torn_down: AtomicBool,
}

impl LiveBuffer {
    fn append(&self, bytes: &[u8]) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
    }

    fn open_stream(&self) {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
    }

    fn close_stream(&self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }

    /// True once every pipe feeding the buffer has hit end of file.
    pub fn is_drained(&self) -> bool {
        self.open_streams.load(Ordering::SeqCst) == 0
    }

    pub fn tear_down(&self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }
}

impl OutputSource for LiveBuffer {
    fn read_from(&self, offset: u64) -> Option<Vec<u8>> {
        if self.torn_down.load(Ordering::SeqCst) {
            return None;
        }
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        Some(data[start..].to_vec())
    }
}

pub struct ChildProcess {
    child: Mutex<Child>,
    buffer: Arc<LiveBuffer>,
    exited_at: Mutex<Option<Instant>>,
}

impl ChildProcess {
    fn output_settled(&self) -> bool {
        if self.buffer.is_drained() {
            return true;
        }
        let mut exited_at = self.exited_at.lock().unwrap_or_else(PoisonError::into_inner);
        exited_at.get_or_insert_with(Instant::now).elapsed() >= DRAIN_GRACE
    }
}

impl ProcessProbe for ChildProcess {
    fn state(&self) -> ProcessState {
        let mut child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match child.try_wait() {
            Ok(Some(status)) if self.output_settled() => exit_state(status),
            Ok(_) => ProcessState::Running,
            Err(err) => {
                warn!("failed to query child status: {err}");
                ProcessState::Vanished
            }
        }
    }

    /// SIGTERM on unix, matching `cmdtrack kill` from another terminal. Other
    /// platforms only have a hard kill.
    fn terminate(&self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let child = self.child.lock().unwrap_or_else(PoisonError::into_inner);
            // Already reaped.
            let Some(pid) = child.id() else {
                return Ok(());
            };
            let pid = i32::try_from(pid).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
            kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
        }

        #[cfg(not(unix))]
        {
            self.child
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .start_kill()
        }
    }
}

fn exit_state(status: ExitStatus) -> ProcessState {
    if let Some(code) = status.code() {
        return ProcessState::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return ProcessState::Signaled(signal);
        }
    }
    ProcessState::Vanished
}

/// Starts `command` through the platform shell and returns the notification
/// the tracker expects, plus the buffer so the caller can echo output.
pub fn spawn(
    command: &str,
    directory: &Path,
    provenance: Provenance,
) -> Result<(SpawnNotice, Arc<LiveBuffer>)> {
    let mut child = shell_command(command)
        .current_dir(directory)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn `{command}` in {}", directory.display()))?;

    let buffer = Arc::new(LiveBuffer::default());
    if let Some(stdout) = child.stdout.take() {
        pump(stdout, Arc::clone(&buffer));
    }
    if let Some(stderr) = child.stderr.take() {
        pump(stderr, Arc::clone(&buffer));
    }

    let pid = child.id();
    let process = Arc::new(ChildProcess {
        child: Mutex::new(child),
        buffer: Arc::clone(&buffer),
        exited_at: Mutex::new(None),
    });
    let notice = SpawnNotice {
        name: command.to_string(),
        directory: directory.display().to_string(),
        handle: ProcessHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)),
        pid,
        provenance,
        output: Some(buffer.clone()),
        process,
    };
    Ok((notice, buffer))
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut shell = Command::new("cmd");
        shell.arg("/C").arg(command);
        shell
    }

    #[cfg(not(windows))]
    {
        let mut shell = Command::new("sh");
        shell.arg("-c").arg(command);
        shell
    }
}

fn pump<R>(mut reader: R, buffer: Arc<LiveBuffer>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    buffer.open_stream();
    tokio::spawn(async move {
        let mut chunk = [0_u8; 8 * 1024];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(count) => buffer.append(&chunk[..count]),
                Err(err) => {
                    warn!("failed reading child output: {err}");
                    break;
                }
            }
        }
        buffer.close_stream();
    });
}
