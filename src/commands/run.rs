use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::errors::TrackerError;
use crate::host::{self, LiveBuffer};
use crate::item::{Handler, ItemId, Provenance};
use crate::logging::OutputSource;
use crate::tracker::{RegistryEvent, Tracker};
use crate::view;

use super::common::{load_tracker, save_tracker, with_locked_history};

/// How long a torn-down item may take to report its exit before it is closed
/// without a status.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Spawns `command`, supervises it until it exits and returns its status.
pub(crate) async fn run(
    config: &AppConfig,
    command: String,
    handler: Handler,
    cwd: Option<PathBuf>,
) -> Result<i32> {
    let directory = match cwd {
        Some(dir) => dir,
        None => env::current_dir().context("failed to resolve working directory")?,
    };

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut tracker = load_tracker(config)?.with_events(events_tx);
    let mut signals = TeardownSignals::install()?;

    let (notice, buffer) = host::spawn(&command, &directory, Provenance::from(handler))?;
    let handle = notice.handle;
    let id = with_locked_history(config, &mut tracker, |tracker| {
        tracker.on_spawn(notice, Utc::now()).item()
    })?;

    let mut poll = tokio::time::interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stdout = io::stdout();
    let mut echoed = 0_u64;
    let mut teardown_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = poll.tick() => {
                echoed += echo_live_output(&tracker, id, echoed, &mut stdout)?;
                tokio::task::block_in_place(|| tracker.poll(Instant::now(), Utc::now()));
                if teardown_deadline.is_some_and(|deadline| Instant::now() >= deadline)
                    && tracker.get(id)?.is_live()
                {
                    warn!("item {id} did not exit after teardown; closing it without a status");
                    tracker.release(id);
                    tracker.kill(id, Utc::now())?;
                }
            }
            Some(event) = events_rx.recv() => {
                if let RegistryEvent::Finalized(finished) = event {
                    save_tracker(config, &mut tracker)?;
                    if finished == id {
                        debug_assert!(tracker.is_idle());
                        break;
                    }
                }
            }
            ctrl = tokio::signal::ctrl_c() => {
                if let Err(err) = ctrl {
                    warn!("failed to wait for CTRL-C signal: {err}");
                }
                match tracker.kill(id, Utc::now()) {
                    Ok(outcome) => info!("interrupt forwarded to item {id}: {outcome:?}"),
                    Err(err) => warn!("failed to stop item {id}: {err}"),
                }
            }
            signal = signals.recv(), if teardown_deadline.is_none() => {
                warn!("received {signal}; tearing down item {id}");
                tracker.on_teardown(handle);
                buffer.tear_down();
                if let Err(err) = tracker.kill(id, Utc::now()) {
                    warn!("failed to stop item {id}: {err}");
                }
                teardown_deadline = Some(Instant::now() + TEARDOWN_GRACE);
            }
        }
    }

    echo_rest(&buffer, echoed, &mut stdout)?;
    tracker.on_teardown(handle);
    buffer.tear_down();

    let item = tracker.get(id)?;
    // The terminal may already be gone after SIGHUP.
    let _ = writeln!(
        io::stderr(),
        "[cmdtrack] {} exited {} after {}",
        item.target_label(),
        view::exit_label(item),
        view::duration_label(item, Utc::now())
    );
    Ok(item.exit_status().unwrap_or(1))
}

/// Echoes what the tracked stream produced past `from`. A stream the tracker
/// no longer holds has nothing left to echo.
fn echo_live_output(tracker: &Tracker, id: ItemId, from: u64, out: &mut impl Write) -> Result<u64> {
    match tracker.live_output(id, from) {
        Ok(bytes) => write_echo(&bytes, out),
        Err(TrackerError::NoBufferForItem(_)) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

/// Output that arrived between the last echo and the terminal tick.
fn echo_rest(buffer: &LiveBuffer, from: u64, out: &mut impl Write) -> Result<u64> {
    match buffer.read_from(from) {
        Some(bytes) => write_echo(&bytes, out),
        None => Ok(0),
    }
}

fn write_echo(bytes: &[u8], out: &mut impl Write) -> Result<u64> {
    if bytes.is_empty() {
        return Ok(0);
    }
    out.write_all(bytes).context("failed to echo command output")?;
    out.flush().context("failed to echo command output")?;
    Ok(bytes.len() as u64)
}

/// SIGTERM and SIGHUP to the supervisor itself, e.g. a closed terminal.
#[cfg(unix)]
struct TeardownSignals {
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TeardownSignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())
                .context("failed to install SIGTERM handler")?,
            hangup: signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.hangup.recv() => "SIGHUP",
        }
    }
}

#[cfg(not(unix))]
struct TeardownSignals;

#[cfg(not(unix))]
impl TeardownSignals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        std::future::pending().await
    }
}
