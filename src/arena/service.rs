// =============================================================================
// Arena Service — background driver calling `Arena::tick` on an interval
// =============================================================================
//
// One tokio task owns the loop. Each tick runs on the blocking pool (it does
// file and SQLite I/O under the arena lock) and always runs to completion.
// Between ticks the task waits on `sleep(interval)` raced against a watch
// channel, so `stop()` interrupts the wait immediately. The ranking is
// regenerated once more on the way out.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::Arena;
use crate::error::ArenaError;

/// Shortest allowed spacing between ticks.
pub const MIN_INTERVAL_SECS: u64 = 30;

/// Upper bound on how long `stop()` waits for the worker.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Worker {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct ArenaService {
    arena: Arc<Arena>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl ArenaService {
    pub fn new(arena: Arc<Arena>, interval_seconds: u64) -> Self {
        Self {
            arena,
            interval: Duration::from_secs(interval_seconds.max(MIN_INTERVAL_SECS)),
            worker: Mutex::new(None),
        }
    }

    pub fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawn the loop on the current tokio runtime.
    ///
    /// Returns `AlreadyRunning` without spawning if a worker is alive.
    pub fn start_background(&self) -> Result<(), ArenaError> {
        let mut slot = self.worker.lock();
        if slot.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return Err(ArenaError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_forever(self.arena.clone(), self.interval, stop_rx));
        *slot = Some(Worker { stop_tx, handle });

        info!(interval_secs = self.interval.as_secs(), "arena service started");
        Ok(())
    }

    /// Signal the worker and wait up to `STOP_TIMEOUT` for it to finish.
    /// Returns `false` if the worker had to be abandoned.
    pub async fn stop(&self) -> bool {
        let taken = self.worker.lock().take();
        let Some(worker) = taken else {
            return true;
        };

        let _ = worker.stop_tx.send(true);
        match tokio::time::timeout(STOP_TIMEOUT, worker.handle).await {
            Ok(Ok(())) => {
                info!("arena service stopped");
                true
            }
            Ok(Err(e)) => {
                error!(error = %e, "arena service worker panicked");
                true
            }
            Err(_) => {
                warn!(timeout_secs = STOP_TIMEOUT.as_secs(), "arena service did not stop in time");
                false
            }
        }
    }
}

/// Tick until `stop_rx` flips to true, then regenerate the ranking once.
pub async fn run_forever(arena: Arc<Arena>, interval: Duration, mut stop_rx: watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let tick_arena = arena.clone();
        match tokio::task::spawn_blocking(move || tick_arena.tick()).await {
            Ok(Ok(_report)) => {}
            Ok(Err(e)) => error!(error = %e, "arena tick failed, retrying next interval"),
            Err(e) => error!(error = %e, "arena tick panicked, retrying next interval"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop_rx.changed() => {
                // A dropped sender also ends the loop.
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    let final_arena = arena.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || final_arena.flush_ranking()).await {
        error!(error = %e, "final ranking task panicked");
    }
}
