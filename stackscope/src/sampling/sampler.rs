//! Background sampler loop
//!
//! [`Sampler::start`] moves a [`SamplingSession`] and a [`StackSource`] onto a
//! dedicated thread that captures at a fixed rate. [`Sampler::stop`] signals
//! the loop, joins the thread and finalizes the forest. The forest never
//! leaves the sampler thread while nodes may still be open: it comes back
//! through the join handle only after the loop has ended.
//!
//! ## Loop
//!
//! ```text
//! ┌──────────── select ─────────────┐
//! │ stop channel  → exit             │
//! │ tick(interval) → capture()       │
//! │   Ok(snapshot)  → record         │
//! │   Interrupted   → abandon tick   │
//! │   Exhausted     → exit           │
//! └──────────────────────────────────┘
//! ```

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::calltree::Forest;
use crate::domain::{CaptureError, SamplerError};

use super::session::{SamplerStats, SamplingSession};
use super::StackSource;

/// Default capture interval (1 kHz).
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1);

/// Explicit configuration for a [`Sampler`].
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between two captures.
    pub interval: Duration,
    /// Name of the background thread.
    pub thread_name: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            thread_name: "stackscope-sampler".to_string(),
        }
    }
}

/// Finished output of a sampling session.
#[derive(Debug, Clone)]
pub struct SamplingResult {
    pub forest: Forest,
    pub stats: SamplerStats,
}

/// Handle to a running sampler thread.
pub struct Sampler {
    stop_tx: Sender<()>,
    finished: Arc<AtomicBool>,
    handle: JoinHandle<SamplingSession>,
}

impl Sampler {
    /// Start sampling `source` on a background thread.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned
    pub fn start<S>(mut source: S, config: SamplerConfig) -> Result<Self, SamplerError>
    where
        S: StackSource + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let finished = Arc::new(AtomicBool::new(false));
        let worker_finished = Arc::clone(&finished);
        let interval = config.interval;

        let session = SamplingSession::new(source.now());
        info!("Sampler starting (interval: {interval:?})");

        let handle = thread::Builder::new()
            .name(config.thread_name)
            .spawn(move || {
                let session = run_loop(&mut source, session, interval, &stop_rx);
                worker_finished.store(true, Ordering::Release);
                session
            })
            .map_err(SamplerError::Spawn)?;

        Ok(Self {
            stop_tx,
            finished,
            handle,
        })
    }

    /// Whether the loop has already ended on its own (finite source exhausted).
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Stop the loop and close every node still open.
    ///
    /// # Errors
    /// Returns an error if the sampler thread panicked
    pub fn stop(self) -> Result<SamplingResult, SamplerError> {
        // The receiver is gone if the loop already ended; nothing to signal then
        let _ = self.stop_tx.try_send(());

        let session = self
            .handle
            .join()
            .map_err(|_| SamplerError::WorkerPanicked)?;
        let (forest, stats) = session.finish();

        info!(
            "Sampler stopped: {} ticks ({} abandoned), {} threads, {} nodes",
            stats.ticks,
            stats.ticks_abandoned,
            forest.len(),
            forest.node_count()
        );

        Ok(SamplingResult { forest, stats })
    }
}

fn run_loop<S: StackSource>(
    source: &mut S,
    mut session: SamplingSession,
    interval: Duration,
    stop_rx: &Receiver<()>,
) -> SamplingSession {
    let ticker = tick(interval);

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {}
        }

        match source.capture() {
            Ok(snapshot) => session.record(&snapshot),
            Err(CaptureError::Interrupted(reason)) => {
                warn!("Stack capture interrupted, skipping tick: {reason}");
                session.abandon_tick();
            }
            Err(CaptureError::Exhausted) => {
                debug!("Stack source exhausted after {} ticks", session.stats().ticks);
                break;
            }
        }
    }

    session
}
