//! USB event task
//!
//! Dedicated thread that pumps the stack's event processing for as long as
//! the driver is running. Mount/unmount callbacks fire on this thread.
//!
//! Stop is cooperative: the lifecycle sends a stop request and waits, with a
//! bound, for the thread to acknowledge by exiting its loop.

use crate::hal::Port;
use crate::stack::UsbStack;
use async_channel::{Receiver, Sender, TryRecvError, bounded};
use common::Signal;
use std::cell::Cell;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Hosted threads need more room than an RTOS task of the same config
const MIN_HOSTED_STACK_SIZE: usize = 64 * 1024;

/// Scheduling parameters of the event task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// Stack size in bytes
    pub stack_size: usize,
    /// Scheduler priority (advisory on hosted targets)
    pub priority: u8,
    /// CPU core to pin to, `None` for no affinity (advisory on hosted targets)
    pub affinity: Option<usize>,
    /// Longest a single event-processing call may wait for an event
    pub poll_interval: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            stack_size: 4096,
            priority: 5,
            affinity: None,
            poll_interval: Duration::from_millis(10),
        }
    }
}

thread_local! {
    /// Driver whose event task runs on this thread
    static SERVING: Cell<Option<u64>> = const { Cell::new(None) };
}

/// Id of the driver the calling thread is the event task of, if any
pub(crate) fn serving_driver() -> Option<u64> {
    SERVING.with(Cell::get)
}

/// Raised when the task does not acknowledge a stop request in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopTimeout;

/// Handle to a running event task
pub(crate) struct EventTask {
    stop_tx: Sender<()>,
    exited: Arc<Signal>,
    handle: JoinHandle<()>,
}

// Acknowledges exit however the loop ends
struct ExitGuard(Arc<Signal>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.give();
    }
}

impl EventTask {
    /// Spawn the event task of driver `owner` for `port`
    pub(crate) fn spawn<S: UsbStack>(
        owner: u64,
        port: Port,
        config: &TaskConfig,
        stack: Arc<Mutex<S>>,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded(1);
        let exited = Arc::new(Signal::new());
        let guard = ExitGuard(Arc::clone(&exited));
        let poll_interval = config.poll_interval;

        debug!(
            "Spawning USB event task for {}: stack={} priority={} affinity={:?}",
            port, config.stack_size, config.priority, config.affinity
        );

        let handle = std::thread::Builder::new()
            .name(format!("usbd-task-{}", port.0))
            .stack_size(config.stack_size.max(MIN_HOSTED_STACK_SIZE))
            .spawn(move || {
                let _guard = guard;
                SERVING.with(|serving| serving.set(Some(owner)));
                run(port, stack, stop_rx, poll_interval);
            })?;

        Ok(Self {
            stop_tx,
            exited,
            handle,
        })
    }

    /// Ask the task to stop and wait up to `timeout` for it to exit
    ///
    /// On timeout the thread is left detached; whatever it holds stays held.
    pub(crate) fn stop(self, timeout: Duration) -> Result<(), StopTimeout> {
        // A full slot means a stop is already pending; closed means it exited
        let _ = self.stop_tx.try_send(());

        if !self.exited.take(timeout) {
            return Err(StopTimeout);
        }

        if self.handle.join().is_err() {
            warn!("USB event task exited by panic");
        }
        Ok(())
    }
}

/// Event loop body
///
/// Runs until a stop request arrives. Errors from a single iteration are
/// logged and the loop carries on; they never end the task.
fn run<S: UsbStack>(port: Port, stack: Arc<Mutex<S>>, stop_rx: Receiver<()>, poll: Duration) {
    info!("USB event task started on {}", port);
    let mut iterations: u64 = 0;
    let mut failures: u64 = 0;

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Closed) => {
                debug!("USB event task on {} received stop", port);
                break;
            }
            Err(TryRecvError::Empty) => {}
        }

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            stack
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .process_events(poll)
        }));
        iterations += 1;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                warn!("Error processing USB stack events on {}: {}", port, e);
                // Back off so a persistently failing stack does not spin
                std::thread::sleep(poll);
            }
            Err(e) => {
                failures += 1;
                error!("Panic in USB stack event processing on {}: {:?}", port, e);
                std::thread::sleep(poll);
            }
        }

        std::thread::yield_now();
    }

    info!(
        "USB event task stopped on {} ({} iterations, {} failed)",
        port, iterations, failures
    );
}
