/// Device change watcher — background listener for volume arrival/removal.
///
/// The watcher owns one background thread that opens a
/// [`VolumeEventSubscription`] and waits on it with a bounded timeout, so
/// the cancel flag is re-checked at least every `wait_timeout`. Each
/// notification becomes one [`DeviceChange`] sent to every subscriber.
///
/// # Usage
///
/// ```ignore
/// let mut watcher = DeviceChangeWatcher::new(system_volume_events());
/// let changes = watcher.subscribe();
/// watcher.start()?;
/// // changes.recv() → trigger a refresh
/// watcher.stop();
/// ```
///
/// # Cancellation
///
/// [`DeviceChangeWatcher::stop`] sets the cancel flag and blocks for at most
/// `stop_timeout` for the thread to exit. A thread stuck inside the OS wait
/// past that deadline is detached rather than joined.
use crate::error::DeviceError;
use crate::platform::{VolumeEventSource, WaitOutcome};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timing knobs of the watcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Upper bound of one OS wait; also the cancel-flag polling interval.
    pub wait_timeout: Duration,
    /// Pause after an unexpected wait failure before retrying.
    pub error_backoff: Duration,
    /// How long `stop()` blocks for the thread to exit.
    pub stop_timeout: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_millis(250),
            error_backoff: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(3),
        }
    }
}

/// A volume was added or removed somewhere on the system.
#[derive(Clone, Debug)]
pub struct DeviceChange {
    pub observed_at: chrono::DateTime<chrono::Local>,
}

type Subscribers = Arc<Mutex<Vec<Sender<DeviceChange>>>>;

struct Worker {
    cancel: Arc<AtomicBool>,
    /// Disconnects when the thread exits (its sender half is dropped).
    exited: Receiver<()>,
    thread: JoinHandle<()>,
}

/// Handle to the background volume-change listener.
pub struct DeviceChangeWatcher {
    source: Arc<dyn VolumeEventSource>,
    config: WatcherConfig,
    subscribers: Subscribers,
    worker: Option<Worker>,
}

impl DeviceChangeWatcher {
    pub fn new(source: Arc<dyn VolumeEventSource>) -> Self {
        Self::with_config(source, WatcherConfig::default())
    }

    pub fn with_config(source: Arc<dyn VolumeEventSource>, config: WatcherConfig) -> Self {
        Self {
            source,
            config,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            worker: None,
        }
    }

    /// Receive a [`DeviceChange`] for every notification from now on.
    pub fn subscribe(&self) -> Receiver<DeviceChange> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// `true` while the background thread is alive.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.thread.is_finished())
    }

    /// Start the background thread. No-op if already running.
    pub fn start(&mut self) -> Result<(), DeviceError> {
        if self.is_running() {
            return Ok(());
        }
        // Reap a thread that ended on its own (e.g. the subscription failed).
        if let Some(worker) = self.worker.take() {
            let _ = worker.thread.join();
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let (exit_guard, exited) = bounded::<()>(0);
        let source = Arc::clone(&self.source);
        let subscribers = Arc::clone(&self.subscribers);
        let config = self.config;
        let cancel_clone = Arc::clone(&cancel);

        let thread = std::thread::Builder::new()
            .name("usbsleuth-watcher".to_owned())
            .spawn(move || {
                let _exit_guard = exit_guard;
                run_watcher(source.as_ref(), &config, &cancel_clone, &subscribers);
            })
            .map_err(|e| DeviceError::Worker(format!("failed to spawn watcher thread: {e}")))?;

        info!("Watcher: started");
        self.worker = Some(Worker {
            cancel,
            exited,
            thread,
        });
        Ok(())
    }

    /// Request termination and wait up to `stop_timeout` for it. Idempotent.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.cancel.store(true, Ordering::Relaxed);

        match worker.exited.recv_timeout(self.config.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Watcher: thread did not exit within {:?}, detaching",
                    self.config.stop_timeout
                );
            }
            _ => {
                let _ = worker.thread.join();
                info!("Watcher: stopped");
            }
        }
    }
}

impl Drop for DeviceChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Background thread ──────────────────────────────────────────────────────

fn run_watcher(
    source: &dyn VolumeEventSource,
    config: &WatcherConfig,
    cancel: &AtomicBool,
    subscribers: &Subscribers,
) {
    let mut subscription = match source.open() {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("Watcher: cannot subscribe to volume events: {}", e);
            return;
        }
    };

    while !cancel.load(Ordering::Relaxed) {
        match subscription.wait(config.wait_timeout) {
            WaitOutcome::TimedOut => continue,
            WaitOutcome::Changed => {
                debug!("Watcher: volume change observed");
                broadcast(subscribers);
            }
            WaitOutcome::Failed(e) => {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                warn!("Watcher: wait failed, backing off: {}", e);
                std::thread::sleep(config.error_backoff);
            }
        }
    }
    debug!("Watcher: cancelled");
}

fn broadcast(subscribers: &Subscribers) {
    let change = DeviceChange {
        observed_at: chrono::Local::now(),
    };
    subscribers
        .lock()
        .retain(|tx| tx.send(change.clone()).is_ok());
}
