/// The main-area state manager — single logical writer of device state.
///
/// Owned by the presentation thread. `refresh()` and
/// `eject_storage_device()` return immediately: they update the busy state
/// synchronously and hand the blocking directory work to a worker thread.
/// Results are committed by [`MainAreaStateManager::process_messages`],
/// which the front end calls once per frame or tick, so commits and
/// publications are totally ordered on the owning thread.
///
/// # Request policy
///
/// - Refresh while a refresh is in flight is coalesced into it (and, with
///   [`ManagerConfig::rescan_after_coalesced`], one follow-up scan runs).
/// - Refresh while an eject is in flight is deferred until the eject commits.
/// - Eject while scanning is ignored; eject while another eject is in flight
///   is dropped.
use crate::snapshot::{MainAreaState, Operation, SnapshotCause};
use crate::worker::{spawn_eject, spawn_refresh, RefreshOutput, WorkerOutcome};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use usbsleuth_core::device::{BaseDeviceDirectory, StorageDeviceDirectory};
use usbsleuth_core::model::{DeviceEjectResult, DeviceId};
use usbsleuth_core::DeviceError;

/// Maximum worker results committed per `process_messages()` call.
const MAX_OUTCOMES_PER_TICK: usize = 16;

/// Behavioural switches of the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Run one extra scan after an in-flight refresh that absorbed at least
    /// one further `refresh()` request.
    pub rescan_after_coalesced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum InFlight {
    Refresh,
    Eject(DeviceId),
}

pub struct MainAreaStateManager {
    base: Arc<dyn BaseDeviceDirectory>,
    storage: Arc<dyn StorageDeviceDirectory>,
    config: ManagerConfig,

    state: Arc<MainAreaState>,
    subscribers: Vec<Sender<Arc<MainAreaState>>>,

    outcome_tx: Sender<WorkerOutcome>,
    outcome_rx: Receiver<WorkerOutcome>,
    in_flight: Option<InFlight>,
    refresh_queued: bool,
}

impl MainAreaStateManager {
    pub fn new(
        base: Arc<dyn BaseDeviceDirectory>,
        storage: Arc<dyn StorageDeviceDirectory>,
    ) -> Self {
        Self::with_config(base, storage, ManagerConfig::default())
    }

    pub fn with_config(
        base: Arc<dyn BaseDeviceDirectory>,
        storage: Arc<dyn StorageDeviceDirectory>,
        config: ManagerConfig,
    ) -> Self {
        let (outcome_tx, outcome_rx) = unbounded();
        Self {
            base,
            storage,
            config,
            state: Arc::new(MainAreaState::default()),
            subscribers: Vec::new(),
            outcome_tx,
            outcome_rx,
            in_flight: None,
            refresh_queued: false,
        }
    }

    /// The latest published snapshot.
    pub fn state(&self) -> Arc<MainAreaState> {
        Arc::clone(&self.state)
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&mut self) -> Receiver<Arc<MainAreaState>> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// `true` while a refresh or eject is dispatched and not yet committed.
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    // ── Requests ───────────────────────────────────────────────────

    /// Rescan both directories.
    pub fn refresh(&mut self) {
        match &self.in_flight {
            Some(InFlight::Refresh) => {
                debug!("Refresh requested while scanning, coalescing");
                if self.config.rescan_after_coalesced {
                    self.refresh_queued = true;
                }
            }
            Some(InFlight::Eject(id)) => {
                debug!("Refresh deferred until eject of {} completes", id);
                self.refresh_queued = true;
            }
            None => self.start_refresh(),
        }
    }

    /// Ask the OS to eject `id`. Ignored while scanning.
    pub fn eject_storage_device(&mut self, id: &DeviceId) {
        if self.state.is_scanning {
            debug!("Eject of {} ignored while scanning", id);
            return;
        }
        if let Some(InFlight::Eject(current)) = &self.in_flight {
            warn!("Eject of {} dropped, eject of {} in flight", id, current);
            return;
        }

        info!("Ejecting {}", id);
        self.in_flight = Some(InFlight::Eject(id.clone()));
        let spawned = spawn_eject(
            Arc::clone(&self.storage),
            id.clone(),
            self.outcome_tx.clone(),
        );
        if let Err(e) = spawned {
            self.commit(WorkerOutcome::Eject {
                id: id.clone(),
                result: Err(e),
            });
        }
    }

    // ── Commit ─────────────────────────────────────────────────────

    /// Commit finished worker results. Called once per frame / tick.
    ///
    /// Returns `true` if at least one snapshot was published.
    pub fn process_messages(&mut self) -> bool {
        let before = self.state.generation;
        for _ in 0..MAX_OUTCOMES_PER_TICK {
            match self.outcome_rx.try_recv() {
                Ok(outcome) => self.commit(outcome),
                Err(_) => break,
            }
        }
        self.state.generation != before
    }

    /// Pump until nothing is in flight or `timeout` elapses.
    ///
    /// Returns `true` if the manager went idle in time.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.outcome_rx.recv_timeout(remaining) {
                Ok(outcome) => self.commit(outcome),
                Err(RecvTimeoutError::Timeout) => return false,
                // The manager holds a sender, so this cannot happen.
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
        true
    }

    fn commit(&mut self, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::Refresh(result) => self.commit_refresh(result),
            WorkerOutcome::Eject { id, result } => self.commit_eject(&id, result),
        }
    }

    fn start_refresh(&mut self) {
        self.in_flight = Some(InFlight::Refresh);
        let mut next = self.next_state(SnapshotCause::ScanStarted);
        next.is_scanning = true;
        self.publish(next);

        let spawned = spawn_refresh(
            Arc::clone(&self.base),
            Arc::clone(&self.storage),
            self.outcome_tx.clone(),
        );
        if let Err(e) = spawned {
            self.commit(WorkerOutcome::Refresh(Err(e)));
        }
    }

    fn commit_refresh(&mut self, result: Result<RefreshOutput, DeviceError>) {
        self.in_flight = None;
        let mut next = self.next_state(SnapshotCause::RefreshCompleted);
        next.is_scanning = false;
        next.last_operation = Some(Operation::Refresh);

        match result {
            Ok(output) => {
                info!(
                    "Refresh complete: {} devices, {} storage",
                    output.devices.len(),
                    output.storages.len()
                );
                next.device_count = output.devices.len();
                next.devices = output.devices;
                next.storages = output.storages;
                next.last_operation_error = None;
                next.refresh_error = None;
                next.completed_at = Some(chrono::Local::now());
            }
            Err(e) => {
                warn!("Refresh failed, keeping previous devices: {}", e);
                next.last_operation_error = Some(e.clone());
                next.refresh_error = Some(e);
            }
        }
        self.publish(next);

        if std::mem::take(&mut self.refresh_queued) {
            debug!("Running queued refresh");
            self.start_refresh();
        }
    }

    fn commit_eject(&mut self, id: &DeviceId, result: Result<DeviceEjectResult, DeviceError>) {
        self.in_flight = None;

        match result {
            Ok(outcome) => {
                let mut next = self.next_state(SnapshotCause::EjectCompleted);
                if outcome.success {
                    info!("Eject of {} succeeded", id);
                } else {
                    warn!(
                        "Eject of {} refused by the OS (code {})",
                        id, outcome.config_ret
                    );
                }
                let accepted = outcome.success;
                next.last_operation = Some(Operation::Eject);
                next.last_operation_error = None;
                next.last_eject_result = Some(outcome);
                self.publish(next);

                if accepted {
                    // The automatic rescan also covers any deferred request.
                    self.refresh_queued = false;
                    self.start_refresh();
                    return;
                }
            }
            Err(e) => {
                warn!("Eject of {} failed: {}", id, e);
                let mut next = self.next_state(SnapshotCause::EjectFailed);
                next.last_operation = Some(Operation::Eject);
                next.last_operation_error = Some(e);
                next.last_eject_result = None;
                self.publish(next);
            }
        }

        if std::mem::take(&mut self.refresh_queued) {
            self.start_refresh();
        }
    }

    // ── Publication ────────────────────────────────────────────────

    fn next_state(&self, cause: SnapshotCause) -> MainAreaState {
        let mut next = (*self.state).clone();
        next.generation = self.state.generation + 1;
        next.cause = cause;
        next
    }

    fn publish(&mut self, next: MainAreaState) {
        let snapshot = Arc::new(next);
        self.state = Arc::clone(&snapshot);
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
    }
}

impl std::fmt::Debug for MainAreaStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainAreaStateManager")
            .field("generation", &self.state.generation)
            .field("in_flight", &self.in_flight)
            .field("refresh_queued", &self.refresh_queued)
            .finish()
    }
}
