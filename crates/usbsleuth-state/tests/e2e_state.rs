/// End-to-end tests for the main-area and overview state managers.
///
/// The managers are driven exactly as a front end would: requests are issued
/// on the test thread, worker results are committed by pumping
/// `process_messages()` / `wait_idle()` against a deadline, and published
/// snapshots are observed through `subscribe()`.
///
/// A single fake implements both directory traits so individual calls can be
/// made to fail, and refresh/eject can be held open to observe the busy state.
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use usbsleuth_core::device::{BaseDeviceDirectory, StorageDeviceDirectory};
use usbsleuth_core::model::{
    BaseDeviceInfo, DeviceEjectResult, DeviceEntry, DeviceId, StorageDeviceInfo, VolumeInfo,
};
use usbsleuth_core::DeviceError;
use usbsleuth_state::{
    MainAreaState, MainAreaStateManager, ManagerConfig, Operation, OverviewRequest,
    OverviewStateManager, SnapshotCause,
};

// ── Fake directories ─────────────────────────────────────────────────────────

const A: &str = r"USB\VID_046D&PID_C31C\6&1C8F0B3A&0&2";
const B: &str = r"USBSTOR\DISK&VEN_GENERIC&PROD_FLASH&REV_1.00\000000000819&0";
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct FakeInner {
    base: Vec<BaseDeviceInfo>,
    storage: Vec<StorageDeviceInfo>,
    raise_on_refresh: Option<DeviceError>,
    raise_on_storage_refresh: Option<DeviceError>,
    raise_on_get_info: HashSet<String>,
    eject_result: Option<Result<DeviceEjectResult, DeviceError>>,
    eject_calls: Vec<String>,
    refresh_calls: usize,
}

struct FakeDirectory {
    inner: Mutex<FakeInner>,
    held: AtomicBool,
    release_tx: Sender<()>,
    release_rx: Receiver<()>,
}

impl FakeDirectory {
    fn new() -> Self {
        let (release_tx, release_rx) = unbounded();
        Self {
            inner: Mutex::new(FakeInner::default()),
            held: AtomicBool::new(false),
            release_tx,
            release_rx,
        }
    }

    /// Base device A (non-storage) and storage device B with one volume.
    fn with_a_and_b() -> Arc<Self> {
        let fake = Self::new();
        {
            let mut inner = fake.inner.lock().unwrap();
            inner.base.push(base_info(A));
            inner.base.push(base_info(B));
            inner.storage.push(StorageDeviceInfo::new(
                base_info(B),
                vec![volume("G:", 1_073_741_824, 536_870_912)],
            ));
        }
        Arc::new(fake)
    }

    /// Block the next refresh/eject until [`FakeDirectory::release`].
    fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        let _ = self.release_tx.send(());
    }

    fn wait_if_held(&self) {
        if self.held.load(Ordering::SeqCst) {
            let _ = self.release_rx.recv_timeout(TIMEOUT);
        }
    }

    fn set_raise_on_refresh(&self, error: Option<DeviceError>) {
        self.inner.lock().unwrap().raise_on_refresh = error;
    }

    fn set_raise_on_storage_refresh(&self, error: Option<DeviceError>) {
        self.inner.lock().unwrap().raise_on_storage_refresh = error;
    }

    fn raise_on_get_info(&self, id: &str) {
        self.inner
            .lock()
            .unwrap()
            .raise_on_get_info
            .insert(id.to_string());
    }

    fn set_eject_result(&self, result: Result<DeviceEjectResult, DeviceError>) {
        self.inner.lock().unwrap().eject_result = Some(result);
    }

    fn refresh_calls(&self) -> usize {
        self.inner.lock().unwrap().refresh_calls
    }

    fn eject_calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().eject_calls.clone()
    }
}

impl BaseDeviceDirectory for FakeDirectory {
    fn refresh(&self) -> Result<(), DeviceError> {
        self.wait_if_held();
        let mut inner = self.inner.lock().unwrap();
        inner.refresh_calls += 1;
        match &inner.raise_on_refresh {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn list_base_device_ids(&self) -> Vec<DeviceId> {
        let inner = self.inner.lock().unwrap();
        inner.base.iter().map(|b| b.id.clone()).collect()
    }

    fn get_base_device_info(&self, id: &DeviceId) -> Result<BaseDeviceInfo, DeviceError> {
        let inner = self.inner.lock().unwrap();
        inner
            .base
            .iter()
            .find(|b| &b.id == id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))
    }
}

impl StorageDeviceDirectory for FakeDirectory {
    fn refresh(&self) -> Result<(), DeviceError> {
        match &self.inner.lock().unwrap().raise_on_storage_refresh {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn list_storage_device_ids(&self) -> Vec<DeviceId> {
        let inner = self.inner.lock().unwrap();
        inner.storage.iter().map(|s| s.id().clone()).collect()
    }

    fn get_storage_device_info(&self, id: &DeviceId) -> Result<StorageDeviceInfo, DeviceError> {
        let inner = self.inner.lock().unwrap();
        if inner.raise_on_get_info.contains(id.instance_id()) {
            return Err(DeviceError::query("Win32_DiskDrive", "detail unavailable"));
        }
        inner
            .storage
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))
    }

    fn eject_storage_device(&self, id: &DeviceId) -> Result<DeviceEjectResult, DeviceError> {
        self.wait_if_held();
        let mut inner = self.inner.lock().unwrap();
        inner.eject_calls.push(id.to_string());
        let result = inner.eject_result.clone().unwrap_or_else(|| {
            Ok(DeviceEjectResult {
                success: true,
                attempted_instance_id: id.to_string(),
                config_ret: 0,
            })
        });
        if matches!(&result, Ok(r) if r.success) {
            inner.base.retain(|b| &b.id != id);
            inner.storage.retain(|s| s.id() != id);
        }
        result
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn base_info(id: &str) -> BaseDeviceInfo {
    let mut info = BaseDeviceInfo::bare(DeviceId::new(id));
    info.product = Some(format!("Device {}", &id[..6]));
    info
}

fn volume(letter: &str, total: u64, free: u64) -> VolumeInfo {
    VolumeInfo {
        drive_letter: Some(letter.into()),
        mount_path: Some(usbsleuth_core::model::mount_path_for(letter)),
        file_system: Some("FAT32".into()),
        volume_label: None,
        total_bytes: Some(total),
        free_bytes: Some(free),
    }
}

fn manager(fake: &Arc<FakeDirectory>) -> MainAreaStateManager {
    MainAreaStateManager::new(fake.clone(), fake.clone())
}

fn overview(fake: &Arc<FakeDirectory>) -> OverviewStateManager {
    OverviewStateManager::new(fake.clone(), fake.clone())
}

fn drain<T>(rx: &Receiver<T>) -> Vec<T> {
    rx.try_iter().collect()
}

/// Pump `process_messages()` until `done` holds or the deadline expires.
fn pump_until(manager: &mut MainAreaStateManager, done: impl Fn(&MainAreaState) -> bool) {
    let deadline = std::time::Instant::now() + TIMEOUT;
    while !done(&manager.state()) {
        assert!(
            std::time::Instant::now() < deadline,
            "condition not reached within {TIMEOUT:?}"
        );
        manager.process_messages();
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn assert_consistent(state: &MainAreaState) {
    assert_eq!(state.device_count, state.devices.len());
    for id in &state.storages {
        assert!(
            state.find(id).is_some_and(DeviceEntry::is_storage),
            "{id} listed as storage without a storage entry"
        );
    }
}

// ── Refresh lifecycle ────────────────────────────────────────────────────────

/// `refresh()` flips to scanning synchronously and publishes that transition.
#[test]
fn refresh_sets_scanning_immediately() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    let rx = mgr.subscribe();

    mgr.refresh();

    let state = mgr.state();
    assert!(state.is_scanning);
    assert_eq!(state.cause, SnapshotCause::ScanStarted);
    assert_eq!(drain(&rx).len(), 1);
    assert!(mgr.wait_idle(TIMEOUT));
}

/// Scanning is observed as true before the final false snapshot.
#[test]
fn refresh_transitions_true_then_false() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    let rx = mgr.subscribe();

    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    let flags: Vec<bool> = drain(&rx).iter().map(|s| s.is_scanning).collect();
    assert_eq!(flags, [true, false]);
    let state = mgr.state();
    assert_eq!(state.cause, SnapshotCause::RefreshCompleted);
    assert_eq!(state.last_operation, Some(Operation::Refresh));
    assert!(state.completed_at.is_some());
}

/// The A (base) + B (storage, 1 GiB / 512 MiB) example.
#[test]
fn refresh_aggregates_base_and_storage() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);

    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    let state = mgr.state();
    assert_consistent(&state);
    assert_eq!(state.device_count, 2);
    assert!(matches!(&state.devices[0], DeviceEntry::Base(b) if b.id.instance_id() == A));
    let storage = state.devices[1].as_storage().expect("B is storage");
    assert_eq!(storage.volumes.len(), 1);
    assert_eq!(storage.volumes[0].total_bytes, Some(1_073_741_824));
    assert_eq!(storage.volumes[0].free_bytes, Some(536_870_912));
    assert_eq!(
        state.storages.iter().map(DeviceId::instance_id).collect::<Vec<_>>(),
        [B]
    );
    assert_eq!(state.last_operation_error, None);
}

/// A storage device whose detail fails degrades to base without an error.
#[test]
fn storage_detail_failure_degrades_to_base() {
    let fake = FakeDirectory::with_a_and_b();
    fake.raise_on_get_info(B);
    let mut mgr = manager(&fake);

    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    let state = mgr.state();
    assert_consistent(&state);
    assert_eq!(state.device_count, 2);
    let b = state.find(&DeviceId::new(B)).expect("B is never dropped");
    assert!(!b.is_storage());
    assert!(state.storages.is_empty());
    assert_eq!(state.refresh_error, None);
    assert_eq!(state.last_operation_error, None);
}

/// A directory refresh failure keeps the last known-good listing.
#[test]
fn refresh_error_keeps_previous_devices() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));
    let good = mgr.state();

    let error = DeviceError::query("Win32_PnPEntity", "RPC server unavailable");
    fake.set_raise_on_refresh(Some(error.clone()));
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    let state = mgr.state();
    assert!(!state.is_scanning);
    assert_eq!(state.devices, good.devices);
    assert_eq!(state.storages, good.storages);
    assert_eq!(state.device_count, 2);
    assert_eq!(state.refresh_error, Some(error.clone()));
    assert_eq!(state.last_operation_error, Some(error));
    assert_eq!(state.last_operation, Some(Operation::Refresh));
    assert_eq!(state.completed_at, good.completed_at);

    // The next good refresh clears both error fields.
    fake.set_raise_on_refresh(None);
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));
    assert_eq!(mgr.state().refresh_error, None);
    assert_eq!(mgr.state().last_operation_error, None);
}

/// A storage-directory failure after a good base refresh is reported the
/// same way and leaves the published lists untouched.
#[test]
fn storage_refresh_error_keeps_previous_devices() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));
    let good = mgr.state();

    let error = DeviceError::query("Win32_DiskDrive", "access denied");
    fake.set_raise_on_storage_refresh(Some(error.clone()));
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    let state = mgr.state();
    assert_eq!(fake.refresh_calls(), 2);
    assert!(!state.is_scanning);
    assert_eq!(state.devices, good.devices);
    assert_eq!(state.storages, good.storages);
    assert_eq!(state.device_count, 2);
    assert_eq!(state.refresh_error, Some(error.clone()));
    assert_eq!(state.last_operation_error, Some(error));
    assert_eq!(state.last_operation, Some(Operation::Refresh));

    fake.set_raise_on_storage_refresh(None);
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));
    assert_eq!(mgr.state().refresh_error, None);
}

/// Generations advance by one per publication.
#[test]
fn generations_are_monotonic() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    let rx = mgr.subscribe();

    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    let generations: Vec<u64> = drain(&rx).iter().map(|s| s.generation).collect();
    assert_eq!(generations, [1, 2, 3, 4]);
}

/// `process_messages()` driven like a frame loop commits the refresh.
#[test]
fn process_messages_commits_refresh() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);

    mgr.refresh();
    pump_until(&mut mgr, |s| !s.is_scanning);
    assert_eq!(mgr.state().device_count, 2);
    assert!(!mgr.is_busy());
}

// ── Coalescing ───────────────────────────────────────────────────────────────

/// Overlapping refreshes coalesce into the in-flight scan.
#[test]
fn overlapping_refresh_is_coalesced() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    let rx = mgr.subscribe();

    fake.hold();
    mgr.refresh();
    mgr.refresh();
    mgr.refresh();
    fake.release();
    assert!(mgr.wait_idle(TIMEOUT));

    assert_eq!(fake.refresh_calls(), 1);
    assert_eq!(drain(&rx).len(), 2);
}

/// With `rescan_after_coalesced`, exactly one follow-up scan runs.
#[test]
fn coalesced_refresh_runs_one_follow_up_when_configured() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = MainAreaStateManager::with_config(
        fake.clone(),
        fake.clone(),
        ManagerConfig {
            rescan_after_coalesced: true,
        },
    );

    fake.hold();
    mgr.refresh();
    mgr.refresh();
    mgr.refresh();
    fake.release();
    assert!(mgr.wait_idle(TIMEOUT));

    assert_eq!(fake.refresh_calls(), 2);
}

// ── Eject ────────────────────────────────────────────────────────────────────

/// Eject while scanning performs no eject call.
#[test]
fn eject_ignored_while_scanning() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);

    fake.hold();
    mgr.refresh();
    mgr.eject_storage_device(&DeviceId::new(B));
    fake.release();
    assert!(mgr.wait_idle(TIMEOUT));

    assert!(fake.eject_calls().is_empty());
    assert_eq!(mgr.state().last_eject_result, None);
}

/// A successful eject is followed by exactly one automatic refresh.
#[test]
fn successful_eject_triggers_one_refresh() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));
    let rx = mgr.subscribe();

    mgr.eject_storage_device(&DeviceId::new(B));
    assert!(mgr.wait_idle(TIMEOUT));

    assert_eq!(fake.eject_calls(), vec![B.to_string()]);
    assert_eq!(fake.refresh_calls(), 2);
    let causes: Vec<SnapshotCause> = drain(&rx).iter().map(|s| s.cause).collect();
    assert_eq!(
        causes,
        [
            SnapshotCause::EjectCompleted,
            SnapshotCause::ScanStarted,
            SnapshotCause::RefreshCompleted
        ]
    );

    let state = mgr.state();
    assert_eq!(state.last_operation, Some(Operation::Refresh));
    assert!(state.last_eject_result.as_ref().is_some_and(|r| r.success));
    assert_eq!(state.device_count, 1);
    assert!(state.storages.is_empty());
}

/// An OS refusal is recorded with its code and does not rescan.
#[test]
fn refused_eject_records_result_without_refresh() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    fake.set_eject_result(Ok(DeviceEjectResult {
        success: false,
        attempted_instance_id: B.into(),
        config_ret: 23,
    }));
    mgr.eject_storage_device(&DeviceId::new(B));
    assert!(mgr.wait_idle(TIMEOUT));

    let state = mgr.state();
    assert_eq!(fake.refresh_calls(), 1);
    assert_eq!(state.last_operation, Some(Operation::Eject));
    assert_eq!(state.cause, SnapshotCause::EjectCompleted);
    let result = state.last_eject_result.as_ref().expect("result recorded");
    assert!(!result.success);
    assert_eq!(result.config_ret, 23);
    assert_eq!(result.attempted_instance_id, B);
    assert_eq!(state.device_count, 2);
}

/// An eject error is recorded; no result, no rescan.
#[test]
fn eject_error_records_error_without_refresh() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    mgr.refresh();
    assert!(mgr.wait_idle(TIMEOUT));

    let error = DeviceError::Eject("Configuration Manager unavailable".into());
    fake.set_eject_result(Err(error.clone()));
    mgr.eject_storage_device(&DeviceId::new(B));
    assert!(mgr.wait_idle(TIMEOUT));

    let state = mgr.state();
    assert_eq!(fake.refresh_calls(), 1);
    assert_eq!(state.cause, SnapshotCause::EjectFailed);
    assert_eq!(state.last_operation, Some(Operation::Eject));
    assert_eq!(state.last_operation_error, Some(error));
    assert_eq!(state.last_eject_result, None);
}

/// A refresh requested during an eject runs once the eject commits.
#[test]
fn refresh_during_eject_is_deferred() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    fake.set_eject_result(Ok(DeviceEjectResult {
        success: false,
        attempted_instance_id: B.into(),
        config_ret: 23,
    }));

    fake.hold();
    mgr.eject_storage_device(&DeviceId::new(B));
    mgr.refresh();
    assert!(!mgr.state().is_scanning, "refresh must wait for the eject");
    fake.release();
    assert!(mgr.wait_idle(TIMEOUT));

    assert_eq!(fake.refresh_calls(), 1);
    assert_eq!(mgr.state().last_operation, Some(Operation::Refresh));
    // The eject result outlives the later refresh.
    assert!(mgr.state().last_eject_result.is_some());
}

/// A second eject while one is in flight is dropped.
#[test]
fn concurrent_eject_is_dropped() {
    let fake = FakeDirectory::with_a_and_b();
    let mut mgr = manager(&fake);
    fake.set_eject_result(Ok(DeviceEjectResult {
        success: false,
        attempted_instance_id: B.into(),
        config_ret: 23,
    }));

    fake.hold();
    mgr.eject_storage_device(&DeviceId::new(B));
    mgr.eject_storage_device(&DeviceId::new(B));
    fake.release();
    assert!(mgr.wait_idle(TIMEOUT));

    assert_eq!(fake.eject_calls().len(), 1);
}

// ── Overview ─────────────────────────────────────────────────────────────────

fn selection_of(
    ov: &OverviewStateManager,
    id: &str,
) -> (BaseDeviceInfo, Option<StorageDeviceInfo>) {
    let state = ov.state();
    let entry = state.find(&DeviceId::new(id)).expect("device listed");
    (entry.base().clone(), entry.as_storage().cloned())
}

/// A completed refresh clears a selection made before it.
#[test]
fn overview_refresh_clears_selection() {
    let fake = FakeDirectory::with_a_and_b();
    let mut ov = overview(&fake);
    ov.refresh();
    assert!(ov.wait_idle(TIMEOUT));

    let (base, storage) = selection_of(&ov, B);
    ov.set_selected_device(base, storage);
    assert!(ov.state().selected_device.is_some());

    ov.refresh();
    assert!(ov.wait_idle(TIMEOUT));
    assert_eq!(ov.state().selected_device, None);
}

/// A selection made while the refresh is running is also cleared.
#[test]
fn overview_selection_during_refresh_is_cleared() {
    let fake = FakeDirectory::with_a_and_b();
    let mut ov = overview(&fake);
    let rx = ov.subscribe();

    fake.hold();
    ov.refresh();
    assert!(ov.state().is_scanning);
    ov.set_selected_device(base_info(A), None);
    assert!(ov.state().selected_device.is_some());
    fake.release();
    assert!(ov.wait_idle(TIMEOUT));

    assert_eq!(ov.state().selected_device, None);
    let last = drain(&rx).pop().expect("published");
    assert_eq!(last.cause, SnapshotCause::RefreshCompleted);
    assert_eq!(last.selected_device, None);
}

/// File-manager requests are emitted for storage selections only.
#[test]
fn overview_file_manager_requires_storage() {
    let fake = FakeDirectory::with_a_and_b();
    let mut ov = overview(&fake);
    let requests = ov.requests();
    ov.refresh();
    assert!(ov.wait_idle(TIMEOUT));

    ov.request_file_manager();
    let (base, storage) = selection_of(&ov, A);
    ov.set_selected_device(base, storage);
    ov.request_file_manager();
    assert!(drain(&requests).is_empty());

    let (base, storage) = selection_of(&ov, B);
    let storage = storage.expect("B is storage");
    ov.set_selected_device(base.clone(), Some(storage.clone()));
    ov.request_file_manager();
    assert_eq!(
        drain(&requests),
        vec![OverviewRequest::FileManager { base, storage }]
    );
}

/// `request_eject` announces the eject, then runs it for the storage id.
#[test]
fn overview_request_eject_emits_and_ejects() {
    let fake = FakeDirectory::with_a_and_b();
    let mut ov = overview(&fake);
    let requests = ov.requests();
    ov.refresh();
    assert!(ov.wait_idle(TIMEOUT));

    let (base, storage) = selection_of(&ov, B);
    let storage = storage.expect("B is storage");
    ov.set_selected_device(base.clone(), Some(storage.clone()));
    ov.request_eject();

    assert_eq!(
        drain(&requests),
        vec![OverviewRequest::Eject { base, storage }]
    );
    assert!(ov.wait_idle(TIMEOUT));
    assert_eq!(fake.eject_calls(), vec![B.to_string()]);
    // The automatic refresh after the eject cleared the selection.
    assert_eq!(ov.state().selected_device, None);
    assert_eq!(ov.state().device_count, 1);
}

/// Without a storage selection, `request_eject` does nothing.
#[test]
fn overview_request_eject_without_storage_is_noop() {
    let fake = FakeDirectory::with_a_and_b();
    let mut ov = overview(&fake);
    let requests = ov.requests();
    ov.refresh();
    assert!(ov.wait_idle(TIMEOUT));

    ov.request_eject();
    ov.set_selected_device(base_info(A), None);
    ov.request_eject();

    assert!(drain(&requests).is_empty());
    assert!(!ov.is_busy());
    assert!(fake.eject_calls().is_empty());
}
