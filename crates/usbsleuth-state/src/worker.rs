/// Device aggregation and the worker threads that run it.
///
/// Workers never touch manager state; each sends exactly one
/// [`WorkerOutcome`] back and exits. A panicking job is reported as
/// [`DeviceError::Worker`] rather than leaving the manager busy forever.
use crossbeam_channel::Sender;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;
use usbsleuth_core::device::{BaseDeviceDirectory, StorageDeviceDirectory};
use usbsleuth_core::model::{BaseDeviceInfo, DeviceEjectResult, DeviceEntry, DeviceId};
use usbsleuth_core::DeviceError;

/// Aggregated result of one successful refresh.
#[derive(Debug)]
pub(crate) struct RefreshOutput {
    pub devices: Vec<DeviceEntry>,
    pub storages: BTreeSet<DeviceId>,
}

/// Message from a worker thread to the owning manager.
#[derive(Debug)]
pub(crate) enum WorkerOutcome {
    Refresh(Result<RefreshOutput, DeviceError>),
    Eject {
        id: DeviceId,
        result: Result<DeviceEjectResult, DeviceError>,
    },
}

/// Refresh both directories (base strictly first) and build the listing.
///
/// Only the two directory refreshes can fail the whole operation. A storage
/// device whose detail is unavailable degrades to its base entry, and an id
/// whose base info vanished mid-cycle is kept as a bare entry.
pub(crate) fn collect_devices(
    base: &dyn BaseDeviceDirectory,
    storage: &dyn StorageDeviceDirectory,
) -> Result<RefreshOutput, DeviceError> {
    base.refresh()?;
    storage.refresh()?;

    let storage_ids: BTreeSet<DeviceId> = storage.list_storage_device_ids().into_iter().collect();
    let mut devices = Vec::new();
    let mut storages = BTreeSet::new();

    for id in base.list_base_device_ids() {
        if storage_ids.contains(&id) {
            match storage.get_storage_device_info(&id) {
                Ok(info) => {
                    storages.insert(id);
                    devices.push(DeviceEntry::Storage(info));
                    continue;
                }
                Err(e) => warn!("Storage detail for {} unavailable, listing as base: {}", id, e),
            }
        }

        let info = match base.get_base_device_info(&id) {
            Ok(info) => info,
            Err(e) => {
                warn!("Base detail for {} unavailable: {}", id, e);
                BaseDeviceInfo::bare(id)
            }
        };
        devices.push(DeviceEntry::Base(info));
    }

    Ok(RefreshOutput { devices, storages })
}

pub(crate) fn spawn_refresh(
    base: Arc<dyn BaseDeviceDirectory>,
    storage: Arc<dyn StorageDeviceDirectory>,
    tx: Sender<WorkerOutcome>,
) -> Result<(), DeviceError> {
    spawn("usbsleuth-refresh", tx, move || {
        WorkerOutcome::Refresh(guarded(|| collect_devices(base.as_ref(), storage.as_ref())))
    })
}

pub(crate) fn spawn_eject(
    storage: Arc<dyn StorageDeviceDirectory>,
    id: DeviceId,
    tx: Sender<WorkerOutcome>,
) -> Result<(), DeviceError> {
    spawn("usbsleuth-eject", tx, move || {
        let result = guarded(|| storage.eject_storage_device(&id));
        WorkerOutcome::Eject { id, result }
    })
}

fn guarded<T>(job: impl FnOnce() -> Result<T, DeviceError>) -> Result<T, DeviceError> {
    catch_unwind(AssertUnwindSafe(job))
        .unwrap_or_else(|_| Err(DeviceError::Worker("worker thread panicked".into())))
}

fn spawn(
    name: &str,
    tx: Sender<WorkerOutcome>,
    work: impl FnOnce() -> WorkerOutcome + Send + 'static,
) -> Result<(), DeviceError> {
    std::thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || {
            // The manager may have been dropped meanwhile.
            let _ = tx.send(work());
        })
        .map(|_| ())
        .map_err(|e| DeviceError::Worker(format!("failed to spawn {name} thread: {e}")))
}
