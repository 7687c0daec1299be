/// The overview state manager — selection and outgoing UI requests.
///
/// Wraps a [`MainAreaStateManager`] and republishes each of its snapshots
/// together with the current selection. A completed refresh always clears
/// the selection: its device values belong to an older scan generation.
use crate::main_area::{MainAreaStateManager, ManagerConfig};
use crate::snapshot::{MainAreaState, SnapshotCause};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use usbsleuth_core::device::{BaseDeviceDirectory, StorageDeviceDirectory};
use usbsleuth_core::model::{BaseDeviceInfo, DeviceId, StorageDeviceInfo};

/// The device the user currently has selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    pub base: BaseDeviceInfo,
    /// Present only for storage devices.
    pub storage: Option<StorageDeviceInfo>,
}

/// Main-area snapshot plus selection.
#[derive(Debug, Clone)]
pub struct OverviewState {
    pub main: Arc<MainAreaState>,
    pub selected_device: Option<SelectedDevice>,
}

impl Deref for OverviewState {
    type Target = MainAreaState;

    fn deref(&self) -> &MainAreaState {
        &self.main
    }
}

/// Requests the overview raises for the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverviewRequest {
    /// Open a file browser on the selected storage device.
    FileManager {
        base: BaseDeviceInfo,
        storage: StorageDeviceInfo,
    },
    /// An eject of the selected device was just dispatched.
    Eject {
        base: BaseDeviceInfo,
        storage: StorageDeviceInfo,
    },
}

pub struct OverviewStateManager {
    main: MainAreaStateManager,
    main_rx: Receiver<Arc<MainAreaState>>,
    state: Arc<OverviewState>,
    subscribers: Vec<Sender<Arc<OverviewState>>>,
    requests_tx: Sender<OverviewRequest>,
    requests_rx: Receiver<OverviewRequest>,
}

impl OverviewStateManager {
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
        let mut main = MainAreaStateManager::with_config(base, storage, config);
        let main_rx = main.subscribe();
        let (requests_tx, requests_rx) = unbounded();
        let state = Arc::new(OverviewState {
            main: main.state(),
            selected_device: None,
        });
        Self {
            main,
            main_rx,
            state,
            subscribers: Vec::new(),
            requests_tx,
            requests_rx,
        }
    }

    pub fn state(&self) -> Arc<OverviewState> {
        Arc::clone(&self.state)
    }

    /// Receive every overview snapshot published from now on.
    pub fn subscribe(&mut self) -> Receiver<Arc<OverviewState>> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// File-manager and eject requests, in emission order.
    pub fn requests(&self) -> Receiver<OverviewRequest> {
        self.requests_rx.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.main.is_busy()
    }

    // ── Delegated operations ───────────────────────────────────────

    pub fn refresh(&mut self) {
        self.main.refresh();
        self.sync();
    }

    pub fn eject_storage_device(&mut self, id: &DeviceId) {
        self.main.eject_storage_device(id);
        self.sync();
    }

    /// Commit worker results and republish. Called once per frame / tick.
    pub fn process_messages(&mut self) -> bool {
        self.main.process_messages();
        self.sync()
    }

    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let idle = self.main.wait_idle(timeout);
        self.sync();
        idle
    }

    // ── Selection and requests ─────────────────────────────────────

    /// Replace the selection unconditionally.
    pub fn set_selected_device(
        &mut self,
        base: BaseDeviceInfo,
        storage: Option<StorageDeviceInfo>,
    ) {
        let next = OverviewState {
            main: Arc::clone(&self.state.main),
            selected_device: Some(SelectedDevice { base, storage }),
        };
        self.publish(next);
    }

    /// Ask for a file browser on the selection; storage selections only.
    pub fn request_file_manager(&self) {
        let Some((base, storage)) = self.selected_storage() else {
            debug!("File manager request ignored: no storage selected");
            return;
        };
        let _ = self
            .requests_tx
            .send(OverviewRequest::FileManager { base, storage });
    }

    /// Announce and dispatch an eject of the selected storage device.
    pub fn request_eject(&mut self) {
        let Some((base, storage)) = self.selected_storage() else {
            debug!("Eject request ignored: no storage selected");
            return;
        };
        let id = storage.base.id.clone();
        let _ = self.requests_tx.send(OverviewRequest::Eject { base, storage });
        self.eject_storage_device(&id);
    }

    fn selected_storage(&self) -> Option<(BaseDeviceInfo, StorageDeviceInfo)> {
        let selected = self.state.selected_device.as_ref()?;
        let storage = selected.storage.clone()?;
        Some((selected.base.clone(), storage))
    }

    // ── Publication ────────────────────────────────────────────────

    /// Fold pending main-area snapshots into overview snapshots.
    fn sync(&mut self) -> bool {
        let mut published = false;
        while let Ok(main) = self.main_rx.try_recv() {
            let selected_device = if main.cause == SnapshotCause::RefreshCompleted {
                None
            } else {
                self.state.selected_device.clone()
            };
            self.publish(OverviewState {
                main,
                selected_device,
            });
            published = true;
        }
        published
    }

    fn publish(&mut self, next: OverviewState) {
        let snapshot = Arc::new(next);
        self.state = Arc::clone(&snapshot);
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
    }
}

impl std::fmt::Debug for OverviewStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverviewStateManager")
            .field("main", &self.main)
            .field("selected", &self.state.selected_device.is_some())
            .finish()
    }
}
