/// USB plug-and-play enumeration with a cached snapshot.
use super::BaseDeviceDirectory;
use crate::error::DeviceError;
use crate::model::device::{casefold_cmp, parse_usb_ids};
use crate::model::{BaseDeviceInfo, DeviceId};
use crate::platform::{DeviceBackend, PnpEntity};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Identifier prefix of entities on the USB bus.
const USB_BUS_PREFIX: &str = "USB";

/// One enumeration generation, sorted by instance id (case-insensitive).
#[derive(Debug, Default)]
struct Snapshot {
    entities: Vec<PnpEntity>,
}

impl Snapshot {
    fn find(&self, id: &DeviceId) -> Option<&PnpEntity> {
        self.entities
            .iter()
            .find(|e| e.instance_id == id.instance_id())
    }
}

/// [`BaseDeviceDirectory`] over a [`DeviceBackend`].
pub struct UsbDeviceDirectory {
    backend: Arc<dyn DeviceBackend>,
    cache: RwLock<Arc<Snapshot>>,
}

impl UsbDeviceDirectory {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    /// Raw PnP records of the current snapshot, in listing order.
    pub fn entities(&self) -> Vec<PnpEntity> {
        self.snapshot().entities.clone()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.cache.read())
    }
}

impl BaseDeviceDirectory for UsbDeviceDirectory {
    fn refresh(&self) -> Result<(), DeviceError> {
        let mut entities: Vec<PnpEntity> = self
            .backend
            .pnp_entities()?
            .into_iter()
            .filter(|e| is_usb_bus(&e.instance_id))
            .collect();
        entities.sort_by(|a, b| casefold_cmp(&a.instance_id, &b.instance_id));

        debug!("Base directory: {} USB entities", entities.len());
        *self.cache.write() = Arc::new(Snapshot { entities });
        Ok(())
    }

    fn list_base_device_ids(&self) -> Vec<DeviceId> {
        self.snapshot()
            .entities
            .iter()
            .map(|e| DeviceId::new(e.instance_id.clone()))
            .collect()
    }

    fn get_base_device_info(&self, id: &DeviceId) -> Result<BaseDeviceInfo, DeviceError> {
        let snapshot = self.snapshot();
        let entity = snapshot
            .find(id)
            .ok_or_else(|| DeviceError::NotFound(id.to_string()))?;
        Ok(base_info_from_entity(entity))
    }
}

impl std::fmt::Debug for UsbDeviceDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbDeviceDirectory")
            .field("entities", &self.snapshot().entities.len())
            .finish()
    }
}

fn is_usb_bus(instance_id: &str) -> bool {
    !instance_id.is_empty()
        && instance_id
            .get(..USB_BUS_PREFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(USB_BUS_PREFIX))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn base_info_from_entity(entity: &PnpEntity) -> BaseDeviceInfo {
    let ids = parse_usb_ids(&entity.instance_id);
    let product = non_empty(&entity.name);
    let description = non_empty(&entity.description).or_else(|| product.clone());

    BaseDeviceInfo {
        id: DeviceId::new(entity.instance_id.clone()),
        vendor_id: ids.vendor_id,
        product_id: ids.product_id,
        manufacturer: non_empty(&entity.manufacturer),
        product,
        description,
        serial_number: ids.serial_number,
    }
}
