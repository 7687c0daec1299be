/// Safe-removal requests through the Configuration Manager API.
///
/// Mirrors what Explorer's "Eject" does: locate the device node for the
/// storage instance, step up to its parent (the USB device that owns the
/// removal policy) for `USBSTOR\` nodes, and request ejection there.
use crate::error::DeviceError;
use crate::model::DeviceEjectResult;
use crate::platform::EjectTarget;
use tracing::{debug, warn};
use windows::core::PCWSTR;
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    CM_Get_Parent, CM_Locate_DevNodeW, CM_Request_Device_EjectW, CM_LOCATE_DEVNODE_NORMAL,
    CR_SUCCESS, PNP_VETO_TYPE,
};

/// Length of the veto-name buffer (MAX_PATH).
const VETO_NAME_LEN: usize = 260;

pub(super) fn request_eject(
    instance_id: &str,
    target: EjectTarget,
) -> Result<DeviceEjectResult, DeviceError> {
    let wide: Vec<u16> = instance_id
        .encode_utf16()
        .chain(std::iter::once(0))
        .collect();

    let mut devinst: u32 = 0;
    let located = unsafe {
        CM_Locate_DevNodeW(
            &mut devinst,
            PCWSTR(wide.as_ptr()),
            CM_LOCATE_DEVNODE_NORMAL,
        )
    };
    if located != CR_SUCCESS {
        return Err(DeviceError::Eject(format!(
            "cannot locate device node for {instance_id} (CONFIGRET {})",
            located.0
        )));
    }

    let node = match target {
        EjectTarget::Node => devinst,
        EjectTarget::Parent => {
            let mut parent: u32 = 0;
            if unsafe { CM_Get_Parent(&mut parent, devinst, 0) } == CR_SUCCESS {
                parent
            } else {
                debug!("Eject: no parent node for {}, ejecting node itself", instance_id);
                devinst
            }
        }
    };

    let mut veto_type = PNP_VETO_TYPE::default();
    let mut veto_name = [0u16; VETO_NAME_LEN];
    let ret = unsafe {
        CM_Request_Device_EjectW(
            node,
            Some(&mut veto_type as *mut PNP_VETO_TYPE),
            Some(&mut veto_name[..]),
            0,
        )
    };

    let vetoed = veto_type.0 != 0;
    if vetoed {
        let end = veto_name.iter().position(|&c| c == 0).unwrap_or(0);
        warn!(
            "Eject of {} vetoed (type {}) by {}",
            instance_id,
            veto_type.0,
            String::from_utf16_lossy(&veto_name[..end])
        );
    }

    Ok(DeviceEjectResult {
        success: ret == CR_SUCCESS && !vetoed,
        attempted_instance_id: instance_id.to_string(),
        config_ret: ret.0,
    })
}
