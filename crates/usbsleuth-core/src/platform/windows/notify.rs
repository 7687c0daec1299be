/// Volume arrival/removal notifications via `WM_DEVICECHANGE`.
///
/// Windows broadcasts `DBT_DEVICEARRIVAL` / `DBT_DEVICEREMOVECOMPLETE` with a
/// `DBT_DEVTYP_VOLUME` header to every top-level window. The subscription
/// owns a hidden top-level window on the watcher thread and waits for input
/// with `MsgWaitForMultipleObjects`, so each wait is bounded and the watcher
/// can re-check its stop flag between waits.
use crate::error::DeviceError;
use crate::platform::{VolumeEventSource, VolumeEventSubscription, WaitOutcome};
use std::cell::Cell;
use std::time::Duration;
use tracing::debug;
use windows::core::w;
use windows::Win32::Foundation::{
    HINSTANCE, HWND, LPARAM, LRESULT, WAIT_FAILED, WAIT_TIMEOUT, WPARAM,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, MsgWaitForMultipleObjects,
    PeekMessageW, RegisterClassW, TranslateMessage, DBT_DEVICEARRIVAL, DBT_DEVICEREMOVECOMPLETE,
    DBT_DEVTYP_VOLUME, DEV_BROADCAST_HDR, MSG, PM_REMOVE, QS_ALLINPUT, WINDOW_EX_STYLE,
    WINDOW_STYLE, WM_DEVICECHANGE, WNDCLASSW,
};

thread_local! {
    /// Set by the window procedure, consumed by the next `wait`.
    static VOLUME_CHANGED: Cell<bool> = const { Cell::new(false) };
}

/// [`VolumeEventSource`] backed by a hidden notification window.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceChangeEvents;

impl VolumeEventSource for DeviceChangeEvents {
    fn open(&self) -> Result<Box<dyn VolumeEventSubscription>, DeviceError> {
        let class_name = w!("UsbSleuthVolumeWatcher");

        let hwnd = unsafe {
            let instance = GetModuleHandleW(None)
                .map_err(|e| DeviceError::query("GetModuleHandleW", e.to_string()))?;

            let instance = HINSTANCE::from(instance);

            let class = WNDCLASSW {
                lpfnWndProc: Some(window_proc),
                hInstance: instance,
                lpszClassName: class_name,
                ..Default::default()
            };
            // Fails harmlessly with ERROR_CLASS_ALREADY_EXISTS after a restart.
            RegisterClassW(&class);

            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                class_name,
                w!("UsbSleuth volume watcher"),
                WINDOW_STYLE::default(),
                0,
                0,
                0,
                0,
                None,
                None,
                instance,
                None,
            )
            .map_err(|e| DeviceError::query("CreateWindowExW", e.to_string()))?
        };

        debug!("Watcher: notification window created");
        VOLUME_CHANGED.with(|flag| flag.set(false));
        Ok(Box::new(WindowSubscription { hwnd }))
    }
}

struct WindowSubscription {
    hwnd: HWND,
}

impl VolumeEventSubscription for WindowSubscription {
    fn wait(&mut self, timeout: Duration) -> WaitOutcome {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let wait = unsafe { MsgWaitForMultipleObjects(None, false, millis, QS_ALLINPUT) };

        if wait == WAIT_TIMEOUT {
            return WaitOutcome::TimedOut;
        }
        if wait == WAIT_FAILED {
            return WaitOutcome::Failed(DeviceError::query(
                "MsgWaitForMultipleObjects",
                windows::core::Error::from_win32().to_string(),
            ));
        }

        // Drain the queue; sent messages are delivered inside PeekMessageW.
        let mut msg = MSG::default();
        unsafe {
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        if VOLUME_CHANGED.with(|flag| flag.replace(false)) {
            WaitOutcome::Changed
        } else {
            // Woken by unrelated input; indistinguishable from a quiet period.
            WaitOutcome::TimedOut
        }
    }
}

impl Drop for WindowSubscription {
    fn drop(&mut self) {
        unsafe {
            let _ = DestroyWindow(self.hwnd);
        }
    }
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_DEVICECHANGE {
        let event = wparam.0 as u32;
        if (event == DBT_DEVICEARRIVAL || event == DBT_DEVICEREMOVECOMPLETE) && lparam.0 != 0 {
            // SAFETY: for these events lParam points at a DEV_BROADCAST_HDR
            // owned by the sender for the duration of the call.
            let header = &*(lparam.0 as *const DEV_BROADCAST_HDR);
            if header.dbch_devicetype == DBT_DEVTYP_VOLUME {
                VOLUME_CHANGED.with(|flag| flag.set(true));
            }
        }
        return LRESULT(1);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}
