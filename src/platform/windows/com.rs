use anyhow::Context;
use windows::Win32::Foundation::{CloseHandle, HANDLE, RPC_E_CHANGED_MODE};
use windows::Win32::System::Com::{COINIT_MULTITHREADED, CoInitializeEx, CoUninitialize};
use windows::Win32::System::Threading::{CreateEventW, SetEvent};
use windows::core::PCWSTR;

use crate::error::{MirrorError, MirrorResult};

/// Joins the calling thread to the multithreaded apartment for as long as
/// the guard lives. A thread already in another apartment is left alone.
pub(crate) struct CoInitGuard {
    should_uninit: bool,
}

impl CoInitGuard {
    pub(crate) fn init_multithreaded() -> MirrorResult<Self> {
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr == RPC_E_CHANGED_MODE {
            return Ok(Self {
                should_uninit: false,
            });
        }

        hr.ok()
            .context("CoInitializeEx(COINIT_MULTITHREADED) failed")
            .map_err(MirrorError::Platform)?;
        Ok(Self {
            should_uninit: true,
        })
    }
}

impl Drop for CoInitGuard {
    fn drop(&mut self) {
        if self.should_uninit {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// A kernel handle closed on drop.
pub(crate) struct OwnedHandle(HANDLE);

// SAFETY: kernel handles are process-wide; the wrapper only closes the
// handle once, on drop.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    /// Unnamed auto-reset event, initially unsignaled.
    pub(crate) fn auto_reset_event() -> MirrorResult<Self> {
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }
            .context("CreateEventW failed")
            .map_err(MirrorError::Platform)?;
        Ok(Self(handle))
    }

    /// Take ownership of a handle some API handed out for closing.
    pub(crate) fn from_raw(handle: HANDLE) -> Self {
        Self(handle)
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.0
    }

    pub(crate) fn signal(&self) {
        if let Err(error) = unsafe { SetEvent(self.0) } {
            tracing::warn!(%error, "SetEvent failed");
        }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}
