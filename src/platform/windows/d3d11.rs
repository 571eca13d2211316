use anyhow::Context;
use windows::Win32::Foundation::{E_ACCESSDENIED, WAIT_ABANDONED};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_UNKNOWN, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_DEBUG, D3D11_SDK_VERSION,
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Multithread,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_ACCESS_LOST, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_NOT_CURRENTLY_AVAILABLE,
    DXGI_ERROR_NOT_FOUND, DXGI_ERROR_SESSION_DISCONNECTED, DXGI_ERROR_UNSUPPORTED, IDXGIAdapter,
};
use windows::core::{HRESULT, Interface};

use crate::env_config::define_env_flag;
use crate::error::{MirrorError, MirrorResult};

define_env_flag!(enabled_when(d3d_debug_enabled, "SNOW_MIRROR_D3D_DEBUG"));

/// Desktop switches, mode changes, session disconnects and device resets
/// surface as these.
pub(crate) const SYSTEM_TRANSITION_ERRORS: &[HRESULT] = &[
    DXGI_ERROR_DEVICE_REMOVED,
    DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_SESSION_DISCONNECTED,
    HRESULT(WAIT_ABANDONED.0 as i32),
];

pub(crate) const CREATE_DUPLICATION_ERRORS: &[HRESULT] = &[
    DXGI_ERROR_DEVICE_REMOVED,
    E_ACCESSDENIED,
    DXGI_ERROR_UNSUPPORTED,
    DXGI_ERROR_SESSION_DISCONNECTED,
    DXGI_ERROR_NOT_CURRENTLY_AVAILABLE,
];

pub(crate) const FRAME_INFO_ERRORS: &[HRESULT] = &[
    DXGI_ERROR_DEVICE_REMOVED,
    DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_SESSION_DISCONNECTED,
];

pub(crate) const ENUM_OUTPUTS_ERRORS: &[HRESULT] = &[
    DXGI_ERROR_NOT_FOUND,
    DXGI_ERROR_ACCESS_LOST,
    DXGI_ERROR_SESSION_DISCONNECTED,
];

/// Create a D3D11 device on `adapter`.
///
/// Devices are multithread-protected: the capture thread acquires frames
/// on a device whose immediate context the owner thread composites with.
pub(crate) fn create_device(
    adapter: &IDXGIAdapter,
) -> MirrorResult<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let feature_levels = [D3D_FEATURE_LEVEL_11_0];

    let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
    if d3d_debug_enabled() {
        flags |= D3D11_CREATE_DEVICE_DEBUG;
    }

    unsafe {
        D3D11CreateDevice(
            adapter,
            D3D_DRIVER_TYPE_UNKNOWN,
            None,
            flags,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .context("D3D11CreateDevice failed")
    .map_err(MirrorError::Platform)?;

    let device = device
        .context("D3D11CreateDevice did not return a device")
        .map_err(MirrorError::Platform)?;
    let context = context
        .context("D3D11CreateDevice did not return a device context")
        .map_err(MirrorError::Platform)?;

    let multithread: ID3D11Multithread = context
        .cast()
        .context("failed to query ID3D11Multithread")
        .map_err(MirrorError::Platform)?;
    unsafe {
        let _ = multithread.SetMultithreadProtected(true);
    }

    tracing::debug!(debug_layer = d3d_debug_enabled(), "created D3D11 device");
    Ok((device, context))
}

/// A device handed to a capture thread.
pub(crate) struct CaptureDevice(pub(crate) ID3D11Device);

// SAFETY: created multithread-protected by `create_device`.
unsafe impl Send for CaptureDevice {}

/// Sort a platform failure into the retry loop or out of it.
///
/// A removed device always means a recoverable transition. Otherwise the
/// HRESULT must be on the call site's `expected` list.
pub(crate) fn classify(
    device: Option<&ID3D11Device>,
    error: windows::core::Error,
    expected: &[HRESULT],
    action: &'static str,
) -> MirrorError {
    if let Some(device) = device {
        if let Err(reason) = unsafe { device.GetDeviceRemovedReason() } {
            return MirrorError::Transient(
                anyhow::Error::from(error)
                    .context(format!("{action}: device removed ({})", reason.code())),
            );
        }
    }
    let code = error.code();
    classify_code(code, expected, anyhow::Error::from(error).context(action))
}

/// The allow-list half of [`classify`], once device removal is ruled out.
fn classify_code(code: HRESULT, expected: &[HRESULT], cause: anyhow::Error) -> MirrorError {
    if code == DXGI_ERROR_ACCESS_LOST {
        return MirrorError::AccessLost;
    }
    if expected.contains(&code) {
        return MirrorError::Transient(cause);
    }
    MirrorError::Platform(cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    fn class_of(code: HRESULT, expected: &[HRESULT]) -> ErrorClass {
        classify_code(code, expected, anyhow::anyhow!("{code:?}")).class()
    }

    #[test]
    fn enumeration_failures_during_transitions_are_expected() {
        for code in [
            DXGI_ERROR_NOT_FOUND,
            DXGI_ERROR_ACCESS_LOST,
            DXGI_ERROR_SESSION_DISCONNECTED,
        ] {
            assert_eq!(class_of(code, ENUM_OUTPUTS_ERRORS), ErrorClass::Expected);
        }
    }

    #[test]
    fn session_disconnect_is_expected_while_capturing() {
        for list in [SYSTEM_TRANSITION_ERRORS, FRAME_INFO_ERRORS, CREATE_DUPLICATION_ERRORS] {
            assert_eq!(
                class_of(DXGI_ERROR_SESSION_DISCONNECTED, list),
                ErrorClass::Expected
            );
        }
    }

    #[test]
    fn access_lost_maps_to_its_own_variant() {
        assert!(matches!(
            classify_code(DXGI_ERROR_ACCESS_LOST, &[], anyhow::anyhow!("lost")),
            MirrorError::AccessLost
        ));
    }

    #[test]
    fn codes_off_the_list_are_unexpected() {
        assert_eq!(
            class_of(DXGI_ERROR_UNSUPPORTED, ENUM_OUTPUTS_ERRORS),
            ErrorClass::Unexpected
        );
    }
}
