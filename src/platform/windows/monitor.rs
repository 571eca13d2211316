use anyhow::Context;
use windows::Win32::Graphics::Direct3D11::ID3D11Device;
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_MODE_ROTATION, DXGI_MODE_ROTATION_ROTATE90, DXGI_MODE_ROTATION_ROTATE180,
    DXGI_MODE_ROTATION_ROTATE270,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ERROR_NOT_FOUND, IDXGIAdapter, IDXGIDevice, IDXGIFactory1,
    IDXGIOutput,
};
use windows::core::Interface;

use crate::error::{MirrorError, MirrorResult};
use crate::frame::OutputDesc;
use crate::geometry::{Rect, Rotation};

use super::d3d11::{ENUM_OUTPUTS_ERRORS, classify};

/// First adapter of a fresh DXGI factory, the one desktop duplication
/// outputs are enumerated on.
pub(crate) fn default_adapter() -> MirrorResult<IDXGIAdapter> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .context("CreateDXGIFactory1 failed")
        .map_err(MirrorError::Platform)?;
    let adapter = unsafe { factory.EnumAdapters1(0) }
        .context("EnumAdapters1(0) failed")
        .map_err(MirrorError::Platform)?;
    adapter
        .cast()
        .context("failed to query IDXGIAdapter")
        .map_err(MirrorError::Platform)
}

/// The adapter `device` was created on.
pub(crate) fn device_adapter(device: &ID3D11Device) -> MirrorResult<IDXGIAdapter> {
    let dxgi_device: IDXGIDevice = device
        .cast()
        .context("failed to query IDXGIDevice")
        .map_err(MirrorError::Platform)?;
    unsafe { dxgi_device.GetAdapter() }
        .context("IDXGIDevice::GetAdapter failed")
        .map_err(MirrorError::Platform)
}

pub(crate) fn find_output(
    adapter: &IDXGIAdapter,
    device: Option<&ID3D11Device>,
    index: u32,
) -> MirrorResult<IDXGIOutput> {
    unsafe { adapter.EnumOutputs(index) }.map_err(|error| {
        if error.code() == DXGI_ERROR_NOT_FOUND {
            return MirrorError::OutputNotFound(index);
        }
        classify(device, error, ENUM_OUTPUTS_ERRORS, "EnumOutputs failed")
    })
}

pub(crate) fn describe_output(output: &IDXGIOutput, index: u32) -> MirrorResult<OutputDesc> {
    let desc = unsafe { output.GetDesc() }
        .context("IDXGIOutput::GetDesc failed")
        .map_err(MirrorError::Platform)?;
    let bounds = desc.DesktopCoordinates;
    Ok(OutputDesc {
        index,
        name: utf16z_to_string(&desc.DeviceName),
        desktop_bounds: Rect::new(bounds.left, bounds.top, bounds.right, bounds.bottom),
        rotation: rotation_from_dxgi(desc.Rotation),
    })
}

pub(crate) fn enumerate_outputs() -> MirrorResult<Vec<OutputDesc>> {
    let adapter = default_adapter()?;
    let mut outputs = Vec::new();
    let mut index = 0u32;
    loop {
        let output = match find_output(&adapter, None, index) {
            Ok(output) => output,
            Err(MirrorError::OutputNotFound(_)) => break,
            Err(err) => return Err(err),
        };
        outputs.push(describe_output(&output, index)?);
        index += 1;
    }
    Ok(outputs)
}

/// Unspecified and identity both mean no rotation.
fn rotation_from_dxgi(rotation: DXGI_MODE_ROTATION) -> Rotation {
    match rotation {
        DXGI_MODE_ROTATION_ROTATE90 => Rotation::Rotate90,
        DXGI_MODE_ROTATION_ROTATE180 => Rotation::Rotate180,
        DXGI_MODE_ROTATION_ROTATE270 => Rotation::Rotate270,
        _ => Rotation::Identity,
    }
}

fn utf16z_to_string(input: &[u16]) -> String {
    let len = input.iter().position(|&ch| ch == 0).unwrap_or(input.len());
    String::from_utf16_lossy(&input[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use windows::Win32::Graphics::Dxgi::Common::{
        DXGI_MODE_ROTATION_IDENTITY, DXGI_MODE_ROTATION_UNSPECIFIED,
    };

    #[test]
    fn dxgi_rotations_map_onto_rotation() {
        assert_eq!(rotation_from_dxgi(DXGI_MODE_ROTATION_UNSPECIFIED), Rotation::Identity);
        assert_eq!(rotation_from_dxgi(DXGI_MODE_ROTATION_IDENTITY), Rotation::Identity);
        assert_eq!(rotation_from_dxgi(DXGI_MODE_ROTATION_ROTATE90), Rotation::Rotate90);
        assert_eq!(rotation_from_dxgi(DXGI_MODE_ROTATION_ROTATE270), Rotation::Rotate270);
    }

    #[test]
    fn device_names_stop_at_nul() {
        let mut raw = [0u16; 32];
        for (slot, ch) in raw.iter_mut().zip("\\\\.\\DISPLAY1".encode_utf16()) {
            *slot = ch;
        }
        assert_eq!(utf16z_to_string(&raw), "\\\\.\\DISPLAY1");
    }
}
