//! The shared destination surface every output composites into.

use anyhow::Context;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_RESOURCE_MISC_SHARED,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT, ID3D11Device, ID3D11RenderTargetView,
    ID3D11ShaderResourceView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIResource;
use windows::core::Interface;

use crate::error::{MirrorError, MirrorResult};
use crate::geometry::Size;

fn texture_desc(size: Size, misc_flags: u32) -> D3D11_TEXTURE2D_DESC {
    D3D11_TEXTURE2D_DESC {
        Width: size.width,
        Height: size.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: misc_flags,
    }
}

/// Create a BGRA render target, optionally shareable across devices.
pub(crate) fn create_bgra_texture(
    device: &ID3D11Device,
    size: Size,
    shared: bool,
) -> MirrorResult<ID3D11Texture2D> {
    let misc = if shared {
        D3D11_RESOURCE_MISC_SHARED.0 as u32
    } else {
        0
    };
    let desc = texture_desc(size, misc);
    let mut texture: Option<ID3D11Texture2D> = None;
    unsafe { device.CreateTexture2D(&desc, None, Some(&mut texture)) }
        .with_context(|| format!("CreateTexture2D {}x{} failed", size.width, size.height))
        .map_err(MirrorError::Platform)?;
    texture
        .context("CreateTexture2D returned no texture")
        .map_err(MirrorError::Platform)
}

pub(crate) fn texture_size(texture: &ID3D11Texture2D) -> Size {
    let mut desc = D3D11_TEXTURE2D_DESC::default();
    unsafe { texture.GetDesc(&mut desc) };
    Size::new(desc.Width, desc.Height)
}

pub(crate) fn shader_view(
    device: &ID3D11Device,
    texture: &ID3D11Texture2D,
) -> MirrorResult<ID3D11ShaderResourceView> {
    let mut view: Option<ID3D11ShaderResourceView> = None;
    unsafe { device.CreateShaderResourceView(texture, None, Some(&mut view)) }
        .context("CreateShaderResourceView failed")
        .map_err(MirrorError::Platform)?;
    view.context("CreateShaderResourceView returned no view")
        .map_err(MirrorError::Platform)
}

pub(crate) fn render_target_view(
    device: &ID3D11Device,
    texture: &ID3D11Texture2D,
) -> MirrorResult<ID3D11RenderTargetView> {
    let mut view: Option<ID3D11RenderTargetView> = None;
    unsafe { device.CreateRenderTargetView(texture, None, Some(&mut view)) }
        .context("CreateRenderTargetView failed")
        .map_err(MirrorError::Platform)?;
    view.context("CreateRenderTargetView returned no view")
        .map_err(MirrorError::Platform)
}

/// The shared surface as seen by the device that created it. The view
/// keeps the texture alive.
pub(crate) struct SharedSurface {
    view: ID3D11ShaderResourceView,
    handle: HANDLE,
    size: Size,
}

impl SharedSurface {
    pub(crate) fn create(device: &ID3D11Device, size: Size) -> MirrorResult<Self> {
        if size.width == 0 || size.height == 0 {
            return Err(MirrorError::InvalidConfig(format!(
                "shared surface would be empty ({}x{})",
                size.width, size.height
            )));
        }
        let texture = create_bgra_texture(device, size, true)?;
        let resource: IDXGIResource = texture
            .cast()
            .context("failed to query IDXGIResource on shared surface")
            .map_err(MirrorError::Platform)?;
        // Legacy shared handles are not owned and must not be closed.
        let handle = unsafe { resource.GetSharedHandle() }
            .context("GetSharedHandle failed")
            .map_err(MirrorError::Platform)?;
        let view = shader_view(device, &texture)?;
        tracing::debug!(width = size.width, height = size.height, "created shared surface");
        Ok(Self {
            view,
            handle,
            size,
        })
    }

    pub(crate) fn view(&self) -> &ID3D11ShaderResourceView {
        &self.view
    }

    pub(crate) fn handle(&self) -> HANDLE {
        self.handle
    }

    pub(crate) fn size(&self) -> Size {
        self.size
    }
}

/// One device's import of the shared surface.
pub(crate) struct ImportedSurface {
    texture: ID3D11Texture2D,
    target: ID3D11RenderTargetView,
}

impl ImportedSurface {
    pub(crate) fn open(device: &ID3D11Device, handle: HANDLE) -> MirrorResult<Self> {
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { device.OpenSharedResource(handle, &mut texture) }
            .context("OpenSharedResource failed for shared surface")
            .map_err(MirrorError::Platform)?;
        let texture = texture
            .context("OpenSharedResource returned no texture")
            .map_err(MirrorError::Platform)?;
        let target = render_target_view(device, &texture)?;
        Ok(Self { texture, target })
    }

    pub(crate) fn texture(&self) -> &ID3D11Texture2D {
        &self.texture
    }

    pub(crate) fn target(&self) -> &ID3D11RenderTargetView {
        &self.target
    }
}
