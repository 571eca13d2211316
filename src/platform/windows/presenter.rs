//! Flip-model swap chain that shows the shared surface with zoom, pan and
//! the pointer on top.

use anyhow::Context;
use windows::Win32::Foundation::{HANDLE, HWND};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_SHADER_RESOURCE, D3D11_SUBRESOURCE_DATA, D3D11_TEXTURE2D_DESC,
    D3D11_USAGE_IMMUTABLE, D3D11_VIEWPORT, ID3D11Device, ID3D11DeviceContext,
    ID3D11RenderTargetView, ID3D11ShaderResourceView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_UNSPECIFIED, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_UNKNOWN,
    DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    DXGI_PRESENT, DXGI_SCALING_NONE, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG,
    DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT, DXGI_SWAP_EFFECT_FLIP_DISCARD,
    DXGI_USAGE_RENDER_TARGET_OUTPUT, IDXGIFactory2, IDXGISwapChain1, IDXGISwapChain2,
};
use windows::core::Interface;

use crate::compose::Vertex;
use crate::error::{MirrorError, MirrorResult};
use crate::geometry::{Rect, Size};
use crate::pointer::{PointerBuffer, PointerImage};
use crate::viewport::{Viewport, ViewportRect};

use super::com::OwnedHandle;
use super::d3d11::classify;
use super::monitor;
use super::shaders::{Blend, QuadPipeline, Sampling};
use super::surface;

const SWAP_CHAIN_FLAGS: DXGI_SWAP_CHAIN_FLAG = DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT;
const BACKGROUND: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Whole-texture quad; placement comes from the viewport it is drawn with.
const FULL_QUAD: [Vertex; 6] = [
    Vertex { position: [-1.0, -1.0], texcoord: [0.0, 1.0] },
    Vertex { position: [-1.0, 1.0], texcoord: [0.0, 0.0] },
    Vertex { position: [1.0, -1.0], texcoord: [1.0, 1.0] },
    Vertex { position: [1.0, -1.0], texcoord: [1.0, 1.0] },
    Vertex { position: [-1.0, 1.0], texcoord: [0.0, 0.0] },
    Vertex { position: [1.0, 1.0], texcoord: [1.0, 0.0] },
];

struct PointerTextures {
    generation: u64,
    color: ID3D11ShaderResourceView,
    invert: Option<ID3D11ShaderResourceView>,
}

pub(crate) struct Presenter {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    swap_chain: IDXGISwapChain2,
    back_buffer: Option<ID3D11RenderTargetView>,
    /// Signaled when the swap chain can take another frame.
    waitable: OwnedHandle,
    quads: QuadPipeline,
    quad_uploaded: bool,
    pointer: Option<PointerTextures>,
}

impl Presenter {
    pub(crate) fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        hwnd: HWND,
        size: Size,
    ) -> MirrorResult<Self> {
        let adapter = monitor::device_adapter(&device)?;
        let factory: IDXGIFactory2 = unsafe { adapter.GetParent() }
            .context("failed to get IDXGIFactory2 from adapter")
            .map_err(MirrorError::Platform)?;

        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: size.width.max(1),
            Height: size.height.max(1),
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            Stereo: false.into(),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: 2,
            Scaling: DXGI_SCALING_NONE,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: SWAP_CHAIN_FLAGS.0 as u32,
        };
        let swap_chain: IDXGISwapChain1 =
            unsafe { factory.CreateSwapChainForHwnd(&device, hwnd, &desc, None, None) }
                .context("CreateSwapChainForHwnd failed")
                .map_err(MirrorError::Platform)?;
        let swap_chain: IDXGISwapChain2 = swap_chain
            .cast()
            .context("failed to query IDXGISwapChain2")
            .map_err(MirrorError::Platform)?;
        unsafe { swap_chain.SetMaximumFrameLatency(1) }
            .context("SetMaximumFrameLatency failed")
            .map_err(MirrorError::Platform)?;
        let waitable = OwnedHandle::from_raw(unsafe { swap_chain.GetFrameLatencyWaitableObject() });

        let quads = QuadPipeline::new(&device, Sampling::Linear)?;
        tracing::debug!(width = desc.Width, height = desc.Height, "created swap chain");
        Ok(Self {
            device,
            context,
            swap_chain,
            back_buffer: None,
            waitable,
            quads,
            quad_uploaded: false,
            pointer: None,
        })
    }

    pub(crate) fn frame_latency_waitable(&self) -> HANDLE {
        self.waitable.raw()
    }

    pub(crate) fn resize(&mut self, size: Size) -> MirrorResult<()> {
        if size.width == 0 || size.height == 0 {
            // Minimized; keep the old buffers.
            return Ok(());
        }
        self.back_buffer = None;
        unsafe {
            self.context.OMSetRenderTargets(None, None);
            self.swap_chain.ResizeBuffers(
                0,
                size.width,
                size.height,
                DXGI_FORMAT_UNKNOWN,
                SWAP_CHAIN_FLAGS,
            )
        }
        .map_err(|error| classify(Some(&self.device), error, &[], "ResizeBuffers failed"))?;
        tracing::debug!(width = size.width, height = size.height, "resized swap chain");
        Ok(())
    }

    fn back_buffer(&mut self) -> MirrorResult<ID3D11RenderTargetView> {
        if let Some(view) = &self.back_buffer {
            return Ok(view.clone());
        }
        let texture: ID3D11Texture2D = unsafe { self.swap_chain.GetBuffer(0) }
            .context("IDXGISwapChain::GetBuffer failed")
            .map_err(MirrorError::Platform)?;
        let view = surface::render_target_view(&self.device, &texture)?;
        self.back_buffer = Some(view.clone());
        Ok(view)
    }

    /// Draw the shared surface and the pointer into the back buffer.
    pub(crate) fn render(
        &mut self,
        viewport: &Viewport,
        shared: &ID3D11ShaderResourceView,
        pointer: &PointerBuffer,
    ) -> MirrorResult<()> {
        let target = self.back_buffer()?;
        unsafe { self.context.ClearRenderTargetView(&target, &BACKGROUND) };
        if !self.quad_uploaded {
            self.quads.upload(&self.device, &self.context, &FULL_QUAD)?;
            self.quad_uploaded = true;
        }

        let placement = viewport.rect();
        if placement.width <= 0.0 || placement.height <= 0.0 {
            return Ok(());
        }
        self.quads.draw(
            &self.context,
            &target,
            to_d3d(placement),
            shared,
            Blend::Opaque,
            0,
            FULL_QUAD.len() as u32,
        );

        if let (Some(rect), Some(image)) = (pointer.draw_rect(), pointer.image()) {
            self.refresh_pointer(pointer.shape_generation(), image)?;
            if let Some(textures) = &self.pointer {
                let placement = pointer_placement(placement, viewport.zoom(), rect);
                self.quads.draw(
                    &self.context,
                    &target,
                    placement,
                    &textures.color,
                    Blend::Alpha,
                    0,
                    FULL_QUAD.len() as u32,
                );
                if let Some(invert) = &textures.invert {
                    self.quads.draw(
                        &self.context,
                        &target,
                        placement,
                        invert,
                        Blend::Invert,
                        0,
                        FULL_QUAD.len() as u32,
                    );
                }
            }
        }
        Ok(())
    }

    pub(crate) fn swap(&mut self) -> MirrorResult<()> {
        unsafe { self.swap_chain.Present(1, DXGI_PRESENT(0)) }
            .ok()
            .map_err(|error| classify(Some(&self.device), error, &[], "Present failed"))
    }

    fn refresh_pointer(&mut self, generation: u64, image: &PointerImage) -> MirrorResult<()> {
        if self.pointer.as_ref().is_some_and(|p| p.generation == generation) {
            return Ok(());
        }
        let color = self.pointer_texture(image.width, image.height, &image.color)?;
        let invert = match &image.invert {
            Some(pixels) => Some(self.pointer_texture(image.width, image.height, pixels)?),
            None => None,
        };
        self.pointer = Some(PointerTextures {
            generation,
            color,
            invert,
        });
        Ok(())
    }

    fn pointer_texture(
        &self,
        width: u32,
        height: u32,
        pixels: &[u32],
    ) -> MirrorResult<ID3D11ShaderResourceView> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_IMMUTABLE,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let data = D3D11_SUBRESOURCE_DATA {
            pSysMem: pixels.as_ptr().cast(),
            SysMemPitch: width * 4,
            SysMemSlicePitch: 0,
        };
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&desc, Some(&data), Some(&mut texture)) }
            .with_context(|| format!("CreateTexture2D (pointer {width}x{height}) failed"))
            .map_err(MirrorError::Platform)?;
        let texture = texture
            .context("CreateTexture2D returned no pointer texture")
            .map_err(MirrorError::Platform)?;
        surface::shader_view(&self.device, &texture)
    }
}

fn to_d3d(rect: ViewportRect) -> D3D11_VIEWPORT {
    D3D11_VIEWPORT {
        TopLeftX: rect.x,
        TopLeftY: rect.y,
        Width: rect.width,
        Height: rect.height,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    }
}

/// Window-space viewport for a pointer at `rect` on the shared surface.
fn pointer_placement(surface: ViewportRect, zoom: f32, rect: Rect) -> D3D11_VIEWPORT {
    to_d3d(ViewportRect {
        x: surface.x + rect.left as f32 * zoom,
        y: surface.y + rect.top as f32 * zoom,
        width: rect.width() as f32 * zoom,
        height: rect.height() as f32 * zoom,
    })
}
