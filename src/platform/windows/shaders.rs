//! Shader bytecode and the fixed pipeline state for drawing textured quads.
//!
//! Compositors use it to replay dirty rectangles, the presenter to draw the
//! shared surface and the pointer layers.

use std::sync::OnceLock;

use anyhow::Context;
use windows::Win32::Graphics::Direct3D::D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_VERTEX_BUFFER, D3D11_BLEND, D3D11_BLEND_DESC, D3D11_BLEND_INV_DEST_COLOR,
    D3D11_BLEND_INV_SRC_ALPHA, D3D11_BLEND_INV_SRC_COLOR, D3D11_BLEND_ONE, D3D11_BLEND_OP_ADD,
    D3D11_BLEND_SRC_ALPHA, D3D11_BLEND_ZERO, D3D11_BUFFER_DESC, D3D11_COLOR_WRITE_ENABLE_ALL,
    D3D11_COMPARISON_NEVER, D3D11_CPU_ACCESS_WRITE, D3D11_FILTER, D3D11_FILTER_MIN_MAG_MIP_LINEAR,
    D3D11_FILTER_MIN_MAG_MIP_POINT, D3D11_INPUT_ELEMENT_DESC, D3D11_INPUT_PER_VERTEX_DATA,
    D3D11_MAP_WRITE_DISCARD, D3D11_MAPPED_SUBRESOURCE, D3D11_RENDER_TARGET_BLEND_DESC,
    D3D11_SAMPLER_DESC, D3D11_TEXTURE_ADDRESS_CLAMP, D3D11_USAGE_DYNAMIC, D3D11_VIEWPORT,
    ID3D11BlendState, ID3D11Buffer, ID3D11Device, ID3D11DeviceContext, ID3D11InputLayout,
    ID3D11PixelShader, ID3D11RenderTargetView, ID3D11SamplerState, ID3D11ShaderResourceView,
    ID3D11VertexShader,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R32G32_FLOAT;
use windows::core::s;

use crate::compose::Vertex;
use crate::error::{MirrorError, MirrorResult};

#[cfg(has_precompiled_vs)]
const PRECOMPILED_VS: &[u8] = include_bytes!(env!("COMPOSE_VS_CSO_PATH"));

#[cfg(has_precompiled_ps)]
const PRECOMPILED_PS: &[u8] = include_bytes!(env!("COMPOSE_PS_CSO_PATH"));

/// Vertex shader bytecode, from build.rs when fxc was available, compiled
/// once at runtime otherwise.
fn vertex_bytecode() -> &'static MirrorResult<Vec<u8>> {
    static BYTECODE: OnceLock<MirrorResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_vs)]
        {
            Ok(PRECOMPILED_VS.to_vec())
        }
        #[cfg(not(has_precompiled_vs))]
        {
            compile_runtime(b"vs_main\0", b"vs_5_0\0")
        }
    })
}

fn pixel_bytecode() -> &'static MirrorResult<Vec<u8>> {
    static BYTECODE: OnceLock<MirrorResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_ps)]
        {
            Ok(PRECOMPILED_PS.to_vec())
        }
        #[cfg(not(has_precompiled_ps))]
        {
            compile_runtime(b"ps_main\0", b"ps_5_0\0")
        }
    })
}

fn cached(bytecode: &'static MirrorResult<Vec<u8>>) -> MirrorResult<&'static [u8]> {
    bytecode.as_deref().map_err(|err| {
        MirrorError::Platform(anyhow::anyhow!("compose shader unavailable: {err}"))
    })
}

#[cfg(any(not(has_precompiled_vs), not(has_precompiled_ps)))]
fn compile_runtime(entry: &[u8], target: &[u8]) -> MirrorResult<Vec<u8>> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
    use windows::core::PCSTR;

    let source = include_str!("compose.hlsl").as_bytes();
    let mut blob = None;
    let mut errors = None;

    let hr = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            PCSTR::from_raw(entry.as_ptr()),
            PCSTR::from_raw(target.as_ptr()),
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = hr {
        let msg = errors
            .map(|b| {
                let ptr = unsafe { b.GetBufferPointer() } as *const u8;
                let len = unsafe { b.GetBufferSize() };
                let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
                String::from_utf8_lossy(slice).to_string()
            })
            .unwrap_or_default();
        return Err(MirrorError::Platform(
            anyhow::anyhow!("HLSL compile failed: {msg}").context(e.to_string()),
        ));
    }

    let blob =
        blob.ok_or_else(|| MirrorError::Platform(anyhow::anyhow!("D3DCompile returned no blob")))?;
    let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
    let len = unsafe { blob.GetBufferSize() };
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Blend {
    Opaque,
    /// Straight alpha over the target.
    Alpha,
    /// White inverts the target, black leaves it alone.
    Invert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Sampling {
    /// Texel-exact copies.
    Point,
    /// Scaled presentation.
    Linear,
}

pub(crate) fn full_viewport(width: f32, height: f32) -> D3D11_VIEWPORT {
    D3D11_VIEWPORT {
        TopLeftX: 0.0,
        TopLeftY: 0.0,
        Width: width,
        Height: height,
        MinDepth: 0.0,
        MaxDepth: 1.0,
    }
}

fn blend_target(enable: bool, src: D3D11_BLEND, dest: D3D11_BLEND) -> D3D11_RENDER_TARGET_BLEND_DESC {
    D3D11_RENDER_TARGET_BLEND_DESC {
        BlendEnable: enable.into(),
        SrcBlend: src,
        DestBlend: dest,
        BlendOp: D3D11_BLEND_OP_ADD,
        SrcBlendAlpha: D3D11_BLEND_ONE,
        DestBlendAlpha: D3D11_BLEND_ZERO,
        BlendOpAlpha: D3D11_BLEND_OP_ADD,
        RenderTargetWriteMask: D3D11_COLOR_WRITE_ENABLE_ALL.0 as u8,
    }
}

fn create_blend_state(
    device: &ID3D11Device,
    target: D3D11_RENDER_TARGET_BLEND_DESC,
) -> MirrorResult<ID3D11BlendState> {
    let mut desc = D3D11_BLEND_DESC::default();
    desc.RenderTarget[0] = target;
    let mut state: Option<ID3D11BlendState> = None;
    unsafe { device.CreateBlendState(&desc, Some(&mut state)) }
        .context("CreateBlendState failed")
        .map_err(MirrorError::Platform)?;
    state
        .context("CreateBlendState returned no state")
        .map_err(MirrorError::Platform)
}

fn create_sampler(device: &ID3D11Device, filter: D3D11_FILTER) -> MirrorResult<ID3D11SamplerState> {
    let desc = D3D11_SAMPLER_DESC {
        Filter: filter,
        AddressU: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressV: D3D11_TEXTURE_ADDRESS_CLAMP,
        AddressW: D3D11_TEXTURE_ADDRESS_CLAMP,
        MipLODBias: 0.0,
        MaxAnisotropy: 1,
        ComparisonFunc: D3D11_COMPARISON_NEVER,
        BorderColor: [0.0, 0.0, 0.0, 0.0],
        MinLOD: 0.0,
        MaxLOD: f32::MAX,
    };
    let mut sampler: Option<ID3D11SamplerState> = None;
    unsafe { device.CreateSamplerState(&desc, Some(&mut sampler)) }
        .context("CreateSamplerState failed")
        .map_err(MirrorError::Platform)?;
    sampler
        .context("CreateSamplerState returned no sampler")
        .map_err(MirrorError::Platform)
}

/// Shaders, layout and states to draw triangle lists of [`Vertex`] from a
/// dynamic vertex buffer.
pub(crate) struct QuadPipeline {
    vertex_shader: ID3D11VertexShader,
    pixel_shader: ID3D11PixelShader,
    input_layout: ID3D11InputLayout,
    sampler: ID3D11SamplerState,
    alpha_blend: ID3D11BlendState,
    invert_blend: ID3D11BlendState,
    vertex_buffer: Option<ID3D11Buffer>,
    /// Vertices `vertex_buffer` can hold.
    capacity: usize,
}

impl QuadPipeline {
    pub(crate) fn new(device: &ID3D11Device, sampling: Sampling) -> MirrorResult<Self> {
        let vs_bytecode = cached(vertex_bytecode())?;
        let ps_bytecode = cached(pixel_bytecode())?;

        let mut vertex_shader: Option<ID3D11VertexShader> = None;
        unsafe { device.CreateVertexShader(vs_bytecode, None, Some(&mut vertex_shader)) }
            .context("CreateVertexShader failed")
            .map_err(MirrorError::Platform)?;
        let mut pixel_shader: Option<ID3D11PixelShader> = None;
        unsafe { device.CreatePixelShader(ps_bytecode, None, Some(&mut pixel_shader)) }
            .context("CreatePixelShader failed")
            .map_err(MirrorError::Platform)?;

        let layout = [
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("POSITION"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 0,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
            D3D11_INPUT_ELEMENT_DESC {
                SemanticName: s!("TEXCOORD"),
                SemanticIndex: 0,
                Format: DXGI_FORMAT_R32G32_FLOAT,
                InputSlot: 0,
                AlignedByteOffset: 8,
                InputSlotClass: D3D11_INPUT_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            },
        ];
        let mut input_layout: Option<ID3D11InputLayout> = None;
        unsafe { device.CreateInputLayout(&layout, vs_bytecode, Some(&mut input_layout)) }
            .context("CreateInputLayout failed")
            .map_err(MirrorError::Platform)?;

        let filter = match sampling {
            Sampling::Point => D3D11_FILTER_MIN_MAG_MIP_POINT,
            Sampling::Linear => D3D11_FILTER_MIN_MAG_MIP_LINEAR,
        };

        Ok(Self {
            vertex_shader: vertex_shader
                .context("CreateVertexShader returned None")
                .map_err(MirrorError::Platform)?,
            pixel_shader: pixel_shader
                .context("CreatePixelShader returned None")
                .map_err(MirrorError::Platform)?,
            input_layout: input_layout
                .context("CreateInputLayout returned None")
                .map_err(MirrorError::Platform)?,
            sampler: create_sampler(device, filter)?,
            alpha_blend: create_blend_state(
                device,
                blend_target(true, D3D11_BLEND_SRC_ALPHA, D3D11_BLEND_INV_SRC_ALPHA),
            )?,
            invert_blend: create_blend_state(
                device,
                blend_target(true, D3D11_BLEND_INV_DEST_COLOR, D3D11_BLEND_INV_SRC_COLOR),
            )?,
            vertex_buffer: None,
            capacity: 0,
        })
    }

    /// Replace the vertex buffer contents, growing it when needed.
    pub(crate) fn upload(
        &mut self,
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        vertices: &[Vertex],
    ) -> MirrorResult<()> {
        if vertices.is_empty() {
            return Ok(());
        }
        if self.vertex_buffer.is_none() || self.capacity < vertices.len() {
            let capacity = vertices.len().next_power_of_two().max(64);
            let byte_width = u32::try_from(capacity * std::mem::size_of::<Vertex>())
                .context("vertex buffer too large")
                .map_err(MirrorError::Platform)?;
            let desc = D3D11_BUFFER_DESC {
                ByteWidth: byte_width,
                Usage: D3D11_USAGE_DYNAMIC,
                BindFlags: D3D11_BIND_VERTEX_BUFFER.0 as u32,
                CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
                MiscFlags: 0,
                StructureByteStride: 0,
            };
            let mut buffer: Option<ID3D11Buffer> = None;
            unsafe { device.CreateBuffer(&desc, None, Some(&mut buffer)) }
                .context("CreateBuffer (vertices) failed")
                .map_err(MirrorError::Platform)?;
            self.vertex_buffer = buffer;
            self.capacity = capacity;
        }

        let Some(buffer) = self.vertex_buffer.as_ref() else {
            return Err(MirrorError::Platform(anyhow::anyhow!(
                "CreateBuffer returned no vertex buffer"
            )));
        };
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { context.Map(buffer, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped)) }
            .context("Map (vertices) failed")
            .map_err(MirrorError::Platform)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                vertices.as_ptr() as *const u8,
                mapped.pData as *mut u8,
                std::mem::size_of_val(vertices),
            );
            context.Unmap(buffer, 0);
        }
        Ok(())
    }

    /// Draw `count` uploaded vertices starting at `first`.
    pub(crate) fn draw(
        &self,
        context: &ID3D11DeviceContext,
        target: &ID3D11RenderTargetView,
        viewport: D3D11_VIEWPORT,
        source: &ID3D11ShaderResourceView,
        blend: Blend,
        first: u32,
        count: u32,
    ) {
        let stride = std::mem::size_of::<Vertex>() as u32;
        let offset = 0u32;
        let blend_factor = [0.0f32; 4];
        unsafe {
            match blend {
                Blend::Opaque => context.OMSetBlendState(None, Some(&blend_factor), 0xffff_ffff),
                Blend::Alpha => context.OMSetBlendState(
                    &self.alpha_blend,
                    Some(&blend_factor),
                    0xffff_ffff,
                ),
                Blend::Invert => context.OMSetBlendState(
                    &self.invert_blend,
                    Some(&blend_factor),
                    0xffff_ffff,
                ),
            }
            context.OMSetRenderTargets(Some(&[Some(target.clone())]), None);
            context.RSSetViewports(Some(&[viewport]));
            context.VSSetShader(&self.vertex_shader, None);
            context.PSSetShader(&self.pixel_shader, None);
            context.IASetInputLayout(&self.input_layout);
            context.IASetVertexBuffers(
                0,
                1,
                Some(&self.vertex_buffer),
                Some(&stride),
                Some(&offset),
            );
            context.IASetPrimitiveTopology(D3D11_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.PSSetShaderResources(0, Some(&[Some(source.clone())]));
            context.PSSetSamplers(0, Some(&[Some(self.sampler.clone())]));
            context.Draw(count, first);
            // Unbind so the same texture can be a render target next.
            context.PSSetShaderResources(0, Some(&[None]));
        }
    }
}
