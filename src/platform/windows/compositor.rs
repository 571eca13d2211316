//! Executes composition plans on an output's capture device.

use windows::Win32::Graphics::Direct3D11::{
    D3D11_BOX, ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D,
};
use windows::core::Interface;

use crate::compose::CompositionPlan;
use crate::error::{MirrorError, MirrorResult};
use crate::geometry::{Point, Rect, Size};

use super::shaders::{Blend, QuadPipeline, Sampling, full_viewport};
use super::surface::{self, ImportedSurface};

/// Replays moves and dirty rectangles of one output into its import of the
/// shared surface.
pub(crate) struct OutputCompositor {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    target: ImportedSurface,
    surface_size: Size,
    /// Desktop-sized staging copy for moves; created on the first move.
    scratch: Option<(ID3D11Texture2D, Size)>,
    quads: QuadPipeline,
}

impl OutputCompositor {
    pub(crate) fn new(
        device: ID3D11Device,
        context: ID3D11DeviceContext,
        target: ImportedSurface,
        surface_size: Size,
    ) -> MirrorResult<Self> {
        let quads = QuadPipeline::new(&device, Sampling::Point)?;
        Ok(Self {
            device,
            context,
            target,
            surface_size,
            scratch: None,
            quads,
        })
    }

    pub(crate) fn apply(
        &mut self,
        plan: &CompositionPlan,
        texture: Option<&ID3D11Texture2D>,
    ) -> MirrorResult<()> {
        if !plan.moves.is_empty() {
            self.replay_moves(plan)?;
        }
        match texture {
            Some(texture) if !plan.dirty.is_empty() => self.replay_dirty(plan, texture)?,
            None if !plan.dirty.is_empty() => {
                tracing::warn!(
                    rects = plan.dirty.len(),
                    "dirty rectangles without a desktop image"
                );
            }
            _ => {}
        }
        unsafe { self.context.Flush() };
        Ok(())
    }

    fn scratch(&mut self, size: Size) -> MirrorResult<ID3D11Texture2D> {
        match &self.scratch {
            Some((texture, current)) if *current == size => Ok(texture.clone()),
            _ => {
                let texture = surface::create_bgra_texture(&self.device, size, false)?;
                self.scratch = Some((texture.clone(), size));
                Ok(texture)
            }
        }
    }

    fn replay_moves(&mut self, plan: &CompositionPlan) -> MirrorResult<()> {
        let scratch = self.scratch(plan.scratch_size)?;
        let shared: ID3D11Resource = self
            .target
            .texture()
            .cast()
            .map_err(|error| MirrorError::Platform(error.into()))?;
        let scratch: ID3D11Resource = scratch
            .cast()
            .map_err(|error| MirrorError::Platform(error.into()))?;

        // Overlapping moves are legal, so go through the scratch copy rather
        // than copying the shared surface onto itself.
        for copy in &plan.moves {
            let source_on_surface = copy.source.offset(plan.origin.x, plan.origin.y);
            let destination = copy.destination.top_left();
            unsafe {
                self.context.CopySubresourceRegion(
                    &scratch,
                    0,
                    copy.source.left as u32,
                    copy.source.top as u32,
                    0,
                    &shared,
                    0,
                    Some(&copy_box(source_on_surface)),
                );
                self.context.CopySubresourceRegion(
                    &shared,
                    0,
                    (destination.x + plan.origin.x) as u32,
                    (destination.y + plan.origin.y) as u32,
                    0,
                    &scratch,
                    0,
                    Some(&copy_box(copy.source)),
                );
            }
        }
        Ok(())
    }

    fn replay_dirty(&mut self, plan: &CompositionPlan, texture: &ID3D11Texture2D) -> MirrorResult<()> {
        // The view must not outlive the acquired frame.
        let view = surface::shader_view(&self.device, texture)?;
        self.quads.upload(&self.device, &self.context, &plan.vertices)?;
        self.quads.draw(
            &self.context,
            self.target.target(),
            full_viewport(self.surface_size.width as f32, self.surface_size.height as f32),
            &view,
            Blend::Opaque,
            0,
            plan.vertices.len() as u32,
        );
        Ok(())
    }
}

fn copy_box(rect: Rect) -> D3D11_BOX {
    let Point { x, y } = rect.top_left();
    D3D11_BOX {
        left: x as u32,
        top: y as u32,
        front: 0,
        right: rect.right as u32,
        bottom: rect.bottom as u32,
        back: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_box_spans_one_slice() {
        let b = copy_box(Rect::new(10, 20, 110, 70));
        assert_eq!((b.left, b.top, b.right, b.bottom), (10, 20, 110, 70));
        assert_eq!((b.front, b.back), (0, 1));
    }
}
