//! CPU replay of a [`CompositionPlan`] onto 32-bit pixel buffers.
//!
//! Mirrors what the GPU executor does with `CopySubresourceRegion` and the
//! dirty-quad draw, texel for texel, so plans can be checked without a
//! device.

use rayon::prelude::*;

use super::CompositionPlan;
use super::parallel::{install_replay_pool, should_parallelize};
use crate::error::{MirrorError, MirrorResult};
use crate::geometry::{Point, Rect, Size};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    pixels: Vec<u32>,
}

impl PixelSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> u32) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    /// Copy `source_rect` of `source` so its top-left lands on `destination`.
    /// Both rectangles must lie inside their surfaces.
    pub fn copy_region(
        &mut self,
        source: &PixelSurface,
        source_rect: Rect,
        destination: Point,
    ) -> MirrorResult<()> {
        let dest_rect =
            Rect::from_origin_size(destination, source_rect.width(), source_rect.height());
        if !source.bounds().contains_rect(&source_rect) || !self.bounds().contains_rect(&dest_rect)
        {
            return Err(MirrorError::Platform(anyhow::anyhow!(
                "region copy out of bounds: {source_rect:?} -> {dest_rect:?}"
            )));
        }
        if source_rect.is_empty() {
            return Ok(());
        }

        let row_len = source_rect.width() as usize;
        for row in 0..source_rect.height() as usize {
            let src_start = (source_rect.top as usize + row) * source.width as usize
                + source_rect.left as usize;
            let dst_start =
                (dest_rect.top as usize + row) * self.width as usize + dest_rect.left as usize;
            self.pixels[dst_start..dst_start + row_len]
                .copy_from_slice(&source.pixels[src_start..src_start + row_len]);
        }
        Ok(())
    }
}

/// Replays plans for one output. The scratch surface is created on the
/// first move and reused afterwards.
#[derive(Default)]
pub struct SoftwareCompositor {
    scratch: Option<PixelSurface>,
}

impl SoftwareCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_scratch(&self) -> bool {
        self.scratch.is_some()
    }

    pub fn apply(
        &mut self,
        plan: &CompositionPlan,
        shared: &mut PixelSurface,
        texture: Option<&PixelSurface>,
    ) -> MirrorResult<()> {
        if !plan.moves.is_empty() {
            self.replay_moves(plan, shared)?;
        }
        if plan.dirty.is_empty() {
            return Ok(());
        }
        let texture = texture.ok_or_else(|| {
            MirrorError::Platform(anyhow::anyhow!(
                "update carries dirty rectangles but no captured surface"
            ))
        })?;
        if texture.size() != plan.texture_size {
            return Err(MirrorError::Platform(anyhow::anyhow!(
                "captured surface is {:?}, plan expects {:?}",
                texture.size(),
                plan.texture_size
            )));
        }
        for dirty in &plan.dirty {
            sample_dirty(plan, dirty.destination, shared, texture);
        }
        Ok(())
    }

    fn replay_moves(
        &mut self,
        plan: &CompositionPlan,
        shared: &mut PixelSurface,
    ) -> MirrorResult<()> {
        let scratch = self.scratch.get_or_insert_with(|| {
            PixelSurface::new(plan.scratch_size.width, plan.scratch_size.height)
        });
        let origin = plan.origin;
        for copy in &plan.moves {
            scratch.copy_region(
                shared,
                copy.source.offset(origin.x, origin.y),
                copy.source.top_left(),
            )?;
            let destination = copy.destination.offset(origin.x, origin.y);
            shared.copy_region(scratch, copy.source, destination.top_left())?;
        }
        Ok(())
    }
}

/// Fill `destination` (output space) on the shared surface from the texel
/// that rotates onto each pixel.
fn sample_dirty(
    plan: &CompositionPlan,
    destination: Rect,
    shared: &mut PixelSurface,
    texture: &PixelSurface,
) {
    let output = plan
        .rotation
        .rotated_size(plan.texture_size.width, plan.texture_size.height);
    let inverse = plan.rotation.inverse();
    let on_surface = destination.offset(plan.origin.x, plan.origin.y);
    let Some(clipped) = on_surface.intersect(&shared.bounds()) else {
        return;
    };

    let width = shared.width as usize;
    let rows = &mut shared.pixels
        [clipped.top as usize * width..clipped.bottom as usize * width];
    let fill_row = |row_index: usize, row: &mut [u32]| {
        let y = clipped.top + row_index as i32 - plan.origin.y;
        for x_surface in clipped.left..clipped.right {
            let x = x_surface - plan.origin.x;
            let texel = Rect::new(x, y, x + 1, y + 1)
                .rotate(inverse, output.width as i32, output.height as i32)
                .top_left();
            row[x_surface as usize] = texture.pixel(texel.x as u32, texel.y as u32);
        }
    };

    let pixel_count = (clipped.width() as usize) * (clipped.height() as usize);
    if should_parallelize(pixel_count) {
        install_replay_pool(|| {
            rows.par_chunks_mut(width)
                .enumerate()
                .for_each(|(index, row)| fill_row(index, row));
        });
    } else {
        for (index, row) in rows.chunks_mut(width).enumerate() {
            fill_row(index, row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::plan_update;
    use crate::frame::{FrameContext, FrameMetadata, MoveRecord, OutputDesc};
    use crate::geometry::Rotation;

    fn desktop(x: u32, y: u32) -> u32 {
        0xFF00_0000 | (x << 12) | y
    }

    fn context(bounds: Rect, rotation: Rotation) -> FrameContext {
        FrameContext {
            offset: Point::default(),
            output: OutputDesc {
                index: 0,
                name: "test".to_string(),
                desktop_bounds: bounds,
                rotation,
            },
        }
    }

    #[test]
    fn move_then_dirty_scenario() {
        let mut shared = PixelSurface::from_fn(400, 300, desktop);
        let before = shared.clone();
        let texture = PixelSurface::from_fn(400, 300, |x, y| 0x1000_0000 | (x * 1000 + y));

        let frame = FrameMetadata::from_records(
            &[MoveRecord {
                source: Point::new(0, 0),
                destination: Rect::new(200, 100, 300, 150),
            }],
            &[Rect::new(0, 0, 100, 100)],
        );
        let ctx = context(Rect::new(0, 0, 400, 300), Rotation::Identity);
        let plan = plan_update(&frame, &ctx, texture.size(), shared.size());

        let mut compositor = SoftwareCompositor::new();
        compositor.apply(&plan, &mut shared, Some(&texture)).unwrap();

        for y in 0..300 {
            for x in 0..400 {
                let expected = if (200..300).contains(&x) && (100..150).contains(&y) {
                    before.pixel(x - 200, y - 100)
                } else if x < 100 && y < 100 {
                    texture.pixel(x, y)
                } else {
                    before.pixel(x, y)
                };
                assert_eq!(shared.pixel(x, y), expected, "({x}, {y})");
            }
        }
        assert!(compositor.has_scratch());
    }

    #[test]
    fn overlapping_move_uses_pre_move_pixels() {
        // Scroll up by 10 rows inside a 100x100 output.
        let mut shared = PixelSurface::from_fn(100, 100, desktop);
        let before = shared.clone();
        let frame = FrameMetadata::from_records(
            &[MoveRecord {
                source: Point::new(0, 10),
                destination: Rect::new(0, 0, 100, 90),
            }],
            &[],
        );
        let ctx = context(Rect::new(0, 0, 100, 100), Rotation::Identity);
        let plan = plan_update(&frame, &ctx, shared.size(), shared.size());
        SoftwareCompositor::new()
            .apply(&plan, &mut shared, None)
            .unwrap();

        for y in 0..90 {
            for x in 0..100 {
                assert_eq!(shared.pixel(x, y), before.pixel(x, y + 10));
            }
        }
    }

    #[test]
    fn full_dirty_replay_reproduces_desktop_for_every_rotation() {
        let (out_w, out_h) = (48u32, 32u32);
        for rotation in [
            Rotation::Identity,
            Rotation::Rotate90,
            Rotation::Rotate180,
            Rotation::Rotate270,
        ] {
            let texture_size = rotation.rotated_size(out_w, out_h);
            // Texel t lands on desktop pixel rotate(t); build the texture
            // from the desktop it should reproduce.
            let texture = PixelSurface::from_fn(texture_size.width, texture_size.height, |x, y| {
                let p = Rect::new(x as i32, y as i32, x as i32 + 1, y as i32 + 1)
                    .rotate(rotation, texture_size.width as i32, texture_size.height as i32)
                    .top_left();
                desktop(p.x as u32, p.y as u32)
            });
            let frame = FrameMetadata::from_records(
                &[],
                &[Rect::new(0, 0, texture_size.width as i32, texture_size.height as i32)],
            );
            // Second output sits to the right of a 16px-wide neighbour.
            let bounds = Rect::new(16, 0, 16 + out_w as i32, out_h as i32);
            let ctx = context(bounds, rotation);
            let mut shared = PixelSurface::new(16 + out_w, out_h);
            let plan = plan_update(&frame, &ctx, texture_size, shared.size());
            SoftwareCompositor::new()
                .apply(&plan, &mut shared, Some(&texture))
                .unwrap();

            for y in 0..out_h {
                for x in 0..out_w {
                    assert_eq!(shared.pixel(x + 16, y), desktop(x, y), "{rotation:?} ({x}, {y})");
                }
                for x in 0..16 {
                    assert_eq!(shared.pixel(x, y), 0);
                }
            }
        }
    }

    #[test]
    fn dirty_without_surface_is_rejected() {
        let frame = FrameMetadata::from_records(&[], &[Rect::new(0, 0, 4, 4)]);
        let ctx = context(Rect::new(0, 0, 8, 8), Rotation::Identity);
        let mut shared = PixelSurface::new(8, 8);
        let plan = plan_update(&frame, &ctx, shared.size(), shared.size());
        assert!(SoftwareCompositor::new().apply(&plan, &mut shared, None).is_err());
    }

    #[test]
    fn large_dirty_region_matches_texture() {
        let size = 1024u32;
        let texture = PixelSurface::from_fn(size, size, desktop);
        let frame =
            FrameMetadata::from_records(&[], &[Rect::new(0, 0, size as i32, size as i32)]);
        let ctx = context(Rect::new(0, 0, size as i32, size as i32), Rotation::Identity);
        let mut shared = PixelSurface::new(size, size);
        let plan = plan_update(&frame, &ctx, texture.size(), shared.size());
        SoftwareCompositor::new()
            .apply(&plan, &mut shared, Some(&texture))
            .unwrap();
        assert_eq!(shared, texture);
    }
}
