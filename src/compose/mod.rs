//! Incremental frame composition.
//!
//! Each captured update is turned into a [`CompositionPlan`]: move copies
//! replayed through a scratch surface, then one quad per dirty rectangle
//! sampled from the captured texture. Planning is pure; the GPU executor
//! lives with the platform code. Tests replay plans on CPU pixel buffers.

#[cfg(test)]
mod parallel;
#[cfg(test)]
mod software;

use crate::frame::{FrameContext, FrameMetadata};
use crate::geometry::{Point, Rect, Rotation, Size};

pub const VERTICES_PER_RECT: usize = 6;

/// Vertex layout shared with the dirty-quad shader: `POSITION` (float2)
/// followed by `TEXCOORD` (float2) at byte offset 8.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub position: [f32; 2],
    pub texcoord: [f32; 2],
}

/// A move in output space. Both rectangles are relative to the output's
/// top-left corner; add the plan origin for shared-surface coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveCopy {
    pub source: Rect,
    pub destination: Rect,
}

/// A dirty region: `destination` in output space, `texture` the matching
/// rectangle of the captured texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyCopy {
    pub destination: Rect,
    pub texture: Rect,
}

#[derive(Clone, Debug, Default)]
pub struct CompositionPlan {
    /// Output's top-left on the shared surface.
    pub origin: Point,
    pub rotation: Rotation,
    /// Size of the scratch surface used to replay moves (the output's
    /// desktop size).
    pub scratch_size: Size,
    pub texture_size: Size,
    pub moves: Vec<MoveCopy>,
    pub dirty: Vec<DirtyCopy>,
    /// `VERTICES_PER_RECT` vertices per dirty entry, ready for one draw.
    pub vertices: Vec<Vertex>,
}

impl CompositionPlan {
    pub fn is_empty(&self) -> bool {
        self.moves.is_empty() && self.dirty.is_empty()
    }
}

/// Build the plan for one update.
///
/// `texture` is the size of the captured texture (panel orientation) and
/// `surface` the size of the shared destination surface. Records that fall
/// outside the texture are clipped; moves that leave the output are
/// dropped.
pub fn plan_update(
    frame: &FrameMetadata,
    context: &FrameContext,
    texture: Size,
    surface: Size,
) -> CompositionPlan {
    let rotation = context.output.rotation;
    let output_size = rotation.rotated_size(texture.width, texture.height);
    let output_rect = Rect::new(0, 0, output_size.width as i32, output_size.height as i32);
    let texture_rect = Rect::new(0, 0, texture.width as i32, texture.height as i32);
    let (tw, th) = (texture.width as i32, texture.height as i32);

    let mut plan = CompositionPlan {
        origin: context.origin(),
        rotation,
        scratch_size: Size::new(
            context.output.desktop_bounds.width().max(0) as u32,
            context.output.desktop_bounds.height().max(0) as u32,
        ),
        texture_size: texture,
        ..CompositionPlan::default()
    };

    for record in frame.move_records() {
        let copy = MoveCopy {
            source: record.source_rect().rotate(rotation, tw, th),
            destination: record.destination.rotate(rotation, tw, th),
        };
        if copy.source.is_empty()
            || !output_rect.contains_rect(&copy.source)
            || !output_rect.contains_rect(&copy.destination)
        {
            tracing::debug!(?record, "dropping move record outside output bounds");
            continue;
        }
        plan.moves.push(copy);
    }

    for rect in frame.dirty_rects() {
        let Some(clipped) = rect.intersect(&texture_rect) else {
            continue;
        };
        plan.dirty.push(DirtyCopy {
            destination: clipped.rotate(rotation, tw, th),
            texture: clipped,
        });
    }

    plan.vertices.reserve(plan.dirty.len() * VERTICES_PER_RECT);
    for dirty in &plan.dirty {
        plan.vertices.extend_from_slice(&dirty_quad(
            dirty.destination,
            rotation,
            texture,
            plan.origin,
            surface,
        ));
    }

    plan
}

/// Two triangles covering `destination` on the shared surface, each corner
/// textured from the texture point that rotates onto it.
fn dirty_quad(
    destination: Rect,
    rotation: Rotation,
    texture: Size,
    origin: Point,
    surface: Size,
) -> [Vertex; VERTICES_PER_RECT] {
    let output = rotation.rotated_size(texture.width, texture.height);
    let inverse = rotation.inverse();
    let center_x = surface.width as f32 / 2.0;
    let center_y = surface.height as f32 / 2.0;

    let corner = |x: i32, y: i32| {
        let source = inverse.map_point(Point::new(x, y), output.width as i32, output.height as i32);
        Vertex {
            position: [
                (x + origin.x) as f32 / center_x - 1.0,
                1.0 - (y + origin.y) as f32 / center_y,
            ],
            texcoord: [
                source.x as f32 / texture.width as f32,
                source.y as f32 / texture.height as f32,
            ],
        }
    };

    let bottom_left = corner(destination.left, destination.bottom);
    let top_left = corner(destination.left, destination.top);
    let bottom_right = corner(destination.right, destination.bottom);
    let top_right = corner(destination.right, destination.top);
    [
        bottom_left,
        top_left,
        bottom_right,
        bottom_right,
        top_left,
        top_right,
    ]
}
