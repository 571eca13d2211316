use crate::geometry::{Point, Rect, Rotation, Size};

/// Size in bytes of one move record in the metadata buffer: a source point
/// followed by a destination rectangle, all native-endian `i32`.
pub const MOVE_RECORD_BYTES: usize = 24;

/// Size in bytes of one dirty rectangle in the metadata buffer.
pub const DIRTY_RECT_BYTES: usize = 16;

/// A region the OS reports as moved (scrolled, dragged) since the previous
/// frame. Coordinates are in captured-texture space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveRecord {
    pub source: Point,
    pub destination: Rect,
}

impl MoveRecord {
    pub fn source_rect(&self) -> Rect {
        Rect::from_origin_size(
            self.source,
            self.destination.width(),
            self.destination.height(),
        )
    }
}

/// Per-frame metadata pulled from the duplication API.
#[derive(Clone, Debug, Default)]
pub struct FrameMetadata {
    /// Frames the OS presented since the last acquisition.
    pub accumulated_frames: u32,
    /// QPC ticks of the last present, 0 when only the pointer changed.
    pub present_time: i64,
    pub rects_coalesced: bool,
    pub protected_content_masked: bool,
    /// Move records followed by dirty rectangles.
    pub metadata: Vec<u8>,
    pub move_bytes: usize,
    pub dirty_bytes: usize,
}

impl FrameMetadata {
    /// Build a metadata buffer from typed records.
    pub fn from_records(moves: &[MoveRecord], dirty: &[Rect]) -> Self {
        let mut metadata = Vec::with_capacity(
            moves.len() * MOVE_RECORD_BYTES + dirty.len() * DIRTY_RECT_BYTES,
        );
        for record in moves {
            push_i32s(
                &mut metadata,
                &[
                    record.source.x,
                    record.source.y,
                    record.destination.left,
                    record.destination.top,
                    record.destination.right,
                    record.destination.bottom,
                ],
            );
        }
        let move_bytes = metadata.len();
        for rect in dirty {
            push_i32s(
                &mut metadata,
                &[rect.left, rect.top, rect.right, rect.bottom],
            );
        }
        let dirty_bytes = metadata.len() - move_bytes;
        Self {
            metadata,
            move_bytes,
            dirty_bytes,
            ..Self::default()
        }
    }

    pub fn move_count(&self) -> usize {
        self.move_bytes / MOVE_RECORD_BYTES
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty_bytes / DIRTY_RECT_BYTES
    }

    pub fn move_records(&self) -> impl Iterator<Item = MoveRecord> + '_ {
        let end = self.move_count() * MOVE_RECORD_BYTES;
        self.metadata[..end.min(self.metadata.len())]
            .chunks_exact(MOVE_RECORD_BYTES)
            .map(|chunk| MoveRecord {
                source: Point::new(read_i32(chunk, 0), read_i32(chunk, 1)),
                destination: Rect::new(
                    read_i32(chunk, 2),
                    read_i32(chunk, 3),
                    read_i32(chunk, 4),
                    read_i32(chunk, 5),
                ),
            })
    }

    pub fn dirty_rects(&self) -> impl Iterator<Item = Rect> + '_ {
        let start = self.move_bytes.min(self.metadata.len());
        let end = (start + self.dirty_count() * DIRTY_RECT_BYTES).min(self.metadata.len());
        self.metadata[start..end]
            .chunks_exact(DIRTY_RECT_BYTES)
            .map(|chunk| {
                Rect::new(
                    read_i32(chunk, 0),
                    read_i32(chunk, 1),
                    read_i32(chunk, 2),
                    read_i32(chunk, 3),
                )
            })
    }

    pub fn has_changes(&self) -> bool {
        self.move_count() > 0 || self.dirty_count() > 0
    }
}

fn push_i32s(out: &mut Vec<u8>, values: &[i32]) {
    for value in values {
        out.extend_from_slice(&value.to_ne_bytes());
    }
}

#[inline]
fn read_i32(chunk: &[u8], index: usize) -> i32 {
    let at = index * 4;
    i32::from_ne_bytes([chunk[at], chunk[at + 1], chunk[at + 2], chunk[at + 3]])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerShapeKind {
    /// 1bpp AND mask stacked on a 1bpp XOR mask; `height` covers both.
    Monochrome,
    /// 32bpp BGRA with straight alpha.
    Color,
    /// 32bpp BGRA where alpha selects between replace (0) and XOR (0xFF).
    MaskedColor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerShapeInfo {
    pub kind: PointerShapeKind,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hotspot: Point,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerShape {
    pub info: PointerShapeInfo,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct PointerMetadata {
    /// QPC ticks of the last pointer update, 0 when the pointer did not
    /// change for this frame.
    pub update_time: i64,
    pub visible: bool,
    /// Position relative to the output's desktop origin.
    pub position: Point,
    pub shape: Option<PointerShape>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDesc {
    pub index: u32,
    pub name: String,
    /// Output rectangle on the virtual desktop.
    pub desktop_bounds: Rect,
    pub rotation: Rotation,
}

impl OutputDesc {
    /// Dimensions of the texture duplication hands out for this output.
    pub fn texture_size(&self) -> Size {
        self.rotation.rotated_size(
            self.desktop_bounds.width().max(0) as u32,
            self.desktop_bounds.height().max(0) as u32,
        )
    }
}

/// Where an output lands on the shared surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameContext {
    /// Virtual-desktop coordinate of the shared surface's top-left corner.
    pub offset: Point,
    pub output: OutputDesc,
}

impl FrameContext {
    /// Top-left of the output on the shared surface.
    pub fn origin(&self) -> Point {
        Point::new(
            self.output.desktop_bounds.left - self.offset.x,
            self.output.desktop_bounds.top - self.offset.y,
        )
    }
}

/// Lay `outputs` out on one shared surface covering the union of their
/// desktop bounds. Returns a context per output and the surface size.
pub fn shared_layout(outputs: Vec<OutputDesc>) -> (Vec<FrameContext>, Size) {
    let bounds = outputs
        .iter()
        .fold(Rect::default(), |acc, output| acc.union(&output.desktop_bounds));
    let offset = bounds.top_left();
    let size = Size::new(bounds.width().max(0) as u32, bounds.height().max(0) as u32);
    let contexts = outputs
        .into_iter()
        .map(|output| FrameContext { offset, output })
        .collect();
    (contexts, size)
}

/// Everything one `AcquireNextFrame` produced. `surface` is only present
/// when there are dirty rectangles to sample from, and stays valid until the
/// capture thread is told to move on.
#[derive(Debug)]
pub struct CapturedUpdate<S> {
    pub frame: FrameMetadata,
    pub pointer: PointerMetadata,
    pub surface: Option<S>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_buffer_holds_moves_then_dirty() {
        let moves = [MoveRecord {
            source: Point::new(0, 0),
            destination: Rect::new(200, 100, 300, 150),
        }];
        let dirty = [Rect::new(0, 0, 100, 100), Rect::new(5, 6, 7, 8)];
        let meta = FrameMetadata::from_records(&moves, &dirty);

        assert_eq!(meta.move_bytes, MOVE_RECORD_BYTES);
        assert_eq!(meta.dirty_bytes, 2 * DIRTY_RECT_BYTES);
        assert_eq!(meta.move_records().collect::<Vec<_>>(), moves);
        assert_eq!(meta.dirty_rects().collect::<Vec<_>>(), dirty);
        assert_eq!(moves[0].source_rect(), Rect::new(0, 0, 100, 50));
    }

    #[test]
    fn shared_layout_spans_every_output() {
        let output = |index, bounds| OutputDesc {
            index,
            name: format!("output-{index}"),
            desktop_bounds: bounds,
            rotation: Rotation::Identity,
        };
        let (contexts, size) = shared_layout(vec![
            output(0, Rect::new(0, 0, 1920, 1080)),
            output(1, Rect::new(-1280, -200, 0, 824)),
        ]);
        assert_eq!(size, Size::new(3200, 1280));
        assert_eq!(contexts[0].origin(), Point::new(1280, 200));
        assert_eq!(contexts[1].origin(), Point::new(0, 0));
    }

    #[test]
    fn empty_metadata_has_no_changes() {
        let meta = FrameMetadata::default();
        assert!(!meta.has_changes());
        assert_eq!(meta.move_records().count(), 0);
        assert_eq!(meta.dirty_rects().count(), 0);
    }

    #[test]
    fn truncated_buffer_is_not_overread() {
        let mut meta = FrameMetadata::from_records(&[], &[Rect::new(1, 2, 3, 4)]);
        meta.metadata.truncate(10);
        assert_eq!(meta.dirty_rects().count(), 0);
    }

    #[test]
    fn context_origin_and_texture_size() {
        let ctx = FrameContext {
            offset: Point::new(-1080, 0),
            output: OutputDesc {
                index: 1,
                name: "\\\\.\\DISPLAY2".to_string(),
                desktop_bounds: Rect::new(0, 0, 1920, 1080),
                rotation: Rotation::Rotate90,
            },
        };
        assert_eq!(ctx.origin(), Point::new(1080, 0));
        assert_eq!(ctx.output.texture_size(), Size::new(1080, 1920));
    }
}
