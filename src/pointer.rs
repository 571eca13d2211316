use crate::error::{MirrorError, MirrorResult};
use crate::frame::{FrameContext, PointerMetadata, PointerShape, PointerShapeInfo, PointerShapeKind};
use crate::geometry::{Point, Rect};

/// Masked-color alpha that means "XOR the RGB into the screen".
const XOR_ALPHA: u32 = 0xFF00_0000;

/// A pointer shape ready for two-pass drawing.
///
/// `color` is straight-alpha BGRA drawn with ordinary alpha blending.
/// `invert`, when present, holds the pixels that combine with the screen
/// (masked-color XOR pixels) and is drawn with an inverting blend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerImage {
    pub width: u32,
    pub height: u32,
    pub color: Vec<u32>,
    pub invert: Option<Vec<u32>>,
}

/// Last-known pointer state merged from every captured output.
#[derive(Debug, Default)]
pub struct PointerBuffer {
    shape: Option<PointerShape>,
    image: Option<PointerImage>,
    shape_time: i64,
    shape_generation: u64,
    /// Top-left of the pointer image on the shared surface.
    position: Point,
    visible: bool,
    position_time: i64,
    last_output: Option<u32>,
}

impl PointerBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one output's pointer metadata. Returns whether anything the
    /// presenter draws changed.
    pub fn update(&mut self, pointer: &PointerMetadata, context: &FrameContext) -> MirrorResult<bool> {
        if pointer.update_time == 0 {
            return Ok(false);
        }

        let mut changed = false;
        let same_output = self.last_output == Some(context.output.index);
        if same_output || (pointer.visible && pointer.update_time > self.position_time) {
            let origin = context.origin();
            self.position = Point::new(
                pointer.position.x + origin.x,
                pointer.position.y + origin.y,
            );
            self.visible = pointer.visible;
            self.position_time = pointer.update_time;
            self.last_output = Some(context.output.index);
            changed = true;
        }

        if let Some(shape) = &pointer.shape {
            self.image = Some(convert_shape(shape)?);
            self.shape = Some(shape.clone());
            self.shape_time = pointer.update_time;
            self.shape_generation += 1;
            changed = true;
        }

        Ok(changed)
    }

    pub fn is_visible(&self) -> bool {
        self.visible && self.image.is_some()
    }

    pub fn position(&self) -> Point {
        self.position
    }

    pub fn shape(&self) -> Option<&PointerShape> {
        self.shape.as_ref()
    }

    pub fn shape_time(&self) -> i64 {
        self.shape_time
    }

    /// Bumped on every new shape so GPU copies know when to re-upload.
    pub fn shape_generation(&self) -> u64 {
        self.shape_generation
    }

    pub fn image(&self) -> Option<&PointerImage> {
        self.image.as_ref()
    }

    /// Where the pointer lands on the shared surface, when drawable.
    pub fn draw_rect(&self) -> Option<Rect> {
        if !self.visible {
            return None;
        }
        let image = self.image.as_ref()?;
        Some(Rect::from_origin_size(
            self.position,
            image.width as i32,
            image.height as i32,
        ))
    }
}

/// Turn raw shape bytes into drawable layers.
pub fn convert_shape(shape: &PointerShape) -> MirrorResult<PointerImage> {
    let info = &shape.info;
    match info.kind {
        PointerShapeKind::Color => {
            let pixels = read_bgra(info, &shape.bytes, info.height)?;
            Ok(PointerImage {
                width: info.width,
                height: info.height,
                color: pixels,
                invert: None,
            })
        }
        PointerShapeKind::MaskedColor => {
            let pixels = read_bgra(info, &shape.bytes, info.height)?;
            Ok(split_masked(info.width, info.height, &pixels))
        }
        PointerShapeKind::Monochrome => {
            let masked = monochrome_to_masked(info, &shape.bytes)?;
            Ok(split_masked(info.width, info.height / 2, &masked))
        }
    }
}

/// Expand a 1bpp AND/XOR pair into masked-color pixels.
///
/// | AND | XOR | result      |
/// |-----|-----|-------------|
/// | 0   | 0   | black       |
/// | 0   | 1   | white       |
/// | 1   | 0   | transparent |
/// | 1   | 1   | invert      |
pub fn monochrome_to_masked(info: &PointerShapeInfo, bytes: &[u8]) -> MirrorResult<Vec<u32>> {
    let height = info.height / 2;
    let pitch = info.pitch as usize;
    let required = pitch * info.height as usize;
    if bytes.len() < required || pitch * 8 < info.width as usize {
        return Err(MirrorError::PointerShapeMismatch {
            expected: required as u32,
            written: bytes.len() as u32,
        });
    }

    let mut out = Vec::with_capacity(info.width as usize * height as usize);
    for y in 0..height as usize {
        let and_row = &bytes[y * pitch..(y + 1) * pitch];
        let xor_row = &bytes[(y + height as usize) * pitch..(y + height as usize + 1) * pitch];
        for x in 0..info.width as usize {
            let bit = 0x80u8 >> (x % 8);
            let and = and_row[x / 8] & bit != 0;
            let xor = xor_row[x / 8] & bit != 0;
            let rgb = if xor { 0x00FF_FFFF } else { 0 };
            out.push(if and { XOR_ALPHA | rgb } else { rgb });
        }
    }
    Ok(out)
}

fn read_bgra(info: &PointerShapeInfo, bytes: &[u8], height: u32) -> MirrorResult<Vec<u32>> {
    let pitch = info.pitch as usize;
    let row_bytes = info.width as usize * 4;
    let required = pitch * height.saturating_sub(1) as usize + row_bytes;
    if height == 0 || pitch < row_bytes || bytes.len() < required {
        return Err(MirrorError::PointerShapeMismatch {
            expected: required as u32,
            written: bytes.len() as u32,
        });
    }

    let mut out = Vec::with_capacity(info.width as usize * height as usize);
    for y in 0..height as usize {
        let row = &bytes[y * pitch..y * pitch + row_bytes];
        out.extend(
            row.chunks_exact(4)
                .map(|px| u32::from_le_bytes([px[0], px[1], px[2], px[3]])),
        );
    }
    Ok(out)
}

/// Split masked-color pixels into an opaque replace layer and an invert
/// layer. XOR pixels with black RGB leave the screen untouched and are
/// dropped from both.
fn split_masked(width: u32, height: u32, pixels: &[u32]) -> PointerImage {
    let mut color = Vec::with_capacity(pixels.len());
    let mut invert = Vec::with_capacity(pixels.len());
    let mut any_invert = false;
    for &pixel in pixels {
        if pixel & 0xFF00_0000 == XOR_ALPHA {
            color.push(0);
            let rgb = pixel & 0x00FF_FFFF;
            any_invert |= rgb != 0;
            invert.push(if rgb != 0 { XOR_ALPHA | rgb } else { 0 });
        } else {
            color.push(XOR_ALPHA | (pixel & 0x00FF_FFFF));
            invert.push(0);
        }
    }
    PointerImage {
        width,
        height,
        color,
        invert: any_invert.then_some(invert),
    }
}
