//! Integer rectangles and the rotation transforms between a captured
//! texture and the desktop space of its output.
//!
//! Duplication hands out textures in the panel's native orientation while
//! move and dirty records are expressed in that texture's coordinates. The
//! shared surface is laid out in desktop orientation, so every record is
//! rotated before it is replayed.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Half-open rectangle, `left..right` by `top..bottom`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub const fn from_origin_size(origin: Point, width: i32, height: i32) -> Self {
        Self::new(origin.x, origin.y, origin.x + width, origin.y + height)
    }

    pub const fn width(&self) -> i32 {
        self.right - self.left
    }

    pub const fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    pub const fn top_left(&self) -> Point {
        Point::new(self.left, self.top)
    }

    pub const fn offset(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Smallest rectangle containing both. An empty operand is ignored.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let clipped = Self::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!clipped.is_empty()).then_some(clipped)
    }

    pub fn contains_rect(&self, other: &Self) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    /// Map this rectangle, expressed in a `width` x `height` texture, into
    /// the output space produced by `rotation`.
    pub fn rotate(&self, rotation: Rotation, width: i32, height: i32) -> Self {
        let Self {
            left: l,
            top: t,
            right: r,
            bottom: b,
        } = *self;
        match rotation {
            Rotation::Identity => *self,
            Rotation::Rotate90 => Self::new(height - b, l, height - t, r),
            Rotation::Rotate180 => Self::new(width - r, height - b, width - l, height - t),
            Rotation::Rotate270 => Self::new(t, width - r, b, width - l),
        }
    }
}

/// Output rotation as reported by the display mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Rotation {
    #[default]
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Rotation {
    pub fn inverse(self) -> Self {
        match self {
            Self::Identity => Self::Identity,
            Self::Rotate90 => Self::Rotate270,
            Self::Rotate180 => Self::Rotate180,
            Self::Rotate270 => Self::Rotate90,
        }
    }

    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Rotate90 | Self::Rotate270)
    }

    /// Dimensions of a `width` x `height` texture after rotation.
    pub fn rotated_size(self, width: u32, height: u32) -> Size {
        if self.swaps_axes() {
            Size::new(height, width)
        } else {
            Size::new(width, height)
        }
    }

    /// Map a lattice point of a `width` x `height` texture into rotated
    /// space. Corners of a [`Rect`] map to corners of its rotated form.
    pub fn map_point(self, point: Point, width: i32, height: i32) -> Point {
        let Point { x, y } = point;
        match self {
            Self::Identity => point,
            Self::Rotate90 => Point::new(height - y, x),
            Self::Rotate180 => Point::new(width - x, height - y),
            Self::Rotate270 => Point::new(y, width - x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Rotation; 4] = [
        Rotation::Identity,
        Rotation::Rotate90,
        Rotation::Rotate180,
        Rotation::Rotate270,
    ];

    #[test]
    fn rotate_then_inverse_is_identity() {
        let (w, h) = (1920, 1080);
        let samples = [
            Rect::new(0, 0, 100, 50),
            Rect::new(17, 33, 640, 480),
            Rect::new(1800, 1000, 1920, 1080),
            Rect::new(0, 0, 1920, 1080),
        ];
        for rotation in ALL {
            let rotated = rotation.rotated_size(w as u32, h as u32);
            for rect in samples {
                let forward = rect.rotate(rotation, w, h);
                let back = forward.rotate(
                    rotation.inverse(),
                    rotated.width as i32,
                    rotated.height as i32,
                );
                assert_eq!(back, rect, "{rotation:?}");
                assert_eq!(forward.width() * forward.height(), rect.width() * rect.height());
            }
        }
    }

    #[test]
    fn rotated_rect_stays_inside_rotated_bounds() {
        let (w, h) = (800, 600);
        let rect = Rect::new(10, 20, 110, 70);
        for rotation in ALL {
            let size = rotation.rotated_size(w as u32, h as u32);
            let bounds = Rect::new(0, 0, size.width as i32, size.height as i32);
            assert!(bounds.contains_rect(&rect.rotate(rotation, w, h)), "{rotation:?}");
        }
    }

    #[test]
    fn rotate90_matches_known_values() {
        // Texture 1080 wide, 1920 tall, shown as a 1920x1080 desktop.
        let rect = Rect::new(0, 0, 100, 50);
        assert_eq!(
            rect.rotate(Rotation::Rotate90, 1080, 1920),
            Rect::new(1870, 0, 1920, 100)
        );
        assert_eq!(
            rect.rotate(Rotation::Rotate270, 1080, 1920),
            Rect::new(0, 980, 50, 1080)
        );
    }

    #[test]
    fn point_mapping_agrees_with_rect_mapping() {
        let (w, h) = (300, 200);
        let rect = Rect::new(5, 7, 45, 90);
        for rotation in ALL {
            let a = rotation.map_point(rect.top_left(), w, h);
            let b = rotation.map_point(Point::new(rect.right, rect.bottom), w, h);
            let bounds = Rect::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y));
            assert_eq!(bounds, rect.rotate(rotation, w, h), "{rotation:?}");
        }
    }

    #[test]
    fn union_and_intersect() {
        let a = Rect::new(0, 0, 1920, 1080);
        let b = Rect::new(1920, -200, 3200, 824);
        assert_eq!(a.union(&b), Rect::new(0, -200, 3200, 1080));
        assert_eq!(a.intersect(&b), None);
        assert_eq!(Rect::default().union(&b), b);
    }
}
