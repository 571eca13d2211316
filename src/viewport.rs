use crate::config::MIN_ZOOM;
use crate::geometry::Size;

/// Placement of the shared surface inside the presentation window, in
/// window pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Zoom and pan state of the presentation surface.
///
/// Pan is stored in shared-surface pixels so that the image stays anchored
/// when the zoom changes; the window position is `pan * zoom`.
#[derive(Clone, Debug, PartialEq)]
pub struct Viewport {
    zoom: f32,
    pan_x: f32,
    pan_y: f32,
    surface: Size,
    pending_resize: Option<Size>,
}

impl Viewport {
    pub fn new(zoom: f32) -> Self {
        Self {
            zoom: zoom.max(MIN_ZOOM),
            pan_x: 0.0,
            pan_y: 0.0,
            surface: Size::default(),
            pending_resize: None,
        }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> (f32, f32) {
        (self.pan_x, self.pan_y)
    }

    pub fn surface(&self) -> Size {
        self.surface
    }

    /// Size of the shared surface being presented. Set on every pipeline
    /// start since the union of outputs may have changed.
    pub fn set_surface(&mut self, surface: Size) {
        self.surface = surface;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        if zoom.is_finite() {
            self.zoom = zoom.max(MIN_ZOOM);
        }
    }

    pub fn change_zoom(&mut self, delta: f32) {
        self.set_zoom(self.zoom + delta);
    }

    pub fn move_offset(&mut self, dx: f32, dy: f32) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    pub fn reset_pan(&mut self) {
        self.pan_x = 0.0;
        self.pan_y = 0.0;
    }

    pub fn rect(&self) -> ViewportRect {
        ViewportRect {
            x: self.pan_x * self.zoom,
            y: self.pan_y * self.zoom,
            width: self.surface.width as f32 * self.zoom,
            height: self.surface.height as f32 * self.zoom,
        }
    }

    /// Record a window size change; applied just before the next render.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        self.pending_resize = Some(Size::new(width, height));
    }

    pub fn take_pending_resize(&mut self) -> Option<Size> {
        self.pending_resize.take()
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_is_floor_clamped() {
        let mut viewport = Viewport::new(0.01);
        assert_eq!(viewport.zoom(), MIN_ZOOM);
        viewport.set_zoom(1.0);
        viewport.change_zoom(-5.0);
        assert_eq!(viewport.zoom(), MIN_ZOOM);
        viewport.set_zoom(f32::NAN);
        assert_eq!(viewport.zoom(), MIN_ZOOM);
    }

    #[test]
    fn rect_scales_surface_and_pan() {
        let mut viewport = Viewport::new(2.0);
        viewport.set_surface(Size::new(800, 600));
        viewport.move_offset(-10.0, 5.0);
        assert_eq!(
            viewport.rect(),
            ViewportRect {
                x: -20.0,
                y: 10.0,
                width: 1600.0,
                height: 1200.0,
            }
        );
    }

    #[test]
    fn resize_is_deferred_until_taken() {
        let mut viewport = Viewport::default();
        viewport.request_resize(640, 480);
        viewport.request_resize(1280, 720);
        assert_eq!(viewport.take_pending_resize(), Some(Size::new(1280, 720)));
        assert_eq!(viewport.take_pending_resize(), None);
    }
}
