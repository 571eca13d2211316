//! Raw window input mapped onto presentation reactions.

use crate::geometry::Point;

/// Zoom step for Ctrl+Plus / Ctrl+Minus.
pub const ZOOM_STEP: f32 = 0.01;
/// Zoom step when Shift is also held.
pub const ZOOM_STEP_LARGE: f32 = 0.1;
/// Zoom change per wheel notch with Ctrl held.
pub const WHEEL_ZOOM_STEP: f32 = 0.05;
/// One wheel notch as reported by the window system.
pub const WHEEL_DELTA: i32 = 120;

const NUDGE_STEP: f32 = 1.0;
const NUDGE_STEP_LARGE: f32 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Plus,
    Minus,
    Zero,
    Left,
    Right,
    Up,
    Down,
    Pause,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown { key: Key, modifiers: Modifiers },
    Wheel { delta: i32, modifiers: Modifiers },
    DragStart(Point),
    DragMove(Point),
    DragEnd,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Reaction {
    /// Pan by this many shared-surface pixels.
    MoveOffset { dx: f32, dy: f32 },
    ChangeZoom(f32),
    SetZoom(f32),
    TogglePause,
    Ignore,
}

/// Tracks drag state between events.
#[derive(Debug, Default)]
pub struct InputRouter {
    drag_anchor: Option<Point>,
}

impl InputRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_anchor.is_some()
    }

    /// Map `event` to a reaction given the current `zoom`.
    pub fn handle(&mut self, event: InputEvent, zoom: f32) -> Reaction {
        match event {
            InputEvent::KeyDown { key, modifiers } => key_reaction(key, modifiers, zoom),
            InputEvent::Wheel { delta, modifiers } if modifiers.ctrl && delta != 0 => {
                Reaction::ChangeZoom(WHEEL_ZOOM_STEP * (delta as f32 / WHEEL_DELTA as f32))
            }
            InputEvent::Wheel { .. } => Reaction::Ignore,
            InputEvent::DragStart(at) => {
                self.drag_anchor = Some(at);
                Reaction::Ignore
            }
            InputEvent::DragMove(at) => {
                let Some(anchor) = self.drag_anchor.replace(at) else {
                    return Reaction::Ignore;
                };
                let (dx, dy) = (at.x - anchor.x, at.y - anchor.y);
                if dx == 0 && dy == 0 {
                    return Reaction::Ignore;
                }
                Reaction::MoveOffset {
                    dx: dx as f32 / zoom,
                    dy: dy as f32 / zoom,
                }
            }
            InputEvent::DragEnd => {
                self.drag_anchor = None;
                Reaction::Ignore
            }
        }
    }
}

fn key_reaction(key: Key, modifiers: Modifiers, zoom: f32) -> Reaction {
    if !modifiers.ctrl {
        return Reaction::Ignore;
    }
    let zoom_step = if modifiers.shift {
        ZOOM_STEP_LARGE
    } else {
        ZOOM_STEP
    };
    let nudge = if modifiers.shift {
        NUDGE_STEP_LARGE
    } else {
        NUDGE_STEP
    } / zoom;
    match key {
        Key::Plus => Reaction::ChangeZoom(zoom_step),
        Key::Minus => Reaction::ChangeZoom(-zoom_step),
        Key::Zero => Reaction::SetZoom(1.0),
        Key::Left => Reaction::MoveOffset { dx: -nudge, dy: 0.0 },
        Key::Right => Reaction::MoveOffset { dx: nudge, dy: 0.0 },
        Key::Up => Reaction::MoveOffset { dx: 0.0, dy: -nudge },
        Key::Down => Reaction::MoveOffset { dx: 0.0, dy: nudge },
        Key::Pause => Reaction::TogglePause,
        Key::Other => Reaction::Ignore,
    }
}
