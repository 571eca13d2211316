//! The mirror window and the owner thread's message loop.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use windows::Win32::Foundation::{
    HWND, LPARAM, LRESULT, RECT, WAIT_FAILED, WAIT_OBJECT_0, WPARAM,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::INFINITE;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetKeyState, ReleaseCapture, SetCapture, VIRTUAL_KEY, VK_0, VK_ADD, VK_CONTROL, VK_DOWN,
    VK_LEFT, VK_NUMPAD0, VK_OEM_MINUS, VK_OEM_PLUS, VK_P, VK_PAUSE, VK_RIGHT, VK_SHIFT,
    VK_SUBTRACT, VK_UP,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CREATESTRUCTW, CW_USEDEFAULT, CreateWindowExW, DefWindowProcW, DestroyWindow,
    DispatchMessageW, GWLP_USERDATA, GetClientRect, GetWindowLongPtrW, IDC_ARROW, IsWindow,
    LoadCursorW, MSG, MWMO_ALERTABLE, MWMO_INPUTAVAILABLE, MsgWaitForMultipleObjectsEx, PM_REMOVE,
    PeekMessageW, PostQuitMessage, QS_ALLINPUT, RegisterClassW, SetWindowLongPtrW,
    TranslateMessage, WINDOW_EX_STYLE, WM_CLOSE, WM_DESTROY, WM_DISPLAYCHANGE, WM_KEYDOWN,
    WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MOUSEMOVE, WM_MOUSEWHEEL, WM_NCCREATE, WM_NCDESTROY,
    WM_QUIT, WM_SIZE, WNDCLASSW, WS_OVERLAPPEDWINDOW, WS_VISIBLE,
};
use windows::core::w;

use crate::config::MirrorConfig;
use crate::controller::DuplicationController;
use crate::deferred::Waker;
use crate::error::{MirrorError, MirrorResult};
use crate::geometry::{Point, Size};
use crate::input::{InputEvent, InputRouter, Key, Modifiers};

use super::WindowsBackend;
use super::com::{CoInitGuard, OwnedHandle};

const MK_LBUTTON: usize = 0x0001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WindowEvent {
    Resized(Size),
    DisplayChanged,
    Input(InputEvent),
}

/// Receives window messages the mirror cares about. Every method defaults
/// to doing nothing.
pub(crate) trait MessageHandler {
    fn on_resize(&self, _size: Size) {}
    fn on_display_change(&self) {}
    fn on_input(&self, _event: InputEvent) {}
    fn on_close(&self) {}
}

/// Queues messages for the owner loop, so no controller call runs inside
/// the window procedure.
#[derive(Clone, Default)]
pub(crate) struct EventQueue(Rc<RefCell<VecDeque<WindowEvent>>>);

impl EventQueue {
    fn push(&self, event: WindowEvent) {
        self.0.borrow_mut().push_back(event);
    }

    pub(crate) fn take(&self) -> Vec<WindowEvent> {
        self.0.borrow_mut().drain(..).collect()
    }
}

impl MessageHandler for EventQueue {
    fn on_resize(&self, size: Size) {
        self.push(WindowEvent::Resized(size));
    }

    fn on_display_change(&self) {
        self.push(WindowEvent::DisplayChanged);
    }

    fn on_input(&self, event: InputEvent) {
        self.push(WindowEvent::Input(event));
    }
}

/// What the window procedure reaches through `GWLP_USERDATA`.
struct WindowSlot {
    handler: Box<dyn MessageHandler>,
}

pub(crate) struct MirrorWindow {
    hwnd: HWND,
    /// Boxed so its address stays put while the window points at it.
    _slot: Box<WindowSlot>,
}

impl MirrorWindow {
    pub(crate) fn create(handler: Box<dyn MessageHandler>) -> MirrorResult<Self> {
        let hinstance = unsafe { GetModuleHandleW(None) }
            .context("GetModuleHandleW failed")
            .map_err(MirrorError::Platform)?;
        let cursor = unsafe { LoadCursorW(None, IDC_ARROW) }
            .context("LoadCursorW failed")
            .map_err(MirrorError::Platform)?;
        let class = WNDCLASSW {
            lpfnWndProc: Some(mirror_wnd_proc),
            hInstance: hinstance.into(),
            hCursor: cursor,
            lpszClassName: w!("SnowMirrorWindow"),
            ..Default::default()
        };
        // Fails harmlessly when the class survives from an earlier run.
        unsafe {
            RegisterClassW(&class);
        }

        let slot = Box::new(WindowSlot { handler });
        let slot_ptr: *const WindowSlot = &*slot;
        let hwnd = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE::default(),
                w!("SnowMirrorWindow"),
                w!("snow-mirror"),
                WS_OVERLAPPEDWINDOW | WS_VISIBLE,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                CW_USEDEFAULT,
                None,
                None,
                hinstance,
                Some(slot_ptr.cast()),
            )
        }
        .context("CreateWindowExW for mirror window failed")
        .map_err(MirrorError::Platform)?;

        Ok(Self { hwnd, _slot: slot })
    }

    pub(crate) fn hwnd(&self) -> HWND {
        self.hwnd
    }
}

impl Drop for MirrorWindow {
    fn drop(&mut self) {
        unsafe {
            if IsWindow(self.hwnd).as_bool() {
                let _ = DestroyWindow(self.hwnd);
            }
        }
    }
}

pub(crate) fn client_size(hwnd: HWND) -> MirrorResult<Size> {
    let mut rect = RECT::default();
    unsafe { GetClientRect(hwnd, &mut rect) }
        .context("GetClientRect failed")
        .map_err(MirrorError::Platform)?;
    Ok(Size::new(
        (rect.right - rect.left).max(0) as u32,
        (rect.bottom - rect.top).max(0) as u32,
    ))
}

/// Open the mirror window and run until it is closed.
pub(crate) fn run(config: MirrorConfig) -> MirrorResult<()> {
    let _com = CoInitGuard::init_multithreaded()?;
    let events = EventQueue::default();
    let window = MirrorWindow::create(Box::new(events.clone()))?;
    let wake = Arc::new(OwnedHandle::auto_reset_event()?);
    let waker: Waker = {
        let wake = Arc::clone(&wake);
        Arc::new(move || wake.signal())
    };

    let backend = WindowsBackend::new(window.hwnd(), config.acquire_timeout);
    let mut controller = DuplicationController::with_waker(backend, config, waker)?;
    let mut input = InputRouter::new();
    controller.request_capture(true);

    let result = pump(&events, &wake, &mut controller, &mut input);
    controller.request_capture(false);
    tracing::info!(stats = ?controller.stats(), "mirror window closed");
    result
}

fn pump(
    events: &EventQueue,
    wake: &OwnedHandle,
    controller: &mut DuplicationController<WindowsBackend>,
    input: &mut InputRouter,
) -> MirrorResult<()> {
    loop {
        controller.tick(Instant::now())?;

        let mut handles = vec![wake.raw()];
        if let Some(waitable) = controller.backend().frame_latency_waitable() {
            handles.push(waitable);
        }
        let timeout = wait_timeout(controller.next_deadline(), Instant::now());
        let wait = unsafe {
            MsgWaitForMultipleObjectsEx(
                Some(&handles),
                timeout,
                QS_ALLINPUT,
                MWMO_ALERTABLE | MWMO_INPUTAVAILABLE,
            )
        };
        if wait == WAIT_FAILED {
            return Err(MirrorError::Platform(
                anyhow::Error::from(windows::core::Error::from_win32())
                    .context("MsgWaitForMultipleObjectsEx failed"),
            ));
        }
        if handles.len() > 1 && wait.0 == WAIT_OBJECT_0.0 + 1 {
            controller.frame_slot_available()?;
        }

        let mut msg = MSG::default();
        while unsafe { PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE) }.as_bool() {
            if msg.message == WM_QUIT {
                return Ok(());
            }
            unsafe {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        for event in events.take() {
            match event {
                WindowEvent::Resized(size) => controller.resize(size.width, size.height),
                WindowEvent::DisplayChanged => controller.display_changed(),
                WindowEvent::Input(event) => {
                    let reaction = input.handle(event, controller.viewport().zoom());
                    controller.apply(reaction)?;
                }
            }
        }
    }
}

/// Milliseconds until `deadline`, rounded up, or `INFINITE` without one.
fn wait_timeout(deadline: Option<Instant>, now: Instant) -> u32 {
    let Some(deadline) = deadline else {
        return INFINITE;
    };
    let remaining = deadline.saturating_duration_since(now);
    let millis = remaining.as_millis() + u128::from(remaining.subsec_nanos() % 1_000_000 != 0);
    u32::try_from(millis).unwrap_or(INFINITE - 1).min(INFINITE - 1)
}

fn key_from_vk(vk: VIRTUAL_KEY) -> Key {
    match vk {
        VK_OEM_PLUS | VK_ADD => Key::Plus,
        VK_OEM_MINUS | VK_SUBTRACT => Key::Minus,
        VK_0 | VK_NUMPAD0 => Key::Zero,
        VK_LEFT => Key::Left,
        VK_RIGHT => Key::Right,
        VK_UP => Key::Up,
        VK_DOWN => Key::Down,
        VK_P | VK_PAUSE => Key::Pause,
        _ => Key::Other,
    }
}

fn current_modifiers() -> Modifiers {
    let held = |vk: VIRTUAL_KEY| unsafe { GetKeyState(i32::from(vk.0)) } < 0;
    Modifiers {
        ctrl: held(VK_CONTROL),
        shift: held(VK_SHIFT),
    }
}

fn low_word(value: usize) -> u16 {
    (value & 0xffff) as u16
}

fn high_word(value: usize) -> u16 {
    ((value >> 16) & 0xffff) as u16
}

fn cursor_point(lparam: LPARAM) -> Point {
    let raw = lparam.0 as usize;
    Point::new(low_word(raw) as i16 as i32, high_word(raw) as i16 as i32)
}

unsafe extern "system" fn mirror_wnd_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_NCCREATE {
        let create = unsafe { &*(lparam.0 as *const CREATESTRUCTW) };
        unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, create.lpCreateParams as isize) };
        return unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) };
    }

    let slot = unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *const WindowSlot;
    if slot.is_null() {
        return unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) };
    }
    // SAFETY: the slot is owned by the `MirrorWindow` and outlives the window.
    let handler = unsafe { &*(*slot).handler };

    match msg {
        WM_SIZE => {
            let raw = lparam.0 as usize;
            handler.on_resize(Size::new(
                u32::from(low_word(raw)),
                u32::from(high_word(raw)),
            ));
            LRESULT(0)
        }
        WM_DISPLAYCHANGE => {
            handler.on_display_change();
            LRESULT(0)
        }
        WM_KEYDOWN => {
            handler.on_input(InputEvent::KeyDown {
                key: key_from_vk(VIRTUAL_KEY(low_word(wparam.0))),
                modifiers: current_modifiers(),
            });
            LRESULT(0)
        }
        WM_MOUSEWHEEL => {
            handler.on_input(InputEvent::Wheel {
                delta: i32::from(high_word(wparam.0) as i16),
                modifiers: current_modifiers(),
            });
            LRESULT(0)
        }
        WM_LBUTTONDOWN => {
            unsafe { SetCapture(hwnd) };
            handler.on_input(InputEvent::DragStart(cursor_point(lparam)));
            LRESULT(0)
        }
        WM_MOUSEMOVE => {
            if wparam.0 & MK_LBUTTON != 0 {
                handler.on_input(InputEvent::DragMove(cursor_point(lparam)));
            }
            LRESULT(0)
        }
        WM_LBUTTONUP => {
            unsafe {
                let _ = ReleaseCapture();
            }
            handler.on_input(InputEvent::DragEnd);
            LRESULT(0)
        }
        WM_CLOSE => {
            handler.on_close();
            unsafe {
                let _ = DestroyWindow(hwnd);
            }
            LRESULT(0)
        }
        WM_DESTROY => {
            unsafe { PostQuitMessage(0) };
            LRESULT(0)
        }
        WM_NCDESTROY => {
            unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0) };
            unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}
