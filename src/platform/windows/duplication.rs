//! Desktop duplication bound to one output, driven from its capture thread.

use std::time::Duration;

use anyhow::Context;
use windows::Win32::Foundation::{GENERIC_ALL, RECT};
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11Texture2D};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_WAIT_TIMEOUT, DXGI_OUTDUPL_FRAME_INFO, DXGI_OUTDUPL_MOVE_RECT,
    DXGI_OUTDUPL_POINTER_SHAPE_INFO, DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR,
    DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MASKED_COLOR, DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MONOCHROME,
    IDXGIOutput1, IDXGIOutputDuplication, IDXGIResource,
};
use windows::Win32::System::StationsAndDesktops::{
    CloseDesktop, DESKTOP_ACCESS_FLAGS, DESKTOP_CONTROL_FLAGS, HDESK, OpenInputDesktop,
    SetThreadDesktop,
};
use windows::core::Interface;

use crate::capture_thread::CaptureSource;
use crate::error::{MirrorError, MirrorResult};
use crate::frame::{
    CapturedUpdate, FrameMetadata, MOVE_RECORD_BYTES, PointerMetadata, PointerShape,
    PointerShapeInfo, PointerShapeKind,
};
use crate::geometry::Point;

use super::com::CoInitGuard;
use super::d3d11::{
    CREATE_DUPLICATION_ERRORS, CaptureDevice, FRAME_INFO_ERRORS, SYSTEM_TRANSITION_ERRORS,
    classify,
};
use super::monitor;

/// Keeps the calling thread attached to the desktop receiving user input.
pub(crate) struct DesktopGuard(HDESK);

impl DesktopGuard {
    pub(crate) fn attach_input_desktop() -> MirrorResult<Self> {
        let desktop = unsafe {
            OpenInputDesktop(
                DESKTOP_CONTROL_FLAGS(0),
                false,
                DESKTOP_ACCESS_FLAGS(GENERIC_ALL.0),
            )
        }
        .context("OpenInputDesktop failed")
        .map_err(MirrorError::Platform)?;
        let guard = Self(desktop);
        unsafe { SetThreadDesktop(desktop) }
            .context("SetThreadDesktop failed")
            .map_err(MirrorError::Platform)?;
        Ok(guard)
    }
}

impl Drop for DesktopGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseDesktop(self.0);
        }
    }
}

/// The desktop image of an acquired frame. Valid until the session
/// releases that frame.
pub(crate) struct CapturedTexture(pub(crate) ID3D11Texture2D);

// SAFETY: the texture lives on a multithread-protected capture device and is
// only read by the owner thread while the capture thread holds the frame.
unsafe impl Send for CapturedTexture {}

pub(crate) struct DuplicationSession {
    device: ID3D11Device,
    duplication: IDXGIOutputDuplication,
    output_index: u32,
    timeout_ms: u32,
    holding_frame: bool,
    /// Word-aligned landing buffer for move and dirty records.
    record_scratch: Vec<u32>,
    _desktop: DesktopGuard,
    _com: CoInitGuard,
}

impl DuplicationSession {
    /// Attach to the input desktop and duplicate output `output_index` of the
    /// device's adapter. Runs on the capture thread.
    pub(crate) fn open(
        device: CaptureDevice,
        output_index: u32,
        acquire_timeout: Duration,
    ) -> MirrorResult<Self> {
        let com = CoInitGuard::init_multithreaded()?;
        let desktop = DesktopGuard::attach_input_desktop()?;
        let CaptureDevice(device) = device;

        let adapter = monitor::device_adapter(&device)?;
        let output = monitor::find_output(&adapter, Some(&device), output_index)?;
        let output1: IDXGIOutput1 = output
            .cast()
            .context("failed to query IDXGIOutput1")
            .map_err(MirrorError::Platform)?;
        let duplication = unsafe { output1.DuplicateOutput(&device) }.map_err(|error| {
            classify(
                Some(&device),
                error,
                CREATE_DUPLICATION_ERRORS,
                "DuplicateOutput failed",
            )
        })?;

        tracing::debug!(output = output_index, "duplication session opened");
        Ok(Self {
            device,
            duplication,
            output_index,
            timeout_ms: u32::try_from(acquire_timeout.as_millis()).unwrap_or(u32::MAX),
            holding_frame: false,
            record_scratch: Vec::new(),
            _desktop: desktop,
            _com: com,
        })
    }

    fn read_records(&mut self, total: u32, frame: &mut FrameMetadata) -> MirrorResult<()> {
        let total_bytes = total as usize;
        self.record_scratch.clear();
        self.record_scratch.resize(total_bytes.div_ceil(4), 0);

        let mut move_bytes = 0u32;
        unsafe {
            self.duplication.GetFrameMoveRects(
                total,
                self.record_scratch.as_mut_ptr() as *mut DXGI_OUTDUPL_MOVE_RECT,
                &mut move_bytes,
            )
        }
        .map_err(|error| {
            classify(
                Some(&self.device),
                error,
                FRAME_INFO_ERRORS,
                "GetFrameMoveRects failed",
            )
        })?;
        let move_bytes = whole_records(move_bytes as usize, total_bytes, MOVE_RECORD_BYTES);

        let mut dirty_bytes = 0u32;
        unsafe {
            // Move records are 24 bytes, so the dirty records stay word aligned.
            let dirty_start = (self.record_scratch.as_mut_ptr() as *mut u8).add(move_bytes);
            self.duplication.GetFrameDirtyRects(
                (total_bytes - move_bytes) as u32,
                dirty_start as *mut RECT,
                &mut dirty_bytes,
            )
        }
        .map_err(|error| {
            classify(
                Some(&self.device),
                error,
                FRAME_INFO_ERRORS,
                "GetFrameDirtyRects failed",
            )
        })?;
        let dirty_bytes = whole_records(
            dirty_bytes as usize,
            total_bytes - move_bytes,
            std::mem::size_of::<RECT>(),
        );

        frame.metadata = self
            .record_scratch
            .iter()
            .flat_map(|word| word.to_ne_bytes())
            .take(move_bytes + dirty_bytes)
            .collect();
        frame.move_bytes = move_bytes;
        frame.dirty_bytes = dirty_bytes;
        Ok(())
    }

    fn read_pointer(&self, info: &DXGI_OUTDUPL_FRAME_INFO) -> MirrorResult<PointerMetadata> {
        let mut pointer = PointerMetadata {
            update_time: info.LastMouseUpdateTime,
            visible: info.PointerPosition.Visible.as_bool(),
            position: Point::new(
                info.PointerPosition.Position.x,
                info.PointerPosition.Position.y,
            ),
            shape: None,
        };
        if info.PointerShapeBufferSize == 0 {
            return Ok(pointer);
        }

        let expected = info.PointerShapeBufferSize;
        let mut bytes = vec![0u8; expected as usize];
        let mut written = 0u32;
        let mut shape_info = DXGI_OUTDUPL_POINTER_SHAPE_INFO::default();
        unsafe {
            self.duplication.GetFramePointerShape(
                expected,
                bytes.as_mut_ptr() as *mut _,
                &mut written,
                &mut shape_info,
            )
        }
        .map_err(|error| {
            classify(
                Some(&self.device),
                error,
                FRAME_INFO_ERRORS,
                "GetFramePointerShape failed",
            )
        })?;
        if written != expected {
            return Err(MirrorError::PointerShapeMismatch { expected, written });
        }

        let kind = shape_kind(shape_info.Type).ok_or_else(|| {
            MirrorError::Platform(anyhow::anyhow!(
                "unknown pointer shape type {}",
                shape_info.Type
            ))
        })?;
        pointer.shape = Some(PointerShape {
            info: PointerShapeInfo {
                kind,
                width: shape_info.Width,
                height: shape_info.Height,
                pitch: shape_info.Pitch,
                hotspot: Point::new(shape_info.HotSpot.x, shape_info.HotSpot.y),
            },
            bytes,
        });
        Ok(pointer)
    }
}

impl CaptureSource for DuplicationSession {
    type Surface = CapturedTexture;

    fn capture_update(&mut self) -> MirrorResult<Option<CapturedUpdate<CapturedTexture>>> {
        if self.holding_frame {
            return Err(MirrorError::Platform(anyhow::anyhow!(
                "output {} still holds a frame; release it before acquiring",
                self.output_index
            )));
        }

        let mut info = DXGI_OUTDUPL_FRAME_INFO::default();
        let mut resource: Option<IDXGIResource> = None;
        let acquired =
            unsafe { self.duplication.AcquireNextFrame(self.timeout_ms, &mut info, &mut resource) };
        if let Err(error) = acquired {
            if error.code() == DXGI_ERROR_WAIT_TIMEOUT {
                return Ok(None);
            }
            return Err(classify(
                Some(&self.device),
                error,
                SYSTEM_TRANSITION_ERRORS,
                "AcquireNextFrame failed",
            ));
        }
        self.holding_frame = true;

        let mut frame = FrameMetadata {
            accumulated_frames: info.AccumulatedFrames,
            present_time: info.LastPresentTime,
            rects_coalesced: info.RectsCoalesced.as_bool(),
            protected_content_masked: info.ProtectedContentMaskedOut.as_bool(),
            ..FrameMetadata::default()
        };
        if info.TotalMetadataBufferSize > 0 {
            self.read_records(info.TotalMetadataBufferSize, &mut frame)?;
        }

        let surface = match resource {
            Some(resource) if frame.dirty_count() > 0 => {
                let texture: ID3D11Texture2D = resource
                    .cast()
                    .context("failed to cast acquired IDXGIResource to ID3D11Texture2D")
                    .map_err(MirrorError::Platform)?;
                Some(CapturedTexture(texture))
            }
            _ => None,
        };
        let pointer = self.read_pointer(&info)?;

        Ok(Some(CapturedUpdate {
            frame,
            pointer,
            surface,
        }))
    }

    fn release_frame(&mut self) -> MirrorResult<()> {
        if !self.holding_frame {
            return Ok(());
        }
        self.holding_frame = false;
        unsafe { self.duplication.ReleaseFrame() }.map_err(|error| {
            classify(
                Some(&self.device),
                error,
                SYSTEM_TRANSITION_ERRORS,
                "ReleaseFrame failed",
            )
        })
    }
}

impl Drop for DuplicationSession {
    fn drop(&mut self) {
        if self.holding_frame {
            unsafe { self.duplication.ReleaseFrame() }.ok();
        }
        tracing::debug!(output = self.output_index, "duplication session closed");
    }
}

fn shape_kind(raw: u32) -> Option<PointerShapeKind> {
    match raw {
        t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MONOCHROME.0 as u32 => {
            Some(PointerShapeKind::Monochrome)
        }
        t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_COLOR.0 as u32 => Some(PointerShapeKind::Color),
        t if t == DXGI_OUTDUPL_POINTER_SHAPE_TYPE_MASKED_COLOR.0 as u32 => {
            Some(PointerShapeKind::MaskedColor)
        }
        _ => None,
    }
}

/// Bytes reported as written, capped to what was offered and trimmed to
/// whole records.
fn whole_records(reported: usize, offered: usize, record: usize) -> usize {
    let bytes = reported.min(offered);
    bytes - bytes % record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_types_map_to_kinds() {
        assert_eq!(shape_kind(1), Some(PointerShapeKind::Monochrome));
        assert_eq!(shape_kind(2), Some(PointerShapeKind::Color));
        assert_eq!(shape_kind(4), Some(PointerShapeKind::MaskedColor));
        assert_eq!(shape_kind(3), None);
    }

    #[test]
    fn partial_records_are_trimmed() {
        assert_eq!(whole_records(50, 96, MOVE_RECORD_BYTES), 48);
        assert_eq!(whole_records(200, 96, MOVE_RECORD_BYTES), 96);
        assert_eq!(whole_records(0, 96, 16), 0);
    }
}
