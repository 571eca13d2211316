pub(crate) mod com;
pub(crate) mod compositor;
pub(crate) mod d3d11;
pub(crate) mod duplication;
pub(crate) mod monitor;
pub(crate) mod presenter;
pub(crate) mod shaders;
pub(crate) mod surface;
pub(crate) mod window;

use std::time::Duration;

use rustc_hash::FxHashMap;
use windows::Win32::Foundation::{HANDLE, HWND};

use crate::capture_thread::CaptureSource;
use crate::compose::plan_update;
use crate::controller::{MirrorBackend, OutputPlan};
use crate::error::{MirrorError, MirrorResult};
use crate::frame::{CapturedUpdate, FrameContext, OutputDesc, shared_layout};
use crate::geometry::Size;
use crate::pointer::PointerBuffer;
use crate::viewport::Viewport;

use compositor::OutputCompositor;
use d3d11::CaptureDevice;
use duplication::DuplicationSession;
use presenter::Presenter;
use surface::{ImportedSurface, SharedSurface};

/// Everything one pipeline run owns. Dropped as a whole on stop.
struct Started {
    presenter: Presenter,
    shared: SharedSurface,
    compositors: FxHashMap<u32, OutputCompositor>,
}

/// D3D11 side of the pipeline: a presentation device with the shared
/// surface and swap chain, plus one capture device per mirrored output.
pub(crate) struct WindowsBackend {
    hwnd: HWND,
    acquire_timeout: Duration,
    started: Option<Started>,
}

impl WindowsBackend {
    pub(crate) fn new(hwnd: HWND, acquire_timeout: Duration) -> Self {
        Self {
            hwnd,
            acquire_timeout,
            started: None,
        }
    }

    /// The swap chain's frame-latency object while the pipeline runs.
    pub(crate) fn frame_latency_waitable(&self) -> Option<HANDLE> {
        self.started
            .as_ref()
            .map(|started| started.presenter.frame_latency_waitable())
    }

    fn started_mut(&mut self) -> MirrorResult<&mut Started> {
        self.started.as_mut().ok_or_else(|| {
            MirrorError::Platform(anyhow::anyhow!("capture pipeline is not started"))
        })
    }
}

impl MirrorBackend for WindowsBackend {
    type Source = DuplicationSession;

    fn start(&mut self, displays: &[u32]) -> MirrorResult<Vec<OutputPlan<DuplicationSession>>> {
        // Only one flip-model swap chain may target the window at a time.
        self.started = None;

        let adapter = monitor::default_adapter()?;
        let outputs = displays
            .iter()
            .map(|&index| {
                let output = monitor::find_output(&adapter, None, index)?;
                monitor::describe_output(&output, index)
            })
            .collect::<MirrorResult<Vec<OutputDesc>>>()?;
        let (contexts, surface_size) = shared_layout(outputs);

        let (device, context) = d3d11::create_device(&adapter)?;
        let shared = SharedSurface::create(&device, surface_size)?;
        let presenter = Presenter::new(device, context, self.hwnd, window::client_size(self.hwnd)?)?;

        let mut compositors = FxHashMap::default();
        let mut plans = Vec::with_capacity(contexts.len());
        for context in contexts {
            let index = context.output.index;
            let (capture_device, capture_context) = d3d11::create_device(&adapter)?;
            let target = ImportedSurface::open(&capture_device, shared.handle())?;
            compositors.insert(
                index,
                OutputCompositor::new(
                    capture_device.clone(),
                    capture_context,
                    target,
                    surface_size,
                )?,
            );

            let handoff = CaptureDevice(capture_device);
            let timeout = self.acquire_timeout;
            tracing::debug!(output = index, name = %context.output.name, origin = ?context.origin(), "prepared output");
            plans.push(OutputPlan {
                context,
                open: Box::new(move |_context: &FrameContext| {
                    DuplicationSession::open(handoff, index, timeout)
                }),
            });
        }

        self.started = Some(Started {
            presenter,
            shared,
            compositors,
        });
        Ok(plans)
    }

    fn stop(&mut self) {
        if self.started.take().is_some() {
            tracing::debug!("released presentation and capture devices");
        }
    }

    fn surface_size(&self) -> Size {
        self.started
            .as_ref()
            .map(|started| started.shared.size())
            .unwrap_or_default()
    }

    fn composite(
        &mut self,
        context: &FrameContext,
        update: &CapturedUpdate<<DuplicationSession as CaptureSource>::Surface>,
    ) -> MirrorResult<()> {
        let started = self.started_mut()?;
        let surface_size = started.shared.size();
        let compositor = started
            .compositors
            .get_mut(&context.output.index)
            .ok_or(MirrorError::OutputNotFound(context.output.index))?;

        let texture = update.surface.as_ref().map(|captured| &captured.0);
        let texture_size = texture
            .map(surface::texture_size)
            .unwrap_or_else(|| context.output.texture_size());
        let plan = plan_update(&update.frame, context, texture_size, surface_size);
        if plan.is_empty() {
            return Ok(());
        }
        compositor.apply(&plan, texture)
    }

    fn resize(&mut self, size: Size) -> MirrorResult<()> {
        self.started_mut()?.presenter.resize(size)
    }

    fn present(&mut self, viewport: &Viewport, pointer: &PointerBuffer) -> MirrorResult<()> {
        let started = self.started_mut()?;
        started
            .presenter
            .render(viewport, started.shared.view(), pointer)?;
        started.presenter.swap()
    }
}
