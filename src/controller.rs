//! Owner-thread state machine that starts, stops and retries the capture
//! pipeline and paces composition to presentation.

use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::capture_thread::{CaptureSink, CaptureSource, CaptureThread, SourceFactory};
use crate::config::MirrorConfig;
use crate::deferred::{DeferredQueue, DeferredSender, Waker, run_calls};
use crate::error::{MirrorError, MirrorResult};
use crate::frame::{CapturedUpdate, FrameContext};
use crate::geometry::Size;
use crate::input::Reaction;
use crate::pointer::PointerBuffer;
use crate::stats::{MirrorStats, MirrorStatsSnapshot};
use crate::viewport::Viewport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicationState {
    Disabled,
    Enabling,
    Enabled,
    Error,
}

/// One output the backend prepared during `start`.
pub struct OutputPlan<S> {
    pub context: FrameContext,
    /// Opens the duplication session on the output's capture thread.
    pub open: SourceFactory<S>,
}

/// Platform side of the pipeline: device, shared surface, compositors and
/// presentation.
pub trait MirrorBackend {
    type Source: CaptureSource;

    /// Create the device, the shared surface covering the union of
    /// `displays`, and the presentation surface. Returns one plan per
    /// display.
    fn start(&mut self, displays: &[u32]) -> MirrorResult<Vec<OutputPlan<Self::Source>>>;

    /// Release everything `start` created.
    fn stop(&mut self);

    /// Size of the shared surface while started.
    fn surface_size(&self) -> Size;

    /// Replay one update onto the shared surface.
    fn composite(
        &mut self,
        context: &FrameContext,
        update: &CapturedUpdate<<Self::Source as CaptureSource>::Surface>,
    ) -> MirrorResult<()>;

    /// Apply a window size change to the presentation buffers.
    fn resize(&mut self, size: Size) -> MirrorResult<()>;

    /// Render the shared surface and pointer, then present.
    fn present(&mut self, viewport: &Viewport, pointer: &PointerBuffer) -> MirrorResult<()>;
}

type SurfaceOf<B> = <<B as MirrorBackend>::Source as CaptureSource>::Surface;

struct PendingUpdate<T> {
    update: CapturedUpdate<T>,
    context: FrameContext,
}

/// What capture threads deliver, applied on the owner thread.
pub struct Inbox<T> {
    frames: FxHashMap<u32, PendingUpdate<T>>,
    errors: Vec<MirrorError>,
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self {
            frames: FxHashMap::default(),
            errors: Vec::new(),
        }
    }
}

/// Forwards capture-thread output onto the controller's inbox.
pub struct ControllerSink<T> {
    sender: DeferredSender<Inbox<T>>,
}

impl<T: Send + 'static> CaptureSink<T> for ControllerSink<T> {
    fn on_frame(
        &self,
        update: CapturedUpdate<T>,
        context: FrameContext,
        output: u32,
    ) -> MirrorResult<()> {
        self.sender.post(move |inbox: &mut Inbox<T>| {
            inbox
                .frames
                .insert(output, PendingUpdate { update, context });
            Ok(())
        })
    }

    fn on_error(&self, error: MirrorError) {
        let posted = self.sender.post(move |inbox: &mut Inbox<T>| {
            inbox.errors.push(error);
            Ok(())
        });
        if posted.is_err() {
            tracing::debug!("controller gone before capture error was delivered");
        }
    }
}

/// One-shot retry deadline. Arming an armed timer keeps the first
/// deadline.
#[derive(Debug, Default)]
struct RetryTimer {
    deadline: Option<Instant>,
}

impl RetryTimer {
    fn arm(&mut self, deadline: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(deadline);
        true
    }

    fn disarm(&mut self) {
        self.deadline = None;
    }

    fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct DuplicationController<B: MirrorBackend> {
    backend: B,
    config: MirrorConfig,
    state: DuplicationState,
    capture_wanted: bool,
    threads: Vec<CaptureThread<B::Source>>,
    inbox: DeferredQueue<Inbox<SurfaceOf<B>>>,
    inbox_state: Inbox<SurfaceOf<B>>,
    /// Outputs whose last update was presented; they get `next` once
    /// presentation reports a free slot.
    awaiting_ack: Vec<u32>,
    /// Outputs acknowledged while paused.
    held: Vec<u32>,
    frame_slot: bool,
    needs_redraw: bool,
    paused: bool,
    retry: RetryTimer,
    viewport: Viewport,
    pointer: PointerBuffer,
    stats: MirrorStats,
}

impl<B: MirrorBackend> DuplicationController<B> {
    pub fn new(backend: B, config: MirrorConfig) -> MirrorResult<Self> {
        Self::build(backend, config, DeferredQueue::new())
    }

    /// Like [`new`](Self::new), with `waker` run whenever a capture thread
    /// posts to the controller.
    pub fn with_waker(backend: B, config: MirrorConfig, waker: Waker) -> MirrorResult<Self> {
        Self::build(backend, config, DeferredQueue::with_waker(waker))
    }

    fn build(
        backend: B,
        config: MirrorConfig,
        inbox: DeferredQueue<Inbox<SurfaceOf<B>>>,
    ) -> MirrorResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            viewport: Viewport::new(config.zoom),
            config,
            state: DuplicationState::Disabled,
            capture_wanted: false,
            threads: Vec::new(),
            inbox,
            inbox_state: Inbox::default(),
            awaiting_ack: Vec::new(),
            held: Vec::new(),
            frame_slot: false,
            needs_redraw: false,
            paused: false,
            retry: RetryTimer::default(),
            pointer: PointerBuffer::new(),
            stats: MirrorStats::default(),
        })
    }

    pub fn state(&self) -> DuplicationState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn stats(&self) -> MirrorStatsSnapshot {
        self.stats.snapshot()
    }

    /// When the owner must wake up even if nothing else happens.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.retry.deadline
    }

    /// Turn capture on or off. Turning it on moves `Disabled` to
    /// `Enabling`; the pipeline starts on the next tick.
    pub fn request_capture(&mut self, wanted: bool) {
        self.capture_wanted = wanted;
        if wanted {
            if self.state == DuplicationState::Disabled {
                self.state = DuplicationState::Enabling;
                tracing::info!("capture requested");
            }
            return;
        }
        if self.state != DuplicationState::Disabled {
            self.stop_pipeline();
            self.retry.disarm();
            self.state = DuplicationState::Disabled;
            tracing::info!("capture disabled");
        }
    }

    /// Desktop geometry changed; rebuild the pipeline on the next tick.
    pub fn display_changed(&mut self) {
        if !self.capture_wanted || self.state == DuplicationState::Disabled {
            return;
        }
        tracing::info!("display configuration changed, restarting capture");
        self.stop_pipeline();
        self.retry.disarm();
        self.state = DuplicationState::Enabling;
    }

    /// Presentation has room for another frame. Outputs whose update was
    /// consumed may capture again.
    pub fn frame_slot_available(&mut self) -> MirrorResult<()> {
        self.frame_slot = true;
        if self.state != DuplicationState::Enabled {
            return Ok(());
        }
        let acknowledged = std::mem::take(&mut self.awaiting_ack);
        if self.paused {
            self.held.extend(acknowledged);
            return Ok(());
        }
        self.request_next(&acknowledged)
    }

    pub fn set_paused(&mut self, paused: bool) -> MirrorResult<()> {
        if self.paused == paused {
            return Ok(());
        }
        self.paused = paused;
        tracing::debug!(paused, "capture pause toggled");
        if paused || self.state != DuplicationState::Enabled {
            return Ok(());
        }
        let held = std::mem::take(&mut self.held);
        self.request_next(&held)
    }

    pub fn toggle_pause(&mut self) -> MirrorResult<()> {
        self.set_paused(!self.paused)
    }

    pub fn move_offset(&mut self, dx: f32, dy: f32) {
        self.viewport.move_offset(dx, dy);
        self.needs_redraw = true;
    }

    pub fn change_zoom(&mut self, delta: f32) {
        self.viewport.change_zoom(delta);
        self.needs_redraw = true;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.viewport.set_zoom(zoom);
        self.needs_redraw = true;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport.request_resize(width, height);
        self.needs_redraw = true;
    }

    pub fn apply(&mut self, reaction: Reaction) -> MirrorResult<()> {
        match reaction {
            Reaction::MoveOffset { dx, dy } => self.move_offset(dx, dy),
            Reaction::ChangeZoom(delta) => self.change_zoom(delta),
            Reaction::SetZoom(zoom) => self.set_zoom(zoom),
            Reaction::TogglePause => self.toggle_pause()?,
            Reaction::Ignore => {}
        }
        Ok(())
    }

    /// One owner-thread scheduling step. Recoverable failures are absorbed
    /// into the retry cycle; anything else is returned.
    pub fn tick(&mut self, now: Instant) -> MirrorResult<()> {
        run_calls(self.inbox.take_ready(), &mut self.inbox_state)?;
        if let Some(error) = self.take_reported_error() {
            return self.fail(error, now);
        }

        if self.state == DuplicationState::Error && self.retry.fire(now) {
            MirrorStats::bump(&self.stats.retries);
            tracing::debug!("retrying capture start");
            self.state = DuplicationState::Enabling;
        }

        if self.state == DuplicationState::Enabling && self.capture_wanted {
            if let Err(error) = self.start_pipeline() {
                return self.fail(error, now);
            }
        }

        if self.state == DuplicationState::Enabled {
            if let Err(error) = self.present_pending() {
                return self.fail(error, now);
            }
        }
        Ok(())
    }

    fn take_reported_error(&mut self) -> Option<MirrorError> {
        let mut errors = std::mem::take(&mut self.inbox_state.errors);
        if self.state != DuplicationState::Enabled || errors.is_empty() {
            return None;
        }
        let first = errors.remove(0);
        for other in errors {
            tracing::debug!(error = %other, "additional capture error in the same tick");
        }
        Some(first)
    }

    fn start_pipeline(&mut self) -> MirrorResult<()> {
        let plans = match self.backend.start(&self.config.displays) {
            Ok(plans) => plans,
            Err(error) => {
                self.backend.stop();
                return Err(error);
            }
        };
        self.viewport.set_surface(self.backend.surface_size());

        for plan in plans {
            let output = plan.context.output.index;
            let mut thread = CaptureThread::new(output, self.config.capture_poll);
            let sink = ControllerSink {
                sender: self.inbox.sender(),
            };
            if let Err(error) = thread.start(plan.open, plan.context, sink) {
                self.threads.push(thread);
                self.stop_pipeline();
                return Err(error);
            }
            self.threads.push(thread);
        }

        self.state = DuplicationState::Enabled;
        self.frame_slot = true;
        self.needs_redraw = true;
        tracing::info!(
            outputs = self.threads.len(),
            surface = ?self.backend.surface_size(),
            "capture pipeline started"
        );
        Ok(())
    }

    fn stop_pipeline(&mut self) {
        for mut thread in self.threads.drain(..) {
            if let Err(error) = thread.stop() {
                tracing::warn!(output = thread.output(), %error, "capture thread did not stop cleanly");
            }
        }
        // Threads are joined, so nothing else can arrive for this run.
        if let Err(error) = run_calls(self.inbox.take_ready(), &mut self.inbox_state) {
            tracing::warn!(%error, "discarding late capture result after stop");
        }
        self.inbox_state.frames.clear();
        self.inbox_state.errors.clear();
        self.awaiting_ack.clear();
        self.held.clear();
        self.frame_slot = false;
        self.backend.stop();
    }

    fn fail(&mut self, error: MirrorError, now: Instant) -> MirrorResult<()> {
        if !error.is_recoverable() {
            tracing::warn!(%error, "unrecoverable capture failure");
            self.stop_pipeline();
            self.state = DuplicationState::Error;
            return Err(error);
        }
        MirrorStats::bump(&self.stats.recoverable_errors);
        tracing::debug!(%error, retry_in = ?self.config.retry_delay, "capture failed, retrying");
        self.stop_pipeline();
        self.state = DuplicationState::Error;
        self.retry.arm(now + self.config.retry_delay);
        Ok(())
    }

    fn present_pending(&mut self) -> MirrorResult<()> {
        let has_frames = !self.inbox_state.frames.is_empty();
        if !self.frame_slot || !(has_frames || self.needs_redraw) {
            return Ok(());
        }

        let mut composited: Vec<u32> = Vec::with_capacity(self.inbox_state.frames.len());
        for (output, pending) in self.inbox_state.frames.drain() {
            MirrorStats::bump(&self.stats.frames_received);
            self.backend.composite(&pending.context, &pending.update)?;
            self.pointer
                .update(&pending.update.pointer, &pending.context)?;
            MirrorStats::bump(&self.stats.frames_composited);
            composited.push(output);
        }
        composited.sort_unstable();

        if let Some(size) = self.viewport.take_pending_resize() {
            self.backend.resize(size)?;
        }
        self.backend.present(&self.viewport, &self.pointer)?;
        MirrorStats::bump(&self.stats.presents);

        self.frame_slot = false;
        self.needs_redraw = false;
        self.awaiting_ack.extend(composited);
        Ok(())
    }

    fn request_next(&mut self, outputs: &[u32]) -> MirrorResult<()> {
        for output in outputs {
            if let Some(thread) = self.threads.iter().find(|t| t.output() == *output) {
                thread.next()?;
            }
        }
        Ok(())
    }
}

impl<B: MirrorBackend> Drop for DuplicationController<B> {
    fn drop(&mut self) {
        if self.state != DuplicationState::Disabled {
            self.stop_pipeline();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameMetadata, OutputDesc, PointerMetadata};
    use crate::geometry::{Point, Rect, Rotation};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Shared {
        starts: Mutex<Vec<Instant>>,
        stops: AtomicUsize,
        composites: Mutex<Vec<u32>>,
        presents: AtomicUsize,
        resizes: Mutex<Vec<Size>>,
        captures: AtomicUsize,
        in_flight: Mutex<FxHashMap<u32, bool>>,
        overlapping_acquires: AtomicUsize,
        failures: AtomicUsize,
    }

    struct MockSource {
        output: u32,
        shared: Arc<Shared>,
        fail_capture: bool,
    }

    impl CaptureSource for MockSource {
        type Surface = u32;

        fn capture_update(&mut self) -> MirrorResult<Option<CapturedUpdate<u32>>> {
            if self.fail_capture {
                self.shared.failures.fetch_add(1, Ordering::SeqCst);
                return Err(MirrorError::AccessLost);
            }
            let mut in_flight = self.shared.in_flight.lock().unwrap();
            let holding = in_flight.entry(self.output).or_insert(false);
            if *holding {
                self.shared
                    .overlapping_acquires
                    .fetch_add(1, Ordering::SeqCst);
                return Ok(None);
            }
            *holding = true;
            self.shared.captures.fetch_add(1, Ordering::SeqCst);
            Ok(Some(CapturedUpdate {
                frame: FrameMetadata::default(),
                pointer: PointerMetadata {
                    update_time: 1,
                    visible: true,
                    position: Point::new(3, 4),
                    shape: None,
                },
                surface: Some(self.output),
            }))
        }

        fn release_frame(&mut self) -> MirrorResult<()> {
            self.shared
                .in_flight
                .lock()
                .unwrap()
                .insert(self.output, false);
            Ok(())
        }
    }

    struct MockBackend {
        shared: Arc<Shared>,
        /// Results handed out by successive `start` calls; empty means
        /// succeed.
        start_results: Vec<MirrorError>,
        fail_capture: bool,
    }

    impl MockBackend {
        fn new(shared: Arc<Shared>) -> Self {
            Self {
                shared,
                start_results: Vec::new(),
                fail_capture: false,
            }
        }
    }

    fn context(index: u32) -> FrameContext {
        FrameContext {
            offset: Point::default(),
            output: OutputDesc {
                index,
                name: format!("mock-{index}"),
                desktop_bounds: Rect::new(index as i32 * 64, 0, (index as i32 + 1) * 64, 64),
                rotation: Rotation::Identity,
            },
        }
    }

    impl MirrorBackend for MockBackend {
        type Source = MockSource;

        fn start(&mut self, displays: &[u32]) -> MirrorResult<Vec<OutputPlan<MockSource>>> {
            self.shared.starts.lock().unwrap().push(Instant::now());
            if !self.start_results.is_empty() {
                return Err(self.start_results.remove(0));
            }
            Ok(displays
                .iter()
                .map(|&index| {
                    let shared = self.shared.clone();
                    let fail_capture = self.fail_capture;
                    OutputPlan {
                        context: context(index),
                        open: Box::new(move |_ctx: &FrameContext| {
                            Ok(MockSource {
                                output: index,
                                shared,
                                fail_capture,
                            })
                        }) as SourceFactory<MockSource>,
                    }
                })
                .collect())
        }

        fn stop(&mut self) {
            self.shared.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn surface_size(&self) -> Size {
            Size::new(128, 64)
        }

        fn composite(
            &mut self,
            context: &FrameContext,
            update: &CapturedUpdate<u32>,
        ) -> MirrorResult<()> {
            assert_eq!(update.surface, Some(context.output.index));
            self.shared
                .composites
                .lock()
                .unwrap()
                .push(context.output.index);
            Ok(())
        }

        fn resize(&mut self, size: Size) -> MirrorResult<()> {
            self.shared.resizes.lock().unwrap().push(size);
            Ok(())
        }

        fn present(&mut self, _viewport: &Viewport, _pointer: &PointerBuffer) -> MirrorResult<()> {
            self.shared.presents.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(displays: Vec<u32>) -> MirrorConfig {
        MirrorConfig::builder()
            .displays(displays)
            .retry_delay(Duration::from_millis(250))
            .capture_poll(Duration::from_millis(1))
            .build()
            .unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    /// Wait until capture threads produced `captures` updates in total and
    /// their posts landed, then run one tick.
    fn settle<B: MirrorBackend>(
        controller: &mut DuplicationController<B>,
        shared: &Shared,
        captures: usize,
    ) {
        assert!(wait_for(|| shared.captures.load(Ordering::SeqCst) >= captures));
        std::thread::sleep(Duration::from_millis(20));
        controller.tick(Instant::now()).unwrap();
    }

    fn started(shared: &Arc<Shared>, displays: Vec<u32>) -> DuplicationController<MockBackend> {
        let mut controller =
            DuplicationController::new(MockBackend::new(shared.clone()), config(displays))
                .unwrap();
        controller.request_capture(true);
        controller.tick(Instant::now()).unwrap();
        assert_eq!(controller.state(), DuplicationState::Enabled);
        // The start-up redraw took the first slot.
        assert_eq!(shared.presents.load(Ordering::SeqCst), 1);
        controller.frame_slot_available().unwrap();
        controller
    }

    #[test]
    fn at_most_one_update_in_flight_per_output() {
        let shared = Arc::new(Shared::default());
        let mut controller = started(&shared, vec![0, 1]);

        for round in 1..=5usize {
            settle(&mut controller, &shared, 2 * round);
            assert_eq!(shared.composites.lock().unwrap().len(), 2 * round);
            // Without a free presentation slot nothing new is requested.
            std::thread::sleep(Duration::from_millis(20));
            controller.tick(Instant::now()).unwrap();
            assert_eq!(shared.captures.load(Ordering::SeqCst), 2 * round);
            controller.frame_slot_available().unwrap();
        }

        assert_eq!(shared.overlapping_acquires.load(Ordering::SeqCst), 0);
        assert_eq!(controller.stats().frames_composited, 10);
        assert_eq!(controller.stats().presents, 6);
        controller.request_capture(false);
        assert_eq!(controller.state(), DuplicationState::Disabled);
    }

    #[test]
    fn recoverable_start_failure_waits_for_retry_delay() {
        let shared = Arc::new(Shared::default());
        let mut backend = MockBackend::new(shared.clone());
        backend.start_results = vec![MirrorError::Transient(anyhow::anyhow!("device removed"))];
        let mut controller = DuplicationController::new(backend, config(vec![0])).unwrap();

        let t0 = Instant::now();
        controller.request_capture(true);
        controller.tick(t0).unwrap();
        assert_eq!(controller.state(), DuplicationState::Error);
        assert_eq!(controller.next_deadline(), Some(t0 + Duration::from_millis(250)));

        controller.tick(t0 + Duration::from_millis(100)).unwrap();
        controller.tick(t0 + Duration::from_millis(249)).unwrap();
        assert_eq!(shared.starts.lock().unwrap().len(), 1);
        assert_eq!(controller.state(), DuplicationState::Error);

        controller.tick(t0 + Duration::from_millis(250)).unwrap();
        assert_eq!(shared.starts.lock().unwrap().len(), 2);
        assert_eq!(controller.state(), DuplicationState::Enabled);
        assert_eq!(controller.next_deadline(), None);
        assert_eq!(controller.stats().retries, 1);
    }

    #[test]
    fn errors_from_several_outputs_arm_a_single_retry() {
        let shared = Arc::new(Shared::default());
        let mut backend = MockBackend::new(shared.clone());
        backend.fail_capture = true;
        let mut controller =
            DuplicationController::new(backend, config(vec![0, 1, 2])).unwrap();
        controller.request_capture(true);
        controller.tick(Instant::now()).unwrap();
        assert_eq!(controller.state(), DuplicationState::Enabled);

        // Let every thread fault before the owner looks at its inbox.
        let deadline = Instant::now() + Duration::from_secs(5);
        while shared.failures.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(20));

        let t0 = Instant::now();
        controller.tick(t0).unwrap();
        assert_eq!(controller.state(), DuplicationState::Error);
        let armed = controller.next_deadline();
        assert_eq!(armed, Some(t0 + Duration::from_millis(250)));

        // A late failure report must not push the timer around.
        controller
            .fail(MirrorError::AccessLost, t0 + Duration::from_millis(10))
            .unwrap();
        assert_eq!(controller.next_deadline(), armed);

        controller.tick(t0 + Duration::from_millis(200)).unwrap();
        assert_eq!(shared.starts.lock().unwrap().len(), 1);
        controller.tick(t0 + Duration::from_millis(260)).unwrap();
        assert_eq!(shared.starts.lock().unwrap().len(), 2);
        assert_eq!(controller.stats().retries, 1);
    }

    #[test]
    fn unexpected_start_failure_is_returned() {
        let shared = Arc::new(Shared::default());
        let mut backend = MockBackend::new(shared.clone());
        backend.start_results = vec![MirrorError::Platform(anyhow::anyhow!("no device"))];
        let mut controller = DuplicationController::new(backend, config(vec![0])).unwrap();
        controller.request_capture(true);
        let err = controller.tick(Instant::now()).unwrap_err();
        assert!(!err.is_recoverable());
        assert_eq!(controller.next_deadline(), None);
    }

    #[test]
    fn pause_holds_next_and_unpause_releases_it() {
        let shared = Arc::new(Shared::default());
        let mut controller = started(&shared, vec![0]);
        settle(&mut controller, &shared, 1);
        assert_eq!(shared.composites.lock().unwrap().len(), 1);

        controller.set_paused(true).unwrap();
        controller.frame_slot_available().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        controller.tick(Instant::now()).unwrap();
        assert_eq!(shared.captures.load(Ordering::SeqCst), 1);

        controller.set_paused(false).unwrap();
        settle(&mut controller, &shared, 2);
        assert_eq!(shared.composites.lock().unwrap().len(), 2);
    }

    #[test]
    fn resize_is_applied_before_the_next_present() {
        let shared = Arc::new(Shared::default());
        let mut controller = started(&shared, vec![0]);
        settle(&mut controller, &shared, 1);
        assert_eq!(shared.presents.load(Ordering::SeqCst), 2);

        controller.resize(800, 600);
        controller.tick(Instant::now()).unwrap();
        assert!(shared.resizes.lock().unwrap().is_empty());

        controller.set_paused(true).unwrap();
        controller.frame_slot_available().unwrap();
        controller.tick(Instant::now()).unwrap();
        assert_eq!(
            shared.resizes.lock().unwrap().as_slice(),
            [Size::new(800, 600)]
        );
        assert_eq!(shared.presents.load(Ordering::SeqCst), 3);
        assert_eq!(controller.viewport().surface(), Size::new(128, 64));
    }

    #[test]
    fn display_change_restarts_the_pipeline() {
        let shared = Arc::new(Shared::default());
        let mut controller =
            DuplicationController::new(MockBackend::new(shared.clone()), config(vec![0]))
                .unwrap();
        controller.request_capture(true);
        controller.tick(Instant::now()).unwrap();
        controller.display_changed();
        assert_eq!(controller.state(), DuplicationState::Enabling);
        assert_eq!(shared.stops.load(Ordering::SeqCst), 1);
        controller.tick(Instant::now()).unwrap();
        assert_eq!(controller.state(), DuplicationState::Enabled);
        assert_eq!(shared.starts.lock().unwrap().len(), 2);
    }
}
