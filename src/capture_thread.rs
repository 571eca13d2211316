//! One OS thread per captured output.
//!
//! The thread owns its capture session for its whole life: the session is
//! opened inside the thread so per-thread platform state (desktop
//! attachment, COM apartment, device) never crosses threads. All control
//! flows in through deferred calls that only run while the thread waits.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::deferred::{DeferredQueue, DeferredSender, run_calls};
use crate::error::{MirrorError, MirrorResult};
use crate::frame::{CapturedUpdate, FrameContext};

/// A duplication session bound to one output.
pub trait CaptureSource: 'static {
    /// GPU surface handed to the owner alongside dirty rectangles.
    type Surface: Send + 'static;

    /// Try to acquire the next frame. `Ok(None)` means nothing changed
    /// within the acquire timeout.
    fn capture_update(&mut self) -> MirrorResult<Option<CapturedUpdate<Self::Surface>>>;

    /// Give the previously acquired frame back to the OS.
    fn release_frame(&mut self) -> MirrorResult<()>;
}

/// Receives what a capture thread produces. Implementations forward onto
/// the owner thread; nothing here runs on the owner directly.
pub trait CaptureSink<T>: Send + 'static {
    fn on_frame(
        &self,
        update: CapturedUpdate<T>,
        context: FrameContext,
        output: u32,
    ) -> MirrorResult<()>;

    fn on_error(&self, error: MirrorError);
}

/// Opens the session for an output, on the capture thread.
pub type SourceFactory<S> = Box<dyn FnOnce(&FrameContext) -> MirrorResult<S> + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Stopped,
    Capturing,
    Faulted,
}

impl ThreadStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Capturing,
            2 => Self::Faulted,
            _ => Self::Stopped,
        }
    }
}

struct LoopState<S> {
    session: Option<S>,
    keep_running: bool,
    should_capture: bool,
}

pub struct CaptureThread<S: CaptureSource> {
    output: u32,
    poll: Duration,
    sender: Option<DeferredSender<LoopState<S>>>,
    join_handle: Option<JoinHandle<()>>,
    status: Arc<AtomicU8>,
}

impl<S: CaptureSource> CaptureThread<S> {
    /// `poll` bounds how long the thread waits for deferred calls between
    /// acquire attempts while it still wants a frame.
    pub fn new(output: u32, poll: Duration) -> Self {
        Self {
            output,
            poll,
            sender: None,
            join_handle: None,
            status: Arc::new(AtomicU8::new(ThreadStatus::Stopped as u8)),
        }
    }

    pub fn output(&self) -> u32 {
        self.output
    }

    pub fn status(&self) -> ThreadStatus {
        ThreadStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.join_handle.is_some()
    }

    /// Spawn the capture loop. A loop that is still running is stopped and
    /// joined first, so two loops never share one handle.
    pub fn start<K>(
        &mut self,
        open: SourceFactory<S>,
        context: FrameContext,
        sink: K,
    ) -> MirrorResult<()>
    where
        K: CaptureSink<S::Surface>,
    {
        if self.is_running() {
            self.stop()?;
        }

        let queue = DeferredQueue::<LoopState<S>>::new();
        self.sender = Some(queue.sender());
        self.status
            .store(ThreadStatus::Capturing as u8, Ordering::Release);

        let status = self.status.clone();
        let output = self.output;
        let poll = self.poll;
        let join_handle = std::thread::Builder::new()
            .name(format!("snow-mirror-capture-{output}"))
            .spawn(move || {
                capture_loop(open, context, output, sink, queue, poll, &status);
            })
            .map_err(|e| {
                self.status
                    .store(ThreadStatus::Stopped as u8, Ordering::Release);
                MirrorError::Platform(anyhow::anyhow!(
                    "failed to spawn capture thread for output {output}: {e}"
                ))
            })?;
        self.join_handle = Some(join_handle);
        tracing::debug!(output, "capture thread started");
        Ok(())
    }

    /// Release the frame the owner just consumed and capture the next one.
    pub fn next(&self) -> MirrorResult<()> {
        let sender = self.sender.as_ref().ok_or(MirrorError::WorkerDead)?;
        sender.post(|state: &mut LoopState<S>| {
            if let Some(session) = state.session.as_mut() {
                session.release_frame()?;
            }
            state.should_capture = true;
            Ok(())
        })
    }

    /// Ask the loop to exit and join it.
    pub fn stop(&mut self) -> MirrorResult<()> {
        if let Some(sender) = self.sender.take() {
            // A loop that already exited has dropped its queue; joining is
            // all that is left to do.
            if let Err(error) = sender.post(|state: &mut LoopState<S>| {
                state.keep_running = false;
                Ok(())
            }) {
                tracing::debug!(output = self.output, %error, "capture loop already exited");
            }
        }
        let Some(join_handle) = self.join_handle.take() else {
            return Ok(());
        };
        let joined = join_handle.join();
        self.status
            .store(ThreadStatus::Stopped as u8, Ordering::Release);
        tracing::debug!(output = self.output, "capture thread joined");
        joined.map_err(|_| {
            tracing::warn!(output = self.output, "capture thread panicked");
            MirrorError::WorkerDead
        })
    }
}

impl<S: CaptureSource> Drop for CaptureThread<S> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            if let Err(error) = sender.post(|state: &mut LoopState<S>| {
                state.keep_running = false;
                Ok(())
            }) {
                tracing::debug!(output = self.output, %error, "capture loop already exited");
            }
        }
        if let Some(join_handle) = self.join_handle.take() {
            if join_handle.join().is_err() {
                tracing::warn!(output = self.output, "capture thread panicked");
            }
        }
    }
}

fn capture_loop<S, K>(
    open: SourceFactory<S>,
    context: FrameContext,
    output: u32,
    sink: K,
    queue: DeferredQueue<LoopState<S>>,
    poll: Duration,
    status: &AtomicU8,
) where
    S: CaptureSource,
    K: CaptureSink<S::Surface>,
{
    let mut state = LoopState {
        session: None,
        keep_running: true,
        should_capture: true,
    };

    if let Err(err) = run_capture(open, &context, output, &sink, &queue, poll, &mut state) {
        status.store(ThreadStatus::Faulted as u8, Ordering::Release);
        tracing::warn!(output, error = %err, "capture thread faulted");
        state.session = None;
        sink.on_error(err);
        // Parked: keep honoring deferred calls so `stop` can still land.
        while state.keep_running {
            if let Err(error) = run_calls(queue.wait_ready(None), &mut state) {
                tracing::debug!(output, %error, "deferred call failed while parked");
            }
        }
    }
}

fn run_capture<S, K>(
    open: SourceFactory<S>,
    context: &FrameContext,
    output: u32,
    sink: &K,
    queue: &DeferredQueue<LoopState<S>>,
    poll: Duration,
    state: &mut LoopState<S>,
) -> MirrorResult<()>
where
    S: CaptureSource,
    K: CaptureSink<S::Surface>,
{
    state.session = Some(open(context)?);

    while state.keep_running {
        if state.should_capture {
            if let Some(session) = state.session.as_mut() {
                if let Some(update) = session.capture_update()? {
                    state.should_capture = false;
                    sink.on_frame(update, context.clone(), output)?;
                }
            }
        }
        let timeout = state.should_capture.then_some(poll);
        run_calls(queue.wait_ready(timeout), state)?;
    }
    Ok(())
}
