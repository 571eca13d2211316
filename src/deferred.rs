//! Cross-thread deferred calls.
//!
//! A thread that owns some state `T` hands out [`DeferredSender`]s. Other
//! threads post closures through them; the owner runs the closures against
//! its state only when it decides to, inside its own wait. The optional
//! waker lets an owner that blocks on something other than the channel (a
//! Win32 wait handle, for instance) be kicked when a call arrives.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::error::{MirrorError, MirrorResult};

pub type DeferredCall<T> = Box<dyn FnOnce(&mut T) -> MirrorResult<()> + Send>;

pub type Waker = Arc<dyn Fn() + Send + Sync>;

pub struct DeferredSender<T> {
    tx: Sender<DeferredCall<T>>,
    waker: Option<Waker>,
}

impl<T> Clone for DeferredSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            waker: self.waker.clone(),
        }
    }
}

impl<T> DeferredSender<T> {
    /// Queue `call` for the owner. Fails with `WorkerDead` once the owning
    /// queue has been dropped.
    pub fn post<F>(&self, call: F) -> MirrorResult<()>
    where
        F: FnOnce(&mut T) -> MirrorResult<()> + Send + 'static,
    {
        self.tx
            .send(Box::new(call))
            .map_err(|_| MirrorError::WorkerDead)?;
        if let Some(waker) = &self.waker {
            waker();
        }
        Ok(())
    }
}

pub struct DeferredQueue<T> {
    rx: Receiver<DeferredCall<T>>,
    tx: Sender<DeferredCall<T>>,
    waker: Option<Waker>,
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            rx,
            tx,
            waker: None,
        }
    }

    pub fn with_waker(waker: Waker) -> Self {
        Self {
            waker: Some(waker),
            ..Self::new()
        }
    }

    pub fn sender(&self) -> DeferredSender<T> {
        DeferredSender {
            tx: self.tx.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Calls that are already queued, oldest first.
    pub fn take_ready(&self) -> Vec<DeferredCall<T>> {
        self.rx.try_iter().collect()
    }

    /// Block until at least one call arrives or `timeout` elapses (`None`
    /// waits indefinitely), then return everything queued.
    pub fn wait_ready(&self, timeout: Option<Duration>) -> Vec<DeferredCall<T>> {
        let first = match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(call) => call,
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    return Vec::new();
                }
            },
            None => match self.rx.recv() {
                Ok(call) => call,
                Err(_) => return Vec::new(),
            },
        };
        let mut calls = vec![first];
        calls.extend(self.rx.try_iter());
        calls
    }
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `calls` in order against `target`. Every call runs; the first
/// failure is returned.
pub fn run_calls<T>(calls: Vec<DeferredCall<T>>, target: &mut T) -> MirrorResult<()> {
    let mut first_error = None;
    for call in calls {
        if let Err(err) = call(target) {
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
