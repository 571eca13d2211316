pub mod capture_thread;
pub mod compose;
pub mod config;
pub mod controller;
pub mod deferred;
pub(crate) mod env_config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod input;
mod platform;
pub mod pointer;
pub mod stats;
pub mod viewport;

pub use capture_thread::{CaptureSink, CaptureSource, CaptureThread, ThreadStatus};
pub use config::{MirrorConfig, MirrorConfigBuilder};
pub use controller::{DuplicationController, DuplicationState, MirrorBackend, OutputPlan};
pub use error::{ErrorClass, MirrorError, MirrorResult};
pub use frame::{CapturedUpdate, FrameContext, FrameMetadata, OutputDesc, PointerMetadata};
pub use geometry::{Point, Rect, Rotation, Size};
pub use input::{InputEvent, InputRouter, Reaction};
pub use stats::{MirrorStats, MirrorStatsSnapshot};
pub use viewport::Viewport;

/// Describe the outputs of the default adapter in enumeration order.
pub fn enumerate_outputs() -> MirrorResult<Vec<OutputDesc>> {
    platform::enumerate_outputs()
}

/// Open the mirror window and run the owner loop until the window closes.
///
/// Blocks the calling thread, which becomes the owner thread of the
/// pipeline. Returns the first unrecoverable error.
pub fn run(config: MirrorConfig) -> MirrorResult<()> {
    config.validate()?;
    platform::run(config)
}
