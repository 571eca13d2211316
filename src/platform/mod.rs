use crate::config::MirrorConfig;
use crate::error::MirrorResult;
#[cfg(not(target_os = "windows"))]
use crate::error::MirrorError;
use crate::frame::OutputDesc;

#[cfg(target_os = "windows")]
pub(crate) mod windows;

#[cfg(not(target_os = "windows"))]
fn unsupported_error() -> MirrorError {
    MirrorError::Unsupported("desktop mirroring is only supported on Windows".to_string())
}

#[cfg(target_os = "windows")]
pub(crate) fn enumerate_outputs() -> MirrorResult<Vec<OutputDesc>> {
    windows::monitor::enumerate_outputs()
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn enumerate_outputs() -> MirrorResult<Vec<OutputDesc>> {
    Err(unsupported_error())
}

#[cfg(target_os = "windows")]
pub(crate) fn run(config: MirrorConfig) -> MirrorResult<()> {
    windows::window::run(config)
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn run(_config: MirrorConfig) -> MirrorResult<()> {
    Err(unsupported_error())
}

#[cfg(all(test, not(target_os = "windows")))]
mod tests {
    use super::*;

    #[test]
    fn non_windows_reports_unsupported() {
        assert!(matches!(
            enumerate_outputs(),
            Err(MirrorError::Unsupported(_))
        ));
        assert!(matches!(
            run(MirrorConfig::default()),
            Err(MirrorError::Unsupported(_))
        ));
    }
}
