use std::time::Duration;

use crate::env_config::{env_var_positive_f32, env_var_positive_u64, env_var_u32_list};
use crate::error::{MirrorError, MirrorResult};

/// Smallest zoom the presentation surface accepts.
pub const MIN_ZOOM: f32 = 0.05;

#[derive(Clone, Debug, PartialEq)]
pub struct MirrorConfig {
    /// Output indices on the capture adapter to mirror. Their desktop
    /// bounds are unioned into one shared surface.
    pub displays: Vec<u32>,
    /// Initial presentation zoom.
    pub zoom: f32,
    /// Delay before re-entering `Enabling` after an expected failure.
    pub retry_delay: Duration,
    /// Timeout handed to each `AcquireNextFrame` call.
    pub acquire_timeout: Duration,
    /// How long a capturing thread waits for deferred calls between
    /// acquire attempts.
    pub capture_poll: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            displays: vec![0],
            zoom: 1.0,
            retry_delay: Duration::from_millis(250),
            acquire_timeout: Duration::from_millis(16),
            capture_poll: Duration::from_millis(1),
        }
    }
}

impl MirrorConfig {
    pub fn builder() -> MirrorConfigBuilder {
        MirrorConfigBuilder::new()
    }

    /// Defaults overlaid with `SNOW_MIRROR_DISPLAYS`, `SNOW_MIRROR_ZOOM` and
    /// `SNOW_MIRROR_RETRY_MS`. Malformed values are ignored.
    pub fn from_env() -> MirrorResult<Self> {
        let mut builder = Self::builder();
        if let Some(displays) = env_var_u32_list("SNOW_MIRROR_DISPLAYS") {
            builder = builder.displays(displays);
        }
        if let Some(zoom) = env_var_positive_f32("SNOW_MIRROR_ZOOM") {
            builder = builder.zoom(zoom);
        }
        if let Some(ms) = env_var_positive_u64("SNOW_MIRROR_RETRY_MS") {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }
        builder.build()
    }

    pub fn validate(&self) -> MirrorResult<()> {
        if self.displays.is_empty() {
            return Err(MirrorError::InvalidConfig(
                "at least one display index is required".to_string(),
            ));
        }
        let mut seen = self.displays.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.displays.len() {
            return Err(MirrorError::InvalidConfig(format!(
                "display indices must be unique: {:?}",
                self.displays
            )));
        }
        if !(self.zoom.is_finite() && self.zoom > 0.0) {
            return Err(MirrorError::InvalidConfig(format!(
                "zoom must be positive, got {}",
                self.zoom
            )));
        }
        if self.retry_delay.is_zero() {
            return Err(MirrorError::InvalidConfig(
                "retry delay must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct MirrorConfigBuilder {
    config: MirrorConfig,
}

impl MirrorConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: MirrorConfig::default(),
        }
    }

    pub fn displays(mut self, displays: impl Into<Vec<u32>>) -> Self {
        self.config.displays = displays.into();
        self
    }

    /// Initial zoom. Values below [`MIN_ZOOM`] are clamped when the
    /// viewport is created.
    pub fn zoom(mut self, zoom: f32) -> Self {
        self.config.zoom = zoom;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    pub fn capture_poll(mut self, poll: Duration) -> Self {
        self.config.capture_poll = poll;
        self
    }

    pub fn build(self) -> MirrorResult<MirrorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for MirrorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MirrorConfig::builder().build().unwrap();
        assert_eq!(config.displays, vec![0]);
        assert_eq!(config.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn rejects_empty_and_duplicate_displays() {
        let err = MirrorConfig::builder().displays(vec![]).build().unwrap_err();
        assert!(matches!(err, MirrorError::InvalidConfig(_)));

        let err = MirrorConfig::builder()
            .displays(vec![1, 0, 1])
            .build()
            .unwrap_err();
        assert!(matches!(err, MirrorError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_non_positive_zoom() {
        for zoom in [0.0, -1.0, f32::NAN] {
            let err = MirrorConfig::builder().zoom(zoom).build().unwrap_err();
            assert!(matches!(err, MirrorError::InvalidConfig(_)), "{zoom}");
        }
    }
}
