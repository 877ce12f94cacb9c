use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Slowest supported tick rate (one frame every 10s)
pub const MIN_OUTPUT_HZ: f64 = 0.1;

pub const MAX_OUTPUT_HZ: f64 = 10_000.0;

/// Resampler tuning, re-read on every output tick
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ResamplerSettings {
    /// Output tick rate (>0)
    pub output_hz: f64,
    /// Seconds the render time lags behind now (>=0)
    pub buffer_delay: f64,
    /// Furthest extrapolation past the newest sample, in seconds (>=0)
    pub max_prediction: f64,
    /// Jitter buffer depth (>=1)
    pub max_frames: usize,
}

impl ResamplerSettings {
    /// Tick period, with the rate clamped into the supported range
    pub fn output_interval(&self) -> Duration {
        let hz = if self.output_hz >= MIN_OUTPUT_HZ {
            self.output_hz.min(MAX_OUTPUT_HZ)
        } else {
            MIN_OUTPUT_HZ
        };
        Duration::from_secs_f64(1.0 / hz)
    }

    /// Panics on values that would corrupt the tick math
    pub fn assert_valid(&self) {
        assert!(
            (MIN_OUTPUT_HZ..=MAX_OUTPUT_HZ).contains(&self.output_hz),
            "output_hz must be within {}..={}, got {}",
            MIN_OUTPUT_HZ,
            MAX_OUTPUT_HZ,
            self.output_hz
        );
        assert!(self.buffer_delay >= 0.0, "buffer_delay must be >= 0");
        assert!(self.max_prediction >= 0.0, "max_prediction must be >= 0");
        assert!(self.max_frames >= 1, "max_frames must be >= 1");
    }
}

impl Default for ResamplerSettings {
    fn default() -> Self {
        Self {
            output_hz: 60.0,
            buffer_delay: 0.03,
            max_prediction: 0.045,
            max_frames: 10,
        }
    }
}

/// Swappable settings snapshot
///
/// Readers take one `Arc` per tick; writers replace the whole snapshot, so a
/// tick never observes half an update.
#[derive(Clone, Debug)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<ResamplerSettings>>>,
}

impl SettingsHandle {
    pub fn new(settings: ResamplerSettings) -> Self {
        settings.assert_valid();
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn load(&self) -> Arc<ResamplerSettings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    pub fn store(&self, settings: ResamplerSettings) {
        settings.assert_valid();
        let next = Arc::new(settings);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
