use std::sync::Arc;
use std::time::Instant;

/// Monotonic clock shared by the receiver and the resampler
///
/// Arrival times and render times are both expressed as seconds since the
/// same epoch, so the jitter buffer can compare them directly.
#[derive(Clone, Debug)]
pub struct MotionClock {
    epoch: Arc<Instant>,
}

impl MotionClock {
    pub fn new() -> Self {
        Self {
            epoch: Arc::new(Instant::now()),
        }
    }

    /// Seconds elapsed since the clock was created
    pub fn now_secs(&self) -> f64 {
        self.secs_at(Instant::now())
    }

    /// Convert an `Instant` into clock seconds (clamped at the epoch)
    pub fn secs_at(&self, instant: Instant) -> f64 {
        instant
            .saturating_duration_since(*self.epoch)
            .as_secs_f64()
    }
}

impl Default for MotionClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One timestamped motion sample
///
/// `values` is an opaque fixed-length vector; its length is constant for
/// the lifetime of a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    arrival_time: f64,
    values: Vec<f32>,
}

impl Sample {
    pub fn new(arrival_time: f64, values: Vec<f32>) -> Self {
        Self {
            arrival_time,
            values,
        }
    }

    pub fn arrival_time(&self) -> f64 {
        self.arrival_time
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_clock_converts_instants() {
        let clock = MotionClock::new();
        let later = Instant::now() + Duration::from_millis(250);

        let secs = clock.secs_at(later);
        assert!(secs >= 0.25);
        assert!(secs < 1.0);
    }

    #[test]
    fn test_clock_clones_share_epoch() {
        let clock = MotionClock::new();
        let copy = clock.clone();
        let at = Instant::now();

        assert_eq!(clock.secs_at(at), copy.secs_at(at));
    }
}
