use std::ops::{Add, Mul};

/// Any value that can be blended by a weighted sum
///
/// Covers `f32` and bevy's `Vec2`/`Vec3`/`Vec4`.
pub trait Blend: Copy + Add<Output = Self> + Mul<f32, Output = Self> {}

impl<T> Blend for T where T: Copy + Add<Output = T> + Mul<f32, Output = T> {}

/// Named weighting profiles as (tap count, decay constant)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmoothingProfile {
    /// Short window, nearly raw
    Light,
    Medium,
    /// Long window for very noisy estimates (e.g. head pose from a webcam)
    Heavy,
}

impl SmoothingProfile {
    pub fn parameters(self) -> (usize, f32) {
        match self {
            SmoothingProfile::Light => (3, 1.0),
            SmoothingProfile::Medium => (6, 2.0),
            SmoothingProfile::Heavy => (10, 4.0),
        }
    }
}

/// Fixed-window weighted moving average
///
/// Keeps the last N values in a ring and convolves them with exponential
/// weights `w[i] = exp(i / decay) / sum`, where tap 0 is the oldest slot and
/// tap N-1 the newest.
pub struct WeightedSmoother<T: Blend> {
    history: Vec<T>,
    weights: Vec<f32>,
    cursor: usize,
}

impl<T: Blend> WeightedSmoother<T> {
    pub fn with_profile(profile: SmoothingProfile, initial: T) -> Self {
        let (count, decay) = profile.parameters();
        Self::new(count, decay, initial)
    }

    /// Create a smoother with `count` taps, all slots seeded with `initial`
    pub fn new(count: usize, decay: f32, initial: T) -> Self {
        assert!(count > 0, "smoother needs at least one tap");
        assert!(decay > 0.0 && decay.is_finite(), "decay must be positive");

        let raw: Vec<f32> = (0..count).map(|i| (i as f32 / decay).exp()).collect();
        let total: f32 = raw.iter().sum();
        let weights = raw.into_iter().map(|w| w / total).collect();

        Self {
            history: vec![initial; count],
            weights,
            cursor: 0,
        }
    }

    /// Insert a value and return the smoothed estimate
    pub fn append(&mut self, value: T) -> T {
        self.history[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.history.len();
        self.current()
    }

    /// Fill every slot with `value`, dropping residual lag
    ///
    /// Call when tracking is lost or reacquired so the output does not slide
    /// in from a stale history.
    pub fn reset(&mut self, value: T) {
        self.history.fill(value);
        self.cursor = 0;
    }

    /// Weighted sum over the ring, oldest slot first
    pub fn current(&self) -> T {
        let len = self.history.len();
        let mut acc = self.history[self.cursor] * self.weights[0];
        for tap in 1..len {
            let slot = (self.cursor + tap) % len;
            acc = acc + self.history[slot] * self.weights[tap];
        }
        acc
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Vec3;

    #[test]
    fn test_weights_sum_to_one() {
        let smoother = WeightedSmoother::new(8, 2.5, 0.0f32);
        let sum: f32 = smoother.weights().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_newest_tap_weighs_most() {
        let smoother = WeightedSmoother::with_profile(SmoothingProfile::Medium, 0.0f32);
        let weights = smoother.weights();
        for pair in weights.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_reset_then_append_same_value() {
        let mut smoother = WeightedSmoother::with_profile(SmoothingProfile::Heavy, 0.0f32);
        for i in 0..20 {
            smoother.append(i as f32);
        }

        smoother.reset(0.5);
        let out = smoother.append(0.5);
        assert!((out - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_step_response_converges() {
        let mut smoother = WeightedSmoother::new(4, 1.0, 0.0f32);

        let first = smoother.append(1.0);
        assert!(first > 0.0 && first < 1.0);

        // Newest sample carries the largest single weight
        assert!((first - smoother.weights()[3]).abs() < 1e-6);

        let mut out = first;
        for _ in 0..3 {
            out = smoother.append(1.0);
        }
        assert!((out - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_vector_values() {
        let mut smoother = WeightedSmoother::with_profile(SmoothingProfile::Light, Vec3::ZERO);
        smoother.reset(Vec3::new(1.0, 2.0, 3.0));

        let out = smoother.append(Vec3::new(1.0, 2.0, 3.0));
        assert!((out - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);
    }

    #[test]
    fn test_single_tap_is_passthrough() {
        let mut smoother = WeightedSmoother::new(1, 1.0, 0.0f32);
        assert_eq!(smoother.append(7.0), 7.0);
        assert_eq!(smoother.append(-3.0), -3.0);
    }
}
