use crate::sample::Sample;
use std::collections::VecDeque;

/// Time-ordered window of recent samples
///
/// Invariants:
/// - arrival times are non-decreasing front to back
/// - at most `max_frames` entries
/// - every entry has the same vector length
pub struct JitterBuffer {
    samples: VecDeque<Sample>,
    max_frames: usize,
}

impl JitterBuffer {
    pub fn new(max_frames: usize) -> Self {
        assert!(max_frames >= 1, "jitter buffer needs at least one frame");
        Self {
            samples: VecDeque::with_capacity(max_frames + 1),
            max_frames,
        }
    }

    /// Insert a sample in time order and evict the oldest beyond capacity
    ///
    /// Panics if the vector length differs from what is already buffered.
    pub fn push(&mut self, sample: Sample) {
        if let Some(newest) = self.samples.back() {
            assert_eq!(
                newest.len(),
                sample.len(),
                "motion sample length changed mid-stream"
            );
        }

        let time = sample.arrival_time();
        match self.samples.back() {
            Some(newest) if time < newest.arrival_time() => {
                // Late arrival: keep the buffer ordered
                let index = self
                    .samples
                    .partition_point(|s| s.arrival_time() <= time);
                self.samples.insert(index, sample);
            }
            _ => self.samples.push_back(sample),
        }

        self.evict();
    }

    /// Replace the contents with a single sample
    pub fn seed(&mut self, sample: Sample) {
        self.samples.clear();
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Change the depth, evicting immediately if it shrank
    pub fn set_max_frames(&mut self, max_frames: usize) {
        assert!(max_frames >= 1, "jitter buffer needs at least one frame");
        self.max_frames = max_frames;
        self.evict();
    }

    fn evict(&mut self) {
        while self.samples.len() > self.max_frames {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Reconstruct the value at `render_time`
    ///
    /// - before all data: the oldest sample, unmodified
    /// - bracketed: linear interpolation between the two neighbours
    /// - past the newest: velocity extrapolation, at most `max_prediction`
    ///   seconds beyond the newest sample
    ///
    /// Returns `None` only when the buffer is empty.
    pub fn sample_at(&self, render_time: f64, max_prediction: f64) -> Option<Vec<f32>> {
        let oldest = self.samples.front()?;

        // Number of samples at or before render_time
        let count_before = self
            .samples
            .partition_point(|s| s.arrival_time() <= render_time);

        if count_before == 0 {
            return Some(oldest.values().to_vec());
        }

        let prev_index = count_before - 1;
        let prev = &self.samples[prev_index];

        if let Some(next) = self.samples.get(prev_index + 1) {
            let span = next.arrival_time() - prev.arrival_time();
            if span == 0.0 {
                return Some(prev.values().to_vec());
            }
            let t = ((render_time - prev.arrival_time()) / span).clamp(0.0, 1.0);
            return Some(lerp(prev.values(), next.values(), t as f32));
        }

        // Consumer has caught up with the producer
        if prev_index == 0 {
            return Some(prev.values().to_vec());
        }
        let before_prev = &self.samples[prev_index - 1];
        Some(extrapolate(before_prev, prev, render_time, max_prediction))
    }
}

/// Element-wise `a + (b - a) * t`; `t` outside [0, 1] extrapolates
pub fn lerp(a: &[f32], b: &[f32], t: f32) -> Vec<f32> {
    a.iter().zip(b).map(|(&a, &b)| a + (b - a) * t).collect()
}

/// Linear prediction past `prev`, horizon clamped to `max_prediction`
///
/// Expressed as an overshooting lerp from `before_prev` through `prev`.
pub fn extrapolate(before_prev: &Sample, prev: &Sample, render_time: f64, max_prediction: f64) -> Vec<f32> {
    let dt = prev.arrival_time() - before_prev.arrival_time();
    if dt <= 0.0 {
        return prev.values().to_vec();
    }

    let dt_pred = (render_time - prev.arrival_time()).min(max_prediction);
    if dt_pred <= 0.0 {
        return prev.values().to_vec();
    }

    let factor = dt_pred / dt;
    lerp(before_prev.values(), prev.values(), (1.0 + factor) as f32)
}
