use crate::resampler::ResamplerSettings;

/// Buffer delay at full smoothing (120ms)
pub const MAX_BUFFER_DELAY: f64 = 0.12;

/// Prediction horizon at full smoothing (180ms)
pub const MAX_PREDICTION: f64 = 0.18;

/// Jitter buffer depth, independent of the smoothing amount
pub const HISTORY_FRAMES: usize = 10;

/// Amounts at or below this bypass the resampler entirely
pub const ENABLE_THRESHOLD: f64 = 0.0001;

/// Map a normalized smoothing amount onto resampler tuning
///
/// The amount is eased in (squared) so the low end of the control stays
/// fine-grained and mostly disabled.
pub fn derive_settings(amount: f64, output_hz: f64) -> ResamplerSettings {
    let amount = if amount.is_finite() { amount.clamp(0.0, 1.0) } else { 0.0 };
    let eased = amount * amount;

    ResamplerSettings {
        output_hz,
        buffer_delay: eased * MAX_BUFFER_DELAY,
        max_prediction: eased * MAX_PREDICTION,
        max_frames: HISTORY_FRAMES,
    }
}

/// Whether samples should go through the resampler at all
pub fn is_enabled(amount: f64) -> bool {
    amount > ENABLE_THRESHOLD
}
