use crate::error::{RelayError, Result};
use crate::receiver::{ConnectionState, MotionConsumer};
use crate::resampler::{MotionSink, Resampler, ResamplerSettings, SettingsHandle};
use crate::sample::{MotionClock, Sample};
use crate::smoothing_policy::{derive_settings, is_enabled};
use bevy::log::info;
use std::sync::{Arc, Mutex, MutexGuard};

struct Route {
    smoothing: f64,
    /// Next resampled sample must reseed the buffer
    fresh: bool,
}

struct PipelineShared {
    resampler: Resampler,
    bypass: Mutex<Box<dyn MotionSink>>,
    // Held while a resampler command is sent so a disable can't be overtaken
    route: Mutex<Route>,
    output_hz: f64,
}

/// Routes decoded samples either through the resampler or straight to the sink
///
/// Cloning is cheap; every clone drives the same resampler.
#[derive(Clone)]
pub struct MotionPipeline {
    shared: Arc<PipelineShared>,
}

impl MotionPipeline {
    pub fn new(
        sink: impl MotionSink + Clone,
        clock: MotionClock,
        smoothing: f64,
        output_hz: f64,
    ) -> Result<Self> {
        let smoothing = clamp_amount(smoothing);
        let settings = SettingsHandle::new(derive_settings(smoothing, output_hz));
        let resampler = Resampler::new(settings, clock, sink.clone()).map_err(|source| {
            RelayError::Spawn {
                name: "motion-resampler",
                source,
            }
        })?;

        Ok(Self {
            shared: Arc::new(PipelineShared {
                resampler,
                bypass: Mutex::new(Box::new(sink)),
                route: Mutex::new(Route {
                    smoothing,
                    fresh: true,
                }),
                output_hz,
            }),
        })
    }

    pub fn smoothing(&self) -> f64 {
        self.route().smoothing
    }

    /// Retune the resampler live; at zero, samples bypass it
    pub fn set_smoothing(&self, amount: f64) {
        let amount = clamp_amount(amount);
        let mut route = self.route();
        let was_enabled = is_enabled(route.smoothing);
        route.smoothing = amount;

        self.shared
            .resampler
            .settings()
            .store(derive_settings(amount, self.shared.output_hz));

        if was_enabled && !is_enabled(amount) {
            info!("smoothing disabled, bypassing resampler");
            self.shared.resampler.stop();
            route.fresh = true;
        }
    }

    pub fn settings(&self) -> Arc<ResamplerSettings> {
        self.shared.resampler.settings().load()
    }

    fn route(&self) -> MutexGuard<'_, Route> {
        match self.shared.route.lock() {
            Ok(route) => route,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MotionConsumer for MotionPipeline {
    fn on_sample(&mut self, sample: Sample) {
        {
            let mut route = self.route();
            if is_enabled(route.smoothing) {
                if route.fresh {
                    route.fresh = false;
                    self.shared.resampler.reset(Some(sample));
                } else {
                    self.shared.resampler.push(sample);
                }
                return;
            }
        }

        if let Ok(mut sink) = self.shared.bypass.lock() {
            sink.on_sample(sample.into_values());
        }
    }

    fn on_state_change(&mut self, state: ConnectionState) {
        if state != ConnectionState::Connected {
            let mut route = self.route();
            self.shared.resampler.stop();
            route.fresh = true;
        }
    }
}

fn clamp_amount(amount: f64) -> f64 {
    if amount.is_finite() {
        amount.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
