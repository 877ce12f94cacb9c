pub mod config;
pub mod error;
pub mod net_util;
pub mod pipeline;
pub mod plugin;
pub mod protocol;
pub mod receiver;
pub mod resampler;
pub mod sample;
pub mod simulator;
pub mod smoother;
pub mod smoothing_policy;
pub mod transport;

pub use config::StreamConfig;
pub use error::{RelayError, Result};
pub use pipeline::MotionPipeline;
pub use plugin::{LatestMotion, MotionOutput, MotionStream, MotionStreamPlugin, StreamStatus};
pub use receiver::{ConnectionState, MotionConsumer, MotionReceiver};
pub use resampler::{MotionSink, Resampler, ResamplerSettings};
pub use sample::{MotionClock, Sample};
pub use smoother::{SmoothingProfile, WeightedSmoother};
