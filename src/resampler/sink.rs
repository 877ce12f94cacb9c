use std::sync::mpsc::{self, Receiver, Sender};

/// Downstream consumer of resampled motion
///
/// `on_sample` runs on the resampler's own context, once per tick. Sinks
/// that must run elsewhere (a render thread, a bevy system) should hand the
/// values off without blocking, e.g. through a [`ChannelSink`].
pub trait MotionSink: Send + 'static {
    fn on_sample(&mut self, values: Vec<f32>);
}

impl<F> MotionSink for F
where
    F: FnMut(Vec<f32>) + Send + 'static,
{
    fn on_sample(&mut self, values: Vec<f32>) {
        self(values)
    }
}

/// Forwards every tick to another execution context over an mpsc channel
///
/// Sending never blocks, and the channel preserves tick order.
#[derive(Clone)]
pub struct ChannelSink {
    sender: Sender<Vec<f32>>,
}

impl ChannelSink {
    pub fn new(sender: Sender<Vec<f32>>) -> Self {
        Self { sender }
    }

    /// Create a sink together with the receiving end
    pub fn pair() -> (Self, Receiver<Vec<f32>>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl MotionSink for ChannelSink {
    fn on_sample(&mut self, values: Vec<f32>) {
        // Receiver gone means nobody is rendering; drop the frame
        let _ = self.sender.send(values);
    }
}
