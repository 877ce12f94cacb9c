// Jitter-buffering resampler
//
// Samples arrive at irregular times from the receiver; the resampler owns a
// worker thread that ticks at a fixed rate and reconstructs one output frame
// per tick from the buffered history:
// 1. render time = now - buffer delay
// 2. interpolate between the two samples bracketing the render time
// 3. extrapolate (bounded) when the consumer has outrun the producer
// 4. hand the frame to the sink

pub mod jitter_buffer;
pub mod settings;
pub mod sink;

pub use jitter_buffer::JitterBuffer;
pub use settings::{ResamplerSettings, SettingsHandle};
pub use sink::{ChannelSink, MotionSink};

use crate::sample::{MotionClock, Sample};
use bevy::log::{debug, info};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Commands marshalled onto the resampler thread
enum Command {
    Push(Sample),
    Reset(Option<Sample>),
    Stop,
    Shutdown,
}

/// Buffer plus tick state, driven by the worker thread
///
/// Kept free of threads and clocks so the tick math can be exercised with
/// explicit times.
pub struct ResamplerCore {
    buffer: JitterBuffer,
    ticking: bool,
}

impl ResamplerCore {
    pub fn new(max_frames: usize) -> Self {
        Self {
            buffer: JitterBuffer::new(max_frames),
            ticking: false,
        }
    }

    /// Buffer a sample and start ticking
    pub fn push(&mut self, sample: Sample) {
        self.buffer.push(sample);
        self.ticking = true;
    }

    /// Clear the history, optionally re-seeding it and restarting the tick
    pub fn reset(&mut self, seed: Option<Sample>) {
        match seed {
            Some(sample) => {
                self.buffer.seed(sample);
                self.ticking = true;
            }
            None => self.buffer.clear(),
        }
    }

    pub fn stop(&mut self) {
        self.buffer.clear();
        self.ticking = false;
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking
    }

    pub fn buffer(&self) -> &JitterBuffer {
        &self.buffer
    }

    /// Compute one output frame for clock time `now`
    pub fn tick(&mut self, now: f64, settings: &ResamplerSettings) -> Option<Vec<f32>> {
        if self.buffer.max_frames() != settings.max_frames {
            self.buffer.set_max_frames(settings.max_frames);
        }

        let render_time = now - settings.buffer_delay;
        self.buffer.sample_at(render_time, settings.max_prediction)
    }
}

/// Fixed-rate resampler with its own serialized execution context
///
/// `push`, `reset` and `stop` return immediately; the buffer mutation runs
/// on the worker thread, totally ordered with the ticks.
pub struct Resampler {
    commands: Sender<Command>,
    settings: SettingsHandle,
    frame_len: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Resampler {
    /// Spawn the worker; the tick stays idle until the first push
    pub fn new(settings: SettingsHandle, clock: MotionClock, sink: impl MotionSink) -> io::Result<Self> {
        let (commands, receiver) = mpsc::channel();
        let worker_settings = settings.clone();
        let mut sink: Box<dyn MotionSink> = Box::new(sink);

        let worker = thread::Builder::new()
            .name("motion-resampler".into())
            .spawn(move || {
                let mut core = ResamplerCore::new(worker_settings.load().max_frames);
                let mut next_tick: Option<Instant> = None;

                loop {
                    let message = match next_tick {
                        Some(deadline) => {
                            let wait = deadline.saturating_duration_since(Instant::now());
                            receiver.recv_timeout(wait)
                        }
                        None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match message {
                        Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        Ok(command) => {
                            let restart = matches!(command, Command::Reset(Some(_)));
                            apply(&mut core, command);

                            if !core.is_ticking() {
                                next_tick = None;
                            } else if next_tick.is_none() || restart {
                                let interval = worker_settings.load().output_interval();
                                next_tick = Some(Instant::now() + interval);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let settings = worker_settings.load();
                            if let Some(values) = core.tick(clock.now_secs(), &settings) {
                                sink.on_sample(values);
                            }
                            next_tick = next_tick.map(|deadline| {
                                schedule_next(deadline, settings.output_interval(), Instant::now())
                            });
                        }
                    }
                }
                debug!("resampler worker exiting");
            })?;

        Ok(Self {
            commands,
            settings,
            frame_len: Arc::new(AtomicUsize::new(0)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a sample for the jitter buffer; starts the tick if idle
    ///
    /// Panics if the vector length differs from earlier pushes.
    pub fn push(&self, sample: Sample) {
        self.check_len(&sample);
        let _ = self.commands.send(Command::Push(sample));
    }

    /// Clear the buffer; a seed sample restarts the tick from fresh data
    pub fn reset(&self, seed: Option<Sample>) {
        if let Some(sample) = &seed {
            self.check_len(sample);
        }
        let _ = self.commands.send(Command::Reset(seed));
    }

    /// Cancel the tick and clear the buffer
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    fn check_len(&self, sample: &Sample) {
        let len = sample.len();
        match self
            .frame_len
            .compare_exchange(0, len, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {}
            Err(expected) => assert_eq!(
                expected, len,
                "motion sample length changed from {} to {}",
                expected, len
            ),
        }
    }
}

impl Drop for Resampler {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn apply(core: &mut ResamplerCore, command: Command) {
    match command {
        Command::Push(sample) => {
            if !core.is_ticking() {
                info!("resampler started");
            }
            core.push(sample);
        }
        Command::Reset(seed) => core.reset(seed),
        Command::Stop => {
            if core.is_ticking() {
                info!("resampler stopped");
            }
            core.stop();
        }
        Command::Shutdown => {}
    }
}

/// Advance a tick deadline by one interval, resyncing instead of bursting
/// when the worker has fallen more than an interval behind
fn schedule_next(deadline: Instant, interval: Duration, now: Instant) -> Instant {
    let next = deadline + interval;
    if next + interval < now {
        now + interval
    } else {
        next
    }
}
