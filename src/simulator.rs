use crate::protocol::{encode_text_packet, BinaryPacket, Protocol};
use crate::smoother::{SmoothingProfile, WeightedSmoother};
use bevy::log::{debug, info, warn};
use bevy::math::Vec3;
use rand::Rng;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Shape of the fake tracking stream
#[derive(Clone, Debug)]
pub struct SimulatorConfig {
    pub target: SocketAddr,
    pub protocol: Protocol,
    pub rate_hz: f64,
    /// Uniform send jitter, +/- this many milliseconds
    pub jitter_ms: f64,
    /// Probability a frame is silently skipped
    pub loss: f64,
    /// Probability a frame is replaced with garbage
    pub malformed: f64,
    pub blendshapes: Vec<String>,
    pub transform_len: usize,
}

impl SimulatorConfig {
    pub fn new(target: SocketAddr, protocol: Protocol, blendshapes: Vec<String>, transform_len: usize) -> Self {
        Self {
            target,
            protocol,
            rate_hz: 60.0,
            jitter_ms: 4.0,
            loss: 0.02,
            malformed: 0.01,
            blendshapes,
            transform_len,
        }
    }
}

/// Peak per-axis head tremor in meters
pub const HEAD_TREMOR: f32 = 0.004;

/// Background thread streaming synthetic motion to a receiver over UDP
pub struct SimulatedPeer {
    running: Arc<AtomicBool>,
    sent: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedPeer {
    pub fn spawn(config: SimulatorConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let running = Arc::new(AtomicBool::new(true));
        let sent = Arc::new(AtomicU64::new(0));

        let worker_running = Arc::clone(&running);
        let worker_sent = Arc::clone(&sent);
        let worker = thread::Builder::new()
            .name("motion-simulator".into())
            .spawn(move || run(socket, config, worker_running, worker_sent))?;

        Ok(Self {
            running,
            sent,
            worker: Some(worker),
        })
    }

    /// Datagrams sent so far, malformed ones included
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SimulatedPeer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(socket: UdpSocket, config: SimulatorConfig, running: Arc<AtomicBool>, sent: Arc<AtomicU64>) {
    info!(
        "simulating {:?} motion stream to {} at {} Hz",
        config.protocol, config.target, config.rate_hz
    );
    let mut rng = rand::rng();
    let interval = 1.0 / config.rate_hz.max(1.0);
    let mut synth = FrameSynth::new(config.clone());
    let start = Instant::now();

    while running.load(Ordering::Acquire) {
        let t = start.elapsed().as_secs_f64();

        if rng.random_bool(config.loss.clamp(0.0, 1.0)) {
            debug!("simulator dropped frame at {:.3}s", t);
        } else {
            let datagram = if rng.random_bool(config.malformed.clamp(0.0, 1.0)) {
                garbage(&mut rng)
            } else {
                let tremor = Vec3::new(
                    rng.random_range(-HEAD_TREMOR..HEAD_TREMOR),
                    rng.random_range(-HEAD_TREMOR..HEAD_TREMOR),
                    rng.random_range(-HEAD_TREMOR..HEAD_TREMOR),
                );
                synth.frame(t, tremor)
            };
            match socket.send_to(&datagram, config.target) {
                Ok(_) => {
                    sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!("simulator send failed: {}", e),
            }
        }

        let jitter = if config.jitter_ms > 0.0 {
            rng.random_range(-config.jitter_ms..config.jitter_ms) / 1000.0
        } else {
            0.0
        };
        thread::sleep(Duration::from_secs_f64((interval + jitter).max(0.0)));
    }
}

/// Builds well-formed datagrams, smoothing a jittery head pose
pub struct FrameSynth {
    config: SimulatorConfig,
    head: WeightedSmoother<Vec3>,
}

impl FrameSynth {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            head: WeightedSmoother::with_profile(SmoothingProfile::Heavy, head_sway(0.0)),
        }
    }

    /// One datagram for stream time `t`; `tremor` offsets the raw head position
    pub fn frame(&mut self, t: f64, tremor: Vec3) -> Vec<u8> {
        let head = self.head.append(head_sway(t) + tremor);

        match self.config.protocol {
            Protocol::Text => {
                let values: Vec<f32> = (0..self.config.blendshapes.len()).map(|i| wave(t, i)).collect();
                let blend: Vec<(&str, f32)> = self
                    .config
                    .blendshapes
                    .iter()
                    .map(String::as_str)
                    .zip(values)
                    .collect();
                // Leading transform floats carry the head position
                let transforms: Vec<f32> = (0..self.config.transform_len)
                    .map(|i| match i {
                        0..=2 => head[i],
                        _ => wave(t, i + 100) * 10.0 - 5.0,
                    })
                    .collect();
                encode_text_packet(&blend, &transforms).into_bytes()
            }
            Protocol::Binary => {
                let mut packet = BinaryPacket::default();
                for (i, value) in packet.blend_shapes.iter_mut().enumerate() {
                    *value = wave(t, i);
                }
                // Translation column
                packet.head[12..15].copy_from_slice(&head.to_array());
                for (j, joint) in packet.left_hand.iter_mut().enumerate() {
                    *joint = [-0.2, j as f32 * 0.01, wave(t, j) * 0.05];
                }
                for (j, joint) in packet.right_hand.iter_mut().enumerate() {
                    *joint = [0.2, j as f32 * 0.01, wave(t, j + 21) * 0.05];
                }
                packet.to_bytes()
            }
        }
    }
}

fn head_sway(t: f64) -> Vec3 {
    Vec3::new((t.sin() * 0.05) as f32, (t * 0.5).cos() as f32 * 0.02, 0.0)
}

// Smooth 0..1 signal, phase-shifted per channel
fn wave(t: f64, channel: usize) -> f32 {
    let phase = channel as f64 * 0.37;
    let speed = 1.0 + (channel % 5) as f64 * 0.3;
    (0.5 + 0.5 * (t * speed + phase).sin()) as f32
}

fn garbage(rng: &mut impl Rng) -> Vec<u8> {
    let len = rng.random_range(1..64);
    (0..len).map(|_| rng.random::<u8>()).collect()
}
