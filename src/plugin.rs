use crate::config::StreamConfig;
use crate::pipeline::MotionPipeline;
use crate::receiver::{ConnectionState, HandshakeConfig, MotionReceiver};
use crate::resampler::ChannelSink;
use crate::sample::MotionClock;
use bevy::log::{error, info};
use bevy::prelude::*;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

// Owns the receiver and pipeline for a stream
#[derive(Resource, Clone)]
pub struct MotionStream {
    pub receiver: Arc<MotionReceiver>,
    pub pipeline: MotionPipeline,
    pub config: StreamConfig,
}

// Resampled (or bypassed) frames arriving from the resampler thread
#[derive(Resource)]
pub struct MotionOutput {
    pub receiver: Mutex<Receiver<Vec<f32>>>,
}

// Most recent output frame
#[derive(Resource, Default)]
pub struct LatestMotion {
    pub values: Vec<f32>,
    pub frames: u64,
}

#[derive(Resource, Default)]
pub struct StreamStatus {
    pub state: ConnectionState,
}

pub struct MotionStreamPlugin {
    pub config: StreamConfig,
}

impl MotionStreamPlugin {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }
}

impl Plugin for MotionStreamPlugin {
    fn build(&self, app: &mut App) {
        let config = self.config.clone();
        let clock = MotionClock::new();
        let (sink, output) = ChannelSink::pair();

        app.insert_resource(LatestMotion::default())
            .insert_resource(StreamStatus::default());

        let pipeline =
            match MotionPipeline::new(sink, clock.clone(), config.smoothing, config.output_hz) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    error!("motion stream disabled: {}", e);
                    return;
                }
            };
        let mut receiver = MotionReceiver::new(
            config.transport_factory(),
            config.decoder(),
            pipeline.clone(),
            clock,
            config.liveness.clone(),
        );
        if let Some(handshake) = &config.handshake {
            receiver = receiver.with_handshake(HandshakeConfig::clone(handshake));
        }

        app.insert_resource(MotionStream {
            receiver: Arc::new(receiver),
            pipeline,
            config,
        })
        .insert_resource(MotionOutput {
            receiver: Mutex::new(output),
        })
        .add_systems(Startup, connect_stream)
        .add_systems(Update, (drain_motion_output, sync_stream_status));
    }
}

fn connect_stream(stream: Res<MotionStream>) {
    if !stream.config.autoconnect {
        info!("autoconnect disabled, motion receiver idle");
        return;
    }
    if let Err(e) = stream.receiver.connect(stream.config.peer) {
        error!("motion receiver failed to start: {}", e);
    }
}

// Keep only the newest frame each app tick
fn drain_motion_output(output: Res<MotionOutput>, mut latest: ResMut<LatestMotion>) {
    let rx = match output.receiver.lock() {
        Ok(rx) => rx,
        Err(_) => return,
    };

    while let Ok(values) = rx.try_recv() {
        latest.values = values;
        latest.frames += 1;
    }
}

fn sync_stream_status(stream: Res<MotionStream>, mut status: ResMut<StreamStatus>) {
    let state = stream.receiver.state();
    if status.state != state {
        status.state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_text_packet;
    use std::net::{Ipv4Addr, UdpSocket};
    use std::time::{Duration, Instant};

    fn test_config() -> StreamConfig {
        StreamConfig {
            bind_ip: Ipv4Addr::LOCALHOST.into(),
            listen_port: Some(0),
            blendshapes: Some(vec!["jawOpen".into()]),
            transform_len: 3,
            smoothing: 0.0,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_plugin_streams_udp_into_latest_motion() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, MotionStreamPlugin::new(test_config())));
        app.update();

        assert_eq!(
            app.world().resource::<StreamStatus>().state,
            ConnectionState::Connecting
        );
        let addr = app
            .world()
            .resource::<MotionStream>()
            .receiver
            .local_addr()
            .unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let packet = encode_text_packet(&[("jawOpen", 0.25)], &[1.0, 2.0, 3.0]);
        let deadline = Instant::now() + Duration::from_secs(3);
        while app.world().resource::<LatestMotion>().frames == 0 && Instant::now() < deadline {
            sender.send_to(packet.as_bytes(), addr).unwrap();
            std::thread::sleep(Duration::from_millis(20));
            app.update();
        }
        app.update();

        let latest = app.world().resource::<LatestMotion>();
        assert_eq!(latest.values, vec![0.25, 1.0, 2.0, 3.0]);
        assert_eq!(
            app.world().resource::<StreamStatus>().state,
            ConnectionState::Connected
        );
    }

    #[test]
    fn test_autoconnect_disabled_stays_idle() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, MotionStreamPlugin::new(StreamConfig {
            autoconnect: false,
            ..test_config()
        })));
        app.update();

        assert_eq!(
            app.world().resource::<StreamStatus>().state,
            ConnectionState::Disconnected
        );
        assert!(app
            .world()
            .resource::<MotionStream>()
            .receiver
            .local_addr()
            .is_none());
    }
}
