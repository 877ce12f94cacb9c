use bevy::app::ScheduleRunnerPlugin;
use bevy::log::{info, LogPlugin};
use bevy::prelude::*;
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use motion_relay::net_util::display_addr;
use motion_relay::simulator::{SimulatedPeer, SimulatorConfig};
use motion_relay::{ConnectionState, LatestMotion, MotionStreamPlugin, StreamConfig, StreamStatus};

#[derive(Parser, Debug)]
#[command(name = "motion_relay", about = "Receive, resample and relay a motion-capture stream")]
struct Args {
    /// JSON stream config; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Feed the receiver from a local simulated tracker
    #[arg(long)]
    simulate: bool,

    /// Override the smoothing amount (0..1)
    #[arg(long)]
    smoothing: Option<f64>,
}

// Keeps the simulator thread alive for the app's lifetime
#[derive(Resource)]
struct Simulation(#[allow(dead_code)] SimulatedPeer);

#[derive(Default)]
struct ReportState {
    last_state: Option<ConnectionState>,
    last_frames: u64,
    since_report: f32,
}

fn main() -> motion_relay::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if let Some(amount) = args.smoothing {
        config.smoothing = amount;
    }
    config.validate()?;

    let listen = config.listen_addr();
    let tick = config.resampler_settings().output_interval();

    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick)),
        LogPlugin::default(),
    ))
    .add_plugins(MotionStreamPlugin::new(config.clone()))
    .add_systems(Update, report_status);

    info!(
        "motion relay listening on {} ({:?}, smoothing {:.2})",
        display_addr(listen),
        config.protocol,
        config.smoothing
    );

    if args.simulate {
        let target_ip = if listen.ip().is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            listen.ip()
        };
        let peer = SimulatedPeer::spawn(SimulatorConfig::new(
            SocketAddr::new(target_ip, listen.port()),
            config.protocol,
            config.blendshape_names(),
            config.transform_len,
        ))
        .map_err(|e| motion_relay::RelayError::bind(None, e))?;
        app.insert_resource(Simulation(peer));
    }

    app.run();
    Ok(())
}

// Log state changes immediately and throughput once per second
fn report_status(
    time: Res<Time>,
    status: Res<StreamStatus>,
    latest: Res<LatestMotion>,
    mut report: Local<ReportState>,
) {
    if report.last_state != Some(status.state) {
        info!("stream state: {}", status.state);
        report.last_state = Some(status.state);
    }

    report.since_report += time.delta_secs();
    if report.since_report < 1.0 {
        return;
    }

    let frames = latest.frames - report.last_frames;
    let fps = frames as f32 / report.since_report;
    report.since_report = 0.0;
    report.last_frames = latest.frames;

    if status.state == ConnectionState::Connected {
        let preview: Vec<String> = latest.values.iter().take(4).map(|v| format!("{:.3}", v)).collect();
        info!("{:.1} frames/s, first channels [{}]", fps, preview.join(", "));
    } else {
        info!("{}, {:.1} frames/s", status.state, fps);
    }
}
