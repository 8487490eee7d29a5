//! Drives an owner and a remote replica of one entity over a simulated link.
//!
//! The owner walks a circle and optionally teleports once. Its position is sent at the send rate,
//! the link drops, delays and reorders packets, and the remote replica reconciles what arrives.
//! At the end the run's render error, snap count and strategy mix are printed.

mod link;
mod report;

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use bevy::math::Vec3;
use clap::Parser;
use motion_sync::{load_section, Clock, FrameClock, ReplicatedMotion, SyncSettings};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

use crate::link::{Link, LinkConfig};
use crate::report::Report;

const RADIUS: f32 = 4.0;
const ANGULAR_SPEED: f32 = 1.0;

#[derive(Parser, Debug)]
#[command(name = "netsim")]
#[command(about = "Motion sync over a simulated lossy link")]
struct Args {
    /// Simulated seconds
    #[arg(short, long, default_value_t = 10.0)]
    duration: f64,

    /// Render ticks per second
    #[arg(long, default_value_t = 60)]
    tick_rate: u32,

    /// Position updates sent per second, at most one per tick
    #[arg(long, default_value_t = 20)]
    send_rate: u32,

    /// Packet loss probability
    #[arg(long, default_value_t = 0.05)]
    loss: f64,

    /// One-way latency in milliseconds
    #[arg(long, default_value_t = 80.0)]
    latency_ms: f64,

    /// Maximum latency deviation in milliseconds
    #[arg(long, default_value_t = 20.0)]
    jitter_ms: f64,

    /// Second at which the owner teleports 20 units along x
    #[arg(long)]
    teleport_at: Option<f64>,

    /// Seed for loss and jitter
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// RON settings file with a `motion_sync` section
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Log filter, e.g. `info` or `motion_sync=debug`
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_new(&args.log).context("invalid log filter")?)
        .init();

    ensure!(args.duration > 0.0, "duration must be positive");
    ensure!(
        args.tick_rate > 0 && args.send_rate > 0,
        "tick and send rates must be positive"
    );
    ensure!((0.0..=1.0).contains(&args.loss), "loss must be within [0, 1]");
    ensure!(
        args.latency_ms >= 0.0 && args.jitter_ms >= 0.0,
        "latency and jitter must not be negative"
    );

    let settings = match &args.settings {
        Some(path) => load_section::<SyncSettings>(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => SyncSettings::default(),
    };
    info!("Simulating {:.1}s with {:?}", args.duration, settings);

    let report = run(&args, settings);
    report.print();
    Ok(())
}

fn run(args: &Args, settings: SyncSettings) -> Report {
    let dt = 1.0 / args.tick_rate as f32;
    let ticks = (args.duration * args.tick_rate as f64).round() as u64;
    let (tick_rate, send_rate) = (args.tick_rate as u64, args.send_rate as u64);
    // Whole-tick send schedule that averages exactly `send_rate` per second.
    let mut send_credit = 0u64;
    let teleport_tick = args
        .teleport_at
        .map(|at| (at * args.tick_rate as f64).round() as u64);

    let mut link = Link::new(
        LinkConfig {
            loss: args.loss,
            latency: args.latency_ms / 1000.0,
            jitter: args.jitter_ms / 1000.0,
        },
        args.seed,
    );

    let mut clock = FrameClock::new(0.0, 0.0);
    let mut offset = Vec3::ZERO;
    let mut owner = ReplicatedMotion::owner(circle(0.0), settings.clone(), &clock);
    let mut remote = ReplicatedMotion::remote(circle(0.0), settings, &clock);
    let mut report = Report::default();

    for tick in 1..=ticks {
        clock.advance(dt);
        let t = clock.now() as f32;

        if teleport_tick == Some(tick) {
            offset.x += 20.0;
            info!("Owner teleported at t={:.2}", t);
        }
        let position = circle(t) + offset;
        owner.owner_tick(position, &circle_velocity(t), &clock);

        send_credit += send_rate;
        if send_credit >= tick_rate {
            send_credit %= tick_rate;
            link.send(owner.current_render_position(), clock.now());
        }
        for delivery in link.deliver(clock.now()) {
            let admission = remote.on_sequenced_update(delivery.position, delivery.seq, &clock);
            report.record_admission(admission);
        }

        let rendered = remote.resolve(&clock);
        let error = rendered.distance(position);
        report.record_tick(remote.last_strategy(), error);
        debug!("t={:.3} rendered={:?} error={:.4}", t, rendered, error);
    }

    debug!("{} packets still in flight at the end", link.in_flight());
    report.snaps = remote.snap_count();
    report.link = link.stats();
    report
}

fn circle(t: f32) -> Vec3 {
    let angle = t * ANGULAR_SPEED;
    Vec3::new(angle.cos() * RADIUS, 0.0, angle.sin() * RADIUS)
}

fn circle_velocity(t: f32) -> Vec3 {
    let angle = t * ANGULAR_SPEED;
    Vec3::new(-angle.sin(), 0.0, angle.cos()) * RADIUS * ANGULAR_SPEED
}
