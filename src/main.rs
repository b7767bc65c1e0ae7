use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use omnimap::optimizer::LevenbergMarquardt;
use omnimap::producers::{OdometryNoise, OdometryProducer, PoseLogConsumer};
use omnimap::replay::{ReplayDriver, ReplayOptions, load_odometry_csv};
use omnimap::system::{Coordinator, CoordinatorConfig};
use omnimap::time::{ManualClock, Timestamp};

const USAGE: &str = "usage: omnimap <odometry.csv> [config.yaml]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_thread_names(true)
        .init();

    let mut args = std::env::args().skip(1);
    let log_path = args.next().context(USAGE)?;
    let config = match args.next() {
        Some(path) => CoordinatorConfig::from_yaml_file(&path)?,
        None => CoordinatorConfig::default(),
    };
    config.validate()?;

    let records = load_odometry_csv(&log_path)?;
    info!("Loaded {} odometry records from {}", records.len(), log_path);

    let clock = Arc::new(ManualClock::new(Timestamp::ZERO));
    let mut coordinator = Coordinator::new(
        config.clone(),
        clock.clone(),
        Box::new(LevenbergMarquardt::new(config.optimizer.clone())),
    );
    coordinator.register_output_consumer(Box::new(PoseLogConsumer::new()));

    let odom = Arc::new(OdometryProducer::new("odometry", OdometryNoise::default()));
    coordinator.handle().register_pose_producer(odom.clone());

    let mut driver = ReplayDriver::new(coordinator, ReplayOptions::default()).with_clock(clock);
    let report = driver.run(
        records.into_iter().map(|r| (r.stamp, r.pose)),
        |stamp, pose, handle| {
            // Samples before the newest node are no longer needed for linking
            if let Some((_, newest)) = handle.latest_node() {
                odom.prune_before(newest);
            }
            odom.push(stamp, pose);
            Ok(())
        },
    )?;

    let trajectory = report.snapshot.trajectory();
    info!(
        "Final solution: {} poses, {} factors, {} optimizations, {} optimizer failures",
        trajectory.len(),
        report.snapshot.graph.len(),
        report.stats.optimizations,
        report.stats.optimizer_failures
    );
    if let (Some((t0, first)), Some((t1, last))) = (trajectory.first(), trajectory.last()) {
        info!(
            "Trajectory {} -> {}: [{:.3}, {:.3}, {:.3}] -> [{:.3}, {:.3}, {:.3}]",
            t0,
            t1,
            first.translation.x,
            first.translation.y,
            first.translation.z,
            last.translation.x,
            last.translation.y,
            last.translation.z
        );
    }
    if let Some(slowest) = report.frames.iter().map(|f| f.finished - f.started).max() {
        info!("Slowest record took {:.2?}", slowest);
    }

    Ok(())
}
