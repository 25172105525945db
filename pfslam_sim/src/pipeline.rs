// pfslam_sim/src/pipeline.rs

//! Wires the threads of a run together:
//!
//! sensor thread --(bounded(1) frames)--> filter loop --(publications)--> publisher thread
//!
//! In realtime mode the sensor never waits: a frame that finds the queue full
//! is dropped and counted. Otherwise the sensor blocks and every frame is processed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, SendError, Sender, TrySendError};
use log::{debug, info, warn};
use pfslam_core::filter::GmappingFilter;
use pfslam_core::pose::Pose;

use crate::config::ScenarioConfig;
use crate::error::{Result, SimError};
use crate::observer::{Observation, ScanObserver, SensorFrame};
use crate::publish::{MapPublisher, Publication, PublishStats};
use crate::sensors::SimulationRng;
use crate::world::WaypointDriver;

// =========================================================================
// == Backpressure ==
// =========================================================================

/// Sending half of a queue that discards the newest item when full.
#[derive(Debug, Clone)]
pub struct DropNewestSender<T> {
    inner: Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> DropNewestSender<T> {
    pub fn new(inner: Sender<T>) -> Self {
        Self {
            inner,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueues `item` if there is room. Returns `Ok(false)` when it was dropped,
    /// and an error only when the receiver is gone.
    pub fn offer(&self, item: T) -> std::result::Result<bool, SendError<T>> {
        match self.inner.try_send(item) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(TrySendError::Disconnected(item)) => Err(SendError(item)),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =========================================================================
// == Sensor thread ==
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorStats {
    pub frames_produced: u64,
    pub frames_dropped: u64,
    /// Ground truth at the end of the run, in the world frame.
    pub final_truth: Pose,
    /// Odometry at the end of the run, in the odometry frame.
    pub final_odometry: Pose,
}

fn run_sensor(config: &ScenarioConfig, frames: Sender<SensorFrame>) -> Result<SensorStats> {
    let mut rng = SimulationRng::from_seed(config.run.seed);
    let mut driver = WaypointDriver::new(config.driver.clone());
    let period = Duration::from_millis(config.run.scan_period_ms);
    let queue = DropNewestSender::new(frames.clone());

    let mut truth = config.driver.start;
    let mut odometry = Pose::IDENTITY;
    let mut produced = 0;

    for seq in 0..config.run.steps as u64 {
        let started = Instant::now();
        if seq > 0 {
            let step = driver.step(&truth);
            truth = truth.compose(&step);
            odometry = odometry.compose(&config.odometry.measure(&step, &mut rng.0)?);
        }
        let frame = SensorFrame {
            seq,
            scan: config.lidar.scan(&config.world, &truth, &mut rng.0)?,
            odometry,
            truth,
        };
        produced += 1;

        let delivered = if config.run.realtime {
            queue.offer(frame).is_ok()
        } else {
            frames.send(frame).is_ok()
        };
        if !delivered {
            debug!("Filter loop went away after frame {}", seq);
            break;
        }

        if config.run.realtime {
            if let Some(rest) = period.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }

    Ok(SensorStats {
        frames_produced: produced,
        frames_dropped: queue.dropped(),
        final_truth: truth,
        final_odometry: odometry,
    })
}

// =========================================================================
// == Filter loop ==
// =========================================================================

/// Counters and final estimates of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub frames_produced: u64,
    pub frames_dropped: u64,
    pub frames_gated: u64,
    pub cycles: u64,
    pub corrections: u64,
    pub resamples: u64,
    /// Best particle pose in the map frame.
    pub final_pose: Pose,
    /// Ground truth at the last processed frame, in the map frame.
    pub final_truth: Pose,
    /// Raw odometry at the last processed frame, in the map frame.
    pub final_odometry: Pose,
    pub publish: PublishStats,
}

impl RunSummary {
    /// Distance between the estimate and the truth at the end of the run.
    pub fn position_error(&self) -> f64 {
        self.final_pose.between(&self.final_truth).linear()
    }

    /// Distance between raw odometry and the truth at the end of the run.
    pub fn odometry_error(&self) -> f64 {
        self.final_odometry.between(&self.final_truth).linear()
    }
}

fn run_publisher(mut publisher: MapPublisher, inbox: Receiver<Publication>) -> Result<PublishStats> {
    for publication in inbox.iter() {
        publisher.handle(publication)?;
    }
    publisher.finish()
}

fn join<T>(handle: thread::JoinHandle<Result<T>>, name: &'static str) -> Result<T> {
    handle.join().map_err(|_| SimError::ThreadPanicked(name))?
}

/// Runs a whole scenario and returns its summary.
pub fn run(config: &ScenarioConfig) -> Result<RunSummary> {
    config.validate()?;
    let mut filter = GmappingFilter::new(config.filter.clone())?;
    let mut observer = ScanObserver::new(config.gate.clone());

    std::fs::create_dir_all(&config.output.directory)
        .map_err(|e| SimError::io(&config.output.directory, e))?;
    let resolved = config.output.directory.join("scenario.resolved.toml");
    std::fs::write(&resolved, config.to_toml()?).map_err(|e| SimError::io(&resolved, e))?;

    let publisher = MapPublisher::new(config.output.clone())?;
    let (publish_tx, publish_rx) = unbounded();
    let publisher_handle = thread::Builder::new()
        .name("publisher".into())
        .spawn(move || run_publisher(publisher, publish_rx))
        .map_err(|source| SimError::Spawn {
            name: "publisher",
            source,
        })?;

    let (frame_tx, frame_rx) = bounded::<SensorFrame>(1);
    let sensor_config = config.clone();
    let sensor_handle = thread::Builder::new()
        .name("sensor".into())
        .spawn(move || run_sensor(&sensor_config, frame_tx))
        .map_err(|source| SimError::Spawn {
            name: "sensor",
            source,
        })?;

    info!(
        "Running {} steps with {} particles ({})",
        config.run.steps,
        config.filter.particles,
        if config.run.realtime { "realtime" } else { "lockstep" }
    );

    let mut summary = RunSummary {
        frames_produced: 0,
        frames_dropped: 0,
        frames_gated: 0,
        cycles: 0,
        corrections: 0,
        resamples: 0,
        final_pose: config.filter.initial_pose,
        final_truth: config.filter.initial_pose,
        final_odometry: config.filter.initial_pose,
        publish: PublishStats::default(),
    };
    // Map frame = odometry frame anchored at the filter's initial pose.
    let anchor = config.filter.initial_pose;
    let mut last_processed: Option<(Pose, Pose)> = None;

    // A failed cycle ends the loop; the threads are still joined before it is reported.
    let mut failure = None;
    for frame in frame_rx.iter() {
        let observation = match observer.observe(&mut filter, &frame) {
            Ok(observation) => observation,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        match observation {
            Observation::Processed(report) => {
                summary.cycles += 1;
                summary.corrections += report.corrected as u64;
                summary.resamples += report.resampled as u64;
                last_processed = Some((frame.truth, frame.odometry));

                let best = filter.best_particle();
                // A closed publisher only loses output; the estimate goes on.
                let _ = publish_tx.send(Publication::Correction {
                    cycle: report.cycle,
                    best: best.pose,
                    odometry: frame.odometry,
                });
                if report.cycle % config.run.publish_every == 0 {
                    let _ = publish_tx.send(Publication::Map {
                        cycle: report.cycle,
                        map: best.map,
                        final_map: false,
                    });
                }
            }
            Observation::Gated => summary.frames_gated += 1,
        }
    }

    if let Some(e) = failure {
        // Dropping the receiver stops the sensor at its next frame.
        drop(frame_rx);
        drop(publish_tx);
        let _ = join(sensor_handle, "sensor");
        let _ = join(publisher_handle, "publisher");
        return Err(e);
    }

    let sensor = join(sensor_handle, "sensor")?;
    let best = filter.best_particle();
    summary.final_pose = best.pose;
    let _ = publish_tx.send(Publication::Map {
        cycle: filter.cycle(),
        map: best.map,
        final_map: true,
    });
    drop(publish_tx);
    summary.publish = join(publisher_handle, "publisher")?;

    summary.frames_produced = sensor.frames_produced;
    summary.frames_dropped = sensor.frames_dropped;
    if let Some((truth, odometry)) = last_processed {
        summary.final_truth = anchor.compose(&config.driver.start.between(&truth));
        summary.final_odometry = anchor.compose(&odometry);
    }
    if summary.frames_dropped > 0 {
        warn!(
            "{} of {} frames were dropped because the filter was busy",
            summary.frames_dropped, summary.frames_produced
        );
    }
    Ok(summary)
}
