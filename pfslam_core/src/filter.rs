// pfslam_core/src/filter.rs

//! The filter orchestrator: one call per `(scan, odometry)` observation.

use log::{debug, info, warn};

use crate::config::FilterConfig;
use crate::error::{Result, SlamError};
use crate::estimator::{GmappingEstimator, ScanProbabilityEstimator};
use crate::grid::GridMap;
use crate::matcher::{HillClimbMatcher, MotionAccumulator, TriggerDecision};
use crate::particles::{Particle, ParticleSet};
use crate::pose::{Pose, PoseDelta};
use crate::scan::RangeScan;

/// What happened during one [`GmappingFilter::handle_observation`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    /// 1-based number of the observation that produced this report.
    pub cycle: u64,
    /// `true` when the correction search ran for every particle.
    pub corrected: bool,
    pub resampled: bool,
    /// Effective sample size right after weighting (before any resampling).
    pub ess: f64,
    /// Index of the highest-weight particle after the cycle.
    pub best_index: usize,
}

/// An owned snapshot of the highest-weight particle.
#[derive(Debug, Clone)]
pub struct BestParticle {
    pub pose: Pose,
    pub map: GridMap,
    pub weight: f64,
    pub lineage: usize,
}

/// Rao-Blackwellized particle filter over poses, one occupancy map per particle.
#[derive(Debug, Clone)]
pub struct GmappingFilter {
    config: FilterConfig,
    particles: ParticleSet,
    estimator: Box<dyn ScanProbabilityEstimator>,
    matcher: HillClimbMatcher,
    accumulator: MotionAccumulator,
    cycle: u64,
    last_ess: f64,
}

impl GmappingFilter {
    /// Builds a filter with the default [`GmappingEstimator`].
    pub fn new(config: FilterConfig) -> Result<Self> {
        let estimator = Box::new(GmappingEstimator::new(config.estimator));
        Self::with_estimator(config, estimator)
    }

    /// Builds a filter that scores scans with a caller-supplied estimator.
    pub fn with_estimator(
        config: FilterConfig,
        estimator: Box<dyn ScanProbabilityEstimator>,
    ) -> Result<Self> {
        config.validate()?;
        let particles = ParticleSet::new(
            config.particles,
            config.initial_pose,
            config.grid,
            config.occupancy,
            &config.motion,
            config.seed,
        )?;
        info!(
            "Particle filter ready: {} particles, {}x{} cells at {} m",
            config.particles, config.grid.width, config.grid.height, config.grid.resolution
        );

        Ok(Self {
            matcher: HillClimbMatcher::new(config.search),
            last_ess: config.particles as f64,
            config,
            particles,
            estimator,
            accumulator: MotionAccumulator::default(),
            cycle: 0,
        })
    }

    /// Runs one full cycle: predict, optionally correct, weight, optionally
    /// resample, then update every particle's map.
    ///
    /// Poses are staged in a [`Proposal`](crate::particles::Proposal) and committed together with the new
    /// weights. On `DegenerateWeights` nothing is committed: poses, weights,
    /// maps and the trigger accumulator keep their previous values.
    pub fn handle_observation(
        &mut self,
        scan: &RangeScan,
        delta: &PoseDelta,
    ) -> Result<CycleReport> {
        self.cycle += 1;
        let cycle = self.cycle;

        let delta = if delta.is_finite() {
            *delta
        } else {
            warn!("Cycle {}: non-finite odometry {:?} treated as no motion", cycle, delta);
            Pose::IDENTITY
        };

        // 1. Stage every hypothesis moved by its own noisy copy of the odometry.
        let mut proposal = self.particles.propose(&delta);

        // 2. Decide whether this cycle earns a correction search.
        let mut accumulator = self.accumulator;
        let decision = accumulator.advance(&delta, &self.config.trigger);
        let corrected = decision == TriggerDecision::Correct;
        let likelihoods = if corrected {
            self.particles
                .correct(&mut proposal, scan, &self.matcher, self.estimator.as_ref())
        } else {
            self.particles
                .likelihoods(&proposal, scan, self.estimator.as_ref())
        };

        // 3. Fold the likelihoods into the weights; nothing is committed on failure.
        let weights = self
            .particles
            .reweighted(&likelihoods, self.config.resampling.likelihood_gain)
            .ok_or(SlamError::DegenerateWeights { cycle })?;
        self.particles.commit(proposal, &weights);
        self.accumulator = accumulator;

        // 4. Resample when the population has collapsed onto too few hypotheses.
        let ess = self.particles.effective_sample_size();
        let n = self.particles.len() as f64;
        let resampled = ess < self.config.resampling.threshold * n;
        if resampled {
            self.particles.resample();
            info!(
                "Cycle {}: resampled (ESS {:.2} < {:.2})",
                cycle,
                ess,
                self.config.resampling.threshold * n
            );
        }

        // 5. Every particle writes the scan into its own map.
        self.particles.integrate(scan);

        self.last_ess = ess;
        let best_index = self.particles.best_index();
        debug!(
            "Cycle {}: {:?}, ESS {:.2}, best particle {} at {:?}",
            cycle,
            decision,
            ess,
            best_index,
            self.particles.particles()[best_index].pose
        );

        Ok(CycleReport {
            cycle,
            corrected,
            resampled,
            ess,
            best_index,
        })
    }

    /// Owned copy of the highest-weight particle's pose and map.
    pub fn best_particle(&self) -> BestParticle {
        let best = &self.particles.particles()[self.particles.best_index()];
        BestParticle {
            pose: best.pose,
            map: best.map.clone(),
            weight: best.weight,
            lineage: best.lineage,
        }
    }

    pub fn all_weights(&self) -> Vec<f64> {
        self.particles.weights()
    }

    /// ESS of the current weights (N right after a resample).
    pub fn effective_sample_size(&self) -> f64 {
        self.particles.effective_sample_size()
    }

    /// ESS measured by the last successful cycle, before its resampling step.
    pub fn last_cycle_ess(&self) -> f64 {
        self.last_ess
    }

    pub fn particles(&self) -> &[Particle] {
        self.particles.particles()
    }

    /// Number of observations handled so far, failed ones included.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Odometry accumulated toward the next correction.
    pub fn pending_motion(&self) -> MotionAccumulator {
        self.accumulator
    }
}
