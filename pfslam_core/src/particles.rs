// pfslam_core/src/particles.rs

//! The particle population: motion sampling, weight bookkeeping and
//! systematic resampling.
//!
//! Every particle owns its pose hypothesis, its map and its random stream, so
//! the per-particle stages can run on any thread without coordination.

use log::{debug, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cell::OccupancyModel;
use crate::error::{Result, SlamError};
use crate::estimator::ScanProbabilityEstimator;
use crate::grid::{GridGeometry, GridMap};
use crate::matcher::HillClimbMatcher;
use crate::pose::{Pose, PoseDelta};
use crate::scan::RangeScan;

// =========================================================================
// == Motion noise ==
// =========================================================================

/// A normal distribution given by its mean and standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Gaussian {
    pub mean: f64,
    pub sigma: f64,
}

impl Gaussian {
    pub fn new(mean: f64, sigma: f64) -> Self {
        Self { mean, sigma }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if !self.mean.is_finite() || !(self.sigma.is_finite() && self.sigma >= 0.0) {
            return Err(SlamError::config(format!(
                "{} noise needs a finite mean and a non-negative sigma, got N({}, {})",
                name, self.mean, self.sigma
            )));
        }
        Ok(())
    }

    fn distribution(&self) -> Result<Normal<f64>> {
        Normal::new(self.mean, self.sigma)
            .map_err(|e| SlamError::config(format!("invalid normal distribution: {}", e)))
    }
}

/// Noise added to every odometry increment before it is applied to a particle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionNoise {
    /// Applied independently to the forward and lateral components, metres.
    pub xy: Gaussian,
    /// Applied to the heading change, radians.
    pub theta: Gaussian,
}

impl Default for MotionNoise {
    fn default() -> Self {
        Self {
            xy: Gaussian::new(0.0, 0.1),
            theta: Gaussian::new(0.0, 0.03),
        }
    }
}

impl MotionNoise {
    pub fn validate(&self) -> Result<()> {
        self.xy.validate("motion.xy")?;
        self.theta.validate("motion.theta")
    }
}

/// Draws perturbed odometry increments.
#[derive(Debug, Clone, Copy)]
pub struct MotionSampler {
    xy: Normal<f64>,
    theta: Normal<f64>,
}

impl MotionSampler {
    pub fn new(noise: &MotionNoise) -> Result<Self> {
        noise.validate()?;
        Ok(Self {
            xy: noise.xy.distribution()?,
            theta: noise.theta.distribution()?,
        })
    }

    /// Returns `delta` plus one draw of noise per component.
    ///
    /// A robot that reports no motion at all has not moved: an exactly zero
    /// increment is passed through unperturbed.
    pub fn sample<R: Rng + ?Sized>(&self, delta: &PoseDelta, rng: &mut R) -> PoseDelta {
        if delta.is_zero() {
            return *delta;
        }
        Pose::new(
            delta.x + self.xy.sample(rng),
            delta.y + self.xy.sample(rng),
            delta.theta + self.theta.sample(rng),
        )
    }
}

// =========================================================================
// == Weights ==
// =========================================================================

/// When and how the population is resampled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResamplingConfig {
    /// Resample when `ESS < threshold * N`.
    pub threshold: f64,
    /// Divides every log-likelihood before it is added to the log weight.
    /// Values above 1 flatten overconfident likelihoods.
    pub likelihood_gain: f64,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            likelihood_gain: 1.0,
        }
    }
}

impl ResamplingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(SlamError::config(format!(
                "resampling.threshold must lie in [0, 1], got {}",
                self.threshold
            )));
        }
        if !(self.likelihood_gain.is_finite() && self.likelihood_gain > 0.0) {
            return Err(SlamError::config(format!(
                "resampling.likelihood_gain must be positive, got {}",
                self.likelihood_gain
            )));
        }
        Ok(())
    }
}

/// Turns log weights into a normalized distribution.
///
/// NaN entries count as zero probability. Returns `None` when every entry is
/// `-inf`/NaN (or the slice is empty), i.e. when no valid distribution exists.
pub fn normalize_log_weights(log_weights: &[f64]) -> Option<Vec<f64>> {
    let sanitized: Vec<f64> = log_weights
        .iter()
        .map(|&lw| if lw.is_nan() { f64::NEG_INFINITY } else { lw })
        .collect();

    let max = sanitized.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        // +inf would be just as meaningless as all -inf.
        return None;
    }

    let mut weights: Vec<f64> = sanitized.iter().map(|lw| (lw - max).exp()).collect();
    let sum: f64 = weights.iter().sum();
    for w in weights.iter_mut() {
        *w /= sum;
    }
    Some(weights)
}

/// Effective sample size `1 / Σ wᵢ²` of a normalized weight vector.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    let sum_sq: f64 = weights.iter().map(|w| w * w).sum();
    if sum_sq > 0.0 {
        1.0 / sum_sq
    } else {
        0.0
    }
}

/// Low-variance (systematic) resampling.
///
/// `offset` must be drawn from `[0, 1/N)`; the N pointers `offset + m/N` walk
/// the cumulative weights once, so a particle of weight `w` is selected either
/// `⌊Nw⌋` or `⌈Nw⌉` times. Particle `i` owns the half-open interval
/// `[c(i-1), c(i))`, so a zero-weight particle is never selected.
pub fn systematic_resample_indices(weights: &[f64], offset: f64) -> Vec<usize> {
    let n = weights.len();
    let mut indices = Vec::with_capacity(n);
    if n == 0 {
        return indices;
    }

    let step = 1.0 / n as f64;
    let mut i = 0;
    let mut cumulative = weights[0];
    for m in 0..n {
        let u = offset + m as f64 * step;
        while u >= cumulative && i < n - 1 {
            i += 1;
            cumulative += weights[i];
        }
        indices.push(i);
    }
    indices
}

// =========================================================================
// == Particle ==
// =========================================================================

/// One trajectory hypothesis together with the map it built.
#[derive(Debug, Clone)]
pub struct Particle {
    pub pose: Pose,
    pub weight: f64,
    pub map: GridMap,
    /// Index of the initial particle this one descends from.
    pub lineage: usize,
    rng: ChaCha8Rng,
}

// =========================================================================
// == Population ==
// =========================================================================

/// Poses and random streams of a cycle that has not been committed yet.
///
/// Built by [`ParticleSet::propose`] and only written back by
/// [`ParticleSet::commit`], so a cycle that fails halfway leaves the
/// population exactly as it was.
#[derive(Debug, Clone)]
pub struct Proposal {
    poses: Vec<Pose>,
    rngs: Vec<ChaCha8Rng>,
}

impl Proposal {
    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }
}

/// A fixed-size population of particles.
#[derive(Debug, Clone)]
pub struct ParticleSet {
    particles: Vec<Particle>,
    sampler: MotionSampler,
    /// Seeds every child stream created by resampling.
    master_rng: ChaCha8Rng,
}

impl ParticleSet {
    /// Creates `count` identical particles at `initial_pose` with blank maps
    /// and uniform weights.
    pub fn new(
        count: usize,
        initial_pose: Pose,
        geometry: GridGeometry,
        model: OccupancyModel,
        noise: &MotionNoise,
        seed: u64,
    ) -> Result<Self> {
        if count == 0 {
            return Err(SlamError::config("particle count must be at least 1"));
        }
        let sampler = MotionSampler::new(noise)?;
        let mut master_rng = ChaCha8Rng::seed_from_u64(seed);
        let blank = GridMap::new(geometry, model);
        let weight = 1.0 / count as f64;

        let particles = (0..count)
            .map(|lineage| Particle {
                pose: initial_pose,
                weight,
                map: blank.clone(),
                lineage,
                rng: ChaCha8Rng::seed_from_u64(master_rng.gen()),
            })
            .collect();

        Ok(Self {
            particles,
            sampler,
            master_rng,
        })
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    #[cfg(test)]
    pub(crate) fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.weights())
    }

    /// Index of the highest-weight particle (first one on ties).
    pub fn best_index(&self) -> usize {
        let mut best = 0;
        for (i, p) in self.particles.iter().enumerate() {
            if p.weight > self.particles[best].weight {
                best = i;
            }
        }
        best
    }

    // --- Per-particle stages ---

    /// Samples every particle's next pose from its own noisy copy of `delta`.
    ///
    /// The population itself is untouched; the random streams advance only in
    /// the returned proposal.
    pub fn propose(&self, delta: &PoseDelta) -> Proposal {
        let sampler = &self.sampler;
        let step = |p: &Particle| {
            let mut rng = p.rng.clone();
            let noisy = sampler.sample(delta, &mut rng);
            (p.pose.compose(&noisy), rng)
        };

        #[cfg(feature = "parallel")]
        let staged: Vec<(Pose, ChaCha8Rng)> = self.particles.par_iter().map(step).collect();

        #[cfg(not(feature = "parallel"))]
        let staged: Vec<(Pose, ChaCha8Rng)> = self.particles.iter().map(step).collect();

        let (poses, rngs) = staged.into_iter().unzip();
        Proposal { poses, rngs }
    }

    /// Refines every proposed pose against its particle's map and returns the
    /// resulting scores.
    pub fn correct(
        &self,
        proposal: &mut Proposal,
        scan: &RangeScan,
        matcher: &HillClimbMatcher,
        estimator: &dyn ScanProbabilityEstimator,
    ) -> Vec<f64> {
        let refine = |(pose, p): (&mut Pose, &Particle)| {
            let result = matcher.refine(pose, scan, &p.map, estimator);
            *pose = result.pose;
            result.score
        };

        #[cfg(feature = "parallel")]
        let scores = proposal
            .poses
            .par_iter_mut()
            .zip(self.particles.par_iter())
            .map(refine)
            .collect();

        #[cfg(not(feature = "parallel"))]
        let scores = proposal
            .poses
            .iter_mut()
            .zip(self.particles.iter())
            .map(refine)
            .collect();

        scores
    }

    /// Scores every proposed pose against its particle's map.
    pub fn likelihoods(
        &self,
        proposal: &Proposal,
        scan: &RangeScan,
        estimator: &dyn ScanProbabilityEstimator,
    ) -> Vec<f64> {
        let score = |(pose, p): (&Pose, &Particle)| estimator.likelihood(pose, scan, &p.map);

        #[cfg(feature = "parallel")]
        let scores = proposal
            .poses
            .par_iter()
            .zip(self.particles.par_iter())
            .map(score)
            .collect();

        #[cfg(not(feature = "parallel"))]
        let scores = proposal
            .poses
            .iter()
            .zip(self.particles.iter())
            .map(score)
            .collect();

        scores
    }

    /// Folds `likelihoods` into the previous weights without committing them.
    pub fn reweighted(&self, likelihoods: &[f64], gain: f64) -> Option<Vec<f64>> {
        let log_weights: Vec<f64> = self
            .particles
            .iter()
            .zip(likelihoods)
            .map(|(p, ll)| p.weight.ln() + ll / gain)
            .collect();
        normalize_log_weights(&log_weights)
    }

    /// Writes a proposal and its weights into the population.
    pub fn commit(&mut self, proposal: Proposal, weights: &[f64]) {
        let staged = proposal.poses.into_iter().zip(proposal.rngs);
        for ((p, (pose, rng)), &w) in self.particles.iter_mut().zip(staged).zip(weights) {
            p.pose = pose;
            p.rng = rng;
            p.weight = w;
        }
    }

    /// Replaces the population by a systematic draw from the current weights.
    ///
    /// Selected particles are deep copies (map included), each with a fresh
    /// random stream, and all weights are reset to `1/N`.
    pub fn resample(&mut self) -> Vec<usize> {
        let n = self.particles.len();
        let step = 1.0 / n as f64;
        let offset = self.master_rng.gen_range(0.0..step);
        let indices = systematic_resample_indices(&self.weights(), offset);

        let mut survivors = Vec::with_capacity(n);
        for &i in &indices {
            let mut child = self.particles[i].clone();
            child.weight = step;
            child.rng = ChaCha8Rng::seed_from_u64(self.master_rng.gen());
            survivors.push(child);
        }
        self.particles = survivors;

        let distinct = {
            let mut seen = indices.clone();
            seen.dedup();
            seen.len()
        };
        debug!("Resampled {} particles from {} distinct parents", n, distinct);
        indices
    }

    /// Writes the scan into every particle's map at the particle's pose.
    pub fn integrate(&mut self, scan: &RangeScan) {
        #[cfg(feature = "parallel")]
        let clipped: usize = self
            .particles
            .par_iter_mut()
            .map(|p| p.map.integrate_scan(&p.pose, scan).beams_clipped)
            .sum();

        #[cfg(not(feature = "parallel"))]
        let clipped: usize = self
            .particles
            .iter_mut()
            .map(|p| p.map.integrate_scan(&p.pose, scan).beams_clipped)
            .sum();

        if clipped > 0 {
            warn!(
                "{} beam endpoints fell outside the map raster (summed over particles)",
                clipped
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const EPSILON: f64 = 1e-12;

    fn small_set(count: usize, seed: u64) -> ParticleSet {
        let geometry = GridGeometry {
            resolution: 0.1,
            width: 50,
            height: 50,
            origin: [-2.5, -2.5],
        };
        ParticleSet::new(
            count,
            Pose::IDENTITY,
            geometry,
            OccupancyModel::default(),
            &MotionNoise::default(),
            seed,
        )
        .unwrap()
    }

    /// Proposes and commits a motion step without touching the weights.
    fn advance(set: &mut ParticleSet, delta: &PoseDelta) {
        let proposal = set.propose(delta);
        let weights = set.weights();
        set.commit(proposal, &weights);
    }

    #[test]
    fn test_normalized_weights_sum_to_one() {
        for log_weights in [
            vec![0.0],
            vec![-1.0, -2.0, -3.0],
            vec![-1000.0, -1001.0, -5000.0, -1000.5],
            vec![f64::NEG_INFINITY, -3.0],
            vec![f64::NAN, -0.5, -0.5],
        ] {
            let weights = normalize_log_weights(&log_weights).unwrap();
            assert_abs_diff_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
        }
    }

    #[test]
    fn test_all_zero_likelihood_has_no_distribution() {
        assert!(normalize_log_weights(&[f64::NEG_INFINITY, f64::NEG_INFINITY]).is_none());
        assert!(normalize_log_weights(&[f64::NAN]).is_none());
        assert!(normalize_log_weights(&[]).is_none());
    }

    #[test]
    fn test_ess_uniform_and_permutation_invariant() {
        let uniform = vec![0.25; 4];
        assert_abs_diff_eq!(effective_sample_size(&uniform), 4.0, epsilon = EPSILON);

        let a = [0.1, 0.6, 0.3];
        let b = [0.3, 0.1, 0.6];
        assert_abs_diff_eq!(
            effective_sample_size(&a),
            effective_sample_size(&b),
            epsilon = EPSILON
        );
        assert_abs_diff_eq!(effective_sample_size(&[1.0, 0.0, 0.0]), 1.0, epsilon = EPSILON);
    }

    #[test]
    fn test_systematic_resampling_counts() {
        // Equal weights: every index exactly once, whatever the offset.
        for offset in [0.01, 0.1, 0.199] {
            let indices = systematic_resample_indices(&[0.2; 5], offset);
            assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        }
        // A dominant particle is drawn ⌊Nw⌋ or ⌈Nw⌉ times.
        let indices = systematic_resample_indices(&[0.05, 0.7, 0.05, 0.2], 0.1);
        let count = indices.iter().filter(|&&i| i == 1).count();
        assert!(count == 2 || count == 3, "drawn {} times", count);
        assert_eq!(indices.len(), 4);
    }

    #[test]
    fn test_zero_weight_particle_never_drawn_at_zero_offset() {
        let indices = systematic_resample_indices(&[0.0, 0.5, 0.5], 0.0);
        assert_eq!(indices, vec![1, 1, 2]);

        let indices = systematic_resample_indices(&[0.0, 0.0, 1.0, 0.0], 0.0);
        assert_eq!(indices, vec![2, 2, 2, 2]);
    }

    #[test]
    fn test_proposal_leaves_population_until_committed() {
        let mut set = small_set(4, 5);
        let proposal = set.propose(&Pose::new(0.3, 0.0, 0.1));
        assert!(set.particles().iter().all(|p| p.pose == Pose::IDENTITY));
        assert!(proposal.poses().iter().any(|pose| *pose != Pose::IDENTITY));

        // Dropping a proposal keeps the random streams too.
        let again = set.propose(&Pose::new(0.3, 0.0, 0.1));
        assert_eq!(again.poses(), proposal.poses());

        let expected = proposal.poses().to_vec();
        set.commit(proposal, &[0.25; 4]);
        let poses: Vec<Pose> = set.particles().iter().map(|p| p.pose).collect();
        assert_eq!(poses, expected);
    }

    #[test]
    fn test_equal_weight_resample_preserves_lineages() {
        let mut set = small_set(6, 3);
        advance(&mut set, &Pose::new(0.5, 0.0, 0.1));
        let poses: Vec<Pose> = set.particles().iter().map(|p| p.pose).collect();

        set.resample();
        let lineages: Vec<usize> = set.particles().iter().map(|p| p.lineage).collect();
        assert_eq!(lineages, vec![0, 1, 2, 3, 4, 5]);
        for (p, pose) in set.particles().iter().zip(&poses) {
            assert_eq!(p.pose, *pose);
            assert_abs_diff_eq!(p.weight, 1.0 / 6.0, epsilon = EPSILON);
        }
    }

    #[test]
    fn test_zero_delta_keeps_poses() {
        let mut set = small_set(4, 11);
        advance(&mut set, &Pose::IDENTITY);
        assert!(set.particles().iter().all(|p| p.pose == Pose::IDENTITY));

        advance(&mut set, &Pose::new(0.2, 0.0, 0.0));
        let first = set.particles()[0].pose;
        assert!(set.particles().iter().skip(1).any(|p| p.pose != first));
    }

    #[test]
    fn test_seeded_populations_are_reproducible() {
        let mut a = small_set(5, 42);
        let mut b = small_set(5, 42);
        for _ in 0..3 {
            advance(&mut a, &Pose::new(0.1, 0.0, 0.05));
            advance(&mut b, &Pose::new(0.1, 0.0, 0.05));
        }
        for (pa, pb) in a.particles().iter().zip(b.particles()) {
            assert_eq!(pa.pose, pb.pose);
        }
    }

    #[test]
    fn test_resampled_maps_are_independent_copies() {
        let mut set = small_set(2, 7);
        let proposal = set.propose(&Pose::IDENTITY);
        set.commit(proposal, &[1.0, 0.0]);
        set.resample();
        assert!(set.particles().iter().all(|p| p.lineage == 0));

        let scan = RangeScan::new(5.0, vec![crate::scan::Beam::hit(0.0, 1.0)]);
        let before = set.particles()[1].map.clone();
        set.particles[0].map.integrate_scan(&Pose::IDENTITY, &scan);
        assert_eq!(set.particles()[1].map, before);
        assert_ne!(set.particles()[0].map, before);
    }

    #[test]
    fn test_motion_noise_validation() {
        let noise = MotionNoise {
            xy: Gaussian::new(0.0, -0.1),
            ..Default::default()
        };
        assert!(matches!(
            MotionSampler::new(&noise),
            Err(SlamError::InvalidConfig(_))
        ));
    }
}
