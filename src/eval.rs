use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::prelude::Policy;
use crate::sim::collision::CollisionModel;
use crate::sim::race::RaceSimulator;
use crate::track::Track;

pub const DEFAULT_NUM_TESTS: usize = 20;
/// If this many initial rollouts all hit the step cap, further sampling is
/// aborted; a policy that failed its first ten races is not going to finish the
/// remaining ones either.
pub const EARLY_STOP_TESTS: usize = 10;

/// Measures how well a policy performs on a track under a collision model.
///
/// Stateless apart from its configuration: every evaluation builds a fresh race
/// simulator and random source, so a single tester may be shared by concurrent
/// callers.
pub struct PolicyTester<'a> {
    track: &'a Track,
    collision_model: &'a dyn CollisionModel,
    num_tests: usize,
}

impl<'a> PolicyTester<'a> {
    pub fn new(track: &'a Track, collision_model: &'a dyn CollisionModel) -> Self {
        Self::with_num_tests(track, collision_model, DEFAULT_NUM_TESTS)
    }

    pub fn with_num_tests(track: &'a Track, collision_model: &'a dyn CollisionModel, num_tests: usize) -> Self {
        Self {
            track,
            collision_model,
            num_tests,
        }
    }

    pub fn collision_model(&self) -> &dyn CollisionModel {
        self.collision_model
    }

    /// Evaluates the policy with the configured number of rollouts.
    pub fn evaluate(&self, policy: &dyn Policy) -> TestResult {
        self.evaluate_samples(policy, self.num_tests)
    }

    /// Evaluates the policy with up to `num_tests` independent rollouts from
    /// uniformly chosen start-line positions.
    pub fn evaluate_samples(&self, policy: &dyn Policy, num_tests: usize) -> TestResult {
        self.evaluate_with_rng(policy, num_tests, StdRng::from_entropy())
    }

    /// Seeded variant of [Self::evaluate_samples] for reproducible statistics.
    pub fn evaluate_with_rng(&self, policy: &dyn Policy, num_tests: usize, mut rng: StdRng) -> TestResult {
        use rand::Rng;
        let mut simulator = RaceSimulator::with_rng(self.track, self.collision_model, StdRng::seed_from_u64(rng.gen()));

        let mut run_data = Vec::new();
        let mut terminated = false;

        for i in 0..num_tests {
            if i == EARLY_STOP_TESTS && !terminated {
                log::debug!("first {EARLY_STOP_TESTS} rollouts all hit the step cap, stopping early");
                break;
            }

            let start = self.track.random_starting_position(&mut rng);
            let run_length = simulator.run_policy(start, policy);
            if !terminated {
                terminated = !simulator.at_iteration_limit(run_length);
            }
            run_data.push(run_length);
        }
        TestResult::new(run_data)
    }
}

/// An immutable sample of rollout lengths with lazily computed statistics.
pub struct TestResult {
    data: Vec<usize>,
    mean: OnceCell<f64>,
    variance: OnceCell<f64>,
    confidence: OnceCell<f64>,
}

impl TestResult {
    pub fn new(data: Vec<usize>) -> Self {
        Self {
            data,
            mean: OnceCell::new(),
            variance: OnceCell::new(),
            confidence: OnceCell::new(),
        }
    }

    pub fn data(&self) -> &[usize] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// NaN for an empty sample.
    pub fn mean(&self) -> f64 {
        *self.mean.get_or_init(|| {
            let sum: usize = self.data.iter().sum();
            sum as f64 / self.data.len() as f64
        })
    }

    /// Bessel-corrected sample variance.
    ///
    /// Undefined (NaN) for a single observation and meaningless for an empty
    /// sample; callers must check the sample size before trusting it.
    pub fn variance(&self) -> f64 {
        *self.variance.get_or_init(|| {
            let mean = self.mean();
            let squared_deviations: f64 = self.data.iter().map(|&datum| (datum as f64 - mean).powi(2)).sum();
            squared_deviations / (self.data.len() as f64 - 1.0)
        })
    }

    /// Half-width of the 95% confidence interval around the mean.
    pub fn confidence(&self) -> f64 {
        *self.confidence.get_or_init(|| (self.variance() / self.data.len() as f64).sqrt() * 1.96)
    }
}
