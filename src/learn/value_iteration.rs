use std::fmt::{Display, Formatter};

use itertools::iproduct;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

use crate::model::{Action, Outcome, Position, State, Velocity, VELOCITY_BOUND, VELOCITY_RANGE};
use crate::prelude::{Learner, Policy};
use crate::sim::collision::CollisionModel;
use crate::sim::mdp::{Mdp, RacetrackMdp};
use crate::track::Track;

pub struct ValueIterationParameter {
    /// Discount rate; the bigger, the more farsighted the agent becomes
    pub gamma: f64,
    /// Convergence threshold on the maximum utility change of a sweep
    pub epsilon: f64,
}

impl Default for ValueIterationParameter {
    fn default() -> Self {
        Self { gamma: 0.7, epsilon: 1e-4 }
    }
}

/// Exact dynamic-programming learner for the racetrack MDP.
///
/// Keeps a dense utility table over the full bounded state space, initialized
/// with Uniform[0, 1) random values. Each `step()` is one synchronous Bellman
/// sweep computing `-1 + gamma * max_a E[utility(s')]` for every non-wall,
/// non-finish state from the previous sweep's table, so the update order within
/// a sweep cannot matter. Terminal states have utility 0 by definition and are
/// never written.
pub struct ValueIteration<'a> {
    track: &'a Track,
    mdp: RacetrackMdp<'a>,
    param: ValueIterationParameter,
    // flat tables over (x, y, vx + 5, vy + 5)
    utility: Vec<f64>,
    best_actions: Vec<Action>,
    finished: bool,
    iteration_count: usize,
    last_max_delta: f64,
}

impl<'a> ValueIteration<'a> {
    pub fn new(track: &'a Track, collision_model: &'a dyn CollisionModel) -> Self {
        Self::with_rng(track, collision_model, ValueIterationParameter::default(), StdRng::from_entropy())
    }

    pub fn with_rng(
        track: &'a Track,
        collision_model: &'a dyn CollisionModel,
        param: ValueIterationParameter,
        mut rng: StdRng,
    ) -> Self {
        let table_len = track.width() as usize * track.height() as usize * VELOCITY_RANGE * VELOCITY_RANGE;
        let utility = (0..table_len).map(|_| rng.gen::<f64>()).collect();

        Self {
            track,
            mdp: RacetrackMdp::new(track, collision_model),
            param,
            utility,
            best_actions: vec![Action::ZERO; table_len],
            finished: false,
            iteration_count: 0,
            last_max_delta: f64::INFINITY,
        }
    }

    /// Maximum absolute utility change of the most recent sweep; infinite before
    /// the first. Since the Bellman update is a gamma-contraction, this shrinks
    /// by at least a factor of gamma per sweep.
    pub fn last_max_delta(&self) -> f64 {
        self.last_max_delta
    }

    fn table_index(&self, position: Position, velocity: Velocity) -> usize {
        let x = position.x as usize;
        let y = position.y as usize;
        let vx = (velocity.x() + VELOCITY_BOUND) as usize;
        let vy = (velocity.y() + VELOCITY_BOUND) as usize;
        ((x * self.track.height() as usize + y) * VELOCITY_RANGE + vx) * VELOCITY_RANGE + vy
    }

    fn utility(&self, outcome: &Outcome) -> f64 {
        match outcome {
            // terminal states have utility 0
            Outcome::Finished => 0.0,
            Outcome::OnTrack(state) => self.utility[self.table_index(state.position, state.velocity)],
        }
    }

    /// Expected utility of performing `action` in `state` under the MDP's
    /// transition model and the previous sweep's utilities.
    fn expected_utility(&self, state: &State, action: Action) -> f64 {
        self.mdp
            .next_states(state, action)
            .iter()
            .map(|potential| potential.probability * self.utility(&potential.outcome))
            .sum()
    }
}

impl Learner for ValueIteration<'_> {
    /// One synchronous Bellman sweep over all states.
    fn step(&mut self) {
        if self.finished {
            return;
        }

        let mut max_delta: f64 = 0.0;
        let mut next_utility = vec![0.0; self.utility.len()];
        let mut next_best_actions = std::mem::take(&mut self.best_actions);

        for (x, y) in iproduct!(0..self.track.width(), 0..self.track.height()) {
            let position = Position::new(x, y);
            if !self.track.is_safe(position) || self.track.is_finish(position) {
                continue;
            }
            // every expected utility below counts as one unit of work
            self.iteration_count += VELOCITY_RANGE * VELOCITY_RANGE * Action::ACTION_SPACE;

            for (vx, vy) in iproduct!(-VELOCITY_BOUND..=VELOCITY_BOUND, -VELOCITY_BOUND..=VELOCITY_BOUND) {
                let velocity = Velocity::new(vx, vy);
                let state = State::new(position, velocity);

                // ties go to the first action in the Action::ALL scan order
                let mut best_expected_utility = f64::NEG_INFINITY;
                let mut best_action = Action::ZERO;
                for action in Action::ALL {
                    let expected_utility = self.expected_utility(&state, action);
                    if expected_utility > best_expected_utility {
                        best_expected_utility = expected_utility;
                        best_action = action;
                    }
                }

                let index = self.table_index(position, velocity);
                next_best_actions[index] = best_action;
                next_utility[index] = -1.0 + self.param.gamma * best_expected_utility;
                max_delta = max_delta.max((next_utility[index] - self.utility[index]).abs());
            }
        }

        self.utility = next_utility;
        self.best_actions = next_best_actions;
        self.last_max_delta = max_delta;

        // standard value-iteration stopping bound
        self.finished = max_delta < self.param.epsilon * (1.0 - self.param.gamma) / self.param.gamma;
        if self.finished {
            log::info!("value iteration converged (max delta {max_delta:e})");
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn current_policy(&self) -> Box<dyn Policy> {
        Box::new(ValueIterationPolicy {
            best_actions: self.best_actions.clone(),
            height: self.track.height() as usize,
        })
    }

    fn iteration_count(&self) -> usize {
        self.iteration_count
    }
}

impl Display for ValueIteration<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Value iteration")
    }
}

/// Deterministic greedy policy: the action that maximized the expected utility
/// in the most recent sweep.
struct ValueIterationPolicy {
    best_actions: Vec<Action>,
    height: usize,
}

impl Policy for ValueIterationPolicy {
    fn action(&self, state: &State, _rng: &mut dyn RngCore) -> Action {
        let x = state.position.x as usize;
        let y = state.position.y as usize;
        let vx = (state.velocity.x() + VELOCITY_BOUND) as usize;
        let vy = (state.velocity.y() + VELOCITY_BOUND) as usize;
        self.best_actions[((x * self.height + y) * VELOCITY_RANGE + vx) * VELOCITY_RANGE + vy]
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::collision::Stop;
    use crate::sim::mdp::DeterministicSimulator;
    use crate::track::tests::ALL_SAFE;

    use super::*;

    fn converge(learner: &mut ValueIteration) -> usize {
        let mut sweeps = 0;
        while !learner.finished() {
            learner.step();
            sweeps += 1;
            assert!(sweeps < 1000, "value iteration did not converge");
        }
        sweeps
    }

    #[test]
    fn test_converges_in_finite_sweeps() {
        let track = Track::parse(ALL_SAFE).unwrap();
        let mut learner =
            ValueIteration::with_rng(&track, &Stop, ValueIterationParameter::default(), StdRng::seed_from_u64(11));

        let sweeps = converge(&mut learner);
        assert!(sweeps > 1);
        assert_eq!(learner.iteration_count(), sweeps * 24 * 121 * 9); // 24 swept cells (25 minus the finish)
    }

    #[test]
    fn test_max_delta_shrinks_monotonically() {
        let track = Track::parse(ALL_SAFE).unwrap();
        let mut learner =
            ValueIteration::with_rng(&track, &Stop, ValueIterationParameter::default(), StdRng::seed_from_u64(15));

        assert!(learner.last_max_delta().is_infinite());

        let mut deltas = Vec::new();
        while !learner.finished() {
            learner.step();
            deltas.push(learner.last_max_delta());
        }
        assert!(deltas.len() > 3);

        // past the initial sweeps that wash out the random table, the
        // contraction never lets a sweep change utilities more than the one before
        for pair in deltas[2..].windows(2) {
            assert!(pair[1] <= pair[0], "max delta grew from {} to {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_step_after_convergence_is_a_no_op() {
        let track = Track::parse(ALL_SAFE).unwrap();
        let mut learner =
            ValueIteration::with_rng(&track, &Stop, ValueIterationParameter::default(), StdRng::seed_from_u64(12));

        converge(&mut learner);
        let count = learner.iteration_count();
        learner.step();
        assert!(learner.finished());
        assert_eq!(learner.iteration_count(), count);
    }

    #[test]
    fn test_policy_is_callable_before_any_step() {
        let track = Track::parse(ALL_SAFE).unwrap();
        let learner =
            ValueIteration::with_rng(&track, &Stop, ValueIterationParameter::default(), StdRng::seed_from_u64(13));

        let policy = learner.current_policy();
        let mut rng = StdRng::seed_from_u64(0);
        let action = policy.action(&State::new(Position::new(0, 0), Velocity::zero()), &mut rng);
        assert!(action.is_valid());
    }

    #[test]
    fn test_converged_policy_drives_deterministically_to_the_finish() {
        let track = Track::parse(ALL_SAFE).unwrap();
        let mut learner =
            ValueIteration::with_rng(&track, &Stop, ValueIterationParameter::default(), StdRng::seed_from_u64(14));
        converge(&mut learner);

        let policy = learner.current_policy();
        let simulator = DeterministicSimulator::new(&track, &Stop);
        let mut rng = StdRng::seed_from_u64(0);

        // follow the success branch only: the learned policy must reach the
        // finish within a handful of moves from every start cell
        for &start in track.starting_line() {
            let mut outcome = Outcome::OnTrack(State::new(start, Velocity::zero()));
            let mut moves = 0;
            while let Outcome::OnTrack(state) = outcome {
                assert!(moves < 10, "policy does not reach the finish from {start}");
                outcome = simulator.next_state(&state, policy.action(&state, &mut rng));
                moves += 1;
            }
        }
    }
}
