use std::fmt::Write;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{Action, Outcome, Position, State, Velocity};
use crate::prelude::{ActionSimulator, Policy};
use crate::sim::collision::CollisionModel;
use crate::sim::mdp::{Mdp, PotentialState, RacetrackMdp};
use crate::track::Track;

/// Samples a successor state from an MDP's weighted transition list.
///
/// Used for actual gameplay rollouts, as opposed to the exact expectation
/// computation value iteration performs.
pub struct MdpActionSimulator<M: Mdp> {
    mdp: M,
    rng: StdRng,
}

impl<M: Mdp> MdpActionSimulator<M> {
    pub fn new(mdp: M) -> Self {
        Self::with_rng(mdp, StdRng::from_entropy())
    }

    pub fn with_rng(mdp: M, rng: StdRng) -> Self {
        Self { mdp, rng }
    }
}

impl<M: Mdp> ActionSimulator for MdpActionSimulator<M> {
    /// Chooses a random potential state, weighted by each state's probability.
    fn next_state(&mut self, state: &State, action: Action) -> Outcome {
        let potential_states = self.mdp.next_states(state, action);
        let mut decision_num: f64 = self.rng.gen();

        for potential_state in &potential_states {
            decision_num -= potential_state.probability;
            if decision_num <= 0.0 {
                return potential_state.outcome;
            }
        }

        // The probabilities may sum to slightly less than 1.0 due to
        // floating-point rounding; a draw above that sum belongs to the last
        // potential state.
        last_potential_state(&potential_states).outcome
    }
}

fn last_potential_state(potential_states: &[PotentialState]) -> &PotentialState {
    potential_states.last().expect("an MDP never returns an empty transition list")
}

/// Simulates full races of a policy on a track, through the stochastic
/// action simulator.
pub struct RaceSimulator<'a> {
    track: &'a Track,
    action_simulator: MdpActionSimulator<RacetrackMdp<'a>>,
    iteration_limit: usize,
    rng: StdRng,
}

impl<'a> RaceSimulator<'a> {
    pub fn new(track: &'a Track, collision_model: &'a dyn CollisionModel) -> Self {
        Self::with_rng(track, collision_model, StdRng::from_entropy())
    }

    pub fn with_rng(track: &'a Track, collision_model: &'a dyn CollisionModel, mut rng: StdRng) -> Self {
        let action_simulator = MdpActionSimulator::with_rng(
            RacetrackMdp::new(track, collision_model),
            StdRng::seed_from_u64(rng.gen()),
        );
        Self {
            track,
            action_simulator,
            iteration_limit: iteration_limit(track),
            rng,
        }
    }

    /// Runs the policy from the given start position (with zero velocity) until
    /// it crosses the finish line or hits the iteration limit.
    ///
    /// Returns the number of moves taken; a capped run returns the limit itself.
    pub fn run_policy(&mut self, start: Position, policy: &dyn Policy) -> usize {
        let mut cost = 0;
        let mut current = Outcome::OnTrack(State::new(start, Velocity::zero()));

        while let Outcome::OnTrack(state) = current {
            if cost >= self.iteration_limit {
                return self.iteration_limit;
            }
            let action = policy.action(&state, &mut self.rng);
            current = self.action_simulator.next_state(&state, action);
            cost += 1;
        }
        cost
    }

    /// Whether a run of the given length was terminated by the iteration limit.
    pub fn at_iteration_limit(&self, iteration_count: usize) -> bool {
        iteration_count >= self.iteration_limit
    }

    /// Per-cell visit counts of a single rollout; a debugging aid for watching
    /// where a policy spends its time.
    pub fn policy_map(&mut self, start: Position, policy: &dyn Policy) -> Vec<Vec<usize>> {
        let mut num_visited = vec![vec![0_usize; self.track.height() as usize]; self.track.width() as usize];
        let mut cost = 0;
        let mut current = Outcome::OnTrack(State::new(start, Velocity::zero()));

        while let Outcome::OnTrack(state) = current {
            if cost >= self.iteration_limit {
                break;
            }
            num_visited[state.position.x as usize][state.position.y as usize] += 1;
            let action = policy.action(&state, &mut self.rng);
            current = self.action_simulator.next_state(&state, action);
            cost += 1;
        }
        num_visited
    }

    /// Renders a visit-count map as a text grid, walls marked `###`.
    pub fn render_policy_map(&self, map: &[Vec<usize>]) -> String {
        let mut out = String::new();
        for y in 0..self.track.height() {
            for x in 0..self.track.width() {
                if self.track.is_safe(Position::new(x, y)) {
                    let count = map[x as usize][y as usize];
                    if count > 999 {
                        out.push_str(" ***");
                    } else {
                        let _ = write!(out, "{count:>4}");
                    }
                } else {
                    out.push_str(" ###");
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Rollout step cap: the number of distinct states of a track
/// (`width * height` cells times 11x11 velocities).
pub fn iteration_limit(track: &Track) -> usize {
    track.width() as usize * track.height() as usize * 121
}
