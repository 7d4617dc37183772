use crate::model::{Action, Outcome, State, Velocity};
use crate::prelude::ActionSimulator;
use crate::sim::collision::CollisionModel;
use crate::track::Track;

/// Probability that a non-zero acceleration is actually applied. With the
/// remaining probability the engine slips and no acceleration happens.
pub const ACTION_SUCCESS_RATE: f64 = 0.8;

/// Tolerance when asserting that transition probabilities sum to one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-9;

/// One possible successor of a (state, action) pair, with the probability of
/// observing it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PotentialState {
    pub outcome: Outcome,
    pub probability: f64,
}

/// A Markov Decision Process over racetrack states.
///
/// Assumes the state and action spaces are already well-known and reports the
/// successors of performing a particular action in a particular state together
/// with their probabilities.
pub trait Mdp {
    fn next_states(&self, state: &State, action: Action) -> Vec<PotentialState>;
}

/// Deterministic physics: apply the acceleration to the velocity, then let the
/// collision model decide where the agent ends up.
pub struct DeterministicSimulator<'a> {
    track: &'a Track,
    collision_model: &'a dyn CollisionModel,
}

impl<'a> DeterministicSimulator<'a> {
    pub fn new(track: &'a Track, collision_model: &'a dyn CollisionModel) -> Self {
        Self { track, collision_model }
    }

    pub fn next_state(&self, state: &State, action: Action) -> Outcome {
        let velocity = Velocity::new(state.velocity.x() + action.ax, state.velocity.y() + action.ay);
        self.collision_model.next_state(self.track, state.position, velocity)
    }
}

impl ActionSimulator for DeterministicSimulator<'_> {
    fn next_state(&mut self, state: &State, action: Action) -> Outcome {
        DeterministicSimulator::next_state(self, state, action)
    }
}

/// The racetrack MDP: a requested acceleration is applied 80% of the time, and
/// with the remaining 20% the engine slips and the zero acceleration is applied
/// instead. The zero action itself always succeeds.
pub struct RacetrackMdp<'a> {
    simulator: DeterministicSimulator<'a>,
}

impl<'a> RacetrackMdp<'a> {
    pub fn new(track: &'a Track, collision_model: &'a dyn CollisionModel) -> Self {
        Self {
            simulator: DeterministicSimulator::new(track, collision_model),
        }
    }
}

impl Mdp for RacetrackMdp<'_> {
    fn next_states(&self, state: &State, action: Action) -> Vec<PotentialState> {
        let next_states = if action == Action::ZERO {
            vec![PotentialState {
                outcome: self.simulator.next_state(state, action),
                probability: 1.0,
            }]
        } else {
            vec![
                PotentialState {
                    outcome: self.simulator.next_state(state, action),
                    probability: ACTION_SUCCESS_RATE,
                },
                PotentialState {
                    outcome: self.simulator.next_state(state, Action::ZERO),
                    probability: 1.0 - ACTION_SUCCESS_RATE,
                },
            ]
        };

        debug_assert!(
            (next_states.iter().map(|p| p.probability).sum::<f64>() - 1.0).abs() <= PROBABILITY_TOLERANCE,
            "transition probabilities for ({state}, {action}) do not sum to 1.0"
        );
        next_states
    }
}
