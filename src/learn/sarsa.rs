use std::fmt::{Display, Formatter};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rustc_hash::FxHashMap;

use crate::model::{Action, Outcome, Position, State, Velocity, VELOCITY_BOUND};
use crate::prelude::{ActionSimulator, Learner, Policy};
use crate::sim::collision::CollisionModel;
use crate::sim::mdp::RacetrackMdp;
use crate::sim::race::{iteration_limit, MdpActionSimulator};
use crate::track::Track;

pub struct SarsaParameter {
    pub learning_rate: f64,
    /// Discount rate; the bigger, the more farsighted the agent becomes
    pub gamma: f64,
    /// Visits to a state after which its action choice becomes fully greedy
    pub times_to_visit: u32,
}

impl Default for SarsaParameter {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            gamma: 0.7,
            times_to_visit: 30,
        }
    }
}

/// On-policy TD-control learner.
///
/// Each `step()` rolls one complete episode from a random valid start under the
/// epsilon-greedy behavior policy and then applies the TD(0) update along the
/// trajectory, bootstrapping from the action that was actually taken next.
/// Episodes that hit the step cap without crossing the finish line are discarded
/// and resampled, so only finish-reaching trajectories are ever learned from.
pub struct Sarsa<'a> {
    track: &'a Track,
    action_simulator: MdpActionSimulator<RacetrackMdp<'a>>,
    param: SarsaParameter,
    q_table: FxHashMap<State, FxHashMap<Action, f64>>,
    times_visited: FxHashMap<State, u32>,
    iteration_count: usize,
    /// Per-episode step cap; a trajectory longer than this is considered lost.
    episode_cap: usize,
    /// This learner cannot detect convergence; it simply stops at this ceiling.
    pub iteration_ceiling: usize,
    rng: StdRng,
}

impl<'a> Sarsa<'a> {
    pub fn new(track: &'a Track, collision_model: &'a dyn CollisionModel) -> Self {
        Self::with_rng(track, collision_model, SarsaParameter::default(), StdRng::from_entropy())
    }

    pub fn with_rng(
        track: &'a Track,
        collision_model: &'a dyn CollisionModel,
        param: SarsaParameter,
        mut rng: StdRng,
    ) -> Self {
        let action_simulator = MdpActionSimulator::with_rng(
            RacetrackMdp::new(track, collision_model),
            StdRng::seed_from_u64(rng.gen()),
        );
        let episode_cap = iteration_limit(track);
        Self {
            track,
            action_simulator,
            param,
            q_table: FxHashMap::default(),
            times_visited: FxHashMap::default(),
            iteration_count: 0,
            episode_cap,
            iteration_ceiling: episode_cap * Action::ACTION_SPACE * 2,
            rng,
        }
    }

    /// A uniformly random safe, non-finish position with a uniformly random velocity.
    fn random_start(&mut self) -> State {
        let position = loop {
            let candidate = Position::new(
                self.rng.gen_range(0..self.track.width()),
                self.rng.gen_range(0..self.track.height()),
            );
            if self.track.is_safe(candidate) && !self.track.is_finish(candidate) {
                break candidate;
            }
        };
        let velocity = Velocity::new(
            self.rng.gen_range(-VELOCITY_BOUND..=VELOCITY_BOUND),
            self.rng.gen_range(-VELOCITY_BOUND..=VELOCITY_BOUND),
        );
        State::new(position, velocity)
    }

    /// Epsilon-greedy behavior choice: exploit with probability
    /// `visits / times_to_visit` (capped at 1), explore uniformly otherwise.
    /// Unseen states are seeded with a full map of random action values.
    fn choose_action(&mut self, state: &State) -> Action {
        let visits = self.times_visited.get(state).copied().unwrap_or(0);
        if self.rng.gen::<f64>() > visits as f64 / self.param.times_to_visit as f64 {
            return random_action(&mut self.rng);
        }

        let rng = &mut self.rng;
        let actions = self.q_table.entry(*state).or_insert_with(|| random_action_map(rng));
        greedy_action(actions).unwrap_or_else(|| random_action(&mut self.rng))
    }

    /// One complete finish-reaching episode. Capped trials are discarded.
    fn roll_episode(&mut self) -> (Vec<State>, Vec<Action>) {
        loop {
            let mut states = Vec::new();
            let mut actions = Vec::new();
            let mut current = Outcome::OnTrack(self.random_start());

            while let Outcome::OnTrack(state) = current {
                if states.len() >= self.episode_cap {
                    break;
                }
                let action = self.choose_action(&state);
                states.push(state);
                actions.push(action);
                current = self.action_simulator.next_state(&state, action);
            }

            if current.is_finished() {
                return (states, actions);
            }
            log::debug!("SARSA trial hit the step cap, resampling a new start");
        }
    }
}

impl Learner for Sarsa<'_> {
    fn step(&mut self) {
        let (states, actions) = self.roll_episode();

        for i in 0..states.len() {
            let state = states[i];
            let action = actions[i];

            // bootstrap from the actually-taken next pair; 0 ahead of the terminal state
            let next_utility = if i < states.len() - 1 {
                let rng = &mut self.rng;
                *self
                    .q_table
                    .entry(states[i + 1])
                    .or_insert_with(|| random_action_map(rng))
                    .get(&actions[i + 1])
                    .expect("a seeded action map covers the full action space")
            } else {
                0.0
            };

            let rng = &mut self.rng;
            let entry = self
                .q_table
                .entry(state)
                .or_insert_with(|| random_action_map(rng))
                .get_mut(&action)
                .expect("a seeded action map covers the full action space");
            *entry = (1.0 - self.param.learning_rate) * *entry
                + self.param.learning_rate * (-1.0 + self.param.gamma * next_utility);

            *self.times_visited.entry(state).or_insert(0) += 1;
        }

        self.iteration_count += states.len();
    }

    fn finished(&self) -> bool {
        self.iteration_count >= self.iteration_ceiling
    }

    fn current_policy(&self) -> Box<dyn Policy> {
        Box::new(EpsilonGreedyPolicy {
            q_table: self.q_table.clone(),
            times_visited: self.times_visited.clone(),
            times_to_visit: self.param.times_to_visit,
        })
    }

    fn iteration_count(&self) -> usize {
        self.iteration_count
    }
}

impl Display for Sarsa<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SARSA")
    }
}

pub(crate) fn random_action(rng: &mut dyn RngCore) -> Action {
    Action::new(rng.gen_range(-1..=1), rng.gen_range(-1..=1))
}

fn random_action_map(rng: &mut impl Rng) -> FxHashMap<Action, f64> {
    Action::ALL.iter().map(|&action| (action, rng.gen::<f64>())).collect()
}

/// Highest-valued action; ties go to the first entry encountered in the map.
pub(crate) fn greedy_action(actions: &FxHashMap<Action, f64>) -> Option<Action> {
    let mut best_value = f64::NEG_INFINITY;
    let mut arg_max = None;
    for (&action, &value) in actions {
        if value > best_value {
            best_value = value;
            arg_max = Some(action);
        }
    }
    arg_max
}

/// Epsilon-greedy snapshot of a TD learner's tables.
///
/// Exploits visited states with probability `visits / times_to_visit`; states the
/// learner never saw are acted on randomly.
pub(crate) struct EpsilonGreedyPolicy {
    pub q_table: FxHashMap<State, FxHashMap<Action, f64>>,
    pub times_visited: FxHashMap<State, u32>,
    pub times_to_visit: u32,
}

impl Policy for EpsilonGreedyPolicy {
    fn action(&self, state: &State, rng: &mut dyn RngCore) -> Action {
        let visits = self.times_visited.get(state).copied().unwrap_or(0);
        if rng.gen::<f64>() > visits as f64 / self.times_to_visit as f64 {
            return random_action(rng);
        }

        self.q_table
            .get(state)
            .and_then(greedy_action)
            .unwrap_or_else(|| random_action(rng))
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::collision::Stop;
    use crate::track::tests::ALL_SAFE;

    use super::*;

    const TINY: &str = "2,2\nSF\n..\n";

    #[test]
    fn test_iteration_count_is_strictly_increasing() {
        let track = Track::parse(ALL_SAFE).unwrap();
        let mut learner = Sarsa::with_rng(&track, &Stop, SarsaParameter::default(), StdRng::seed_from_u64(21));

        let mut previous = 0;
        for _ in 0..5 {
            learner.step();
            // every learned episode reached the finish, so it took at least one step
            assert!(learner.iteration_count() > previous);
            previous = learner.iteration_count();
        }
    }

    #[test]
    fn test_learned_states_were_visited() {
        let track = Track::parse(TINY).unwrap();
        let mut learner = Sarsa::with_rng(&track, &Stop, SarsaParameter::default(), StdRng::seed_from_u64(22));

        for _ in 0..20 {
            learner.step();
        }
        assert!(!learner.q_table.is_empty());
        for state in learner.q_table.keys() {
            assert!(track.is_safe(state.position));
            assert!(!track.is_finish(state.position));
        }
        // visit counters only ever count trajectory states
        for (state, &visits) in &learner.times_visited {
            assert!(visits > 0, "state {state} recorded without a visit");
        }
    }

    #[test]
    fn test_finishes_at_the_iteration_ceiling() {
        let track = Track::parse(TINY).unwrap();
        let mut learner = Sarsa::with_rng(&track, &Stop, SarsaParameter::default(), StdRng::seed_from_u64(23));
        learner.iteration_ceiling = 50;

        let mut steps = 0;
        while !learner.finished() {
            learner.step();
            steps += 1;
            assert!(steps < 10_000, "learner never reached its ceiling");
        }
        assert!(learner.iteration_count() >= 50);
    }

    #[test]
    fn test_policy_snapshot_is_usable_for_unseen_states() {
        let track = Track::parse(TINY).unwrap();
        let learner = Sarsa::with_rng(&track, &Stop, SarsaParameter::default(), StdRng::seed_from_u64(24));

        let policy = learner.current_policy();
        let mut rng = StdRng::seed_from_u64(0);
        let state = State::new(Position::new(0, 1), Velocity::zero());
        for _ in 0..20 {
            assert!(policy.action(&state, &mut rng).is_valid());
        }
    }
}
