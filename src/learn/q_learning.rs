use std::fmt::{Display, Formatter};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

use crate::model::{Action, Outcome, Position, State, Velocity, VELOCITY_BOUND};
use crate::prelude::{ActionSimulator, Learner, Policy};
use crate::sim::collision::CollisionModel;
use crate::sim::mdp::RacetrackMdp;
use crate::sim::race::{iteration_limit, MdpActionSimulator};
use crate::track::Track;

use super::sarsa::{greedy_action, random_action, EpsilonGreedyPolicy};

pub struct QLearningParameter {
    pub learning_rate: f64,
    /// Discount rate; the bigger, the more farsighted the agent becomes
    pub gamma: f64,
    /// Visits to a state after which its action choice becomes fully greedy
    pub times_to_visit: u32,
}

impl Default for QLearningParameter {
    fn default() -> Self {
        Self {
            learning_rate: 0.7,
            gamma: 0.8,
            times_to_visit: 10,
        }
    }
}

/// Off-policy TD-control learner.
///
/// Follows the same episode discipline as SARSA (random valid start,
/// epsilon-greedy rollout, capped trials discarded and resampled), but the
/// update bootstraps from the best table value of the successor state rather
/// than the action actually taken. Table entries are lazily initialized to
/// random values instead of zero, which breaks ties and encourages early
/// exploration.
pub struct QLearning<'a> {
    track: &'a Track,
    action_simulator: MdpActionSimulator<RacetrackMdp<'a>>,
    param: QLearningParameter,
    q_table: FxHashMap<State, FxHashMap<Action, f64>>,
    times_visited: FxHashMap<State, u32>,
    iteration_count: usize,
    episode_cap: usize,
    pub iteration_ceiling: usize,
    rng: StdRng,
}

impl<'a> QLearning<'a> {
    pub fn new(track: &'a Track, collision_model: &'a dyn CollisionModel) -> Self {
        Self::with_rng(track, collision_model, QLearningParameter::default(), StdRng::from_entropy())
    }

    pub fn with_rng(
        track: &'a Track,
        collision_model: &'a dyn CollisionModel,
        param: QLearningParameter,
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

    /// Epsilon-greedy over whatever table entries exist so far; a state with no
    /// entries yet is acted on randomly.
    fn choose_action(&mut self, state: &State) -> Action {
        let visits = self.times_visited.get(state).copied().unwrap_or(0);
        if self.rng.gen::<f64>() > visits as f64 / self.param.times_to_visit as f64 {
            return random_action(&mut self.rng);
        }

        self.q_table
            .get(state)
            .and_then(greedy_action)
            .unwrap_or_else(|| random_action(&mut self.rng))
    }

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
                log::debug!("Q-learning episode reached the finish line after {} steps", states.len());
                return (states, actions);
            }
            log::debug!("Q-learning trial hit the step cap, resampling a new start");
        }
    }

    /// Table value for (state, action), lazily initialized to a random value.
    fn q_value(&mut self, state: &State, action: Action) -> f64 {
        let rng = &mut self.rng;
        *self
            .q_table
            .entry(*state)
            .or_default()
            .entry(action)
            .or_insert_with(|| rng.gen::<f64>())
    }
}

impl Learner for QLearning<'_> {
    fn step(&mut self) {
        let (states, actions) = self.roll_episode();

        for i in 0..states.len() {
            let state = states[i];
            let action = actions[i];

            // off-policy bootstrap: the best known value of the successor state.
            // The taken next action is seeded first so the max is always defined.
            let next_utility = if i < states.len() - 1 {
                self.q_value(&states[i + 1], actions[i + 1]);
                let entries = &self.q_table[&states[i + 1]];
                greedy_action(entries)
                    .map(|best| entries[&best])
                    .expect("successor state was just seeded")
            } else {
                0.0
            };

            let old = self.q_value(&state, action);
            let target = -1.0 + self.param.gamma * next_utility;
            let updated = old + self.param.learning_rate * (target - old);
            self.q_table
                .get_mut(&state)
                .and_then(|entries| entries.get_mut(&action))
                .map(|entry| *entry = updated)
                .expect("entry was just seeded");

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

impl Display for QLearning<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Q-learning")
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::collision::Stop;

    use super::*;

    const TINY: &str = "2,2\nSF\n..\n";

    #[test]
    fn test_iteration_count_is_strictly_increasing() {
        let track = Track::parse(TINY).unwrap();
        let mut learner = QLearning::with_rng(&track, &Stop, QLearningParameter::default(), StdRng::seed_from_u64(31));

        let mut previous = 0;
        for _ in 0..5 {
            learner.step();
            assert!(learner.iteration_count() > previous);
            previous = learner.iteration_count();
        }
    }

    #[test]
    fn test_finishes_once_the_ceiling_is_reached() {
        let track = Track::parse(TINY).unwrap();
        let mut learner = QLearning::with_rng(&track, &Stop, QLearningParameter::default(), StdRng::seed_from_u64(32));
        learner.iteration_ceiling = 100;

        assert!(!learner.finished());
        let mut steps = 0;
        while !learner.finished() {
            learner.step();
            steps += 1;
            assert!(steps < 10_000, "learner never reached its ceiling");
        }
        assert!(learner.iteration_count() >= 100);
    }

    #[test]
    fn test_default_ceiling_formula() {
        let track = Track::parse(TINY).unwrap();
        let learner = QLearning::with_rng(&track, &Stop, QLearningParameter::default(), StdRng::seed_from_u64(33));
        assert_eq!(learner.iteration_ceiling, 2 * 2 * 121 * 9 * 2);
    }

    #[test]
    fn test_only_visited_states_enter_the_tables() {
        let track = Track::parse(TINY).unwrap();
        let mut learner = QLearning::with_rng(&track, &Stop, QLearningParameter::default(), StdRng::seed_from_u64(34));

        for _ in 0..20 {
            learner.step();
        }
        for state in learner.q_table.keys() {
            assert!(track.is_safe(state.position));
            assert!(!track.is_finish(state.position));
        }
    }
}
