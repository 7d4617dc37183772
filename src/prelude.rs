use std::fmt::{Display, Formatter};

use rand::RngCore;

use crate::model::{Action, Outcome, State};

/// A control policy: which action to take in a given state.
///
/// Policies may be stochastic (epsilon-greedy), so callers must never cache the
/// returned action for a state. The random source is passed in to keep rollouts
/// seedable.
pub trait Policy {
    fn action(&self, state: &State, rng: &mut dyn RngCore) -> Action;
}

/// Decides what happens when a particular action is performed in a particular state.
///
/// Takes `&mut self` because stochastic implementations own their random source.
pub trait ActionSimulator {
    fn next_state(&mut self, state: &State, action: Action) -> Outcome;
}

/// An iteratively driven racetrack learner.
///
/// `step()` performs one unit of learning progress. After each call,
/// `current_policy()` reflects the progress so far (it is also safe to call before
/// the first step) and `iteration_count()` reports the accumulated work done.
/// `finished()` flips from false to true exactly once; a learner never resumes
/// after declaring itself finished. Learners that cannot detect convergence
/// themselves are retired by the driver via an external iteration budget.
pub trait Learner: Display {
    fn step(&mut self);
    fn finished(&self) -> bool;
    fn current_policy(&self) -> Box<dyn Policy>;
    fn iteration_count(&self) -> usize;
}

#[derive(Debug)]
pub struct RaceError(pub String);

impl RaceError {
    pub fn from(msg: &str) -> Self {
        RaceError(msg.to_string())
    }
}

impl Display for RaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RaceError {}
