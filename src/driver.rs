use num_format::{Locale, ToFormattedString};

use crate::eval::{PolicyTester, TestResult};
use crate::prelude::Learner;

/// What happened to one learner by the time the driver retired it.
pub struct LearnerReport {
    pub name: String,
    pub iterations: usize,
    /// False when the learner was abandoned because its iteration budget ran out.
    pub finished: bool,
    pub result: TestResult,
}

/// Advances every active learner one step per round, retiring learners that
/// declare themselves finished or exceed the iteration budget, and evaluates
/// each retired learner's final policy.
///
/// Fully deterministic interleaving (given seeded learners), which makes this
/// the driver of choice for debugging.
pub fn run_round_robin(
    mut learners: Vec<Box<dyn Learner + '_>>,
    tester: &PolicyTester,
    iteration_budget: usize,
) -> Vec<LearnerReport> {
    let mut reports = Vec::with_capacity(learners.len());
    let mut active: Vec<bool> = vec![true; learners.len()];

    while active.iter().any(|&a| a) {
        for (i, learner) in learners.iter_mut().enumerate() {
            if !active[i] {
                continue;
            }
            learner.step();

            if learner.finished() || learner.iteration_count() >= iteration_budget {
                active[i] = false;
                reports.push(retire(learner.as_mut(), tester, iteration_budget));
            }
        }
    }
    reports
}

/// Runs each (learner, tester) pair on its own worker until the learner finishes
/// or exhausts the iteration budget. No mutable state is shared across workers;
/// the track and collision model behind `tester` are read-only.
pub fn run_parallel(
    learners: Vec<Box<dyn Learner + Send + '_>>,
    tester: &PolicyTester,
    iteration_budget: usize,
) -> Vec<LearnerReport> {
    std::thread::scope(|scope| {
        let handles: Vec<_> = learners
            .into_iter()
            .map(|mut learner| {
                scope.spawn(move || {
                    while !learner.finished() && learner.iteration_count() < iteration_budget {
                        learner.step();
                    }
                    retire(learner.as_mut(), tester, iteration_budget)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("a learner worker panicked"))
            .collect()
    })
}

fn retire(learner: &mut dyn Learner, tester: &PolicyTester, iteration_budget: usize) -> LearnerReport {
    let result = tester.evaluate(learner.current_policy().as_ref());
    let finished = learner.finished();

    if finished {
        log::info!(
            "{} finished after {} iterations (mean run length {:.1} ± {:.1})",
            learner,
            learner.iteration_count().to_formatted_string(&Locale::en),
            result.mean(),
            result.confidence()
        );
    } else {
        log::info!(
            "{} did not terminate within the budget of {} iterations",
            learner,
            iteration_budget.to_formatted_string(&Locale::en)
        );
    }

    LearnerReport {
        name: learner.to_string(),
        iterations: learner.iteration_count(),
        finished,
        result,
    }
}
