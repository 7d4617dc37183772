pub mod q_learning;
pub mod sarsa;
pub mod value_iteration;
