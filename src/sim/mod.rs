pub mod collision;
pub mod mdp;
pub mod race;
