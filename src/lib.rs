pub mod driver;
pub mod eval;
pub mod learn;
pub mod log;
pub mod model;
pub mod prelude;
pub mod sim;
pub mod track;
