use std::fmt::{Display, Formatter};
use std::ops::Add;

use anyhow::Result;

use crate::prelude::RaceError;

/// Velocity components are clamped into `[-VELOCITY_BOUND, VELOCITY_BOUND]` at construction.
pub const VELOCITY_BOUND: i32 = 5;
/// Number of distinct values a single velocity component can take.
pub const VELOCITY_RANGE: usize = (2 * VELOCITY_BOUND + 1) as usize;

/// A cell coordinate on a racetrack.
///
/// Meaningless without a specific [Track](crate::track::Track).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl Add<Velocity> for Position {
    type Output = Position;

    fn add(self, velocity: Velocity) -> Position {
        Position::new(self.x + velocity.x(), self.y + velocity.y())
    }
}

/// An agent's velocity in cells per step.
///
/// The clamp to `[-VELOCITY_BOUND, VELOCITY_BOUND]` happens here and only here;
/// the rest of the crate relies on it as an invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Velocity {
    x: i32,
    y: i32,
}

impl Velocity {
    pub fn new(x: i32, y: i32) -> Self {
        Self {
            x: x.clamp(-VELOCITY_BOUND, VELOCITY_BOUND),
            y: y.clamp(-VELOCITY_BOUND, VELOCITY_BOUND),
        }
    }

    pub fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

impl Display for Velocity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}, {}>", self.x, self.y)
    }
}

/// An acceleration applied for one step, each component in `[-1, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Action {
    pub ax: i32,
    pub ay: i32,
}

impl Action {
    /// All 9 possible actions, in the nested ax-outer/ay-inner `{-1, 0, 1}` scan order.
    /// This order also serves as the tie-break order wherever a best action is selected.
    pub const ALL: [Action; 9] = [
        Action { ax: -1, ay: -1 },
        Action { ax: -1, ay: 0 },
        Action { ax: -1, ay: 1 },
        Action { ax: 0, ay: -1 },
        Action { ax: 0, ay: 0 },
        Action { ax: 0, ay: 1 },
        Action { ax: 1, ay: -1 },
        Action { ax: 1, ay: 0 },
        Action { ax: 1, ay: 1 },
    ];

    pub const ZERO: Action = Action { ax: 0, ay: 0 };

    /// Number of possible actions
    pub const ACTION_SPACE: usize = Self::ALL.len();

    pub fn new(ax: i32, ay: i32) -> Self {
        Self { ax, ay }
    }

    pub fn is_valid(&self) -> bool {
        (-1..=1).contains(&self.ax) && (-1..=1).contains(&self.ay)
    }

    pub fn try_new(ax: i32, ay: i32) -> Result<Self> {
        let action = Self { ax, ay };
        if action.is_valid() {
            Ok(action)
        } else {
            Err(RaceError(format!("acceleration {{{ax}, {ay}}} out of range")).into())
        }
    }
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}, {}}}", self.ax, self.ay)
    }
}

/// An agent's complete situation at one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct State {
    pub position: Position,
    pub velocity: Velocity,
}

impl State {
    pub fn new(position: Position, velocity: Velocity) -> Self {
        Self { position, velocity }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.position, self.velocity)
    }
}

/// Result of one simulated move.
///
/// A move either leaves the agent somewhere on the track or crosses the finish
/// line. Modeled as an explicit variant so every consumer has to handle episode
/// termination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    OnTrack(State),
    Finished,
}

impl Outcome {
    pub fn is_finished(&self) -> bool {
        matches!(self, Outcome::Finished)
    }

    pub fn state(&self) -> Option<State> {
        match self {
            Outcome::OnTrack(state) => Some(*state),
            Outcome::Finished => None,
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::OnTrack(state) => write!(f, "{}", state),
            Outcome::Finished => write!(f, "finished"),
        }
    }
}
