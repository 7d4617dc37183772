use std::fmt::{Display, Formatter};

use crate::model::{Outcome, Position, State, Velocity};
use crate::track::Track;

/// Absolute tolerance when deciding whether a fractional coordinate sits on a
/// grid line. Absorbs floating-point drift from the repeated rate additions.
const GRID_EPSILON: f64 = 1e-5;

/// What physically happens when an agent tries to move with a given velocity
/// from a given position. Completely encapsulates collision handling.
pub trait CollisionModel: Display + Sync {
    fn next_state(&self, track: &Track, position: Position, velocity: Velocity) -> Outcome;
}

/// Where a traced move ends up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trace {
    /// The full intended move went through; the agent is at `position + velocity`.
    Clear,
    /// A wall blocked the move; the contained position is the last confirmed safe cell.
    Blocked(Position),
    /// The path crossed a finish-line cell.
    Finished,
}

/// Follows the movement of an infinitely small agent from the center of
/// `position` toward the center of `position + velocity`.
///
/// The axis with the larger velocity magnitude advances by a unit step each
/// iteration, the other axis by the ratio of the two components, so shallow
/// diagonals cannot skip over a cell. At each step the fractional coordinate is
/// classified as an x-grid-line crossing, a y-grid-line crossing or a
/// through-the-middle move, and the crossing is passable only when both adjacent
/// cells are safe (no cutting through wall corners). Reaching a finish-line cell
/// takes precedence over collision detection.
pub(crate) fn trace(track: &Track, position: Position, velocity: Velocity) -> Trace {
    // the agent starts in the center of its cell
    let mut current_x = position.x as f64 + 0.5;
    let mut current_y = position.y as f64 + 0.5;

    let (x_rate, y_rate) = if velocity.x().abs() > velocity.y().abs() {
        let x_rate = velocity.x().signum() as f64;
        (x_rate, velocity.y() as f64 / velocity.x() as f64 * x_rate)
    } else if velocity.y() != 0 {
        let y_rate = velocity.y().signum() as f64;
        (velocity.x() as f64 / velocity.y() as f64 * y_rate, y_rate)
    } else {
        // zero velocity: the loop below terminates immediately
        (0.0, 0.0)
    };

    let end_position = position + velocity;
    let mut last_position = Position::new(as_cell(current_x), as_cell(current_y));
    current_x += x_rate;
    current_y += y_rate;

    while last_position != end_position {
        match check_crossing(track, velocity, current_x, current_y) {
            None => return Trace::Blocked(last_position),
            Some(current_position) => {
                // finish line is checked before collision handling so crossing it
                // is never mistaken for a crash
                if track.is_finish(current_position) {
                    return Trace::Finished;
                }

                current_x += x_rate;
                current_y += y_rate;
                last_position = current_position;
            }
        }
    }
    Trace::Clear
}

/// The cell the agent occupies after this step, or `None` if the step is blocked.
///
/// On a grid-line crossing both adjacent candidate cells must be safe; the one in
/// the direction of travel is selected.
fn check_crossing(track: &Track, velocity: Velocity, x: f64, y: f64) -> Option<Position> {
    if is_grid_line(x) {
        let left = Position::new(as_cell(x) - 1, as_cell(y));
        let right = Position::new(as_cell(x), as_cell(y));

        if track.is_safe(left) && track.is_safe(right) {
            return Some(if velocity.x() < 0 { left } else { right });
        }
    } else if is_grid_line(y) {
        let bottom = Position::new(as_cell(x), as_cell(y) - 1);
        let top = Position::new(as_cell(x), as_cell(y));

        if track.is_safe(bottom) && track.is_safe(top) {
            return Some(if velocity.y() < 0 { bottom } else { top });
        }
    } else {
        let current = Position::new(as_cell(x), as_cell(y));
        if track.is_safe(current) {
            return Some(current);
        }
    }
    None
}

fn is_grid_line(num: f64) -> bool {
    (num.round() - num).abs() <= GRID_EPSILON
}

/// Cell index for a fractional coordinate: round when within tolerance of a grid
/// line, otherwise floor.
fn as_cell(num: f64) -> i32 {
    if is_grid_line(num) {
        num.round() as i32
    } else {
        num.floor() as i32
    }
}

/// Collision model that stops the agent in place when a wall is hit.
pub struct Stop;

impl CollisionModel for Stop {
    fn next_state(&self, track: &Track, position: Position, velocity: Velocity) -> Outcome {
        match trace(track, position, velocity) {
            Trace::Finished => Outcome::Finished,
            Trace::Clear => Outcome::OnTrack(State::new(position + velocity, velocity)),
            Trace::Blocked(at) => Outcome::OnTrack(State::new(at, Velocity::zero())),
        }
    }
}

impl Display for Stop {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("stop model")
    }
}

/// Collision model that sends the agent back to the starting line when a wall is hit.
pub struct Restart;

impl CollisionModel for Restart {
    fn next_state(&self, track: &Track, position: Position, velocity: Velocity) -> Outcome {
        match trace(track, position, velocity) {
            Trace::Finished => Outcome::Finished,
            Trace::Clear => Outcome::OnTrack(State::new(position + velocity, velocity)),
            Trace::Blocked(_) => Outcome::OnTrack(State::new(track.starting_line()[0], Velocity::zero())),
        }
    }
}

impl Display for Restart {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("restart model")
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use crate::track::tests::{ALL_SAFE, WINDY};
    use crate::track::Track;

    use super::*;

    fn all_safe() -> Track {
        Track::parse(ALL_SAFE).unwrap()
    }

    #[rstest]
    #[case((0, 0), (3, 0), (3, 0))]
    #[case((3, 0), (0, 3), (3, 3))]
    #[case((3, 3), (-3, 0), (0, 3))]
    #[case((0, 3), (0, -3), (0, 0))]
    #[case((0, 0), (3, 3), (3, 3))]
    #[case((3, 0), (-3, 3), (0, 3))]
    #[case((0, 3), (3, -3), (3, 0))]
    #[case((3, 3), (-3, -3), (0, 0))]
    fn test_no_collision_all_octants(
        #[case] from: (i32, i32),
        #[case] velocity: (i32, i32),
        #[case] expected: (i32, i32),
    ) {
        let track = all_safe();
        assert_eq!(
            trace(&track, Position::new(from.0, from.1), Velocity::new(velocity.0, velocity.1)),
            Trace::Clear
        );
        let end = Position::new(from.0, from.1) + Velocity::new(velocity.0, velocity.1);
        assert_eq!(end, Position::new(expected.0, expected.1));
    }

    #[rstest]
    #[case((2, 2), (4, 1))]
    #[case((2, 2), (1, 4))]
    #[case((2, 2), (4, 3))]
    #[case((0, 0), (4, 2))]
    fn test_no_collision_shallow_diagonals(#[case] from: (i32, i32), #[case] velocity: (i32, i32)) {
        // dominant-axis stepping must not skip cells or report phantom walls
        let track = Track::parse("9,9\n.........\n.........\n.........\n.........\n.........\n.........\n.........\n.........\n.........\n").unwrap();
        assert_eq!(
            trace(&track, Position::new(from.0, from.1), Velocity::new(velocity.0, velocity.1)),
            Trace::Clear
        );
    }

    #[test]
    fn test_finish_precedes_collision() {
        let track = all_safe();

        // both paths cross the finish cell at (4, 4); the second would afterwards
        // run out of bounds
        assert_eq!(trace(&track, Position::new(0, 0), Velocity::new(4, 4)), Trace::Finished);
        assert_eq!(trace(&track, Position::new(2, 2), Velocity::new(4, 4)), Trace::Finished);
    }

    #[rstest]
    #[case((2, 2), (-5, 0), (0, 2))]
    #[case((2, 2), (5, 0), (4, 2))]
    #[case((2, 2), (0, -5), (2, 0))]
    #[case((2, 2), (0, 5), (2, 4))]
    fn test_edge_collision(#[case] from: (i32, i32), #[case] velocity: (i32, i32), #[case] stop: (i32, i32)) {
        let track = all_safe();
        assert_eq!(
            trace(&track, Position::new(from.0, from.1), Velocity::new(velocity.0, velocity.1)),
            Trace::Blocked(Position::new(stop.0, stop.1))
        );
    }

    #[test]
    fn test_wall_corner_cannot_be_cut() {
        // the path from (0,0) with velocity (4,2) crosses the y grid line at
        // (1.5, 1.0); the upper adjacent cell (1,1) is a wall, so the crossing is
        // blocked even though the lower cell is safe
        let track = Track::parse("5,5\n.....\n.#...\n.....\n.....\n.....\n").unwrap();
        assert_eq!(trace(&track, Position::new(0, 0), Velocity::new(4, 2)), Trace::Blocked(Position::new(0, 0)));
    }

    #[test]
    fn test_diagonal_through_wall_cell_is_blocked() {
        let track = Track::parse("3,3\n..#\n.#.\n...\n").unwrap();
        assert_eq!(trace(&track, Position::new(0, 0), Velocity::new(2, 2)), Trace::Blocked(Position::new(0, 0)));
    }

    #[test]
    fn test_wall_stops_before_the_wall_cell() {
        let track = Track::parse(WINDY).unwrap();
        // moving east from (0, 3) hits the wall at (1, 3)
        assert_eq!(trace(&track, Position::new(0, 3), Velocity::new(2, 0)), Trace::Blocked(Position::new(0, 3)));
    }

    #[test]
    fn test_zero_velocity_is_a_no_op() {
        let track = all_safe();
        assert_eq!(trace(&track, Position::new(2, 2), Velocity::zero()), Trace::Clear);
    }

    #[test]
    fn test_stop_model() {
        let track = Track::parse(WINDY).unwrap();

        // clean move keeps the attempted velocity
        let v = Velocity::new(0, 2);
        assert_eq!(
            Stop.next_state(&track, Position::new(0, 0), v),
            Outcome::OnTrack(State::new(Position::new(0, 2), v))
        );

        // blocked move zeroes the velocity at the collision point
        assert_eq!(
            Stop.next_state(&track, Position::new(0, 3), Velocity::new(2, 0)),
            Outcome::OnTrack(State::new(Position::new(0, 3), Velocity::zero()))
        );

        // crossing the finish line ends the episode
        assert_eq!(Stop.next_state(&track, Position::new(0, 4), Velocity::new(0, 2)), Outcome::Finished);
    }

    #[test]
    fn test_restart_model() {
        let track = Track::parse(WINDY).unwrap();

        // same clean-move behavior as the stop model
        let v = Velocity::new(0, 2);
        assert_eq!(
            Restart.next_state(&track, Position::new(0, 0), v),
            Outcome::OnTrack(State::new(Position::new(0, 2), v))
        );

        // blocked move resets to the starting line
        assert_eq!(
            Restart.next_state(&track, Position::new(0, 3), Velocity::new(2, 0)),
            Outcome::OnTrack(State::new(Position::new(0, 0), Velocity::zero()))
        );

        assert_eq!(Restart.next_state(&track, Position::new(0, 4), Velocity::new(0, 2)), Outcome::Finished);
    }

    #[rstest]
    #[case((3, 1))]
    #[case((1, 3))]
    #[case((3, 3))]
    fn test_octant_symmetry(#[case] velocity: (i32, i32)) {
        // on a fully symmetric track, mirrored moves land on mirrored cells
        let track = Track::parse("7,7\n.......\n.......\n.......\n.......\n.......\n.......\n.......\n").unwrap();
        let center = Position::new(3, 3);
        let (vx, vy) = velocity;

        for (mx, my) in [(1, 1), (-1, 1), (1, -1), (-1, -1)] {
            let result = trace(&track, center, Velocity::new(vx * mx, vy * my));
            assert_eq!(result, Trace::Clear, "mirror ({mx}, {my}) of {velocity:?} should move cleanly");
        }
    }
}
