use std::fmt::{Display, Formatter};

use anyhow::Result;
use rand::Rng;
use rustc_hash::FxHashSet;

use crate::model::Position;
use crate::prelude::RaceError;

/// Immutable description of a racetrack: a safety grid plus the start and finish lines.
///
/// A position is safe iff it is in-bounds and not marked as a wall; everything
/// out-of-bounds is unsafe.
pub struct Track {
    // column-major: index = x * height + y
    safe: Vec<bool>,
    width: i32,
    height: i32,
    name: Option<String>,
    starting_line: Vec<Position>,
    finish_line: FxHashSet<Position>,
}

impl Track {
    /// Parses a textual track description.
    ///
    /// Format: a first line `"<height>,<width>"`, followed by `height` rows of at
    /// least `width` characters each. `#` marks a wall, `S` a start-line cell,
    /// `F` a finish-line cell; any other character is a plain safe cell.
    ///
    /// A track is either fully valid or not constructed: a malformed header, a
    /// missing row or a row shorter than the declared width all fail the parse.
    ///
    /// Start and finish lines may be empty. Such tracks are fine for pure
    /// collision checks, but [Self::random_starting_position] and the restart
    /// collision model require at least one start-line cell.
    pub fn parse(text: &str) -> Result<Track> {
        let mut lines = text.lines();
        let header = lines.next().ok_or_else(|| RaceError::from("empty track description"))?;

        let (height, width) = header
            .split_once(',')
            .and_then(|(h, w)| Some((h.trim().parse::<i32>().ok()?, w.trim().parse::<i32>().ok()?)))
            .filter(|&(h, w)| h > 0 && w > 0)
            .ok_or_else(|| RaceError(format!("malformed track header '{header}', expected '<height>,<width>'")))?;

        let mut safe = vec![false; (width * height) as usize];
        let mut starting_line = Vec::new();
        let mut finish_line = FxHashSet::default();

        for y in 0..height {
            let row = lines
                .next()
                .ok_or_else(|| RaceError(format!("track ends after {y} rows, header declared {height}")))?;
            let cells: Vec<char> = row.chars().collect();
            if (cells.len() as i32) < width {
                return Err(RaceError(format!(
                    "row {} has {} cells, header declared a width of {}",
                    y,
                    cells.len(),
                    width
                ))
                .into());
            }

            for x in 0..width {
                let cell = cells[x as usize];
                safe[(x * height + y) as usize] = cell != '#';

                if cell == 'S' {
                    starting_line.push(Position::new(x, y));
                } else if cell == 'F' {
                    finish_line.insert(Position::new(x, y));
                }
            }
        }

        Ok(Track {
            safe,
            width,
            height,
            name: None,
            starting_line,
            finish_line,
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Whether the given position is safe to be on.
    pub fn is_safe(&self, position: Position) -> bool {
        if position.x < 0 || position.x >= self.width || position.y < 0 || position.y >= self.height {
            return false;
        }
        self.safe[(position.x * self.height + position.y) as usize]
    }

    pub fn starting_line(&self) -> &[Position] {
        &self.starting_line
    }

    pub fn finish_line(&self) -> &FxHashSet<Position> {
        &self.finish_line
    }

    pub fn is_finish(&self, position: Position) -> bool {
        self.finish_line.contains(&position)
    }

    /// A uniformly chosen start-line position.
    ///
    /// Panics if the track has no start-line cells.
    pub fn random_starting_position(&self, rng: &mut impl Rng) -> Position {
        self.starting_line[rng.gen_range(0..self.starting_line.len())]
    }
}

impl Display for Track {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Racetrack({})", self.name.as_deref().unwrap_or("unnamed"))
    }
}
