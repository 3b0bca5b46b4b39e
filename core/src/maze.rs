//! Grid maze with corner beacons.
//!
//! The maze is described by rows of cell codes, row 0 at the top:
//!
//! - `0`: free space,
//! - `1`: wall,
//! - `2`: wall with a beacon at each of its four corners.
//!
//! World coordinates put the origin at the bottom-left corner of the grid. The cell in row `r`,
//! column `c` covers `x ∈ [c, c + 1)` and `y ∈ [height - r - 1, height - r)`.
use std::collections::BTreeSet;
use std::fmt::{self, Display};

use anyhow::{Context, bail};
use nalgebra::Point2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::Environment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cell {
    Free,
    Wall,
    Beacon,
}
impl Cell {
    pub fn code(self) -> u8 {
        match self {
            Cell::Free => 0,
            Cell::Wall => 1,
            Cell::Beacon => 2,
        }
    }
    pub fn is_free(self) -> bool {
        self == Cell::Free
    }
}
impl TryFrom<u8> for Cell {
    type Error = anyhow::Error;
    fn try_from(code: u8) -> anyhow::Result<Self> {
        match code {
            0 => Ok(Cell::Free),
            1 => Ok(Cell::Wall),
            2 => Ok(Cell::Beacon),
            other => bail!("unknown cell code {other}, expected 0 (free), 1 (wall) or 2 (beacon)"),
        }
    }
}

const O: Cell = Cell::Free;
const W: Cell = Cell::Wall;
const B: Cell = Cell::Beacon;

/// The 10 by 10 demonstration maze.
pub const REFERENCE_MAZE: [[Cell; 10]; 10] = [
    [W, W, O, O, B, O, O, O, O, W],
    [W, B, O, O, W, W, O, O, O, O],
    [O, W, W, O, O, O, O, W, O, W],
    [O, O, O, O, W, O, O, W, W, B],
    [W, W, O, W, W, B, O, O, W, O],
    [W, W, W, O, W, W, W, O, B, O],
    [B, O, O, O, O, O, O, O, O, O],
    [W, B, O, W, W, W, W, O, O, O],
    [O, O, O, O, W, O, O, O, W, O],
    [O, O, W, O, O, B, W, W, W, O],
];

/// Serializable maze layout, as rows of cell codes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MazeConfig {
    pub cells: Vec<Vec<u8>>,
}
impl Default for MazeConfig {
    fn default() -> Self {
        MazeConfig {
            cells: REFERENCE_MAZE
                .iter()
                .map(|row| row.iter().map(|c| c.code()).collect())
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Maze {
    cells: Vec<Vec<Cell>>,
    width: usize,
    height: usize,
    beacons: Vec<Point2<f64>>,
}
impl Display for Maze {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            let line: String = row
                .iter()
                .map(|c| match c {
                    Cell::Free => '.',
                    Cell::Wall => '#',
                    Cell::Beacon => 'B',
                })
                .collect();
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
impl Default for Maze {
    fn default() -> Self {
        Maze::reference()
    }
}
impl Maze {
    /// Build a maze from rows of cell codes.
    pub fn new(rows: &[Vec<u8>]) -> anyhow::Result<Maze> {
        let Some(first) = rows.first() else {
            bail!("maze has no rows");
        };
        let width = first.len();
        if width == 0 {
            bail!("maze rows are empty");
        }
        let mut cells = Vec::with_capacity(rows.len());
        for (r, row) in rows.iter().enumerate() {
            if row.len() != width {
                bail!(
                    "maze row {r} has {} cells, expected {width} like row 0",
                    row.len()
                );
            }
            let parsed = row
                .iter()
                .enumerate()
                .map(|(c, &code)| Cell::try_from(code).with_context(|| format!("cell ({r}, {c})")))
                .collect::<anyhow::Result<Vec<Cell>>>()?;
            cells.push(parsed);
        }
        let maze = Maze::from_cells(cells);
        if !maze.cells.iter().flatten().any(|c| c.is_free()) {
            bail!("maze has no free cell");
        }
        if maze.beacons.is_empty() {
            bail!("maze has no beacon");
        }
        Ok(maze)
    }
    pub fn from_config(config: &MazeConfig) -> anyhow::Result<Maze> {
        Maze::new(&config.cells)
    }
    /// The built-in 10 by 10 demonstration maze.
    pub fn reference() -> Maze {
        Maze::from_cells(REFERENCE_MAZE.iter().map(|row| row.to_vec()).collect())
    }
    fn from_cells(cells: Vec<Vec<Cell>>) -> Maze {
        let height = cells.len();
        let width = cells.first().map_or(0, Vec::len);
        let mut corners = BTreeSet::new();
        for (r, row) in cells.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if *cell == Cell::Beacon {
                    let y = height - r - 1;
                    corners.extend([(c, y), (c + 1, y), (c, y + 1), (c + 1, y + 1)]);
                }
            }
        }
        let beacons = corners
            .into_iter()
            .map(|(x, y)| Point2::new(x as f64, y as f64))
            .collect();
        Maze {
            cells,
            width,
            height,
            beacons,
        }
    }
    pub fn width(&self) -> usize {
        self.width
    }
    pub fn height(&self) -> usize {
        self.height
    }
    pub fn beacons(&self) -> &[Point2<f64>] {
        &self.beacons
    }
    pub fn is_in(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }
    /// Cell covering a world coordinate, `None` outside the grid.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<Cell> {
        if !self.is_in(x, y) {
            return None;
        }
        let row = self.height - y as usize - 1;
        self.cells.get(row)?.get(x as usize).copied()
    }
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.cells
    }
}
impl Environment for Maze {
    fn is_free(&self, x: f64, y: f64) -> bool {
        self.cell_at(x, y).is_some_and(Cell::is_free)
    }
    fn distance_to_nearest_beacon(&self, x: f64, y: f64) -> f64 {
        let here = Point2::new(x, y);
        self.beacons
            .iter()
            .map(|b| nalgebra::distance(b, &here))
            .fold(f64::INFINITY, f64::min)
    }
    fn random_free_place<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        loop {
            let x = rng.random_range(0.0..self.width as f64);
            let y = rng.random_range(0.0..self.height as f64);
            if self.is_free(x, y) {
                return (x, y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small() -> Maze {
        // . B
        // . #
        Maze::new(&[vec![0, 2], vec![0, 1]]).expect("valid maze")
    }

    #[test]
    fn reference_dimensions() {
        let maze = Maze::reference();
        assert_eq!(maze.width(), 10);
        assert_eq!(maze.height(), 10);
        assert_eq!(Maze::from_config(&MazeConfig::default()).ok(), Some(maze));
    }

    #[test]
    fn coordinates_flip_rows() {
        let maze = small();
        // Row 0 is the top row, so the beacon cell covers x in [1, 2), y in [1, 2).
        assert_eq!(maze.cell_at(1.5, 1.5), Some(Cell::Beacon));
        assert_eq!(maze.cell_at(1.5, 0.5), Some(Cell::Wall));
        assert!(maze.is_free(0.5, 0.5));
        assert!(maze.is_free(0.5, 1.99));
        assert!(!maze.is_free(1.0, 0.0));
    }

    #[test]
    fn outside_is_not_free() {
        let maze = small();
        assert!(!maze.is_free(-0.01, 0.5));
        assert!(!maze.is_free(0.5, -0.01));
        assert!(!maze.is_free(0.5, 2.0));
        assert!(!maze.is_free(2.0, 0.5));
        assert_eq!(maze.cell_at(5.0, 5.0), None);
    }

    #[test]
    fn beacons_are_deduplicated_corners() {
        let maze = Maze::new(&[vec![2, 2], vec![0, 0]]).expect("valid maze");
        // Two adjacent beacon cells share an edge: 6 distinct corners.
        assert_eq!(maze.beacons().len(), 6);
        assert!(maze.beacons().contains(&Point2::new(1.0, 1.0)));
        assert!(maze.beacons().contains(&Point2::new(2.0, 2.0)));
        assert_eq!(small().beacons().len(), 4);
    }

    #[test]
    fn nearest_beacon_distance() {
        let maze = small();
        assert_approx_eq!(maze.distance_to_nearest_beacon(0.5, 0.5), 0.5f64.hypot(0.5), 1e-12);
        assert_approx_eq!(maze.distance_to_nearest_beacon(1.0, 1.0), 0.0, 1e-12);
        assert_approx_eq!(maze.distance_to_nearest_beacon(0.0, 1.5), 1.0f64.hypot(0.5), 1e-12);
    }

    #[test]
    fn distance_is_euclidean() {
        let maze = small();
        assert_approx_eq!(maze.distance(0.0, 0.0, 3.0, 4.0), 5.0, 1e-12);
    }

    #[test]
    fn random_free_place_is_free() {
        let maze = Maze::reference();
        let mut rng = StdRng::seed_from_u64(31);
        for _ in 0..500 {
            let (x, y) = maze.random_free_place(&mut rng);
            assert!(maze.is_free(x, y), "({x}, {y}) is not free");
        }
    }

    #[test]
    fn construction_errors() {
        assert!(Maze::new(&[]).is_err());
        assert!(Maze::new(&[vec![]]).is_err());
        assert!(Maze::new(&[vec![0, 2], vec![0]]).is_err());
        assert!(Maze::new(&[vec![0, 3]]).is_err());
        assert!(Maze::new(&[vec![1, 2]]).is_err());
        assert!(Maze::new(&[vec![0, 1]]).is_err());
        let err = Maze::new(&[vec![0, 7]]).unwrap_err();
        assert!(format!("{err:#}").contains("unknown cell code 7"));
    }

    #[test]
    fn display_draws_grid() {
        assert_eq!(small().to_string(), ".B\n.#\n");
    }
}
