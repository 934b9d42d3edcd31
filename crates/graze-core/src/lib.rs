//! Core turn engine for the Graze grid ecosystem.
//!
//! A `WorldState` owns the cell grid, the configuration, the RNG, and the
//! snapshot history. One call to [`WorldState::step`] runs the ordered rule
//! phases (growth, reset, action, death, bookkeeping) when the history
//! cursor sits at the end of the log, or replays the next stored snapshot
//! when it does not. Rendering, control panels, and persistence live in
//! sibling crates and only read snapshot data out of this one.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

/// High level simulation clock (turns processed since the initial placement).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Turn(pub u64);

impl Turn {
    /// Returns the next sequential turn.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the turn counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Grid coordinate, valid in `[0, grid_size)` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    /// Construct a new coordinate.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// The four orthogonal direction offsets in up/right/down/left order.
pub const ORTHOGONAL: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Candidate list for the 4-neighborhood queries; never heap-allocates.
pub type NeighborList = SmallVec<[Coord; 4]>;

/// Injectable source of uniform picks and direction shuffles.
///
/// Every stochastic choice in the engine goes through this trait so tests
/// can substitute a scripted sequence for the default seeded [`SmallRng`].
pub trait RandomSource: Send {
    /// Uniform pick in `[0, upper)`. Callers guarantee `upper > 0`.
    fn pick_index(&mut self, upper: usize) -> usize;

    /// Fisher-Yates shuffle of the four orthogonal directions.
    fn shuffled_directions(&mut self) -> [(i32, i32); 4] {
        let mut dirs = ORTHOGONAL;
        for i in (1..dirs.len()).rev() {
            let j = self.pick_index(i + 1);
            dirs.swap(i, j);
        }
        dirs
    }

    /// Uniform pick from a candidate list; `None` when the list is empty.
    fn pick_coord(&mut self, cells: &[Coord]) -> Option<Coord> {
        if cells.is_empty() {
            None
        } else {
            Some(cells[self.pick_index(cells.len())])
        }
    }
}

impl<R: Rng + Send> RandomSource for R {
    fn pick_index(&mut self, upper: usize) -> usize {
        self.random_range(0..upper)
    }
}

/// Mobile energy-bearing agent. Removed by the death phase at `energy <= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Herbivore {
    pub energy: i32,
    /// Per-turn latch; a herbivore acts at most once per turn no matter
    /// where the row-major scan finds it after moving.
    pub has_acted: bool,
}

impl Herbivore {
    /// Construct a herbivore that has not yet acted this turn.
    #[must_use]
    pub const fn new(energy: i32) -> Self {
        Self {
            energy,
            has_acted: false,
        }
    }
}

/// One grid cell: a plant presence flag plus an exclusively owned herbivore
/// slot. A cell may hold both at once (a herbivore standing on ungrazed
/// growth).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cell {
    pub plant: bool,
    pub herbivore: Option<Herbivore>,
}

/// Square cell matrix with row-major storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    size: u32,
    cells: Vec<Cell>,
}

impl Grid {
    /// Construct an empty `size x size` grid. Callers validate `size > 0`
    /// through [`GrazeConfig::validate`] or [`Snapshot::grid_size`].
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            size,
            cells: vec![Cell::default(); (size as usize) * (size as usize)],
        }
    }

    /// Grid side length.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Row-major access to all cells.
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Mutable row-major access to all cells.
    #[must_use]
    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    #[inline]
    fn offset(&self, coord: Coord) -> usize {
        (coord.y as usize) * (self.size as usize) + (coord.x as usize)
    }

    /// Immutable access to a specific cell.
    #[must_use]
    pub fn get(&self, coord: Coord) -> Option<&Cell> {
        if coord.x < self.size && coord.y < self.size {
            self.cells.get(self.offset(coord))
        } else {
            None
        }
    }

    /// Mutable access to a specific cell.
    pub fn get_mut(&mut self, coord: Coord) -> Option<&mut Cell> {
        if coord.x < self.size && coord.y < self.size {
            let idx = self.offset(coord);
            self.cells.get_mut(idx)
        } else {
            None
        }
    }

    /// Whether the cell at `coord` carries a plant marker.
    #[must_use]
    pub fn plant_at(&self, coord: Coord) -> bool {
        self.get(coord).is_some_and(|cell| cell.plant)
    }

    /// Set or clear the plant marker at `coord`.
    pub fn set_plant(&mut self, coord: Coord, present: bool) {
        if let Some(cell) = self.get_mut(coord) {
            cell.plant = present;
        }
    }

    /// Borrow the herbivore at `coord`, if any.
    #[must_use]
    pub fn herbivore(&self, coord: Coord) -> Option<&Herbivore> {
        self.get(coord).and_then(|cell| cell.herbivore.as_ref())
    }

    /// Mutably borrow the herbivore at `coord`, if any.
    pub fn herbivore_mut(&mut self, coord: Coord) -> Option<&mut Herbivore> {
        self.get_mut(coord).and_then(|cell| cell.herbivore.as_mut())
    }

    /// Place a herbivore at `coord`, returning any displaced occupant.
    pub fn place_herbivore(&mut self, coord: Coord, herbivore: Herbivore) -> Option<Herbivore> {
        self.get_mut(coord)
            .and_then(|cell| cell.herbivore.replace(herbivore))
    }

    /// Remove and return the herbivore at `coord`.
    pub fn take_herbivore(&mut self, coord: Coord) -> Option<Herbivore> {
        self.get_mut(coord).and_then(|cell| cell.herbivore.take())
    }

    /// Resolve an orthogonal offset against the grid bounds.
    #[must_use]
    pub fn neighbor(&self, origin: Coord, (dx, dy): (i32, i32)) -> Option<Coord> {
        let nx = i64::from(origin.x) + i64::from(dx);
        let ny = i64::from(origin.y) + i64::from(dy);
        let size = i64::from(self.size);
        if (0..size).contains(&nx) && (0..size).contains(&ny) {
            Some(Coord::new(nx as u32, ny as u32))
        } else {
            None
        }
    }

    /// In-bounds orthogonal neighbors with neither plant nor herbivore.
    #[must_use]
    pub fn empty_neighbors(&self, origin: Coord) -> NeighborList {
        let mut result = NeighborList::new();
        for offset in ORTHOGONAL {
            if let Some(coord) = self.neighbor(origin, offset)
                && self
                    .get(coord)
                    .is_some_and(|cell| !cell.plant && cell.herbivore.is_none())
            {
                result.push(coord);
            }
        }
        result
    }

    /// In-bounds orthogonal neighbors a newborn could occupy: any cell with
    /// no herbivore, plant-bearing or not.
    #[must_use]
    pub fn reproduction_candidates(&self, origin: Coord) -> NeighborList {
        let mut result = NeighborList::new();
        for offset in ORTHOGONAL {
            if let Some(coord) = self.neighbor(origin, offset)
                && self.get(coord).is_some_and(|cell| cell.herbivore.is_none())
            {
                result.push(coord);
            }
        }
        result
    }
}

/// Serialized record for one cell: plant flag (0/1) and herbivore energy
/// (0 = absent). Field names on the wire match the original history format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    #[serde(rename = "grass")]
    pub plant: u8,
    #[serde(rename = "herbivore")]
    pub energy: i32,
}

/// Errors raised when validating a snapshot's shape.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot has no rows")]
    Empty,
    #[error("snapshot row {row} has {actual} cells, expected {expected}")]
    NotSquare {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Immutable, minimal record of a full grid at one turn. Row-major; never
/// carries the per-turn `has_acted` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    rows: Vec<Vec<CellRecord>>,
}

impl Snapshot {
    /// Serialize a grid into flag/energy pairs.
    #[must_use]
    pub fn encode(grid: &Grid) -> Self {
        let size = grid.size() as usize;
        let mut rows = Vec::with_capacity(size);
        for chunk in grid.cells().chunks(size.max(1)) {
            let row = chunk
                .iter()
                .map(|cell| CellRecord {
                    plant: u8::from(cell.plant),
                    energy: cell.herbivore.as_ref().map_or(0, |herb| herb.energy),
                })
                .collect();
            rows.push(row);
        }
        Self { rows }
    }

    /// Validate squareness and return the side length.
    pub fn grid_size(&self) -> Result<u32, SnapshotError> {
        let size = self.rows.len();
        if size == 0 {
            return Err(SnapshotError::Empty);
        }
        for (row, cells) in self.rows.iter().enumerate() {
            if cells.len() != size {
                return Err(SnapshotError::NotSquare {
                    row,
                    expected: size,
                    actual: cells.len(),
                });
            }
        }
        Ok(size as u32)
    }

    /// Reconstruct a grid. Herbivores come back with `has_acted = false`;
    /// a record with `energy <= 0` decodes to no herbivore.
    pub fn decode(&self) -> Result<Grid, SnapshotError> {
        let size = self.grid_size()?;
        let mut grid = Grid::new(size);
        for (y, row) in self.rows.iter().enumerate() {
            for (x, record) in row.iter().enumerate() {
                let coord = Coord::new(x as u32, y as u32);
                if let Some(cell) = grid.get_mut(coord) {
                    cell.plant = record.plant != 0;
                    cell.herbivore = (record.energy > 0).then(|| Herbivore::new(record.energy));
                }
            }
        }
        Ok(grid)
    }

    /// Raw row access for inspection.
    #[must_use]
    pub fn rows(&self) -> &[Vec<CellRecord>] {
        &self.rows
    }
}

/// Errors raised when installing an externally supplied history.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history must contain at least one snapshot")]
    Empty,
    #[error("snapshot {index} is invalid: {source}")]
    Snapshot {
        index: usize,
        source: SnapshotError,
    },
    #[error("snapshot {index} has grid size {actual}, expected {expected}")]
    SizeMismatch {
        index: usize,
        expected: u32,
        actual: u32,
    },
}

/// Append-only sequence of snapshots plus the replay cursor.
///
/// Index 0 is always the initial placement. The cursor selects the snapshot
/// currently shown; a cursor before the end of the log puts the engine in
/// replay mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryLog {
    snapshots: Vec<Snapshot>,
    cursor: usize,
}

impl HistoryLog {
    /// Construct an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns true when no snapshots are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Current cursor position.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the cursor sits on the latest snapshot (live mode).
    #[must_use]
    pub fn at_end(&self) -> bool {
        self.cursor + 1 >= self.snapshots.len()
    }

    /// Borrow the snapshot at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.snapshots.get(index)
    }

    /// All stored snapshots in turn order.
    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Append a snapshot and move the cursor onto it.
    pub fn push(&mut self, snapshot: Snapshot) {
        self.snapshots.push(snapshot);
        self.cursor = self.snapshots.len() - 1;
    }

    /// Move the cursor one snapshot forward, returning the new current
    /// snapshot; `None` when already at the end.
    pub fn advance(&mut self) -> Option<&Snapshot> {
        if self.at_end() {
            return None;
        }
        self.cursor += 1;
        self.snapshots.get(self.cursor)
    }

    /// Reposition the cursor. Out-of-range indices are ignored.
    pub fn seek(&mut self, index: usize) -> bool {
        if index < self.snapshots.len() {
            self.cursor = index;
            true
        } else {
            false
        }
    }

    /// Replace the whole sequence with an externally supplied one, resetting
    /// the cursor to 0. Every snapshot is validated before any state changes;
    /// on error the existing log is untouched.
    pub fn replace(&mut self, snapshots: Vec<Snapshot>) -> Result<u32, HistoryError> {
        let first = snapshots.first().ok_or(HistoryError::Empty)?;
        let expected = first
            .grid_size()
            .map_err(|source| HistoryError::Snapshot { index: 0, source })?;
        for (index, snapshot) in snapshots.iter().enumerate().skip(1) {
            let size = snapshot
                .grid_size()
                .map_err(|source| HistoryError::Snapshot { index, source })?;
            if size != expected {
                return Err(HistoryError::SizeMismatch {
                    index,
                    expected,
                    actual: size,
                });
            }
        }
        self.snapshots = snapshots;
        self.cursor = 0;
        Ok(expected)
    }

    /// Discard all snapshots and reset the cursor.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.cursor = 0;
    }
}

/// Errors that can occur when constructing world state.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Movement-preference policy applied in the action phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MovePreference {
    /// Move onto an adjacent plant cell when one exists, else onto an empty
    /// cell.
    #[default]
    PreferPlant,
    /// Move onto a uniformly random member of the pooled plant and empty
    /// candidates.
    Random,
}

/// Tunables consumed by the turn engine. Structural fields (grid size, cell
/// size, initial counts, initial health) force a full reset when changed;
/// the rest take effect on the next live turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrazeConfig {
    /// Side length of the square grid, in cells.
    pub grid_size: u32,
    /// Rendered size of one cell in pixels; a hint for drawing collaborators.
    pub cell_size: u32,
    /// Number of turns between growth phases.
    pub grass_grow_interval: u32,
    /// Energy gained by eating one plant.
    pub grass_energy: i32,
    /// Energy assigned to initially placed and newborn herbivores.
    pub herbivore_initial_health: i32,
    /// Minimum post-move energy required to attempt reproduction.
    pub herbivore_reproduction_threshold: i32,
    /// Satiation threshold; a herbivore at or above it will not eat.
    pub herbivore_full_threshold: i32,
    /// Movement-preference policy.
    pub move_preference: MovePreference,
    /// Plants placed at reset.
    pub initial_grass_count: u32,
    /// Herbivores placed at reset.
    pub initial_herbivore_count: u32,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for GrazeConfig {
    fn default() -> Self {
        Self {
            grid_size: 50,
            cell_size: 18,
            grass_grow_interval: 10,
            grass_energy: 8,
            herbivore_initial_health: 10,
            herbivore_reproduction_threshold: 20,
            herbivore_full_threshold: 20,
            move_preference: MovePreference::PreferPlant,
            initial_grass_count: 200,
            initial_herbivore_count: 30,
            rng_seed: None,
        }
    }
}

impl GrazeConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), WorldError> {
        if self.grid_size == 0 {
            return Err(WorldError::InvalidConfig("grid_size must be non-zero"));
        }
        if self.cell_size == 0 {
            return Err(WorldError::InvalidConfig("cell_size must be non-zero"));
        }
        if self.grass_grow_interval == 0 {
            return Err(WorldError::InvalidConfig(
                "grass_grow_interval must be non-zero",
            ));
        }
        if self.grass_energy < 1 {
            return Err(WorldError::InvalidConfig("grass_energy must be positive"));
        }
        if self.herbivore_initial_health < 1 {
            return Err(WorldError::InvalidConfig(
                "herbivore_initial_health must be positive",
            ));
        }
        if self.herbivore_reproduction_threshold < 1 {
            return Err(WorldError::InvalidConfig(
                "herbivore_reproduction_threshold must be positive",
            ));
        }
        if self.herbivore_full_threshold < 1 {
            return Err(WorldError::InvalidConfig(
                "herbivore_full_threshold must be positive",
            ));
        }
        let cells = u64::from(self.grid_size) * u64::from(self.grid_size);
        if u64::from(self.initial_grass_count) > cells {
            return Err(WorldError::InvalidConfig(
                "initial_grass_count exceeds the cell count",
            ));
        }
        if u64::from(self.initial_herbivore_count) > cells {
            return Err(WorldError::InvalidConfig(
                "initial_herbivore_count exceeds the cell count",
            ));
        }
        Ok(())
    }

    /// Whether switching to `other` requires discarding history and
    /// reseeding initial entities.
    #[must_use]
    pub fn is_structural_change(&self, other: &Self) -> bool {
        self.grid_size != other.grid_size
            || self.cell_size != other.cell_size
            || self.initial_grass_count != other.initial_grass_count
            || self.initial_herbivore_count != other.initial_herbivore_count
            || self.herbivore_initial_health != other.herbivore_initial_health
    }

    /// Returns the configured RNG, seeding from entropy when no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// Live population totals computed from the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationCounts {
    pub herbivores: usize,
    pub plants: usize,
}

/// Events emitted after processing one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnEvents {
    pub turn: Turn,
    /// True when the turn was served from the history log instead of the
    /// rule phases.
    pub replayed: bool,
    pub growth_ran: bool,
    pub births: usize,
    pub deaths: usize,
}

/// Aggregate simulation state: grid, clock, RNG, history, and metric series.
pub struct WorldState {
    config: GrazeConfig,
    grid: Grid,
    turn: Turn,
    rng: Box<dyn RandomSource>,
    history: HistoryLog,
    herbivore_series: Vec<usize>,
    plant_series: Vec<usize>,
    last_births: usize,
    last_deaths: usize,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("turn", &self.turn)
            .field("history_len", &self.history.len())
            .field("cursor", &self.history.cursor())
            .finish()
    }
}

impl WorldState {
    /// Instantiate a new world using the supplied configuration and its
    /// seeded RNG, placing initial entities and snapshot 0.
    pub fn new(config: GrazeConfig) -> Result<Self, WorldError> {
        let rng = Box::new(config.seeded_rng());
        Self::with_random_source(config, rng)
    }

    /// Instantiate a new world with an injected random source.
    pub fn with_random_source(
        config: GrazeConfig,
        rng: Box<dyn RandomSource>,
    ) -> Result<Self, WorldError> {
        config.validate()?;
        let grid = Grid::new(config.grid_size);
        let mut world = Self {
            config,
            grid,
            turn: Turn::zero(),
            rng,
            history: HistoryLog::new(),
            herbivore_series: Vec::new(),
            plant_series: Vec::new(),
            last_births: 0,
            last_deaths: 0,
        };
        world.place_initial_entities();
        Ok(world)
    }

    fn random_coord(&mut self) -> Coord {
        let size = self.grid.size() as usize;
        let x = self.rng.pick_index(size) as u32;
        let y = self.rng.pick_index(size) as u32;
        Coord::new(x, y)
    }

    /// Scatter the configured initial plants and herbivores by rejection
    /// sampling, then record the baseline snapshot at index 0.
    fn place_initial_entities(&mut self) {
        let mut placed = 0;
        while placed < self.config.initial_grass_count {
            let coord = self.random_coord();
            let free = self
                .grid
                .get(coord)
                .is_some_and(|cell| !cell.plant && cell.herbivore.is_none());
            if free {
                self.grid.set_plant(coord, true);
                placed += 1;
            }
        }

        let mut placed = 0;
        while placed < self.config.initial_herbivore_count {
            let coord = self.random_coord();
            if self.grid.herbivore(coord).is_none() {
                self.grid
                    .place_herbivore(coord, Herbivore::new(self.config.herbivore_initial_health));
                placed += 1;
            }
        }

        self.history.push(Snapshot::encode(&self.grid));
    }

    /// Advance the simulation one turn.
    ///
    /// With the cursor at the end of the log this runs the full rule
    /// pipeline and appends a new snapshot; with the cursor before the end
    /// it restores the next stored snapshot instead and no rule executes.
    pub fn step(&mut self) -> TurnEvents {
        if self.history.at_end() {
            self.step_live()
        } else {
            self.step_replay()
        }
    }

    fn step_live(&mut self) -> TurnEvents {
        self.turn = self.turn.next();
        let growth_ran = self.stage_growth();
        self.stage_reset_flags();
        self.stage_actions();
        self.stage_deaths();
        self.stage_bookkeeping();
        TurnEvents {
            turn: self.turn,
            replayed: false,
            growth_ran,
            births: self.last_births,
            deaths: self.last_deaths,
        }
    }

    fn step_replay(&mut self) -> TurnEvents {
        let decoded = self.history.advance().map(Snapshot::decode);
        if let Some(Ok(grid)) = decoded {
            self.grid = grid;
        }
        self.turn = Turn(self.history.cursor() as u64);
        let counts = self.population();
        self.herbivore_series.push(counts.herbivores);
        self.plant_series.push(counts.plants);
        TurnEvents {
            turn: self.turn,
            replayed: true,
            ..TurnEvents::default()
        }
    }

    /// Growth phase: every plant cell nominates one uniformly random empty
    /// neighbor; targets are collected against the pre-growth grid and
    /// applied afterwards in scan order, first writer wins.
    fn stage_growth(&mut self) -> bool {
        let interval = u64::from(self.config.grass_grow_interval);
        if !self.turn.0.is_multiple_of(interval) {
            return false;
        }

        let size = self.grid.size();
        let mut targets: Vec<Coord> = Vec::new();
        for y in 0..size {
            for x in 0..size {
                let coord = Coord::new(x, y);
                if !self.grid.plant_at(coord) {
                    continue;
                }
                let candidates = self.grid.empty_neighbors(coord);
                if let Some(target) = self.rng.pick_coord(&candidates) {
                    targets.push(target);
                }
            }
        }
        for coord in targets {
            let free = self
                .grid
                .get(coord)
                .is_some_and(|cell| !cell.plant && cell.herbivore.is_none());
            if free {
                self.grid.set_plant(coord, true);
            }
        }
        true
    }

    fn stage_reset_flags(&mut self) {
        for cell in self.grid.cells_mut() {
            if let Some(herb) = cell.herbivore.as_mut() {
                herb.has_acted = false;
            }
        }
    }

    fn stage_actions(&mut self) {
        let size = self.grid.size();
        let mut births = 0;
        for y in 0..size {
            for x in 0..size {
                let coord = Coord::new(x, y);
                let ready = self.grid.herbivore(coord).is_some_and(|herb| !herb.has_acted);
                if ready {
                    births += self.act_herbivore(coord);
                }
            }
        }
        self.last_births = births;
    }

    /// Execute one herbivore's action, returning the number of births it
    /// produced (0 or 1).
    fn act_herbivore(&mut self, origin: Coord) -> usize {
        let full_threshold = self.config.herbivore_full_threshold;
        let dirs = self.rng.shuffled_directions();

        let mut plant_cells = NeighborList::new();
        let mut empty_cells = NeighborList::new();
        for dir in dirs {
            let Some(coord) = self.grid.neighbor(origin, dir) else {
                continue;
            };
            let Some(cell) = self.grid.get(coord) else {
                continue;
            };
            if cell.plant {
                plant_cells.push(coord);
            } else if cell.herbivore.is_none() {
                empty_cells.push(coord);
            }
        }

        let energy = match self.grid.herbivore(origin) {
            Some(herb) => herb.energy,
            None => return 0,
        };

        let (destination, eat) = match self.config.move_preference {
            MovePreference::PreferPlant => {
                if let Some(target) = self.rng.pick_coord(&plant_cells) {
                    (Some(target), energy < full_threshold)
                } else if let Some(target) = self.rng.pick_coord(&empty_cells) {
                    (Some(target), false)
                } else {
                    (None, false)
                }
            }
            MovePreference::Random => {
                let mut pool = plant_cells.clone();
                pool.extend_from_slice(&empty_cells);
                match self.rng.pick_coord(&pool) {
                    Some(target) => {
                        let has_plant = self.grid.plant_at(target);
                        (Some(target), has_plant && energy < full_threshold)
                    }
                    None => (None, false),
                }
            }
        };

        let Some(target) = destination else {
            // Pinned in place: the turn still costs one energy.
            if let Some(herb) = self.grid.herbivore_mut(origin) {
                herb.energy -= 1;
                herb.has_acted = true;
            }
            return 0;
        };

        let Some(mut herb) = self.grid.take_herbivore(origin) else {
            return 0;
        };
        if eat {
            self.grid.set_plant(target, false);
            herb.energy += self.config.grass_energy;
        }
        herb.energy -= 1;
        herb.has_acted = true;
        let parent_energy = herb.energy;
        // A plant cell is a legal destination even when another herbivore
        // occupies it; the mover replaces the occupant.
        self.grid.place_herbivore(target, herb);

        if parent_energy >= self.config.herbivore_reproduction_threshold {
            let candidates = self.grid.reproduction_candidates(target);
            if let Some(spot) = self.rng.pick_coord(&candidates)
                && self.grid.herbivore(spot).is_none()
            {
                let child_energy = self.config.herbivore_initial_health;
                // Newborns carry the acted latch so they cannot act again
                // within their birth turn.
                self.grid.place_herbivore(
                    spot,
                    Herbivore {
                        energy: child_energy,
                        has_acted: true,
                    },
                );
                if let Some(parent) = self.grid.herbivore_mut(target) {
                    parent.energy = (parent.energy - child_energy).max(0);
                }
                return 1;
            }
        }
        0
    }

    fn stage_deaths(&mut self) {
        let mut deaths = 0;
        for cell in self.grid.cells_mut() {
            if cell.herbivore.as_ref().is_some_and(|herb| herb.energy <= 0) {
                cell.herbivore = None;
                deaths += 1;
            }
        }
        self.last_deaths = deaths;
    }

    fn stage_bookkeeping(&mut self) {
        let counts = self.population();
        self.herbivore_series.push(counts.herbivores);
        self.plant_series.push(counts.plants);
        self.history.push(Snapshot::encode(&self.grid));
    }

    /// Restore the grid from the snapshot at `index` and pause the metric
    /// series there. Out-of-range indices are a no-op returning `false`.
    pub fn jump_to_turn(&mut self, index: usize) -> bool {
        let decoded = match self.history.get(index) {
            Some(snapshot) => snapshot.decode(),
            None => return false,
        };
        let Ok(grid) = decoded else {
            return false;
        };
        self.history.seek(index);
        self.grid = grid;
        self.turn = Turn(index as u64);
        self.reset_metric_series();
        true
    }

    /// Replace the history log wholesale with an externally loaded one,
    /// restoring snapshot 0. A rejected load leaves the world untouched.
    pub fn load_history(&mut self, snapshots: Vec<Snapshot>) -> Result<(), HistoryError> {
        self.history.replace(snapshots)?;
        let decoded = self.history.get(0).map(Snapshot::decode);
        if let Some(Ok(grid)) = decoded {
            self.grid = grid;
        }
        self.turn = Turn::zero();
        self.reset_metric_series();
        Ok(())
    }

    fn reset_metric_series(&mut self) {
        let counts = self.population();
        self.herbivore_series = vec![counts.herbivores];
        self.plant_series = vec![counts.plants];
    }

    /// Discard all state and reseed initial entities from the current
    /// configuration.
    pub fn reset(&mut self) {
        self.grid = Grid::new(self.config.grid_size);
        self.turn = Turn::zero();
        self.history.clear();
        self.herbivore_series.clear();
        self.plant_series.clear();
        self.last_births = 0;
        self.last_deaths = 0;
        self.place_initial_entities();
    }

    /// Install a new configuration. Structural changes trigger a full
    /// reset; the return value reports whether one happened.
    pub fn apply_config(&mut self, config: GrazeConfig) -> Result<bool, WorldError> {
        config.validate()?;
        let structural = self.config.is_structural_change(&config);
        self.config = config;
        if structural {
            self.reset();
        }
        Ok(structural)
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &GrazeConfig {
        &self.config
    }

    /// Read-only access to the cell grid.
    #[must_use]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Mutable access to the cell grid, for scenario setup and collaborator
    /// tooling.
    #[must_use]
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    /// Current simulation turn.
    #[must_use]
    pub const fn turn(&self) -> Turn {
        self.turn
    }

    /// Read-only access to the history log.
    #[must_use]
    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Whether the next `step` will replay from history instead of running
    /// the rule phases.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        !self.history.at_end()
    }

    /// Herbivore count per processed turn.
    #[must_use]
    pub fn herbivore_counts(&self) -> &[usize] {
        &self.herbivore_series
    }

    /// Plant-cell count per processed turn.
    #[must_use]
    pub fn plant_counts(&self) -> &[usize] {
        &self.plant_series
    }

    /// Count live herbivores and plant cells.
    #[must_use]
    pub fn population(&self) -> PopulationCounts {
        let mut counts = PopulationCounts::default();
        for cell in self.grid.cells() {
            if cell.plant {
                counts.plants += 1;
            }
            if cell.herbivore.is_some() {
                counts.herbivores += 1;
            }
        }
        counts
    }
}
