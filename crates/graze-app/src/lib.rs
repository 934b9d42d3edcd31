//! Application-level orchestration for the Graze simulation.
//!
//! [`SimulationController`] wraps a [`WorldState`] with the run/pause gate
//! and the file persistence plumbing. An external clock (a UI tick, a demo
//! loop) calls [`SimulationController::advance`] at its own cadence; the
//! controller steps the world only while running, so pausing is purely a
//! matter of the gate and never loses state.

use std::path::Path;

use graze_core::{GrazeConfig, HistoryError, TurnEvents, WorldError, WorldState};
use graze_storage::StorageError;
use thiserror::Error;
use tracing::{info, warn};

/// Errors surfaced by controller operations.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("turn {0} is outside the recorded history")]
    TurnOutOfRange(usize),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    World(#[from] WorldError),
}

/// Owns the world plus the running flag; every mutation of the simulation
/// goes through here.
#[derive(Debug)]
pub struct SimulationController {
    world: WorldState,
    running: bool,
}

impl SimulationController {
    /// Build a paused controller around a freshly seeded world.
    pub fn new(config: GrazeConfig) -> Result<Self, ControlError> {
        Ok(Self::with_world(WorldState::new(config)?))
    }

    /// Wrap an existing world; starts paused.
    #[must_use]
    pub fn with_world(world: WorldState) -> Self {
        Self {
            world,
            running: false,
        }
    }

    /// Whether `advance` currently steps the world.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Resume stepping.
    pub fn start(&mut self) {
        self.running = true;
    }

    /// Pause stepping; all state stays put.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Flip the run gate, returning the new value.
    pub fn toggle(&mut self) -> bool {
        self.running = !self.running;
        self.running
    }

    /// Clock callback: step the world once if running, otherwise do nothing.
    pub fn advance(&mut self) -> Option<TurnEvents> {
        if self.running {
            Some(self.world.step())
        } else {
            None
        }
    }

    /// Manual single step, independent of the run gate.
    pub fn step_once(&mut self) -> TurnEvents {
        self.world.step()
    }

    /// Discard everything and reseed from the current configuration;
    /// pauses.
    pub fn reset(&mut self) {
        self.world.reset();
        self.running = false;
        info!(grid_size = self.world.config().grid_size, "world reset");
    }

    /// Rewind (or fast-forward) the view to a recorded turn and pause there.
    pub fn jump_to_turn(&mut self, index: usize) -> Result<(), ControlError> {
        if self.world.jump_to_turn(index) {
            self.running = false;
            Ok(())
        } else {
            Err(ControlError::TurnOutOfRange(index))
        }
    }

    /// Write the full history log to `path` as JSON.
    pub fn save_history(&self, path: &Path) -> Result<(), ControlError> {
        graze_storage::save_history_file(path, self.world.history())?;
        info!(
            path = %path.display(),
            snapshots = self.world.history().len(),
            "history saved"
        );
        Ok(())
    }

    /// Replace the history from a JSON file, restoring the initial snapshot
    /// and pausing. Any failure leaves the current world authoritative.
    pub fn load_history(&mut self, path: &Path) -> Result<(), ControlError> {
        let snapshots = match graze_storage::load_history_file(path) {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "history load rejected");
                return Err(err.into());
            }
        };
        if let Err(err) = self.world.load_history(snapshots) {
            warn!(path = %path.display(), error = %err, "loaded history rejected");
            return Err(err.into());
        }
        self.running = false;
        info!(
            path = %path.display(),
            snapshots = self.world.history().len(),
            "history loaded"
        );
        Ok(())
    }

    /// Apply a new configuration; a structural change resets the world and
    /// pauses.
    pub fn apply_config(&mut self, config: GrazeConfig) -> Result<bool, ControlError> {
        let structural = self.world.apply_config(config)?;
        if structural {
            self.running = false;
            info!("structural reconfiguration, world reseeded");
        }
        Ok(structural)
    }

    /// Read access for renderers and panels.
    #[must_use]
    pub fn world(&self) -> &WorldState {
        &self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graze_core::Turn;
    use std::fs;
    use std::path::PathBuf;

    fn test_config() -> GrazeConfig {
        GrazeConfig {
            grid_size: 6,
            initial_grass_count: 8,
            initial_herbivore_count: 3,
            rng_seed: Some(11),
            ..GrazeConfig::default()
        }
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("graze-{}-{name}.json", std::process::id()))
    }

    #[test]
    fn advance_only_steps_while_running() {
        let mut controller = SimulationController::new(test_config()).expect("controller");
        assert!(!controller.is_running());
        assert!(controller.advance().is_none());
        assert_eq!(controller.world().turn(), Turn::zero());

        controller.start();
        let events = controller.advance().expect("stepped");
        assert_eq!(events.turn, Turn(1));

        controller.stop();
        assert!(controller.advance().is_none());
        assert_eq!(controller.world().turn(), Turn(1));
    }

    #[test]
    fn step_once_ignores_the_run_gate() {
        let mut controller = SimulationController::new(test_config()).expect("controller");
        controller.step_once();
        assert_eq!(controller.world().turn(), Turn(1));
        assert!(!controller.is_running());
    }

    #[test]
    fn jump_pauses_and_rejects_out_of_range() {
        let mut controller = SimulationController::new(test_config()).expect("controller");
        controller.start();
        for _ in 0..4 {
            controller.advance();
        }

        controller.jump_to_turn(1).expect("in range");
        assert!(!controller.is_running());
        assert_eq!(controller.world().turn(), Turn(1));
        assert!(controller.world().is_replaying());

        let err = controller.jump_to_turn(50).expect_err("out of range");
        assert!(matches!(err, ControlError::TurnOutOfRange(50)));
    }

    #[test]
    fn save_and_load_round_trip_through_a_file() {
        let path = scratch_path("roundtrip");
        let mut donor = SimulationController::new(test_config()).expect("controller");
        for _ in 0..5 {
            donor.step_once();
        }
        donor.save_history(&path).expect("save");

        let mut fresh = SimulationController::new(test_config()).expect("controller");
        fresh.start();
        fresh.load_history(&path).expect("load");
        assert!(!fresh.is_running(), "load pauses");
        assert_eq!(fresh.world().history().len(), 6);
        assert_eq!(fresh.world().turn(), Turn::zero());
        assert_eq!(
            fresh.world().history().snapshots(),
            donor.world().history().snapshots()
        );

        fs::remove_file(&path).ok();
    }

    #[test]
    fn rejected_load_leaves_the_world_untouched() {
        let path = scratch_path("object");
        fs::write(&path, br#"{"turns": 3}"#).expect("write");

        let mut controller = SimulationController::new(test_config()).expect("controller");
        for _ in 0..3 {
            controller.step_once();
        }
        let len_before = controller.world().history().len();
        let turn_before = controller.world().turn();

        let err = controller.load_history(&path).expect_err("must fail");
        assert!(matches!(err, ControlError::Storage(_)));
        assert_eq!(controller.world().history().len(), len_before);
        assert_eq!(controller.world().turn(), turn_before);

        fs::remove_file(&path).ok();
    }

    #[test]
    fn structural_reconfiguration_pauses() {
        let mut controller = SimulationController::new(test_config()).expect("controller");
        controller.start();
        controller.step_once();

        let mut tuned = controller.world().config().clone();
        tuned.grass_energy = 4;
        assert!(!controller.apply_config(tuned).expect("tunable"));
        assert!(controller.is_running());

        let mut resized = controller.world().config().clone();
        resized.grid_size = 4;
        resized.initial_grass_count = 4;
        resized.initial_herbivore_count = 2;
        assert!(controller.apply_config(resized).expect("structural"));
        assert!(!controller.is_running());
        assert_eq!(controller.world().turn(), Turn::zero());
    }
}
