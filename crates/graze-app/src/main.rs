//! Headless demo runner: simulate, persist, reload, and replay a world.

use std::path::PathBuf;

use anyhow::{Context, Result};
use graze_app::SimulationController;
use graze_core::{GrazeConfig, Snapshot};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEMO_TURNS: usize = 120;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn demo_config() -> GrazeConfig {
    GrazeConfig {
        grid_size: 24,
        initial_grass_count: 60,
        initial_herbivore_count: 12,
        rng_seed: Some(7),
        ..GrazeConfig::default()
    }
}

fn main() -> Result<()> {
    init_tracing();

    let mut controller =
        SimulationController::new(demo_config()).context("failed to build the world")?;
    let start = controller.world().population();
    info!(
        grid_size = controller.world().config().grid_size,
        herbivores = start.herbivores,
        plants = start.plants,
        "initial placement"
    );

    controller.start();
    for _ in 0..DEMO_TURNS {
        if let Some(events) = controller.advance()
            && events.turn.0.is_multiple_of(20)
        {
            let counts = controller.world().population();
            info!(
                turn = events.turn.0,
                herbivores = counts.herbivores,
                plants = counts.plants,
                births = events.births,
                deaths = events.deaths,
                "progress"
            );
        }
    }
    controller.stop();

    let history_path: PathBuf = std::env::temp_dir().join("graze_history.json");
    controller
        .save_history(&history_path)
        .context("failed to save history")?;

    // Reload into a fresh controller and replay every recorded turn,
    // checking the restored grids against the run we just made.
    let mut replayer =
        SimulationController::new(demo_config()).context("failed to build the replay world")?;
    replayer
        .load_history(&history_path)
        .context("failed to load history")?;

    let recorded = controller.world().history().snapshots().to_vec();
    let mut verified = 0usize;
    while replayer.world().is_replaying() {
        let events = replayer.step_once();
        anyhow::ensure!(events.replayed, "replay ran a live turn");
        let expected = &recorded[replayer.world().history().cursor()];
        anyhow::ensure!(
            &Snapshot::encode(replayer.world().grid()) == expected,
            "replayed turn {} diverged from the recording",
            events.turn.0
        );
        verified += 1;
    }

    let finish = replayer.world().population();
    info!(
        turns = verified,
        herbivores = finish.herbivores,
        plants = finish.plants,
        path = %history_path.display(),
        "replay verified against the saved history"
    );
    Ok(())
}
