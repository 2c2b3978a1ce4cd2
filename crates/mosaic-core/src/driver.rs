//! Iteration loop, intermediate emission, termination.
//!
//! Strictly sequential: each merge changes the state every later ranking
//! depends on. The only work fanned out across threads is the stale-edge
//! recomputation inside the engine, which is deterministic by construction.
//! Cancellation is honored between iterations only; a cancelled run leaves
//! the most recent intermediate intact.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use geo::MultiPolygon;

use crate::config::AgglomerationParams;
use crate::engine::MergeEngine;
use crate::error::Result;

/// Cooperative cancellation signal, checked between iterations.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One output row of an intermediate tile file.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRow {
    pub key: String,
    pub geometry: MultiPolygon<f64>,
    /// R² recorded when the tile was last created by a merge; `None` for
    /// tiles that have never been merged.
    pub r_squared: Option<f64>,
}

/// Receives the tile set after each merge. `iteration` is the 1-based
/// count of merges performed so far.
pub trait TileSink {
    fn emit(&mut self, iteration: usize, tiles: &[TileRow]) -> Result<()>;
}

/// Collects emissions in memory; used by tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    pub emissions: Vec<(usize, Vec<TileRow>)>,
}

impl TileSink for MemorySink {
    fn emit(&mut self, iteration: usize, tiles: &[TileRow]) -> Result<()> {
        self.emissions.push((iteration, tiles.to_vec()));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Merges performed, equal to the index of the last intermediate.
    pub merges: usize,
    pub final_tile_count: usize,
    pub cancelled: bool,
}

/// Run the greedy merge loop to termination or cancellation.
pub fn run(
    engine: &mut MergeEngine,
    params: &AgglomerationParams,
    sink: &mut dyn TileSink,
    cancel: &CancelFlag,
) -> Result<RunSummary> {
    let target = params.desired_ending_tile_count.max(1);
    let mut iteration = 0;
    loop {
        if cancel.is_cancelled() {
            tracing::info!(merges = iteration, "run cancelled");
            return Ok(RunSummary {
                merges: iteration,
                final_tile_count: engine.tile_count(),
                cancelled: true,
            });
        }
        if engine.tile_count() <= target {
            break;
        }
        let Some((pair, score)) = engine.best() else {
            break;
        };
        let new_tile = engine.merge(pair, score);
        iteration += 1;
        tracing::debug!(
            iteration,
            %pair,
            tile = %new_tile,
            r2 = score.r2,
            parcels = score.n_obs,
            tiles_left = engine.tile_count(),
            "merged winning join"
        );
        sink.emit(iteration, &snapshot(engine))?;
    }
    tracing::info!(
        merges = iteration,
        tiles = engine.tile_count(),
        "agglomeration finished"
    );
    Ok(RunSummary {
        merges: iteration,
        final_tile_count: engine.tile_count(),
        cancelled: false,
    })
}

/// The current tile set in ascending id order.
pub fn snapshot(engine: &MergeEngine) -> Vec<TileRow> {
    engine
        .tiles()
        .map(|tile| TileRow {
            key: tile.key.clone(),
            geometry: tile.geometry.clone(),
            r_squared: tile.r_squared,
        })
        .collect()
}
