use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Options recognized by the merge driver.
/// Defaults match the reference configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgglomerationParams {
    /// Stop merging once the tile count reaches this value. Default 1
    /// (merge until no prospective joins remain).
    pub desired_ending_tile_count: usize,
    /// Buffer in feet applied by the rook-adjacency predicate. Default 30.
    pub adjacency_buffer_feet: f64,
    /// Donor count for the inverse-distance spatial lag. Default 3.
    pub infill_k: usize,
    /// Minimum count of actual sales a candidate region needs before the
    /// regression runs; below it the join scores 0. Default 3.
    pub min_sales_for_ols: usize,
    /// Directory receiving the per-iteration intermediate tile files.
    pub output_directory: PathBuf,
}

impl Default for AgglomerationParams {
    fn default() -> Self {
        Self {
            desired_ending_tile_count: 1,
            adjacency_buffer_feet: 30.0,
            infill_k: 3,
            min_sales_for_ols: 3,
            output_directory: PathBuf::from("."),
        }
    }
}
