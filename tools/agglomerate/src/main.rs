/// Agglomerative tiling driver: load the parcel and tile tables, infill
/// missing attributes, run the greedy merge loop, and write one
/// intermediate tile file per merge.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use mosaic_core::driver::CancelFlag;
use mosaic_core::geometry::PlanarKernel;
use mosaic_core::index::ParcelIndex;
use mosaic_core::io::ParquetTileSink;
use mosaic_core::ols::NormalEquationsSolver;
use mosaic_core::parcel::ParcelTable;
use mosaic_core::{driver, infill, io, AgglomerationParams, MergeEngine};

#[derive(Parser, Debug)]
#[command(
    name = "agglomerate",
    about = "Merge adjacent tiles greedily by the R² of a parcel market-value model"
)]
struct Args {
    /// Parcels parquet file.
    #[arg(long)]
    parcels: PathBuf,

    /// Initial tiles parquet file.
    #[arg(long)]
    tiles: PathBuf,

    /// JSON parameter file; the flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop once the tile count reaches this value.
    #[arg(long)]
    desired_tiles: Option<usize>,

    /// Rook-adjacency buffer in feet.
    #[arg(long)]
    buffer_feet: Option<f64>,

    /// Donor count for spatial-lag infill.
    #[arg(long)]
    infill_k: Option<usize>,

    /// Minimum actual sales before a join is scored by regression.
    #[arg(long)]
    min_sales: Option<usize>,

    /// Directory for intermediate tile files.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Worker threads for stale-join recomputation (0 = library default).
    #[arg(long, default_value = "0")]
    threads: usize,
}

impl Args {
    fn params(&self) -> Result<AgglomerationParams> {
        let mut params = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => AgglomerationParams::default(),
        };
        if let Some(n) = self.desired_tiles {
            params.desired_ending_tile_count = n;
        }
        if let Some(buffer) = self.buffer_feet {
            params.adjacency_buffer_feet = buffer;
        }
        if let Some(k) = self.infill_k {
            params.infill_k = k;
        }
        if let Some(gate) = self.min_sales {
            params.min_sales_for_ols = gate;
        }
        if let Some(dir) = &self.output_dir {
            params.output_directory = dir.clone();
        }
        Ok(params)
    }
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("configuring the worker pool")?;
    }
    let params = args.params()?;

    let records = io::read_parcels(&args.parcels)
        .with_context(|| format!("loading parcels from {}", args.parcels.display()))?;
    let mut table = ParcelTable::from_records(records, &PlanarKernel)?;
    let index = ParcelIndex::build(&table);
    let summary = infill::run(&mut table, &index, params.infill_k)?;
    tracing::info!(
        built_filled = summary.built_filled,
        proxy_assigned = summary.proxy_assigned,
        proxy_filled = summary.proxy_filled,
        "infill complete"
    );

    let seeds = io::read_tiles(&args.tiles)
        .with_context(|| format!("loading tiles from {}", args.tiles.display()))?;
    let mut engine = MergeEngine::new(
        table,
        seeds,
        &params,
        Box::new(PlanarKernel),
        Box::new(NormalEquationsSolver),
    )?;

    let mut sink = ParquetTileSink::new(&params.output_directory)?;
    let outcome = driver::run(&mut engine, &params, &mut sink, &CancelFlag::default())?;
    tracing::info!(
        merges = outcome.merges,
        final_tiles = outcome.final_tile_count,
        output = %params.output_directory.display(),
        "agglomeration complete"
    );
    Ok(())
}
