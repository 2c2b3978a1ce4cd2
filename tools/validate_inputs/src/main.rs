/// Input validation tool: load both tables and run every load-time check
/// (schema, geometry, land areas, tile coverage) without merging anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use mosaic_core::geometry::PlanarKernel;
use mosaic_core::ols::NormalEquationsSolver;
use mosaic_core::parcel::ParcelTable;
use mosaic_core::{io, AgglomerationParams, MergeEngine};

#[derive(Parser, Debug)]
#[command(
    name = "validate_inputs",
    about = "Validate parcel and tile tables for the agglomeration pipeline"
)]
struct Args {
    /// Parcels parquet file.
    #[arg(long)]
    parcels: PathBuf,

    /// Initial tiles parquet file.
    #[arg(long)]
    tiles: PathBuf,

    /// Rook-adjacency buffer in feet used for the edge census.
    #[arg(long, default_value = "30.0")]
    buffer_feet: f64,
}

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();

    let records = io::read_parcels(&args.parcels)
        .with_context(|| format!("loading parcels from {}", args.parcels.display()))?;
    let n_records = records.len();
    let with_built = records.iter().filter(|r| r.built_area_sqft.is_some()).count();
    let with_sale = records.iter().filter(|r| r.adj_sale_price.is_some()).count();
    let table = ParcelTable::from_records(records, &PlanarKernel)?;

    let seeds = io::read_tiles(&args.tiles)
        .with_context(|| format!("loading tiles from {}", args.tiles.display()))?;
    let n_seeds = seeds.len();

    let params = AgglomerationParams {
        adjacency_buffer_feet: args.buffer_feet,
        ..AgglomerationParams::default()
    };
    let engine = MergeEngine::new(
        table,
        seeds,
        &params,
        Box::new(PlanarKernel),
        Box::new(NormalEquationsSolver),
    )?;

    let edges = engine.edge_count();
    println!("parcels:          {n_records}");
    println!("  with built area: {with_built}");
    println!("  with sales:      {with_sale}");
    println!("tiles:            {n_seeds}");
    println!("rook edges:       {edges} (buffer {} ft)", args.buffer_feet);
    println!("ok");
    Ok(())
}
