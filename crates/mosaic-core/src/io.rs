//! Parquet table reading and intermediate tile writing.
//!
//! Geometry travels as WKT text in a Utf8 column. Keys may be Utf8 or
//! Int64 and are normalized to strings. Missing mandatory columns and
//! unparseable geometry are fatal here; value-level validation (land
//! areas, assessed values) belongs to the parcel table.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use wkt::{ToWkt, TryFromWkt};

use crate::driver::{TileRow, TileSink};
use crate::error::{MosaicError, Result};
use crate::graph::TileSeed;
use crate::parcel::ParcelRecord;

// ── Reading ──────────────────────────────────────────────────────────────

pub fn read_parcels(path: &Path) -> Result<Vec<ParcelRecord>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let keys = key_column(&batch)?;
        let built = float_column(&batch, "built_area_sqft")?;
        let land = float_column(&batch, "land_area_sqft")?;
        let sale = float_column(&batch, "adj_sale_price")?;
        let assessed = float_column(&batch, "assessed_value")?;
        let geometry = text_column(&batch, "geometry")?;
        for row in 0..batch.num_rows() {
            let key = keys[row].clone();
            records.push(ParcelRecord {
                geometry: parse_polygon(&geometry[row], &key)?,
                key,
                built_area_sqft: built[row],
                land_area_sqft: land[row],
                adj_sale_price: sale[row],
                assessed_value: assessed[row],
            });
        }
    }
    Ok(records)
}

/// Read the initial tiles table. The `r_squared` column is null on input,
/// so an absent column carries the same information and is accepted.
pub fn read_tiles(path: &Path) -> Result<Vec<TileSeed>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut seeds = Vec::new();
    for batch in reader {
        let batch = batch?;
        let keys = key_column(&batch)?;
        let geometry = text_column(&batch, "geometry")?;
        for row in 0..batch.num_rows() {
            let key = keys[row].clone();
            seeds.push(TileSeed {
                geometry: parse_multipolygon(&geometry[row], &key)?,
                key,
            });
        }
    }
    Ok(seeds)
}

// ── Writing ──────────────────────────────────────────────────────────────

/// Writes `intermediate_tiles_<iteration>.parquet` into one directory.
pub struct ParquetTileSink {
    directory: PathBuf,
}

impl ParquetTileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn path_for(&self, iteration: usize) -> PathBuf {
        self.directory
            .join(format!("intermediate_tiles_{iteration}.parquet"))
    }
}

impl TileSink for ParquetTileSink {
    fn emit(&mut self, iteration: usize, tiles: &[TileRow]) -> Result<()> {
        write_tiles(&self.path_for(iteration), tiles)
    }
}

pub fn write_tiles(path: &Path, tiles: &[TileRow]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("geometry", DataType::Utf8, false),
        Field::new("r_squared", DataType::Float64, true),
    ]));
    let keys: Vec<&str> = tiles.iter().map(|t| t.key.as_str()).collect();
    let geometry: Vec<String> = tiles.iter().map(|t| t.geometry.wkt_string()).collect();
    let r_squared: Vec<Option<f64>> = tiles.iter().map(|t| t.r_squared).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(keys)) as ArrayRef,
            Arc::new(StringArray::from(geometry)) as ArrayRef,
            Arc::new(Float64Array::from(r_squared)) as ArrayRef,
        ],
    )?;
    let mut writer = ArrowWriter::try_new(File::create(path)?, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

// ── Column access ────────────────────────────────────────────────────────

fn named_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| MosaicError::MissingColumn {
            name: name.to_string(),
        })
}

fn key_column(batch: &RecordBatch) -> Result<Vec<String>> {
    let array = named_column(batch, "key")?;
    if let Some(strings) = array.as_any().downcast_ref::<StringArray>() {
        return Ok((0..strings.len())
            .map(|i| strings.value(i).to_string())
            .collect());
    }
    if let Some(ints) = array.as_any().downcast_ref::<Int64Array>() {
        return Ok((0..ints.len()).map(|i| ints.value(i).to_string()).collect());
    }
    Err(MosaicError::ColumnType {
        name: "key".to_string(),
        expected: "Utf8 or Int64",
    })
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<Vec<Option<f64>>> {
    let array = named_column(batch, name)?;
    let floats = array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| MosaicError::ColumnType {
            name: name.to_string(),
            expected: "Float64",
        })?;
    Ok((0..floats.len())
        .map(|i| (!floats.is_null(i)).then(|| floats.value(i)))
        .collect())
}

fn text_column(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let array = named_column(batch, name)?;
    let strings = array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| MosaicError::ColumnType {
            name: name.to_string(),
            expected: "Utf8",
        })?;
    Ok((0..strings.len())
        .map(|i| strings.value(i).to_string())
        .collect())
}

// ── WKT codec ────────────────────────────────────────────────────────────

fn parse_geometry(text: &str, key: &str) -> Result<geo_types::Geometry<f64>> {
    geo_types::Geometry::<f64>::try_from_wkt_str(text).map_err(|e| {
        MosaicError::InvalidGeometry {
            key: key.to_string(),
            reason: format!("{e}"),
        }
    })
}

fn parse_polygon(text: &str, key: &str) -> Result<geo_types::Polygon<f64>> {
    match parse_geometry(text, key)? {
        geo_types::Geometry::Polygon(p) => Ok(p),
        geo_types::Geometry::MultiPolygon(mut mp) if mp.0.len() == 1 => Ok(mp.0.remove(0)),
        _ => Err(MosaicError::InvalidGeometry {
            key: key.to_string(),
            reason: "expected a POLYGON".to_string(),
        }),
    }
}

fn parse_multipolygon(text: &str, key: &str) -> Result<geo_types::MultiPolygon<f64>> {
    match parse_geometry(text, key)? {
        geo_types::Geometry::Polygon(p) => Ok(geo_types::MultiPolygon::new(vec![p])),
        geo_types::Geometry::MultiPolygon(mp) => Ok(mp),
        _ => Err(MosaicError::InvalidGeometry {
            key: key.to_string(),
            reason: "expected a POLYGON or MULTIPOLYGON".to_string(),
        }),
    }
}
