//! Error taxonomy for the tiling pipeline.
//!
//! Schema and validity problems are fatal and carry the offending column or
//! key. Numeric singularities and the insufficient-sales gate never surface
//! here; the evaluator recovers them locally as R² = 0.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MosaicError>;

#[derive(Error, Debug)]
pub enum MosaicError {
    /// A mandatory column is absent from an input table.
    #[error("missing mandatory column '{name}'")]
    MissingColumn { name: String },

    /// A column is present but carries an unsupported arrow type.
    #[error("column '{name}' has an unsupported type, expected {expected}")]
    ColumnType { name: String, expected: &'static str },

    /// Two input rows share a key.
    #[error("duplicate key '{key}'")]
    DuplicateKey { key: String },

    /// A geometry failed validation at load.
    #[error("invalid geometry for key '{key}': {reason}")]
    InvalidGeometry { key: String, reason: String },

    /// `land_area_sqft` must be present and strictly positive.
    #[error("parcel '{key}' has a missing or nonpositive land area")]
    NonPositiveLandArea { key: String },

    /// `assessed_value` values must be nonnegative when present.
    #[error("parcel '{key}' has a negative assessed value")]
    NegativeAssessedValue { key: String },

    /// Spatial-lag infill found no donor parcels anywhere in the table.
    #[error("parcel '{key}' has no {attribute} donors for spatial-lag infill")]
    NoDonors { key: String, attribute: &'static str },

    /// A parcel centroid is covered by no initial tile.
    #[error("parcel '{key}' is not covered by any initial tile")]
    UncoveredParcel { key: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}
