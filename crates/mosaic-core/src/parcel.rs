//! Columnar in-memory parcel store.
//!
//! Rows are sorted by key at construction so every downstream scan is
//! independent of input row order. The two derived columns (`built_area`,
//! `market_value_proxy`) are write-once: after infill the table is
//! read-only apart from the tile back-reference.

use std::collections::HashMap;

use geo::{Point, Polygon};

use crate::error::{MosaicError, Result};
use crate::geometry::GeometryKernel;
use crate::graph::TileId;

/// One input row, as read from the parcels table.
#[derive(Debug, Clone)]
pub struct ParcelRecord {
    pub key: String,
    pub built_area_sqft: Option<f64>,
    pub land_area_sqft: Option<f64>,
    pub adj_sale_price: Option<f64>,
    pub assessed_value: Option<f64>,
    pub geometry: Polygon<f64>,
}

#[derive(Debug)]
pub struct ParcelTable {
    keys: Vec<String>,
    land_area: Vec<f64>,
    built_area: Vec<Option<f64>>,
    adj_sale_price: Vec<Option<f64>>,
    assessed_value: Vec<Option<f64>>,
    market_value_proxy: Vec<Option<f64>>,
    geometry: Vec<Polygon<f64>>,
    centroid: Vec<Point<f64>>,
    current_tile: Vec<Option<TileId>>,
    row_by_key: HashMap<String, usize>,
}

impl ParcelTable {
    /// Validate and column-ize input records. Fails on duplicate keys,
    /// missing or nonpositive land area, negative assessed values, and
    /// invalid geometry.
    pub fn from_records(
        mut records: Vec<ParcelRecord>,
        kernel: &dyn GeometryKernel,
    ) -> Result<Self> {
        records.sort_by(|a, b| a.key.cmp(&b.key));

        let n = records.len();
        let mut table = Self {
            keys: Vec::with_capacity(n),
            land_area: Vec::with_capacity(n),
            built_area: Vec::with_capacity(n),
            adj_sale_price: Vec::with_capacity(n),
            assessed_value: Vec::with_capacity(n),
            market_value_proxy: vec![None; n],
            geometry: Vec::with_capacity(n),
            centroid: Vec::with_capacity(n),
            current_tile: vec![None; n],
            row_by_key: HashMap::with_capacity(n),
        };

        for (row, record) in records.into_iter().enumerate() {
            if table.row_by_key.insert(record.key.clone(), row).is_some() {
                return Err(MosaicError::DuplicateKey { key: record.key });
            }
            let land = match record.land_area_sqft {
                Some(v) if v > 0.0 => v,
                _ => {
                    return Err(MosaicError::NonPositiveLandArea { key: record.key });
                }
            };
            if matches!(record.assessed_value, Some(v) if v < 0.0) {
                return Err(MosaicError::NegativeAssessedValue { key: record.key });
            }
            kernel
                .validate(&record.geometry)
                .map_err(|reason| MosaicError::InvalidGeometry {
                    key: record.key.clone(),
                    reason,
                })?;
            let as_multi = geo::MultiPolygon::new(vec![record.geometry.clone()]);
            let centroid =
                kernel
                    .centroid(&as_multi)
                    .ok_or_else(|| MosaicError::InvalidGeometry {
                        key: record.key.clone(),
                        reason: "no centroid".to_string(),
                    })?;

            table.keys.push(record.key);
            table.land_area.push(land);
            table.built_area.push(record.built_area_sqft);
            table.adj_sale_price.push(record.adj_sale_price);
            table.assessed_value.push(record.assessed_value);
            table.geometry.push(record.geometry);
            table.centroid.push(centroid);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Row indices in key order.
    pub fn rows(&self) -> std::ops::Range<usize> {
        0..self.len()
    }

    pub fn key(&self, row: usize) -> &str {
        &self.keys[row]
    }

    pub fn row_of(&self, key: &str) -> Option<usize> {
        self.row_by_key.get(key).copied()
    }

    pub fn land_area(&self, row: usize) -> f64 {
        self.land_area[row]
    }

    pub fn built_area(&self, row: usize) -> Option<f64> {
        self.built_area[row]
    }

    pub fn sale_price(&self, row: usize) -> Option<f64> {
        self.adj_sale_price[row]
    }

    /// True iff the parcel carries an actual sale. Only these rows count
    /// toward the sales gate; infilled proxies never do.
    pub fn has_sale(&self, row: usize) -> bool {
        self.adj_sale_price[row].is_some()
    }

    pub fn assessed_value(&self, row: usize) -> Option<f64> {
        self.assessed_value[row]
    }

    pub fn proxy(&self, row: usize) -> Option<f64> {
        self.market_value_proxy[row]
    }

    pub fn geometry(&self, row: usize) -> &Polygon<f64> {
        &self.geometry[row]
    }

    pub fn centroid(&self, row: usize) -> Point<f64> {
        self.centroid[row]
    }

    pub fn tile_of(&self, row: usize) -> Option<TileId> {
        self.current_tile[row]
    }

    /// Single write, pass 1 of the infiller.
    pub fn set_built_area(&mut self, row: usize, value: f64) {
        debug_assert!(self.built_area[row].is_none(), "built_area is write-once");
        self.built_area[row] = Some(value);
    }

    /// Single write, proxy assignment or pass 2 of the infiller.
    pub fn set_proxy(&mut self, row: usize, value: f64) {
        debug_assert!(
            self.market_value_proxy[row].is_none(),
            "market_value_proxy is write-once"
        );
        self.market_value_proxy[row] = Some(value);
    }

    pub fn set_tile(&mut self, row: usize, tile: TileId) {
        self.current_tile[row] = Some(tile);
    }

    /// The `(proxy, built_area, land_area)` triple for the regression, or
    /// `None` while either derived column is still absent.
    pub fn regression_row(&self, row: usize) -> Option<(f64, f64, f64)> {
        match (self.market_value_proxy[row], self.built_area[row]) {
            (Some(y), Some(built)) => Some((y, built, self.land_area[row])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlanarKernel;
    use geo::polygon;

    fn unit_square(x0: f64, y0: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + 1.0, y: y0),
            (x: x0 + 1.0, y: y0 + 1.0),
            (x: x0, y: y0 + 1.0),
            (x: x0, y: y0),
        ]
    }

    fn record(key: &str, x0: f64) -> ParcelRecord {
        ParcelRecord {
            key: key.to_string(),
            built_area_sqft: Some(1000.0),
            land_area_sqft: Some(5000.0),
            adj_sale_price: None,
            assessed_value: Some(100_000.0),
            geometry: unit_square(x0, 0.0),
        }
    }

    #[test]
    fn rows_are_sorted_by_key() {
        let records = vec![record("c", 2.0), record("a", 0.0), record("b", 1.0)];
        let table = ParcelTable::from_records(records, &PlanarKernel).unwrap();
        let keys: Vec<&str> = table.rows().map(|r| table.key(r)).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(table.row_of("b"), Some(1));
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let records = vec![record("a", 0.0), record("a", 1.0)];
        let err = ParcelTable::from_records(records, &PlanarKernel).unwrap_err();
        assert!(matches!(err, MosaicError::DuplicateKey { key } if key == "a"));
    }

    #[test]
    fn nonpositive_land_area_is_rejected() {
        let mut bad = record("a", 0.0);
        bad.land_area_sqft = Some(0.0);
        let err = ParcelTable::from_records(vec![bad], &PlanarKernel).unwrap_err();
        assert!(matches!(err, MosaicError::NonPositiveLandArea { key } if key == "a"));

        let mut missing = record("b", 0.0);
        missing.land_area_sqft = None;
        let err = ParcelTable::from_records(vec![missing], &PlanarKernel).unwrap_err();
        assert!(matches!(err, MosaicError::NonPositiveLandArea { key } if key == "b"));
    }

    #[test]
    fn negative_assessed_value_is_rejected() {
        let mut bad = record("a", 0.0);
        bad.assessed_value = Some(-1.0);
        let err = ParcelTable::from_records(vec![bad], &PlanarKernel).unwrap_err();
        assert!(matches!(err, MosaicError::NegativeAssessedValue { .. }));
    }

    #[test]
    fn regression_row_requires_both_derived_columns() {
        let mut rec = record("a", 0.0);
        rec.built_area_sqft = None;
        let mut table = ParcelTable::from_records(vec![rec], &PlanarKernel).unwrap();
        assert_eq!(table.regression_row(0), None);
        table.set_built_area(0, 1200.0);
        assert_eq!(table.regression_row(0), None, "proxy still missing");
        table.set_proxy(0, 150_000.0);
        assert_eq!(table.regression_row(0), Some((150_000.0, 1200.0, 5000.0)));
    }
}
