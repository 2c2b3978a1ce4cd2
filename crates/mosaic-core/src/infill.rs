//! Two-pass inverse-distance spatial lag infill.
//!
//! Pass 1 completes `built_area`, then the proxy assignment derives
//! `market_value_proxy` where sale or assessed values exist, then pass 2
//! completes the proxy for the remainder. Donor sets are frozen before
//! each pass: only originally-present built areas donate in pass 1, and
//! only step-assigned proxies donate in pass 2, so infilled values never
//! cascade. Each pass skips rows that are already complete, which makes
//! the whole infiller a no-op on complete data.

use geo::Point;

use crate::error::{MosaicError, Result};
use crate::index::ParcelIndex;
use crate::parcel::ParcelTable;

/// Counts reported by one full infill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfillSummary {
    /// Parcels whose built area was infilled in pass 1.
    pub built_filled: usize,
    /// Parcels whose proxy came from sale/assessed values.
    pub proxy_assigned: usize,
    /// Parcels whose proxy was infilled in pass 2.
    pub proxy_filled: usize,
}

/// Run both passes and the proxy assignment, in order.
pub fn run(table: &mut ParcelTable, index: &ParcelIndex, k: usize) -> Result<InfillSummary> {
    let built_filled = fill_built_area(table, index, k)?;
    let proxy_assigned = assign_market_value_proxy(table);
    let proxy_filled = fill_market_value_proxy(table, index, k)?;
    Ok(InfillSummary {
        built_filled,
        proxy_assigned,
        proxy_filled,
    })
}

/// Pass 1: infill missing `built_area` from the k nearest parcels whose
/// built area was present in the input, weighted by inverse distance.
pub fn fill_built_area(table: &mut ParcelTable, index: &ParcelIndex, k: usize) -> Result<usize> {
    let donor: Vec<bool> = table.rows().map(|r| table.built_area(r).is_some()).collect();
    let mut updates: Vec<(usize, f64)> = Vec::new();
    for row in table.rows() {
        if donor[row] {
            continue;
        }
        let value = lagged_value(table, index, k, table.centroid(row), |r| {
            if donor[r] {
                table.built_area(r)
            } else {
                None
            }
        })
        .ok_or_else(|| MosaicError::NoDonors {
            key: table.key(row).to_string(),
            attribute: "built-area",
        })?;
        updates.push((row, value));
    }
    let filled = updates.len();
    for (row, value) in updates {
        table.set_built_area(row, value);
    }
    Ok(filled)
}

/// Derive the market-value proxy where sale or assessed values exist:
/// both present takes their mean, otherwise whichever exists. Parcels with
/// neither are left for pass 2. Returns the number of rows assigned.
pub fn assign_market_value_proxy(table: &mut ParcelTable) -> usize {
    let mut assigned = 0;
    for row in table.rows() {
        if table.proxy(row).is_some() {
            continue;
        }
        let value = match (table.sale_price(row), table.assessed_value(row)) {
            (Some(sale), Some(assessed)) => Some((sale + assessed) / 2.0),
            (None, Some(assessed)) => Some(assessed),
            (Some(sale), None) => Some(sale),
            (None, None) => None,
        };
        if let Some(value) = value {
            table.set_proxy(row, value);
            assigned += 1;
        }
    }
    assigned
}

/// Pass 2: infill the remaining proxies with the same inverse-distance
/// scheme, donors restricted to parcels whose proxy came from the
/// assignment step rather than from this pass.
pub fn fill_market_value_proxy(
    table: &mut ParcelTable,
    index: &ParcelIndex,
    k: usize,
) -> Result<usize> {
    let donor: Vec<bool> = table.rows().map(|r| table.proxy(r).is_some()).collect();
    let mut updates: Vec<(usize, f64)> = Vec::new();
    for row in table.rows() {
        if donor[row] {
            continue;
        }
        let value = lagged_value(table, index, k, table.centroid(row), |r| {
            if donor[r] {
                table.proxy(r)
            } else {
                None
            }
        })
        .ok_or_else(|| MosaicError::NoDonors {
            key: table.key(row).to_string(),
            attribute: "market-value proxy",
        })?;
        updates.push((row, value));
    }
    let filled = updates.len();
    for (row, value) in updates {
        table.set_proxy(row, value);
    }
    Ok(filled)
}

/// Inverse-distance-weighted mean over the k nearest donors, or `None`
/// when no donor exists anywhere. Donors at distance exactly zero win
/// outright: their plain mean is returned, since 1/d is unusable there.
fn lagged_value(
    table: &ParcelTable,
    index: &ParcelIndex,
    k: usize,
    origin: Point<f64>,
    donor_value: impl Fn(usize) -> Option<f64>,
) -> Option<f64> {
    let neighbours = index.k_nearest_where(table, origin, k, |r| donor_value(r).is_some());
    let mut values: Vec<(f64, f64)> = Vec::with_capacity(neighbours.len());
    for (row, dist) in neighbours {
        if let Some(v) = donor_value(row) {
            values.push((v, dist));
        }
    }
    if values.is_empty() {
        return None;
    }

    let coincident: Vec<f64> = values
        .iter()
        .filter(|(_, d)| *d == 0.0)
        .map(|(v, _)| *v)
        .collect();
    if !coincident.is_empty() {
        return Some(coincident.iter().sum::<f64>() / coincident.len() as f64);
    }

    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;
    for (v, d) in values {
        let w = 1.0 / d;
        weighted_sum += v * w;
        weight_sum += w;
    }
    Some(weighted_sum / weight_sum)
}
