//! Nearest-parcel and tile-neighbour candidate queries.
//!
//! Two structures: an R-tree over parcel centroids, bulk-built once at load
//! and never mutated, and an R-tree over tile bounding boxes that the merge
//! engine updates incrementally (two entries out, one in, per merge).
//! Candidates from the box index are approximate; callers confirm them with
//! the rook predicate.

use std::collections::BTreeMap;

use geo::{Point, Rect};
use rstar::primitives::GeomWithData;
use rstar::{RTree, RTreeObject, AABB};

use crate::graph::TileId;
use crate::parcel::ParcelTable;

// ── Parcel centroid index ────────────────────────────────────────────────

pub struct ParcelIndex {
    tree: RTree<GeomWithData<[f64; 2], usize>>,
}

impl ParcelIndex {
    pub fn build(table: &ParcelTable) -> Self {
        let entries: Vec<GeomWithData<[f64; 2], usize>> = table
            .rows()
            .map(|row| {
                let c = table.centroid(row);
                GeomWithData::new([c.x(), c.y()], row)
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Up to `k` accepted rows nearest to `origin`, ordered by distance
    /// with ties broken by parcel key ascending. Returns `(row, distance)`
    /// pairs; fewer than `k` when the accepted population is smaller.
    pub fn k_nearest_where(
        &self,
        table: &ParcelTable,
        origin: Point<f64>,
        k: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Vec<(usize, f64)> {
        if k == 0 {
            return Vec::new();
        }
        // The iterator yields ascending distance; keep pulling past the
        // k-th hit only while candidates stay tied with it.
        let query = [origin.x(), origin.y()];
        let mut hits: Vec<(f64, usize)> = Vec::new();
        for item in self.tree.nearest_neighbor_iter(&query) {
            let row = item.data;
            if !accept(row) {
                continue;
            }
            let [x, y] = *item.geom();
            let d = (x - origin.x()).hypot(y - origin.y());
            if hits.len() >= k && d > hits[k - 1].0 {
                break;
            }
            hits.push((d, row));
        }
        hits.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| table.key(a.1).cmp(table.key(b.1)))
        });
        hits.truncate(k);
        hits.into_iter().map(|(d, row)| (row, d)).collect()
    }
}

// ── Tile bounding-box index ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct TileEnvelope {
    id: TileId,
    lower: [f64; 2],
    upper: [f64; 2],
}

impl RTreeObject for TileEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.lower, self.upper)
    }
}

#[derive(Debug)]
pub struct TileBoxIndex {
    tree: RTree<TileEnvelope>,
    boxes: BTreeMap<TileId, TileEnvelope>,
}

impl TileBoxIndex {
    pub fn build(entries: impl IntoIterator<Item = (TileId, Rect<f64>)>) -> Self {
        let mut boxes = BTreeMap::new();
        let mut objects = Vec::new();
        for (id, rect) in entries {
            let env = TileEnvelope {
                id,
                lower: [rect.min().x, rect.min().y],
                upper: [rect.max().x, rect.max().y],
            };
            boxes.insert(id, env.clone());
            objects.push(env);
        }
        Self {
            tree: RTree::bulk_load(objects),
            boxes,
        }
    }

    pub fn insert(&mut self, id: TileId, rect: Rect<f64>) {
        let env = TileEnvelope {
            id,
            lower: [rect.min().x, rect.min().y],
            upper: [rect.max().x, rect.max().y],
        };
        self.boxes.insert(id, env.clone());
        self.tree.insert(env);
    }

    pub fn remove(&mut self, id: TileId) {
        if let Some(env) = self.boxes.remove(&id) {
            self.tree.remove(&env);
        }
    }

    /// Tiles whose bounding box lies within `buffer` of the query box,
    /// excluding `exclude`, in ascending id order.
    pub fn candidates(&self, query: Rect<f64>, buffer: f64, exclude: TileId) -> Vec<TileId> {
        let area = AABB::from_corners(
            [query.min().x - buffer, query.min().y - buffer],
            [query.max().x + buffer, query.max().y + buffer],
        );
        let mut ids: Vec<TileId> = self
            .tree
            .locate_in_envelope_intersecting(&area)
            .map(|env| env.id)
            .filter(|id| *id != exclude)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Tiles whose bounding box contains the point, in ascending id order.
    pub fn covering_candidates(&self, point: Point<f64>) -> Vec<TileId> {
        let probe = AABB::from_corners([point.x(), point.y()], [point.x(), point.y()]);
        let mut ids: Vec<TileId> = self
            .tree
            .locate_in_envelope_intersecting(&probe)
            .map(|env| env.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::PlanarKernel;
    use crate::parcel::{ParcelRecord, ParcelTable};
    use geo::{polygon, Coord};

    fn parcel_at(key: &str, cx: f64, cy: f64) -> ParcelRecord {
        let h = 0.5;
        ParcelRecord {
            key: key.to_string(),
            built_area_sqft: Some(1000.0),
            land_area_sqft: Some(5000.0),
            adj_sale_price: None,
            assessed_value: Some(1.0),
            geometry: polygon![
                (x: cx - h, y: cy - h),
                (x: cx + h, y: cy - h),
                (x: cx + h, y: cy + h),
                (x: cx - h, y: cy + h),
                (x: cx - h, y: cy - h),
            ],
        }
    }

    #[test]
    fn nearest_neighbours_come_back_in_distance_order() {
        let table = ParcelTable::from_records(
            vec![
                parcel_at("a", 1.0, 0.0),
                parcel_at("b", 4.0, 0.0),
                parcel_at("c", 2.0, 0.0),
            ],
            &PlanarKernel,
        )
        .unwrap();
        let index = ParcelIndex::build(&table);
        let hits = index.k_nearest_where(&table, Point::new(0.0, 0.0), 2, |_| true);
        let keys: Vec<&str> = hits.iter().map(|&(row, _)| table.key(row)).collect();
        assert_eq!(keys, vec!["a", "c"]);
        assert!((hits[0].1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn distance_ties_break_by_key_ascending() {
        // Two parcels exactly 2.0 from the origin, one slot available.
        let table = ParcelTable::from_records(
            vec![parcel_at("z", 2.0, 0.0), parcel_at("m", -2.0, 0.0)],
            &PlanarKernel,
        )
        .unwrap();
        let index = ParcelIndex::build(&table);
        let hits = index.k_nearest_where(&table, Point::new(0.0, 0.0), 1, |_| true);
        assert_eq!(hits.len(), 1);
        assert_eq!(table.key(hits[0].0), "m");
    }

    #[test]
    fn predicate_filters_candidates() {
        let table = ParcelTable::from_records(
            vec![parcel_at("a", 1.0, 0.0), parcel_at("b", 2.0, 0.0)],
            &PlanarKernel,
        )
        .unwrap();
        let index = ParcelIndex::build(&table);
        let a_row = table.row_of("a").unwrap();
        let hits = index.k_nearest_where(&table, Point::new(0.0, 0.0), 2, |row| row != a_row);
        assert_eq!(hits.len(), 1);
        assert_eq!(table.key(hits[0].0), "b");
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Rect<f64> {
        Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 })
    }

    #[test]
    fn box_candidates_respect_buffer() {
        let index = TileBoxIndex::build(vec![
            (TileId(0), rect(0.0, 0.0, 10.0, 10.0)),
            (TileId(1), rect(20.0, 0.0, 30.0, 10.0)),
            (TileId(2), rect(100.0, 0.0, 110.0, 10.0)),
        ]);
        let near = index.candidates(rect(0.0, 0.0, 10.0, 10.0), 15.0, TileId(0));
        assert_eq!(near, vec![TileId(1)]);
        let none = index.candidates(rect(0.0, 0.0, 10.0, 10.0), 5.0, TileId(0));
        assert!(none.is_empty());
    }

    #[test]
    fn remove_and_insert_track_merges() {
        let mut index = TileBoxIndex::build(vec![
            (TileId(0), rect(0.0, 0.0, 10.0, 10.0)),
            (TileId(1), rect(10.0, 0.0, 20.0, 10.0)),
            (TileId(2), rect(40.0, 0.0, 50.0, 10.0)),
        ]);
        index.remove(TileId(0));
        index.remove(TileId(1));
        index.insert(TileId(3), rect(0.0, 0.0, 20.0, 10.0));
        let near = index.candidates(rect(40.0, 0.0, 50.0, 10.0), 25.0, TileId(2));
        assert_eq!(near, vec![TileId(3)]);
    }
}
