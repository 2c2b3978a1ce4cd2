//! Tiles, rook edges, and incremental merge maintenance.
//!
//! Nodes are tiles, edges are prospective joins. Adjacency lives in ordered
//! maps so every scan is deterministic, and `merge` reports exactly which
//! edges it removed and created so the owning engine can keep the join
//! registry in lockstep.

pub mod registry;

use std::collections::{BTreeMap, BTreeSet};

use geo::{BoundingRect, MultiPolygon};

use crate::error::{MosaicError, Result};
use crate::geometry::GeometryKernel;
use crate::index::TileBoxIndex;
use crate::parcel::ParcelTable;

/// Dense tile identifier. Seed tiles take 0..n in input-key sort order;
/// merged tiles continue the sequence, so ids are a pure function of the
/// inputs and the merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId(pub u64);

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unordered pair of distinct tiles, stored with `a < b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TilePair {
    a: TileId,
    b: TileId,
}

impl TilePair {
    pub fn new(x: TileId, y: TileId) -> Self {
        debug_assert_ne!(x, y, "no self-edges");
        if x < y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    pub fn a(&self) -> TileId {
        self.a
    }

    pub fn b(&self) -> TileId {
        self.b
    }
}

impl std::fmt::Display for TilePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}, {}}}", self.a, self.b)
    }
}

#[derive(Debug)]
pub struct Tile {
    pub id: TileId,
    pub key: String,
    pub geometry: MultiPolygon<f64>,
    /// Member parcel rows, ascending.
    pub members: Vec<usize>,
    /// Members carrying an actual sale price.
    pub sales_count: usize,
    /// R² of the join that created this tile; `None` until a merge does.
    pub r_squared: Option<f64>,
}

/// One tile as read from the tiles table.
#[derive(Debug, Clone)]
pub struct TileSeed {
    pub key: String,
    pub geometry: MultiPolygon<f64>,
}

/// What one merge did to the edge set.
pub struct MergeOutcome {
    pub new_tile: TileId,
    /// Edges deleted because an endpoint was consumed, ascending, deduped.
    pub removed_edges: Vec<TilePair>,
    /// Replacement edges to the new tile, ascending. Their evaluations are
    /// unknown; the owner must track them as stale.
    pub created_edges: Vec<TilePair>,
}

#[derive(Debug)]
pub struct TileGraph {
    tiles: BTreeMap<TileId, Tile>,
    adjacency: BTreeMap<TileId, BTreeSet<TileId>>,
    next_id: u64,
    merge_seq: u64,
}

impl TileGraph {
    /// Build the initial graph: assign every parcel to the tile containing
    /// its centroid (boundary ties go to the smaller tile id, which is the
    /// lexicographically smaller input key), then discover rook edges via
    /// bounding-box candidates confirmed by the kernel.
    pub fn init(
        mut seeds: Vec<TileSeed>,
        table: &mut ParcelTable,
        kernel: &dyn GeometryKernel,
        buffer_feet: f64,
    ) -> Result<(Self, TileBoxIndex)> {
        seeds.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(dup) = seeds.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(MosaicError::DuplicateKey {
                key: dup[0].key.clone(),
            });
        }

        let mut tiles: BTreeMap<TileId, Tile> = BTreeMap::new();
        let mut rects = Vec::with_capacity(seeds.len());
        for (i, seed) in seeds.into_iter().enumerate() {
            let id = TileId(i as u64);
            for polygon in seed.geometry.iter() {
                kernel
                    .validate(polygon)
                    .map_err(|reason| MosaicError::InvalidGeometry {
                        key: seed.key.clone(),
                        reason,
                    })?;
            }
            let rect =
                seed.geometry
                    .bounding_rect()
                    .ok_or_else(|| MosaicError::InvalidGeometry {
                        key: seed.key.clone(),
                        reason: "empty geometry".to_string(),
                    })?;
            rects.push((id, rect));
            tiles.insert(
                id,
                Tile {
                    id,
                    key: seed.key,
                    geometry: seed.geometry,
                    members: Vec::new(),
                    sales_count: 0,
                    r_squared: None,
                },
            );
        }
        let boxes = TileBoxIndex::build(rects);

        // ── Parcel assignment by centroid containment ────────────────────
        for row in table.rows() {
            let centroid = table.centroid(row);
            let mut owner: Option<TileId> = None;
            for id in boxes.covering_candidates(centroid) {
                let tile = &tiles[&id];
                if kernel.contains_point(&tile.geometry, &centroid) {
                    owner = Some(id);
                    break; // candidates come back in ascending id order
                }
            }
            let id = owner.ok_or_else(|| MosaicError::UncoveredParcel {
                key: table.key(row).to_string(),
            })?;
            table.set_tile(row, id);
            let tile = tiles.get_mut(&id).expect("owner id is a live tile");
            tile.members.push(row);
            if table.has_sale(row) {
                tile.sales_count += 1;
            }
        }

        // ── Initial edge discovery ───────────────────────────────────────
        let mut adjacency: BTreeMap<TileId, BTreeSet<TileId>> = BTreeMap::new();
        for id in tiles.keys().copied() {
            adjacency.entry(id).or_default();
        }
        let ids: Vec<TileId> = tiles.keys().copied().collect();
        for &id in &ids {
            let rect = match tiles[&id].geometry.bounding_rect() {
                Some(rect) => rect,
                None => continue,
            };
            for other in boxes.candidates(rect, buffer_feet, id) {
                if other <= id {
                    continue; // each unordered pair confirmed once
                }
                if kernel.rook_adjacent(&tiles[&id].geometry, &tiles[&other].geometry, buffer_feet)
                {
                    adjacency.entry(id).or_default().insert(other);
                    adjacency.entry(other).or_default().insert(id);
                }
            }
        }

        let next_id = tiles.len() as u64;
        Ok((
            Self {
                tiles,
                adjacency,
                next_id,
                merge_seq: 0,
            },
            boxes,
        ))
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(&id)
    }

    /// Tiles in ascending id order.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn neighbours(&self, id: TileId) -> impl Iterator<Item = TileId> + '_ {
        self.adjacency.get(&id).into_iter().flatten().copied()
    }

    /// Every edge as an ordered pair, ascending.
    pub fn edge_pairs(&self) -> Vec<TilePair> {
        let mut pairs = Vec::new();
        for (&id, neighbours) in &self.adjacency {
            for &other in neighbours {
                if id < other {
                    pairs.push(TilePair::new(id, other));
                }
            }
        }
        pairs
    }

    /// Consume `pair`'s endpoints into a fresh tile carrying the winning
    /// R². Every edge that touched an endpoint is replaced by one edge to
    /// the new tile (duplicates collapse); the `pair` edge itself dies.
    pub fn merge(
        &mut self,
        pair: TilePair,
        winning_r2: f64,
        table: &mut ParcelTable,
        kernel: &dyn GeometryKernel,
    ) -> MergeOutcome {
        let ta = self
            .tiles
            .remove(&pair.a())
            .expect("merge operand must be a live tile");
        let tb = self
            .tiles
            .remove(&pair.b())
            .expect("merge operand must be a live tile");

        let id = TileId(self.next_id);
        self.next_id += 1;
        self.merge_seq += 1;
        let key = format!("M{:05}", self.merge_seq);

        let mut members = Vec::with_capacity(ta.members.len() + tb.members.len());
        members.extend_from_slice(&ta.members);
        members.extend_from_slice(&tb.members);
        members.sort_unstable();
        for &row in &members {
            table.set_tile(row, id);
        }

        let geometry = kernel.union(&ta.geometry, &tb.geometry);

        let na = self.adjacency.remove(&pair.a()).unwrap_or_default();
        let nb = self.adjacency.remove(&pair.b()).unwrap_or_default();
        let mut removed: Vec<TilePair> = Vec::with_capacity(na.len() + nb.len());
        let mut neighbours: BTreeSet<TileId> = BTreeSet::new();
        for &x in &na {
            removed.push(TilePair::new(pair.a(), x));
            if x != pair.b() {
                neighbours.insert(x);
            }
        }
        for &x in &nb {
            removed.push(TilePair::new(pair.b(), x));
            if x != pair.a() {
                neighbours.insert(x);
            }
        }
        removed.sort_unstable();
        removed.dedup();

        for &x in &neighbours {
            if let Some(set) = self.adjacency.get_mut(&x) {
                set.remove(&pair.a());
                set.remove(&pair.b());
                set.insert(id);
            }
        }
        self.adjacency.insert(id, neighbours.clone());

        let created: Vec<TilePair> = neighbours
            .iter()
            .map(|&x| TilePair::new(id, x))
            .collect();

        self.tiles.insert(
            id,
            Tile {
                id,
                key,
                geometry,
                members,
                sales_count: ta.sales_count + tb.sales_count,
                r_squared: Some(winning_r2),
            },
        );

        MergeOutcome {
            new_tile: id,
            removed_edges: removed,
            created_edges: created,
        }
    }
}
