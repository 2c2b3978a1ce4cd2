//! Memoized ranking of prospective joins.
//!
//! A memo map over the live edges plus a lazy max-heap. The heap may hold
//! residues for edges that have since been removed or re-scored; `best`
//! discards any entry that no longer matches a live, fresh memo. Callers
//! must recompute every stale memo (via `stale_pairs` + `record`) before
//! asking for the winner.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use super::TilePair;
use crate::ols::EdgeScore;

struct Memo {
    score: EdgeScore,
    fresh: bool,
}

/// Heap ordering: highest R², then most parcels, then smallest pair key.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    r2: OrdF64,
    n_obs: usize,
    pair: Reverse<TilePair>,
}

#[derive(Default)]
pub struct JoinRegistry {
    memo: BTreeMap<TilePair, Memo>,
    heap: BinaryHeap<HeapEntry>,
}

impl JoinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// Track a new edge with no evaluation yet.
    pub fn insert_stale(&mut self, pair: TilePair) {
        self.memo.insert(
            pair,
            Memo {
                score: EdgeScore::zero(0, 0),
                fresh: false,
            },
        );
    }

    /// Drop an edge whose endpoint was consumed. Heap residues are left
    /// behind and discarded lazily by `best`.
    pub fn remove(&mut self, pair: TilePair) {
        self.memo.remove(&pair);
    }

    /// Mark an edge's memo stale without recomputing it.
    pub fn invalidate(&mut self, pair: TilePair) {
        if let Some(memo) = self.memo.get_mut(&pair) {
            memo.fresh = false;
        }
    }

    /// Stale edges in ascending pair order.
    pub fn stale_pairs(&self) -> Vec<TilePair> {
        self.memo
            .iter()
            .filter(|(_, memo)| !memo.fresh)
            .map(|(&pair, _)| pair)
            .collect()
    }

    /// Record a fresh evaluation for an edge.
    pub fn record(&mut self, pair: TilePair, score: EdgeScore) {
        if let Some(memo) = self.memo.get_mut(&pair) {
            memo.score = score;
            memo.fresh = true;
            self.heap.push(HeapEntry {
                r2: OrdF64(score.r2),
                n_obs: score.n_obs,
                pair: Reverse(pair),
            });
        }
    }

    /// The winning edge: highest R², ties to the larger parcel count, then
    /// to the smaller pair key. Requires every memo to be fresh.
    pub fn best(&mut self) -> Option<(TilePair, EdgeScore)> {
        debug_assert!(
            self.memo.values().all(|m| m.fresh),
            "best() called with stale memos"
        );
        while let Some(top) = self.heap.peek() {
            let (top_r2, top_n_obs, pair) = (top.r2.0, top.n_obs, top.pair.0);
            if let Some(memo) = self.memo.get(&pair) {
                if memo.fresh && memo.score.r2 == top_r2 && memo.score.n_obs == top_n_obs {
                    return Some((pair, memo.score));
                }
            }
            self.heap.pop();
        }
        None
    }

    /// Memoized score and freshness for one edge, if it is live.
    pub fn lookup(&self, pair: TilePair) -> Option<(EdgeScore, bool)> {
        self.memo.get(&pair).map(|m| (m.score, m.fresh))
    }
}

/// `f64` wrapper implementing `Ord` (NaN treated as equal to anything).
#[derive(Clone, Copy, PartialEq)]
struct OrdF64(f64);
impl Eq for OrdF64 {}
impl PartialOrd for OrdF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrdF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::TileId;

    fn pair(a: u64, b: u64) -> TilePair {
        TilePair::new(TileId(a), TileId(b))
    }

    fn score(r2: f64, n_obs: usize) -> EdgeScore {
        EdgeScore {
            r2,
            n_obs,
            n_sales: 0,
        }
    }

    #[test]
    fn best_prefers_highest_r2() {
        let mut reg = JoinRegistry::new();
        for p in [pair(0, 1), pair(1, 2), pair(2, 3)] {
            reg.insert_stale(p);
        }
        reg.record(pair(0, 1), score(0.3, 10));
        reg.record(pair(1, 2), score(0.9, 2));
        reg.record(pair(2, 3), score(0.5, 50));
        assert_eq!(reg.best().map(|(p, _)| p), Some(pair(1, 2)));
    }

    #[test]
    fn r2_ties_break_by_parcel_count_then_pair() {
        let mut reg = JoinRegistry::new();
        for p in [pair(5, 6), pair(0, 9), pair(0, 3)] {
            reg.insert_stale(p);
        }
        reg.record(pair(5, 6), score(0.0, 4));
        reg.record(pair(0, 9), score(0.0, 4));
        reg.record(pair(0, 3), score(0.0, 2));
        // Equal R², equal count: {0,9} beats {5,6} on pair order.
        assert_eq!(reg.best().map(|(p, _)| p), Some(pair(0, 9)));
    }

    #[test]
    fn removed_edges_never_win() {
        let mut reg = JoinRegistry::new();
        reg.insert_stale(pair(0, 1));
        reg.insert_stale(pair(1, 2));
        reg.record(pair(0, 1), score(0.9, 5));
        reg.record(pair(1, 2), score(0.4, 5));
        reg.remove(pair(0, 1));
        assert_eq!(reg.best().map(|(p, _)| p), Some(pair(1, 2)));
    }

    #[test]
    fn stale_residues_are_discarded() {
        let mut reg = JoinRegistry::new();
        reg.insert_stale(pair(0, 1));
        reg.insert_stale(pair(1, 2));
        reg.record(pair(0, 1), score(0.9, 5));
        reg.record(pair(1, 2), score(0.4, 5));
        // Re-scoring downward leaves a 0.9 residue in the heap.
        reg.invalidate(pair(0, 1));
        reg.record(pair(0, 1), score(0.1, 5));
        assert_eq!(reg.best().map(|(p, _)| p), Some(pair(1, 2)));
    }

    #[test]
    fn empty_registry_has_no_winner() {
        let mut reg = JoinRegistry::new();
        assert!(reg.best().is_none());
        reg.insert_stale(pair(0, 1));
        reg.record(pair(0, 1), score(0.2, 1));
        reg.remove(pair(0, 1));
        assert!(reg.best().is_none());
    }

    #[test]
    fn stale_pairs_come_back_sorted() {
        let mut reg = JoinRegistry::new();
        for p in [pair(4, 7), pair(0, 2), pair(1, 2)] {
            reg.insert_stale(p);
        }
        assert_eq!(reg.stale_pairs(), vec![pair(0, 2), pair(1, 2), pair(4, 7)]);
        reg.record(pair(0, 2), score(0.5, 3));
        assert_eq!(reg.stale_pairs(), vec![pair(1, 2), pair(4, 7)]);
    }
}
