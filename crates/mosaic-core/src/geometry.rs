//! Planar polygon operations behind a capability trait.
//!
//! All lengths are feet and all areas square feet. The kernel is the one
//! swappable seam for geometry: everything else in the crate talks to these
//! five operations and never to the underlying library directly.

use geo::coordinate_position::CoordPos;
use geo::dimensions::Dimensions;
use geo::line_measures::Distance;
use geo::{
    Area, BooleanOps, Centroid, Euclidean, Intersects, LinesIter, MultiPolygon, Point, Polygon,
    Relate, Validation,
};

/// Polygon operations required by the tiling pipeline.
pub trait GeometryKernel: Send + Sync {
    /// Reject geometry the pipeline cannot work with. Invalid geometry is
    /// fatal at load, never at runtime.
    fn validate(&self, polygon: &Polygon<f64>) -> Result<(), String>;

    /// Centroid of a (multi)polygon; `None` for empty geometry.
    fn centroid(&self, geometry: &MultiPolygon<f64>) -> Option<Point<f64>>;

    /// Rook adjacency under a buffer: true iff the boundaries share a
    /// segment of positive length, the interiors overlap with positive
    /// area, or the geometries are disjoint and separated by strictly less
    /// than `buffer_feet`. A single point of tangency is not adjacency.
    fn rook_adjacent(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>, buffer_feet: f64)
        -> bool;

    /// Topological union. Total area is preserved to within a relative
    /// tolerance of 1e-6.
    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64>;

    /// Point containment with the boundary counted as inside.
    fn contains_point(&self, geometry: &MultiPolygon<f64>, point: &Point<f64>) -> bool;
}

/// Default kernel: exact planar predicates from the `geo` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanarKernel;

impl GeometryKernel for PlanarKernel {
    fn validate(&self, polygon: &Polygon<f64>) -> Result<(), String> {
        if polygon.exterior().0.len() < 4 {
            return Err("degenerate exterior ring".to_string());
        }
        polygon.check_validation().map_err(|e| e.to_string())?;
        if polygon.unsigned_area() <= 0.0 {
            return Err("zero-area polygon".to_string());
        }
        Ok(())
    }

    fn centroid(&self, geometry: &MultiPolygon<f64>) -> Option<Point<f64>> {
        geometry.centroid()
    }

    fn rook_adjacent(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
        buffer_feet: f64,
    ) -> bool {
        let im = a.relate(b);
        if im.get(CoordPos::OnBoundary, CoordPos::OnBoundary) == Dimensions::OneDimensional {
            return true;
        }
        if im.get(CoordPos::Inside, CoordPos::Inside) == Dimensions::TwoDimensional {
            return true;
        }
        if im.is_intersects() {
            // Touching, but only at isolated points.
            return false;
        }
        buffer_feet > 0.0 && separation(a, b) < buffer_feet
    }

    fn union(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        a.union(b)
    }

    fn contains_point(&self, geometry: &MultiPolygon<f64>, point: &Point<f64>) -> bool {
        geometry.intersects(point)
    }
}

/// Minimum Euclidean separation between two disjoint geometries, measured
/// over their boundary segments.
fn separation(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    let mut best = f64::INFINITY;
    for la in a.lines_iter() {
        for lb in b.lines_iter() {
            let d = Euclidean.distance(&la, &lb);
            if d < best {
                best = d;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn square(x0: f64, y0: f64, side: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + side, y: y0),
            (x: x0 + side, y: y0 + side),
            (x: x0, y: y0 + side),
            (x: x0, y: y0),
        ]])
    }

    #[test]
    fn shared_edge_is_adjacent() {
        let k = PlanarKernel;
        let a = square(0.0, 0.0, 10.0);
        let b = square(10.0, 0.0, 10.0);
        assert!(k.rook_adjacent(&a, &b, 30.0));
        assert!(k.rook_adjacent(&a, &b, 0.0), "shared edges need no buffer");
    }

    #[test]
    fn corner_tangency_is_not_adjacent() {
        let k = PlanarKernel;
        let a = square(0.0, 0.0, 10.0);
        let b = square(10.0, 10.0, 10.0);
        assert!(
            !k.rook_adjacent(&a, &b, 30.0),
            "a single shared corner must not count as adjacency"
        );
    }

    #[test]
    fn gap_under_buffer_is_adjacent() {
        let k = PlanarKernel;
        let a = square(0.0, 0.0, 10.0);
        let b = square(20.0, 0.0, 10.0); // 10 ft gap
        assert!(k.rook_adjacent(&a, &b, 30.0));
        assert!(!k.rook_adjacent(&a, &b, 10.0), "gap equal to buffer is out");
        assert!(!k.rook_adjacent(&a, &b, 5.0));
    }

    #[test]
    fn overlapping_interiors_are_adjacent() {
        let k = PlanarKernel;
        let a = square(0.0, 0.0, 10.0);
        let b = square(5.0, 5.0, 10.0);
        assert!(k.rook_adjacent(&a, &b, 0.0));
    }

    #[test]
    fn union_preserves_total_area() {
        let k = PlanarKernel;
        let a = square(0.0, 0.0, 10.0);
        let b = square(10.0, 0.0, 10.0);
        let u = k.union(&a, &b);
        let total = u.unsigned_area();
        assert!(
            (total - 200.0).abs() / 200.0 < 1e-6,
            "union area {total} should equal 200"
        );
    }

    #[test]
    fn centroid_of_square() {
        let k = PlanarKernel;
        let a = square(0.0, 0.0, 10.0);
        let c = k.centroid(&a).expect("nonempty geometry has a centroid");
        assert!((c.x() - 5.0).abs() < 1e-12);
        assert!((c.y() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn boundary_point_counts_as_contained() {
        let k = PlanarKernel;
        let a = square(0.0, 0.0, 10.0);
        assert!(k.contains_point(&a, &Point::new(5.0, 5.0)));
        assert!(k.contains_point(&a, &Point::new(10.0, 5.0)), "boundary is inside");
        assert!(!k.contains_point(&a, &Point::new(15.0, 5.0)));
    }

    #[test]
    fn degenerate_ring_fails_validation() {
        let k = PlanarKernel;
        let bad: Polygon<f64> = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)];
        assert!(k.validate(&bad).is_err());
    }

    #[test]
    fn self_intersecting_ring_fails_validation() {
        let k = PlanarKernel;
        let bowtie: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 0.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ];
        assert!(k.validate(&bowtie).is_err());
    }
}
