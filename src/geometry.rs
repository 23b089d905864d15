//! Pure geometry predicates over geographical rings.
//!
//! All functions here are deterministic and side-effect free. Rings are open
//! vertex lists (no repeated closing vertex); the closing edge from the last
//! vertex back to the first is implied.

use crate::projection::GeoPos;
use crate::types::Footprint;

/// Even-odd ray-casting point-in-polygon test against a single ring.
///
/// A point exactly on a boundary edge is implementation-defined, as is usual
/// for this algorithm.
pub fn point_in_ring(p: GeoPos, ring: &[GeoPos]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let a = ring[i];
        let b = ring[j];
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let cross = (b.lon - a.lon) * (p.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if p.lon < cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn orientation(p: GeoPos, q: GeoPos, r: GeoPos) -> i8 {
    let val = (q.lat - p.lat) * (r.lon - q.lon) - (q.lon - p.lon) * (r.lat - q.lat);
    if val.abs() < 1e-12 {
        0 // Collinear
    } else if val > 0.0 {
        1
    } else {
        -1
    }
}

/// Checks if two line segments properly cross.
///
/// Collinear overlaps are not reported, which is sufficient for the overlap
/// tests this client performs.
pub fn segments_intersect(p1: GeoPos, q1: GeoPos, p2: GeoPos, q2: GeoPos) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    o1 != o2 && o3 != o4
}

/// Edge iterator over an open ring, including the implied closing edge.
fn ring_edges(ring: &[GeoPos]) -> impl Iterator<Item = (GeoPos, GeoPos)> + '_ {
    (0..ring.len()).map(move |i| (ring[i], ring[(i + 1) % ring.len()]))
}

/// Whether a ring and a footprint share any area.
///
/// True if any vertex of the ring lies inside one of the footprint's rings,
/// any footprint vertex lies inside the ring, or any pair of edges crosses.
pub fn ring_overlaps_footprint(ring: &[GeoPos], footprint: &Footprint) -> bool {
    if ring.len() < 3 {
        return false;
    }

    for other in footprint.rings() {
        if ring.iter().any(|v| point_in_ring(*v, other)) {
            return true;
        }
        if other.iter().any(|v| point_in_ring(*v, ring)) {
            return true;
        }
        for (a1, a2) in ring_edges(ring) {
            for (b1, b2) in ring_edges(other) {
                if segments_intersect(a1, a2, b1, b2) {
                    return true;
                }
            }
        }
    }
    false
}

/// Whether `outer` fully contains every vertex of every ring of `footprint`.
pub fn ring_contains_footprint(outer: &[GeoPos], footprint: &Footprint) -> bool {
    let mut any = false;
    for ring in footprint.rings() {
        for v in ring {
            any = true;
            if !point_in_ring(*v, outer) {
                return false;
            }
        }
    }
    any
}

/// Point-in-footprint test honoring holes: inside some outer ring and not
/// inside any of that polygon's holes.
pub fn footprint_contains(footprint: &Footprint, p: GeoPos) -> bool {
    footprint.polygons.iter().any(|poly| {
        point_in_ring(p, &poly.outer) && !poly.holes.iter().any(|hole| point_in_ring(p, hole))
    })
}

/// Whether `outer` fully contains every vertex of `inner`.
pub fn ring_contains_ring(outer: &[GeoPos], inner: &[GeoPos]) -> bool {
    !inner.is_empty() && inner.iter().all(|v| point_in_ring(*v, outer))
}

/// Shoelace signed area of a ring, in squared degrees.
///
/// Only used for relative ordering (smaller shapes render on top), never for
/// real-world area figures.
pub fn signed_area(ring: &[GeoPos]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (a, b) in ring_edges(ring) {
        sum += a.lon * b.lat - b.lon * a.lat;
    }
    sum / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x: f64, y: f64, size: f64) -> Vec<GeoPos> {
        vec![
            GeoPos::new(x, y),
            GeoPos::new(x, y + size),
            GeoPos::new(x + size, y + size),
            GeoPos::new(x + size, y),
        ]
    }

    #[test]
    fn point_in_unit_square() {
        let ring = square(0.0, 0.0, 1.0);
        assert!(point_in_ring(GeoPos::new(0.5, 0.5), &ring));
        assert!(!point_in_ring(GeoPos::new(2.0, 2.0), &ring));
        assert!(!point_in_ring(GeoPos::new(-0.5, 0.5), &ring));
    }

    #[test]
    fn point_in_ring_needs_three_vertices() {
        let degenerate = vec![GeoPos::new(0.0, 0.0), GeoPos::new(1.0, 1.0)];
        assert!(!point_in_ring(GeoPos::new(0.5, 0.5), &degenerate));
    }

    #[test]
    fn segments_cross() {
        let a1 = GeoPos::new(0.0, 0.0);
        let a2 = GeoPos::new(10.0, 10.0);
        let b1 = GeoPos::new(0.0, 10.0);
        let b2 = GeoPos::new(10.0, 0.0);
        assert!(segments_intersect(a1, a2, b1, b2));

        let c1 = GeoPos::new(0.0, 5.0);
        let c2 = GeoPos::new(10.0, 5.0);
        let d1 = GeoPos::new(0.0, 6.0);
        let d2 = GeoPos::new(10.0, 6.0);
        assert!(!segments_intersect(c1, c2, d1, d2), "parallel");
    }

    #[test]
    fn overlap_fact_is_order_independent() {
        // Two unit squares offset by (0.5, 0.5): they overlap no matter which
        // one plays the "drawn ring" role.
        let a = square(0.0, 0.0, 1.0);
        let b = square(0.5, 0.5, 1.0);

        let fp_a = Footprint::from_outer_ring(a.clone());
        let fp_b = Footprint::from_outer_ring(b.clone());

        assert!(ring_overlaps_footprint(&a, &fp_b));
        assert!(ring_overlaps_footprint(&b, &fp_a));

        // Disjoint squares agree too.
        let c = square(5.0, 5.0, 1.0);
        let fp_c = Footprint::from_outer_ring(c.clone());
        assert!(!ring_overlaps_footprint(&a, &fp_c));
        assert!(!ring_overlaps_footprint(&c, &fp_a));
    }

    #[test]
    fn overlap_detects_edge_crossing_without_contained_vertices() {
        // A thin horizontal band crossing a tall thin box: edges cross but
        // neither shape holds a vertex of the other.
        let band = vec![
            GeoPos::new(-1.0, 0.4),
            GeoPos::new(-1.0, 0.6),
            GeoPos::new(2.0, 0.6),
            GeoPos::new(2.0, 0.4),
        ];
        let tall = Footprint::from_outer_ring(vec![
            GeoPos::new(0.4, -1.0),
            GeoPos::new(0.4, 2.0),
            GeoPos::new(0.6, 2.0),
            GeoPos::new(0.6, -1.0),
        ]);
        assert!(ring_overlaps_footprint(&band, &tall));
    }

    #[test]
    fn containment_is_asymmetric() {
        let big = square(0.0, 0.0, 10.0);
        let small = square(4.0, 4.0, 1.0);

        let fp_big = Footprint::from_outer_ring(big.clone());
        let fp_small = Footprint::from_outer_ring(small.clone());

        assert!(ring_contains_footprint(&big, &fp_small));
        assert!(!ring_contains_footprint(&small, &fp_big));

        assert!(ring_contains_ring(&big, &small));
        assert!(!ring_contains_ring(&small, &big));
    }

    #[test]
    fn footprint_contains_honors_holes() {
        let footprint = Footprint {
            polygons: vec![crate::types::PolygonRings {
                outer: square(0.0, 0.0, 10.0),
                holes: vec![square(4.0, 4.0, 2.0)],
            }],
        };
        assert!(footprint_contains(&footprint, GeoPos::new(1.0, 1.0)));
        assert!(!footprint_contains(&footprint, GeoPos::new(5.0, 5.0)));
        assert!(!footprint_contains(&footprint, GeoPos::new(20.0, 20.0)));
    }

    #[test]
    fn containment_of_empty_footprint_is_false() {
        let big = square(0.0, 0.0, 10.0);
        let empty = Footprint::default();
        assert!(!ring_contains_footprint(&big, &empty));
    }

    #[test]
    fn signed_area_orientation_and_magnitude() {
        // Counter-clockwise unit square in lon/lat axes.
        let ccw = square(0.0, 0.0, 1.0);
        let area = signed_area(&ccw);
        assert!((area.abs() - 1.0).abs() < 1e-9);

        let mut cw = ccw.clone();
        cw.reverse();
        assert!((signed_area(&cw) + area).abs() < 1e-9);

        // Smaller square has smaller magnitude, which is all the renderer
        // relies on.
        let small = square(0.0, 0.0, 0.5);
        assert!(signed_area(&small).abs() < area.abs());
    }
}
