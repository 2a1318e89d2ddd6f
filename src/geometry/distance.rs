//! Distance calculation primitives for clearance checking
//!
//! Contains point, segment, and shape minimum-distance calculations with
//! witness points. Shape distances are surface-to-surface: a negative
//! result means the shapes overlap by that depth.

use super::shapes::{point_in_polygon, Shape};

/// Midpoint of two points
pub fn midpoint(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

fn point_distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Point-to-segment minimum distance with the closest point on the segment
pub fn point_segment_distance(p: [f32; 2], a: [f32; 2], b: [f32; 2]) -> (f32, [f32; 2]) {
    let ab = [b[0] - a[0], b[1] - a[1]];
    let ap = [p[0] - a[0], p[1] - a[1]];
    let ab_len2 = ab[0] * ab[0] + ab[1] * ab[1];

    if ab_len2 < 1e-10 {
        // Degenerate segment
        return (point_distance(p, a), a);
    }

    let t = ((ap[0] * ab[0] + ap[1] * ab[1]) / ab_len2).clamp(0.0, 1.0);
    let closest = [a[0] + t * ab[0], a[1] + t * ab[1]];
    (point_distance(p, closest), closest)
}

/// Segment-to-segment minimum distance; the witness point lies midway
/// between the two closest features
pub fn segment_distance(
    a1: [f32; 2],
    a2: [f32; 2],
    b1: [f32; 2],
    b2: [f32; 2],
) -> (f32, [f32; 2]) {
    if segments_intersect(a1, a2, b1, b2) {
        // Crossing segments touch; witness at the midpoint of the spans
        return (0.0, midpoint(midpoint(a1, a2), midpoint(b1, b2)));
    }

    let mut min_d = f32::MAX;
    let mut closest = [0.0f32; 2];

    for (p, s1, s2) in [(a1, b1, b2), (a2, b1, b2), (b1, a1, a2), (b2, a1, a2)] {
        let (d, q) = point_segment_distance(p, s1, s2);
        if d < min_d {
            min_d = d;
            closest = midpoint(p, q);
        }
    }

    (min_d, closest)
}

fn orient(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

fn segments_intersect(a1: [f32; 2], a2: [f32; 2], b1: [f32; 2], b2: [f32; 2]) -> bool {
    let d1 = orient(b1, b2, a1);
    let d2 = orient(b1, b2, a2);
    let d3 = orient(a1, a2, b1);
    let d4 = orient(a1, a2, b2);
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// One primitive of a decomposed shape: a point or a bare segment, plus
/// the stroke radius it carries
enum Prim {
    Point([f32; 2]),
    Seg([f32; 2], [f32; 2]),
}

fn decompose(shape: &Shape, prims: &mut Vec<(Prim, f32)>) {
    match shape {
        Shape::Circle { center, radius } => prims.push((Prim::Point(*center), *radius)),
        Shape::Segment { a, b, width } => prims.push((Prim::Seg(*a, *b), width / 2.0)),
        Shape::Polygon { points, width, .. } => {
            let r = width / 2.0;
            let n = points.len();
            for i in 0..n {
                prims.push((Prim::Seg(points[i], points[(i + 1) % n]), r));
            }
        }
    }
}

fn prim_distance(a: &Prim, b: &Prim) -> (f32, [f32; 2]) {
    match (a, b) {
        (Prim::Point(p), Prim::Point(q)) => (point_distance(*p, *q), midpoint(*p, *q)),
        (Prim::Point(p), Prim::Seg(s1, s2)) => {
            let (d, q) = point_segment_distance(*p, *s1, *s2);
            (d, midpoint(*p, q))
        }
        (Prim::Seg(s1, s2), Prim::Point(p)) => {
            let (d, q) = point_segment_distance(*p, *s1, *s2);
            (d, midpoint(*p, q))
        }
        (Prim::Seg(a1, a2), Prim::Seg(b1, b2)) => segment_distance(*a1, *a2, *b1, *b2),
    }
}

/// Minimum surface-to-surface distance between two shapes with a witness
/// point near the closest approach. Negative when the shapes overlap.
pub fn shape_distance(a: &Shape, b: &Shape) -> (f32, [f32; 2]) {
    // Containment: a shape fully inside a filled polygon has no
    // edge crossing, so probe with an anchor point first
    for (outer, inner) in [(a, b), (b, a)] {
        if let Shape::Polygon {
            points,
            filled: true,
            ..
        } = outer
        {
            let probe = inner.anchor();
            if point_in_polygon(probe, points) {
                return (-penetration_depth(probe, points), probe);
            }
        }
    }

    let mut prims_a = Vec::new();
    let mut prims_b = Vec::new();
    decompose(a, &mut prims_a);
    decompose(b, &mut prims_b);

    let mut min_d = f32::MAX;
    let mut witness = [0.0f32; 2];
    for (pa, ra) in &prims_a {
        for (pb, rb) in &prims_b {
            let (d, w) = prim_distance(pa, pb);
            let d = d - ra - rb;
            if d < min_d {
                min_d = d;
                witness = w;
            }
        }
    }

    (min_d, witness)
}

fn penetration_depth(point: [f32; 2], outline: &[[f32; 2]]) -> f32 {
    let n = outline.len();
    let mut min_d = f32::MAX;
    for i in 0..n {
        let (d, _) = point_segment_distance(point, outline[i], outline[(i + 1) % n]);
        min_d = min_d.min(d);
    }
    min_d
}
