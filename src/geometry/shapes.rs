//! 2D shapes for clearance checking
//!
//! Board geometry reduces to three analytic shapes: circles (round pads,
//! via barrels, drill holes), round-ended stroked segments (track pieces,
//! slotted holes), and polygons (custom pads, graphic outlines, zone
//! contours) with an optional stroke width.
//!
//! All coordinates are millimeters, matching the rest of the crate.

use serde::Serialize;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aabb {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl Aabb {
    pub fn new(min: [f32; 2], max: [f32; 2]) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[[f32; 2]]) -> Self {
        let mut min = [f32::MAX, f32::MAX];
        let mut max = [f32::MIN, f32::MIN];
        for p in points {
            min[0] = min[0].min(p[0]);
            min[1] = min[1].min(p[1]);
            max[0] = max[0].max(p[0]);
            max[1] = max[1].max(p[1]);
        }
        Self { min, max }
    }

    pub fn inflated(&self, amount: f32) -> Self {
        Self {
            min: [self.min[0] - amount, self.min[1] - amount],
            max: [self.max[0] + amount, self.max[1] + amount],
        }
    }

    pub fn center(&self) -> [f32; 2] {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
        ]
    }

    pub fn merged(&self, other: &Aabb) -> Self {
        Self {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    /// Lower-bound distance between two boxes (0 when overlapping)
    pub fn distance(&self, other: &Aabb) -> f32 {
        let dx = (self.min[0].max(other.min[0]) - self.max[0].min(other.max[0])).max(0.0);
        let dy = (self.min[1].max(other.min[1]) - self.max[1].min(other.max[1])).max(0.0);
        (dx * dx + dy * dy).sqrt()
    }
}

/// A shape on one layer of the board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Shape {
    Circle {
        center: [f32; 2],
        radius: f32,
    },
    /// Round-ended stroke between two points; `width` is the full stroke width
    Segment {
        a: [f32; 2],
        b: [f32; 2],
        width: f32,
    },
    /// Closed outline; `width` is an optional stroke width (0 for a bare
    /// outline), `filled` marks solid interiors (pads, zone islands)
    Polygon {
        points: Vec<[f32; 2]>,
        width: f32,
        filled: bool,
    },
}

impl Shape {
    pub fn circle(center: [f32; 2], radius: f32) -> Self {
        Shape::Circle { center, radius }
    }

    pub fn segment(a: [f32; 2], b: [f32; 2], width: f32) -> Self {
        Shape::Segment { a, b, width }
    }

    pub fn filled_polygon(points: Vec<[f32; 2]>) -> Self {
        Shape::Polygon {
            points,
            width: 0.0,
            filled: true,
        }
    }

    pub fn outline_polygon(points: Vec<[f32; 2]>, width: f32) -> Self {
        Shape::Polygon {
            points,
            width,
            filled: false,
        }
    }

    /// Rectangle helper, used heavily by pads
    pub fn rect(center: [f32; 2], w: f32, h: f32) -> Self {
        let (hw, hh) = (w / 2.0, h / 2.0);
        Shape::filled_polygon(vec![
            [center[0] - hw, center[1] - hh],
            [center[0] + hw, center[1] - hh],
            [center[0] + hw, center[1] + hh],
            [center[0] - hw, center[1] + hh],
        ])
    }

    pub fn bounding_box(&self) -> Aabb {
        match self {
            Shape::Circle { center, radius } => Aabb::new(
                [center[0] - radius, center[1] - radius],
                [center[0] + radius, center[1] + radius],
            ),
            Shape::Segment { a, b, width } => {
                Aabb::from_points(&[*a, *b]).inflated(width / 2.0)
            }
            Shape::Polygon { points, width, .. } => {
                Aabb::from_points(points).inflated(width / 2.0)
            }
        }
    }

    /// A point guaranteed to be on (or in) the shape, used for containment
    /// probes against filled polygons
    pub fn anchor(&self) -> [f32; 2] {
        match self {
            Shape::Circle { center, .. } => *center,
            Shape::Segment { a, .. } => *a,
            Shape::Polygon { points, .. } => points.first().copied().unwrap_or([0.0, 0.0]),
        }
    }
}

/// Ray-cast point-in-polygon test on a closed outline
pub fn point_in_polygon(point: [f32; 2], points: &[[f32; 2]]) -> bool {
    let mut inside = false;
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (pi, pj) = (points[i], points[j]);
        if (pi[1] > point[1]) != (pj[1] > point[1]) {
            let x_cross = (pj[0] - pi[0]) * (point[1] - pi[1]) / (pj[1] - pi[1]) + pi[0];
            if point[0] < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circle_bbox() {
        let bbox = Shape::circle([1.0, 2.0], 0.5).bounding_box();
        assert_eq!(bbox.min, [0.5, 1.5]);
        assert_eq!(bbox.max, [1.5, 2.5]);
    }

    #[test]
    fn test_segment_bbox_includes_width() {
        let bbox = Shape::segment([0.0, 0.0], [2.0, 0.0], 0.4).bounding_box();
        assert_eq!(bbox.min, [-0.2, -0.2]);
        assert_eq!(bbox.max, [2.2, 0.2]);
    }

    #[test]
    fn test_aabb_distance() {
        let a = Aabb::new([0.0, 0.0], [1.0, 1.0]);
        let b = Aabb::new([2.0, 0.0], [3.0, 1.0]);
        assert!((a.distance(&b) - 1.0).abs() < 1e-6);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let square = vec![[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0]];
        assert!(point_in_polygon([1.0, 1.0], &square));
        assert!(!point_in_polygon([3.0, 1.0], &square));
        assert!(!point_in_polygon([-0.1, 1.0], &square));
    }
}
