//!
//! # Rectangular Bounding Boxes
//!

// Crates.io
use serde::{Deserialize, Serialize};

// Local imports
use crate::geom::{Point, Transform};
use crate::Int;

///
/// # Axis-Aligned Bounding Box
///
/// Corners `p0` and `p1` sit closest to negative and positive infinity
/// respectively. A box is *empty* iff either coordinate of `p1` is below
/// its counterpart in `p0`; [BoundBox::empty] constructs the canonical
/// empty box, which unions as an identity element.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundBox {
    pub p0: Point,
    pub p1: Point,
}
impl BoundBox {
    /// Create from two points known to be min/max ordered
    pub fn new(p0: Point, p1: Point) -> Self {
        Self { p0, p1 }
    }
    /// Create from two arbitrary corner points
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            p0: Point::new(a.x.min(b.x), a.y.min(b.y)),
            p1: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }
    /// The canonical empty box
    pub fn empty() -> Self {
        Self {
            p0: Point::new(Int::MAX, Int::MAX),
            p1: Point::new(Int::MIN, Int::MIN),
        }
    }
    /// Whether the box contains no area (nor even a point)
    pub fn is_empty(&self) -> bool {
        self.p0.x > self.p1.x || self.p0.y > self.p1.y
    }
    /// The bounding box of a point sequence
    pub fn of_points(points: &[Point]) -> Self {
        let mut bbox = Self::empty();
        for pt in points {
            bbox = bbox.union_point(pt);
        }
        bbox
    }
    /// Union with a single point
    pub fn union_point(&self, pt: &Point) -> Self {
        Self {
            p0: Point::new(self.p0.x.min(pt.x), self.p0.y.min(pt.y)),
            p1: Point::new(self.p1.x.max(pt.x), self.p1.y.max(pt.y)),
        }
    }
    /// Union with another box
    pub fn union(&self, other: &Self) -> Self {
        Self {
            p0: Point::new(self.p0.x.min(other.p0.x), self.p0.y.min(other.p0.y)),
            p1: Point::new(self.p1.x.max(other.p1.x), self.p1.y.max(other.p1.y)),
        }
    }
    /// Inclusive point containment
    pub fn contains(&self, pt: &Point) -> bool {
        self.p0.x <= pt.x && self.p1.x >= pt.x && self.p0.y <= pt.y && self.p1.y >= pt.y
    }
    /// Whether two boxes overlap (shared edges count)
    pub fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.p0.x <= other.p1.x
            && self.p1.x >= other.p0.x
            && self.p0.y <= other.p1.y
            && self.p1.y >= other.p0.y
    }
    /// Grow in all directions by `delta`
    pub fn expand(&self, delta: Int) -> Self {
        Self {
            p0: Point::new(self.p0.x - delta, self.p0.y - delta),
            p1: Point::new(self.p1.x + delta, self.p1.y + delta),
        }
    }
    /// Translate by `(dx, dy)`
    pub fn shift(&self, dx: Int, dy: Int) -> Self {
        Self {
            p0: Point::new(self.p0.x + dx, self.p0.y + dy),
            p1: Point::new(self.p1.x + dx, self.p1.y + dy),
        }
    }
    /// (width, height); zero or negative when empty
    pub fn size(&self) -> (Int, Int) {
        (self.p1.x - self.p0.x, self.p1.y - self.p0.y)
    }
    /// Center point, rounded toward `p0`
    pub fn center(&self) -> Point {
        Point::new((self.p0.x + self.p1.x) / 2, (self.p0.y + self.p1.y) / 2)
    }
    /// Bounding box of this box's four corners put through `trans`.
    /// Empty boxes transform to the empty box.
    pub fn transform(&self, trans: &Transform) -> Self {
        if self.is_empty() {
            return Self::empty();
        }
        let corners = [
            self.p0,
            Point::new(self.p1.x, self.p0.y),
            self.p1,
            Point::new(self.p0.x, self.p1.y),
        ];
        let mut out = Self::empty();
        for c in &corners {
            out = out.union_point(&c.transform(trans));
        }
        out
    }
}
impl Default for BoundBox {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_unions_as_identity() {
        let b = BoundBox::from_corners(Point::new(3, 4), Point::new(-1, 2));
        assert_eq!(BoundBox::empty().union(&b), b);
        assert_eq!(b.union(&BoundBox::empty()), b);
        assert!(BoundBox::empty().is_empty());
        assert!(!b.is_empty());
    }

    #[test]
    fn of_points_matches_extremes() {
        let pts = [
            Point::new(0, 0),
            Point::new(1000, 0),
            Point::new(1000, 1000),
            Point::new(0, 1000),
        ];
        let bbox = BoundBox::of_points(&pts);
        assert_eq!(bbox, BoundBox::new(Point::new(0, 0), Point::new(1000, 1000)));
        let (w, h) = bbox.size();
        assert_eq!((w, h), (1000, 1000));
    }

    #[test]
    fn intersects_and_contains() {
        let a = BoundBox::new(Point::new(0, 0), Point::new(10, 10));
        let b = BoundBox::new(Point::new(10, 10), Point::new(20, 20));
        let c = BoundBox::new(Point::new(11, 11), Point::new(20, 20));
        assert!(a.intersects(&b)); // shared corner
        assert!(!a.intersects(&c));
        assert!(a.contains(&Point::new(0, 10)));
        assert!(!a.contains(&Point::new(-1, 5)));
        assert!(!a.intersects(&BoundBox::empty()));
    }

    #[test]
    fn transform_of_rotated_box() {
        let b = BoundBox::new(Point::new(0, 0), Point::new(4, 2));
        let t = Transform::rotate(90.0);
        assert_eq!(
            b.transform(&t),
            BoundBox::new(Point::new(-2, 0), Point::new(0, 4))
        );
    }
}
