//!
//! # Points & Transforms
//!
//! The coordinate primitives under the geometry model: integer DBU
//! [Point]s and the 2×2-matrix-plus-translation [Transform] composing
//! instance placements down the cell hierarchy.
//!

// Crates.io
use serde::{Deserialize, Serialize};

// Local imports
use crate::Int;

/// # Point in two-dimensional layout space
/// Coordinates in database units.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Point {
    pub x: Int,
    pub y: Int,
}
impl Point {
    pub fn new(x: Int, y: Int) -> Self {
        Self { x, y }
    }
    /// Create a new point shifted by `(dx, dy)`
    pub fn shift(&self, dx: Int, dy: Int) -> Point {
        Point {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
    /// Apply `trans`, producing a new point.
    /// Coordinate transforms run in floating point, largely for rotations,
    /// then round to the nearest integer.
    pub fn transform(&self, trans: &Transform) -> Point {
        let xf = self.x as f64;
        let yf = self.y as f64;
        let x = trans.a[0][0] * xf + trans.a[0][1] * yf + trans.b[0];
        let y = trans.a[1][0] * xf + trans.a[1][1] * yf + trans.b[1];
        Self {
            x: x.round() as Int,
            y: y.round() as Int,
        }
    }
}

///
/// # Matrix-Vector Transformation
///
/// A 2×2 rotation/reflection/magnification matrix and a two-entry
/// translation vector. Instance placements compose these down the
/// hierarchy via [Transform::cascade].
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Rotation / reflection / magnification matrix, row-major
    pub a: [[f64; 2]; 2],
    /// X-Y translation
    pub b: [f64; 2],
}
impl Transform {
    /// The identity transform
    pub fn identity() -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [0., 0.],
        }
    }
    /// Translation by `(x, y)`
    pub fn translate(x: f64, y: f64) -> Self {
        Self {
            a: [[1., 0.], [0., 1.]],
            b: [x, y],
        }
    }
    /// Rotation by `angle` degrees, counter-clockwise
    pub fn rotate(angle: f64) -> Self {
        let sin = angle.to_radians().sin();
        let cos = angle.to_radians().cos();
        Self {
            a: [[cos, -sin], [sin, cos]],
            b: [0., 0.],
        }
    }
    /// Build the instance transform of a cell reference. Applied to a
    /// target-cell point, in order: reflect across the X axis, magnify,
    /// rotate, translate.
    pub fn from_reference(origin: &Point, reflect: bool, angle: f64, mag: f64) -> Self {
        let sin = angle.to_radians().sin();
        let cos = angle.to_radians().cos();
        // Columns of R(angle) · diag(mag, ±mag); reflection negates the
        // second column.
        let ry = if reflect { -mag } else { mag };
        let a = [[mag * cos, -ry * sin], [mag * sin, ry * cos]];
        Self {
            a,
            b: [origin.x as f64, origin.y as f64],
        }
    }
    /// Compose `parent` ∘ `child`: the transform placing a grandchild
    /// coordinate into the parent's space. Not commutative.
    pub fn cascade(parent: &Transform, child: &Transform) -> Transform {
        // The result's origin is the parent's origin plus the
        // parent-transformed child origin
        let mut b = matvec(&parent.a, &child.b);
        b[0] += parent.b[0];
        b[1] += parent.b[1];
        let a = matmul(&parent.a, &child.a);
        Self { a, b }
    }
    /// A copy translated by the parent-space offset `(dx, dy)`
    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        Self {
            a: self.a,
            b: [self.b[0] + dx, self.b[1] + dy],
        }
    }
}
impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Multiply 2×2 matrices
fn matmul(a: &[[f64; 2]; 2], b: &[[f64; 2]; 2]) -> [[f64; 2]; 2] {
    [
        [
            a[0][0] * b[0][0] + a[0][1] * b[1][0],
            a[0][0] * b[0][1] + a[0][1] * b[1][1],
        ],
        [
            a[1][0] * b[0][0] + a[1][1] * b[1][0],
            a[1][0] * b[0][1] + a[1][1] * b[1][1],
        ],
    ]
}
/// Multiply a 2×2 matrix by a 2-entry vector
fn matvec(a: &[[f64; 2]; 2], b: &[f64; 2]) -> [f64; 2] {
    [
        a[0][0] * b[0] + a[0][1] * b[1],
        a[1][0] * b[0] + a[1][1] * b[1],
    ]
}
