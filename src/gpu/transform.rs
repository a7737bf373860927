// SPDX-License-Identifier: GPL-3.0-only

//! 4x4 transforms for placing textured quads in normalized device coordinates

use bytemuck::{Pod, Zeroable};

/// Column-major 4x4 matrix, laid out the way WGSL `mat4x4<f32>` expects
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    pub fn scale(sx: f32, sy: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.cols[0][0] = sx;
        m.cols[1][1] = sy;
        m
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.cols[3][0] = tx;
        m.cols[3][1] = ty;
        m
    }

    /// Counter-clockwise rotation about the z axis
    pub fn rotation_z(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        // Snap so quarter turns stay exact
        let snap = |v: f32| if v.abs() < 1e-6 { 0.0 } else { v };
        let (sin, cos) = (snap(sin), snap(cos));
        let mut m = Self::IDENTITY;
        m.cols[0][0] = cos;
        m.cols[0][1] = sin;
        m.cols[1][0] = -sin;
        m.cols[1][1] = cos;
        m
    }

    /// `self * rhs`: `rhs` applies first
    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for (c, column) in out.iter_mut().enumerate() {
            for (r, value) in column.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.cols[k][r] * rhs.cols[c][k]).sum();
            }
        }
        Mat4 { cols: out }
    }

    /// Transform a point in the z=0 plane
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.cols[0][0] * x + self.cols[1][0] * y + self.cols[3][0],
            self.cols[0][1] * x + self.cols[1][1] * y + self.cols[3][1],
        )
    }

    /// Inverse of the 2D affine part; `None` when degenerate
    pub fn inverse_affine_2d(&self) -> Option<Mat4> {
        let (a, b) = (self.cols[0][0], self.cols[1][0]);
        let (c, d) = (self.cols[0][1], self.cols[1][1]);
        let (tx, ty) = (self.cols[3][0], self.cols[3][1]);
        let det = a * d - b * c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;
        let (ia, ib) = (d * inv_det, -b * inv_det);
        let (ic, id) = (-c * inv_det, a * inv_det);

        let mut m = Self::IDENTITY;
        m.cols[0][0] = ia;
        m.cols[1][0] = ib;
        m.cols[0][1] = ic;
        m.cols[1][1] = id;
        m.cols[3][0] = -(ia * tx + ib * ty);
        m.cols[3][1] = -(ic * tx + id * ty);
        Some(m)
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Texture coordinate of a quad corner: x right, y up in, v down out
pub fn quad_uv(x: f32, y: f32) -> (f32, f32) {
    (x * 0.5 + 0.5, 0.5 - y * 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-5 && (a.1 - b.1).abs() < 1e-5
    }

    #[test]
    fn test_quarter_turn_is_exact() {
        let m = Mat4::rotation_z(90.0);
        assert_eq!(m.transform_point(1.0, 0.0), (0.0, 1.0));
        assert_eq!(m.transform_point(0.0, 1.0), (-1.0, 0.0));
    }

    #[test]
    fn test_multiplication_order() {
        // Scale first, then translate
        let m = Mat4::translation(0.5, 0.0).mul(&Mat4::scale(0.25, 0.25));
        assert!(close(m.transform_point(1.0, 1.0), (0.75, 0.25)));
    }

    #[test]
    fn test_inverse_round_trip() {
        let m = Mat4::translation(0.6, -0.2)
            .mul(&Mat4::scale(0.3, 0.4))
            .mul(&Mat4::rotation_z(90.0));
        let inv = m.inverse_affine_2d().unwrap();
        let p = m.transform_point(0.25, -0.5);
        assert!(close(inv.transform_point(p.0, p.1), (0.25, -0.5)));
    }

    #[test]
    fn test_degenerate_has_no_inverse() {
        assert!(Mat4::scale(0.0, 1.0).inverse_affine_2d().is_none());
    }

    #[test]
    fn test_quad_uv_corners() {
        assert_eq!(quad_uv(-1.0, 1.0), (0.0, 0.0));
        assert_eq!(quad_uv(1.0, -1.0), (1.0, 1.0));
    }
}
