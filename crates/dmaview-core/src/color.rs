//! Color types and YUV → RGB conversion coefficients.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

/// RGBA color with 32-bit float components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Convert to 8-bit RGBA, rounding to nearest.
    #[inline]
    pub fn to_rgba8(self) -> [u8; 4] {
        [
            unorm8(self.r),
            unorm8(self.g),
            unorm8(self.b),
            unorm8(self.a),
        ]
    }

    /// Background behind the presented quad.
    pub const SURFACE_CLEAR: Self = Self::new(0.0, 0.0, 0.1, 1.0);
}

#[inline]
fn unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// YUV → RGB matrix selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YuvMatrix {
    /// BT.709 limited range (16-235 Y, 16-240 UV). HD default.
    #[default]
    Bt709Limited,
    Bt709Full,
    /// BT.601 limited range, for SD content.
    Bt601Limited,
    Bt601Full,
}

impl YuvMatrix {
    pub fn coefficients(self) -> YuvCoefficients {
        // Full-range columns: the U and V contributions to (R, G, B).
        let (u_col, v_col) = match self {
            Self::Bt709Limited | Self::Bt709Full => (
                Vec3::new(0.0, -0.1873, 1.8556),
                Vec3::new(1.5748, -0.4681, 0.0),
            ),
            Self::Bt601Limited | Self::Bt601Full => (
                Vec3::new(0.0, -0.3441, 1.7720),
                Vec3::new(1.4020, -0.7141, 0.0),
            ),
        };
        // Limited range stretches 16-235 luma and 16-240 chroma back to 0-255.
        let (y_scale, c_scale, y_offset) = match self {
            Self::Bt709Limited | Self::Bt601Limited => (255.0 / 219.0, 255.0 / 224.0, 16.0 / 255.0),
            Self::Bt709Full | Self::Bt601Full => (1.0, 1.0, 0.0),
        };
        YuvCoefficients {
            matrix: Mat3::from_cols(Vec3::splat(y_scale), u_col * c_scale, v_col * c_scale),
            offset: Vec3::new(y_offset, 0.5, 0.5),
        }
    }
}

/// Matrix and offset fed to the conversion shader:
/// `rgb = matrix * (yuv - offset)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YuvCoefficients {
    pub matrix: Mat3,
    pub offset: Vec3,
}

impl YuvCoefficients {
    /// Convert normalized YUV (each in [0, 1]) to clamped RGB.
    #[inline]
    pub fn to_rgb(&self, y: f32, u: f32, v: f32) -> Vec3 {
        (self.matrix * (Vec3::new(y, u, v) - self.offset)).clamp(Vec3::ZERO, Vec3::ONE)
    }

    /// Luma only: the scaled luma broadcast to all three channels.
    #[inline]
    pub fn luma_to_gray(&self, y: f32) -> f32 {
        ((y - self.offset.x) * self.matrix.x_axis.x).clamp(0.0, 1.0)
    }

    /// Column-major layout for `glUniformMatrix3fv`.
    pub fn matrix_cols(&self) -> [f32; 9] {
        self.matrix.to_cols_array()
    }
}
