//! Diagonal Gaussian noise models for factors.

use serde::{Deserialize, Serialize};

/// Smallest sigma accepted; keeps information weights finite.
const MIN_SIGMA: f64 = 1e-9;

/// Diagonal noise on a 6-DOF pose residual, ordered like [`super::SE3::log`]:
/// [rot_x, rot_y, rot_z, t_x, t_y, t_z].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseModel {
    sigmas: [f64; 6],
}

impl NoiseModel {
    /// Same sigma on every rotation axis and every translation axis.
    pub fn isotropic(translation_sigma: f64, rotation_sigma: f64) -> Self {
        Self::from_axes(
            rotation_sigma,
            rotation_sigma,
            rotation_sigma,
            translation_sigma,
        )
    }

    /// Separate roll/pitch/yaw sigmas with one translation sigma.
    pub fn from_axes(roll: f64, pitch: f64, yaw: f64, translation_sigma: f64) -> Self {
        Self::from_sigmas([
            roll,
            pitch,
            yaw,
            translation_sigma,
            translation_sigma,
            translation_sigma,
        ])
    }

    pub fn from_sigmas(sigmas: [f64; 6]) -> Self {
        Self {
            sigmas: sigmas.map(sanitize_sigma),
        }
    }

    pub fn sigmas(&self) -> [f64; 6] {
        self.sigmas
    }

    /// Square-root information per residual component (1 / sigma).
    pub fn sqrt_information(&self) -> [f64; 6] {
        self.sigmas.map(|s| 1.0 / s)
    }
}

impl Default for NoiseModel {
    fn default() -> Self {
        Self::isotropic(0.1, 0.1)
    }
}

/// Clamp non-finite or non-positive sigmas.
pub(crate) fn sanitize_sigma(sigma: f64) -> f64 {
    if sigma.is_finite() && sigma > MIN_SIGMA {
        sigma
    } else {
        MIN_SIGMA
    }
}
