//! Geometry utilities: SE3 transforms and factor noise models.

pub mod noise;
pub mod se3;

pub use noise::NoiseModel;
pub use se3::SE3;
