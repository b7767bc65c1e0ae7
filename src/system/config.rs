//! Coordinator configuration.
//!
//! Every field has a default, so a YAML file only needs the values it
//! changes:
//!
//! ```yaml
//! node_tolerance_ms: 20
//! commit_policy:
//!   type: windowed
//!   window_ms: 250
//!   max_hold_cycles: 5
//! initial_pose: { x: 0.0, y: 0.0, z: 0.0, qw: 1.0, qx: 0.0, qy: 0.0, qz: 0.0 }
//! ```

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::geometry::{NoiseModel, SE3};
use crate::optimizer::OptimizerConfig;

/// When pending factors become visible to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommitPolicyConfig {
    /// Commit everything pending once per cycle.
    #[default]
    EveryCycle,
    /// Wake the coordinator on each submission and commit immediately.
    Suppressed,
    /// Hold factors until their pose nodes are older than `window_ms`,
    /// but never longer than `max_hold_cycles` cycles.
    Windowed { window_ms: u64, max_hold_cycles: u32 },
}

/// Pose of the first node (translation + w-first quaternion).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitialPoseConfig {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
}

impl Default for InitialPoseConfig {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            qw: 1.0,
            qx: 0.0,
            qy: 0.0,
            qz: 0.0,
        }
    }
}

impl InitialPoseConfig {
    pub fn to_se3(&self) -> SE3 {
        SE3::from_quaternion(
            self.qw,
            self.qx,
            self.qy,
            self.qz,
            Vector3::new(self.x, self.y, self.z),
        )
    }
}

/// Sigmas of the initial pose prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorNoiseConfig {
    pub translation_sigma: f64,
    pub rotation_sigma: f64,
}

impl Default for PriorNoiseConfig {
    fn default() -> Self {
        Self {
            translation_sigma: 1e-3,
            rotation_sigma: 1e-3,
        }
    }
}

impl PriorNoiseConfig {
    pub fn to_noise_model(&self) -> NoiseModel {
        NoiseModel::isotropic(self.translation_sigma, self.rotation_sigma)
    }
}

/// Configuration for the [`super::Coordinator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Requests closer than this to an existing node reuse it.
    pub node_tolerance_ms: u64,

    /// Coordinator cadence.
    pub cycle_period_ms: u64,

    pub commit_policy: CommitPolicyConfig,

    /// Prior placed on the first node; none leaves the graph unanchored.
    pub initial_pose: Option<InitialPoseConfig>,

    pub prior_noise: PriorNoiseConfig,

    pub optimizer: OptimizerConfig,

    /// Log per-cycle detail at info level.
    pub debug: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            node_tolerance_ms: 10,
            cycle_period_ms: 100,
            commit_policy: CommitPolicyConfig::default(),
            initial_pose: Some(InitialPoseConfig::default()),
            prior_noise: PriorNoiseConfig::default(),
            optimizer: OptimizerConfig::default(),
            debug: false,
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let config: Self = serde_yaml::from_reader(file)
            .with_context(|| format!("Failed to parse coordinator config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("Failed to parse coordinator config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle_period_ms == 0 {
            bail!("cycle_period_ms must be positive");
        }
        if self.optimizer.max_iterations == 0 {
            bail!("optimizer.max_iterations must be positive");
        }
        if let CommitPolicyConfig::Windowed {
            max_hold_cycles, ..
        } = self.commit_policy
        {
            if max_hold_cycles == 0 {
                bail!("commit_policy.max_hold_cycles must be positive");
            }
        }
        Ok(())
    }

    pub fn node_tolerance(&self) -> Duration {
        Duration::from_millis(self.node_tolerance_ms)
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_millis(self.cycle_period_ms)
    }
}
