//! Levenberg-Marquardt pose graph optimization.
//!
//! Uses the three-phase pattern:
//! 1. COLLECT: lay out free variables and their initial parameters
//! 2. SOLVE: damped normal equations with numerical Jacobians
//! 3. APPLY: convert parameters back into a [`Solution`]
//!
//! Poses are parameterized by their decoupled log (rotation vector +
//! translation). Without any prior the earliest pose is held fixed to remove
//! the gauge freedom.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::debug;

use crate::error::OptimizerError;
use crate::geometry::SE3;
use crate::graph::{Factor, FactorGraph, FactorKind, LandmarkKey, NodeKey, PoseKey, Solution};

use super::{Optimizer, OptimizerConfig};

/// Step for central-difference Jacobians.
const JACOBIAN_EPS: f64 = 1e-6;

/// Dense Levenberg-Marquardt backend.
#[derive(Debug, Clone, Default)]
pub struct LevenbergMarquardt {
    config: OptimizerConfig,
}

impl LevenbergMarquardt {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

impl Optimizer for LevenbergMarquardt {
    fn name(&self) -> &str {
        "levenberg_marquardt"
    }

    fn optimize(
        &mut self,
        graph: &FactorGraph,
        initial: &Solution,
    ) -> Result<Solution, OptimizerError> {
        let problem = Problem::collect(graph, initial)?;
        let summary = problem.solve(&self.config)?;
        debug!(
            "LM: {} params, {} iterations, error {:.6} -> {:.6}",
            summary.params.len(),
            summary.iterations,
            summary.initial_error.sqrt(),
            summary.final_error.sqrt()
        );
        Ok(problem.apply(&summary.params))
    }
}

/// Result of the SOLVE phase.
struct SolveSummary {
    params: DVector<f64>,
    iterations: usize,
    initial_error: f64,
    final_error: f64,
}

/// Variable layout and data extracted from the graph.
struct Problem<'a> {
    factors: Vec<&'a Factor>,

    /// Column offset of each free variable.
    offsets: HashMap<NodeKey, usize>,

    /// Held-fixed pose (gauge anchor), if any.
    fixed: Option<(PoseKey, SE3)>,

    initial: DVector<f64>,
}

impl<'a> Problem<'a> {
    /// PHASE 1: Collect free variables and initial parameters.
    fn collect(graph: &'a FactorGraph, initial: &Solution) -> Result<Self, OptimizerError> {
        if graph.is_empty() {
            return Err(OptimizerError::EmptyGraph);
        }

        for factor in graph.factors() {
            for key in factor.keys() {
                let known = match key {
                    NodeKey::Pose(k) => initial.pose(k).is_some(),
                    NodeKey::Landmark(k) => initial.landmark(k).is_some(),
                };
                if !known {
                    return Err(OptimizerError::UnknownNode(key));
                }
            }
        }

        let has_prior = graph
            .factors()
            .iter()
            .any(|f| matches!(f.kind(), FactorKind::Prior { .. }));

        let fixed = if has_prior {
            None
        } else {
            graph
                .poses_by_time()
                .first()
                .and_then(|(key, _)| initial.pose(*key).map(|pose| (*key, pose.clone())))
        };
        let fixed_key = fixed.as_ref().map(|(key, _)| *key);

        let mut offsets = HashMap::new();
        let mut values: Vec<f64> = Vec::new();
        for key in graph.pose_keys() {
            if Some(key) == fixed_key {
                continue;
            }
            if let Some(pose) = initial.pose(key) {
                offsets.insert(NodeKey::Pose(key), values.len());
                values.extend_from_slice(&pose.log());
            }
        }
        for key in graph.landmark_keys() {
            if let Some(position) = initial.landmark(key) {
                offsets.insert(NodeKey::Landmark(key), values.len());
                values.extend(position.iter().copied());
            }
        }

        Ok(Self {
            factors: graph.factors().iter().map(|f| f.as_ref()).collect(),
            offsets,
            fixed,
            initial: DVector::from_vec(values),
        })
    }

    /// PHASE 2: Solve with Levenberg-Marquardt.
    fn solve(&self, config: &OptimizerConfig) -> Result<SolveSummary, OptimizerError> {
        let n_params = self.initial.len();
        let initial_error = self.total_error(&self.initial);
        if !initial_error.is_finite() {
            return Err(OptimizerError::Diverged {
                error: initial_error,
            });
        }

        let mut current_params = self.initial.clone();
        let mut current_error = initial_error;
        let mut iterations = 0;

        if n_params == 0 {
            return Ok(SolveSummary {
                params: current_params,
                iterations,
                initial_error,
                final_error: current_error,
            });
        }

        let mut lambda = 1e-3;
        let lambda_up = 10.0;
        let lambda_down = 0.1;
        let min_lambda = 1e-10;
        let max_lambda = 1e10;

        for iter in 0..config.max_iterations {
            iterations = iter + 1;

            let (jtj, gradient) = self.normal_equations(&current_params);

            if gradient.norm() < config.gradient_tolerance {
                break;
            }

            // Damped system
            let mut damped_jtj = jtj;
            for i in 0..n_params {
                damped_jtj[(i, i)] += lambda * damped_jtj[(i, i)].max(1e-6);
            }

            let delta = match damped_jtj.lu().solve(&(-&gradient)) {
                Some(d) if d.iter().all(|v| v.is_finite()) => d,
                _ if iter == 0 => return Err(OptimizerError::Singular),
                _ => break,
            };

            if delta.norm() < config.param_tolerance * (current_params.norm() + config.param_tolerance)
            {
                break;
            }

            // Trial step
            let trial_params = &current_params + &delta;
            let trial_error = self.total_error(&trial_params);

            if trial_error < current_error {
                current_params = trial_params;
                current_error = trial_error;
                lambda = (lambda * lambda_down).max(min_lambda);
            } else {
                lambda = (lambda * lambda_up).min(max_lambda);
            }
        }

        if !current_error.is_finite() {
            return Err(OptimizerError::Diverged {
                error: current_error,
            });
        }

        Ok(SolveSummary {
            params: current_params,
            iterations,
            initial_error,
            final_error: current_error,
        })
    }

    /// PHASE 3: Convert parameters into a solution.
    fn apply(&self, params: &DVector<f64>) -> Solution {
        let mut solution = Solution::new();
        if let Some((key, pose)) = &self.fixed {
            solution.insert_pose(*key, pose.clone());
        }
        for (key, offset) in &self.offsets {
            match key {
                NodeKey::Pose(k) => solution.insert_pose(*k, pose_at(params, *offset)),
                NodeKey::Landmark(k) => solution.insert_landmark(*k, landmark_at(params, *offset)),
            }
        }
        solution
    }

    fn pose(&self, params: &DVector<f64>, key: PoseKey) -> SE3 {
        match self.offsets.get(&NodeKey::Pose(key)) {
            Some(offset) => pose_at(params, *offset),
            None => self
                .fixed
                .as_ref()
                .map(|(_, pose)| pose.clone())
                .unwrap_or_else(SE3::identity),
        }
    }

    fn landmark(&self, params: &DVector<f64>, key: LandmarkKey) -> Vector3<f64> {
        self.offsets
            .get(&NodeKey::Landmark(key))
            .map(|offset| landmark_at(params, *offset))
            .unwrap_or_else(Vector3::zeros)
    }

    /// Whitened residual of one factor.
    fn residual(&self, factor: &Factor, params: &DVector<f64>) -> Vec<f64> {
        match factor.kind() {
            FactorKind::Prior { key, pose, noise } => {
                let error = pose.between(&self.pose(params, *key)).log();
                weight(&error, &noise.sqrt_information())
            }
            FactorKind::Between {
                from,
                to,
                measurement,
                noise,
            } => {
                let predicted = self.pose(params, *from).between(&self.pose(params, *to));
                let error = measurement.between(&predicted).log();
                weight(&error, &noise.sqrt_information())
            }
            FactorKind::LandmarkObservation {
                pose,
                landmark,
                point,
                sigma,
            } => {
                let predicted = self
                    .pose(params, *pose)
                    .inverse()
                    .transform_point(&self.landmark(params, *landmark));
                (predicted - point).iter().map(|e| e / sigma).collect()
            }
        }
    }

    fn total_error(&self, params: &DVector<f64>) -> f64 {
        self.factors
            .iter()
            .map(|f| self.residual(f, params).iter().map(|r| r * r).sum::<f64>())
            .sum()
    }

    /// Accumulate J^T J and J^T r factor by factor.
    fn normal_equations(&self, params: &DVector<f64>) -> (DMatrix<f64>, DVector<f64>) {
        let n_params = params.len();
        let mut jtj = DMatrix::zeros(n_params, n_params);
        let mut gradient = DVector::zeros(n_params);
        let mut work = params.clone();

        for factor in &self.factors {
            let residual = self.residual(factor, params);
            let columns: Vec<usize> = factor
                .keys()
                .into_iter()
                .filter_map(|key| {
                    let offset = *self.offsets.get(&key)?;
                    let dim = match key {
                        NodeKey::Pose(_) => 6,
                        NodeKey::Landmark(_) => 3,
                    };
                    Some(offset..offset + dim)
                })
                .flatten()
                .collect();

            // Numerical Jacobian, one column per free parameter
            let mut jacobian = DMatrix::zeros(residual.len(), columns.len());
            for (c, &col) in columns.iter().enumerate() {
                let original = work[col];
                work[col] = original + JACOBIAN_EPS;
                let plus = self.residual(factor, &work);
                work[col] = original - JACOBIAN_EPS;
                let minus = self.residual(factor, &work);
                work[col] = original;

                for r in 0..residual.len() {
                    jacobian[(r, c)] = (plus[r] - minus[r]) / (2.0 * JACOBIAN_EPS);
                }
            }

            for (a, &col_a) in columns.iter().enumerate() {
                for r in 0..residual.len() {
                    gradient[col_a] += jacobian[(r, a)] * residual[r];
                }
                for (b, &col_b) in columns.iter().enumerate() {
                    let mut sum = 0.0;
                    for r in 0..residual.len() {
                        sum += jacobian[(r, a)] * jacobian[(r, b)];
                    }
                    jtj[(col_a, col_b)] += sum;
                }
            }
        }

        (jtj, gradient)
    }
}

fn pose_at(params: &DVector<f64>, offset: usize) -> SE3 {
    let mut tangent = [0.0; 6];
    for (i, value) in tangent.iter_mut().enumerate() {
        *value = params[offset + i];
    }
    SE3::exp(&tangent)
}

fn landmark_at(params: &DVector<f64>, offset: usize) -> Vector3<f64> {
    Vector3::new(params[offset], params[offset + 1], params[offset + 2])
}

fn weight(error: &[f64; 6], sqrt_information: &[f64; 6]) -> Vec<f64> {
    error
        .iter()
        .zip(sqrt_information)
        .map(|(e, w)| e * w)
        .collect()
}
