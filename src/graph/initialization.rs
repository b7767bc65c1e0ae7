//! Initial estimates for the optimizer.
//!
//! Known values come from the previous solution. New pose nodes are seeded
//! from priors, then chained breadth-first through between factors; nodes
//! still unreachable take the estimate of the nearest earlier pose. New
//! landmarks are placed at their first observation.

use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::geometry::SE3;

use super::factor::FactorKind;
use super::factor_graph::FactorGraph;
use super::solution::Solution;
use super::types::PoseKey;

/// Build the initial values for every variable in `graph`.
pub fn initial_estimate(graph: &FactorGraph, previous: &Solution) -> Solution {
    let mut poses: BTreeMap<PoseKey, SE3> = graph
        .pose_keys()
        .filter_map(|key| previous.pose(key).map(|pose| (key, pose.clone())))
        .collect();

    // Adjacency: key -> (neighbour, transform from key to neighbour)
    let mut edges: HashMap<PoseKey, Vec<(PoseKey, SE3)>> = HashMap::new();
    for factor in graph.factors() {
        match factor.kind() {
            FactorKind::Prior { key, pose, .. } => {
                poses.entry(*key).or_insert_with(|| pose.clone());
            }
            FactorKind::Between {
                from,
                to,
                measurement,
                ..
            } => {
                edges
                    .entry(*from)
                    .or_default()
                    .push((*to, measurement.clone()));
                edges
                    .entry(*to)
                    .or_default()
                    .push((*from, measurement.inverse()));
            }
            FactorKind::LandmarkObservation { .. } => {}
        }
    }

    let by_time = graph.poses_by_time();
    let mut queue: VecDeque<PoseKey> = poses.keys().copied().collect();
    loop {
        propagate(&mut poses, &edges, &mut queue);

        // Seed the earliest unreached node from its nearest earlier estimate
        let Some(pos) = by_time.iter().position(|(key, _)| !poses.contains_key(key)) else {
            break;
        };
        let seed = by_time[..pos]
            .iter()
            .rev()
            .find_map(|(key, _)| poses.get(key).cloned())
            .unwrap_or_else(SE3::identity);
        let key = by_time[pos].0;
        poses.insert(key, seed);
        queue.push_back(key);
    }

    let mut solution = Solution::new();
    for (key, pose) in poses {
        solution.insert_pose(key, pose);
    }

    for factor in graph.factors() {
        if let FactorKind::LandmarkObservation {
            pose,
            landmark,
            point,
            ..
        } = factor.kind()
        {
            if solution.landmark(*landmark).is_some() {
                continue;
            }
            let position = previous.landmark(*landmark).copied().or_else(|| {
                solution
                    .pose(*pose)
                    .map(|pose_estimate| pose_estimate.transform_point(point))
            });
            if let Some(position) = position {
                solution.insert_landmark(*landmark, position);
            }
        }
    }

    solution
}

fn propagate(
    poses: &mut BTreeMap<PoseKey, SE3>,
    edges: &HashMap<PoseKey, Vec<(PoseKey, SE3)>>,
    queue: &mut VecDeque<PoseKey>,
) {
    while let Some(key) = queue.pop_front() {
        let Some(origin) = poses.get(&key).cloned() else {
            continue;
        };
        for (neighbour, relative) in edges.get(&key).into_iter().flatten() {
            if !poses.contains_key(neighbour) {
                poses.insert(*neighbour, origin.compose(relative));
                queue.push_back(*neighbour);
            }
        }
    }
}
