//! Cyclic coordinate descent IK solver with joint limits and body avoidance.
//!
//! Each [`IkSolver::solve`] call performs one sweep from the end effector back
//! to the root and reports whether the target was reached, whether the chain
//! moved, or whether it is stuck. Callers own the iteration bound; see
//! [`IkSolver::solve_bounded`] for the usual loop.

use std::f64::consts::TAU;

use nalgebra::{distance_squared, Rotation2};
use serde::{Deserialize, Serialize};

use crate::chain::{clamp_between, wrap_angle, Body, Chain, Point};

/// Tuning constants for the solver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Sweeps per user input in [`IkSolver::solve_bounded`].
    pub max_iterations: u32,
    /// Squared end-effector distance at which the target counts as reached.
    pub reach_tolerance_sq: f64,
    /// Targets with `x` below this are snapped to the root.
    pub root_snap: f64,
    /// Vector magnitude product below which no rotation is attempted.
    pub degenerate_magnitude: f64,
    /// Minimum arc length for a rotation to count as movement.
    pub motion_epsilon: f64,
    /// Base rotation per step while backing out of the body.
    pub collision_step: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            reach_tolerance_sq: 10.0,
            root_snap: 5.0,
            degenerate_magnitude: 1e-4,
            motion_epsilon: 1e-6,
            collision_step: 0.01,
        }
    }
}

/// Result of a single solver sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveStatus {
    /// End effector is within tolerance of the target.
    Reached,
    /// Not reached yet, but at least one bone moved meaningfully.
    Progressed,
    /// No bone could move; further sweeps will not help.
    Stuck,
}

/// Result of a bounded solve loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SolveOutcome {
    /// Status of the last sweep.
    pub status: SolveStatus,
    /// Number of sweeps performed.
    pub iterations: u32,
}

/// Stateless CCD solver.
#[derive(Clone, Debug, Default)]
pub struct IkSolver {
    config: SolverConfig,
}

impl IkSolver {
    pub const fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SolverConfig::default())
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Move a target out of unreachable regions around the body and root.
    pub fn clamp_target(&self, body: &Body, target: Point) -> Point {
        let mut t = target;
        if t.x < body.radius {
            if t.y > body.base_offset {
                t.y = body.base_offset;
            }
        } else if t.y > body.base_offset + body.height {
            t.y = body.base_offset + body.height;
        }

        if t.x < self.config.root_snap {
            t = Point::origin();
        }
        t
    }

    /// Run one CCD sweep toward `target`.
    pub fn solve(&self, chain: &mut Chain, target: Point) -> SolveStatus {
        if chain.is_empty() {
            return SolveStatus::Stuck;
        }

        chain.update_positions();
        let target = self.clamp_target(chain.body(), target);

        let mut end = chain.end_effector();
        if distance_squared(&end, &target) <= self.config.reach_tolerance_sq {
            self.fix_body_collision(chain);
            return SolveStatus::Reached;
        }

        let mut moved = false;
        for i in (0..chain.len()).rev() {
            let joint = chain.joint(i);

            let to_end = end - joint;
            let to_target = target - joint;
            let to_end_mag = to_end.norm();

            let mag = to_end_mag * to_target.norm();
            let (cos, sin) = if mag <= self.config.degenerate_magnitude {
                (1.0, 0.0)
            } else {
                (to_end.dot(&to_target) / mag, to_end.perp(&to_target) / mag)
            };

            // Cosine may drift outside [-1, 1] from rounding.
            let mut requested = cos.clamp(-1.0, 1.0).acos();
            if sin < 0.0 {
                requested = -requested;
            }

            let applied = rotate_arm(chain, i, requested);
            end = joint + Rotation2::new(applied) * to_end;

            if distance_squared(&end, &target) <= self.config.reach_tolerance_sq {
                self.fix_body_collision(chain);
                return SolveStatus::Reached;
            }

            if !moved && applied.abs() * to_end_mag > self.config.motion_epsilon {
                moved = true;
            }
        }

        self.fix_body_collision(chain);

        if moved {
            SolveStatus::Progressed
        } else {
            SolveStatus::Stuck
        }
    }

    /// Sweep until the target is reached, the chain is stuck, or the
    /// iteration bound runs out, then refresh forward kinematics.
    pub fn solve_bounded(&self, chain: &mut Chain, target: Point) -> SolveOutcome {
        let mut outcome = SolveOutcome {
            status: SolveStatus::Stuck,
            iterations: 0,
        };
        for _ in 0..self.config.max_iterations {
            outcome.status = self.solve(chain, target);
            outcome.iterations += 1;
            if outcome.status != SolveStatus::Progressed {
                break;
            }
        }
        chain.update_positions();

        if outcome.status == SolveStatus::Stuck {
            tracing::debug!(
                "IK stuck after {} sweeps toward ({:.1}, {:.1})",
                outcome.iterations,
                target.x,
                target.y
            );
        }
        outcome
    }

    /// Rotate the base bone away from the body until the end effector is clear.
    ///
    /// Best effort: stops as soon as the next step would leave the base bone's
    /// relative limits. Returns whether the end effector ended up outside the body.
    pub fn fix_body_collision(&self, chain: &mut Chain) -> bool {
        if chain.is_empty() {
            return true;
        }

        {
            let base = &mut chain.bones_mut()[0];
            base.rel_angle = base.clamp_rel(base.rel_angle);
        }
        chain.update_positions();

        let step = self.config.collision_step;
        if step.is_nan() || step <= 0.0 {
            return !chain.body().contains(chain.end_effector());
        }

        // One full revolution is enough to visit every base angle.
        let max_steps = (TAU / step).ceil() as usize + 1;
        for _ in 0..max_steps {
            if !chain.body().contains(chain.end_effector()) {
                return true;
            }
            let base = &mut chain.bones_mut()[0];
            let next = wrap_angle(base.rel_angle - step);
            if next > base.rel_max || next < base.rel_min {
                return false;
            }
            base.rel_angle = next;
            chain.update_positions();
        }
        !chain.body().contains(chain.end_effector())
    }
}

/// Rotate bone `idx` by `requested` radians within its limits.
///
/// The relative limits are applied first, then the absolute limits of bone
/// `idx` (which may shrink the rotation further). Every bone past `idx` turns
/// with it, so the rotation is also shrunk until none of them leaves its
/// absolute limits. Bones past the base that violate their base-relative
/// limits shift the base bone's absolute angle.
///
/// Returns the rotation that was actually applied; an out of range `idx`
/// applies nothing.
pub fn rotate_arm(chain: &mut Chain, idx: usize, requested: f64) -> f64 {
    if idx >= chain.len() {
        return 0.0;
    }
    let bones = chain.bones_mut();

    let mut angles = Vec::with_capacity(bones.len());
    let mut prev_angle = 0.0;
    for bone in bones.iter() {
        prev_angle = wrap_angle(prev_angle + bone.rel_angle);
        angles.push(prev_angle);
    }
    let parent = if idx == 0 { 0.0 } else { angles[idx - 1] };

    let original = bones[idx].rel_angle;
    let mut new_rel = bones[idx].clamp_rel(wrap_angle(original + requested));

    let angle = wrap_angle(parent + new_rel);
    let clamped = bones[idx].clamp_abs(angle);
    if clamped != angle {
        new_rel = wrap_angle(clamped - parent);
    }
    // Relative limits win if the absolute correction pushed past them.
    new_rel = bones[idx].clamp_rel(new_rel);

    // A full-turn range never binds, since angles wrap.
    let mut delta = new_rel - original;
    for (bone, &angle) in bones.iter().zip(angles.iter()).skip(idx + 1) {
        if bone.abs_max - bone.abs_min >= TAU {
            continue;
        }
        let lo = (bone.abs_min - angle).min(0.0);
        let hi = (bone.abs_max - angle).max(0.0);
        delta = clamp_between(delta, lo, hi);
    }
    new_rel = original + delta;

    prev_angle = 0.0;
    for i in 0..bones.len() {
        let rel = if i == idx { new_rel } else { bones[i].rel_angle };
        let angle = wrap_angle(prev_angle + rel);

        if i > 0 {
            let diff = angle - bones[0].angle;
            if diff < bones[i].base_min {
                bones[0].angle = wrap_angle(angle - bones[i].base_min);
            } else if diff > bones[i].base_max {
                bones[0].angle = wrap_angle(angle - bones[i].base_max);
            }
        }

        prev_angle = angle;
    }

    bones[idx].rel_angle = new_rel;
    wrap_angle(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Bone;
    use std::f64::consts::PI;

    fn two_bone(rel0: f64, rel1: f64) -> Chain {
        Chain::new(
            Body::default(),
            vec![Bone::new(10.0, rel0), Bone::new(8.0, rel1)],
        )
    }

    #[test]
    fn test_two_bone_reaches_target() {
        let mut chain = two_bone(1.0, 0.5);
        let solver = IkSolver::with_defaults();
        let target = Point::new(15.0, 0.0);

        let outcome = solver.solve_bounded(&mut chain, target);
        assert_eq!(outcome.status, SolveStatus::Reached);
        assert!(outcome.iterations <= 10);
        assert!(distance_squared(&chain.end_effector(), &target) <= 10.0 + 1e-9);
    }

    #[test]
    fn test_solve_is_idempotent_once_reached() {
        let mut chain = two_bone(-0.8, 1.2);
        let solver = IkSolver::with_defaults();
        let target = Point::new(12.0, -6.0);

        let outcome = solver.solve_bounded(&mut chain, target);
        assert_eq!(outcome.status, SolveStatus::Reached);

        let before: Vec<f64> = chain.bones().iter().map(|b| b.rel_angle).collect();
        assert_eq!(solver.solve(&mut chain, target), SolveStatus::Reached);
        let after: Vec<f64> = chain.bones().iter().map(|b| b.rel_angle).collect();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-9, "bone moved from {} to {}", a, b);
        }
    }

    #[test]
    fn test_straight_arm_toward_unreachable_target_is_stuck() {
        let mut chain = two_bone(0.0, 0.0);
        let solver = IkSolver::with_defaults();
        assert_eq!(
            solver.solve(&mut chain, Point::new(100.0, 0.0)),
            SolveStatus::Stuck
        );
    }

    #[test]
    fn test_empty_chain_is_stuck() {
        let mut chain = Chain::new(Body::default(), Vec::new());
        let solver = IkSolver::with_defaults();
        let outcome = solver.solve_bounded(&mut chain, Point::new(10.0, 0.0));
        assert_eq!(outcome.status, SolveStatus::Stuck);
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn test_clamp_target() {
        let solver = IkSolver::with_defaults();
        let body = Body::new(20.0, 30.0, 5.0);

        // Above the body top is left alone.
        assert_eq!(
            solver.clamp_target(&body, Point::new(10.0, -4.0)),
            Point::new(10.0, -4.0)
        );
        // Inside the body column: pushed up to the base offset.
        assert_eq!(
            solver.clamp_target(&body, Point::new(10.0, 12.0)),
            Point::new(10.0, 5.0)
        );
        // Beside the body: pushed up to the bottom of the body.
        assert_eq!(
            solver.clamp_target(&body, Point::new(50.0, 80.0)),
            Point::new(50.0, 35.0)
        );
        // Close to the root: snapped to the root.
        assert_eq!(
            solver.clamp_target(&Body::default(), Point::new(3.0, -7.0)),
            Point::origin()
        );
    }

    #[test]
    fn test_rotate_arm_respects_relative_limits() {
        let mut chain = Chain::new(
            Body::default(),
            vec![
                Bone::new(10.0, 0.0),
                Bone::new(8.0, 0.2).with_rel_limits(-0.5, 0.5),
            ],
        );

        let applied = rotate_arm(&mut chain, 1, 1.0);
        assert!((applied - 0.3).abs() < 1e-9);
        assert!((chain.bones()[1].rel_angle - 0.5).abs() < 1e-9);

        let applied = rotate_arm(&mut chain, 1, -3.0);
        assert!((applied + 1.0).abs() < 1e-9);
        assert!((chain.bones()[1].rel_angle + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rotate_arm_respects_absolute_limits() {
        let mut chain = Chain::new(
            Body::default(),
            vec![
                Bone::new(10.0, 0.6),
                Bone::new(8.0, 0.0).with_abs_limits(-1.0, 1.0),
            ],
        );

        // Relative limits would allow 0.9, absolute caps the bone at 1.0 rad.
        let applied = rotate_arm(&mut chain, 1, 0.9);
        assert!((applied - 0.4).abs() < 1e-9);
        chain.update_positions();
        let bone = &chain.bones()[1];
        assert!(bone.rel_angle >= bone.rel_min && bone.rel_angle <= bone.rel_max);
        assert!(bone.angle >= bone.abs_min - 1e-9 && bone.angle <= bone.abs_max + 1e-9);
    }

    #[test]
    fn test_rotate_arm_limits_hold_for_many_requests() {
        let requests = [-4.0, -2.5, -1.0, -0.3, 0.0, 0.2, 0.7, 1.9, 3.1, 5.0];
        for &req in &requests {
            for idx in 0..3 {
                let mut chain = Chain::new(
                    Body::default(),
                    vec![
                        Bone::new(10.0, -0.4)
                            .with_rel_limits(-1.5, 0.5)
                            .with_abs_limits(-1.5, 0.5),
                        Bone::new(8.0, 0.3)
                            .with_rel_limits(-1.0, 1.2)
                            .with_abs_limits(-1.4, 0.8),
                        Bone::new(5.0, -0.2)
                            .with_rel_limits(-0.8, 0.8)
                            .with_abs_limits(-2.0, 1.5),
                    ],
                );
                rotate_arm(&mut chain, idx, req);
                chain.update_positions();
                for (k, bone) in chain.bones().iter().enumerate() {
                    assert!(
                        bone.rel_angle >= bone.rel_min && bone.rel_angle <= bone.rel_max,
                        "bone {} rel {} out of range for idx={} req={}",
                        k,
                        bone.rel_angle,
                        idx,
                        req
                    );
                    assert!(
                        bone.angle >= bone.abs_min - 1e-9 && bone.angle <= bone.abs_max + 1e-9,
                        "bone {} abs {} out of range for idx={} req={}",
                        k,
                        bone.angle,
                        idx,
                        req
                    );
                }
            }
        }
    }

    #[test]
    fn test_rotate_arm_keeps_children_within_absolute_limits() {
        let mut chain = Chain::new(
            Body::default(),
            vec![
                Bone::new(10.0, 0.0),
                Bone::new(8.0, 0.0).with_abs_limits(-0.5, 0.5),
            ],
        );

        // The child would swing to 1.0 rad; the parent stops at 0.5 instead.
        let applied = rotate_arm(&mut chain, 0, 1.0);
        assert!((applied - 0.5).abs() < 1e-9);
        chain.update_positions();
        assert!((chain.bones()[0].rel_angle - 0.5).abs() < 1e-9);
        assert!((chain.bones()[1].angle - 0.5).abs() < 1e-9);

        // Rotating back is unrestricted down to the child's lower limit.
        let applied = rotate_arm(&mut chain, 0, -0.8);
        assert!((applied + 0.8).abs() < 1e-9);
        chain.update_positions();
        assert!((chain.bones()[1].angle + 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_rotate_arm_out_of_range_index() {
        let mut chain = two_bone(0.2, 0.1);
        let before = chain.clone();
        assert_eq!(rotate_arm(&mut chain, 2, 1.0), 0.0);
        assert_eq!(chain, before);
    }

    #[test]
    fn test_base_limits_shift_base_angle() {
        let mut chain = Chain::new(
            Body::default(),
            vec![
                Bone::new(10.0, 0.0),
                Bone::new(8.0, 0.0).with_base_limits(-0.25, 0.25),
            ],
        );
        rotate_arm(&mut chain, 1, 0.75);
        // Bone 1 keeps its requested rotation; the base absolute angle follows.
        assert!((chain.bones()[1].rel_angle - 0.75).abs() < 1e-9);
        assert!((chain.bones()[0].angle - 0.5).abs() < 1e-9);
        assert!((chain.bones()[0].rel_angle - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_fix_body_collision_backs_out() {
        let mut chain = Chain::new(
            Body::new(5.0, 10.0, 2.0),
            vec![Bone::new(6.0, PI / 2.0)],
        );
        assert!(chain.body().contains(chain.end_effector()));

        let solver = IkSolver::with_defaults();
        assert!(solver.fix_body_collision(&mut chain));
        assert!(!chain.body().contains(chain.end_effector()));
        let rel = chain.bones()[0].rel_angle;
        assert!(rel < PI / 2.0 && rel > 0.5, "rel = {}", rel);
    }

    #[test]
    fn test_fix_body_collision_without_step_leaves_pose() {
        let mut chain = Chain::new(
            Body::new(5.0, 10.0, 2.0),
            vec![Bone::new(6.0, PI / 2.0)],
        );
        for step in [0.0, -0.01, f64::NAN] {
            let solver = IkSolver::new(SolverConfig {
                collision_step: step,
                ..SolverConfig::default()
            });
            assert!(!solver.fix_body_collision(&mut chain));
            assert!((chain.bones()[0].rel_angle - PI / 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_fix_body_collision_stops_at_limit() {
        let mut chain = Chain::new(
            Body::new(5.0, 10.0, 2.0),
            vec![Bone::new(6.0, PI / 2.0).with_rel_limits(1.0, 2.0)],
        );
        let solver = IkSolver::with_defaults();
        assert!(!solver.fix_body_collision(&mut chain));
        // Pose is left colliding at the last legal angle.
        assert!(chain.body().contains(chain.end_effector()));
        assert!(chain.bones()[0].rel_angle >= 1.0);
    }
}
