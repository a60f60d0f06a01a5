//! Planar kinematic chain of rotational bones.
//!
//! A [`Chain`] is an ordered list of [`Bone`]s hanging off a fixed root joint,
//! plus the robot [`Body`] that the end effector must stay out of. Each bone
//! stores its angle relative to its predecessor (`rel_angle`) and the absolute
//! angle derived from it by [`Chain::update_positions`].
//!
//! Coordinates are in arm length units with the root at the origin, `x` growing
//! away from the body and `y` growing downward.

use std::f64::consts::{PI, TAU};

use nalgebra::{Point2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        PI
    } else {
        wrapped
    }
}

/// Clamp without panicking on inverted bounds; `min` wins in that case.
pub(crate) fn clamp_between(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

/// A point in arm coordinates.
pub type Point = Point2<f64>;

/// Forbidden zone occupied by the robot body at the chain's root.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Body {
    /// Half-width of the body around the root's vertical axis.
    pub radius: f64,
    /// Body height below the base offset.
    pub height: f64,
    /// Vertical offset of the body's top edge from the root.
    pub base_offset: f64,
}

impl Body {
    pub fn new(radius: f64, height: f64, base_offset: f64) -> Self {
        Self {
            radius,
            height,
            base_offset,
        }
    }

    /// Whether `p` lies inside the body region.
    pub fn contains(&self, p: Point) -> bool {
        p.x.abs() <= self.radius && p.y >= self.base_offset
    }
}

/// One rotational segment of the arm.
#[derive(Clone, Debug, PartialEq)]
pub struct Bone {
    pub length: f64,
    /// Absolute (world frame) angle, recomputed by forward kinematics.
    pub angle: f64,
    /// Angle relative to the previous bone, or to the world for the root bone.
    pub rel_angle: f64,
    pub rel_min: f64,
    pub rel_max: f64,
    pub abs_min: f64,
    pub abs_max: f64,
    /// Bounds on `angle - base.angle`; unused for the base bone itself.
    pub base_min: f64,
    pub base_max: f64,
    /// Position of the bone's distal end, recomputed by forward kinematics.
    pub end: Point,
}

impl Bone {
    /// Unconstrained bone with the given length and relative angle.
    pub fn new(length: f64, rel_angle: f64) -> Self {
        Self {
            length,
            angle: rel_angle,
            rel_angle,
            rel_min: -PI,
            rel_max: PI,
            abs_min: -PI,
            abs_max: PI,
            base_min: -PI,
            base_max: PI,
            end: Point::origin(),
        }
    }

    pub fn with_rel_limits(mut self, min: f64, max: f64) -> Self {
        self.rel_min = min;
        self.rel_max = max;
        self
    }

    pub fn with_abs_limits(mut self, min: f64, max: f64) -> Self {
        self.abs_min = min;
        self.abs_max = max;
        self
    }

    pub fn with_base_limits(mut self, min: f64, max: f64) -> Self {
        self.base_min = min;
        self.base_max = max;
        self
    }

    /// Clamp a candidate relative angle into this bone's relative limits.
    pub fn clamp_rel(&self, angle: f64) -> f64 {
        clamp_between(angle, self.rel_min, self.rel_max)
    }

    /// Clamp a candidate absolute angle into this bone's absolute limits.
    pub fn clamp_abs(&self, angle: f64) -> f64 {
        clamp_between(angle, self.abs_min, self.abs_max)
    }
}

/// Serialized description of one bone, as exchanged with the robot.
///
/// `angle` is absolute; relative angles are derived when building a [`Chain`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneInfo {
    pub len: f64,
    #[serde(default)]
    pub angle: f64,
    #[serde(default = "neg_pi")]
    pub rmin: f64,
    #[serde(default = "pos_pi")]
    pub rmax: f64,
    #[serde(default = "neg_pi")]
    pub amin: f64,
    #[serde(default = "pos_pi")]
    pub amax: f64,
    #[serde(default = "neg_pi")]
    pub bmin: f64,
    #[serde(default = "pos_pi")]
    pub bmax: f64,
}

fn neg_pi() -> f64 {
    -PI
}

fn pos_pi() -> f64 {
    PI
}

/// Serialized arm layout: body geometry plus bones, root first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArmInfo {
    pub radius: f64,
    pub height: f64,
    pub off_y: f64,
    pub bones: Vec<BoneInfo>,
}

impl ArmInfo {
    /// Reject layouts the solver cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bones.is_empty() {
            return Err(ConfigError::Invalid("arm has no bones".to_string()));
        }
        for (i, b) in self.bones.iter().enumerate() {
            if !(b.len > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "bone {} has non-positive length {}",
                    i, b.len
                )));
            }
            for (name, min, max) in [
                ("relative", b.rmin, b.rmax),
                ("absolute", b.amin, b.amax),
                ("base", b.bmin, b.bmax),
            ] {
                if min > max {
                    return Err(ConfigError::Invalid(format!(
                        "bone {} {} limits inverted ({} > {})",
                        i, name, min, max
                    )));
                }
            }
        }
        if self.radius < 0.0 || self.height < 0.0 {
            return Err(ConfigError::Invalid(
                "body radius and height must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ArmInfo {
    /// Two-bone arm on a small body, usable until the robot sends its layout.
    fn default() -> Self {
        Self {
            radius: 40.0,
            height: 60.0,
            off_y: 20.0,
            bones: vec![
                BoneInfo {
                    len: 110.0,
                    angle: -PI / 2.0,
                    rmin: -PI,
                    rmax: 0.0,
                    amin: -PI,
                    amax: PI,
                    bmin: -PI,
                    bmax: PI,
                },
                BoneInfo {
                    len: 90.0,
                    angle: 0.0,
                    rmin: -PI * 0.75,
                    rmax: PI * 0.75,
                    amin: -PI,
                    amax: PI,
                    bmin: -PI,
                    bmax: PI,
                },
            ],
        }
    }
}

/// Ordered chain of bones plus the body obstacle.
#[derive(Clone, Debug, PartialEq)]
pub struct Chain {
    bones: Vec<Bone>,
    body: Body,
}

impl Chain {
    /// Build a chain and run forward kinematics once.
    pub fn new(body: Body, bones: Vec<Bone>) -> Self {
        let mut chain = Self { bones, body };
        chain.update_positions();
        chain
    }

    /// Build a chain from a serialized layout.
    pub fn from_info(info: &ArmInfo) -> Self {
        let mut bones = Vec::with_capacity(info.bones.len());
        let mut prev_angle: Option<f64> = None;
        for b in &info.bones {
            let rel = match prev_angle {
                None => b.angle,
                Some(prev) => wrap_angle(b.angle - prev),
            };
            bones.push(
                Bone::new(b.len, rel)
                    .with_rel_limits(b.rmin, b.rmax)
                    .with_abs_limits(b.amin, b.amax)
                    .with_base_limits(b.bmin, b.bmax),
            );
            prev_angle = Some(b.angle);
        }
        Self::new(
            Body::new(info.radius, info.height, info.off_y),
            bones,
        )
    }

    /// Serialize the current pose and limits.
    pub fn to_info(&self) -> ArmInfo {
        ArmInfo {
            radius: self.body.radius,
            height: self.body.height,
            off_y: self.body.base_offset,
            bones: self
                .bones
                .iter()
                .map(|b| BoneInfo {
                    len: b.length,
                    angle: b.angle,
                    rmin: b.rel_min,
                    rmax: b.rel_max,
                    amin: b.abs_min,
                    amax: b.abs_max,
                    bmin: b.base_min,
                    bmax: b.base_max,
                })
                .collect(),
        }
    }

    /// Recompute every bone's absolute angle and end position from the root.
    pub fn update_positions(&mut self) {
        let mut prev: Option<(f64, Point)> = None;
        for bone in &mut self.bones {
            let (angle, start) = match prev {
                None => (bone.rel_angle, Point::origin()),
                Some((prev_angle, prev_end)) => (wrap_angle(prev_angle + bone.rel_angle), prev_end),
            };
            bone.angle = angle;
            bone.end = start + Rotation2::new(angle) * Vector2::new(bone.length, 0.0);
            prev = Some((angle, bone.end));
        }
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    pub fn bones_mut(&mut self) -> &mut [Bone] {
        &mut self.bones
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// Sum of all bone lengths.
    pub fn total_length(&self) -> f64 {
        self.bones.iter().map(|b| b.length).sum()
    }

    /// Proximal joint position of bone `i` as of the last forward-kinematics pass.
    pub fn joint(&self, i: usize) -> Point {
        if i == 0 {
            Point::origin()
        } else {
            self.bones[i - 1].end
        }
    }

    /// End effector position as of the last forward-kinematics pass.
    pub fn end_effector(&self) -> Point {
        self.bones.last().map(|b| b.end).unwrap_or_else(Point::origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) {
        assert!(
            (a - b).abs() <= 1e-9,
            "expected {:.9}, got {:.9} (|diff|={:.3e})",
            b,
            a,
            (a - b).abs()
        );
    }

    #[test]
    fn test_wrap_angle_range() {
        approx_eq(wrap_angle(0.0), 0.0);
        approx_eq(wrap_angle(PI), PI);
        approx_eq(wrap_angle(-PI), PI);
        approx_eq(wrap_angle(3.0 * PI / 2.0), -PI / 2.0);
        approx_eq(wrap_angle(-3.0 * PI / 2.0), PI / 2.0);
        approx_eq(wrap_angle(7.0 * TAU + 0.25), 0.25);
        approx_eq(wrap_angle(-7.0 * TAU - 0.25), -0.25);
    }

    #[test]
    fn test_wrap_angle_is_additive() {
        let samples = [-17.3, -4.0, -3.0, -1.2, -0.1, 0.0, 0.4, 2.9, 3.3, 6.0, 12.75];
        for &a in &samples {
            for &b in &samples {
                let lhs = wrap_angle(wrap_angle(a) + wrap_angle(b));
                let rhs = wrap_angle(a + b);
                // Compare on the circle so values straddling +-PI still match.
                let diff = wrap_angle(lhs - rhs).abs();
                assert!(diff < 1e-9, "a={} b={} lhs={} rhs={}", a, b, lhs, rhs);
                assert!(lhs > -PI && lhs <= PI);
            }
        }
    }

    #[test]
    fn test_forward_kinematics() {
        let chain = Chain::new(
            Body::default(),
            vec![Bone::new(10.0, PI / 2.0), Bone::new(8.0, -PI / 2.0)],
        );
        let bones = chain.bones();
        approx_eq(bones[0].angle, PI / 2.0);
        approx_eq(bones[1].angle, 0.0);
        approx_eq(bones[0].end.x, 0.0);
        approx_eq(bones[0].end.y, 10.0);
        let end = chain.end_effector();
        approx_eq(end.x, 8.0);
        approx_eq(end.y, 10.0);
        assert_eq!(chain.joint(1), bones[0].end);
    }

    #[test]
    fn test_from_info_derives_relative_angles() {
        let info = ArmInfo {
            radius: 2.0,
            height: 3.0,
            off_y: 1.0,
            bones: vec![
                BoneInfo {
                    len: 5.0,
                    angle: 0.5,
                    rmin: -1.0,
                    rmax: 1.0,
                    amin: -PI,
                    amax: PI,
                    bmin: -PI,
                    bmax: PI,
                },
                BoneInfo {
                    len: 4.0,
                    angle: 1.25,
                    rmin: -PI,
                    rmax: PI,
                    amin: -2.0,
                    amax: 2.0,
                    bmin: -0.5,
                    bmax: 0.9,
                },
            ],
        };
        let chain = Chain::from_info(&info);
        approx_eq(chain.bones()[0].rel_angle, 0.5);
        approx_eq(chain.bones()[1].rel_angle, 0.75);
        approx_eq(chain.bones()[1].angle, 1.25);
        assert_eq!(chain.body().base_offset, 1.0);

        let back = chain.to_info();
        assert_eq!(back.bones.len(), 2);
        approx_eq(back.bones[1].angle, 1.25);
        approx_eq(back.bones[1].bmax, 0.9);
    }

    #[test]
    fn test_bone_info_defaults_to_unconstrained() {
        let info: BoneInfo = serde_json::from_str(r#"{"len": 3.5}"#).unwrap();
        approx_eq(info.rmin, -PI);
        approx_eq(info.amax, PI);
        approx_eq(info.angle, 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_layouts() {
        let mut info = ArmInfo::default();
        assert!(info.validate().is_ok());

        info.bones[0].len = 0.0;
        assert!(info.validate().is_err());

        let mut info = ArmInfo::default();
        info.bones[1].rmin = 1.0;
        info.bones[1].rmax = -1.0;
        assert!(info.validate().is_err());

        let mut info = ArmInfo::default();
        info.bones.clear();
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_body_contains() {
        let body = Body::new(2.0, 5.0, 1.0);
        assert!(body.contains(Point::new(0.0, 1.0)));
        assert!(body.contains(Point::new(-2.0, 4.0)));
        assert!(!body.contains(Point::new(2.5, 4.0)));
        assert!(!body.contains(Point::new(0.0, 0.5)));
    }
}
