//! Body-part position model.
//!
//! A [`PositionTree`] maps every [`BodyPart`] to the angles of its axes, in
//! degrees.  Each `(part, axis)` pair is a [`Joint`] with a fixed
//! [`AxisRange`]; a `Joint` can only be constructed for an axis the part
//! actually has, so a tree can never hold a stray field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::LinkError;

/// A controllable segment of the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyPart {
    Head,
    LeftArm,
    RightArm,
    Torso,
    LeftHand,
    RightHand,
}

/// Left or right limb selector for the arm and hand helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl BodyPart {
    pub const ALL: [BodyPart; 6] = [
        BodyPart::Head,
        BodyPart::LeftArm,
        BodyPart::RightArm,
        BodyPart::Torso,
        BodyPart::LeftHand,
        BodyPart::RightHand,
    ];

    /// Wire name used by the robot API (`"leftArm"`, `"head"`, …).
    pub fn name(self) -> &'static str {
        match self {
            BodyPart::Head => "head",
            BodyPart::LeftArm => "leftArm",
            BodyPart::RightArm => "rightArm",
            BodyPart::Torso => "torso",
            BodyPart::LeftHand => "leftHand",
            BodyPart::RightHand => "rightHand",
        }
    }

    /// Parse a wire name.  Returns `None` for parts this client does not track.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    pub fn arm(side: Side) -> Self {
        match side {
            Side::Left => BodyPart::LeftArm,
            Side::Right => BodyPart::RightArm,
        }
    }

    pub fn hand(side: Side) -> Self {
        match side {
            Side::Left => BodyPart::LeftHand,
            Side::Right => BodyPart::RightHand,
        }
    }

    /// The axes this part exposes, in display order.
    pub fn axes(self) -> &'static [Axis] {
        match self {
            BodyPart::Head => &[Axis::X, Axis::Y, Axis::Z],
            BodyPart::LeftArm | BodyPart::RightArm => &[Axis::Shoulder, Axis::Elbow, Axis::Wrist],
            BodyPart::Torso => &[Axis::Rotation, Axis::Tilt],
            BodyPart::LeftHand | BodyPart::RightHand => &Axis::FINGERS,
        }
    }
}

impl fmt::Display for BodyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single degree of freedom on a body part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Axis {
    X,
    Y,
    Z,
    Shoulder,
    Elbow,
    Wrist,
    Rotation,
    Tilt,
    Thumb,
    Index,
    Middle,
    Ring,
    Pinky,
}

impl Axis {
    pub const FINGERS: [Axis; 5] = [
        Axis::Thumb,
        Axis::Index,
        Axis::Middle,
        Axis::Ring,
        Axis::Pinky,
    ];

    const ALL: [Axis; 13] = [
        Axis::X,
        Axis::Y,
        Axis::Z,
        Axis::Shoulder,
        Axis::Elbow,
        Axis::Wrist,
        Axis::Rotation,
        Axis::Tilt,
        Axis::Thumb,
        Axis::Index,
        Axis::Middle,
        Axis::Ring,
        Axis::Pinky,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
            Axis::Shoulder => "shoulder",
            Axis::Elbow => "elbow",
            Axis::Wrist => "wrist",
            Axis::Rotation => "rotation",
            Axis::Tilt => "tilt",
            Axis::Thumb => "thumb",
            Axis::Index => "index",
            Axis::Middle => "middle",
            Axis::Ring => "ring",
            Axis::Pinky => "pinky",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Inclusive `[min, max]` range, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl AxisRange {
    const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// A `(part, axis)` pair that is known to exist on the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Joint {
    part: BodyPart,
    axis: Axis,
}

impl Joint {
    /// Build a joint, or `None` when `part` has no such `axis`.
    pub fn new(part: BodyPart, axis: Axis) -> Option<Self> {
        part.axes().contains(&axis).then_some(Self { part, axis })
    }

    /// Resolve wire names such as `("leftArm", "elbow")`.
    pub fn from_names(part: &str, axis: &str) -> Option<Self> {
        Self::new(BodyPart::from_name(part)?, Axis::from_name(axis)?)
    }

    pub fn part(self) -> BodyPart {
        self.part
    }

    pub fn axis(self) -> Axis {
        self.axis
    }

    /// Every joint on the robot, part by part.
    pub fn all() -> impl Iterator<Item = Joint> {
        BodyPart::ALL
            .into_iter()
            .flat_map(|part| part.axes().iter().map(move |&axis| Joint { part, axis }))
    }

    pub fn range(self) -> AxisRange {
        match (self.part, self.axis) {
            (BodyPart::Head, Axis::X) => AxisRange::new(-45.0, 45.0),
            (BodyPart::Head, Axis::Y) => AxisRange::new(-30.0, 30.0),
            (BodyPart::Head, _) => AxisRange::new(-90.0, 90.0),
            (_, Axis::Shoulder) => AxisRange::new(-90.0, 90.0),
            (_, Axis::Elbow) => AxisRange::new(0.0, 120.0),
            (_, Axis::Wrist) => AxisRange::new(-45.0, 45.0),
            (_, Axis::Rotation) => AxisRange::new(-90.0, 90.0),
            (_, Axis::Tilt) => AxisRange::new(-30.0, 30.0),
            // fingers
            _ => AxisRange::new(0.0, 90.0),
        }
    }

    /// Return [`LinkError::OutOfRange`] when `value` lies outside [`Joint::range`].
    pub fn check(self, value: f64) -> Result<(), LinkError> {
        let range = self.range();
        if range.contains(value) {
            Ok(())
        } else {
            Err(LinkError::OutOfRange {
                target: self.to_string(),
                value,
                min: range.min,
                max: range.max,
            })
        }
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.part, self.axis)
    }
}

/// Nested `part → axis → angle` mapping covering every [`Joint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionTree(BTreeMap<BodyPart, BTreeMap<Axis, f64>>);

impl Default for PositionTree {
    /// All joints at `0.0`, which lies inside every range.
    fn default() -> Self {
        let mut tree = BTreeMap::new();
        for joint in Joint::all() {
            tree.entry(joint.part)
                .or_insert_with(BTreeMap::new)
                .insert(joint.axis, 0.0);
        }
        Self(tree)
    }
}

impl PositionTree {
    pub fn get(&self, joint: Joint) -> f64 {
        self.0
            .get(&joint.part)
            .and_then(|axes| axes.get(&joint.axis))
            .copied()
            .unwrap_or(0.0)
    }

    /// Store `value` for `joint` and return the value it replaced.
    ///
    /// Callers validate against [`Joint::range`] first.
    pub fn set(&mut self, joint: Joint, value: f64) -> f64 {
        self.0
            .entry(joint.part)
            .or_default()
            .insert(joint.axis, value)
            .unwrap_or(0.0)
    }

    /// Axis values of one part, in axis order.
    pub fn part(&self, part: BodyPart) -> impl Iterator<Item = (Axis, f64)> + '_ {
        part.axes().iter().map(move |&axis| {
            let value = Joint::new(part, axis).map(|j| self.get(j)).unwrap_or(0.0);
            (axis, value)
        })
    }

    /// `true` when every stored value lies within its joint's range.
    pub fn is_within_bounds(&self) -> bool {
        Joint::all().all(|j| j.range().contains(self.get(j)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joint_rejects_axis_the_part_does_not_have() {
        assert!(Joint::new(BodyPart::Head, Axis::Elbow).is_none());
        assert!(Joint::new(BodyPart::LeftHand, Axis::X).is_none());
        assert!(Joint::new(BodyPart::Torso, Axis::Tilt).is_some());
    }

    #[test]
    fn joint_from_wire_names() {
        let j = Joint::from_names("leftArm", "elbow").expect("known joint");
        assert_eq!(j.part(), BodyPart::LeftArm);
        assert_eq!(j.axis(), Axis::Elbow);
        assert_eq!(j.to_string(), "leftArm.elbow");
        assert!(Joint::from_names("tail", "x").is_none());
    }

    #[test]
    fn head_x_bounds_are_inclusive() {
        let j = Joint::new(BodyPart::Head, Axis::X).unwrap();
        assert!(j.check(45.0).is_ok());
        assert!(j.check(-45.0).is_ok());
        match j.check(46.0) {
            Err(LinkError::OutOfRange { target, min, max, .. }) => {
                assert_eq!(target, "head.x");
                assert_eq!(min, -45.0);
                assert_eq!(max, 45.0);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn elbow_cannot_go_negative() {
        let j = Joint::new(BodyPart::RightArm, Axis::Elbow).unwrap();
        assert!(j.check(120.0).is_ok());
        assert!(j.check(-1.0).is_err());
    }

    #[test]
    fn nan_is_never_in_range() {
        let j = Joint::new(BodyPart::LeftHand, Axis::Thumb).unwrap();
        assert!(j.check(f64::NAN).is_err());
    }

    #[test]
    fn default_tree_covers_every_joint_within_bounds() {
        let tree = PositionTree::default();
        assert_eq!(Joint::all().count(), 3 + 3 + 3 + 2 + 5 + 5);
        assert!(tree.is_within_bounds());
    }

    #[test]
    fn set_returns_previous_value() {
        let mut tree = PositionTree::default();
        let j = Joint::new(BodyPart::Head, Axis::Z).unwrap();
        assert_eq!(tree.set(j, 30.0), 0.0);
        assert_eq!(tree.set(j, -10.0), 30.0);
        assert_eq!(tree.get(j), -10.0);
    }

    #[test]
    fn tree_serializes_with_camel_case_part_names() {
        let json = serde_json::to_value(PositionTree::default()).unwrap();
        assert!(json.get("leftArm").is_some());
        assert!(json["rightHand"].get("pinky").is_some());
    }
}
