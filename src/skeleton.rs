// Body-tracking joint table and bone adjacency
//
// The joint order here is the canonical order used for pose table columns and
// for indexing a joint set. Both tables are immutable and shared freely.

use serde::{Deserialize, Serialize};

/// Tracker confidence levels as reported per joint
pub const CONFIDENCE_NONE: f32 = 0.0;
pub const CONFIDENCE_LOW: f32 = 1.0;
pub const CONFIDENCE_MEDIUM: f32 = 2.0;
pub const CONFIDENCE_HIGH: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

/// One tracked joint
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Joint {
    pub position: Position,
    pub rotation: Quaternion,
    pub confidence: f32,
}

impl Joint {
    pub fn new(position: Position, rotation: Quaternion, confidence: f32) -> Self {
        Self {
            position,
            rotation,
            confidence,
        }
    }
}

/// Joint slots of a tracked body, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum JointId {
    Pelvis,
    SpineNavel,
    SpineChest,
    Neck,
    ClavicleLeft,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    HandtipLeft,
    ThumbLeft,
    ClavicleRight,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HandtipRight,
    ThumbRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
    Head,
    Nose,
    EyeLeft,
    EarLeft,
    EyeRight,
    EarRight,
}

pub const JOINT_COUNT: usize = 32;

impl JointId {
    pub const ALL: [JointId; JOINT_COUNT] = [
        JointId::Pelvis,
        JointId::SpineNavel,
        JointId::SpineChest,
        JointId::Neck,
        JointId::ClavicleLeft,
        JointId::ShoulderLeft,
        JointId::ElbowLeft,
        JointId::WristLeft,
        JointId::HandLeft,
        JointId::HandtipLeft,
        JointId::ThumbLeft,
        JointId::ClavicleRight,
        JointId::ShoulderRight,
        JointId::ElbowRight,
        JointId::WristRight,
        JointId::HandRight,
        JointId::HandtipRight,
        JointId::ThumbRight,
        JointId::HipLeft,
        JointId::KneeLeft,
        JointId::AnkleLeft,
        JointId::FootLeft,
        JointId::HipRight,
        JointId::KneeRight,
        JointId::AnkleRight,
        JointId::FootRight,
        JointId::Head,
        JointId::Nose,
        JointId::EyeLeft,
        JointId::EarLeft,
        JointId::EyeRight,
        JointId::EarRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Column name prefix used in the pose table header
    pub fn name(self) -> &'static str {
        match self {
            JointId::Pelvis => "PELVIS",
            JointId::SpineNavel => "SPINE_NAVAL",
            JointId::SpineChest => "SPINE_CHEST",
            JointId::Neck => "NECK",
            JointId::ClavicleLeft => "CLAVICLE_LEFT",
            JointId::ShoulderLeft => "SHOULDER_LEFT",
            JointId::ElbowLeft => "ELBOW_LEFT",
            JointId::WristLeft => "WRIST_LEFT",
            JointId::HandLeft => "HAND_LEFT",
            JointId::HandtipLeft => "HANDTIP_LEFT",
            JointId::ThumbLeft => "THUMB_LEFT",
            JointId::ClavicleRight => "CLAVICLE_RIGHT",
            JointId::ShoulderRight => "SHOULDER_RIGHT",
            JointId::ElbowRight => "ELBOW_RIGHT",
            JointId::WristRight => "WRIST_RIGHT",
            JointId::HandRight => "HAND_RIGHT",
            JointId::HandtipRight => "HANDTIP_RIGHT",
            JointId::ThumbRight => "THUMB_RIGHT",
            JointId::HipLeft => "HIP_LEFT",
            JointId::KneeLeft => "KNEE_LEFT",
            JointId::AnkleLeft => "ANKLE_LEFT",
            JointId::FootLeft => "FOOT_LEFT",
            JointId::HipRight => "HIP_RIGHT",
            JointId::KneeRight => "KNEE_RIGHT",
            JointId::AnkleRight => "ANKLE_RIGHT",
            JointId::FootRight => "FOOT_RIGHT",
            JointId::Head => "HEAD",
            JointId::Nose => "NOSE",
            JointId::EyeLeft => "EYE_LEFT",
            JointId::EarLeft => "EAR_LEFT",
            JointId::EyeRight => "EYE_RIGHT",
            JointId::EarRight => "EAR_RIGHT",
        }
    }
}

/// Pairs of joints connected by a bone
pub const BONES: [(JointId, JointId); 31] = [
    (JointId::SpineChest, JointId::SpineNavel),
    (JointId::SpineNavel, JointId::Pelvis),
    (JointId::SpineChest, JointId::Neck),
    (JointId::Neck, JointId::Head),
    (JointId::Head, JointId::Nose),
    (JointId::SpineChest, JointId::ClavicleLeft),
    (JointId::ClavicleLeft, JointId::ShoulderLeft),
    (JointId::ShoulderLeft, JointId::ElbowLeft),
    (JointId::ElbowLeft, JointId::WristLeft),
    (JointId::WristLeft, JointId::HandLeft),
    (JointId::HandLeft, JointId::HandtipLeft),
    (JointId::WristLeft, JointId::ThumbLeft),
    (JointId::Pelvis, JointId::HipLeft),
    (JointId::HipLeft, JointId::KneeLeft),
    (JointId::KneeLeft, JointId::AnkleLeft),
    (JointId::AnkleLeft, JointId::FootLeft),
    (JointId::Nose, JointId::EyeLeft),
    (JointId::EyeLeft, JointId::EarLeft),
    (JointId::SpineChest, JointId::ClavicleRight),
    (JointId::ClavicleRight, JointId::ShoulderRight),
    (JointId::ShoulderRight, JointId::ElbowRight),
    (JointId::ElbowRight, JointId::WristRight),
    (JointId::WristRight, JointId::HandRight),
    (JointId::HandRight, JointId::HandtipRight),
    (JointId::WristRight, JointId::ThumbRight),
    (JointId::Pelvis, JointId::HipRight),
    (JointId::HipRight, JointId::KneeRight),
    (JointId::KneeRight, JointId::AnkleRight),
    (JointId::AnkleRight, JointId::FootRight),
    (JointId::Nose, JointId::EyeRight),
    (JointId::EyeRight, JointId::EarRight),
];

/// A renderable bone segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bone {
    pub start: Position,
    pub end: Position,
    /// Both endpoints tracked with at least medium confidence
    pub confident: bool,
}

/// Bones whose endpoints are both present with at least low confidence
pub fn bones(joints: &[Joint]) -> Vec<Bone> {
    BONES
        .iter()
        .filter_map(|(a, b)| {
            let first = joints.get(a.index())?;
            let second = joints.get(b.index())?;
            if first.confidence < CONFIDENCE_LOW || second.confidence < CONFIDENCE_LOW {
                return None;
            }
            Some(Bone {
                start: first.position,
                end: second.position,
                confident: first.confidence >= CONFIDENCE_MEDIUM
                    && second.confidence >= CONFIDENCE_MEDIUM,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_discriminants() {
        for (i, id) in JointId::ALL.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
        assert_eq!(JointId::ALL[JOINT_COUNT - 1].name(), "EAR_RIGHT");
    }

    #[test]
    fn bones_form_a_tree_rooted_at_the_chest() {
        for id in JointId::ALL {
            let parents = BONES.iter().filter(|(_, child)| *child == id).count();
            let expected = if id == JointId::SpineChest { 0 } else { 1 };
            assert_eq!(parents, expected, "{} has {} parents", id.name(), parents);
        }
    }

    #[test]
    fn bones_skip_low_confidence_endpoints() {
        let mut joints = vec![Joint::default(); JOINT_COUNT];
        joints[JointId::SpineChest.index()].confidence = CONFIDENCE_HIGH;
        joints[JointId::SpineNavel.index()].confidence = CONFIDENCE_LOW;
        joints[JointId::Neck.index()].confidence = CONFIDENCE_MEDIUM;
        joints[JointId::Neck.index()].position = Position::new(0.0, 1.0, 0.0);

        let found = bones(&joints);
        assert_eq!(found.len(), 2);
        // chest -> navel: navel is only low confidence
        assert!(!found[0].confident);
        // chest -> neck
        assert!(found[1].confident);
        assert_eq!(found[1].end, Position::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn short_joint_sets_yield_no_bones_for_missing_slots() {
        let joints = vec![Joint::new(Position::default(), Quaternion::default(), CONFIDENCE_HIGH)];
        assert!(bones(&joints).is_empty());
    }
}
