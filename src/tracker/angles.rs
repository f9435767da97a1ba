//! 3-D joint angles and coordinates.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::pose::detector::BodyDetection;
use crate::pose::keypoint::{round_to, BodyPart, Point3};

/// Vectors shorter than this are treated as degenerate.
const DEGENERATE_EPS: f32 = 1e-6;

/// Joints scored by the angle calculator and the mistake tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    LeftElbow,
    RightElbow,
    LeftKnee,
    RightKnee,
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
}

impl Joint {
    pub const ALL: [Joint; 8] = [
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftHip,
        Self::RightHip,
    ];

    /// (p1, vertex, p3)
    pub fn triple(self) -> (BodyPart, BodyPart, BodyPart) {
        use BodyPart::*;
        match self {
            Self::LeftElbow => (LeftShoulder, LeftElbow, LeftWrist),
            Self::RightElbow => (RightShoulder, RightElbow, RightWrist),
            Self::LeftKnee => (LeftHip, LeftKnee, LeftAnkle),
            Self::RightKnee => (RightHip, RightKnee, RightAnkle),
            Self::LeftShoulder => (LeftShoulder, RightShoulder, LeftElbow),
            Self::RightShoulder => (RightShoulder, LeftShoulder, RightElbow),
            Self::LeftHip => (LeftHip, RightHip, LeftKnee),
            Self::RightHip => (RightHip, LeftHip, RightKnee),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
        }
    }

    /// "left_elbow" -> "left elbow"
    pub fn label(self) -> String {
        self.name().replace('_', " ")
    }
}

/// Body parts whose raw 3-D coordinates are reported
pub const COORDINATE_PARTS: [BodyPart; 12] = [
    BodyPart::LeftShoulder,
    BodyPart::RightShoulder,
    BodyPart::LeftElbow,
    BodyPart::RightElbow,
    BodyPart::LeftWrist,
    BodyPart::RightWrist,
    BodyPart::LeftHip,
    BodyPart::RightHip,
    BodyPart::LeftKnee,
    BodyPart::RightKnee,
    BodyPart::LeftAnkle,
    BodyPart::RightAnkle,
];

pub type AngleMap = BTreeMap<Joint, f32>;
pub type CoordMap = BTreeMap<BodyPart, Point3>;

/// 3-D skeleton keyed by body part
pub type Skeleton3d = BTreeMap<BodyPart, Point3>;

fn to_vector(p: &Point3) -> Vector3<f32> {
    Vector3::new(p.x, p.y, p.z)
}

/// `p2` における `p2→p1` と `p2→p3` のなす角 (度)
///
/// Returns 0 when either vector is degenerate.
pub fn angle_at(p1: &Point3, p2: &Point3, p3: &Point3) -> f32 {
    let v1 = to_vector(p1) - to_vector(p2);
    let v2 = to_vector(p3) - to_vector(p2);
    let n1 = v1.norm();
    let n2 = v2.norm();
    if n1 < DEGENERATE_EPS || n2 < DEGENERATE_EPS {
        return 0.0;
    }
    let cos = (v1.dot(&v2) / (n1 * n2)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// 各関節の角度 (0.1 度単位に丸め)
pub fn joint_angles(skeleton: &Skeleton3d) -> AngleMap {
    Joint::ALL
        .iter()
        .filter_map(|&joint| {
            let (a, b, c) = joint.triple();
            let angle = angle_at(skeleton.get(&a)?, skeleton.get(&b)?, skeleton.get(&c)?);
            Some((joint, round_to(angle, 1)))
        })
        .collect()
}

pub fn joint_coordinates(skeleton: &Skeleton3d) -> CoordMap {
    COORDINATE_PARTS
        .iter()
        .filter_map(|part| {
            let p = skeleton.get(part)?;
            Some((
                *part,
                Point3::new(round_to(p.x, 3), round_to(p.y, 3), round_to(p.z, 3)),
            ))
        })
        .collect()
}

/// Source of a 3-D skeleton for the current frame.
pub trait Pose3dEstimator: Send {
    fn estimate(&mut self, detection: &BodyDetection) -> Option<Skeleton3d>;

    /// Drop any temporal state
    fn reset(&mut self) {}
}

/// 検出器のワールド座標ランドマークをそのまま使う
pub struct WorldLandmarkEstimator;

impl Pose3dEstimator for WorldLandmarkEstimator {
    fn estimate(&mut self, detection: &BodyDetection) -> Option<Skeleton3d> {
        let world = &detection.world_landmarks;
        if world.len() < BodyPart::DETECTOR_LANDMARKS {
            return None;
        }
        Some(
            BodyPart::ALL
                .iter()
                .map(|&part| {
                    let lm = &world[part.detector_index()];
                    (part, Point3::new(lm.x, lm.y, lm.z))
                })
                .collect(),
        )
    }
}

#[cfg(feature = "onnx")]
pub use temporal::TemporalLiftEstimator;

#[cfg(feature = "onnx")]
mod temporal {
    use std::collections::VecDeque;
    use std::path::Path;

    use anyhow::{Context, Result};
    use ndarray::Array3;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;

    use super::{Pose3dEstimator, Skeleton3d};
    use crate::pose::detector::BodyDetection;
    use crate::pose::keypoint::{BodyPart, Point3};

    pub const TEMPORAL_WINDOW: usize = 9;
    const INPUT_DIM: usize = BodyPart::COUNT * 2;

    /// 直近 9 フレームの 2D キーポイントから 3D 姿勢を推定する時系列モデル
    ///
    /// Model contract: input `[1, 9, 34]` (17 × normalized x/y per frame),
    /// output `[1, 51]` (17 × x/y/z for the last frame).
    pub struct TemporalLiftEstimator {
        session: Session,
        window: VecDeque<[f32; INPUT_DIM]>,
    }

    impl TemporalLiftEstimator {
        pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(model_path.as_ref())
                .context("Failed to load temporal model")?;
            Ok(Self {
                session,
                window: VecDeque::with_capacity(TEMPORAL_WINDOW),
            })
        }

        fn run(&mut self) -> Result<Skeleton3d> {
            let mut input = Array3::<f32>::zeros((1, TEMPORAL_WINDOW, INPUT_DIM));
            for (t, frame) in self.window.iter().enumerate() {
                for (i, v) in frame.iter().enumerate() {
                    input[[0, t, i]] = *v;
                }
            }
            let outputs = self
                .session
                .run(ort::inputs!["input" => Tensor::from_array(input)?])
                .context("Temporal inference failed")?;
            let output: ndarray::ArrayViewD<f32> = outputs["output"]
                .try_extract_array()
                .context("Failed to extract output tensor")?;

            Ok(BodyPart::ALL
                .iter()
                .map(|&part| {
                    let i = part as usize * 3;
                    let p = Point3::new(output[[0, i]], output[[0, i + 1]], output[[0, i + 2]]);
                    (part, p)
                })
                .collect())
        }
    }

    impl Pose3dEstimator for TemporalLiftEstimator {
        fn estimate(&mut self, detection: &BodyDetection) -> Option<Skeleton3d> {
            if detection.landmarks.len() < BodyPart::DETECTOR_LANDMARKS {
                return None;
            }
            let mut frame = [0.0f32; INPUT_DIM];
            for part in BodyPart::ALL {
                let lm = &detection.landmarks[part.detector_index()];
                frame[part as usize * 2] = lm.x;
                frame[part as usize * 2 + 1] = lm.y;
            }
            if self.window.len() == TEMPORAL_WINDOW {
                self.window.pop_front();
            }
            self.window.push_back(frame);
            if self.window.len() < TEMPORAL_WINDOW {
                return None;
            }

            match self.run() {
                Ok(skeleton) => Some(skeleton),
                Err(e) => {
                    log::warn!("temporal 3-D estimate failed: {:#}", e);
                    None
                }
            }
        }

        fn reset(&mut self) {
            self.window.clear();
        }
    }
}
