//! Maps raw detector output onto the client schema: 17 named body points and
//! a `{left, right}` set of named hand points, in original pixel space.

use super::detector::{BodyDetection, RawHand};
use super::keypoint::{
    round_to, BodyKeypoint, BodyPart, HandKeypoint, HandLandmark, HandPair, HandSide, Keypoint,
};

pub struct LandmarkProjector {
    visibility_threshold: f32,
    hand_landmarks: Vec<HandLandmark>,
}

impl LandmarkProjector {
    pub fn new(visibility_threshold: f32, hand_landmarks: Vec<HandLandmark>) -> Self {
        Self {
            visibility_threshold,
            hand_landmarks,
        }
    }

    /// 体のキーポイントを元画像のピクセル座標へ変換
    ///
    /// Schema points whose detector index is out of range are skipped.
    pub fn project_body(&self, detection: &BodyDetection, width: u32, height: u32) -> Vec<BodyKeypoint> {
        let (w, h) = (width as f32, height as f32);
        BodyPart::ALL
            .iter()
            .filter_map(|&part| {
                let lm = detection.landmarks.get(part.detector_index())?;
                Some(Keypoint {
                    name: part,
                    x: round_to(lm.x * w, 1),
                    y: round_to(lm.y * h, 1),
                    confidence: (lm.visibility * 100.0).round(),
                    visible: lm.visibility > self.visibility_threshold,
                    normalized_x: Some(round_to(lm.x, 3)),
                    normalized_y: Some(round_to(lm.y, 3)),
                    z: Some(round_to(lm.z, 3)),
                })
            })
            .collect()
    }

    /// 手のキーポイントを左右に振り分ける
    ///
    /// Hands without a recognizable handedness label are dropped. When two
    /// hands share a label the later one wins.
    pub fn project_hands(&self, hands: &[RawHand], width: u32, height: u32) -> HandPair<Vec<HandKeypoint>> {
        let (w, h) = (width as f32, height as f32);
        let mut out: HandPair<Vec<HandKeypoint>> = HandPair::default();

        for hand in hands {
            let side = match hand.label.as_deref().and_then(HandSide::from_label) {
                Some(side) => side,
                None => {
                    log::debug!("dropping hand without handedness label ({:?})", hand.label);
                    continue;
                }
            };
            let confidence = (hand.score * 100.0).round();
            let points = self
                .hand_landmarks
                .iter()
                .filter_map(|&name| {
                    let lm = hand.landmarks.get(name.index())?;
                    Some(Keypoint {
                        name,
                        x: round_to(lm.x * w, 1),
                        y: round_to(lm.y * h, 1),
                        confidence,
                        visible: true,
                        normalized_x: Some(round_to(lm.x, 3)),
                        normalized_y: Some(round_to(lm.y, 3)),
                        z: Some(round_to(lm.z, 3)),
                    })
                })
                .collect();
            *out.get_mut(side) = points;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::detector::RawLandmark;

    fn full_detection(visibility: f32) -> BodyDetection {
        let landmarks = (0..BodyPart::DETECTOR_LANDMARKS)
            .map(|i| RawLandmark::new(i as f32 / 100.0, 0.5, -0.1, visibility))
            .collect();
        BodyDetection {
            landmarks,
            world_landmarks: Vec::new(),
        }
    }

    fn raw_hand(label: Option<&str>, x: f32) -> RawHand {
        RawHand {
            label: label.map(str::to_string),
            score: 0.95,
            landmarks: (0..HandLandmark::COUNT)
                .map(|i| RawLandmark::new(x, i as f32 / 40.0, 0.01 * i as f32, 0.0))
                .collect(),
        }
    }

    #[test]
    fn test_project_body_schema_order_and_pixels() {
        let projector = LandmarkProjector::new(0.3, HandLandmark::ALL.to_vec());
        let body = projector.project_body(&full_detection(0.9), 640, 480);

        assert_eq!(body.len(), BodyPart::COUNT);
        let names: Vec<BodyPart> = body.iter().map(|k| k.name).collect();
        assert_eq!(names, BodyPart::ALL.to_vec());

        // left_shoulder is detector index 11 -> x = 0.11 * 640
        let ls = &body[BodyPart::LeftShoulder as usize];
        assert!((ls.x - 70.4).abs() < 1e-3, "x={}", ls.x);
        assert!((ls.y - 240.0).abs() < 1e-3);
        assert_eq!(ls.confidence, 90.0);
        assert!(ls.visible);
        assert_eq!(ls.normalized_x, Some(0.11));
    }

    #[test]
    fn test_visibility_threshold_is_exclusive() {
        let projector = LandmarkProjector::new(0.3, Vec::new());
        let at_threshold = projector.project_body(&full_detection(0.3), 100, 100);
        assert!(at_threshold.iter().all(|k| !k.visible));
        let above = projector.project_body(&full_detection(0.31), 100, 100);
        assert!(above.iter().all(|k| k.visible));
    }

    #[test]
    fn test_short_detection_skips_unmapped() {
        let projector = LandmarkProjector::new(0.3, Vec::new());
        let mut detection = full_detection(0.9);
        detection.landmarks.truncate(14);
        let body = projector.project_body(&detection, 100, 100);
        // indices 0,2,5,7,8,11,12,13 are < 14
        assert_eq!(body.len(), 8);
        assert_eq!(body.last().map(|k| k.name), Some(BodyPart::LeftElbow));
    }

    #[test]
    fn test_empty_detection() {
        let projector = LandmarkProjector::new(0.3, Vec::new());
        let body = projector.project_body(&BodyDetection::default(), 100, 100);
        assert!(body.is_empty());
    }

    #[test]
    fn test_project_hands_by_label() {
        let projector = LandmarkProjector::new(0.3, HandLandmark::ALL.to_vec());
        let hands = projector.project_hands(
            &[raw_hand(Some("Left"), 0.25), raw_hand(Some("Right"), 0.75)],
            400,
            200,
        );
        assert_eq!(hands.left.len(), HandLandmark::COUNT);
        assert_eq!(hands.right.len(), HandLandmark::COUNT);
        assert!((hands.left[0].x - 100.0).abs() < 1e-3);
        assert!((hands.right[0].x - 300.0).abs() < 1e-3);
        assert_eq!(hands.left[4].normalized_y, Some(0.1));
        assert_eq!(hands.left[0].confidence, 95.0);
    }

    #[test]
    fn test_project_hands_drops_unlabelled() {
        let projector = LandmarkProjector::new(0.3, HandLandmark::ALL.to_vec());
        let hands = projector.project_hands(
            &[raw_hand(None, 0.25), raw_hand(Some("unknown"), 0.5)],
            400,
            200,
        );
        assert!(hands.left.is_empty());
        assert!(hands.right.is_empty());
    }

    #[test]
    fn test_project_hands_subset() {
        let projector =
            LandmarkProjector::new(0.3, vec![HandLandmark::Wrist, HandLandmark::IndexTip]);
        let hands = projector.project_hands(&[raw_hand(Some("Right"), 0.5)], 100, 100);
        let names: Vec<HandLandmark> = hands.right.iter().map(|k| k.name).collect();
        assert_eq!(names, vec![HandLandmark::Wrist, HandLandmark::IndexTip]);
        assert_eq!(hands.right[1].z, Some(0.08));
    }
}
