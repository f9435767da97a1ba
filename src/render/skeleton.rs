use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};

use crate::pose::keypoint::{BodyKeypoint, BodyPart};

/// 骨格の接続定義 (開始キーポイント, 終了キーポイント)
pub const SKELETON_CONNECTIONS: [(BodyPart, BodyPart); 16] = [
    // 顔
    (BodyPart::LeftEar, BodyPart::LeftEye),
    (BodyPart::LeftEye, BodyPart::Nose),
    (BodyPart::Nose, BodyPart::RightEye),
    (BodyPart::RightEye, BodyPart::RightEar),
    // 上半身
    (BodyPart::LeftShoulder, BodyPart::RightShoulder),
    (BodyPart::LeftShoulder, BodyPart::LeftElbow),
    (BodyPart::LeftElbow, BodyPart::LeftWrist),
    (BodyPart::RightShoulder, BodyPart::RightElbow),
    (BodyPart::RightElbow, BodyPart::RightWrist),
    // 胴体
    (BodyPart::LeftShoulder, BodyPart::LeftHip),
    (BodyPart::RightShoulder, BodyPart::RightHip),
    (BodyPart::LeftHip, BodyPart::RightHip),
    // 下半身
    (BodyPart::LeftHip, BodyPart::LeftKnee),
    (BodyPart::LeftKnee, BodyPart::LeftAnkle),
    (BodyPart::RightHip, BodyPart::RightKnee),
    (BodyPart::RightKnee, BodyPart::RightAnkle),
];

/// キーポイントの色
pub const KEYPOINT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);

/// 骨格線の色
pub const SKELETON_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

const KEYPOINT_RADIUS: i32 = 4;

fn find(body: &[BodyKeypoint], part: BodyPart) -> Option<&BodyKeypoint> {
    body.iter().find(|kp| kp.name == part && kp.visible)
}

/// 可視キーポイントと骨格線を画像に描画
///
/// Keypoints are expected in the image's pixel space. Invisible points and
/// the bones touching them are skipped.
pub fn draw_skeleton(image: &mut RgbImage, body: &[BodyKeypoint]) {
    for (start, end) in SKELETON_CONNECTIONS.iter() {
        if let (Some(a), Some(b)) = (find(body, *start), find(body, *end)) {
            draw_line_segment_mut(image, (a.x, a.y), (b.x, b.y), SKELETON_COLOR);
        }
    }

    for kp in body.iter().filter(|kp| kp.visible) {
        let center = (kp.x.round() as i32, kp.y.round() as i32);
        draw_filled_circle_mut(image, center, KEYPOINT_RADIUS, KEYPOINT_COLOR);
    }
}
