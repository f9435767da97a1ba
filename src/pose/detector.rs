use anyhow::Result;
use image::RgbImage;

/// Landmark as produced by the detector.
///
/// Image landmarks carry normalized `x`/`y` in `[0, 1]` and a relative depth
/// `z`; world landmarks carry metres around the hip centre.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawLandmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl RawLandmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }
}

/// Body detection in the detector's 33-point layout
#[derive(Debug, Clone, Default)]
pub struct BodyDetection {
    pub landmarks: Vec<RawLandmark>,
    /// 3-D world landmarks, empty when the model has none
    pub world_landmarks: Vec<RawLandmark>,
}

/// One detected hand with its handedness classification
#[derive(Debug, Clone, Default)]
pub struct RawHand {
    /// "Left" / "Right"; `None` when classification is missing
    pub label: Option<String>,
    pub score: f32,
    pub landmarks: Vec<RawLandmark>,
}

/// 姿勢・手の検出器
///
/// Calls are synchronous. "Nothing found" is `Ok(None)` / an empty vector;
/// `Err` is reserved for failures of the detector itself.
pub trait LandmarkDetector: Send {
    fn detect_body(&mut self, image: &RgbImage) -> Result<Option<BodyDetection>>;

    fn detect_hands(&mut self, _image: &RgbImage) -> Result<Vec<RawHand>> {
        Ok(Vec::new())
    }
}

/// Detector that never finds anything. Used when no model is configured.
pub struct NullDetector;

impl LandmarkDetector for NullDetector {
    fn detect_body(&mut self, _image: &RgbImage) -> Result<Option<BodyDetection>> {
        Ok(None)
    }
}

#[cfg(feature = "onnx")]
pub use movenet::MoveNetDetector;

#[cfg(feature = "onnx")]
mod movenet {
    use anyhow::{Context, Result};
    use image::RgbImage;
    use ndarray::Array4;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use std::path::Path;

    use super::{BodyDetection, LandmarkDetector, RawLandmark};
    use crate::pose::keypoint::BodyPart;

    /// MoveNet の入力サイズ
    pub const MOVENET_INPUT_SIZE: u32 = 192;

    /// MoveNet を使用した姿勢検出器
    ///
    /// The 17 MoveNet points are placed into the 33-point layout at the
    /// indices the projector reads; the remaining slots have zero visibility.
    pub struct MoveNetDetector {
        session: Session,
    }

    impl MoveNetDetector {
        pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(model_path.as_ref())
                .context("Failed to load ONNX model")?;
            Ok(Self { session })
        }

        /// [1, 192, 192, 3] の f32 テンソル (0.0-255.0)
        fn preprocess(image: &RgbImage) -> Array4<f32> {
            let resized = image::imageops::resize(
                image,
                MOVENET_INPUT_SIZE,
                MOVENET_INPUT_SIZE,
                image::imageops::FilterType::Triangle,
            );
            let size = MOVENET_INPUT_SIZE as usize;
            let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
            for (x, y, pixel) in resized.enumerate_pixels() {
                for c in 0..3 {
                    tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
                }
            }
            tensor
        }
    }

    impl LandmarkDetector for MoveNetDetector {
        fn detect_body(&mut self, image: &RgbImage) -> Result<Option<BodyDetection>> {
            let input_tensor = Tensor::from_array(Self::preprocess(image))?;
            let outputs = self
                .session
                .run(ort::inputs!["serving_default_input_0" => input_tensor])
                .context("Inference failed")?;

            // [1, 1, 17, 3] (y, x, confidence)
            let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
                .try_extract_array()
                .context("Failed to extract output tensor")?;

            let mut landmarks = vec![RawLandmark::default(); BodyPart::DETECTOR_LANDMARKS];
            let mut best = 0.0f32;
            for part in BodyPart::ALL {
                let i = part as usize;
                let y = output[[0, 0, i, 0]];
                let x = output[[0, 0, i, 1]];
                let confidence = output[[0, 0, i, 2]];
                best = best.max(confidence);
                landmarks[part.detector_index()] = RawLandmark::new(x, y, 0.0, confidence);
            }

            if best <= 0.0 {
                return Ok(None);
            }
            Ok(Some(BodyDetection {
                landmarks,
                world_landmarks: Vec::new(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_detector_finds_nothing() {
        let mut detector = NullDetector;
        let image = RgbImage::new(8, 8);
        assert!(detector.detect_body(&image).unwrap().is_none());
        assert!(detector.detect_hands(&image).unwrap().is_empty());
    }
}
