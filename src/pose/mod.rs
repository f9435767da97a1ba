pub mod detector;
pub mod keypoint;
pub mod preprocess;
pub mod projector;

#[cfg(feature = "onnx")]
pub use detector::MoveNetDetector;
pub use detector::{BodyDetection, LandmarkDetector, NullDetector, RawHand, RawLandmark};
pub use keypoint::{
    BodyKeypoint, BodyPart, HandKeypoint, HandLandmark, HandPair, HandSide, Keypoint, Point3,
};
pub use preprocess::{decode_frame, downscale_short_side, Downscaled};
pub use projector::LandmarkProjector;
