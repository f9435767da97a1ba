pub mod angles;
pub mod comparator;
pub mod mistakes;
pub mod report;
pub mod screenshot;
pub mod smooth;

#[cfg(feature = "onnx")]
pub use angles::TemporalLiftEstimator;
pub use angles::{AngleMap, CoordMap, Joint, Pose3dEstimator, Skeleton3d, WorldLandmarkEstimator};
pub use comparator::{PoseComparator, RandomComparator, ReferenceComparator};
pub use mistakes::{ErrorEntry, MistakeTracker, Session, TrackingStatus};
pub use report::{Grade, Report, Severity};
pub use screenshot::{ScreenshotStore, Snapshot};
pub use smooth::{PoseSample, TemporalSmoother};
