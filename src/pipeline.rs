//! Per-frame processing and the inference loop that drives it.
//!
//! The loop runs on its own OS thread, polls the frame slot and pushes one
//! `PoseResult` per processed frame into a `ResultSink`. Errors and panics in
//! any stage are logged and the frame is skipped.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{ComparatorKind, Config, Pose3dMethod};
use crate::frame_slot::{FrameSlot, Mode, PendingFrame};
use crate::pose::detector::{LandmarkDetector, NullDetector};
use crate::pose::keypoint::{BodyKeypoint, HandKeypoint, HandPair};
use crate::pose::preprocess::{decode_frame, downscale_short_side};
use crate::pose::projector::LandmarkProjector;
use crate::tracker::angles::{
    joint_angles, joint_coordinates, AngleMap, CoordMap, Pose3dEstimator, WorldLandmarkEstimator,
};
use crate::tracker::comparator::{PoseComparator, RandomComparator, ReferenceComparator};
use crate::tracker::mistakes::MistakeTracker;
use crate::tracker::screenshot::Snapshot;
use crate::tracker::smooth::{PoseSample, TemporalSmoother};

/// Stage durations in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub decode: f64,
    pub downscale: f64,
    pub detection: f64,
    pub angles: f64,
    pub hands: f64,
    pub smoothing: f64,
    pub total: f64,
}

/// 1フレーム分の推定結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseResult {
    pub sequence: u64,
    /// client timestamp echoed back (ms)
    pub timestamp: f64,
    pub mode: Mode,
    pub body: Vec<BodyKeypoint>,
    pub hands: HandPair<Vec<HandKeypoint>>,
    pub pose_3d_angles: AngleMap,
    pub pose_3d_coords: CoordMap,
    pub timings: StageTimings,
    pub tracking_active: bool,
    /// frames replaced in the slot since the previous result
    pub dropped_frames: u64,
}

/// Where the inference loop delivers its results.
pub trait ResultSink: Send {
    /// Returns `false` when nobody is listening.
    fn emit(&self, result: PoseResult) -> bool;
}

impl ResultSink for tokio::sync::broadcast::Sender<PoseResult> {
    fn emit(&self, result: PoseResult) -> bool {
        self.send(result).is_ok()
    }
}

impl ResultSink for mpsc::Sender<PoseResult> {
    fn emit(&self, result: PoseResult) -> bool {
        self.send(result).is_ok()
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

pub(crate) fn lock_tracker(tracker: &Mutex<MistakeTracker>) -> MutexGuard<'_, MistakeTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decode → downscale → detect → project → 3-D → smooth → score.
pub struct FramePipeline {
    detector: Box<dyn LandmarkDetector>,
    projector: LandmarkProjector,
    estimator: Box<dyn Pose3dEstimator>,
    smoother: TemporalSmoother,
    comparator: Box<dyn PoseComparator>,
    tracker: Arc<Mutex<MistakeTracker>>,
    max_short_side: u32,
    last_mode: Option<Mode>,
}

impl FramePipeline {
    pub fn new(
        detector: Box<dyn LandmarkDetector>,
        projector: LandmarkProjector,
        estimator: Box<dyn Pose3dEstimator>,
        smoother: TemporalSmoother,
        comparator: Box<dyn PoseComparator>,
        tracker: Arc<Mutex<MistakeTracker>>,
        max_short_side: u32,
    ) -> Self {
        Self {
            detector,
            projector,
            estimator,
            smoother,
            comparator,
            tracker,
            max_short_side,
            last_mode: None,
        }
    }

    /// 設定から検出器・3D推定・比較器を組み立てる
    pub fn from_config(config: &Config, tracker: Arc<Mutex<MistakeTracker>>) -> Result<Self> {
        let p = &config.pipeline;
        let detector = build_detector(config)?;
        let estimator = build_estimator(config)?;
        let comparator: Box<dyn PoseComparator> = match p.comparator {
            ComparatorKind::Random => {
                Box::new(RandomComparator::new(p.random_max_error, p.random_seed))
            }
            ComparatorKind::Reference => {
                let path = p
                    .reference_path
                    .as_ref()
                    .context("comparator = \"reference\" requires pipeline.reference_path")?;
                let comparator = ReferenceComparator::from_json_file(path)
                    .with_context(|| format!("failed to load reference pose {}", path.display()))?;
                Box::new(comparator)
            }
        };
        log::info!(
            "pipeline: detector={} pose_3d={:?} comparator={:?} alpha={}",
            config.detector.kind,
            p.pose_3d,
            p.comparator,
            p.smoothing_alpha
        );

        Ok(Self::new(
            detector,
            LandmarkProjector::new(p.visibility_threshold, p.hand_landmarks.clone()),
            estimator,
            TemporalSmoother::new(p.smoothing_alpha),
            comparator,
            tracker,
            p.max_short_side,
        ))
    }

    /// Drop smoothing and temporal 3-D state
    pub fn reset(&mut self) {
        self.smoother.reset();
        self.estimator.reset();
        self.last_mode = None;
    }

    pub fn process(&mut self, frame: &PendingFrame) -> Result<PoseResult> {
        let start = Instant::now();
        let mut timings = StageTimings::default();
        let mode = frame.mode();
        if self.last_mode.is_some() && self.last_mode != Some(mode) {
            self.estimator.reset();
        }
        self.last_mode = Some(mode);

        let tracking_active = lock_tracker(&self.tracker).is_active();

        let t = Instant::now();
        let image = decode_frame(&frame.data)?;
        timings.decode = elapsed_ms(t);

        // screenshots are drawn on the full-size frame
        let original = tracking_active.then(|| image.clone());

        let t = Instant::now();
        let downscaled = downscale_short_side(image, self.max_short_side);
        let (width, height) = (downscaled.original_width, downscaled.original_height);
        timings.downscale = elapsed_ms(t);

        let t = Instant::now();
        let detection = self
            .detector
            .detect_body(&downscaled.image)
            .context("body detection failed")?;
        timings.detection = elapsed_ms(t);

        let body = detection
            .as_ref()
            .map(|d| self.projector.project_body(d, width, height))
            .unwrap_or_default();

        let t = Instant::now();
        let (angles, coords) = match (mode, detection.as_ref()) {
            (Mode::ThreeD, Some(d)) => match self.estimator.estimate(d) {
                Some(skeleton) => (joint_angles(&skeleton), joint_coordinates(&skeleton)),
                None => (AngleMap::new(), CoordMap::new()),
            },
            _ => (AngleMap::new(), CoordMap::new()),
        };
        timings.angles = elapsed_ms(t);

        let t = Instant::now();
        let raw_hands = self
            .detector
            .detect_hands(&downscaled.image)
            .context("hand detection failed")?;
        let hands = self.projector.project_hands(&raw_hands, width, height);
        timings.hands = elapsed_ms(t);

        let t = Instant::now();
        let smoothed = self.smoother.apply(
            mode,
            PoseSample {
                body,
                hands,
                angles,
                coords,
            },
        );
        timings.smoothing = elapsed_ms(t);

        if tracking_active && !smoothed.angles.is_empty() {
            let errors = self.comparator.compare(&smoothed.angles);
            let mut tracker = lock_tracker(&self.tracker);
            let timestamp = tracker.elapsed();
            let snapshot = original
                .as_ref()
                .map(|image| Snapshot::new(image, &smoothed.body));
            for (joint, magnitude) in errors {
                tracker.log_error(joint, magnitude, timestamp, frame.sequence, snapshot.as_ref());
            }
        }

        timings.total = elapsed_ms(start);

        Ok(PoseResult {
            sequence: frame.sequence,
            timestamp: frame.timestamp,
            mode,
            body: smoothed.body,
            hands: smoothed.hands,
            pose_3d_angles: smoothed.angles,
            pose_3d_coords: smoothed.coords,
            timings,
            tracking_active,
            dropped_frames: 0,
        })
    }
}

fn build_detector(config: &Config) -> Result<Box<dyn LandmarkDetector>> {
    match config.detector.kind.as_str() {
        "none" => {
            log::warn!("no detector configured, results will contain no keypoints");
            Ok(Box::new(NullDetector))
        }
        #[cfg(feature = "onnx")]
        "movenet" => {
            let detector = crate::pose::detector::MoveNetDetector::new(&config.detector.model_path)?;
            log::info!("MoveNet model loaded: {}", config.detector.model_path);
            Ok(Box::new(detector))
        }
        #[cfg(not(feature = "onnx"))]
        "movenet" => bail!("detector \"movenet\" requires the `onnx` feature"),
        other => bail!("unknown detector: {}", other),
    }
}

fn build_estimator(config: &Config) -> Result<Box<dyn Pose3dEstimator>> {
    match config.pipeline.pose_3d {
        Pose3dMethod::World => Ok(Box::new(WorldLandmarkEstimator)),
        #[cfg(feature = "onnx")]
        Pose3dMethod::Temporal => {
            let path = &config.detector.temporal_model_path;
            let estimator = crate::tracker::angles::TemporalLiftEstimator::new(path)?;
            log::info!("temporal 3-D model loaded: {}", path);
            Ok(Box::new(estimator))
        }
        #[cfg(not(feature = "onnx"))]
        Pose3dMethod::Temporal => bail!("pose_3d = \"temporal\" requires the `onnx` feature"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 1秒ごとのスループット集計
struct LoopStats {
    timer: Instant,
    processed: u32,
    failed: u32,
    dropped: u64,
    total_ms: f64,
}

impl LoopStats {
    fn new() -> Self {
        Self {
            timer: Instant::now(),
            processed: 0,
            failed: 0,
            dropped: 0,
            total_ms: 0.0,
        }
    }

    fn maybe_log(&mut self) {
        let elapsed = self.timer.elapsed().as_secs_f32();
        if elapsed < 1.0 {
            return;
        }
        if self.processed > 0 || self.failed > 0 || self.dropped > 0 {
            let avg = if self.processed > 0 {
                self.total_ms / self.processed as f64
            } else {
                0.0
            };
            log::info!(
                "FPS: {:.1} (processed: {} failed: {} drop: {}) avg total {:.1}ms",
                self.processed as f32 / elapsed,
                self.processed,
                self.failed,
                self.dropped,
                avg
            );
        }
        *self = Self::new();
    }
}

/// スロットが空の間は `idle_sleep` 待機し、停止フラグが立つまで処理を続ける
pub fn run_inference_loop(
    slot: &FrameSlot,
    pipeline: &mut FramePipeline,
    sink: &dyn ResultSink,
    stop: &AtomicBool,
    idle_sleep: Duration,
) {
    let mut stats = LoopStats::new();
    log::info!("inference loop started");

    while !stop.load(Ordering::Relaxed) {
        let frame = match slot.take() {
            Some(frame) => frame,
            None => {
                stats.maybe_log();
                thread::sleep(idle_sleep);
                continue;
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(&frame)));
        let dropped = slot.drain_dropped_count();
        stats.dropped += dropped;

        match outcome {
            Ok(Ok(mut result)) => {
                result.dropped_frames = dropped;
                stats.processed += 1;
                stats.total_ms += result.timings.total;
                if dropped > 0 {
                    log::debug!("frame {}: {} frame(s) dropped", frame.sequence, dropped);
                }
                sink.emit(result);
            }
            Ok(Err(e)) => {
                stats.failed += 1;
                log::warn!("frame {} skipped: {:#}", frame.sequence, e);
            }
            Err(payload) => {
                stats.failed += 1;
                log::error!(
                    "frame {} panicked: {}",
                    frame.sequence,
                    panic_message(payload.as_ref())
                );
                // state may be half-updated
                pipeline.reset();
            }
        }
        stats.maybe_log();
    }

    log::info!("inference loop stopped");
}

/// 推論ループを専用スレッドで実行するハンドル
pub struct InferenceWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    pub fn spawn<S: ResultSink + 'static>(
        slot: Arc<FrameSlot>,
        mut pipeline: FramePipeline,
        sink: S,
        stop: Arc<AtomicBool>,
        idle_sleep: Duration,
    ) -> Result<Self> {
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || run_inference_loop(&slot, &mut pipeline, &sink, &flag, idle_sleep))
            .context("failed to spawn inference thread")?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop and wait for it to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("inference thread terminated abnormally");
            }
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
