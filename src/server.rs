//! Shared server state and the administrative operations.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::error::TrackerError;
use crate::frame_slot::{FrameSlot, PendingFrame};
use crate::pipeline::{lock_tracker, FramePipeline, InferenceWorker, ResultSink};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::tracker::mistakes::{MistakeTracker, TrackingStatus};
use crate::tracker::report::Report;

pub const VERSION: &str = env!("GIT_VERSION");

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// サーバ全体で共有する状態
///
/// The frame slot and the tracker use separate locks, so administrative
/// calls never contend with frame submission.
pub struct ServerContext {
    slot: Arc<FrameSlot>,
    tracker: Arc<Mutex<MistakeTracker>>,
    /// moved into the worker on first start
    pending: Mutex<Option<FramePipeline>>,
    worker: Mutex<Option<InferenceWorker>>,
    stop: Arc<AtomicBool>,
    idle_sleep: Duration,
}

impl ServerContext {
    pub fn new(config: &Config) -> Result<Self> {
        let tracker = Arc::new(Mutex::new(MistakeTracker::new(config.tracking.clone())));
        let pipeline = FramePipeline::from_config(config, Arc::clone(&tracker))
            .context("failed to build frame pipeline")?;
        Ok(Self::from_parts(
            tracker,
            pipeline,
            Duration::from_millis(config.pipeline.idle_sleep_ms),
        ))
    }

    pub fn from_parts(
        tracker: Arc<Mutex<MistakeTracker>>,
        pipeline: FramePipeline,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            slot: Arc::new(FrameSlot::new()),
            tracker,
            pending: Mutex::new(Some(pipeline)),
            worker: Mutex::new(None),
            stop: Arc::new(AtomicBool::new(false)),
            idle_sleep,
        }
    }

    /// Flag observed by the inference loop; signal handlers set it.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Returns `true` if an undelivered frame was replaced.
    pub fn submit_frame(&self, frame: PendingFrame) -> bool {
        self.slot.put(frame)
    }

    /// 初回のみ推論スレッドを起動する。起動した場合 `true`
    pub fn ensure_inference_started<S: ResultSink + 'static>(&self, sink: S) -> Result<bool> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(false);
        }
        let pipeline = lock(&self.pending)
            .take()
            .context("inference pipeline is no longer available")?;
        *worker = Some(InferenceWorker::spawn(
            Arc::clone(&self.slot),
            pipeline,
            sink,
            Arc::clone(&self.stop),
            self.idle_sleep,
        )?);
        log::info!("inference worker started");
        Ok(true)
    }

    pub fn inference_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(InferenceWorker::is_running)
    }

    pub fn start_tracking(&self) -> TrackingStatus {
        lock_tracker(&self.tracker).start()
    }

    pub fn stop_tracking(&self) -> Report {
        lock_tracker(&self.tracker).stop()
    }

    pub fn reset_tracking(&self) -> TrackingStatus {
        lock_tracker(&self.tracker).reset()
    }

    pub fn status(&self) -> TrackingStatus {
        lock_tracker(&self.tracker).status()
    }

    pub fn report(&self) -> Report {
        lock_tracker(&self.tracker).report()
    }

    pub fn export_report(&self) -> Result<PathBuf, TrackerError> {
        lock_tracker(&self.tracker).export_report()
    }

    pub fn screenshot(&self, id: &str) -> Result<Vec<u8>, TrackerError> {
        lock_tracker(&self.tracker).screenshot(id)
    }

    /// クライアントメッセージを処理し、返信があれば返す
    ///
    /// Frames produce no direct reply; their results arrive through the
    /// result sink.
    pub fn handle(&self, msg: ClientMessage) -> Option<ServerMessage> {
        let reply = match msg {
            ClientMessage::Frame {
                timestamp,
                sequence,
                use_3d,
                image,
            } => {
                self.submit_frame(PendingFrame::new(image, timestamp, sequence, use_3d));
                return None;
            }
            ClientMessage::StartTracking => ServerMessage::Status(self.start_tracking()),
            ClientMessage::StopTracking => ServerMessage::Report(self.stop_tracking()),
            ClientMessage::Reset => ServerMessage::Status(self.reset_tracking()),
            ClientMessage::Status => ServerMessage::Status(self.status()),
            ClientMessage::Report => ServerMessage::Report(self.report()),
            ClientMessage::ExportReport => match self.export_report() {
                Ok(path) => ServerMessage::Exported {
                    path: path.display().to_string(),
                },
                Err(e) => error_reply(e),
            },
            ClientMessage::Screenshot { id } => match self.screenshot(&id) {
                Ok(data) => ServerMessage::Screenshot { id, data },
                Err(e) => error_reply(e),
            },
            ClientMessage::Health => ServerMessage::Health {
                version: VERSION.to_string(),
            },
        };
        Some(reply)
    }

    /// Stop and join the inference worker.
    pub fn shutdown(&self) {
        if let Some(mut worker) = lock(&self.worker).take() {
            worker.stop();
            log::info!("inference worker stopped");
        }
    }
}

fn error_reply(e: TrackerError) -> ServerMessage {
    log::warn!("request failed: {}", e);
    ServerMessage::Error {
        message: e.to_string(),
    }
}
