//! Session-scoped error log with bounded history and screenshot evidence.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::config::TrackingConfig;
use crate::error::{Result, TrackerError};
use crate::tracker::angles::Joint;
use crate::tracker::report::{build_report, Report};
use crate::tracker::screenshot::{ScreenshotStore, Snapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub joint: Joint,
    /// degrees
    pub magnitude: f32,
    /// seconds since session start
    pub timestamp: f64,
    pub sequence: u64,
    pub screenshot: Option<String>,
}

/// "session_YYYYmmdd_HHMMSS_mmm"
pub fn new_session_id(now: DateTime<Local>) -> String {
    now.format("session_%Y%m%d_%H%M%S_%3f").to_string()
}

pub struct Session {
    pub id: String,
    pub started_at: DateTime<Local>,
    started: Instant,
    pub active: bool,
    capacity: usize,
    /// FIFO, at most `capacity` entries
    pub history: VecDeque<ErrorEntry>,
    /// session totals, unaffected by history eviction
    pub counts: BTreeMap<Joint, u64>,
    pub major_errors: Vec<ErrorEntry>,
}

impl Session {
    pub fn new(capacity: usize) -> Self {
        let now = Local::now();
        Self::with_id(new_session_id(now), now, capacity)
    }

    fn with_id(id: String, now: DateTime<Local>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id,
            started_at: now,
            started: Instant::now(),
            active: false,
            capacity,
            history: VecDeque::with_capacity(capacity),
            counts: BTreeMap::new(),
            major_errors: Vec::new(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn total_errors(&self) -> u64 {
        self.counts.values().sum()
    }

    /// 履歴・カウンタ・重大エラー一覧へ追加
    pub fn record(&mut self, entry: ErrorEntry, major: bool) -> &ErrorEntry {
        *self.counts.entry(entry.joint).or_insert(0) += 1;
        if major {
            self.major_errors.push(entry.clone());
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(entry);
        &self.history[self.history.len() - 1]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub active: bool,
    pub session_id: String,
    pub total_errors: u64,
}

/// ミス記録とレポート生成
pub struct MistakeTracker {
    config: TrackingConfig,
    session: Session,
    screenshots: Option<ScreenshotStore>,
    /// ミリ秒内で重複した ID の連番
    id_base: String,
    id_suffix: u32,
}

impl MistakeTracker {
    pub fn new(config: TrackingConfig) -> Self {
        let screenshots = config
            .screenshot_dir
            .as_ref()
            .map(|dir| ScreenshotStore::new(dir.clone(), config.max_screenshots_per_session));
        let session = Session::new(config.history_capacity);
        Self {
            id_base: session.id.clone(),
            id_suffix: 0,
            session,
            config,
            screenshots,
        }
    }

    /// Millisecond ids collide on back-to-back resets; repeats get `_N`.
    fn next_session(&mut self) -> Session {
        let now = Local::now();
        let base = new_session_id(now);
        let id = if base == self.id_base {
            self.id_suffix += 1;
            format!("{}_{}", base, self.id_suffix)
        } else {
            self.id_base = base.clone();
            self.id_suffix = 0;
            base
        };
        Session::with_id(id, now, self.config.history_capacity)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_active(&self) -> bool {
        self.session.active
    }

    /// Seconds since the current session began
    pub fn elapsed(&self) -> f64 {
        self.session.elapsed_secs()
    }

    /// Fresh session, then activate.
    pub fn start(&mut self) -> TrackingStatus {
        self.reset();
        self.session.active = true;
        log::info!("tracking started: {}", self.session.id);
        self.status()
    }

    pub fn stop(&mut self) -> Report {
        self.session.active = false;
        let report = self.report();
        log::info!(
            "tracking stopped: {} ({} errors, grade {})",
            self.session.id,
            report.total_errors,
            report.grade.as_str()
        );
        report
    }

    /// 履歴を破棄して新しいセッション ID を発行 (active は維持)
    pub fn reset(&mut self) -> TrackingStatus {
        let active = self.session.active;
        self.session = self.next_session();
        self.session.active = active;
        if let Some(store) = self.screenshots.as_mut() {
            store.begin_session();
        }
        self.status()
    }

    pub fn status(&self) -> TrackingStatus {
        TrackingStatus {
            active: self.session.active,
            session_id: self.session.id.clone(),
            total_errors: self.session.total_errors(),
        }
    }

    /// 関節誤差を記録
    ///
    /// Ignored while inactive and for magnitudes at or below `min_error`.
    /// Above `major_error` the entry joins the major list and, when a frame
    /// is supplied, an annotated screenshot is written.
    pub fn log_error(
        &mut self,
        joint: Joint,
        magnitude: f32,
        timestamp: f64,
        sequence: u64,
        frame: Option<&Snapshot<'_>>,
    ) -> Option<&ErrorEntry> {
        if !self.session.active || magnitude.is_nan() || magnitude <= self.config.min_error {
            return None;
        }

        let major = magnitude > self.config.major_error;
        let screenshot = match (major, frame, self.screenshots.as_mut()) {
            (true, Some(snapshot), Some(store)) => {
                match store.save(&self.session.id, joint, magnitude, sequence, snapshot) {
                    Ok(id) => id,
                    Err(e) => {
                        log::warn!("failed to save screenshot for {}: {}", joint.name(), e);
                        None
                    }
                }
            }
            _ => None,
        };

        let entry = ErrorEntry {
            joint,
            magnitude,
            timestamp,
            sequence,
            screenshot,
        };
        Some(self.session.record(entry, major))
    }

    pub fn report(&self) -> Report {
        build_report(&self.session, self.config.top_n)
    }

    /// `{export_dir}/{session_id}_report.json` に書き出す
    pub fn export_report(&self) -> Result<PathBuf> {
        let dir = self
            .config
            .export_dir
            .as_ref()
            .ok_or(TrackerError::ExportUnavailable)?;
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_report.json", self.session.id));
        let json = serde_json::to_string_pretty(&self.report())?;
        fs::write(&path, json)?;
        log::info!("report exported to {}", path.display());
        Ok(path)
    }

    pub fn screenshot(&self, id: &str) -> Result<Vec<u8>> {
        self.screenshots
            .as_ref()
            .ok_or(TrackerError::ScreenshotsUnavailable)?
            .load(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::report::Grade;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn config(dir: &Path) -> TrackingConfig {
        TrackingConfig {
            screenshot_dir: Some(dir.join("shots")),
            export_dir: Some(dir.join("reports")),
            ..TrackingConfig::default()
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(96, 64, Rgb([120, 120, 120]))
    }

    #[test]
    fn test_session_id_format() {
        let id = new_session_id(Local::now());
        assert!(id.starts_with("session_"));
        // session_ + 8 + _ + 6 + _ + 3
        assert_eq!(id.len(), "session_".len() + 8 + 1 + 6 + 1 + 3);
    }

    #[test]
    fn test_inactive_ignores_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MistakeTracker::new(config(dir.path()));
        assert!(tracker.log_error(Joint::LeftElbow, 30.0, 0.0, 1, None).is_none());
        assert_eq!(tracker.status().total_errors, 0);
    }

    #[test]
    fn test_min_error_threshold_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MistakeTracker::new(config(dir.path()));
        tracker.start();
        assert!(tracker.log_error(Joint::LeftElbow, 5.0, 0.0, 1, None).is_none());
        assert!(tracker.log_error(Joint::LeftElbow, 5.1, 0.0, 2, None).is_some());
        assert_eq!(tracker.status().total_errors, 1);
    }

    #[test]
    fn test_history_bounded_counts_total() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MistakeTracker::new(config(dir.path()));
        tracker.start();
        for i in 0..1001u64 {
            tracker.log_error(Joint::RightKnee, 10.0, i as f64, i, None);
        }
        let session = tracker.session();
        assert_eq!(session.history.len(), 1000);
        assert_eq!(session.history.front().map(|e| e.sequence), Some(1));
        assert_eq!(session.counts[&Joint::RightKnee], 1001);
        assert_eq!(tracker.report().total_errors, 1001);
    }

    #[test]
    fn test_major_list_independent_of_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.history_capacity = 2;
        let mut tracker = MistakeTracker::new(cfg);
        tracker.start();
        for i in 0..5u64 {
            tracker.log_error(Joint::LeftHip, 20.0, i as f64, i, None);
        }
        assert_eq!(tracker.session().history.len(), 2);
        assert_eq!(tracker.session().major_errors.len(), 5);
        // no frame supplied, no screenshot
        assert!(tracker.session().major_errors.iter().all(|e| e.screenshot.is_none()));
    }

    #[test]
    fn test_reset_keeps_active_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MistakeTracker::new(config(dir.path()));
        tracker.start();
        tracker.log_error(Joint::LeftElbow, 10.0, 0.0, 1, None);
        let status = tracker.reset();
        assert!(status.active);
        assert_eq!(status.total_errors, 0);

        tracker.stop();
        assert!(!tracker.reset().active);
    }

    #[test]
    fn test_reset_issues_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MistakeTracker::new(config(dir.path()));
        let mut seen = std::collections::HashSet::new();
        assert!(seen.insert(tracker.status().session_id));
        assert!(seen.insert(tracker.start().session_id));
        for _ in 0..20 {
            assert!(seen.insert(tracker.reset().session_id));
        }
    }

    #[test]
    fn test_screenshot_failure_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let mut cfg = config(dir.path());
        cfg.screenshot_dir = Some(blocker.join("shots"));
        let mut tracker = MistakeTracker::new(cfg);
        tracker.start();
        let image = frame();
        let entry = tracker
            .log_error(Joint::RightElbow, 22.0, 0.5, 3, Some(&Snapshot::new(&image, &[])))
            .cloned()
            .unwrap();
        assert!(entry.screenshot.is_none());
        assert_eq!(tracker.session().major_errors.len(), 1);
    }

    #[test]
    fn test_screenshot_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.max_screenshots_per_session = 1;
        let mut tracker = MistakeTracker::new(cfg);
        tracker.start();
        let image = frame();
        let snap = Snapshot::new(&image, &[]);
        let first = tracker.log_error(Joint::LeftKnee, 20.0, 0.0, 1, Some(&snap)).cloned().unwrap();
        let second = tracker.log_error(Joint::LeftKnee, 21.0, 0.1, 2, Some(&snap)).cloned().unwrap();
        assert!(first.screenshot.is_some());
        assert!(second.screenshot.is_none());
        assert_eq!(tracker.session().major_errors.len(), 2);
    }

    #[test]
    fn test_export_report() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MistakeTracker::new(config(dir.path()));
        tracker.start();
        tracker.log_error(Joint::LeftElbow, 12.0, 1.0, 1, None);
        let path = tracker.export_report().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_string_lossy(),
            format!("{}_report.json", tracker.session().id)
        );
        let report: Report = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report.total_errors, 1);
    }

    #[test]
    fn test_export_without_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.export_dir = None;
        let tracker = MistakeTracker::new(cfg);
        assert!(matches!(tracker.export_report(), Err(TrackerError::ExportUnavailable)));
    }

    #[test]
    fn test_screenshots_unavailable_without_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.screenshot_dir = None;
        let tracker = MistakeTracker::new(cfg);
        assert!(matches!(
            tracker.screenshot("x.jpg"),
            Err(TrackerError::ScreenshotsUnavailable)
        ));
    }

    #[test]
    fn test_end_to_end_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = MistakeTracker::new(config(dir.path()));
        tracker.start();
        let image = frame();
        let snap = Snapshot::new(&image, &[]);

        tracker.log_error(Joint::LeftElbow, 20.0, 1.0, 10, Some(&snap));
        tracker.log_error(Joint::LeftElbow, 8.0, 2.0, 20, Some(&snap));
        tracker.log_error(Joint::RightKnee, 30.0, 3.0, 30, Some(&snap));

        let report = tracker.stop();
        assert!(!tracker.is_active());
        assert_eq!(report.total_errors, 3);
        assert_eq!(report.major_errors, 2);
        assert_eq!(report.frequent_mistakes[0].joint, Joint::LeftElbow);
        assert_eq!(report.frequent_mistakes[0].count, 2);
        let worst: Vec<(f32, Joint)> = report
            .worst_moments
            .iter()
            .map(|w| (w.magnitude, w.joint))
            .collect();
        assert_eq!(worst, vec![(30.0, Joint::RightKnee), (20.0, Joint::LeftElbow)]);
        // (20 + 8 + 30) / 3 = 19.3 with 2 majors
        assert!((report.average_error - 19.3).abs() < 1e-4);
        assert_eq!(report.grade, Grade::C);

        assert_eq!(report.screenshots.len(), 2);
        let on_disk = fs::read_dir(dir.path().join("shots")).unwrap().count();
        assert_eq!(on_disk, 2);
        for id in &report.screenshots {
            assert!(!tracker.screenshot(id).unwrap().is_empty());
        }

        // logging after stop is ignored
        assert!(tracker.log_error(Joint::LeftHip, 40.0, 4.0, 40, None).is_none());
        assert_eq!(tracker.report(), report);
    }
}
