use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pose::keypoint::HandLandmark;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// ログ出力先ディレクトリ
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default)]
    pub verbose: bool,
    /// 結果ブロードキャストのバッファ長
    #[serde(default = "default_result_buffer")]
    pub result_buffer: usize,
}

fn default_listen_addr() -> String { "0.0.0.0:8000".to_string() }
fn default_log_dir() -> String { "logs".to_string() }
fn default_result_buffer() -> usize { 8 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_dir: default_log_dir(),
            verbose: false,
            result_buffer: default_result_buffer(),
        }
    }
}

/// 3-D joint source used by the pipeline
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Pose3dMethod {
    /// Detector world landmarks
    World,
    /// Temporal lifting model over recent 2-D frames (feature `onnx`)
    Temporal,
}

/// Per-joint error scoring source
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparatorKind {
    Random,
    Reference,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// 検出前に短辺をこのサイズまで縮小 (0 で無効)
    #[serde(default = "default_max_short_side")]
    pub max_short_side: u32,
    /// スロットが空のときの待機時間 (ms)
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,
    /// EMA weight applied to the new sample
    #[serde(default = "default_smoothing_alpha")]
    pub smoothing_alpha: f32,
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
    /// Hand landmarks reported per hand
    #[serde(default = "default_hand_landmarks")]
    pub hand_landmarks: Vec<HandLandmark>,
    #[serde(default = "default_pose_3d")]
    pub pose_3d: Pose3dMethod,
    #[serde(default = "default_comparator")]
    pub comparator: ComparatorKind,
    /// Reference pose (joint name -> degrees) for the reference comparator
    #[serde(default)]
    pub reference_path: Option<PathBuf>,
    /// Upper bound of the random comparator's mock errors (degrees)
    #[serde(default = "default_random_max_error")]
    pub random_max_error: f32,
    #[serde(default)]
    pub random_seed: Option<u64>,
}

fn default_max_short_side() -> u32 { 480 }
fn default_idle_sleep_ms() -> u64 { 1 }
fn default_smoothing_alpha() -> f32 { 0.5 }
fn default_visibility_threshold() -> f32 { 0.3 }
fn default_hand_landmarks() -> Vec<HandLandmark> { HandLandmark::ALL.to_vec() }
fn default_pose_3d() -> Pose3dMethod { Pose3dMethod::World }
fn default_comparator() -> ComparatorKind { ComparatorKind::Random }
fn default_random_max_error() -> f32 { 30.0 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_short_side: default_max_short_side(),
            idle_sleep_ms: default_idle_sleep_ms(),
            smoothing_alpha: default_smoothing_alpha(),
            visibility_threshold: default_visibility_threshold(),
            hand_landmarks: default_hand_landmarks(),
            pose_3d: default_pose_3d(),
            comparator: default_comparator(),
            reference_path: None,
            random_max_error: default_random_max_error(),
            random_seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorConfig {
    /// "none" or "movenet" (feature `onnx`)
    #[serde(default = "default_detector_kind")]
    pub kind: String,
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_temporal_model_path")]
    pub temporal_model_path: String,
}

fn default_detector_kind() -> String { "none".to_string() }
fn default_model_path() -> String { "models/movenet_lightning.onnx".to_string() }
fn default_temporal_model_path() -> String { "models/temporal_pose3d.onnx".to_string() }

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: default_detector_kind(),
            model_path: default_model_path(),
            temporal_model_path: default_temporal_model_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackingConfig {
    /// これ以下の誤差は記録しない (度)
    #[serde(default = "default_min_error")]
    pub min_error: f32,
    /// これを超える誤差はスクリーンショットを保存 (度)
    #[serde(default = "default_major_error")]
    pub major_error: f32,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: Option<PathBuf>,
    #[serde(default = "default_max_screenshots")]
    pub max_screenshots_per_session: usize,
    #[serde(default = "default_export_dir")]
    pub export_dir: Option<PathBuf>,
}

fn default_min_error() -> f32 { 5.0 }
fn default_major_error() -> f32 { 15.0 }
fn default_history_capacity() -> usize { 1000 }
fn default_top_n() -> usize { 10 }
fn default_screenshot_dir() -> Option<PathBuf> { Some(PathBuf::from("screenshots")) }
fn default_max_screenshots() -> usize { 200 }
fn default_export_dir() -> Option<PathBuf> { Some(PathBuf::from("reports")) }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_error: default_min_error(),
            major_error: default_major_error(),
            history_capacity: default_history_capacity(),
            top_n: default_top_n(),
            screenshot_dir: default_screenshot_dir(),
            max_screenshots_per_session: default_max_screenshots(),
            export_dir: default_export_dir(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// ファイルが無ければデフォルト設定を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("{} not found, using default configuration", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
