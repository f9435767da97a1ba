//! Error types surfaced to callers of the administrative operations.
//!
//! The inference loop itself works with `anyhow::Result` and never lets an
//! error escape; these variants are what the tracker and server context
//! return when an operation cannot be carried out.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("report export is unavailable: no export directory configured")]
    ExportUnavailable,

    #[error("screenshots are unavailable: no screenshot directory configured")]
    ScreenshotsUnavailable,

    #[error("invalid screenshot id: {0}")]
    InvalidScreenshotId(String),

    #[error("screenshot not found: {0}")]
    ScreenshotNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
