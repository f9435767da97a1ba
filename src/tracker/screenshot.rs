//! Annotated JPEG evidence for major errors.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::{Result, TrackerError};
use crate::pose::keypoint::BodyKeypoint;
use crate::render::{annotate_error, draw_skeleton};
use crate::tracker::angles::Joint;

const JPEG_QUALITY: u8 = 85;

/// Frame handed to the tracker alongside an error, in original pixels.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub image: &'a RgbImage,
    pub body: &'a [BodyKeypoint],
}

impl<'a> Snapshot<'a> {
    pub fn new(image: &'a RgbImage, body: &'a [BodyKeypoint]) -> Self {
        Self { image, body }
    }
}

/// `{session_id}_f{sequence}_{joint}_{magnitude:.1}.jpg`
pub fn screenshot_id(session_id: &str, sequence: u64, joint: Joint, magnitude: f32) -> String {
    format!("{}_f{}_{}_{:.1}.jpg", session_id, sequence, joint.name(), magnitude)
}

/// Rejects ids that could escape the screenshot directory.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(TrackerError::InvalidScreenshotId(id.to_string()));
    }
    Ok(())
}

/// スクリーンショットの保存先と1セッションあたりの上限
pub struct ScreenshotStore {
    dir: PathBuf,
    max_per_session: usize,
    written: usize,
    cap_warned: bool,
}

impl ScreenshotStore {
    pub fn new<P: Into<PathBuf>>(dir: P, max_per_session: usize) -> Self {
        Self {
            dir: dir.into(),
            max_per_session,
            written: 0,
            cap_warned: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Artifacts written in the current session
    pub fn written(&self) -> usize {
        self.written
    }

    /// Start counting towards the cap from zero. Files on disk are kept.
    pub fn begin_session(&mut self) {
        self.written = 0;
        self.cap_warned = false;
    }

    /// 枠とバナーを描画して JPEG として保存
    ///
    /// Returns `Ok(None)` once the per-session cap is reached.
    pub fn save(
        &mut self,
        session_id: &str,
        joint: Joint,
        magnitude: f32,
        sequence: u64,
        snapshot: &Snapshot<'_>,
    ) -> Result<Option<String>> {
        if self.written >= self.max_per_session {
            if !self.cap_warned {
                log::warn!(
                    "screenshot limit ({}) reached for {}, further major errors are recorded without screenshots",
                    self.max_per_session,
                    session_id
                );
                self.cap_warned = true;
            }
            return Ok(None);
        }

        let mut annotated = snapshot.image.clone();
        draw_skeleton(&mut annotated, snapshot.body);
        let message = format!("{} {:.1} DEG", joint.label(), magnitude);
        annotate_error(&mut annotated, &message);

        fs::create_dir_all(&self.dir)?;
        let id = screenshot_id(session_id, sequence, joint, magnitude);
        let path = self.dir.join(&id);
        let mut writer = BufWriter::new(File::create(&path)?);
        JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).encode_image(&annotated)?;

        self.written += 1;
        log::debug!("saved screenshot {}", path.display());
        Ok(Some(id))
    }

    /// 保存済みスクリーンショットのバイト列を読む
    pub fn load(&self, id: &str) -> Result<Vec<u8>> {
        validate_id(id)?;
        match fs::read(self.dir.join(id)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TrackerError::ScreenshotNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
