//! Image normalisation: capture → patch-aligned RGB JPEG for the model.
//!
//! Vision encoders cut the image into square patches (28 px for GLM-OCR).
//! Sides that are not patch multiples, alpha channels and exotic colour
//! spaces crash some GGML backends outright, and very large captures blow
//! the memory budget. Every capture is therefore decoded, converted to RGB,
//! scaled down so neither side exceeds the maximum, snapped down to the
//! alignment unit and re-encoded as JPEG next to the original.
//!
//! Failure here is never fatal: the original capture is used instead.

use crate::config::OcrConfig;
use crate::debug_log::DebugLog;
use crate::paths;
use crate::status::StatusSink;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ImageError, ImageReader};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The image actually handed to the model.
///
/// When it is a derived copy it is deleted on drop, so every exit path of a
/// run cleans it up. The original capture is never deleted.
#[derive(Debug)]
pub struct SanitizedArtifact {
    path: PathBuf,
    derived: bool,
    width: u32,
    height: u32,
}

impl SanitizedArtifact {
    /// Use the original capture unchanged.
    fn original(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            derived: false,
            width: 0,
            height: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when this is a sanitized copy rather than the capture itself.
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    /// `(width, height)` of a derived copy; `None` for the original.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.derived.then_some((self.width, self.height))
    }

    /// Delete the derived copy now instead of at drop.
    pub fn discard(self) {
        drop(self);
    }
}

impl Drop for SanitizedArtifact {
    fn drop(&mut self) {
        if !self.derived {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed sanitized image {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }
}

/// Output dimensions for a `width × height` source.
///
/// Both sides are scaled by the same factor
/// `min(max_dim / width, max_dim / height, 1.0)`, floored, then
/// independently rounded down to a multiple of `unit` and finally raised to
/// `unit` if that rounded to zero.
pub fn target_dimensions(width: u32, height: u32, unit: u32, max_dim: u32) -> (u32, u32) {
    let unit = unit.max(1);
    let (w, h) = (width.max(1) as f64, height.max(1) as f64);
    let max = max_dim as f64;
    let scale = (max / w).min(max / h).min(1.0);

    let snap = |side: f64| -> u32 {
        let scaled = (side * scale).floor() as u32;
        (scaled - scaled % unit).max(unit)
    };
    (snap(w), snap(h))
}

/// Produce the image for inference from the capture at `source`.
///
/// Runs the CPU-bound decode/resize/encode on the blocking pool. Returns the
/// original capture when normalisation is disabled or fails; failures are
/// logged and reported as a warning.
pub async fn normalize(
    source: &Path,
    config: &OcrConfig,
    log: &DebugLog,
    status: &dyn StatusSink,
) -> SanitizedArtifact {
    if !config.normalize_images {
        debug!("Image normalisation disabled; using capture as-is");
        return SanitizedArtifact::original(source);
    }

    let src = source.to_path_buf();
    let dest = paths::sanitized_path(source);
    let unit = config.alignment_unit;
    let max_dim = config.max_dimension;
    let quality = config.jpeg_quality;

    let task_dest = dest.clone();
    let result = tokio::task::spawn_blocking(move || {
        sanitize_blocking(&src, &task_dest, unit, max_dim, quality)
    })
    .await;

    let outcome = match result {
        Ok(r) => r.map_err(|e| e.to_string()),
        Err(e) => Err(format!("sanitize task panicked: {e}")),
    };

    match outcome {
        Ok((width, height)) => {
            info!("Sanitized {} → {}x{}", source.display(), width, height);
            SanitizedArtifact {
                path: dest,
                derived: true,
                width,
                height,
            }
        }
        Err(detail) => {
            // A half-written copy must not linger.
            let _ = std::fs::remove_file(&dest);
            log.record("Sanitization Failed", &detail);
            status.warning("Image sanitization failed. Using original screenshot.");
            SanitizedArtifact::original(source)
        }
    }
}

/// Blocking implementation: decode, RGB, resize if needed, JPEG-encode.
fn sanitize_blocking(
    source: &Path,
    dest: &Path,
    unit: u32,
    max_dim: u32,
    quality: u8,
) -> Result<(u32, u32), ImageError> {
    let img = ImageReader::open(source)?.with_guessed_format()?.decode()?;
    let mut rgb = img.to_rgb8();
    let (w, h) = rgb.dimensions();
    let (new_w, new_h) = target_dimensions(w, h, unit, max_dim);

    if (new_w, new_h) != (w, h) {
        debug!("Resizing {}x{} → {}x{}", w, h, new_w, new_h);
        rgb = image::imageops::resize(&rgb, new_w, new_h, FilterType::Lanczos3);
    }

    let mut writer = BufWriter::new(File::create(dest)?);
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))?;
    writer.flush()?;
    Ok((new_w, new_h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::NoopStatus;
    use image::{DynamicImage, Rgba, RgbaImage};

    const UNIT: u32 = 28;
    const MAX: u32 = 1120;

    #[test]
    fn outputs_are_aligned_and_bounded() {
        let sides = [1, 5, 27, 28, 29, 55, 56, 300, 1119, 1120, 1121, 2000, 4000, 9999];
        for &w in &sides {
            for &h in &sides {
                let (nw, nh) = target_dimensions(w, h, UNIT, MAX);
                assert!(nw >= UNIT && nh >= UNIT, "{w}x{h} → {nw}x{nh}");
                assert_eq!(nw % UNIT, 0, "{w}x{h} → {nw}x{nh}");
                assert_eq!(nh % UNIT, 0, "{w}x{h} → {nw}x{nh}");
                assert!(nw <= MAX && nh <= MAX, "{w}x{h} → {nw}x{nh}");
            }
        }
    }

    #[test]
    fn conformant_sizes_are_untouched() {
        assert_eq!(target_dimensions(280, 56, UNIT, MAX), (280, 56));
        assert_eq!(target_dimensions(1120, 1120, UNIT, MAX), (1120, 1120));
    }

    #[test]
    fn large_images_keep_aspect_ratio() {
        assert_eq!(target_dimensions(2240, 1120, UNIT, MAX), (1120, 560));
    }

    #[test]
    fn tiny_images_are_raised_to_one_patch() {
        assert_eq!(target_dimensions(5, 3, UNIT, MAX), (28, 28));
        // A thin strip: the long side scales, the short side floors to one patch.
        assert_eq!(target_dimensions(4000, 10, UNIT, MAX), (1120, 28));
    }

    fn write_rgba_png(path: &Path, w: u32, h: u32) {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 128])));
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn normalize_writes_aligned_rgb_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("Screenshot_x.png");
        write_rgba_png(&src, 100, 50);
        let config = OcrConfig::default();
        let log = DebugLog::new(dir.path().join("log"));

        let out = normalize(&src, &config, &log, &NoopStatus).await;
        assert!(out.is_derived());
        assert_eq!(out.path(), dir.path().join("Screenshot_x.temp.jpg"));
        assert_eq!(out.dimensions(), Some((84, 28)));

        let decoded = image::open(out.path()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
        assert_eq!((decoded.width(), decoded.height()), (84, 28));
        // Source untouched.
        assert_eq!(image::image_dimensions(&src).unwrap(), (100, 50));
    }

    #[tokio::test]
    async fn conformant_capture_is_still_recompressed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shot.png");
        write_rgba_png(&src, 56, 28);
        let out = normalize(&src, &OcrConfig::default(), &DebugLog::new(dir.path().join("log")), &NoopStatus).await;
        assert!(out.is_derived());
        assert_eq!(out.dimensions(), Some((56, 28)));
    }

    #[tokio::test]
    async fn unreadable_capture_falls_back_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.png");
        std::fs::write(&src, b"not an image").unwrap();
        let log = DebugLog::new(dir.path().join("ocr_debug.log"));

        let out = normalize(&src, &OcrConfig::default(), &log, &NoopStatus).await;
        assert!(!out.is_derived());
        assert_eq!(out.path(), src);
        assert!(!dir.path().join("broken.temp.jpg").exists());
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert!(text.contains("Sanitization Failed"));
    }

    #[tokio::test]
    async fn disabled_normalisation_returns_original() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shot.png");
        write_rgba_png(&src, 100, 50);
        let config = OcrConfig::builder().normalize_images(false).build().unwrap();
        let out = normalize(&src, &config, &DebugLog::new(dir.path().join("log")), &NoopStatus).await;
        assert!(!out.is_derived());
        assert_eq!(out.dimensions(), None);
    }

    #[tokio::test]
    async fn dropping_removes_only_the_derived_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("shot.png");
        write_rgba_png(&src, 100, 50);
        let out = normalize(&src, &OcrConfig::default(), &DebugLog::new(dir.path().join("log")), &NoopStatus).await;
        let derived = out.path().to_path_buf();
        assert!(derived.exists());

        out.discard();
        assert!(!derived.exists());
        assert!(src.exists());
    }
}
