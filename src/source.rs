// THEORY:
// Frame acquisition is the one place the engine waits on the outside world, so
// it sits behind the `FrameSource` trait. The pipelines only ever ask for "the
// next frame, as an RGBA8 buffer"; whether that comes from a camera, a decoder
// or a folder of stills is the source's business.

use crate::error::VisionError;
use image::ImageReader;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions `ImageSequenceSource` picks up, compared case-insensitively.
const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

/// A producer of RGBA8 frames in capture order.
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream. `Some(Err(_))` is one unreadable
    /// frame; the stream may continue after it.
    ///
    /// Must be cancel-safe: dropping the future before it completes must not
    /// lose a frame.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Vec<u8>, VisionError>>> + Send;

    /// Capture rate in Hz, when the source knows it.
    fn frame_rate(&self) -> Option<f64> {
        None
    }
}

/// A decoded frame and its size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Decodes one image file to RGBA8.
pub fn decode_image(path: &Path) -> Result<DecodedFrame, VisionError> {
    let image = ImageReader::open(path)
        .map_err(|err| VisionError::Source(format!("{}: {err}", path.display())))?
        .with_guessed_format()
        .map_err(|err| VisionError::Source(format!("{}: {err}", path.display())))?
        .decode()
        .map_err(|err| VisionError::Source(format!("{}: {err}", path.display())))?
        .to_rgba8();
    Ok(DecodedFrame {
        width: image.width(),
        height: image.height(),
        rgba: image.into_raw(),
    })
}

/// Plays back a directory of still images, in lexical file-name order.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    cursor: usize,
    frame_rate: Option<f64>,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, VisionError> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .map_err(|err| VisionError::Source(format!("{}: {err}", dir.display())))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| VisionError::Source(format!("{}: {err}", dir.display())))?
                .path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    IMAGE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                });
            if path.is_file() && is_image {
                paths.push(path);
            }
        }
        paths.sort();
        info!(dir = %dir.display(), frames = paths.len(), "opened image sequence");

        Ok(Self {
            paths,
            cursor: 0,
            frame_rate: None,
        })
    }

    /// Declares the rate the stills were captured at.
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Size of the first frame, for configs that leave the frame size unset.
    pub fn probe_dimensions(&self) -> Result<Option<(u32, u32)>, VisionError> {
        let Some(first) = self.paths.first() else {
            return Ok(None);
        };
        let (width, height) = image::image_dimensions(first)
            .map_err(|err| VisionError::Source(format!("{}: {err}", first.display())))?;
        Ok(Some((width, height)))
    }
}

impl FrameSource for ImageSequenceSource {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, VisionError>> {
        let path = self.paths.get(self.cursor)?.clone();
        let decoded = tokio::task::spawn_blocking(move || decode_image(&path))
            .await
            .map_err(|err| VisionError::Source(err.to_string()))
            .and_then(|result| result);
        // Advance only once the frame is in hand.
        self.cursor += 1;
        debug!(frame = self.cursor - 1, ok = decoded.is_ok(), "read frame");
        Some(decoded.map(|frame| frame.rgba))
    }

    fn frame_rate(&self) -> Option<f64> {
        self.frame_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn write_frame(dir: &Path, name: &str, level: u8) {
        let image = RgbaImage::from_pixel(4, 3, Rgba([level, level, level, 255]));
        image.save(dir.join(name)).expect("save frame");
    }

    #[tokio::test]
    async fn plays_frames_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_frame(dir.path(), "frame_002.png", 20);
        write_frame(dir.path(), "frame_001.png", 10);
        write_frame(dir.path(), "frame_003.png", 30);
        std::fs::write(dir.path().join("notes.txt"), "not a frame").expect("write");

        let mut source = ImageSequenceSource::open(dir.path()).expect("open");
        assert_eq!(source.len(), 3);
        assert_eq!(source.probe_dimensions().expect("probe"), Some((4, 3)));

        let mut first_bytes = Vec::new();
        while let Some(frame) = source.next_frame().await {
            let frame = frame.expect("decodable frame");
            assert_eq!(frame.len(), 4 * 3 * 4);
            first_bytes.push(frame[0]);
        }
        assert_eq!(first_bytes, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_single_bad_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_frame(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("b.png"), b"garbage").expect("write");
        write_frame(dir.path(), "c.png", 30);

        let mut source = ImageSequenceSource::open(dir.path()).expect("open");
        assert!(source.next_frame().await.expect("frame a").is_ok());
        let bad = source.next_frame().await.expect("frame b");
        assert!(matches!(bad, Err(VisionError::Source(_))));
        assert!(source.next_frame().await.expect("frame c").is_ok());
        assert!(source.next_frame().await.is_none());
    }

    #[test]
    fn missing_directory_is_a_source_error() {
        assert!(ImageSequenceSource::open("/no/such/frames").is_err());
    }

    #[test]
    fn frame_rate_is_opt_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = ImageSequenceSource::open(dir.path()).expect("open");
        assert!(source.is_empty());
        assert_eq!(source.frame_rate(), None);
        assert_eq!(source.with_frame_rate(15.0).frame_rate(), Some(15.0));
    }
}
