// THEORY:
// The `LightSegmenter` is the spatial layer of the engine. It looks at exactly one
// frame and answers "where are the lamps right now?" without any memory of the
// frames before it, which is what makes it safe to run on many frames at once.
//
// Algorithm:
// 1.  **Colour masks**: every pixel is converted to HSV and tested against two
//     masks. "Bright" pixels are nearly colourless and above the intensity
//     threshold (white/clear lamps). "Amber" pixels sit inside the yellow/orange
//     hue band with enough saturation and value (turn signals, hazards).
// 2.  **Morphology**: the union of both masks is closed (to merge a lamp that the
//     threshold split into fragments) and then opened (to drop speckle noise),
//     both with a square structuring element.
// 3.  **Connected regions**: 8-connected components of the cleaned mask become
//     candidate regions. Area, bounding box, centroid, mean luma and a colour
//     vote are accumulated in one pass over the label image.
// 4.  **Shape filtering**: regions that are too small, too large or too elongated
//     to be a lamp are discarded.
//
// Detections are returned in label order, which callers must not rely on.

use crate::config::DetectionConfig;
use crate::core_modules::detection::{BoundingBox, Detection, LightColor, Point};
use crate::core_modules::pixel::pixel::Pixel;
use crate::error::InputError;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{Connectivity, connected_components};
use tracing::debug;

const CHANNELS: usize = 4;
const MASK_ON: Luma<u8> = Luma([255u8]);
const MASK_OFF: Luma<u8> = Luma([0u8]);

/// Checks that `frame` is an RGBA8 buffer of `width` x `height`.
pub fn validate_frame(frame: &[u8], width: u32, height: u32) -> Result<(), InputError> {
    if width == 0 || height == 0 {
        return Err(InputError::EmptyFrame { width, height });
    }
    let expected = width as usize * height as usize * CHANNELS;
    if frame.len() != expected {
        return Err(InputError::BufferSize {
            width,
            height,
            expected,
            actual: frame.len(),
        });
    }
    Ok(())
}

/// Finds every candidate light region in one RGBA frame.
pub fn segment(
    frame: &[u8],
    width: u32,
    height: u32,
    config: &DetectionConfig,
) -> Result<Vec<Detection>, InputError> {
    validate_frame(frame, width, height)?;

    // --- 1. Colour masks ---
    let pixel_count = width as usize * height as usize;
    let mut mask = GrayImage::from_pixel(width, height, MASK_OFF);
    let mut amber_hits = vec![false; pixel_count];
    let mut white_hits = vec![false; pixel_count];

    for index in 0..pixel_count {
        let hsv = Pixel::from_rgba_buffer(frame, index).hsv();
        let is_white = hsv.saturation <= config.white.max_saturation
            && hsv.value >= config.intensity_threshold;
        let is_amber = hsv.hue >= config.amber.hue_min
            && hsv.hue <= config.amber.hue_max
            && hsv.saturation >= config.amber.min_saturation
            && hsv.value >= config.amber.min_value;

        if is_white || is_amber {
            let x = (index % width as usize) as u32;
            let y = (index / width as usize) as u32;
            mask.put_pixel(x, y, MASK_ON);
        }
        white_hits[index] = is_white;
        amber_hits[index] = is_amber;
    }

    // --- 2. Morphology ---
    let radius = (config.morphology_kernel_size / 2).min(u8::MAX as u32) as u8;
    if radius > 0 {
        mask = close(&mask, Norm::LInf, radius);
        mask = open(&mask, Norm::LInf, radius);
    }

    // --- 3. Connected regions ---
    let labels = connected_components(&mask, Connectivity::Eight, MASK_OFF);
    let mut regions: Vec<RegionAccumulator> = Vec::new();

    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0];
        if label == 0 {
            continue;
        }
        let slot = (label - 1) as usize;
        if slot >= regions.len() {
            regions.resize_with(slot + 1, RegionAccumulator::default);
        }
        let index = y as usize * width as usize + x as usize;
        let luma = Pixel::from_rgba_buffer(frame, index).luminance();
        regions[slot].add(x, y, luma, amber_hits[index], white_hits[index]);
    }

    // --- 4. Aggregation & shape filtering ---
    let candidates = regions.len();
    let detections: Vec<Detection> = regions
        .into_iter()
        .filter_map(|region| region.into_detection(config))
        .collect();

    debug!(
        candidates,
        detections = detections.len(),
        "segmented frame"
    );
    Ok(detections)
}

/// Single-pass statistics for one labelled region.
#[derive(Debug, Clone)]
struct RegionAccumulator {
    area: u32,
    sum_x: f64,
    sum_y: f64,
    sum_luma: f64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    amber_votes: u32,
    white_votes: u32,
}

impl Default for RegionAccumulator {
    fn default() -> Self {
        Self {
            area: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_luma: 0.0,
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
            amber_votes: 0,
            white_votes: 0,
        }
    }
}

impl RegionAccumulator {
    fn add(&mut self, x: u32, y: u32, luma: f64, is_amber: bool, is_white: bool) {
        self.area += 1;
        self.sum_x += x as f64;
        self.sum_y += y as f64;
        self.sum_luma += luma;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        if is_amber {
            self.amber_votes += 1;
        }
        if is_white {
            self.white_votes += 1;
        }
    }

    fn into_detection(self, config: &DetectionConfig) -> Option<Detection> {
        if self.area < config.min_area || self.area > config.max_area {
            return None;
        }

        let bounding_box = BoundingBox::new(
            self.min_x,
            self.min_y,
            self.max_x - self.min_x + 1,
            self.max_y - self.min_y + 1,
        );
        if !config.aspect_ratio_range.contains(bounding_box.aspect_ratio()) {
            return None;
        }

        let area = self.area as f64;
        let color = if self.amber_votes > self.white_votes {
            LightColor::Amber
        } else {
            LightColor::White
        };

        Some(Detection {
            bounding_box,
            centroid: Point::new(self.sum_x / area, self.sum_y / area),
            area: self.area,
            mean_intensity: self.sum_luma / area,
            color,
        })
    }
}

/// Segmenter bound to one frame size and detection config.
#[derive(Debug, Clone)]
pub struct LightSegmenter {
    width: u32,
    height: u32,
    config: DetectionConfig,
}

impl LightSegmenter {
    pub fn new(width: u32, height: u32, config: DetectionConfig) -> Self {
        Self {
            width,
            height,
            config,
        }
    }

    pub fn segment(&self, frame: &[u8]) -> Result<Vec<Detection>, InputError> {
        segment(frame, self.width, self.height, &self.config)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
