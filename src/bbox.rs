//! Raw detections and the clamped boxes written to the output

use log::debug;
use serde::Serialize;

/// a decoded model detection, corners in original image pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: [f32; 4],
    pub score: f32,
    pub label: String,
}

impl Detection {
    pub fn new(bbox: [f32; 4], score: f32, label: impl Into<String>) -> Self {
        Self {
            bbox,
            score,
            label: label.into(),
        }
    }
}

/// output box, top-left corner plus extent, always inside the image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub score: f32,
    pub label: String,
}

/// clamp one axis: returns the start and the extent, both truncated to whole pixels
fn clamp_axis(lo: f32, hi: f32, limit: f32) -> (u32, u32) {
    let start = lo.clamp(0.0, limit);
    let extent = (hi.min(limit) - start).max(0.0);
    (start as u32, extent as u32)
}

impl Region {
    /// Map a detection into image bounds `(width, height)`.
    ///
    /// Returns `None` when the detection cannot be converted (non-finite coordinates or score, or
    /// an empty label), those are skipped rather than failing the whole result.
    pub fn from_detection(detection: &Detection, image_size: (u32, u32)) -> Option<Self> {
        let [x1, y1, x2, y2] = detection.bbox;
        if !detection.bbox.iter().all(|v| v.is_finite()) || !detection.score.is_finite() {
            debug!("skipping non-finite detection {:?}", detection);
            return None;
        }
        if detection.label.is_empty() {
            debug!("skipping unlabeled detection {:?}", detection);
            return None;
        }
        let (width, height) = (image_size.0 as f32, image_size.1 as f32);
        let (x, w) = clamp_axis(x1, x2, width);
        let (y, h) = clamp_axis(y1, y2, height);
        Some(Self {
            x,
            y,
            w,
            h,
            score: detection.score.max(0.0),
            label: detection.label.clone(),
        })
    }
}

/// convert all detections, dropping any that fail
pub fn to_regions(detections: &[Detection], image_size: (u32, u32)) -> Vec<Region> {
    detections
        .iter()
        .filter_map(|d| Region::from_detection(d, image_size))
        .collect()
}
