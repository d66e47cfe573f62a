//! Detection module: pretrained detectors run as ONNX graphs, with the pre and post processing
//! their original frameworks apply around them

mod detectron;
mod detr;
pub mod session;

use crate::bbox::Detection;
use crate::error::Result;
pub use detectron::Detectron2Detector;
pub use detr::DetrDetector;
use image::RgbImage;

pub trait Detector {
    /// detections scoring above `score_threshold`, corners in `image` pixels
    fn detect(&mut self, image: &RgbImage, score_threshold: f32) -> Result<Vec<Detection>>;
}
