//! One image through one detector, every stage returning early with its failure

use crate::bbox::to_regions;
use crate::detection::Detector;
use crate::output::{Failure, ImageInfo, Report};
use crate::preprocess::read_image;
use log::{debug, info};
use std::path::{Path, PathBuf};

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Detect regions in the image at `image_path`.
///
/// `load` builds the detector once the image is known to be readable. It reports its own
/// failures (missing model configuration, model init) so each caller keeps its wording.
pub fn run<D, F>(image_path: &Path, score_threshold: f32, load: F) -> Report
where
    D: Detector,
    F: FnOnce() -> Result<D, Failure>,
{
    let path = absolute(image_path);
    if !path.exists() {
        return Report::failure(Failure::ImageNotFound(path), None);
    }

    let image = match read_image(&path) {
        Ok(image) => image,
        Err(e) => {
            let failure = Failure::ImageReadFailed {
                path,
                message: e.to_string(),
            };
            return Report::failure(failure, None);
        }
    };
    let image_info = ImageInfo::new(&image, &path);
    debug!("read image {:?}", image_info);

    let mut detector = match load() {
        Ok(detector) => detector,
        Err(failure) => return Report::failure(failure, Some(image_info)),
    };

    let detections = match detector.detect(&image, score_threshold) {
        Ok(detections) => detections,
        Err(e) => {
            return Report::failure(Failure::DetectFailed(e.to_string()), Some(image_info))
        }
    };
    let boxes = to_regions(&detections, image_info.size());
    info!(
        "{} regions from {} detections above {}",
        boxes.len(),
        detections.len(),
        score_threshold
    );
    Report::success(boxes, image_info)
}
