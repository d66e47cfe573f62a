use super::session::{build_session, OutputData, OutputTensor};
use super::Detector;
use crate::bbox::Detection;
use crate::config::{DetectronConfig, DeviceType};
use crate::error::{DetectError, Result};
use crate::postprocess::{decode_detectron, LabelMap};
use crate::preprocess::{image_to_tensor, resize_image, resize_shortest_edge_size, Normalization};
use candle_core::{Device, Tensor};
use image::RgbImage;
use log::{debug, info, warn};
use ort::session::Session;
use std::path::Path;
use std::time::Instant;

/// A Detectron2 R-CNN exported to ONNX by tracing.
///
/// The graph takes one `(3, H, W)` image in the configured channel order with raw 0..255 values
/// and returns boxes, classes and (last) scores in the resized input's coordinates.
pub struct Detectron2Detector {
    session: Session,
    config: DetectronConfig,
    labels: LabelMap,
    input_name: String,
}

impl Detectron2Detector {
    pub fn new<P: AsRef<Path>>(
        config_path: P,
        weights_path: P,
        label_names: &[String],
        device: DeviceType,
    ) -> Result<Self> {
        let config = DetectronConfig::from_file(config_path)?;
        let labels = LabelMap::from_list(label_names);
        if let Some(num_classes) = config.model.roi_heads.num_classes {
            if num_classes != labels.len() {
                warn!(
                    "model has {} classes but {} labels were given",
                    num_classes,
                    labels.len()
                );
            }
        }
        let session = build_session(weights_path.as_ref(), device)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| DetectError::ModelOutput("model declares no inputs".to_owned()))?;
        info!(
            "loaded detectron2 model, input {:?} {:?}, labels {:?}",
            config.input, input_name, label_names
        );
        Ok(Self {
            session,
            config,
            labels,
            input_name,
        })
    }

    fn run(&mut self, image: &Tensor) -> Result<DetectronOutputs> {
        let dims = image.dims().to_vec();
        let data = image.flatten_all()?.to_vec1::<f32>()?;
        let input =
            ort::value::Tensor::from_array((dims.as_slice(), data)).map_err(DetectError::ort)?;
        let input_name = self.input_name.clone();
        let outputs = self
            .session
            .run(ort::inputs![input_name => input])
            .map_err(DetectError::ort)?;
        let tensors: Vec<OutputTensor> = outputs
            .iter()
            .filter_map(|(name, value)| OutputTensor::from_value(name, &value))
            .collect();
        debug!(
            "outputs: {:?}",
            tensors
                .iter()
                .map(|t| (&t.name, &t.shape))
                .collect::<Vec<_>>()
        );
        select_outputs(&tensors)
    }
}

/// boxes `(N, 4)`, classes and scores `(N,)`, in the resized input's coordinates
#[derive(Debug, Clone, PartialEq)]
struct DetectronOutputs {
    boxes: Vec<f32>,
    classes: Vec<i64>,
    scores: Vec<f32>,
}

/// Pick the boxes, classes and scores out of an exported model's outputs.
///
/// Tracing exports return `pred_boxes, pred_classes, [pred_masks,] scores, image_size`, caffe2
/// exports return boxes, scores, classes (float). Names are used when the graph keeps them,
/// otherwise outputs are told apart by element type and shape.
fn select_outputs(outputs: &[OutputTensor]) -> Result<DetectronOutputs> {
    let boxes_at = outputs
        .iter()
        .position(|t| t.is_float() && t.shape.len() == 2 && t.shape[1] == 4)
        .ok_or_else(|| DetectError::ModelOutput("no (N, 4) boxes output".to_owned()))?;
    let rows = outputs[boxes_at].shape[0];
    let per_box: Vec<usize> = (0..outputs.len())
        .filter(|&i| i != boxes_at && outputs[i].shape == [rows])
        .collect();
    let named = |key: &str| per_box.iter().copied().find(|&i| outputs[i].name_contains(key));

    let scores_at = named("score")
        .filter(|&i| outputs[i].is_float())
        .or_else(|| {
            let classes_by_name = named("class");
            per_box
                .iter()
                .copied()
                .find(|&i| outputs[i].is_float() && Some(i) != classes_by_name)
        })
        .ok_or_else(|| DetectError::ModelOutput("no (N,) scores output".to_owned()))?;
    let classes_at = named("class")
        .filter(|&i| i != scores_at)
        .or_else(|| per_box.iter().copied().find(|&i| outputs[i].is_int()))
        .or_else(|| {
            per_box
                .iter()
                .copied()
                .find(|&i| outputs[i].is_float() && i != scores_at)
        })
        .ok_or_else(|| DetectError::ModelOutput("no (N,) classes output".to_owned()))?;

    let classes = match &outputs[classes_at].data {
        OutputData::Int(classes) => classes.clone(),
        // non-finite ids map to -1 and are dropped when decoding
        OutputData::Float(classes) => classes
            .iter()
            .map(|&c| if c.is_finite() { c.round() as i64 } else { -1 })
            .collect(),
    };
    Ok(DetectronOutputs {
        boxes: outputs[boxes_at].floats().unwrap_or_default().to_vec(),
        classes,
        scores: outputs[scores_at].floats().unwrap_or_default().to_vec(),
    })
}

impl Detector for Detectron2Detector {
    fn detect(&mut self, image: &RgbImage, score_threshold: f32) -> Result<Vec<Detection>> {
        let original_size = image.dimensions();
        let input = &self.config.input;
        let input_size =
            resize_shortest_edge_size(original_size, input.min_size_test, input.max_size_test);
        let resized = resize_image(image, input_size);
        let normalization = Normalization::identity(input.format);
        let tensor = image_to_tensor(&resized, &normalization, &Device::Cpu)?;

        info!("starting detectron2 inference on {:?} input...", input_size);
        let now = Instant::now();
        let outputs = self.run(&tensor)?;
        info!("inference took {:.3}s", now.elapsed().as_secs_f32());

        Ok(decode_detectron(
            &outputs.boxes,
            &outputs.classes,
            &outputs.scores,
            &self.labels,
            input_size,
            original_size,
            score_threshold,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float(name: &str, shape: &[i64], data: Vec<f32>) -> OutputTensor {
        OutputTensor {
            name: name.to_owned(),
            shape: shape.to_vec(),
            data: OutputData::Float(data),
        }
    }

    fn int(name: &str, shape: &[i64], data: Vec<i64>) -> OutputTensor {
        OutputTensor {
            name: name.to_owned(),
            shape: shape.to_vec(),
            data: OutputData::Int(data),
        }
    }

    fn boxes() -> Vec<f32> {
        vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0]
    }

    fn expected() -> DetectronOutputs {
        DetectronOutputs {
            boxes: boxes(),
            classes: vec![0, 1],
            scores: vec![0.9, 0.4],
        }
    }

    #[test]
    fn test_tracing_layout_with_image_size() {
        // traced graphs lose their output names
        let outputs = vec![
            float("boxes", &[2, 4], boxes()),
            int("1507", &[2], vec![0, 1]),
            float("1511", &[2], vec![0.9, 0.4]),
            int("1512", &[2], vec![800, 1035]),
        ];
        assert_eq!(select_outputs(&outputs).unwrap(), expected());
    }

    #[test]
    fn test_tracing_layout_with_masks() {
        let outputs = vec![
            float("pred_boxes", &[2, 4], boxes()),
            int("pred_classes", &[2], vec![0, 1]),
            float("pred_masks", &[2, 1, 28, 28], vec![0.0; 2 * 28 * 28]),
            float("scores", &[2], vec![0.9, 0.4]),
            int("image_size", &[2], vec![800, 1035]),
        ];
        assert_eq!(select_outputs(&outputs).unwrap(), expected());
    }

    #[test]
    fn test_caffe2_layout() {
        let outputs = vec![
            float("bbox_nms", &[2, 4], boxes()),
            float("score_nms", &[2], vec![0.9, 0.4]),
            float("class_nms", &[2], vec![0.0, 1.0]),
        ];
        assert_eq!(select_outputs(&outputs).unwrap(), expected());

        // unnamed, scores come before classes
        let outputs = vec![
            float("0", &[2, 4], boxes()),
            float("1", &[2], vec![0.9, 0.4]),
            float("2", &[2], vec![0.0, 1.0]),
        ];
        assert_eq!(select_outputs(&outputs).unwrap(), expected());
    }

    #[test]
    fn test_named_outputs_in_any_order() {
        let outputs = vec![
            float("boxes", &[1, 4], vec![1.0, 2.0, 3.0, 4.0]),
            float("scores", &[1], vec![0.7]),
            int("classes", &[1], vec![3]),
        ];
        let selected = select_outputs(&outputs).unwrap();
        assert_eq!(selected.classes, vec![3]);
        assert_eq!(selected.scores, vec![0.7]);
    }

    #[test]
    fn test_no_detections() {
        let outputs = vec![
            float("boxes", &[0, 4], Vec::new()),
            int("classes", &[0], Vec::new()),
            float("scores", &[0], Vec::new()),
            int("image_size", &[2], vec![800, 1035]),
        ];
        let selected = select_outputs(&outputs).unwrap();
        assert!(selected.boxes.is_empty());
        assert!(selected.classes.is_empty());
        assert!(selected.scores.is_empty());
    }

    #[test]
    fn test_missing_outputs() {
        let outputs = vec![int("image_size", &[2], vec![800, 1035])];
        assert_eq!(
            select_outputs(&outputs).unwrap_err().to_string(),
            "unexpected model output: no (N, 4) boxes output"
        );
        let outputs = vec![
            float("boxes", &[2, 4], boxes()),
            int("classes", &[2], vec![0, 1]),
        ];
        assert_eq!(
            select_outputs(&outputs).unwrap_err().to_string(),
            "unexpected model output: no (N,) scores output"
        );
    }
}
