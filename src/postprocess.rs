//! Decoding raw model outputs into [Detection]s in original image pixels

use crate::bbox::Detection;
use crate::error::{DetectError, Result};
use candle_core::{Device, Tensor, D};
use log::debug;
use std::collections::HashMap;

/// class id to name table, unknown ids resolve to their decimal string
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelMap(HashMap<usize, String>);

impl LabelMap {
    pub fn new(labels: HashMap<usize, String>) -> Self {
        Self(labels)
    }

    /// contiguous ids `0..labels.len()`
    pub fn from_list(labels: &[String]) -> Self {
        Self(labels.iter().cloned().enumerate().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn resolve(&self, id: usize) -> String {
        match self.0.get(&id) {
            Some(label) if !label.is_empty() => label.clone(),
            _ => id.to_string(),
        }
    }
}

/// How class scores are read out of DETR-family logits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreDecoding {
    /// softmax over classes, the last class is "no object"
    Softmax,
    /// independent sigmoid per class, then the top `k` (query, class) pairs
    SigmoidTopK(Option<usize>),
}

impl ScoreDecoding {
    pub fn for_model_type(model_type: &str) -> Self {
        match model_type {
            "detr" | "table-transformer" | "yolos" => Self::Softmax,
            t if t.starts_with("rt_detr") => Self::SigmoidTopK(None),
            _ => Self::SigmoidTopK(Some(100)),
        }
    }
}

/// `(num_queries, 4)` normalized center boxes to absolute corners
fn center_to_corners(boxes: &Tensor, (width, height): (u32, u32)) -> Result<Tensor> {
    let cx = boxes.narrow(1, 0, 1)?;
    let cy = boxes.narrow(1, 1, 1)?;
    let half_w = boxes.narrow(1, 2, 1)?.affine(0.5, 0.0)?;
    let half_h = boxes.narrow(1, 3, 1)?.affine(0.5, 0.0)?;
    let corners = Tensor::cat(
        &[
            (&cx - &half_w)?,
            (&cy - &half_h)?,
            (&cx + &half_w)?,
            (&cy + &half_h)?,
        ],
        1,
    )?;
    let scale = Tensor::new(
        &[
            width as f32,
            height as f32,
            width as f32,
            height as f32,
        ],
        boxes.device(),
    )?;
    Ok(corners.broadcast_mul(&scale)?)
}

/// raw `logits` and `pred_boxes` of one image, as returned by ONNX Runtime
#[derive(Debug, Clone)]
pub struct DetrOutputs {
    pub num_queries: usize,
    pub num_classes: usize,
    pub logits: Vec<f32>,
    pub pred_boxes: Vec<f32>,
}

impl DetrOutputs {
    /// `logits_shape` is `(1, queries, classes)` or `(queries, classes)`
    pub fn new(logits_shape: &[usize], logits: Vec<f32>, pred_boxes: Vec<f32>) -> Result<Self> {
        let (num_queries, num_classes) = match logits_shape {
            [1, q, c] | [q, c] => (*q, *c),
            other => {
                return Err(DetectError::ModelOutput(format!(
                    "logits must be (1, queries, classes), got {other:?}"
                )))
            }
        };
        if logits.len() != num_queries * num_classes {
            return Err(DetectError::ModelOutput(format!(
                "logits hold {} values, expected {}",
                logits.len(),
                num_queries * num_classes
            )));
        }
        if pred_boxes.len() != num_queries * 4 {
            return Err(DetectError::ModelOutput(format!(
                "pred_boxes hold {} values, expected {}",
                pred_boxes.len(),
                num_queries * 4
            )));
        }
        Ok(Self {
            num_queries,
            num_classes,
            logits,
            pred_boxes,
        })
    }
}

/// Post-process DETR-family outputs, keeping detections scoring above `threshold`.
pub fn decode_detr(
    outputs: &DetrOutputs,
    decoding: ScoreDecoding,
    labels: &LabelMap,
    image_size: (u32, u32),
    threshold: f32,
) -> Result<Vec<Detection>> {
    let device = Device::Cpu;
    let (queries, classes) = (outputs.num_queries, outputs.num_classes);
    let logits = Tensor::from_slice(&outputs.logits, (queries, classes), &device)?;
    let boxes = Tensor::from_slice(&outputs.pred_boxes, (queries, 4), &device)?;
    let corners = center_to_corners(&boxes, image_size)?.to_vec2::<f32>()?;

    // (score, query, class) triples
    let candidates: Vec<(f32, usize, usize)> = match decoding {
        ScoreDecoding::Softmax => {
            if classes < 2 {
                return Err(DetectError::ModelOutput(format!(
                    "softmax decoding needs a no-object class, got {classes} classes"
                )));
            }
            let probs = candle_nn::ops::softmax_last_dim(&logits)?
                .narrow(1, 0, classes - 1)?
                .contiguous()?;
            let scores = probs.max(D::Minus1)?.to_vec1::<f32>()?;
            let class_ids = probs.argmax(D::Minus1)?.to_vec1::<u32>()?;
            scores
                .into_iter()
                .zip(class_ids)
                .enumerate()
                .map(|(query, (score, class))| (score, query, class as usize))
                .collect()
        }
        ScoreDecoding::SigmoidTopK(k) => {
            let total = queries * classes;
            let k = k.unwrap_or(queries).min(total);
            // sigmoid(x) = 1 / (1 + exp(-x))
            let probs = logits
                .flatten_all()?
                .neg()?
                .exp()?
                .affine(1.0, 1.0)?
                .recip()?;
            let order = probs.arg_sort_last_dim(false)?.narrow(0, 0, k)?;
            let scores = probs.index_select(&order, 0)?.to_vec1::<f32>()?;
            let order = order.to_vec1::<u32>()?;
            scores
                .into_iter()
                .zip(order)
                .map(|(score, flat)| {
                    let flat = flat as usize;
                    (score, flat / classes, flat % classes)
                })
                .collect()
        }
    };

    let detections: Vec<Detection> = candidates
        .into_iter()
        .filter(|(score, _, _)| *score > threshold)
        .map(|(score, query, class)| {
            let c = &corners[query];
            Detection::new([c[0], c[1], c[2], c[3]], score, labels.resolve(class))
        })
        .collect();
    debug!(
        "{} of {} queries above threshold {}",
        detections.len(),
        queries,
        threshold
    );
    Ok(detections)
}

/// Rescale Detectron2 export outputs from the resized input back to the original image and keep
/// detections scoring above `threshold`.
///
/// `boxes` holds `(x1, y1, x2, y2)` per detection. Detections without a matching class or score
/// are dropped.
pub fn decode_detectron(
    boxes: &[f32],
    classes: &[i64],
    scores: &[f32],
    labels: &LabelMap,
    resized: (u32, u32),
    original: (u32, u32),
    threshold: f32,
) -> Vec<Detection> {
    let num_boxes = boxes.len() / 4;
    if num_boxes != classes.len() || num_boxes != scores.len() {
        debug!(
            "output length mismatch: {} boxes, {} classes, {} scores",
            num_boxes,
            classes.len(),
            scores.len()
        );
    }
    let scale_x = original.0 as f32 / resized.0.max(1) as f32;
    let scale_y = original.1 as f32 / resized.1.max(1) as f32;
    boxes
        .chunks_exact(4)
        .zip(classes)
        .zip(scores)
        .filter(|(_, score)| **score > threshold)
        .filter_map(|((b, class), score)| {
            let class = usize::try_from(*class).ok()?;
            Some(Detection::new(
                [b[0] * scale_x, b[1] * scale_y, b[2] * scale_x, b[3] * scale_y],
                *score,
                labels.resolve(class),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn labels() -> LabelMap {
        LabelMap::from_list(&["Text".to_owned(), "Table".to_owned()])
    }

    #[test]
    fn test_label_map_fallback() {
        let labels = labels();
        assert_eq!(labels.resolve(1), "Table");
        assert_eq!(labels.resolve(7), "7");
        let labels = LabelMap::new(HashMap::from([(0, String::new())]));
        assert_eq!(labels.resolve(0), "0");
    }

    #[test]
    fn test_score_decoding_for_model_type() {
        assert_eq!(ScoreDecoding::for_model_type("detr"), ScoreDecoding::Softmax);
        assert_eq!(
            ScoreDecoding::for_model_type("deformable_detr"),
            ScoreDecoding::SigmoidTopK(Some(100))
        );
        assert_eq!(
            ScoreDecoding::for_model_type("rt_detr_v2"),
            ScoreDecoding::SigmoidTopK(None)
        );
    }

    #[test]
    fn test_detr_outputs_shape_checks() {
        assert!(DetrOutputs::new(&[1, 2, 3], vec![0.0; 6], vec![0.0; 8]).is_ok());
        assert!(DetrOutputs::new(&[2, 3], vec![0.0; 6], vec![0.0; 8]).is_ok());
        assert!(DetrOutputs::new(&[2, 2, 3], vec![0.0; 12], vec![0.0; 8]).is_err());
        assert!(DetrOutputs::new(&[1, 2, 3], vec![0.0; 5], vec![0.0; 8]).is_err());
        assert!(DetrOutputs::new(&[1, 2, 3], vec![0.0; 6], vec![0.0; 7]).is_err());
    }

    #[test]
    fn test_decode_detr_softmax() -> Result<()> {
        // query 0 is confidently Table, query 1 is mostly no-object
        let outputs = DetrOutputs::new(
            &[1, 2, 3],
            vec![0.0, 5.0, 0.0, 0.0, 0.0, 6.0],
            vec![0.5, 0.5, 0.2, 0.4, 0.1, 0.1, 0.1, 0.1],
        )?;
        let detections =
            decode_detr(&outputs, ScoreDecoding::Softmax, &labels(), (200, 100), 0.5)?;
        assert_eq!(detections.len(), 1);
        let detection = &detections[0];
        assert_eq!(detection.label, "Table");
        let expected = 5f32.exp() / (2.0 + 5f32.exp());
        assert_approx_eq!(f32, detection.score, expected, epsilon = 1e-5);
        let [x1, y1, x2, y2] = detection.bbox;
        assert_approx_eq!(f32, x1, 80.0, epsilon = 1e-3);
        assert_approx_eq!(f32, y1, 30.0, epsilon = 1e-3);
        assert_approx_eq!(f32, x2, 120.0, epsilon = 1e-3);
        assert_approx_eq!(f32, y2, 70.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_decode_detr_sigmoid_topk() -> Result<()> {
        let outputs = DetrOutputs::new(
            &[1, 3, 2],
            vec![-4.0, 1.0, 3.0, -4.0, 0.5, 2.0],
            vec![
                0.5, 0.5, 1.0, 1.0, //
                0.25, 0.25, 0.5, 0.5, //
                0.75, 0.75, 0.5, 0.5,
            ],
        )?;
        let detections = decode_detr(
            &outputs,
            ScoreDecoding::SigmoidTopK(Some(2)),
            &labels(),
            (100, 100),
            0.5,
        )?;
        // top two pairs are (query 1, Text) and (query 2, Table), ordered by score
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "Text");
        assert_approx_eq!(f32, detections[0].score, 1.0 / (1.0 + (-3f32).exp()), epsilon = 1e-5);
        assert_approx_eq!(f32, detections[0].bbox[2], 50.0, epsilon = 1e-3);
        assert_eq!(detections[1].label, "Table");
        assert_approx_eq!(f32, detections[1].bbox[0], 50.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_decode_detr_nothing_above_threshold() -> Result<()> {
        let outputs = DetrOutputs::new(&[1, 1, 2], vec![-3.0, -2.0], vec![0.5; 4])?;
        let detections = decode_detr(
            &outputs,
            ScoreDecoding::SigmoidTopK(None),
            &labels(),
            (10, 10),
            0.5,
        )?;
        assert!(detections.is_empty());
        Ok(())
    }

    #[test]
    fn test_decode_detectron_rescales_and_filters() {
        let boxes = [10.0, 20.0, 30.0, 40.0, 0.0, 0.0, 5.0, 5.0, 1.0, 1.0, 2.0, 2.0];
        let classes = [0, 1, -1];
        let scores = [0.9, 0.3, 0.95];
        let detections = decode_detectron(
            &boxes,
            &classes,
            &scores,
            &LabelMap::from_list(&["equation".to_owned()]),
            (400, 500),
            (800, 1000),
            0.5,
        );
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].label, "equation");
        assert_eq!(detections[0].bbox, [20.0, 40.0, 60.0, 80.0]);
    }

    #[test]
    fn test_decode_detectron_unknown_class_passes_id() {
        let detections = decode_detectron(
            &[0.0, 0.0, 1.0, 1.0],
            &[3],
            &[0.8],
            &LabelMap::from_list(&["equation".to_owned()]),
            (10, 10),
            (10, 10),
            0.5,
        );
        assert_eq!(detections[0].label, "3");
    }
}
