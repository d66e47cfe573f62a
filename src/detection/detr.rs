//! DETR-family detectors (DETR, Deformable DETR, Conditional DETR, RT-DETR) from Hugging Face
//! ONNX exports

use super::session::{build_session, OutputTensor};
use super::Detector;
use crate::bbox::Detection;
use crate::config::{DeviceType, HfDetectionConfig, ImageProcessorConfig};
use crate::error::{DetectError, Result};
use crate::hf::{HfModel, HfModelFiles, HfModelInfo};
use crate::postprocess::{decode_detr, DetrOutputs, LabelMap, ScoreDecoding};
use crate::preprocess::{image_to_tensor, processor_size, resize_image, Normalization};
use candle_core::{Device, Tensor};
use image::RgbImage;
use log::{debug, info, warn};
use ort::session::Session;
use std::time::Instant;

const ONNX_FILE_CANDIDATES: [&str; 2] = ["onnx/model.onnx", "model.onnx"];
const OUTPUT_NAMES: [&str; 2] = ["logits", "pred_boxes"];

pub struct DetrDetector {
    session: Session,
    processor: ImageProcessorConfig,
    decoding: ScoreDecoding,
    labels: LabelMap,
    pixel_mask: bool,
}

impl DetrDetector {
    /// files to fetch for `repo`, `onnx_file` overrides the default export locations
    pub fn hf_info(repo: &str, onnx_file: Option<&str>) -> HfModelInfo {
        let weights_files = match onnx_file {
            Some(name) => vec![name.to_owned()],
            None => ONNX_FILE_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        };
        HfModelInfo {
            model_type: "detr",
            repo: repo.to_owned(),
            weights_files,
            config_file: "config.json".to_owned(),
            preprocessor_file: Some("preprocessor_config.json".to_owned()),
        }
    }

    fn run(&mut self, pixel_values: &Tensor) -> Result<DetrOutputs> {
        let (channels, height, width) = pixel_values.dims3()?;
        let data = pixel_values.flatten_all()?.to_vec1::<f32>()?;
        let shape = [1, channels, height, width];
        let pixel_values =
            ort::value::Tensor::from_array((shape.as_slice(), data)).map_err(DetectError::ort)?;
        let outputs = if self.pixel_mask {
            let shape = [1, height, width];
            let mask = ort::value::Tensor::from_array((shape.as_slice(), vec![1i64; height * width]))
                .map_err(DetectError::ort)?;
            self.session
                .run(ort::inputs!["pixel_values" => pixel_values, "pixel_mask" => mask])
        } else {
            self.session.run(ort::inputs!["pixel_values" => pixel_values])
        }
        .map_err(DetectError::ort)?;

        let tensors: Vec<OutputTensor> = OUTPUT_NAMES
            .iter()
            .filter_map(|name| {
                outputs
                    .get(name)
                    .and_then(|value| OutputTensor::from_value(name, value))
            })
            .collect();
        select_outputs(&tensors)
    }
}

/// `logits` and `pred_boxes` by name, both float
fn select_outputs(outputs: &[OutputTensor]) -> Result<DetrOutputs> {
    let find = |name: &str| {
        let tensor = outputs
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| DetectError::ModelOutput(format!("no '{name}' output")))?;
        let data = tensor
            .floats()
            .ok_or_else(|| DetectError::ModelOutput(format!("'{name}' is not a float tensor")))?;
        Ok::<_, DetectError>((tensor.dims(), data))
    };
    let (logits_shape, logits) = find("logits")?;
    let (_, pred_boxes) = find("pred_boxes")?;
    DetrOutputs::new(&logits_shape, logits.to_vec(), pred_boxes.to_vec())
}

impl HfModel for DetrDetector {
    fn from_hf_files(files: HfModelFiles, device: DeviceType) -> Result<Self> {
        let config: HfDetectionConfig =
            serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
        let processor: ImageProcessorConfig = match &files.preprocessor {
            Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
            None => ImageProcessorConfig::default(),
        };
        debug!("loaded config: {:?}", config);
        debug!("loaded preprocessor config: {:?}", processor);
        let session = build_session(&files.weights, device)?;
        let pixel_mask = session.inputs.iter().any(|i| i.name == "pixel_mask");
        let decoding = ScoreDecoding::for_model_type(&config.model_type);
        let labels = LabelMap::new(config.labels());
        if labels.is_empty() {
            warn!("config has no id2label, class ids are used as labels");
        }
        info!(
            "loaded {} model with {} labels, decoding {:?}",
            if config.model_type.is_empty() {
                "unknown"
            } else {
                config.model_type.as_str()
            },
            labels.len(),
            decoding
        );
        Ok(Self {
            session,
            processor,
            decoding,
            labels,
            pixel_mask,
        })
    }
}

impl Detector for DetrDetector {
    fn detect(&mut self, image: &RgbImage, score_threshold: f32) -> Result<Vec<Detection>> {
        let original_size = image.dimensions();
        let input_size = processor_size(&self.processor, original_size);
        let resized = resize_image(image, input_size);
        let normalization = Normalization::from_processor(&self.processor);
        let pixel_values = image_to_tensor(&resized, &normalization, &Device::Cpu)?;

        info!("starting detr inference on {:?} input...", input_size);
        let now = Instant::now();
        let outputs = self.run(&pixel_values)?;
        info!("inference took {:.3}s", now.elapsed().as_secs_f32());

        decode_detr(
            &outputs,
            self.decoding,
            &self.labels,
            original_size,
            score_threshold,
        )
    }
}
