//! Argument fallbacks and the model-side config files

use crate::error::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_DETR_MODEL: &str = "Aryn/deformable-detr-DocLayNet";
pub const DEFAULT_DETECTRON_LABEL: &str = "equation";

/// Resolve the score threshold: explicit flag, then the first non-blank env value in order, then
/// [DEFAULT_SCORE_THRESHOLD].
///
/// Blank env values count as unset, unparsable ones are an error.
pub fn resolve_score_threshold(
    explicit: Option<f32>,
    env_values: &[Option<&str>],
) -> std::result::Result<f32, String> {
    let threshold = match (explicit, env_values.iter().find_map(|v| non_blank(*v))) {
        (Some(value), _) => value,
        (None, Some(raw)) => raw
            .parse::<f32>()
            .map_err(|e| format!("invalid score threshold '{raw}': {e}"))?,
        (None, None) => DEFAULT_SCORE_THRESHOLD,
    };
    if threshold.is_finite() {
        Ok(threshold)
    } else {
        Err(format!("invalid score threshold '{threshold}'"))
    }
}

/// Explicit flag, then a non-blank device env value, then the `CUDA_VISIBLE_DEVICES` default.
pub fn resolve_device(
    explicit: Option<DeviceType>,
    device_env: Option<&str>,
    cuda_visible_devices: Option<&str>,
) -> std::result::Result<DeviceType, String> {
    match (explicit, non_blank(device_env)) {
        (Some(device), _) => Ok(device),
        (None, Some(raw)) => raw.parse(),
        (None, None) => Ok(DeviceType::from_cuda_visible_devices(cuda_visible_devices)),
    }
}

/// split a comma separated label list, index order must match the model's class ids
pub fn parse_labels(raw: &str) -> Vec<String> {
    let labels: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    if labels.is_empty() {
        vec![DEFAULT_DETECTRON_LABEL.to_owned()]
    } else {
        labels
    }
}

/// `Some` only for a non-blank value
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    #[default]
    Cpu,
    Cuda(i32),
}

impl DeviceType {
    /// `cuda` when `CUDA_VISIBLE_DEVICES` holds anything, `cpu` otherwise
    pub fn from_cuda_visible_devices(cuda_visible_devices: Option<&str>) -> Self {
        match non_blank(cuda_visible_devices) {
            Some(_) => Self::Cuda(0),
            None => Self::Cpu,
        }
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            _ => match s.strip_prefix("cuda:") {
                Some(id) => id
                    .parse::<i32>()
                    .ok()
                    .filter(|id| *id >= 0)
                    .map(Self::Cuda)
                    .ok_or_else(|| format!("invalid cuda device id in '{s}'")),
                None => Err(format!("unknown device '{s}', expected cpu, cuda or cuda:N")),
            },
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

fn default_min_size_test() -> u32 {
    800
}

fn default_max_size_test() -> u32 {
    1333
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelFormat {
    #[default]
    Bgr,
    Rgb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DetectronInputConfig {
    #[serde(default = "default_min_size_test")]
    pub min_size_test: u32,
    #[serde(default = "default_max_size_test")]
    pub max_size_test: u32,
    #[serde(default)]
    pub format: ChannelFormat,
}

impl Default for DetectronInputConfig {
    fn default() -> Self {
        Self {
            min_size_test: default_min_size_test(),
            max_size_test: default_max_size_test(),
            format: ChannelFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RoiHeadsConfig {
    pub num_classes: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DetectronModelConfig {
    #[serde(default)]
    pub roi_heads: RoiHeadsConfig,
}

/// The subset of a Detectron2 `config.yaml` needed to feed an exported model.
///
/// `_BASE_` includes are not followed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DetectronConfig {
    #[serde(default)]
    pub input: DetectronInputConfig,
    #[serde(default)]
    pub model: DetectronModelConfig,
}

impl DetectronConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // an empty file is a valid config with every default
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }
}

/// `config.json` of a Hugging Face object detection model
#[derive(Debug, Clone, Deserialize)]
pub struct HfDetectionConfig {
    #[serde(default)]
    pub model_type: String,
    #[serde(default)]
    pub id2label: HashMap<String, String>,
}

impl HfDetectionConfig {
    /// id2label with numeric keys, entries with non-numeric keys are ignored
    pub fn labels(&self) -> HashMap<usize, String> {
        self.id2label
            .iter()
            .filter_map(|(k, v)| k.trim().parse::<usize>().ok().map(|id| (id, v.clone())))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Edges {
        shortest_edge: u32,
        longest_edge: Option<u32>,
    },
    Exact {
        height: u32,
        width: u32,
    },
    Shortest(u32),
}

fn default_true() -> bool {
    true
}

fn default_rescale_factor() -> f32 {
    1.0 / 255.0
}

fn default_image_mean() -> [f32; 3] {
    [0.485, 0.456, 0.406]
}

fn default_image_std() -> [f32; 3] {
    [0.229, 0.224, 0.225]
}

fn default_size() -> ImageSize {
    ImageSize::Edges {
        shortest_edge: 800,
        longest_edge: Some(1333),
    }
}

/// `preprocessor_config.json`, defaults are the ones of `DetrImageProcessor`
#[derive(Debug, Clone, Deserialize)]
pub struct ImageProcessorConfig {
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default = "default_size")]
    pub size: ImageSize,
    /// legacy configs carry the long edge limit separately
    #[serde(default)]
    pub max_size: Option<u32>,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f32,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_image_mean")]
    pub image_mean: [f32; 3],
    #[serde(default = "default_image_std")]
    pub image_std: [f32; 3],
}

impl Default for ImageProcessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: default_size(),
            max_size: None,
            do_rescale: true,
            rescale_factor: default_rescale_factor(),
            do_normalize: true,
            image_mean: default_image_mean(),
            image_std: default_image_std(),
        }
    }
}
