use crate::config::DeviceType;
use crate::error::{DetectError, Result};
use log::debug;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::DynValue;
use std::path::Path;

/// set up the process wide ONNX Runtime environment, must run before any session is built
pub fn init_runtime() -> Result<()> {
    ort::init()
        .with_name("region-detect")
        .commit()
        .map_err(DetectError::ort)?;
    Ok(())
}

/// load an ONNX model, CUDA devices fall back to CPU when the provider is unavailable
pub fn build_session(model_path: &Path, device: DeviceType) -> Result<Session> {
    let builder = Session::builder()
        .map_err(DetectError::ort)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(DetectError::ort)?;
    let builder = match device {
        DeviceType::Cpu => builder,
        DeviceType::Cuda(device_id) => builder
            .with_execution_providers([
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ])
            .map_err(DetectError::ort)?,
    };
    let session = builder
        .commit_from_file(model_path)
        .map_err(DetectError::ort)?;
    debug!("loaded ONNX model {:?} on {}", model_path, device);
    debug!(
        "  inputs: {:?}",
        session.inputs.iter().map(|i| &i.name).collect::<Vec<_>>()
    );
    debug!(
        "  outputs: {:?}",
        session.outputs.iter().map(|o| &o.name).collect::<Vec<_>>()
    );
    Ok(session)
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputData {
    Float(Vec<f32>),
    /// int64 and int32 tensors, widened
    Int(Vec<i64>),
}

/// One model output copied out of the session, with the name the graph gives it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Vec<i64>,
    pub data: OutputData,
}

impl OutputTensor {
    /// `None` for element types no detector reads (bool masks, strings, ...)
    pub fn from_value(name: &str, value: &DynValue) -> Option<Self> {
        let (shape, data) = if let Ok((shape, data)) = value.try_extract_tensor::<f32>() {
            (shape.to_vec(), OutputData::Float(data.to_vec()))
        } else if let Ok((shape, data)) = value.try_extract_tensor::<i64>() {
            (shape.to_vec(), OutputData::Int(data.to_vec()))
        } else if let Ok((shape, data)) = value.try_extract_tensor::<i32>() {
            let data = data.iter().map(|&v| i64::from(v)).collect();
            (shape.to_vec(), OutputData::Int(data))
        } else {
            debug!("skipping output {:?} of unsupported type", name);
            return None;
        };
        Some(Self {
            name: name.to_owned(),
            shape,
            data,
        })
    }

    pub fn is_float(&self) -> bool {
        matches!(self.data, OutputData::Float(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self.data, OutputData::Int(_))
    }

    pub fn floats(&self) -> Option<&[f32]> {
        match &self.data {
            OutputData::Float(data) => Some(data),
            OutputData::Int(_) => None,
        }
    }

    pub fn dims(&self) -> Vec<usize> {
        self.shape.iter().map(|&d| d.max(0) as usize).collect()
    }

    /// case-insensitive substring match on the output name
    pub fn name_contains(&self, key: &str) -> bool {
        self.name.to_lowercase().contains(key)
    }
}
