//! HuggingFace API

use crate::config::DeviceType;
use crate::error::{DetectError, Result};
use hf_hub::api::sync::ApiBuilder;
use log::{debug, warn};
use std::io;
use std::path::{Path, PathBuf};

pub struct HfModelInfo {
    pub model_type: &'static str,
    /// hub repo id, or a local directory laid out like one
    pub repo: String,
    /// tried in order, the first one that resolves is used
    pub weights_files: Vec<String>,
    pub config_file: String,
    pub preprocessor_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HfModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
    pub preprocessor: Option<PathBuf>,
}

impl HfModelFiles {
    /// resolve every file of `info`, downloading from the hub unless `info.repo` is a directory
    pub fn resolve(info: &HfModelInfo) -> Result<Self> {
        let local = Path::new(&info.repo);
        if local.is_dir() {
            debug!(
                "using {} model from local directory {:?}",
                info.model_type, local
            );
            return Self::resolve_with(info, |name| {
                let path = local.join(name);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("{} not found", path.display()),
                    )
                    .into())
                }
            });
        }
        let api = ApiBuilder::new().with_progress(false).build()?;
        let repo = api.model(info.repo.clone());
        debug!(
            "using {} model from HuggingFace repo '{}'",
            info.model_type, info.repo,
        );
        Self::resolve_with(info, |name| Ok(repo.get(name)?))
    }

    fn resolve_with<F>(info: &HfModelInfo, get: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<PathBuf>,
    {
        let config = get(&info.config_file)?;
        debug!(
            "using {} config file '{}'",
            info.model_type, info.config_file
        );

        let mut last_error = None;
        let mut weights = None;
        for name in &info.weights_files {
            match get(name) {
                Ok(path) => {
                    debug!("using {} weights file '{}'", info.model_type, name);
                    weights = Some(path);
                    break;
                }
                Err(e) => {
                    debug!("weights file '{}' not available: {}", name, e);
                    last_error = Some(e);
                }
            }
        }
        let weights = match (weights, last_error) {
            (Some(weights), _) => weights,
            (None, Some(e)) => return Err(e),
            (None, None) => {
                return Err(DetectError::IoError(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no weights file name given",
                )))
            }
        };

        let preprocessor = match &info.preprocessor_file {
            Some(name) => match get(name) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("no {} preprocessor config, using defaults: {}", name, e);
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            config,
            weights,
            preprocessor,
        })
    }
}

pub trait HfModel {
    fn from_hf(info: HfModelInfo, device: DeviceType) -> Result<Self>
    where
        Self: Sized,
    {
        let files = HfModelFiles::resolve(&info)?;
        Self::from_hf_files(files, device)
    }

    fn from_hf_files(files: HfModelFiles, device: DeviceType) -> Result<Self>
    where
        Self: Sized;
}
