//! The JSON result written to stdout, one line per run

use crate::bbox::Region;
use image::RgbImage;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub w: u32,
    pub h: u32,
    pub path: String,
}

impl ImageInfo {
    pub fn new(image: &RgbImage, path: &Path) -> Self {
        Self {
            w: image.width(),
            h: image.height(),
            path: path.display().to_string(),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.w, self.h)
    }
}

/// Failure taxonomy, displayed as the `error` string of the result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Failure {
    #[error("{library}_import_failed: {message}")]
    ImportFailed {
        library: &'static str,
        message: String,
    },
    #[error("invalid_arguments: {0}")]
    InvalidArguments(String),
    #[error("image_not_found: {}", .0.display())]
    ImageNotFound(PathBuf),
    #[error("image_read_failed: {}: {message}", .path.display())]
    ImageReadFailed { path: PathBuf, message: String },
    #[error("missing_model")]
    MissingModel { detail: String },
    #[error("model_init_failed: {0}")]
    ModelInitFailed(String),
    #[error("detect_failed: {0}")]
    DetectFailed(String),
}

impl Failure {
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::MissingModel { detail } => Some(detail),
            _ => None,
        }
    }

    /// collapse a multi-line argument parser message into one line
    pub fn invalid_arguments(message: &str) -> Self {
        let message = message
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| !l.starts_with("Usage:") && !l.starts_with("For more information"))
            .collect::<Vec<_>>()
            .join(" ");
        let message = message.strip_prefix("error: ").unwrap_or(&message);
        Self::InvalidArguments(message.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub ok: bool,
    pub boxes: Vec<Region>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Report {
    pub fn success(boxes: Vec<Region>, image: ImageInfo) -> Self {
        Self {
            ok: true,
            boxes,
            image: Some(image),
            error: None,
            detail: None,
        }
    }

    /// a failed run never carries boxes
    pub fn failure(failure: Failure, image: Option<ImageInfo>) -> Self {
        Self {
            ok: false,
            boxes: Vec::new(),
            image,
            error: Some(failure.to_string()),
            detail: failure.detail().map(str::to_owned),
        }
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                let fallback = Report::failure(Failure::DetectFailed(e.to_string()), None);
                serde_json::to_string(&fallback).unwrap_or_else(|_| {
                    r#"{"ok":false,"boxes":[],"error":"detect_failed"}"#.to_owned()
                })
            }
        }
    }

    /// Print the report as one JSON line. A closed stdout is ignored since there is no other
    /// channel left to report on.
    pub fn emit(&self) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{}", self.to_json());
        let _ = stdout.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_info() -> ImageInfo {
        ImageInfo {
            w: 640,
            h: 480,
            path: "/tmp/page.png".to_owned(),
        }
    }

    #[test]
    fn test_failure_messages() {
        let failure = Failure::ImportFailed {
            library: "onnxruntime",
            message: "libonnxruntime.so not found".to_owned(),
        };
        assert_eq!(
            failure.to_string(),
            "onnxruntime_import_failed: libonnxruntime.so not found"
        );
        assert_eq!(
            Failure::ImageNotFound(PathBuf::from("/data/p1.png")).to_string(),
            "image_not_found: /data/p1.png"
        );
        assert_eq!(
            Failure::ImageReadFailed {
                path: PathBuf::from("/data/p1.png"),
                message: "bad header".to_owned()
            }
            .to_string(),
            "image_read_failed: /data/p1.png: bad header"
        );
        assert_eq!(
            Failure::ModelInitFailed("404".to_owned()).to_string(),
            "model_init_failed: 404"
        );
    }

    #[test]
    fn test_invalid_arguments_single_line() {
        let message = "error: the following required arguments were not provided:\n  \
                       --image <IMAGE>\n\nUsage: detect-layout-hf --image <IMAGE>\n\n\
                       For more information, try '--help'.\n";
        assert_eq!(
            Failure::invalid_arguments(message).to_string(),
            "invalid_arguments: the following required arguments were not provided: --image <IMAGE>"
        );
    }

    #[test]
    fn test_not_found_json() {
        let report = Report::failure(Failure::ImageNotFound(PathBuf::from("/x/y.png")), None);
        assert_eq!(
            report.to_json(),
            r#"{"ok":false,"boxes":[],"error":"image_not_found: /x/y.png"}"#
        );
    }

    #[test]
    fn test_missing_model_json() {
        let report = Report::failure(
            Failure::MissingModel {
                detail: "Provide --config and --weights".to_owned(),
            },
            Some(image_info()),
        );
        assert_eq!(
            report.to_json(),
            r#"{"ok":false,"boxes":[],"image":{"w":640,"h":480,"path":"/tmp/page.png"},"error":"missing_model","detail":"Provide --config and --weights"}"#
        );
    }

    #[test]
    fn test_success_json() {
        let boxes = vec![Region {
            x: 1,
            y: 2,
            w: 3,
            h: 4,
            score: 0.5,
            label: "equation".to_owned(),
        }];
        let report = Report::success(boxes, image_info());
        assert_eq!(
            report.to_json(),
            r#"{"ok":true,"boxes":[{"x":1,"y":2,"w":3,"h":4,"score":0.5,"label":"equation"}],"image":{"w":640,"h":480,"path":"/tmp/page.png"}}"#
        );
        assert!(!report.to_json().contains('\n'));
    }
}
