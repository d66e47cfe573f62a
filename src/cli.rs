//! Helpers shared by the binaries

use crate::error::DetectError;
use crate::output::{Failure, Report};
use clap::error::ErrorKind;
use clap::Parser;
use env_logger::Env;

/// Parse the command line. Help and version output exit as usual, every other parse error is
/// printed as a failed report and yields `None`.
pub fn parse_or_report<P: Parser>() -> Option<P> {
    match P::try_parse() {
        Ok(args) => Some(args),
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            Report::failure(Failure::invalid_arguments(&err.to_string()), None).emit();
            None
        }
    }
}

/// logs go to stderr, stdout only carries the report
pub fn init_logging(verbose: bool) {
    let env = Env::new().filter_or("REGION_DETECT_LOG", if verbose { "debug" } else { "info" });
    env_logger::init_from_env(env);
}

pub fn runtime_failure(err: DetectError) -> Failure {
    let message = match err {
        DetectError::OrtError(message) => message,
        other => other.to_string(),
    };
    Failure::ImportFailed {
        library: "onnxruntime",
        message,
    }
}

pub fn model_init_failure(err: DetectError) -> Failure {
    Failure::ModelInitFailed(err.to_string())
}
