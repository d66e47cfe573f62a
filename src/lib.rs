pub mod bbox;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod hf;
pub mod output;
pub mod pipeline;
pub mod postprocess;
pub mod preprocess;

pub use error::Result;
