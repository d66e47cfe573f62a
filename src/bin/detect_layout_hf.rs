use clap::Parser;
use log::debug;
use region_detect::cli::{init_logging, model_init_failure, parse_or_report, runtime_failure};
use region_detect::config::{
    non_blank, resolve_score_threshold, DeviceType, DEFAULT_DETR_MODEL,
};
use region_detect::detection::session::init_runtime;
use region_detect::detection::DetrDetector;
use region_detect::hf::HfModel;
use region_detect::output::{Failure, Report};
use region_detect::pipeline;
use std::path::PathBuf;

/// Detect document layout regions with a DETR-family model exported to ONNX, printing one JSON
/// result on stdout.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, help = "path to input image (PNG/JPG)")]
    image: PathBuf,

    #[arg(
        long,
        env = "HF_DETR_MODEL",
        default_value = DEFAULT_DETR_MODEL,
        help = "hugging face model repo, or a local directory holding the same files"
    )]
    model: String,

    #[arg(
        long,
        help = "score threshold [env: DETECTOR_SCORE_THRESH, then DETECTRON_SCORE_THRESH, default 0.5]"
    )]
    score_thresh: Option<f32>,

    #[arg(
        long,
        env = "HF_DETR_ONNX_FILE",
        help = "ONNX file inside the model repo, defaults to onnx/model.onnx then model.onnx"
    )]
    onnx_file: Option<String>,

    #[arg(long, default_value_t = DeviceType::Cpu, help = "cpu, cuda or cuda:N")]
    device: DeviceType,

    #[arg(long, help = "whether to enable verbose mode")]
    verbose: bool,
}

fn main() {
    let Some(args) = parse_or_report::<Cli>() else {
        return;
    };
    init_logging(args.verbose);
    debug!("{:?}", args);

    // read here rather than by clap so blank values fall through to the next source
    let env_thresholds = [
        std::env::var("DETECTOR_SCORE_THRESH").ok(),
        std::env::var("DETECTRON_SCORE_THRESH").ok(),
    ];
    let env_thresholds = env_thresholds.iter().map(Option::as_deref).collect::<Vec<_>>();
    let score_threshold = match resolve_score_threshold(args.score_thresh, &env_thresholds) {
        Ok(threshold) => threshold,
        Err(message) => {
            Report::failure(Failure::InvalidArguments(message), None).emit();
            return;
        }
    };
    debug!("score threshold {}", score_threshold);

    if let Err(e) = init_runtime() {
        Report::failure(runtime_failure(e), None).emit();
        return;
    }

    let report = pipeline::run(&args.image, score_threshold, || {
        let Some(model) = non_blank(Some(&args.model)) else {
            return Err(Failure::MissingModel {
                detail: "Provide --model or set the HF_DETR_MODEL env var.".to_owned(),
            });
        };
        let info = DetrDetector::hf_info(model, non_blank(args.onnx_file.as_deref()));
        DetrDetector::from_hf(info, args.device).map_err(model_init_failure)
    });
    report.emit();
}
