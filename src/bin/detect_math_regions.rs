use clap::Parser;
use log::debug;
use region_detect::cli::{init_logging, model_init_failure, parse_or_report, runtime_failure};
use region_detect::config::{
    non_blank, parse_labels, resolve_device, resolve_score_threshold, DeviceType,
};
use region_detect::detection::session::init_runtime;
use region_detect::detection::Detectron2Detector;
use region_detect::output::{Failure, Report};
use region_detect::pipeline;
use std::path::PathBuf;

/// Detect math (equation) regions on a page image with a Detectron2 model exported to ONNX,
/// printing one JSON result on stdout.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(long, help = "path to input image (PNG/JPG)")]
    image: PathBuf,

    #[arg(long, env = "DETECTRON_CONFIG", help = "detectron2 config.yaml path")]
    config: Option<String>,

    #[arg(long, env = "DETECTRON_WEIGHTS", help = "detectron2 model exported to ONNX")]
    weights: Option<String>,

    #[arg(
        long,
        env = "DETECTRON_LABELS",
        default_value = "equation",
        help = "comma separated class names, index order must match training"
    )]
    labels: String,

    #[arg(long, help = "score threshold [env: DETECTRON_SCORE_THRESH, default 0.5]")]
    score_thresh: Option<f32>,

    #[arg(
        long,
        help = "cpu, cuda or cuda:N [env: DETECTRON_DEVICE, default cuda when CUDA_VISIBLE_DEVICES is set]"
    )]
    device: Option<DeviceType>,

    #[arg(long, help = "whether to enable verbose mode")]
    verbose: bool,
}

fn main() {
    let Some(args) = parse_or_report::<Cli>() else {
        return;
    };
    init_logging(args.verbose);
    debug!("{:?}", args);

    // env values are read here rather than by clap so blank ones count as unset
    let env_threshold = std::env::var("DETECTRON_SCORE_THRESH").ok();
    let settings = resolve_score_threshold(args.score_thresh, &[env_threshold.as_deref()])
        .and_then(|threshold| {
            let device = resolve_device(
                args.device,
                std::env::var("DETECTRON_DEVICE").ok().as_deref(),
                std::env::var("CUDA_VISIBLE_DEVICES").ok().as_deref(),
            )?;
            Ok((threshold, device))
        });
    let (score_threshold, device) = match settings {
        Ok(settings) => settings,
        Err(message) => {
            Report::failure(Failure::InvalidArguments(message), None).emit();
            return;
        }
    };
    debug!("score threshold {}, device {}", score_threshold, device);
    let labels = parse_labels(&args.labels);

    if let Err(e) = init_runtime() {
        Report::failure(runtime_failure(e), None).emit();
        return;
    }

    let report = pipeline::run(&args.image, score_threshold, || {
        let config = non_blank(args.config.as_deref());
        let weights = non_blank(args.weights.as_deref());
        let (Some(config), Some(weights)) = (config, weights) else {
            return Err(Failure::MissingModel {
                detail: "Provide --config and --weights or set DETECTRON_CONFIG/DETECTRON_WEIGHTS env vars."
                    .to_owned(),
            });
        };
        Detectron2Detector::new(config, weights, &labels, device).map_err(model_init_failure)
    });
    report.emit();
}
