//! Command-line driver: calibrate a site from a frame, then measure the
//! water line on subsequent frames.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use image::ImageReader;
use log::error;

use waterline::calib::{read_model, write_model, CalibrationControl};
use waterline::detect::{calibrate_frame, measure_frame_with, view_frame};
use waterline::find::{LineFindParams, LineFinder};
use waterline::target::TargetGeometry;

#[derive(Parser, Debug)]
#[command(name = "waterline", about = "Fiducial-calibrated water-line gauging")]
struct Args {
    /// Log level: off, error, warn, info, debug, trace.
    #[arg(long, default_value = "warn")]
    log: log::LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search the fiducial target in a frame and write a calibration file.
    Calibrate {
        /// Input frame (any format the image crate decodes).
        image: PathBuf,
        /// Output calibration JSON.
        #[arg(long, short)]
        out: PathBuf,
        /// Target shape: octagon, stop-sign, or bow-tie.
        #[arg(long, default_value = "octagon")]
        target: String,
        /// Bow-tie grid size, columns x rows.
        #[arg(long, default_value_t = 2)]
        columns: u32,
        #[arg(long, default_value_t = 4)]
        rows: u32,
        /// Physical facet length (octagon side or grid pitch), world units.
        #[arg(long, default_value_t = 0.7)]
        facet_length: f64,
        /// Vertical datum offset added to world y.
        #[arg(long, default_value_t = 0.0)]
        zero_offset: f64,
        /// Restrict the target search: "x,y,width,height".
        #[arg(long)]
        region: Option<String>,
    },
    /// Measure the water line on frames using a stored calibration.
    FindLine {
        /// Calibration JSON produced by `calibrate`.
        #[arg(long, short)]
        calib: PathBuf,
        /// Input frames, processed in order.
        images: Vec<PathBuf>,
        /// Optional RNG seed for reproducible RANSAC runs.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn parse_region(text: &str) -> Result<waterline::core::Rect, String> {
    let parts: Vec<i32> = text
        .split(',')
        .map(|s| s.trim().parse::<i32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("bad region {text:?}: {e}"))?;
    if parts.len() != 4 {
        return Err(format!("region {text:?} needs 4 comma-separated values"));
    }
    Ok(waterline::core::Rect::new(
        parts[0], parts[1], parts[2], parts[3],
    ))
}

fn load_gray(path: &PathBuf) -> Result<image::GrayImage, String> {
    Ok(ImageReader::open(path)
        .map_err(|e| format!("{}: {e}", path.display()))?
        .decode()
        .map_err(|e| format!("{}: {e}", path.display()))?
        .to_luma8())
}

fn run(args: Args) -> Result<(), String> {
    match args.command {
        Command::Calibrate {
            image,
            out,
            target,
            columns,
            rows,
            facet_length,
            zero_offset,
            region,
        } => {
            let geometry = match target.as_str() {
                "octagon" => TargetGeometry::octagon(),
                "stop-sign" => TargetGeometry::stop_sign(),
                "bow-tie" => TargetGeometry::bow_tie(columns, rows),
                other => return Err(format!("unknown target {other:?}")),
            };

            let mut control = CalibrationControl::for_target(geometry, facet_length);
            control.zero_offset = zero_offset;
            if let Some(text) = region {
                control.target_search_region = parse_region(&text)?;
            }

            let frame = load_gray(&image)?;
            let model =
                calibrate_frame(&frame, &control).map_err(|e| format!("calibration: {e}"))?;
            write_model(&out, &model).map_err(|e| format!("write: {e}"))?;
            println!(
                "calibrated {} with {} correspondences, {} search lines",
                image.display(),
                model.pixel_points().len(),
                model.search_lines().len()
            );
            Ok(())
        }
        Command::FindLine {
            calib,
            images,
            seed,
        } => {
            if images.is_empty() {
                return Err("no input frames".into());
            }
            let model = read_model(&calib).map_err(|e| format!("read calibration: {e}"))?;
            let mut finder = match seed {
                Some(seed) => LineFinder::with_seed(LineFindParams::default(), seed),
                None => LineFinder::new(LineFindParams::default()),
            };

            let mut any_failed = false;
            for path in &images {
                let frame = load_gray(path)?;
                model
                    .check_frame(&view_frame(&frame))
                    .map_err(|e| format!("{}: {e}", path.display()))?;

                let measurement = measure_frame_with(&frame, &model, &mut finder, None)
                    .map_err(|e| format!("{}: {e}", path.display()))?;
                any_failed |= !measurement.result.find_success;

                let line = serde_json::json!({
                    "image": path.display().to_string(),
                    "findSuccess": measurement.result.find_success,
                    "pixel": measurement.result.calc_line,
                    "world": {
                        "left": measurement.world_left,
                        "center": measurement.world_center,
                        "right": measurement.world_right,
                    },
                });
                println!("{line}");
            }

            if any_failed {
                Err("one or more frames had no line find".into())
            } else {
                Ok(())
            }
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let _ = waterline::core::init_logger(args.log);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
