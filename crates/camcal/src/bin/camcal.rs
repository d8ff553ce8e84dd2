//! camcal CLI: chessboard detection, calibration and undistortion.

use camcal::core::PatternSize;
use camcal::draw::{draw_axes, draw_chessboard_corners};
use camcal::intrinsics::{CalibError, CalibrationFile, ReprojectionReport, IDEAL_MEAN_ERROR};
use camcal::pipeline::{
    correct_images, detect_batch, list_images, CorrectionOptions, CorrectionSummary,
};
use camcal::{
    calibrate_detections, estimate_image_poses, evaluate_detections, DetectionSet, ImagePose,
    PipelineConfig, PipelineError,
};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{info, warn, LevelFilter};
use std::path::{Path, PathBuf};

#[cfg(not(feature = "tracing"))]
use camcal::core::init_with_level;
#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

/// Exit status when the reprojection error exceeds the quality gate.
const EXIT_QUALITY_GATE: i32 = 2;

#[derive(Parser)]
#[command(name = "camcal")]
#[command(about = "Calibrate a camera from chessboard images and undistort images with the result")]
#[command(version)]
struct Cli {
    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect chessboard corners in a directory of images.
    Detect(DetectArgs),

    /// Calibrate from a detections file.
    Calibrate(CalibrateArgs),

    /// Undistort a directory of images with a calibration file.
    Undistort(UndistortArgs),

    /// Print the reprojection report of a calibration.
    Report(ReportArgs),

    /// Estimate the board pose and camera position in each image.
    Pose(PoseArgs),

    /// Detect, calibrate, check the quality gate and undistort in one go.
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
struct ImagesArgs {
    /// Directory with the images.
    #[arg(long)]
    images: PathBuf,

    /// Image file extensions to pick up.
    #[arg(long = "ext", value_delimiter = ',', default_value = "jpg,jpeg,png")]
    extensions: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    #[command(flatten)]
    input: ImagesArgs,

    /// Inner corners per row and column, e.g. 7x6.
    #[arg(long, value_parser = parse_pattern, default_value = "7x6")]
    pattern: PatternSize,

    /// Pipeline config (JSON) providing chessboard detector parameters.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relative ChESS response threshold; lower finds weaker corners.
    #[arg(long)]
    chess_threshold: Option<f32>,

    /// Process images in parallel.
    #[arg(long)]
    parallel: bool,

    /// Path to write the detections (JSON).
    #[arg(long, default_value = "detections.json")]
    out: PathBuf,

    /// Write corner overlays of the detected boards into this directory.
    #[arg(long)]
    overlay_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Detections file written by `camcal detect`.
    #[arg(long)]
    detections: PathBuf,

    /// Side of one chessboard square.
    #[arg(long)]
    square_size: Option<f64>,

    /// Pipeline config (JSON) providing flags and solver options.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write the calibration (JSON).
    #[arg(long, default_value = "calibration.json")]
    out: PathBuf,

    /// Fail when the reprojection RMS exceeds this many pixels.
    #[arg(long)]
    max_rms: Option<f64>,

    /// Keep the principal point at the image centre.
    #[arg(long)]
    fix_principal_point: bool,

    /// Enforce fx = ratio * fy.
    #[arg(long)]
    fix_aspect_ratio: Option<f64>,

    /// Force zero tangential distortion.
    #[arg(long)]
    zero_tangent_dist: bool,

    /// Keep k3 at zero.
    #[arg(long)]
    fix_k3: bool,
}

#[derive(Debug, Clone, Args)]
struct UndistortArgs {
    #[command(flatten)]
    input: ImagesArgs,

    /// Calibration file written by `camcal calibrate`.
    #[arg(long)]
    calibration: PathBuf,

    /// Output directory for the undistorted images.
    #[arg(long, default_value = "corrected_images")]
    output_dir: PathBuf,

    /// 0 keeps only valid pixels, 1 keeps all source pixels.
    #[arg(long, default_value_t = 1.0)]
    alpha: f64,

    /// Crop the output to its all-valid region.
    #[arg(long)]
    crop: bool,

    /// Also write a side-by-side compare_<name>.png per image.
    #[arg(long)]
    compare: bool,

    /// Process images in parallel.
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug, Clone, Args)]
struct ReportArgs {
    /// Calibration file.
    #[arg(long)]
    calibration: PathBuf,

    /// Re-evaluate the calibration on these detections instead of printing
    /// the stored report.
    #[arg(long)]
    detections: Option<PathBuf>,

    /// Fail when the reprojection RMS exceeds this many pixels.
    #[arg(long)]
    max_rms: Option<f64>,

    /// Print the full report as JSON instead of a summary.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct PoseArgs {
    #[command(flatten)]
    input: ImagesArgs,

    /// Calibration file written by `camcal calibrate`.
    #[arg(long)]
    calibration: PathBuf,

    /// Inner corners per row and column; defaults to the calibration's.
    #[arg(long, value_parser = parse_pattern)]
    pattern: Option<PatternSize>,

    /// Pipeline config (JSON) providing chessboard detector parameters.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relative ChESS response threshold; lower finds weaker corners.
    #[arg(long)]
    chess_threshold: Option<f32>,

    /// Axis length in squares for the overlays.
    #[arg(long, default_value_t = 5.0)]
    axis_squares: f64,

    /// Write the poses (JSON) here.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write images with the board axes drawn into this directory.
    #[arg(long)]
    overlay_dir: Option<PathBuf>,

    /// Process images in parallel.
    #[arg(long)]
    parallel: bool,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Pipeline config (JSON). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    images: Option<PathBuf>,

    #[arg(long, value_parser = parse_pattern)]
    pattern: Option<PatternSize>,

    #[arg(long)]
    square_size: Option<f64>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Where to write the calibration (JSON).
    #[arg(long)]
    calibration_out: Option<PathBuf>,

    #[arg(long)]
    alpha: Option<f64>,

    #[arg(long)]
    max_rms: Option<f64>,

    #[arg(long)]
    crop: bool,

    /// Also write side-by-side comparisons of the corrected images.
    #[arg(long)]
    compare: bool,

    #[arg(long)]
    chess_threshold: Option<f32>,

    #[arg(long)]
    parallel: bool,
}

fn parse_pattern(s: &str) -> Result<PatternSize, String> {
    let (c, r) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected COLSxROWS, got {s:?}"))?;
    let cols: u32 = c.trim().parse().map_err(|e| format!("bad column count: {e}"))?;
    let rows: u32 = r.trim().parse().map_err(|e| format!("bad row count: {e}"))?;
    let pattern = PatternSize::new(cols, rows);
    if !pattern.is_valid() {
        return Err(format!("pattern {cols}x{rows} needs at least 2x2 inner corners"));
    }
    Ok(pattern)
}

fn load_config(path: Option<&Path>) -> CliResult<PipelineConfig> {
    Ok(match path {
        Some(p) => PipelineConfig::load_json(p)?,
        None => PipelineConfig::default(),
    })
}

fn log_level(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = log_level(verbose, quiet);
    #[cfg(feature = "tracing")]
    {
        let _ = LogTracer::init();
        camcal::core::init_tracing(false, level);
    }
    #[cfg(not(feature = "tracing"))]
    {
        let _ = init_with_level(level);
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err}");
        let gate_failed = matches!(
            err.downcast_ref::<CalibError>(),
            Some(CalibError::QualityGate { .. })
        );
        std::process::exit(if gate_failed { EXIT_QUALITY_GATE } else { 1 });
    }
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "info", skip_all))]
fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Detect(args) => run_detect(args),
        Commands::Calibrate(args) => run_calibrate(args),
        Commands::Undistort(args) => run_undistort(args),
        Commands::Report(args) => run_report(args),
        Commands::Pose(args) => run_pose(args),
        Commands::Run(args) => run_all(args),
    }
}

fn write_overlays(images: &Path, set: &DetectionSet, out_dir: &Path) -> CliResult<()> {
    std::fs::create_dir_all(out_dir)?;
    for det in &set.detections {
        let mut rgb = image::open(images.join(&det.name))?.to_rgb8();
        draw_chessboard_corners(&mut rgb, &det.corners, set.pattern, true);
        rgb.save(out_dir.join(&det.name).with_extension("png"))?;
    }
    info!("wrote {} overlays to {}", set.detections.len(), out_dir.display());
    Ok(())
}

fn run_detect(args: DetectArgs) -> CliResult<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(t) = args.chess_threshold {
        cfg.chess_threshold_rel = t;
    }
    let paths = list_images(&args.input.images, &args.input.extensions)?;
    let set = detect_batch(
        &paths,
        args.pattern,
        &cfg.chessboard,
        &cfg.chess_config(),
        args.parallel,
    )?;
    set.write_json(&args.out)?;
    println!(
        "detected {} of {} images, wrote {}",
        set.detections.len(),
        paths.len(),
        args.out.display()
    );
    if let Some(dir) = &args.overlay_dir {
        write_overlays(&args.input.images, &set, dir)?;
    }
    Ok(())
}

fn run_calibrate(args: CalibrateArgs) -> CliResult<()> {
    let cfg = load_config(args.config.as_deref())?;
    let set = DetectionSet::load_json(&args.detections)?;

    let mut flags = cfg.flags.clone();
    flags.fix_principal_point |= args.fix_principal_point;
    flags.zero_tangent_dist |= args.zero_tangent_dist;
    flags.fix_k3 |= args.fix_k3;
    if args.fix_aspect_ratio.is_some() {
        flags.fix_aspect_ratio = args.fix_aspect_ratio;
    }
    let square_size = args.square_size.unwrap_or(cfg.square_size);

    let calibration = calibrate_detections(&set, square_size, &flags, &cfg.solver)?;
    calibration.write_json(&args.out)?;
    print_summary(&calibration);
    println!("wrote {}", args.out.display());

    if let Some(max_rms) = args.max_rms {
        gate(&calibration, max_rms)?;
    }
    Ok(())
}

fn run_undistort(args: UndistortArgs) -> CliResult<()> {
    let calibration = CalibrationFile::load_json(&args.calibration)?;
    let paths = list_images(&args.input.images, &args.input.extensions)?;
    let options = CorrectionOptions {
        alpha: args.alpha,
        crop: args.crop,
        compare: args.compare,
        parallel: args.parallel,
    };
    let summary = correct_images(&paths, &calibration, &args.output_dir, &options)?;
    print_correction(&summary, &args.output_dir)
}

fn run_report(args: ReportArgs) -> CliResult<()> {
    let calibration = CalibrationFile::load_json(&args.calibration)?;
    let report = match &args.detections {
        Some(path) => {
            let set = DetectionSet::load_json(path)?;
            evaluate_detections(&set, &calibration)?
        }
        None => calibration
            .report
            .clone()
            .ok_or("calibration file has no stored report; pass --detections")?,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if let Some(max_rms) = args.max_rms {
        report.check(max_rms)?;
    }
    Ok(())
}

fn run_pose(args: PoseArgs) -> CliResult<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(t) = args.chess_threshold {
        cfg.chess_threshold_rel = t;
    }
    let calibration = CalibrationFile::load_json(&args.calibration)?;
    let pattern = args.pattern.unwrap_or(calibration.pattern);
    let paths = list_images(&args.input.images, &args.input.extensions)?;
    let set = detect_batch(
        &paths,
        pattern,
        &cfg.chessboard,
        &cfg.chess_config(),
        args.parallel,
    )?;
    let poses = estimate_image_poses(&set, &calibration)?;

    for pose in &poses {
        print_pose(pose);
    }
    println!("estimated {} poses from {} images", poses.len(), paths.len());

    if let Some(out) = &args.out {
        std::fs::write(out, serde_json::to_string_pretty(&poses)?)?;
        println!("wrote {}", out.display());
    }
    if let Some(dir) = &args.overlay_dir {
        let length = args.axis_squares * calibration.square_size;
        write_axes_overlays(&args.input.images, &set, &poses, &calibration, length, dir)?;
    }
    Ok(())
}

fn write_axes_overlays(
    images: &Path,
    set: &DetectionSet,
    poses: &[ImagePose],
    calibration: &CalibrationFile,
    length: f64,
    out_dir: &Path,
) -> CliResult<()> {
    let camera = calibration.camera()?;
    let distortion = calibration.distortion()?;
    std::fs::create_dir_all(out_dir)?;
    for (det, pose) in set.detections.iter().zip(poses) {
        let mut rgb = image::open(images.join(&det.name))?.to_rgb8();
        draw_chessboard_corners(&mut rgb, &det.corners, set.pattern, true);
        if !draw_axes(&mut rgb, &pose.pose, &camera, &distortion, length) {
            warn!("{}: board origin projects outside the image", det.name);
        }
        rgb.save(out_dir.join(format!("pose_{}", det.name)).with_extension("png"))?;
    }
    info!("wrote {} pose overlays to {}", poses.len(), out_dir.display());
    Ok(())
}

fn run_all(args: RunArgs) -> CliResult<()> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(images) = args.images {
        cfg.images_dir = Some(images);
    }
    if let Some(pattern) = args.pattern {
        cfg.pattern = pattern;
    }
    if let Some(square_size) = args.square_size {
        cfg.square_size = square_size;
    }
    if let Some(dir) = args.output_dir {
        cfg.output_dir = Some(dir);
    }
    if let Some(path) = args.calibration_out {
        cfg.calibration_path = Some(path);
    }
    if let Some(alpha) = args.alpha {
        cfg.alpha = alpha;
    }
    if let Some(max_rms) = args.max_rms {
        cfg.max_rms = max_rms;
    }
    if let Some(t) = args.chess_threshold {
        cfg.chess_threshold_rel = t;
    }
    cfg.crop |= args.crop;
    cfg.compare |= args.compare;
    cfg.parallel |= args.parallel;

    let paths = list_images(&cfg.images_dir(), &cfg.extensions)?;
    let set = detect_batch(
        &paths,
        cfg.pattern,
        &cfg.chessboard,
        &cfg.chess_config(),
        cfg.parallel,
    )?;
    if !set.rejected.is_empty() {
        warn!("{} images without a usable board", set.rejected.len());
    }

    let calibration = calibrate_detections(&set, cfg.square_size, &cfg.flags, &cfg.solver)?;
    calibration.write_json(cfg.calibration_path())?;
    print_summary(&calibration);
    gate(&calibration, cfg.max_rms)?;

    let out_dir = cfg.output_dir();
    let summary = correct_images(&paths, &calibration, &out_dir, &cfg.correction_options())?;
    print_correction(&summary, &out_dir)
}

/// Print the batch outcome; an error only when nothing was corrected.
fn print_correction(summary: &CorrectionSummary, out_dir: &Path) -> CliResult<()> {
    println!(
        "corrected {}/{} images ({:.1}%) into {} in {:.2?}",
        summary.written.len(),
        summary.total(),
        summary.success_rate(),
        out_dir.display(),
        summary.elapsed
    );
    if !summary.comparisons.is_empty() {
        println!("wrote {} comparison images", summary.comparisons.len());
    }
    if !summary.failed.is_empty() {
        println!("failed: {} ({})", summary.failed.len(), summary.failed.join(", "));
    }
    if summary.written.is_empty() && !summary.failed.is_empty() {
        return Err(PipelineError::NothingCorrected {
            failed: summary.failed.len(),
        }
        .into());
    }
    Ok(())
}

fn gate(calibration: &CalibrationFile, max_rms: f64) -> Result<(), CalibError> {
    match &calibration.report {
        Some(report) => report.check(max_rms),
        None if calibration.rms <= max_rms => Ok(()),
        None => Err(CalibError::QualityGate {
            rms: calibration.rms,
            max_rms,
        }),
    }
}

fn print_summary(calibration: &CalibrationFile) {
    let k = calibration.camera_matrix;
    println!("camera matrix:");
    for row in k {
        println!("  [{:10.4} {:10.4} {:10.4}]", row[0], row[1], row[2]);
    }
    let d = calibration.dist_coeffs;
    println!(
        "distortion [k1 k2 p1 p2 k3]: [{:.6} {:.6} {:.6} {:.6} {:.6}]",
        d[0], d[1], d[2], d[3], d[4]
    );
    println!("rms reprojection error: {:.4}px", calibration.rms);
    if let Some(report) = &calibration.report {
        println!("mean error: {:.6}", report.mean_error);
    }
}

fn print_report(report: &ReprojectionReport) {
    println!("views: {}", report.views.len());
    println!("rms reprojection error: {:.4}px", report.rms);
    println!(
        "per-view error: mean {:.5}px, std {:.5}px, max {:.5}px",
        report.mean_error, report.std_error, report.max_view_error
    );
    if let Some((idx, worst)) = report.worst_view() {
        println!("worst view: #{idx} (rms {:.4}px)", worst.rms);
    }
    println!(
        "assessment: {} (mean below {IDEAL_MEAN_ERROR}px is ideal)",
        report.assessment()
    );
    for tip in report.suggestions() {
        println!("  - {tip}");
    }
}

fn print_pose(pose: &ImagePose) {
    let c = pose.camera_position;
    println!("{}:", pose.name);
    println!("  camera position: [{:.4} {:.4} {:.4}]", c[0], c[1], c[2]);
    println!("  rotation:");
    for row in pose.rotation {
        println!("    [{:8.5} {:8.5} {:8.5}]", row[0], row[1], row[2]);
    }
}
