mod capture;
mod output;

use anyhow::{bail, Context, Result};
use capture::{CaptureSource, WebcamCapture};
use clap::{Parser, Subcommand};
use livematte::{
    ConfigSource, Frame, MattingConfig, MattingService, QualityTier, SharedConfig, StillOutput,
    StillRequest, StreamingMode, TomlConfigFile,
};
use output::{OutputSink, V4L2Output};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// TOML configuration, re-read whenever it changes.
    /// When given, the settings flags below are ignored
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory containing the ONNX model files
    #[arg(long, global = true, default_value = "models")]
    models: PathBuf,

    /// Background image composited behind the subject
    #[arg(long, global = true)]
    background: Option<PathBuf>,

    /// Quality tier: low, medium or high
    #[arg(long, global = true, default_value = "medium", value_parser = parse_quality)]
    quality: QualityTier,

    /// Run inference on the CPU only
    #[arg(long, global = true)]
    cpu: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Matte a webcam feed into a v4l2loopback device
    Live {
        /// Input webcam device index
        #[arg(short, long, default_value_t = 0)]
        input_device: u32,

        /// Output v4l2loopback device path
        #[arg(short, long, default_value = "/dev/video10")]
        output_device: String,

        /// Capture resolution width
        #[arg(long, default_value_t = 1280)]
        capture_width: u32,

        /// Capture resolution height
        #[arg(long, default_value_t = 720)]
        capture_height: u32,

        /// Output resolution width
        #[arg(long, default_value_t = 1280)]
        output_width: u32,

        /// Output resolution height
        #[arg(long, default_value_t = 720)]
        output_height: u32,

        /// Target frames per second
        #[arg(long, default_value_t = 30)]
        fps: u32,

        /// Always use the stateless live model
        #[arg(long)]
        responsive: bool,
    },
    /// Matte a single image with the still model
    Still {
        /// Image to matte
        input: PathBuf,

        /// Where to write the composited image and the mask
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn parse_quality(value: &str) -> Result<QualityTier, String> {
    match value.to_ascii_lowercase().as_str() {
        "low" => Ok(QualityTier::Low),
        "medium" => Ok(QualityTier::Medium),
        "high" => Ok(QualityTier::High),
        other => Err(format!("unknown quality '{}'", other)),
    }
}

fn config_source(args: &Args) -> Arc<dyn ConfigSource> {
    if let Some(path) = &args.config {
        tracing::info!("Using configuration file {}", path.display());
        return Arc::new(TomlConfigFile::new(path));
    }

    let responsive = matches!(args.command, Command::Live { responsive: true, .. });
    Arc::new(SharedConfig::new(MattingConfig {
        quality: args.quality,
        use_gpu: !args.cpu,
        model_dirs: vec![args.models.clone()],
        background: args.background.clone(),
        streaming_mode: if responsive {
            StreamingMode::Responsive
        } else {
            StreamingMode::Auto
        },
        ..MattingConfig::default()
    }))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("livematte starting");

    let service = MattingService::with_defaults(config_source(&args))
        .context("Failed to start matting service")?;
    if !service.initialize() {
        tracing::warn!("No matting model could be loaded; frames pass through unchanged");
    }

    let result = match &args.command {
        Command::Live {
            input_device,
            output_device,
            capture_width,
            capture_height,
            output_width,
            output_height,
            fps,
            ..
        } => {
            tracing::info!("Capture: {}x{}", capture_width, capture_height);
            tracing::info!("Output: {}x{}", output_width, output_height);
            tracing::info!("Target FPS: {}", fps);

            let mut capture = WebcamCapture::new(*input_device, *capture_width, *capture_height)
                .context("Failed to initialize webcam capture")?;
            let mut output = V4L2Output::new(output_device, *output_width, *output_height)
                .context("Failed to initialize v4l2loopback output")?;

            run_live(&service, &mut capture, &mut output, *fps)
        }
        Command::Still { input, output_dir } => run_still(&service, input, output_dir.clone()),
    };

    service.shutdown();
    result
}

fn run_still(service: &MattingService, input: &Path, output_dir: Option<PathBuf>) -> Result<()> {
    let mut request = StillRequest::from_path(input);
    if let Some(dir) = output_dir {
        request = request.with_output_dir(dir);
    }

    let result = service.capture_still(&request);
    if !result.success {
        bail!("Still capture of {} failed", input.display());
    }

    let describe = |output: &StillOutput| match output {
        StillOutput::Path(path) => path.display().to_string(),
        StillOutput::Bytes(bytes) => format!("{} bytes", bytes.len()),
    };

    if result.fallback_used {
        tracing::info!("No still model available; {} left unchanged", input.display());
    } else {
        tracing::info!(
            "Matted in {:.0}ms: {}",
            result.elapsed.as_secs_f64() * 1000.0,
            describe(&result.image)
        );
        if let Some(mask) = &result.mask {
            tracing::info!("Mask: {}", describe(mask));
        }
    }

    Ok(())
}

fn run_live<C, O>(
    service: &MattingService,
    capture: &mut C,
    output: &mut O,
    target_fps: u32,
) -> Result<()>
where
    C: CaptureSource,
    O: OutputSink,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut total_capture_time = Duration::ZERO;
    let mut total_submit_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;

    let (cw, ch) = capture.resolution();
    let (ow, oh) = output.resolution();
    tracing::info!("Starting live loop {}x{} -> {}x{}, press Ctrl+C to stop", cw, ch, ow, oh);

    loop {
        let loop_start = Instant::now();

        let capture_start = Instant::now();
        let frame = capture
            .capture_frame()
            .context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();

        let submit_start = Instant::now();
        let bytes = service.submit_frame(&frame);
        total_submit_time += submit_start.elapsed();

        let output_start = Instant::now();
        let shown = Frame::new(bytes, frame.width, frame.height, frame.encoding);
        output
            .write_frame(&shown)
            .context("Failed to write frame")?;
        total_output_time += output_start.elapsed();

        frame_count += 1;

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_submit_ms = total_submit_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let avg_output_ms = total_output_time.as_secs_f64() * 1000.0 / frame_count as f64;
            let total_ms = avg_capture_ms + avg_submit_ms + avg_output_ms;
            let info = service.try_get_latest_frame_info();

            tracing::info!(
                "Frame {}: capture={:.1}ms, submit={:.1}ms, output={:.1}ms, total={:.1}ms, matted={}",
                frame_count,
                avg_capture_ms,
                avg_submit_ms,
                avg_output_ms,
                total_ms,
                if info.available {
                    format!("{}x{}", info.width, info.height)
                } else {
                    "no".to_string()
                }
            );
        }

        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
