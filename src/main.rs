use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use emotion_overlay::capture::ImageSequenceSource;
use emotion_overlay::classifier::Models;
use emotion_overlay::config::AppConfig;
use emotion_overlay::detector::FaceMeshDetector;
use emotion_overlay::error::{OverlayError, Result};
use emotion_overlay::overlay::OverlayRenderer;
use emotion_overlay::session::{AnnotationSession, Readiness};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Annotates faces in a frame sequence with emotion and gender labels
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON configuration file; defaults apply when it does not exist
    #[arg(short, long, default_value = "overlay.json")]
    config: PathBuf,

    /// Directory of frames to replay in file-name order
    #[arg(short, long)]
    input: PathBuf,

    /// Directory receiving the annotated PNGs
    #[arg(short, long)]
    output: PathBuf,

    /// Hold the first frame until models have finished loading
    #[arg(long)]
    wait_for_models: bool,
}

/// Initializes the logging system (file only, no console output)
fn init_logging() -> Result<()> {
    let log_file = std::fs::File::create("emotion_overlay.log").map_err(OverlayError::Io)?;

    let file_layer = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(file_layer)
        .init();

    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    let args = Args::parse();

    let config = AppConfig::load(&args.config)?;
    std::fs::create_dir_all(&args.output)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run(args, config));
    if let Err(e) = &result {
        error!("Application error: {}", e);
    }
    result
}

async fn run(args: Args, config: AppConfig) -> Result<()> {
    let detector = FaceMeshDetector::load(&config.detector.model_path, config.detector.options)?;
    let mut session = AnnotationSession::new(Box::new(detector));
    let renderer = OverlayRenderer::new(config.overlay.clone());

    let loader_config = config.clone();
    session.begin_loading(move || Models::load(&loader_config));
    if args.wait_for_models {
        match session.wait_for_models().await {
            Readiness::Ready => {}
            readiness => warn!(
                "Continuing without labels ({:?}: {})",
                readiness,
                session.failure().unwrap_or("unknown")
            ),
        }
    }

    let capture = &config.capture;
    let source = ImageSequenceSource::new(&args.input).with_size(capture.width, capture.height);
    let mut frames = match session.start_camera(Box::new(source), capture).await {
        Ok(frames) => frames,
        Err(e) => {
            error!("Camera initialization failed: {}", e);
            let path = args.output.join("camera_off.png");
            renderer
                .render_placeholder(capture.width, capture.height)
                .save(&path)?;
            info!("Wrote placeholder {}", path.display());
            return Ok(());
        }
    };

    let mut written = 0usize;
    session
        .run(&mut frames, |frame, annotation| {
            let path = args.output.join(format!("frame_{written:05}.png"));
            renderer.render(frame, annotation)?.save(&path)?;
            written += 1;
            Ok(())
        })
        .await?;
    session.stop_camera().await;

    let stats = session.stats();
    info!(
        "Wrote {} frames ({} faces, {} labelled, {} without models, {} failed)",
        written, stats.faces, stats.labelled, stats.skipped_not_ready, stats.failed
    );
    Ok(())
}
