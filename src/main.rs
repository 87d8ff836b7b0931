use clap::Parser;
use futures::StreamExt;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use cctv_insight::app::{
    ChannelObserver, ControllerHandle, SessionControllerBuilder, SessionEvent, TracingObserver,
};
use cctv_insight::common::Resolution;
use cctv_insight::config::{Configuration, DetectorBackendKind, DetectorConfig};
use cctv_insight::error::{AppError, ConnectivityError, DetectorError};
use cctv_insight::intake::{FrameSource, ItsDirectory, StaticLocator, StreamLocator, SyntheticOpener};
use cctv_insight::pipeline::backends::StubDetector;
use cctv_insight::pipeline::{AnalysisStatus, Detector, GeminiDescriber};

#[derive(Parser, Debug)]
#[command(
    name = "cctv-insight",
    version,
    about = "Live CCTV object detection with on-demand scene analysis"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CCTV_INSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Open this stream instead of querying the CCTV directory
    #[arg(long)]
    stream_url: Option<String>,

    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: Level) {
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn build_source(configuration: &Configuration) -> Result<FrameSource, AppError> {
    let locator: Box<dyn StreamLocator> = match &configuration.stream.url {
        Some(url) => Box::new(StaticLocator::new(url.clone())),
        None => Box::new(
            ItsDirectory::new(&configuration.directory).map_err(ConnectivityError::from)?,
        ),
    };

    let source = FrameSource::new(locator, Resolution::CANONICAL)
        .with_opener(Box::new(SyntheticOpener));
    #[cfg(feature = "stream-ffmpeg")]
    let source = source.with_opener(Box::new(cctv_insight::intake::FfmpegOpener));
    Ok(source)
}

fn build_detector(config: &DetectorConfig) -> Result<Arc<dyn Detector>, AppError> {
    match config.backend {
        DetectorBackendKind::Stub => Ok(Arc::new(
            StubDetector::new(config.stub_labels.clone()).with_confidence(config.stub_confidence),
        )),
        DetectorBackendKind::Tract => {
            let path = config.model_path.clone().ok_or_else(|| DetectorError::ModelLoad {
                path: String::new(),
                reason: "detector.model_path is not set".to_string(),
            })?;
            load_tract(path, config.iou_threshold)
        }
    }
}

#[cfg(feature = "detector-tract")]
fn load_tract(path: String, iou_threshold: f32) -> Result<Arc<dyn Detector>, AppError> {
    let detector = cctv_insight::pipeline::backends::TractDetector::load(path, iou_threshold)?;
    Ok(Arc::new(detector))
}

#[cfg(not(feature = "detector-tract"))]
fn load_tract(path: String, _iou_threshold: f32) -> Result<Arc<dyn Detector>, AppError> {
    Err(DetectorError::ModelLoad {
        path,
        reason: "built without the detector-tract feature".to_string(),
    }
    .into())
}

// Every line on stdin asks for an analysis of the current frame. Runs on a
// plain thread so a pending read never holds up runtime shutdown.
fn spawn_trigger_reader(handle: ControllerHandle) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("stdin-triggers".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if line.is_err() || !handle.trigger() {
                    break;
                }
            }
        })?;
    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Progress(progress) => {
            println!("[{:>3}%] {}", progress.percent(), progress.message())
        }
        SessionEvent::AnalysisChanged(session) => match session.status() {
            AnalysisStatus::Pending => {
                if let Some(captured) = session.captured() {
                    println!("{}", captured.caption());
                }
                println!("Analyzing scene...");
            }
            AnalysisStatus::Completed | AnalysisStatus::Failed => {
                if let Some(result) = session.result() {
                    if result.is_error() {
                        eprintln!("{}", result.text());
                    } else {
                        println!("{}", result.text());
                    }
                }
            }
            AnalysisStatus::Idle | AnalysisStatus::Capturing => {}
        },
        SessionEvent::Terminated(reason) => println!("Session ended: {:?}", reason),
        SessionEvent::LiveUpdate(_) => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let mut configuration = Configuration::load(cli.config.as_deref())?;
    if let Some(url) = cli.stream_url {
        configuration.stream.url = Some(url);
    }
    if let Some(level) = cli.log_level {
        configuration.log_level = level;
    }
    init_logging(configuration.log_level()?);

    let source = build_source(&configuration)?;
    let detector = build_detector(&configuration.detector)?;
    let describer = Arc::new(GeminiDescriber::new(&configuration.analysis)?);

    let (terminal, mut events) = ChannelObserver::new();
    let (controller, handle) = SessionControllerBuilder::new(source, detector, describer)
        .configuration(&configuration)
        .observer("log", Box::new(TracingObserver))
        .observer("terminal", Box::new(terminal.without_live_updates()))
        .build()?;

    println!("Press Enter to analyze the current frame. Ctrl-C quits.");
    let controller_task = tokio::spawn(controller.run());
    spawn_trigger_reader(handle)?;

    let printer = async {
        while let Some(event) = events.next().await {
            print_event(&event);
            if matches!(event, SessionEvent::Terminated(_)) {
                break;
            }
        }
    };

    tokio::select! {
        _ = printer => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            controller_task.abort();
        }
    }

    match controller_task.await {
        Ok(report) => {
            if let Some(stats) = report.stats {
                info!(
                    "Read {} frames from {} ({} transient failures, stream {:?})",
                    stats.frames_read, stats.url, stats.transient_failures, stats.health
                );
            }
        }
        Err(err) if err.is_cancelled() => {}
        Err(err) => warn!("Controller task failed: {}", err),
    }
    Ok(())
}
