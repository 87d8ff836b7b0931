pub mod app;
pub mod common;
pub mod config;
pub mod error;
pub mod intake;
pub mod pipeline;

pub use app::{
    ChannelObserver, ControllerHandle, ControllerReport, ObserverSet, SessionController,
    SessionControllerBuilder, SessionEvent, SessionObserver, TerminationReason, TracingObserver,
};
pub use config::Configuration;
pub use error::{AnalysisError, AppError, ConnectivityError, DetectorError, DirectoryError};
pub use intake::{FrameSource, StreamLocator, StreamOpener};
pub use pipeline::{AnalysisSession, AnalysisStatus, Detector, LiveState, SceneDescriber};
