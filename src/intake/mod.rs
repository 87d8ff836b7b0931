pub mod directory;
#[cfg(feature = "stream-ffmpeg")]
pub mod ffmpeg;
pub mod source;
pub mod synthetic;

pub use directory::{ItsDirectory, StaticLocator, StreamLocator};
#[cfg(feature = "stream-ffmpeg")]
pub use ffmpeg::FfmpegOpener;
pub use source::{
    BackendRead, FrameRead, FrameSource, OpenProgress, StreamBackend, StreamHandle, StreamHealth,
    StreamOpener, StreamStats,
};
pub use synthetic::SyntheticOpener;
