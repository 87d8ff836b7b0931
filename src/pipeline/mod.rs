pub mod annotate;
pub mod backends;
pub mod detector;
pub mod live_state;
pub mod scene;
pub mod session;

pub use detector::{DetectionOutput, Detector};
pub use live_state::{LivePublisher, LiveReader, LiveState};
pub use scene::{
    DescriberService, DescriberStack, DescriberStackBuilder, GeminiDescriber, SceneDescriber,
    SceneRequest,
};
pub use session::{
    AnalysisResult, AnalysisSession, AnalysisStatus, CapturedScene, Completion,
    CompletionOutcome, Generation,
};
