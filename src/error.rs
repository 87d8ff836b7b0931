use thiserror::Error;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Connectivity Error: {0}")]
    Connectivity(#[from] ConnectivityError),
    #[error("Detector Error: {0}")]
    Detector(#[from] DetectorError),
    #[error("Analysis Error: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

// The stream could not be opened. Fatal to the session, reported once.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectivityError {
    #[error("Failed to resolve a stream locator: {0}")]
    Locator(#[from] DirectoryError),
    #[error("Failed to open stream {url}: {reason}")]
    Open { url: String, reason: String },
    #[error("No stream backend accepts locator {0}")]
    UnsupportedLocator(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Directory credentials are missing")]
    MissingCredentials,
    #[error("Directory service unreachable: {0}")]
    Unreachable(String),
    #[error("Directory service returned status {0}")]
    Status(u16),
    #[error("Directory response could not be parsed: {0}")]
    Malformed(String),
    #[error("Directory returned no cameras inside the requested bounds")]
    NoEntries,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectorError {
    #[error("Failed to load detection model {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("Inference failed: {0}")]
    Inference(String),
}

// A failed scene-description call. Stored on the analysis session as the displayable result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Scene description credentials are missing")]
    MissingCredentials,
    #[error("Failed to encode frame for analysis: {0}")]
    Encoding(String),
    #[error("Failed to reach scene description service: {0}")]
    Transport(String),
    #[error("Scene description service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Scene description quota exhausted: {0}")]
    Quota(String),
    #[error("Scene description response could not be parsed: {0}")]
    Malformed(String),
    #[error("Scene description service returned no text")]
    EmptyResponse,
    #[error("Scene description timed out")]
    TimedOut,
    #[error("{0}")]
    Other(String),
}

impl AnalysisError {
    // Recovers the typed error from a service-stack error.
    pub fn from_boxed(err: tower::BoxError) -> Self {
        if err.is::<tower::timeout::error::Elapsed>() {
            return AnalysisError::TimedOut;
        }
        match err.downcast::<AnalysisError>() {
            Ok(analysis) => *analysis,
            Err(other) => AnalysisError::Other(other.to_string()),
        }
    }
}
