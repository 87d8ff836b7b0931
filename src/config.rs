use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::AppError;

const ENV_PREFIX: &str = "CCTV_INSIGHT";
const GENAI_API_KEY: &str = "GENAI_API_KEY";
const ITS_API_KEY: &str = "ITS_API_KEY";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub log_level: String,
    pub stream: StreamConfig,
    pub directory: DirectoryConfig,
    pub detector: DetectorConfig,
    pub analysis: AnalysisConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stream: StreamConfig::default(),
            directory: DirectoryConfig::default(),
            detector: DetectorConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

// Frames are always normalized to `Resolution::CANONICAL`; size keys are rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    // Skips the directory lookup when set.
    pub url: Option<String>,
    pub retry_delay_ms: u64,
    pub cycle_yield_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            retry_delay_ms: 5_000,
            cycle_yield_ms: 10,
        }
    }
}

impl StreamConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cycle_yield(&self) -> Duration {
        Duration::from_millis(self.cycle_yield_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Default for GeoBounds {
    // Seoul
    fn default() -> Self {
        Self {
            min_lon: 126.76,
            max_lon: 127.18,
            min_lat: 37.41,
            max_lat: 37.70,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub road_type: String,
    pub cctv_type: u8,
    pub bounds: GeoBounds,
    pub request_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://openapi.its.go.kr:9443/cctvInfo".to_string(),
            api_key: None,
            road_type: "its".to_string(),
            cctv_type: 1,
            bounds: GeoBounds::default(),
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackendKind {
    Stub,
    Tract,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub backend: DetectorBackendKind,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub model_path: Option<String>,
    // Labels reported by the stub backend on every frame.
    pub stub_labels: Vec<String>,
    pub stub_confidence: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            backend: DetectorBackendKind::Stub,
            confidence_threshold: 0.5,
            iou_threshold: 0.45,
            model_path: None,
            stub_labels: vec!["car".to_string(), "person".to_string()],
            stub_confidence: 0.9,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub jpeg_quality: u8,
    pub drain_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            request_timeout_secs: 60,
            jpeg_quality: 85,
            drain_timeout_secs: 30,
        }
    }
}

impl AnalysisConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Zero disables the per-call limit.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}

impl Configuration {
    /// Defaults, then the optional file, then `CCTV_INSIGHT__*` variables.
    /// `GENAI_API_KEY` and `ITS_API_KEY` fill credentials left unset.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut configuration: Configuration = settings.try_deserialize()?;
        configuration.apply_credential_fallbacks(
            std::env::var(GENAI_API_KEY).ok(),
            std::env::var(ITS_API_KEY).ok(),
        );
        Ok(configuration)
    }

    fn apply_credential_fallbacks(&mut self, genai_key: Option<String>, its_key: Option<String>) {
        if self.analysis.api_key.is_none() {
            self.analysis.api_key = genai_key.filter(|k| !k.is_empty());
        }
        if self.directory.api_key.is_none() {
            self.directory.api_key = its_key.filter(|k| !k.is_empty());
        }
    }

    pub fn log_level(&self) -> Result<tracing::Level, AppError> {
        self.log_level.parse().map_err(|_| {
            AppError::Config(config::ConfigError::Message(format!(
                "unknown log level '{}', expected one of trace, debug, info, warn, error",
                self.log_level
            )))
        })
    }
}
