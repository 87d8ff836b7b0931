use async_trait::async_trait;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::common::Frame;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::pipeline::scene::describer::SceneDescriber;
use crate::pipeline::scene::prompt::scene_prompt;

// ============================================================================
// REQUEST TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Image { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: &'static str,
    data: String,
}

// ============================================================================
// RESPONSE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

// ============================================================================
// CLIENT
// ============================================================================

/// Gemini `generateContent` over REST, one image and one prompt per call.
pub struct GeminiDescriber {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    jpeg_quality: u8,
}

impl GeminiDescriber {
    pub fn new(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AnalysisError::MissingCredentials)?;
        // Deadline enforcement lives in the describer stack; this only guards
        // against sockets that never close.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, AnalysisError> {
    let rgb = frame.display_pixels();
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| AnalysisError::Encoding(e.to_string()))?;
    Ok(buf)
}

fn build_request(prompt: String, jpeg: &[u8]) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content {
            parts: vec![
                RequestPart::Text { text: prompt },
                RequestPart::Image {
                    inline_data: InlineData {
                        mime_type: "image/jpeg",
                        data: base64::engine::general_purpose::STANDARD.encode(jpeg),
                    },
                },
            ],
        }],
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, AnalysisError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(AnalysisError::EmptyResponse);
    }
    Ok(text)
}

#[async_trait]
impl SceneDescriber for GeminiDescriber {
    async fn describe(&self, image: &Frame, labels: &[String]) -> Result<String, AnalysisError> {
        let quality = self.jpeg_quality;
        let frame = image.clone();
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
            .await
            .map_err(|e| AnalysisError::Encoding(e.to_string()))??;
        let request = build_request(scene_prompt(labels), &jpeg);

        debug!(
            "Sending {} byte frame with {} labels to {}",
            jpeg.len(),
            labels.len(),
            self.model
        );

        let response = self
            .http_client
            .post(self.url())
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Scene description request failed with HTTP {}", status);
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(AnalysisError::Quota(body));
            }
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;
        extract_text(parsed)
    }
}
