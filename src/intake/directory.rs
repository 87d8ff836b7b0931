use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{DirectoryConfig, GeoBounds};
use crate::error::DirectoryError;

/// Resolves the playable stream URL the session should open.
#[async_trait]
pub trait StreamLocator: Send + Sync {
    async fn resolve(&self) -> Result<String, DirectoryError>;
}

/// A locator that always yields the same URL.
pub struct StaticLocator {
    url: String,
}

impl StaticLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl StreamLocator for StaticLocator {
    async fn resolve(&self) -> Result<String, DirectoryError> {
        Ok(self.url.clone())
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    response: DirectoryBody,
}

#[derive(Debug, Deserialize)]
struct DirectoryBody {
    #[serde(default)]
    data: Vec<CctvEntry>,
}

#[derive(Debug, Deserialize)]
struct CctvEntry {
    #[serde(default)]
    cctvurl: Option<String>,
    #[serde(default)]
    cctvname: Option<String>,
}

/// CCTV directory lookup against the ITS open data API.
pub struct ItsDirectory {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    road_type: String,
    cctv_type: u8,
    bounds: GeoBounds,
}

impl ItsDirectory {
    pub fn new(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            road_type: config.road_type.clone(),
            cctv_type: config.cctv_type,
            bounds: config.bounds,
        })
    }

    fn query(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![
            ("apiKey", api_key.to_string()),
            ("type", self.road_type.clone()),
            ("cctvType", self.cctv_type.to_string()),
            ("minX", self.bounds.min_lon.to_string()),
            ("maxX", self.bounds.max_lon.to_string()),
            ("minY", self.bounds.min_lat.to_string()),
            ("maxY", self.bounds.max_lat.to_string()),
            ("getType", "json".to_string()),
        ]
    }
}

/// Picks the first camera in the directory listing that carries a URL.
pub(crate) fn first_stream_url(body: &str) -> Result<String, DirectoryError> {
    let parsed: DirectoryResponse =
        serde_json::from_str(body).map_err(|e| DirectoryError::Malformed(e.to_string()))?;

    parsed
        .response
        .data
        .into_iter()
        .find_map(|entry| {
            let url = entry.cctvurl.filter(|u| !u.trim().is_empty())?;
            debug!(
                "Directory selected camera {}",
                entry.cctvname.as_deref().unwrap_or("<unnamed>")
            );
            Some(url)
        })
        .ok_or(DirectoryError::NoEntries)
}

#[async_trait]
impl StreamLocator for ItsDirectory {
    async fn resolve(&self) -> Result<String, DirectoryError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(DirectoryError::MissingCredentials)?;

        info!(
            "Querying CCTV directory for bounds lon {}..{} lat {}..{}",
            self.bounds.min_lon, self.bounds.max_lon, self.bounds.min_lat, self.bounds.max_lat
        );

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&self.query(api_key))
            .send()
            .await
            .map_err(|e| {
                warn!("CCTV directory unreachable: {}", e);
                DirectoryError::Unreachable(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(DirectoryError::Status(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DirectoryError::Unreachable(e.to_string()))?;
        first_stream_url(&body)
    }
}
