//! Synthetic `stub://` streams for demos and offline runs.
//!
//! `stub://<name>?frames=<n>&fps=<f>` produces generated road-like frames in
//! capture (BGR) format. Without `frames` the stream never ends.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use rand::Rng;
use std::time::Duration;
use tracing::info;

use crate::common::{Frame, PixelFormat, Resolution};
use crate::error::ConnectivityError;
use crate::intake::source::{BackendRead, StreamBackend, StreamOpener};

const SCHEME: &str = "stub://";
const DEFAULT_FPS: u32 = 15;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    pub frame_limit: Option<u64>,
    pub fps: u32,
    pub resolution: Resolution,
}

impl SyntheticConfig {
    pub fn parse(url: &str) -> Result<Self, ConnectivityError> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| ConnectivityError::UnsupportedLocator(url.to_string()))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));

        let mut config = Self {
            name: name.to_string(),
            frame_limit: None,
            fps: DEFAULT_FPS,
            resolution: Resolution::new(800, 600),
        };
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let invalid = || ConnectivityError::Open {
                url: url.to_string(),
                reason: format!("invalid value '{}' for '{}'", value, key),
            };
            match key {
                "frames" => config.frame_limit = Some(value.parse().map_err(|_| invalid())?),
                "fps" => config.fps = value.parse().map_err(|_| invalid())?,
                _ => {}
            }
        }
        Ok(config)
    }
}

pub struct SyntheticOpener;

#[async_trait]
impl StreamOpener for SyntheticOpener {
    fn accepts(&self, url: &str) -> bool {
        url.starts_with(SCHEME)
    }

    async fn open(&self, url: &str) -> Result<Box<dyn StreamBackend>, ConnectivityError> {
        let config = SyntheticConfig::parse(url)?;
        info!("Synthetic stream '{}' connected", config.name);
        Ok(Box::new(SyntheticStream::new(config)))
    }
}

pub struct SyntheticStream {
    config: SyntheticConfig,
    frame_count: u64,
}

impl SyntheticStream {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
        }
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.config.fps.max(1)))
    }

    // Grey road, lane marks, and one "vehicle" block drifting across.
    fn generate(&self) -> RgbImage {
        let Resolution { width, height } = self.config.resolution;
        let mut rng = rand::rng();
        let mut pixels = RgbImage::from_pixel(width, height, Rgb([90, 90, 90]));

        let lane_x = width / 2;
        for y in (0..height).filter(|y| (y / 20) % 2 == 0) {
            for x in lane_x.saturating_sub(2)..(lane_x + 2).min(width) {
                pixels.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }

        let block = (width / 8).max(1);
        let offset = ((self.frame_count * 8) % u64::from(width)) as u32;
        let top = height / 2;
        for y in top..(top + block).min(height) {
            for x in offset..(offset + block).min(width) {
                let jitter: u8 = rng.random_range(0..16);
                pixels.put_pixel(x, y, Rgb([40 + jitter, 40, 200]));
            }
        }
        pixels
    }
}

#[async_trait]
impl StreamBackend for SyntheticStream {
    async fn read(&mut self) -> BackendRead {
        if let Some(limit) = self.config.frame_limit {
            if self.frame_count >= limit {
                return BackendRead::EndOfStream;
            }
        }
        tokio::time::sleep(self.frame_interval()).await;
        let pixels = self.generate();
        self.frame_count += 1;
        BackendRead::Frame(Frame::new(pixels, PixelFormat::Bgr))
    }
}
