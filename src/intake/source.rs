use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::{Frame, Resolution};
use crate::error::ConnectivityError;
use crate::intake::directory::StreamLocator;

/// What a decoder produced on one read attempt.
pub enum BackendRead {
    Frame(Frame),
    EndOfStream,
    // No frame right now; the stream is still open.
    Unavailable(String),
}

/// A decoder attached to one opened stream.
#[async_trait]
pub trait StreamBackend: Send {
    async fn read(&mut self) -> BackendRead;

    fn release(&mut self) {}
}

/// Opens decoders for stream URLs.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    fn accepts(&self, url: &str) -> bool;

    async fn open(&self, url: &str) -> Result<Box<dyn StreamBackend>, ConnectivityError>;
}

/// Start-up milestones, reported for user feedback only.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenProgress {
    LocatorResolved { url: String },
    StreamOpened { handle_id: Uuid },
    FirstFrame,
}

impl OpenProgress {
    pub fn percent(&self) -> u8 {
        match self {
            OpenProgress::LocatorResolved { .. } => 30,
            OpenProgress::StreamOpened { .. } => 60,
            OpenProgress::FirstFrame => 100,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            OpenProgress::LocatorResolved { .. } => "Connecting to the CCTV stream...",
            OpenProgress::StreamOpened { .. } => "Receiving stream information...",
            OpenProgress::FirstFrame => "Streaming video",
        }
    }
}

/// Result of `StreamHandle::next_frame`.
pub enum FrameRead {
    Frame(Frame),
    EndOfStream,
    TransientReadFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    Opened,
    Stalled,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamStats {
    pub handle_id: Uuid,
    pub url: String,
    pub health: StreamHealth,
    pub frames_read: u64,
    pub transient_failures: u64,
}

/// An opened stream. Every frame it returns is at the canonical resolution.
pub struct StreamHandle {
    id: Uuid,
    url: String,
    backend: Box<dyn StreamBackend>,
    resolution: Resolution,
    health: StreamHealth,
    frames_read: u64,
    transient_failures: u64,
    last_frame_at: Option<Instant>,
}

impl StreamHandle {
    fn new(url: String, backend: Box<dyn StreamBackend>, resolution: Resolution) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            backend,
            resolution,
            health: StreamHealth::Opened,
            frames_read: 0,
            transient_failures: 0,
            last_frame_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn health(&self) -> StreamHealth {
        self.health
    }

    pub fn last_frame_at(&self) -> Option<Instant> {
        self.last_frame_at
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            handle_id: self.id,
            url: self.url.clone(),
            health: self.health,
            frames_read: self.frames_read,
            transient_failures: self.transient_failures,
        }
    }

    pub async fn next_frame(&mut self) -> FrameRead {
        if self.health == StreamHealth::Closed {
            return FrameRead::EndOfStream;
        }
        match self.backend.read().await {
            BackendRead::Frame(frame) => {
                self.frames_read += 1;
                self.last_frame_at = Some(Instant::now());
                self.health = StreamHealth::Opened;
                FrameRead::Frame(frame.resized(self.resolution))
            }
            BackendRead::EndOfStream => {
                debug!("Stream {} reported end of stream", self.url);
                self.health = StreamHealth::Closed;
                FrameRead::EndOfStream
            }
            BackendRead::Unavailable(reason) => {
                self.transient_failures += 1;
                self.health = StreamHealth::Stalled;
                FrameRead::TransientReadFailure(reason)
            }
        }
    }

    /// Releases decoder resources. Returns the final statistics.
    pub fn release(mut self) -> StreamStats {
        self.backend.release();
        self.health = StreamHealth::Closed;
        info!(
            "Released stream {} after {} frames ({} transient failures)",
            self.url, self.frames_read, self.transient_failures
        );
        self.stats()
    }
}

/// Locator plus decoders: turns "which camera" into an open, normalized stream.
pub struct FrameSource {
    locator: Box<dyn StreamLocator>,
    openers: Vec<Box<dyn StreamOpener>>,
    resolution: Resolution,
    opens: u32,
}

impl FrameSource {
    pub fn new(locator: Box<dyn StreamLocator>, resolution: Resolution) -> Self {
        Self {
            locator,
            openers: Vec::new(),
            resolution,
            opens: 0,
        }
    }

    pub fn with_opener(mut self, opener: Box<dyn StreamOpener>) -> Self {
        self.openers.push(opener);
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Number of successful opens over the life of this source.
    pub fn opens(&self) -> u32 {
        self.opens
    }

    pub async fn open(
        &mut self,
        progress: &mut (dyn FnMut(OpenProgress) + Send),
    ) -> Result<StreamHandle, ConnectivityError> {
        let url = self.locator.resolve().await.map_err(|e| {
            warn!("Stream locator failed: {}", e);
            ConnectivityError::from(e)
        })?;
        info!("Resolved stream locator {}", url);
        progress(OpenProgress::LocatorResolved { url: url.clone() });

        let opener = self
            .openers
            .iter()
            .find(|opener| opener.accepts(&url))
            .ok_or_else(|| ConnectivityError::UnsupportedLocator(url.clone()))?;
        let backend = opener.open(&url).await?;
        self.opens += 1;
        let handle = StreamHandle::new(url, backend, self.resolution);
        info!("Opened stream {} as {}", handle.url(), handle.id());
        progress(OpenProgress::StreamOpened {
            handle_id: handle.id(),
        });
        Ok(handle)
    }
}
