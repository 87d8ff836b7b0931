use async_trait::async_trait;

use crate::common::{DetectionSet, Frame};
use crate::error::DetectorError;

/// Detections for one frame plus the frame rendered with them.
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    pub detections: DetectionSet,
    pub annotated: Frame,
}

/// Object detector contract.
///
/// Each call is independent of the ones before it. Latency is unbounded.
#[async_trait]
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<DetectionOutput, DetectorError>;
}
