use async_trait::async_trait;

use crate::common::{BoundingBox, Detection, DetectionSet, Frame};
use crate::error::DetectorError;
use crate::pipeline::annotate::annotate;
use crate::pipeline::detector::{DetectionOutput, Detector};

/// Reports a fixed list of labels on every frame, laid out left to right.
///
/// Used when no model is configured; the pipeline still runs end to end.
pub struct StubDetector {
    labels: Vec<String>,
    confidence: f32,
}

impl StubDetector {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            confidence: 0.9,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl Detector for StubDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn detect(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<DetectionOutput, DetectorError> {
        let resolution = frame.resolution();
        let slot = resolution.width as f32 / self.labels.len().max(1) as f32;
        let top = resolution.height as f32 * 0.4;
        let bottom = resolution.height as f32 * 0.7;

        let detections: DetectionSet = self
            .labels
            .iter()
            .enumerate()
            .filter(|_| self.confidence >= confidence_threshold)
            .map(|(i, label)| {
                let left = slot * i as f32 + slot * 0.2;
                let right = slot * (i + 1) as f32 - slot * 0.2;
                Detection::new(
                    label.clone(),
                    self.confidence,
                    BoundingBox::new(left, top, right, bottom),
                )
            })
            .collect::<Vec<_>>()
            .into();

        Ok(DetectionOutput {
            annotated: annotate(frame, &detections),
            detections,
        })
    }
}
