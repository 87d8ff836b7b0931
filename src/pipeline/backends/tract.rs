//! YOLO (v8 / 11 export layout) ONNX detector running on tract.
//!
//! Output tensor is `[1, 4 + classes, anchors]` with centre-size boxes in
//! model input pixels. Frames are stretched to the model input size and boxes
//! are scaled back to frame coordinates.

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use std::path::Path;
use std::sync::Arc;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::common::{BoundingBox, Detection, DetectionSet, Frame};
use crate::error::DetectorError;
use crate::pipeline::annotate::annotate;
use crate::pipeline::backends::{apply_nms, coco_label};
use crate::pipeline::detector::{DetectionOutput, Detector};

type Model = TypedRunnableModel<TypedModel>;

const MODEL_INPUT: u32 = 640;

pub struct TractDetector {
    model: Arc<Model>,
    iou_threshold: f32,
}

impl TractDetector {
    pub fn load<P: AsRef<Path>>(model_path: P, iou_threshold: f32) -> Result<Self, DetectorError> {
        let model_path = model_path.as_ref();
        let load_err = |reason: String| DetectorError::ModelLoad {
            path: model_path.display().to_string(),
            reason,
        };
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| load_err(e.to_string()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, MODEL_INPUT as usize, MODEL_INPUT as usize),
                ),
            )
            .map_err(|e| load_err(e.to_string()))?
            .into_optimized()
            .map_err(|e| load_err(e.to_string()))?
            .into_runnable()
            .map_err(|e| load_err(e.to_string()))?;

        info!("Loaded detection model {}", model_path.display());
        Ok(Self {
            model: Arc::new(model),
            iou_threshold,
        })
    }
}

fn build_input(frame: &Frame) -> Tensor {
    let rgb = frame.display_pixels();
    let resized = imageops::resize(&rgb, MODEL_INPUT, MODEL_INPUT, FilterType::Triangle);
    let side = MODEL_INPUT as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });
    input.into_tensor()
}

fn decode(
    outputs: TVec<TValue>,
    confidence_threshold: f32,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<Detection>, DetectorError> {
    let output = outputs
        .first()
        .ok_or_else(|| DetectorError::Inference("model produced no outputs".to_string()))?;
    let view = output
        .to_array_view::<f32>()
        .map_err(|e| DetectorError::Inference(e.to_string()))?;
    let shape = view.shape().to_vec();
    if shape.len() != 3 || shape[1] <= 4 {
        return Err(DetectorError::Inference(format!(
            "unexpected output shape {:?}",
            shape
        )));
    }
    let (attributes, anchors) = (shape[1], shape[2]);

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..attributes)
            .map(|a| (a - 4, view[[0, a, anchor]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < confidence_threshold {
            continue;
        }
        let cx = view[[0, 0, anchor]];
        let cy = view[[0, 1, anchor]];
        let w = view[[0, 2, anchor]];
        let h = view[[0, 3, anchor]];
        detections.push(Detection::new(
            coco_label(class_id),
            score,
            BoundingBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ),
        ));
    }
    Ok(detections)
}

#[async_trait]
impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    async fn detect(
        &self,
        frame: &Frame,
        confidence_threshold: f32,
    ) -> Result<DetectionOutput, DetectorError> {
        let model = self.model.clone();
        let iou_threshold = self.iou_threshold;
        let owned = frame.clone();

        let detections = tokio::task::spawn_blocking(move || {
            let resolution = owned.resolution();
            let scale_x = resolution.width as f32 / MODEL_INPUT as f32;
            let scale_y = resolution.height as f32 / MODEL_INPUT as f32;
            let outputs = model
                .run(tvec!(build_input(&owned).into()))
                .map_err(|e| DetectorError::Inference(e.to_string()))?;
            let raw = decode(outputs, confidence_threshold, scale_x, scale_y)?;
            Ok::<_, DetectorError>(apply_nms(raw, iou_threshold))
        })
        .await
        .map_err(|e| DetectorError::Inference(e.to_string()))??;

        debug!("tract detected {} objects", detections.len());
        let detections = DetectionSet::new(detections);
        Ok(DetectionOutput {
            annotated: annotate(frame, &detections),
            detections,
        })
    }
}
