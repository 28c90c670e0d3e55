// Face landmark detection

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OverlayError, Result};
use crate::models::{Frame, Landmark, LandmarkSet, MESH_POINTS};

/// Side of the square face mesh input, in pixels
pub const INPUT_SIZE: u32 = 192;

/// Settings handed to a landmark detector
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    pub max_faces: usize,
    /// Keep the iris points some models emit after the base mesh
    pub refine_landmarks: bool,
    /// Face score needed to report a face that was absent last frame
    pub min_detection_confidence: f32,
    /// Face score needed to keep reporting a face seen last frame
    pub min_tracking_confidence: f32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            max_faces: 1,
            refine_landmarks: true,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

impl DetectorOptions {
    /// Threshold for the current frame given whether a face was tracked
    pub fn threshold(&self, tracking: bool) -> f32 {
        if tracking {
            self.min_tracking_confidence
        } else {
            self.min_detection_confidence
        }
    }
}

/// Produces landmark sets for the faces found in a frame.
///
/// Returns at most `max_faces` sets, most confident first; an empty vector
/// means no face.
pub trait LandmarkDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<LandmarkSet>>;
}

/// Turns raw face mesh output into landmark sets.
///
/// `coords` holds `(x, y, z)` triples in input pixels. `score` is the face
/// probability, when the model emits one; it is gated by the detection or
/// tracking threshold depending on `tracking`, which is updated for the
/// next frame.
pub fn decode_mesh(
    coords: &[f32],
    score: Option<f32>,
    options: &DetectorOptions,
    tracking: &mut bool,
) -> Result<Vec<LandmarkSet>> {
    let threshold = options.threshold(*tracking);
    if let Some(score) = score {
        if score < threshold {
            debug!("Face score {:.2} below {:.2}", score, threshold);
            *tracking = false;
            return Ok(Vec::new());
        }
    }

    if coords.len() < MESH_POINTS * 3 {
        *tracking = false;
        return Err(OverlayError::LandmarkDetection(format!(
            "Face mesh returned {} values, expected at least {}",
            coords.len(),
            MESH_POINTS * 3
        )));
    }

    let count = if options.refine_landmarks {
        coords.len() / 3
    } else {
        MESH_POINTS
    };
    let size = INPUT_SIZE as f32;
    let points = coords
        .chunks_exact(3)
        .take(count)
        .map(|p| Landmark::new(p[0] / size, p[1] / size, p[2] / size))
        .collect();

    *tracking = true;
    Ok(vec![LandmarkSet::new(points)])
}

#[cfg(feature = "onnx")]
pub use face_mesh::FaceMeshDetector;

#[cfg(feature = "onnx")]
mod face_mesh {
    use std::path::Path;

    use image::imageops::FilterType;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Value;
    use tracing::{error, info};

    use super::{decode_mesh, DetectorOptions, LandmarkDetector, INPUT_SIZE};
    use crate::error::{OverlayError, Result};
    use crate::models::{Frame, LandmarkSet};

    /// MediaPipe face mesh model run on the whole frame with ONNX Runtime.
    ///
    /// Handles a single face; `max_faces` above one still yields at most one
    /// set.
    pub struct FaceMeshDetector {
        session: Session,
        options: DetectorOptions,
        tracking: bool,
    }

    impl FaceMeshDetector {
        pub fn load<P: AsRef<Path>>(model_path: P, options: DetectorOptions) -> Result<Self> {
            let model_path = model_path.as_ref();
            let session = Session::builder()
                .map_err(|e| {
                    OverlayError::ModelLoad(format!("Failed to create session builder: {e}"))
                })?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(model_path)
                .map_err(|e| {
                    error!("Failed to load face mesh model: {}", e);
                    OverlayError::ModelLoad(format!(
                        "Face mesh load failed for {}: {e}",
                        model_path.display()
                    ))
                })?;

            info!("Loaded face mesh from {}", model_path.display());
            Ok(Self {
                session,
                options,
                tracking: false,
            })
        }

        fn preprocess(frame: &Frame) -> Result<ndarray::Array4<f32>> {
            let image = frame.to_rgb_image()?;
            let resized =
                image::imageops::resize(&image, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

            let size = INPUT_SIZE as usize;
            let data: Vec<f32> = resized
                .into_raw()
                .into_iter()
                .map(|v| (v as f32 / 127.5) - 1.0)
                .collect();
            Ok(ndarray::Array4::from_shape_vec((1, size, size, 3), data)?)
        }
    }

    impl LandmarkDetector for FaceMeshDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<LandmarkSet>> {
            if self.options.max_faces == 0 {
                return Ok(Vec::new());
            }

            let input_tensor = Value::from_array(Self::preprocess(frame)?).map_err(|e| {
                OverlayError::LandmarkDetection(format!("Failed to create input tensor: {e}"))
            })?;
            let outputs = self
                .session
                .run(ort::inputs![input_tensor])
                .map_err(|e| OverlayError::LandmarkDetection(format!("Face mesh failed: {e}")))?;

            let (coords, score) = {
                let mut values = outputs.iter().map(|(_, value)| value);
                let coords = values
                    .next()
                    .ok_or_else(|| {
                        OverlayError::LandmarkDetection("No output from model".to_string())
                    })?
                    .try_extract_tensor::<f32>()?
                    .1
                    .to_vec();
                // Models exported with a face flag emit its logit as the second output.
                let score = match values.next() {
                    Some(value) => {
                        let logit = value.try_extract_tensor::<f32>()?.1.first().copied();
                        logit.map(|l| 1.0 / (1.0 + (-l).exp()))
                    }
                    None => None,
                };
                (coords, score)
            };
            drop(outputs);

            decode_mesh(&coords, score, &self.options, &mut self.tracking)
        }
    }
}
