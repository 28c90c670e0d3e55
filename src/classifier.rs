// Classifier invocation and model assembly

use tracing::{error, info};

use crate::config::{AppConfig, ClassifierConfig};
use crate::decoder::{decode_emotions, decode_gender};
use crate::error::{OverlayError, Result};
use crate::features::{FeatureEncoder, PipelineMode};
use crate::models::{EmotionReading, Gender, LabelSet, LandmarkSet};
use crate::scaler::Scaler;

/// Output width of the emotion classifier
pub const EMOTION_CLASSES: usize = 7;
/// Output width of the gender classifier
pub const GENDER_OUTPUTS: usize = 1;

/// A pretrained network mapping a feature vector to probabilities.
///
/// Implementations must release every tensor created for a call before
/// returning, whether the call succeeds or fails.
pub trait Classifier: Send {
    /// Feature vector length the network was built for
    fn input_width(&self) -> usize;

    /// Number of probabilities emitted per call
    fn output_width(&self) -> usize;

    fn predict(&mut self, features: &[f32]) -> Result<Vec<f32>>;
}

/// Checks a feature vector against a classifier's declared input width
pub fn check_input(classifier: &dyn Classifier, features: &[f32]) -> Result<()> {
    if features.len() != classifier.input_width() {
        return Err(OverlayError::FeatureWidthMismatch {
            expected: classifier.input_width(),
            actual: features.len(),
        });
    }
    Ok(())
}

/// A classifier paired with the encoder its features were fitted with
pub struct ClassifierHead {
    encoder: FeatureEncoder,
    classifier: Box<dyn Classifier>,
}

impl ClassifierHead {
    /// Pairs an encoder with a classifier, failing if their widths or the
    /// classifier's output width disagree.
    pub fn new(
        encoder: FeatureEncoder,
        classifier: Box<dyn Classifier>,
        outputs: usize,
    ) -> Result<Self> {
        if encoder.width() != classifier.input_width() {
            return Err(OverlayError::FeatureWidthMismatch {
                expected: classifier.input_width(),
                actual: encoder.width(),
            });
        }
        if classifier.output_width() != outputs {
            return Err(OverlayError::ModelLoad(format!(
                "classifier emits {} outputs, expected {outputs}",
                classifier.output_width()
            )));
        }
        Ok(Self {
            encoder,
            classifier,
        })
    }

    pub fn mode(&self) -> PipelineMode {
        self.encoder.mode()
    }

    /// Encodes the landmarks and runs the classifier once.
    pub fn infer(&mut self, landmarks: &LandmarkSet) -> Result<Vec<f32>> {
        let features = self.encoder.encode(landmarks)?;
        check_input(self.classifier.as_ref(), &features)?;
        let probabilities = self.classifier.predict(&features)?;
        if probabilities.len() != self.classifier.output_width() {
            return Err(OverlayError::InvalidProbabilities(format!(
                "classifier returned {} values, declared {}",
                probabilities.len(),
                self.classifier.output_width()
            )));
        }
        Ok(probabilities)
    }
}

/// Everything needed to label a face once loading has finished
pub struct Models {
    emotion: ClassifierHead,
    gender: Option<ClassifierHead>,
}

impl Models {
    pub fn new(emotion: ClassifierHead, gender: Option<ClassifierHead>) -> Result<Self> {
        if let Some(gender) = &gender {
            if gender.mode() != emotion.mode() {
                return Err(OverlayError::ModelLoad(
                    "emotion and gender classifiers use different feature encodings".to_string(),
                ));
            }
        }
        Ok(Self { emotion, gender })
    }

    /// Runs every classifier on one face and decodes the results
    pub fn label(&mut self, landmarks: &LandmarkSet) -> Result<LabelSet> {
        let emotions: EmotionReading = decode_emotions(&self.emotion.infer(landmarks)?)?;
        let gender: Option<Gender> = match self.gender.as_mut() {
            Some(head) => Some(decode_gender(&head.infer(landmarks)?)?),
            None => None,
        };
        Ok(LabelSet { emotions, gender })
    }

    /// Loads scalers and ONNX classifiers named by the configuration.
    ///
    /// Blocking; meant to run off the frame path.
    #[cfg(feature = "onnx")]
    pub fn load(config: &AppConfig) -> Result<Self> {
        let emotion = load_head(config.pipeline, &config.emotion, EMOTION_CLASSES)
            .inspect_err(|e| error!("Failed to load emotion classifier: {}", e))?;
        let gender = match &config.gender {
            Some(gender) => Some(
                load_head(config.pipeline, gender, GENDER_OUTPUTS)
                    .inspect_err(|e| error!("Failed to load gender classifier: {}", e))?,
            ),
            None => None,
        };
        info!(
            "Models ready ({:?} features, gender {})",
            config.pipeline,
            if gender.is_some() { "on" } else { "off" }
        );
        Self::new(emotion, gender)
    }
}

/// Builds the encoder for a classifier in the given mode
pub fn build_encoder(mode: PipelineMode, config: &ClassifierConfig) -> Result<FeatureEncoder> {
    match mode {
        PipelineMode::Coordinates => {
            let path = config.scaler_path.as_ref().ok_or_else(|| {
                OverlayError::Config(format!(
                    "coordinate features need a scaler for {}",
                    config.model_path.display()
                ))
            })?;
            Ok(FeatureEncoder::Coordinates(Scaler::load(path)?))
        }
        PipelineMode::Raster => Ok(FeatureEncoder::Raster),
    }
}

#[cfg(feature = "onnx")]
fn load_head(mode: PipelineMode, config: &ClassifierConfig, outputs: usize) -> Result<ClassifierHead> {
    let encoder = build_encoder(mode, config)?;
    let classifier = onnx::OnnxClassifier::load(&config.model_path, encoder.width(), outputs)?;
    ClassifierHead::new(encoder, Box::new(classifier), outputs)
}

#[cfg(feature = "onnx")]
pub mod onnx {
    use std::path::Path;

    use ort::session::Session;
    use ort::value::Value;
    use tracing::{error, info};

    use super::{check_input, Classifier};
    use crate::error::{OverlayError, Result};

    /// Classifier backed by an ONNX Runtime session
    pub struct OnnxClassifier {
        session: Session,
        input_width: usize,
        output_width: usize,
    }

    impl OnnxClassifier {
        /// Loads a model taking `[1, input_width]` and emitting
        /// `[1, output_width]`
        pub fn load<P: AsRef<Path>>(
            model_path: P,
            input_width: usize,
            output_width: usize,
        ) -> Result<Self> {
            let model_path = model_path.as_ref();
            let session = Session::builder()
                .map_err(|e| {
                    OverlayError::ModelLoad(format!("Failed to create session builder: {e}"))
                })?
                .commit_from_file(model_path)
                .map_err(|e| {
                    error!("Failed to load ONNX model: {}", e);
                    OverlayError::ModelLoad(format!(
                        "ONNX model load failed for {}: {e}",
                        model_path.display()
                    ))
                })?;

            info!(
                "Loaded classifier {} ([1, {}] -> [1, {}])",
                model_path.display(),
                input_width,
                output_width
            );
            Ok(Self {
                session,
                input_width,
                output_width,
            })
        }
    }

    impl Classifier for OnnxClassifier {
        fn input_width(&self) -> usize {
            self.input_width
        }

        fn output_width(&self) -> usize {
            self.output_width
        }

        fn predict(&mut self, features: &[f32]) -> Result<Vec<f32>> {
            check_input(&*self, features)?;

            let input_array =
                ndarray::Array2::from_shape_vec((1, self.input_width), features.to_vec())?;
            let input_tensor = Value::from_array(input_array).map_err(|e| {
                OverlayError::OnnxRuntime(format!("Failed to create input tensor: {e}"))
            })?;

            let outputs = self.session.run(ort::inputs![input_tensor]).map_err(|e| {
                error!("ONNX inference failed: {}", e);
                OverlayError::OnnxRuntime(format!("Inference failed: {e}"))
            })?;

            let probabilities = {
                let (_, output_value) = outputs.iter().next().ok_or_else(|| {
                    OverlayError::OnnxRuntime("No output from model".to_string())
                })?;
                let tensor = output_value.try_extract_tensor::<f32>().map_err(|e| {
                    OverlayError::OnnxRuntime(format!("Failed to extract output tensor: {e}"))
                })?;
                tensor.1.to_vec()
            };

            // Output tensors go back to the runtime before the caller sees the values.
            drop(outputs);
            Ok(probabilities)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Emotion, Landmark, MESH_POINTS};

    struct FixedClassifier {
        input_width: usize,
        output: Vec<f32>,
    }

    impl Classifier for FixedClassifier {
        fn input_width(&self) -> usize {
            self.input_width
        }

        fn output_width(&self) -> usize {
            self.output.len()
        }

        fn predict(&mut self, features: &[f32]) -> Result<Vec<f32>> {
            check_input(&*self, features)?;
            Ok(self.output.clone())
        }
    }

    fn coordinate_encoder() -> FeatureEncoder {
        let scaler = Scaler::new(vec![0.0; MESH_POINTS * 2], vec![1.0; MESH_POINTS * 2]).unwrap();
        FeatureEncoder::Coordinates(scaler)
    }

    fn face() -> LandmarkSet {
        LandmarkSet::new(vec![Landmark::new(0.4, 0.5, 0.0); MESH_POINTS])
    }

    #[test]
    fn head_rejects_width_mismatch() {
        let classifier = FixedClassifier {
            input_width: 2304,
            output: vec![0.0; EMOTION_CLASSES],
        };
        let result = ClassifierHead::new(coordinate_encoder(), Box::new(classifier), EMOTION_CLASSES);
        assert!(matches!(
            result,
            Err(OverlayError::FeatureWidthMismatch {
                expected: 2304,
                actual: 936
            })
        ));
    }

    #[test]
    fn head_rejects_wrong_output_width() {
        let classifier = FixedClassifier {
            input_width: 2304,
            output: vec![0.0; 3],
        };
        let result = ClassifierHead::new(FeatureEncoder::Raster, Box::new(classifier), EMOTION_CLASSES);
        assert!(matches!(result, Err(OverlayError::ModelLoad(_))));
    }

    #[test]
    fn models_label_emotion_and_gender() {
        let emotion = ClassifierHead::new(
            coordinate_encoder(),
            Box::new(FixedClassifier {
                input_width: 936,
                output: vec![0.05, 0.05, 0.7, 0.1, 0.05, 0.03, 0.02],
            }),
            EMOTION_CLASSES,
        )
        .unwrap();
        let gender = ClassifierHead::new(
            coordinate_encoder(),
            Box::new(FixedClassifier {
                input_width: 936,
                output: vec![0.8],
            }),
            GENDER_OUTPUTS,
        )
        .unwrap();

        let mut models = Models::new(emotion, Some(gender)).unwrap();
        let labels = models.label(&face()).unwrap();

        assert_eq!(labels.emotions.primary.emotion, Emotion::Sad);
        assert_eq!(labels.emotions.secondary.emotion, Emotion::Angry);
        assert_eq!(labels.gender, Some(Gender::Male));
    }

    #[test]
    fn models_reject_mixed_encodings() {
        let emotion = ClassifierHead::new(
            coordinate_encoder(),
            Box::new(FixedClassifier {
                input_width: 936,
                output: vec![0.0; EMOTION_CLASSES],
            }),
            EMOTION_CLASSES,
        )
        .unwrap();
        let gender = ClassifierHead::new(
            FeatureEncoder::Raster,
            Box::new(FixedClassifier {
                input_width: 2304,
                output: vec![0.3],
            }),
            GENDER_OUTPUTS,
        )
        .unwrap();

        assert!(Models::new(emotion, Some(gender)).is_err());
    }

    #[test]
    fn coordinate_mode_requires_scaler_path() {
        let config = ClassifierConfig {
            model_path: "models/emotion/model.onnx".into(),
            scaler_path: None,
        };
        assert!(matches!(
            build_encoder(PipelineMode::Coordinates, &config),
            Err(OverlayError::Config(_))
        ));
        assert_eq!(
            build_encoder(PipelineMode::Raster, &config).unwrap(),
            FeatureEncoder::Raster
        );
    }
}
