// Application configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::detector::DetectorOptions;
use crate::error::{OverlayError, Result};
use crate::features::PipelineMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineMode,
    pub emotion: ClassifierConfig,
    /// Gender labelling is skipped when absent
    pub gender: Option<ClassifierConfig>,
    pub detector: DetectorConfig,
    pub capture: CaptureConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    /// Required in coordinate mode
    #[serde(default)]
    pub scaler_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub options: DetectorOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames buffered between capture and processing; extra frames are dropped
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// TrueType font for labels; boxes only without one
    pub font_path: Option<PathBuf>,
    pub font_size: f32,
    pub line_spacing: f32,
    pub box_thickness: u32,
}

impl ClassifierConfig {
    fn under(dir: &str) -> Self {
        Self {
            model_path: PathBuf::from(format!("models/{dir}/model.onnx")),
            scaler_path: Some(PathBuf::from(format!("models/{dir}/scaler.json"))),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineMode::default(),
            emotion: ClassifierConfig::under("emotion"),
            gender: Some(ClassifierConfig::under("gender")),
            detector: DetectorConfig::default(),
            capture: CaptureConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self::under("emotion")
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/face_mesh.onnx"),
            options: DetectorOptions::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
            channel_capacity: 4,
        }
    }
}

impl CaptureConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.fps.max(1)))
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            font_path: None,
            font_size: 20.0,
            line_spacing: 18.0,
            box_thickness: 3,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a JSON file. Missing sections and fields
    /// take their defaults; a missing file yields the full default config.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Configuration file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            OverlayError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_capture_and_detector_settings() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline, PipelineMode::Coordinates);
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!(config.capture.fps, 30);

        let options = config.detector.options;
        assert_eq!(options.max_faces, 1);
        assert!(options.refine_landmarks);
        assert_eq!(options.min_detection_confidence, 0.5);
        assert_eq!(options.min_tracking_confidence, 0.5);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "pipeline": "raster",
                "gender": null,
                "capture": { "fps": 15 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.pipeline, PipelineMode::Raster);
        assert!(config.gender.is_none());
        assert_eq!(config.capture.fps, 15);
        assert_eq!(config.capture.width, 640);
        assert_eq!(config.overlay.box_thickness, 3);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("emotion_overlay_missing_config.json");
        fs::remove_file(&path).ok();
        let config = AppConfig::load(&path).unwrap();
        assert!(config.gender.is_some());
    }

    #[test]
    fn save_and_load_config() {
        let path = std::env::temp_dir().join("emotion_overlay_config_test.json");
        let mut config = AppConfig::default();
        config.capture.fps = 10;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.capture.fps, 10);
        assert_eq!(loaded.emotion, config.emotion);

        fs::remove_file(path).ok();
    }

    #[test]
    fn frame_interval_follows_fps() {
        let capture = CaptureConfig {
            fps: 50,
            ..CaptureConfig::default()
        };
        assert_eq!(capture.frame_interval(), Duration::from_millis(20));
    }
}
