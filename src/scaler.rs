// Z-score scaler parameters for coordinate features

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OverlayError, Result};

/// Per-feature mean and scale, fitted alongside a classifier.
///
/// Immutable once loaded; the pipeline only reads it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

impl Scaler {
    /// Creates a scaler after validating the parameter pair
    pub fn new(mean: Vec<f32>, scale: Vec<f32>) -> Result<Self> {
        let scaler = Self { mean, scale };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Loads a scaler from a JSON file holding `mean` and `scale` arrays
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            OverlayError::ScalerLoad(format!("Failed to read {}: {e}", path.display()))
        })?;
        let scaler = Self::from_json(&content)?;
        info!("Loaded scaler with {} features from {}", scaler.len(), path.display());
        Ok(scaler)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let scaler: Self = serde_json::from_str(content)
            .map_err(|e| OverlayError::ScalerLoad(format!("Malformed scaler JSON: {e}")))?;
        scaler.validate()?;
        Ok(scaler)
    }

    fn validate(&self) -> Result<()> {
        if self.mean.len() != self.scale.len() {
            return Err(OverlayError::ScalerLoad(format!(
                "mean has {} entries but scale has {}",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.mean.is_empty() {
            return Err(OverlayError::ScalerLoad("scaler is empty".to_string()));
        }
        if let Some(i) = self.mean.iter().position(|m| !m.is_finite()) {
            return Err(OverlayError::ScalerLoad(format!("mean[{i}] is not finite")));
        }
        if let Some(i) = self
            .scale
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(OverlayError::ScalerLoad(format!(
                "scale[{i}] must be finite and non-zero"
            )));
        }
        Ok(())
    }

    /// Number of features the scaler was fitted on
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    /// Applies `(value - mean) / scale` element-wise.
    pub fn transform(&self, values: &[f32]) -> Result<Vec<f32>> {
        if values.len() != self.len() {
            return Err(OverlayError::FeatureWidthMismatch {
                expected: self.len(),
                actual: values.len(),
            });
        }

        Ok(values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (mean, scale))| (v - mean) / scale)
            .collect())
    }
}
