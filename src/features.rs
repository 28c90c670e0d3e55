// Feature encoders turning landmark sets into classifier input

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};
use crate::models::LandmarkSet;
use crate::scaler::Scaler;

/// Side length of the raster strategy's bitmap
pub const RASTER_SIZE: u32 = 48;

/// Which feature encoding a classifier was trained on
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Z-scored `(x, y)` coordinates of the base mesh
    #[default]
    Coordinates,
    /// 48x48 point-cloud bitmap intensities
    Raster,
}

/// A feature encoding strategy.
///
/// The two strategies produce incompatible vectors; a classifier is paired
/// with exactly one of them when models are assembled.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureEncoder {
    Coordinates(Scaler),
    Raster,
}

impl FeatureEncoder {
    pub fn mode(&self) -> PipelineMode {
        match self {
            FeatureEncoder::Coordinates(_) => PipelineMode::Coordinates,
            FeatureEncoder::Raster => PipelineMode::Raster,
        }
    }

    /// Length of every vector this encoder emits
    pub fn width(&self) -> usize {
        match self {
            FeatureEncoder::Coordinates(scaler) => scaler.len(),
            FeatureEncoder::Raster => (RASTER_SIZE * RASTER_SIZE) as usize,
        }
    }

    pub fn encode(&self, landmarks: &LandmarkSet) -> Result<Vec<f32>> {
        match self {
            FeatureEncoder::Coordinates(scaler) => normalize_coordinates(landmarks, scaler),
            FeatureEncoder::Raster => Ok(rasterize(landmarks)),
        }
    }
}

/// Flattens the base mesh to `[x0, y0, x1, y1, ...]` and z-scores it.
///
/// The mesh must hold exactly `scaler.len() / 2` points.
pub fn normalize_coordinates(landmarks: &LandmarkSet, scaler: &Scaler) -> Result<Vec<f32>> {
    let mesh = landmarks.mesh();
    if mesh.len() * 2 != scaler.len() {
        return Err(OverlayError::FeatureWidthMismatch {
            expected: scaler.len(),
            actual: mesh.len() * 2,
        });
    }

    let flat: Vec<f32> = mesh.iter().flat_map(|p| [p.x, p.y]).collect();
    scaler.transform(&flat)
}

/// Plots each landmark as a lit pixel on a dark 48x48 bitmap and returns
/// the row-major intensities scaled to [0, 1].
///
/// Only the base mesh is plotted. Points falling outside the bitmap are
/// skipped.
pub fn rasterize(landmarks: &LandmarkSet) -> Vec<f32> {
    let mut bitmap = GrayImage::new(RASTER_SIZE, RASTER_SIZE);
    let size = RASTER_SIZE as f32;

    for point in landmarks.mesh() {
        let px = (point.x * size).floor();
        let py = (point.y * size).floor();
        if px < 0.0 || py < 0.0 || px >= size || py >= size {
            continue;
        }
        bitmap.put_pixel(px as u32, py as u32, Luma([255]));
    }

    bitmap
        .into_raw()
        .into_iter()
        .map(|v| v as f32 / 255.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Landmark, MESH_POINTS};

    fn mesh_with(value: f32) -> LandmarkSet {
        LandmarkSet::new(vec![Landmark::new(value, value * 2.0, 0.7); MESH_POINTS])
    }

    #[test]
    fn coordinates_are_z_scored_without_clamping() {
        let width = MESH_POINTS * 2;
        let mean: Vec<f32> = (0..width).map(|i| i as f32 * 0.001).collect();
        let scale: Vec<f32> = (0..width).map(|i| 0.5 + i as f32 * 0.01).collect();
        let scaler = Scaler::new(mean.clone(), scale.clone()).unwrap();

        let landmarks = mesh_with(0.25);
        let out = normalize_coordinates(&landmarks, &scaler).unwrap();

        assert_eq!(out.len(), scaler.len());
        for (i, v) in out.iter().enumerate() {
            let raw = if i % 2 == 0 { 0.25 } else { 0.5 };
            assert_eq!(*v, (raw - mean[i]) / scale[i]);
        }
    }

    #[test]
    fn coordinates_ignore_iris_points() {
        let scaler = Scaler::new(vec![0.0; MESH_POINTS * 2], vec![1.0; MESH_POINTS * 2]).unwrap();
        let mut landmarks = mesh_with(0.1);
        landmarks.points.extend(vec![Landmark::new(0.9, 0.9, 0.0); 10]);

        let out = FeatureEncoder::Coordinates(scaler).encode(&landmarks).unwrap();
        assert_eq!(out.len(), MESH_POINTS * 2);
    }

    #[test]
    fn coordinates_reject_short_mesh() {
        let scaler = Scaler::new(vec![0.0; MESH_POINTS * 2], vec![1.0; MESH_POINTS * 2]).unwrap();
        let landmarks = LandmarkSet::from_xy(&[(0.1, 0.2), (0.3, 0.4)]);

        match normalize_coordinates(&landmarks, &scaler) {
            Err(OverlayError::FeatureWidthMismatch { expected, actual }) => {
                assert_eq!(expected, MESH_POINTS * 2);
                assert_eq!(actual, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_set_rasterizes_to_zeros() {
        let out = rasterize(&LandmarkSet::default());
        assert_eq!(out.len(), 48 * 48);
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn raster_lights_one_pixel_per_point() {
        let landmarks = LandmarkSet::from_xy(&[(0.0, 0.0), (0.5, 0.25), (0.5, 0.25), (1.5, 0.5)]);
        let out = rasterize(&landmarks);

        assert_eq!(out[0], 1.0);
        assert_eq!(out[12 * 48 + 24], 1.0);
        assert_eq!(out.iter().filter(|v| **v == 1.0).count(), 2);
    }

    #[test]
    fn encoder_reports_its_width() {
        assert_eq!(FeatureEncoder::Raster.width(), 2304);
        assert_eq!(FeatureEncoder::Raster.mode(), PipelineMode::Raster);

        let scaler = Scaler::new(vec![0.0; 936], vec![1.0; 936]).unwrap();
        let encoder = FeatureEncoder::Coordinates(scaler);
        assert_eq!(encoder.width(), 936);
        assert_eq!(encoder.mode(), PipelineMode::Coordinates);
    }
}
