// Core data models for the emotion overlay

use image::RgbImage;

use crate::error::{OverlayError, Result};

/// Number of points in the base face mesh, without iris refinement.
pub const MESH_POINTS: usize = 468;

/// Represents a single video frame with RGB data
#[derive(Clone, Debug)]
pub struct Frame {
    /// Raw RGB pixel data (width * height * 3 bytes)
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
}

impl Frame {
    /// Creates a new Frame with the given parameters
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
        }
    }

    /// Creates a Frame from a decoded RGB image
    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height)
    }

    /// Views the frame as an RGB image buffer
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            OverlayError::FrameProcessing(format!(
                "Frame buffer of {} bytes does not fit {}x{} RGB",
                self.data.len(),
                self.width,
                self.height
            ))
        })
    }
}

/// A facial keypoint in normalized frame coordinates.
///
/// `x` and `y` are relative to the frame width and height; `z` is relative
/// depth and is not used by any feature encoder.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Landmarks of a single detected face in detector order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LandmarkSet {
    pub points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Builds a set from `(x, y)` pairs with zero depth
    pub fn from_xy(coords: &[(f32, f32)]) -> Self {
        Self::new(
            coords
                .iter()
                .map(|&(x, y)| Landmark::new(x, y, 0.0))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The base mesh points. Iris points appended by landmark refinement are
    /// excluded.
    pub fn mesh(&self) -> &[Landmark] {
        &self.points[..self.points.len().min(MESH_POINTS)]
    }

    /// Iris points appended after the base mesh, if any.
    pub fn iris(&self) -> &[Landmark] {
        &self.points[self.points.len().min(MESH_POINTS)..]
    }
}

/// Axis-aligned rectangle in pixel coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Smallest box enclosing every landmark once scaled to a
    /// `frame_width` x `frame_height` frame. `None` for an empty set.
    pub fn enclosing(landmarks: &LandmarkSet, frame_width: u32, frame_height: u32) -> Option<Self> {
        if landmarks.is_empty() {
            return None;
        }

        let (w, h) = (frame_width as f32, frame_height as f32);
        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;

        for point in &landmarks.points {
            let x = point.x * w;
            let y = point.y * h;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }

        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }
}

/// Emotion classes in classifier output order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Emotion {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprise,
    Fear,
    Disgust,
}

impl Emotion {
    /// Every class, indexed the way the emotion classifier emits them.
    pub const ALL: [Emotion; 7] = [
        Emotion::Neutral,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Angry,
        Emotion::Surprise,
        Emotion::Fear,
        Emotion::Disgust,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Angry => "angry",
            Emotion::Surprise => "surprise",
            Emotion::Fear => "fear",
            Emotion::Disgust => "disgust",
        }
    }
}

impl std::fmt::Display for Emotion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Binary gender category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gender {
    Male,
    Female,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Gender::Male => write!(f, "Male"),
            Gender::Female => write!(f, "Female"),
        }
    }
}

/// An emotion paired with its classifier probability
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionScore {
    /// The emotion class
    pub emotion: Emotion,
    /// Probability (0.0 to 1.0)
    pub probability: f32,
}

impl EmotionScore {
    pub fn new(emotion: Emotion, probability: f32) -> Self {
        Self {
            emotion,
            probability,
        }
    }

    /// Returns the probability as a percentage (0-100)
    pub fn percent(&self) -> u8 {
        (self.probability * 100.0).round() as u8
    }
}

impl std::fmt::Display for EmotionScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}%", self.emotion, self.percent())
    }
}

/// Top two emotions of a probability vector
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionReading {
    pub primary: EmotionScore,
    pub secondary: EmotionScore,
}

/// Labels derived for one face in one frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LabelSet {
    pub emotions: EmotionReading,
    pub gender: Option<Gender>,
}

impl LabelSet {
    /// Overlay text, emotion line first.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Emotion: {} - {}",
            self.emotions.primary, self.emotions.secondary
        )];
        if let Some(gender) = self.gender {
            lines.push(format!("Sex: {gender}"));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounding_box_scales_to_frame() {
        let landmarks = LandmarkSet::from_xy(&[(0.1, 0.2), (0.5, 0.8), (0.3, 0.1)]);
        let bbox = BoundingBox::enclosing(&landmarks, 640, 480).unwrap();

        assert!((bbox.x - 64.0).abs() < 1e-3);
        assert!((bbox.y - 48.0).abs() < 1e-3);
        assert!((bbox.width - 256.0).abs() < 1e-3);
        assert!((bbox.height - 336.0).abs() < 1e-3);
    }

    #[test]
    fn bounding_box_of_empty_set_is_none() {
        assert!(BoundingBox::enclosing(&LandmarkSet::default(), 640, 480).is_none());
    }

    #[test]
    fn mesh_excludes_iris_points() {
        let points = vec![Landmark::default(); MESH_POINTS + 10];
        let set = LandmarkSet::new(points);
        assert_eq!(set.mesh().len(), MESH_POINTS);
        assert_eq!(set.iris().len(), 10);

        let short = LandmarkSet::from_xy(&[(0.1, 0.1)]);
        assert_eq!(short.mesh().len(), 1);
        assert!(short.iris().is_empty());
    }

    #[test]
    fn label_lines_match_overlay_format() {
        let labels = LabelSet {
            emotions: EmotionReading {
                primary: EmotionScore::new(Emotion::Happy, 0.6),
                secondary: EmotionScore::new(Emotion::Neutral, 0.1),
            },
            gender: Some(Gender::Female),
        };

        assert_eq!(
            labels.lines(),
            vec![
                "Emotion: happy 60% - neutral 10%".to_string(),
                "Sex: Female".to_string()
            ]
        );
    }

    #[test]
    fn frame_round_trips_through_rgb_image() {
        let frame = Frame::new(vec![0; 2 * 2 * 3], 2, 2);
        let image = frame.to_rgb_image().unwrap();
        assert_eq!(image.dimensions(), (2, 2));

        let broken = Frame::new(vec![0; 5], 2, 2);
        assert!(broken.to_rgb_image().is_err());
    }
}
