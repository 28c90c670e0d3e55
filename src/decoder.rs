// Decoding classifier probabilities into labels

use crate::error::{OverlayError, Result};
use crate::models::{Emotion, EmotionReading, EmotionScore, Gender};

/// Gender probabilities strictly above this are `Male`
pub const GENDER_THRESHOLD: f32 = 0.5;

/// Picks the two most probable emotions.
///
/// Ties resolve to the lowest index. The secondary emotion excludes the
/// primary's index only, so an entry equal to the maximum can still be
/// chosen as secondary.
pub fn decode_emotions(probabilities: &[f32]) -> Result<EmotionReading> {
    if probabilities.len() != Emotion::ALL.len() {
        return Err(OverlayError::InvalidProbabilities(format!(
            "expected {} emotion probabilities, got {}",
            Emotion::ALL.len(),
            probabilities.len()
        )));
    }
    check_finite(probabilities)?;

    // Length is checked above, so both argmax calls find an index.
    let primary = argmax(probabilities, None).unwrap_or(0);
    let secondary = argmax(probabilities, Some(primary)).unwrap_or(0);

    Ok(EmotionReading {
        primary: EmotionScore::new(Emotion::ALL[primary], probabilities[primary]),
        secondary: EmotionScore::new(Emotion::ALL[secondary], probabilities[secondary]),
    })
}

/// Classifies a single sigmoid output.
pub fn decode_gender(probabilities: &[f32]) -> Result<Gender> {
    let [p] = probabilities else {
        return Err(OverlayError::InvalidProbabilities(format!(
            "expected 1 gender probability, got {}",
            probabilities.len()
        )));
    };
    check_finite(probabilities)?;
    Ok(classify_gender(*p))
}

pub fn classify_gender(probability: f32) -> Gender {
    if probability > GENDER_THRESHOLD {
        Gender::Male
    } else {
        Gender::Female
    }
}

fn check_finite(probabilities: &[f32]) -> Result<()> {
    match probabilities.iter().position(|p| !p.is_finite()) {
        Some(i) => Err(OverlayError::InvalidProbabilities(format!(
            "probability {i} is not finite"
        ))),
        None => Ok(()),
    }
}

fn argmax(values: &[f32], skip: Option<usize>) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, v) in values.iter().enumerate() {
        if Some(i) == skip {
            continue;
        }
        match best {
            Some(b) if values[b] >= *v => {}
            _ => best = Some(i),
        }
    }
    best
}
