// Drawing annotations onto frames

use std::fs;

use ab_glyph::{FontArc, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::{info, warn};

use crate::config::OverlayConfig;
use crate::error::Result;
use crate::models::{BoundingBox, Frame};
use crate::session::Annotation;

const BOX_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const PLACEHOLDER_BACKGROUND: Rgba<u8> = Rgba([24, 24, 24, 255]);

/// Gap between the box top and the emotion line's baseline
const FIRST_BASELINE_OFFSET: f32 = 10.0;

/// A line of text anchored at its baseline
#[derive(Clone, Debug, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub x: f32,
    pub baseline: f32,
}

/// Places label lines above the box, stacking upwards.
pub fn layout_labels(bbox: &BoundingBox, lines: &[String], line_spacing: f32) -> Vec<TextLine> {
    lines
        .iter()
        .enumerate()
        .map(|(i, text)| TextLine {
            text: text.clone(),
            x: bbox.x,
            baseline: bbox.y - FIRST_BASELINE_OFFSET - line_spacing * i as f32,
        })
        .collect()
}

/// Draws frames, boxes and labels
pub struct OverlayRenderer {
    font: Option<FontArc>,
    config: OverlayConfig,
}

impl OverlayRenderer {
    /// Creates a renderer, loading the configured font if there is one.
    /// A font that cannot be loaded leaves the renderer drawing boxes only.
    pub fn new(config: OverlayConfig) -> Self {
        let font = config.font_path.as_ref().and_then(|path| {
            let loaded = fs::read(path)
                .map_err(|e| e.to_string())
                .and_then(|data| FontArc::try_from_vec(data).map_err(|e| e.to_string()));
            match loaded {
                Ok(font) => {
                    info!("Loaded font from {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    warn!("Could not load font {}: {}. Labels disabled.", path.display(), e);
                    None
                }
            }
        });
        if font.is_none() && config.font_path.is_none() {
            warn!("No font configured. Labels disabled.");
        }
        Self { font, config }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draws the frame with its annotation on top
    pub fn render(&self, frame: &Frame, annotation: &Annotation) -> Result<RgbaImage> {
        let mut canvas = image::DynamicImage::ImageRgb8(frame.to_rgb_image()?).to_rgba8();

        if let Annotation::Face { bbox, labels } = annotation {
            self.draw_box(&mut canvas, bbox);
            if let Some(labels) = labels {
                let lines = layout_labels(bbox, &labels.lines(), self.config.line_spacing);
                self.draw_lines(&mut canvas, &lines);
            }
        }
        Ok(canvas)
    }

    /// A dark frame telling the viewer the camera is off
    pub fn render_placeholder(&self, width: u32, height: u32) -> RgbaImage {
        let mut canvas = RgbaImage::from_pixel(width.max(1), height.max(1), PLACEHOLDER_BACKGROUND);
        let line = TextLine {
            text: "Camera off".to_string(),
            x: width as f32 / 2.0 - self.config.font_size * 2.5,
            baseline: height as f32 / 2.0,
        };
        self.draw_lines(&mut canvas, &[line]);
        canvas
    }

    /// Strokes the box centred on its edges
    fn draw_box(&self, canvas: &mut RgbaImage, bbox: &BoundingBox) {
        let thickness = self.config.box_thickness as i32;
        let first = -(thickness / 2);
        for inset in first..first + thickness {
            let width = (bbox.width.round() as i32 - 2 * inset).max(1) as u32;
            let height = (bbox.height.round() as i32 - 2 * inset).max(1) as u32;
            let rect = Rect::at(bbox.x.round() as i32 + inset, bbox.y.round() as i32 + inset)
                .of_size(width, height);
            draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
        }
    }

    fn draw_lines(&self, canvas: &mut RgbaImage, lines: &[TextLine]) {
        let Some(font) = &self.font else {
            return;
        };
        let scale = PxScale::from(self.config.font_size);
        for line in lines {
            let top = (line.baseline - self.config.font_size).round() as i32;
            draw_text_mut(canvas, TEXT_COLOR, line.x.round() as i32, top, scale, font, &line.text);
        }
    }
}
