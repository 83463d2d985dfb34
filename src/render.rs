use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use log::debug;
use rusttype::{Font, Scale};

use crate::camera::Frame;
use crate::error::OutputError;
use crate::face::{BoundingBox, DetectionBatch};
use crate::labels::Labels;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_tuple(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl From<(u32, u32)> for DisplaySize {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Paints a detection batch onto a drawing surface.
pub trait Renderer: Send {
    fn render(&mut self, surface: &mut RgbaImage, batch: &DetectionBatch, display: DisplaySize);
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayStyle {
    pub box_color: Rgba<u8>,
    pub landmark_color: Rgba<u8>,
    pub text_color: Rgba<u8>,
    pub text_background: Rgba<u8>,
    pub line_width: u32,
    pub landmark_radius: i32,
    pub font_size: f32,
    pub padding: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            box_color: Rgba([0, 0, 255, 255]),
            landmark_color: Rgba([0, 255, 0, 255]),
            text_color: Rgba([255, 255, 255, 255]),
            text_background: Rgba([0, 0, 0, 160]),
            line_width: 2,
            landmark_radius: 1,
            font_size: 16.0,
            padding: 4,
        }
    }
}

/// Draws boxes, landmarks and a text field per face.
pub struct OverlayRenderer {
    labels: Arc<Labels>,
    font: Option<Font<'static>>,
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(labels: Arc<Labels>) -> Self {
        Self {
            labels,
            font: None,
            style: OverlayStyle::default(),
        }
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    /// Without a font only geometry is drawn.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read font: {:?}", path))?;
        let font = Font::try_from_vec(bytes)
            .with_context(|| format!("Not a usable TrueType font: {:?}", path))?;
        self.font = Some(font);
        Ok(self)
    }

    fn draw_box(&self, surface: &mut RgbaImage, b: &BoundingBox) {
        for inset in 0..self.style.line_width as i32 {
            let width = b.width.round() as i32 - 2 * inset;
            let height = b.height.round() as i32 - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let rect = Rect::at(b.x.round() as i32 + inset, b.y.round() as i32 + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(surface, rect, self.style.box_color);
        }
    }

    /// Text field whose bottom-right corner sits on the box's top-right corner,
    /// pushed back inside the surface when it would spill over the edge.
    fn draw_text_field(&self, surface: &mut RgbaImage, font: &Font<'_>, b: &BoundingBox, lines: &[String]) {
        if lines.is_empty() {
            return;
        }
        let scale = Scale::uniform(self.style.font_size);
        let pad = self.style.padding;
        let line_height = self.style.font_size.ceil() as i32;
        let text_width = lines
            .iter()
            .map(|line| text_size(scale, font, line).0)
            .max()
            .unwrap_or(0);

        let field_w = text_width + 2 * pad;
        let field_h = line_height * lines.len() as i32 + 2 * pad;
        let (surface_w, surface_h) = surface.dimensions();
        let x = (b.right().round() as i32 - field_w).clamp(0, (surface_w as i32 - field_w).max(0));
        let y = (b.y.round() as i32 - field_h).clamp(0, (surface_h as i32 - field_h).max(0));

        draw_filled_rect_mut(
            surface,
            Rect::at(x, y).of_size(field_w.max(1) as u32, field_h.max(1) as u32),
            self.style.text_background,
        );
        for (i, line) in lines.iter().enumerate() {
            draw_text_mut(
                surface,
                self.style.text_color,
                x + pad,
                y + pad + i as i32 * line_height,
                scale,
                font,
                line,
            );
        }
    }
}

impl Renderer for OverlayRenderer {
    fn render(&mut self, surface: &mut RgbaImage, batch: &DetectionBatch, display: DisplaySize) {
        match_dimensions(surface, display);
        let resized = batch.resized_to(display.as_tuple());

        for face in &resized.faces {
            self.draw_box(surface, &face.bounding_box);
            for point in &face.landmarks {
                draw_filled_circle_mut(
                    surface,
                    (point.x.round() as i32, point.y.round() as i32),
                    self.style.landmark_radius,
                    self.style.landmark_color,
                );
            }
            if let Some(font) = &self.font {
                let lines = self.labels.annotation_lines(face);
                self.draw_text_field(surface, font, &face.bounding_box, &lines);
            }
        }
        debug!(
            "Rendered {} faces for frame {} at {}x{}",
            resized.len(),
            resized.frame_index,
            display.width,
            display.height
        );
    }
}

/// Resizes the surface to `display` and clears it.
pub fn match_dimensions(surface: &mut RgbaImage, display: DisplaySize) {
    if surface.dimensions() != display.as_tuple() {
        *surface = RgbaImage::from_pixel(display.width, display.height, TRANSPARENT);
    } else {
        surface.pixels_mut().for_each(|p| *p = TRANSPARENT);
    }
}

/// Writes the frame with the overlay on top as numbered PNG files.
pub struct OverlayWriter {
    output_dir: PathBuf,
    written: u64,
}

impl OverlayWriter {
    pub fn create(output_dir: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).map_err(|source| OutputError::CreateDir {
            path: output_dir.clone(),
            source,
        })?;
        Ok(Self {
            output_dir,
            written: 0,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn write(&mut self, frame: &Frame, overlay: &RgbaImage) -> Result<PathBuf, OutputError> {
        let (width, height) = overlay.dimensions();
        let mut composite = image::DynamicImage::ImageRgb8(frame.image.clone()).to_rgba8();
        if composite.dimensions() != (width, height) {
            composite = imageops::resize(&composite, width, height, imageops::FilterType::Triangle);
        }
        imageops::overlay(&mut composite, overlay, 0, 0);

        let path = self.output_dir.join(format!("overlay_{:06}.png", frame.index));
        composite.save(&path).map_err(|source| OutputError::Write {
            path: path.clone(),
            source,
        })?;
        self.written += 1;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{FaceResult, Point};
    use image::RgbImage;

    fn batch() -> DetectionBatch {
        let mut face = FaceResult::new(BoundingBox::new(10.0, 10.0, 20.0, 20.0), 0.9);
        face.landmarks = vec![Point::new(20.0, 20.0)];
        DetectionBatch::new(0, (50, 50), vec![face])
    }

    #[test]
    fn test_render_matches_display_size() {
        let mut renderer = OverlayRenderer::new(Arc::new(Labels::english()));
        let mut surface = RgbaImage::new(1, 1);

        renderer.render(&mut surface, &batch(), DisplaySize::new(100, 100));

        assert_eq!(surface.dimensions(), (100, 100));
    }

    #[test]
    fn test_render_draws_scaled_box_and_landmark() {
        let style = OverlayStyle::default();
        let mut renderer = OverlayRenderer::new(Arc::new(Labels::english()));
        let mut surface = RgbaImage::new(100, 100);

        renderer.render(&mut surface, &batch(), DisplaySize::new(100, 100));

        // Box scaled by 2: top-left corner at (20, 20).
        assert_eq!(*surface.get_pixel(20, 20), style.box_color);
        assert_eq!(*surface.get_pixel(40, 40), style.landmark_color);
        assert_eq!(*surface.get_pixel(5, 5), TRANSPARENT);
    }

    #[test]
    fn test_line_width_thickens_box_inward() {
        let style = OverlayStyle {
            line_width: 4,
            box_color: Rgba([255, 0, 0, 255]),
            ..OverlayStyle::default()
        };
        let mut thin = RgbaImage::new(100, 100);
        let mut thick = RgbaImage::new(100, 100);

        OverlayRenderer::new(Arc::new(Labels::english())).render(&mut thin, &batch(), DisplaySize::new(100, 100));
        OverlayRenderer::new(Arc::new(Labels::english()))
            .with_style(style)
            .render(&mut thick, &batch(), DisplaySize::new(100, 100));

        assert_eq!(*thin.get_pixel(23, 30), TRANSPARENT);
        assert_eq!(*thick.get_pixel(23, 30), style.box_color);
        assert_eq!(*thick.get_pixel(24, 30), TRANSPARENT);
    }

    #[test]
    fn test_render_clears_previous_overlay() {
        let mut renderer = OverlayRenderer::new(Arc::new(Labels::english()));
        let mut surface = RgbaImage::from_pixel(100, 100, Rgba([9, 9, 9, 255]));

        let empty = DetectionBatch::new(1, (100, 100), Vec::new());
        renderer.render(&mut surface, &empty, DisplaySize::new(100, 100));

        assert!(surface.pixels().all(|p| *p == TRANSPARENT));
    }

    #[test]
    fn test_writer_composites_frame_and_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OverlayWriter::create(dir.path().join("out")).unwrap();
        let frame = Frame::new(7, RgbImage::from_pixel(10, 10, image::Rgb([200, 0, 0])));
        let mut overlay = RgbaImage::from_pixel(20, 20, TRANSPARENT);
        overlay.put_pixel(0, 0, Rgba([0, 0, 255, 255]));

        let path = writer.write(&frame, &overlay).unwrap();

        assert!(path.ends_with("overlay_000007.png"));
        let written = image::open(&path).unwrap().to_rgba8();
        assert_eq!(written.dimensions(), (20, 20));
        assert_eq!(*written.get_pixel(0, 0), Rgba([0, 0, 255, 255]));
        assert!(written.get_pixel(10, 10)[0] >= 190);
        assert_eq!(writer.written(), 1);
    }
}
