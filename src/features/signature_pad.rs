//! Freehand signature capture.
//!
//! Pointer input arrives as a stream of [`PointerEvent`]s and is recorded as
//! vector paths. [`StrokeCapture::rasterize`] renders the paths into a new
//! immutable [`SignatureRaster`]; the capture itself never holds a bitmap.

use crate::error::{PortalError, PortalResult};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Pen diameter in canvas pixels.
pub const PEN_WIDTH: f32 = 2.0;
const INK: [u8; 3] = [0, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Toolkit-independent pointer input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointerEvent {
    Down { x: f32, y: f32 },
    Move { x: f32, y: f32 },
    Up,
    /// Pointer left the canvas; ends the gesture like `Up`.
    Leave,
}

/// One continuous pointer-down-to-up gesture. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct StrokePath {
    points: Vec<Point>,
}

impl StrokePath {
    fn starting_at(point: Point) -> Self {
        Self {
            points: vec![point],
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }
}

#[derive(Debug, Clone, Default)]
pub struct StrokeCapture {
    paths: Vec<StrokePath>,
    open: bool,
}

impl StrokeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new path. An already open path is closed first.
    pub fn begin(&mut self, point: Point) {
        self.paths.push(StrokePath::starting_at(point));
        self.open = true;
    }

    pub fn extend(&mut self, point: Point) {
        if !self.open {
            return;
        }
        if let Some(path) = self.paths.last_mut() {
            path.points.push(point);
        }
    }

    pub fn end(&mut self) {
        self.open = false;
    }

    pub fn apply(&mut self, event: PointerEvent) {
        match event {
            PointerEvent::Down { x, y } => self.begin(Point::new(x, y)),
            PointerEvent::Move { x, y } => self.extend(Point::new(x, y)),
            PointerEvent::Up | PointerEvent::Leave => self.end(),
        }
    }

    pub fn consume<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = PointerEvent>,
    {
        for event in events {
            self.apply(event);
        }
    }

    pub fn has_content(&self) -> bool {
        self.paths.iter().any(|p| !p.points.is_empty())
    }

    pub fn paths(&self) -> &[StrokePath] {
        &self.paths
    }

    pub fn point_count(&self) -> usize {
        self.paths.iter().map(|p| p.points.len()).sum()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
        self.open = false;
    }

    /// Renders every path on a transparent `width` x `height` canvas.
    pub fn rasterize(&self, width: u32, height: u32) -> PortalResult<SignatureRaster> {
        if !self.has_content() {
            return Err(PortalError::EmptySignature);
        }
        if width == 0 || height == 0 {
            return Err(PortalError::ImageDecode("signature_canvas_empty".into()));
        }
        let mut canvas = RgbaImage::new(width, height);
        for path in &self.paths {
            draw_path(&mut canvas, path.points());
        }
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(canvas.as_raw(), width, height, ColorType::Rgba8)
            .map_err(|e| PortalError::ImageDecode(format!("signature_encode_failed:{e}")))?;
        Ok(SignatureRaster { width, height, png })
    }
}

/// Immutable PNG snapshot of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRaster {
    width: u32,
    height: u32,
    png: Vec<u8>,
}

impl SignatureRaster {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn to_data_url(&self) -> String {
        format!("data:image/png;base64,{}", B64.encode(&self.png))
    }
}

fn draw_path(canvas: &mut RgbaImage, points: &[Point]) {
    match points {
        [] => {}
        [only] => draw_segment(canvas, *only, *only),
        _ => {
            for pair in points.windows(2) {
                draw_segment(canvas, pair[0], pair[1]);
            }
        }
    }
}

/// Round-capped thick segment: every pixel whose centre lies within half the
/// pen width of the segment is inked, with one pixel of linear coverage falloff.
/// Consecutive segments overlap at their shared endpoint, giving round joins.
fn draw_segment(canvas: &mut RgbaImage, a: Point, b: Point) {
    let radius = PEN_WIDTH / 2.0;
    let reach = radius + 1.0;
    let (w, h) = canvas.dimensions();
    let min_x = (a.x.min(b.x) - reach).floor().max(0.0) as i64;
    let min_y = (a.y.min(b.y) - reach).floor().max(0.0) as i64;
    let max_x = ((a.x.max(b.x) + reach).ceil() as i64).min(w as i64 - 1);
    let max_y = ((a.y.max(b.y) + reach).ceil() as i64).min(h as i64 - 1);
    if min_x > max_x || min_y > max_y {
        return;
    }
    for py in min_y..=max_y {
        for px in min_x..=max_x {
            let centre = Point::new(px as f32 + 0.5, py as f32 + 0.5);
            let dist = distance_to_segment(centre, a, b);
            let coverage = (radius + 0.5 - dist).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let alpha = (coverage * 255.0).round() as u8;
            let pixel = canvas.get_pixel_mut(px as u32, py as u32);
            if alpha > pixel[3] {
                *pixel = Rgba([INK[0], INK[1], INK[2], alpha]);
            }
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}
