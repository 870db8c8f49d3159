//! Tiny SVG rasterizer: load a small SVG document and draw it to a PNG.
//!
//! Accepts the subset the sample document uses: rect, circle, line,
//! polyline, polygon, with fill / stroke / stroke-width in named colors or
//! #rgb / #rrggbb hex. Elements are pulled out of the markup with regexes
//! (the documents are small and flat), filled with an even-odd scanline,
//! and stroked with Bresenham lines under a square brush. Anything the
//! renderer does not understand is skipped with a note, the way the
//! original viewer ignored what it could not draw.
//!
//! Run with: cargo run --bin svg_render [-- input.svg [output.png]]

use colored::Colorize;
use image::{Rgb, RgbImage};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

const DEFAULT_CANVAS: (u32, u32) = (200, 200);
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

const SAMPLE_DOCUMENT: &str = r##"<svg width="320" height="240">
  <rect x="0" y="0" width="320" height="160" fill="#9cf"/>
  <rect x="0" y="160" width="320" height="80" fill="#7a5"/>
  <circle cx="260" cy="48" r="28" fill="yellow" stroke="orange" stroke-width="2"/>
  <rect x="60" y="110" width="120" height="90" fill="#c96" stroke="black" stroke-width="2"/>
  <polygon points="50,110 120,60 190,110" fill="maroon" stroke="black" stroke-width="2"/>
  <rect x="100" y="150" width="30" height="50" fill="#642"/>
  <line x1="20" y1="225" x2="300" y2="225" stroke="white" stroke-width="3"/>
  <polyline points="210,200 228,184 246,196 264,178 282,192" fill="none" stroke="blue" stroke-width="2"/>
  <ellipse cx="40" cy="40" rx="12" ry="8" fill="gray"/>
</svg>
"##;

// ============================================================================
// Document model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Style {
    pub fill: Option<Rgb<u8>>,
    pub stroke: Option<Rgb<u8>>,
    pub stroke_width: f32,
}

impl Default for Style {
    fn default() -> Self {
        // SVG defaults: black fill, no stroke.
        Style {
            fill: Some(Rgb([0, 0, 0])),
            stroke: None,
            stroke_width: 1.0,
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Shape {
    Rect {
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        style: Style,
    },
    Circle {
        cx: f32,
        cy: f32,
        r: f32,
        style: Style,
    },
    Line {
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        style: Style,
    },
    Polyline {
        points: Vec<(f32, f32)>,
        style: Style,
    },
    Polygon {
        points: Vec<(f32, f32)>,
        style: Style,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("attribute {attr} has a malformed number {value:?}")]
    BadNumber { attr: &'static str, value: String },

    #[error("unrecognized color {0:?}")]
    BadColor(String),

    #[error("required attribute {0} is missing")]
    MissingAttr(&'static str),

    #[error("points list needs at least {needed} coordinate pairs, found {found}")]
    TooFewPoints { needed: usize, found: usize },
}

// ============================================================================
// Parsing
// ============================================================================

lazy_static! {
    static ref COMMENT_RE: Regex = Regex::new(r"(?s)<!--.*?-->").unwrap();
    static ref TAG_RE: Regex =
        Regex::new(r#"<([a-zA-Z][a-zA-Z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#).unwrap();
    static ref ATTR_RE: Regex =
        Regex::new(r#"([a-zA-Z][a-zA-Z0-9_:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
    static ref NUM_RE: Regex = Regex::new(r"-?\d+(?:\.\d+)?").unwrap();
}

type Attrs = Vec<(String, String)>;

fn parse_attrs(raw: &str) -> Attrs {
    ATTR_RE
        .captures_iter(raw)
        .map(|cap| {
            let value = cap
                .get(2)
                .or_else(|| cap.get(3))
                .map(|m| m.as_str())
                .unwrap_or("");
            (cap[1].to_string(), value.to_string())
        })
        .collect()
}

fn attr<'a>(attrs: &'a Attrs, name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

fn parse_f32(value: &str, attr: &'static str) -> Result<f32, ShapeError> {
    let bad = || ShapeError::BadNumber {
        attr,
        value: value.to_string(),
    };
    let number: f32 = value.trim().parse().map_err(|_| bad())?;
    // "inf", "NaN", and overflowing literals parse; the rasterizer needs
    // finite coordinates.
    if number.is_finite() {
        Ok(number)
    } else {
        Err(bad())
    }
}

fn f32_attr(attrs: &Attrs, name: &'static str, default: f32) -> Result<f32, ShapeError> {
    match attr(attrs, name) {
        None => Ok(default),
        Some(value) => parse_f32(value, name),
    }
}

fn required_f32(attrs: &Attrs, name: &'static str) -> Result<f32, ShapeError> {
    match attr(attrs, name) {
        None => Err(ShapeError::MissingAttr(name)),
        Some(value) => parse_f32(value, name),
    }
}

pub fn parse_color(s: &str) -> Result<Rgb<u8>, ShapeError> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix('#') {
        let digit = |c: char| c.to_digit(16).map(|d| d as u8);
        let nibbles: Option<Vec<u8>> = hex.chars().map(digit).collect();
        return match nibbles.as_deref() {
            Some([r, g, b]) => Ok(Rgb([r * 17, g * 17, b * 17])),
            Some([r1, r2, g1, g2, b1, b2]) => {
                Ok(Rgb([r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2]))
            }
            _ => Err(ShapeError::BadColor(s.to_string())),
        };
    }
    let named = match s.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "lime" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" => [0, 255, 255],
        "magenta" => [255, 0, 255],
        "gray" | "grey" => [128, 128, 128],
        "silver" => [192, 192, 192],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "brown" => [165, 42, 42],
        "pink" => [255, 192, 203],
        "navy" => [0, 0, 128],
        "teal" => [0, 128, 128],
        "maroon" => [128, 0, 0],
        "olive" => [128, 128, 0],
        _ => return Err(ShapeError::BadColor(s.to_string())),
    };
    Ok(Rgb(named))
}

fn parse_paint(s: &str) -> Result<Option<Rgb<u8>>, ShapeError> {
    if s.trim() == "none" {
        Ok(None)
    } else {
        parse_color(s).map(Some)
    }
}

fn parse_style(attrs: &Attrs) -> Result<Style, ShapeError> {
    let mut style = Style::default();
    if let Some(fill) = attr(attrs, "fill") {
        style.fill = parse_paint(fill)?;
    }
    if let Some(stroke) = attr(attrs, "stroke") {
        style.stroke = parse_paint(stroke)?;
    }
    style.stroke_width = f32_attr(attrs, "stroke-width", 1.0)?;
    Ok(style)
}

fn parse_points(attrs: &Attrs, needed: usize) -> Result<Vec<(f32, f32)>, ShapeError> {
    let raw = attr(attrs, "points").ok_or(ShapeError::MissingAttr("points"))?;
    // Numbers pair up left to right; a dangling odd coordinate is dropped.
    let points: Vec<(f32, f32)> = NUM_RE
        .find_iter(raw)
        .filter_map(|m| m.as_str().parse::<f32>().ok())
        .filter(|n| n.is_finite())
        .tuples()
        .collect();
    if points.len() < needed {
        return Err(ShapeError::TooFewPoints {
            needed,
            found: points.len(),
        });
    }
    Ok(points)
}

fn parse_shape(name: &str, attrs: &Attrs) -> Result<Option<Shape>, ShapeError> {
    let shape = match name {
        "rect" => Shape::Rect {
            x: f32_attr(attrs, "x", 0.0)?,
            y: f32_attr(attrs, "y", 0.0)?,
            w: required_f32(attrs, "width")?,
            h: required_f32(attrs, "height")?,
            style: parse_style(attrs)?,
        },
        "circle" => Shape::Circle {
            cx: f32_attr(attrs, "cx", 0.0)?,
            cy: f32_attr(attrs, "cy", 0.0)?,
            r: required_f32(attrs, "r")?,
            style: parse_style(attrs)?,
        },
        "line" => Shape::Line {
            x1: f32_attr(attrs, "x1", 0.0)?,
            y1: f32_attr(attrs, "y1", 0.0)?,
            x2: f32_attr(attrs, "x2", 0.0)?,
            y2: f32_attr(attrs, "y2", 0.0)?,
            style: parse_style(attrs)?,
        },
        "polyline" => Shape::Polyline {
            points: parse_points(attrs, 2)?,
            style: parse_style(attrs)?,
        },
        "polygon" => Shape::Polygon {
            points: parse_points(attrs, 3)?,
            style: parse_style(attrs)?,
        },
        _ => return Ok(None),
    };
    Ok(Some(shape))
}

pub struct Document {
    pub width: u32,
    pub height: u32,
    pub shapes: Vec<Shape>,
    pub notes: Vec<String>,
}

pub fn parse_document(source: &str) -> Document {
    let source = COMMENT_RE.replace_all(source, "");
    let mut width = DEFAULT_CANVAS.0;
    let mut height = DEFAULT_CANVAS.1;
    let mut shapes = Vec::new();
    let mut notes = Vec::new();

    for cap in TAG_RE.captures_iter(&source) {
        let name = &cap[1];
        let attrs = parse_attrs(&cap[2]);
        match name {
            "svg" => {
                match f32_attr(&attrs, "width", DEFAULT_CANVAS.0 as f32) {
                    Ok(w) if w >= 1.0 => width = w as u32,
                    Ok(_) => notes.push("svg width out of range, using default".to_string()),
                    Err(e) => notes.push(format!("svg: {}", e)),
                }
                match f32_attr(&attrs, "height", DEFAULT_CANVAS.1 as f32) {
                    Ok(h) if h >= 1.0 => height = h as u32,
                    Ok(_) => notes.push("svg height out of range, using default".to_string()),
                    Err(e) => notes.push(format!("svg: {}", e)),
                }
            }
            _ => match parse_shape(name, &attrs) {
                Ok(Some(shape)) => shapes.push(shape),
                Ok(None) => notes.push(format!("skipping unsupported <{}>", name)),
                Err(e) => notes.push(format!("skipping <{}>: {}", name, e)),
            },
        }
    }

    Document {
        width,
        height,
        shapes,
        notes,
    }
}

// ============================================================================
// Rasterizer
// ============================================================================

fn plot(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn fill_rect(img: &mut RgbImage, x: f32, y: f32, w: f32, h: f32, color: Rgb<u8>) {
    // Spans are intersected with the canvas so an absurd extent cannot stall
    // the loops.
    let x0 = (x.round() as i64).max(0);
    let y0 = (y.round() as i64).max(0);
    let x1 = ((x + w).round() as i64).min(img.width() as i64);
    let y1 = ((y + h).round() as i64).min(img.height() as i64);
    for py in y0..y1 {
        for px in x0..x1 {
            plot(img, px, py, color);
        }
    }
}

fn fill_circle(img: &mut RgbImage, cx: f32, cy: f32, r: f32, color: Rgb<u8>) {
    let x0 = ((cx - r).floor() as i64).max(0);
    let x1 = ((cx + r).ceil() as i64).min(img.width() as i64 - 1);
    let y0 = ((cy - r).floor() as i64).max(0);
    let y1 = ((cy + r).ceil() as i64).min(img.height() as i64 - 1);
    for py in y0..=y1 {
        for px in x0..=x1 {
            let dx = px as f32 - cx;
            let dy = py as f32 - cy;
            if dx * dx + dy * dy <= r * r {
                plot(img, px, py, color);
            }
        }
    }
}

/// Even-odd scanline fill, sampling each row at its vertical center.
fn fill_polygon(img: &mut RgbImage, points: &[(f32, f32)], color: Rgb<u8>) {
    if points.len() < 3 {
        return;
    }
    for py in 0..img.height() as i64 {
        let sample = py as f32 + 0.5;
        let mut crossings: Vec<f32> = Vec::new();
        for i in 0..points.len() {
            let (x1, y1) = points[i];
            let (x2, y2) = points[(i + 1) % points.len()];
            if (y1 <= sample && y2 > sample) || (y2 <= sample && y1 > sample) {
                let t = (sample - y1) / (y2 - y1);
                crossings.push(x1 + t * (x2 - x1));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            let start = ((pair[0] - 0.5).ceil() as i64).max(0);
            let end = ((pair[1] - 0.5).ceil() as i64).min(img.width() as i64);
            for px in start..end {
                plot(img, px, py, color);
            }
        }
    }
}

/// Liang-Barsky clip of a segment to a box, keeping the visible part.
fn clip_segment(
    seg: (f32, f32, f32, f32),
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
) -> Option<(f32, f32, f32, f32)> {
    // The parametric math runs in f64 so coordinate differences stay finite.
    let (x1, y1, x2, y2) = (seg.0 as f64, seg.1 as f64, seg.2 as f64, seg.3 as f64);
    let (dx, dy) = (x2 - x1, y2 - y1);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, x1 - min_x as f64),
        (dx, max_x as f64 - x1),
        (-dy, y1 - min_y as f64),
        (dy, max_y as f64 - y1),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                if r > t1 {
                    return None;
                }
                t0 = t0.max(r);
            } else {
                if r < t0 {
                    return None;
                }
                t1 = t1.min(r);
            }
        }
    }
    if t0 > t1 {
        return None;
    }
    Some((
        (x1 + t0 * dx) as f32,
        (y1 + t0 * dy) as f32,
        (x1 + t1 * dx) as f32,
        (y1 + t1 * dy) as f32,
    ))
}

/// Bresenham with a square brush sized from the stroke width. The segment is
/// clipped to the canvas plus a brush margin first, so a far-offscreen
/// endpoint cannot stall the walk.
fn stroke_line(img: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, width: f32, color: Rgb<u8>) {
    // Past the canvas size, a wider brush cannot paint any new pixels.
    let max_brush = img.width().max(img.height()) as i64;
    let brush = (((width - 1.0) / 2.0).round() as i64).clamp(0, max_brush);
    let margin = (brush + 1) as f32;
    let (x1, y1, x2, y2) = match clip_segment(
        (x1, y1, x2, y2),
        -margin,
        -margin,
        img.width() as f32 - 1.0 + margin,
        img.height() as f32 - 1.0 + margin,
    ) {
        Some(seg) => seg,
        None => return,
    };
    let mut x = x1.round() as i64;
    let mut y = y1.round() as i64;
    let xe = x2.round() as i64;
    let ye = y2.round() as i64;
    let dx = (xe - x).abs();
    let dy = -(ye - y).abs();
    let sx = if x < xe { 1 } else { -1 };
    let sy = if y < ye { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        for by in -brush..=brush {
            for bx in -brush..=brush {
                plot(img, x + bx, y + by, color);
            }
        }
        if x == xe && y == ye {
            break;
        }
        let doubled = 2 * err;
        if doubled >= dy {
            err += dy;
            x += sx;
        }
        if doubled <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn stroke_path(img: &mut RgbImage, points: &[(f32, f32)], close: bool, width: f32, color: Rgb<u8>) {
    for pair in points.windows(2) {
        stroke_line(img, pair[0].0, pair[0].1, pair[1].0, pair[1].1, width, color);
    }
    if close && points.len() > 2 {
        let first = points[0];
        let last = points[points.len() - 1];
        stroke_line(img, last.0, last.1, first.0, first.1, width, color);
    }
}

fn circle_outline(cx: f32, cy: f32, r: f32) -> Vec<(f32, f32)> {
    (0..72)
        .map(|i| {
            let angle = (i as f32) * std::f32::consts::TAU / 72.0;
            (cx + r * angle.cos(), cy + r * angle.sin())
        })
        .collect()
}

pub fn render(doc: &Document) -> RgbImage {
    let mut img = RgbImage::from_pixel(doc.width, doc.height, BACKGROUND);
    for shape in &doc.shapes {
        match shape {
            Shape::Rect { x, y, w, h, style } => {
                if let Some(fill) = style.fill {
                    fill_rect(&mut img, *x, *y, *w, *h, fill);
                }
                if let Some(stroke) = style.stroke {
                    let corners = [(*x, *y), (*x + *w, *y), (*x + *w, *y + *h), (*x, *y + *h)];
                    stroke_path(&mut img, &corners, true, style.stroke_width, stroke);
                }
            }
            Shape::Circle { cx, cy, r, style } => {
                if let Some(fill) = style.fill {
                    fill_circle(&mut img, *cx, *cy, *r, fill);
                }
                if let Some(stroke) = style.stroke {
                    stroke_path(
                        &mut img,
                        &circle_outline(*cx, *cy, *r),
                        true,
                        style.stroke_width,
                        stroke,
                    );
                }
            }
            Shape::Line {
                x1,
                y1,
                x2,
                y2,
                style,
            } => {
                if let Some(stroke) = style.stroke {
                    stroke_line(&mut img, *x1, *y1, *x2, *y2, style.stroke_width, stroke);
                }
            }
            Shape::Polyline { points, style } => {
                if let Some(fill) = style.fill {
                    fill_polygon(&mut img, points, fill);
                }
                if let Some(stroke) = style.stroke {
                    stroke_path(&mut img, points, false, style.stroke_width, stroke);
                }
            }
            Shape::Polygon { points, style } => {
                if let Some(fill) = style.fill {
                    fill_polygon(&mut img, points, fill);
                }
                if let Some(stroke) = style.stroke {
                    stroke_path(&mut img, points, true, style.stroke_width, stroke);
                }
            }
        }
    }
    img
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let source = match args.first() {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("{} cannot read {}: {}", "✗".red(), path, e);
                std::process::exit(1);
            }
        },
        None => SAMPLE_DOCUMENT.to_string(),
    };
    let output = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "svg_render.png".to_string());

    let doc = parse_document(&source);
    for note in &doc.notes {
        println!("{} {}", "note:".yellow(), note);
    }

    let img = render(&doc);
    if let Err(e) = img.save(&output) {
        eprintln!("{} cannot write {}: {}", "✗".red(), output, e);
        std::process::exit(1);
    }
    println!(
        "{} rendered {} shape{} to {} ({}x{})",
        "✓".green(),
        doc.shapes.len(),
        if doc.shapes.len() == 1 { "" } else { "s" },
        output,
        doc.width,
        doc.height
    );
}

// ============================================================================
// Tests
// ============================================================================
