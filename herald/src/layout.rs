use serde::Deserialize;

// --- Placement ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Corner {
    TopLeft,
    #[default]
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutParams {
    pub padding: u32,
    pub border_width: u32,
    pub line_spacing: u32,
    pub corner: Corner,
    pub margin_x: u32,
    pub margin_y: u32,
    pub max_width: Option<u32>,
}

// --- Lines ---

pub trait FontMetrics {
    fn line_width(&mut self, text: &str) -> f32;
    fn line_height(&self) -> f32;
}

/// A display row with its measured width in whole pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    text: String,
    width: u32,
}

impl Line {
    pub fn measure(text: String, metrics: &mut impl FontMetrics) -> Self {
        let width = metrics.line_width(&text).max(0.0).ceil() as u32;
        Self { text, width }
    }

    pub fn text(&self) -> &str { &self.text }
    pub fn width(&self) -> u32 { self.width }
}

pub fn measure_all(texts: &[String], metrics: &mut impl FontMetrics) -> Vec<Line> {
    texts.iter().map(|t| Line::measure(t.clone(), metrics)).collect()
}

// --- Geometry ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Distance from each screen edge to the matching side of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Margins {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl Geometry {
    pub fn margins(&self, screen: (u32, u32)) -> Margins {
        Margins {
            top: self.y,
            right: screen.0 as i32 - self.x - self.width as i32,
            bottom: screen.1 as i32 - self.y - self.height as i32,
            left: self.x,
        }
    }

    pub fn fits(&self, screen: (u32, u32)) -> bool {
        self.x >= 0 && self.y >= 0
            && self.x as i64 + self.width as i64 <= screen.0 as i64
            && self.y as i64 + self.height as i64 <= screen.1 as i64
    }
}

/// Top of line `index`, measured from the top edge of the surface.
pub fn line_top(index: usize, line_height: u32, params: &LayoutParams) -> u32 {
    params.border_width + params.padding + index as u32 * (line_height + params.line_spacing)
}

pub fn compute(lines: &[Line], line_height: u32, params: &LayoutParams, screen: (u32, u32)) -> Geometry {
    debug_assert!(!lines.is_empty());
    let frame = 2 * params.padding + 2 * params.border_width;
    let count = lines.len() as u32;

    let text_w = lines.iter().map(Line::width).max().unwrap_or(0);
    let mut width = text_w + frame;
    // The frame always fits, plus a single column for text.
    if let Some(cap) = params.max_width {
        width = width.min(cap.max(frame + 1));
    }
    let height = count * line_height + count.saturating_sub(1) * params.line_spacing + frame;

    let (sw, sh) = (screen.0 as i32, screen.1 as i32);
    let (w, h) = (width as i32, height as i32);
    let (mx, my) = (params.margin_x as i32, params.margin_y as i32);
    let (x, y) = match params.corner {
        Corner::TopLeft => (mx, my),
        Corner::TopRight => (sw - w - mx, my),
        Corner::BottomLeft => (mx, sh - h - my),
        Corner::BottomRight => (sw - w - mx, sh - h - my),
    };
    Geometry { x, y, width, height }
}
