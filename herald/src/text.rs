use anyhow::{Context, Result};
use cosmic_text::{Attrs, Buffer, Family, FontSystem, Metrics, Shaping, SwashCache, SwashContent};
use tiny_skia::Pixmap;

use crate::config::expand_path;
use crate::layout::FontMetrics;

const LINE_HEIGHT: f32 = 1.2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect { pub x: u32, pub y: u32, pub w: u32, pub h: u32 }

impl Rect {
    fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x as i32 && py >= self.y as i32
            && px < (self.x + self.w) as i32 && py < (self.y + self.h) as i32
    }
}

// --- Text ---

pub struct TextRenderer {
    font_system: FontSystem,
    swash_cache: SwashCache,
    /// `None` selects the system monospace family.
    family: Option<String>,
    font_size: f32,
}

impl TextRenderer {
    /// `font` is either a font file or a family name; "monospace" picks the
    /// system default monospace face.
    pub fn new(font: &str, font_size: f32) -> Result<Self> {
        let path = expand_path(font);
        let (font_system, family) = if path.is_file() {
            let data = std::fs::read(&path)
                .with_context(|| format!("failed to read font file {}", path.display()))?;
            let mut db = cosmic_text::fontdb::Database::new();
            db.load_font_data(data);
            let family = db.faces().next()
                .and_then(|f| f.families.first())
                .map(|(name, _)| name.clone())
                .with_context(|| format!("font file {} contains no faces", path.display()))?;
            (FontSystem::new_with_locale_and_db("en-US".into(), db), Some(family))
        } else if font.eq_ignore_ascii_case("monospace") {
            (FontSystem::new(), None)
        } else {
            (FontSystem::new(), Some(font.to_string()))
        };
        Ok(Self { font_system, swash_cache: SwashCache::new(), family, font_size })
    }

    fn shaped(&mut self, text: &str) -> Buffer {
        let metrics = Metrics::new(self.font_size, self.font_size * LINE_HEIGHT);
        let family = match &self.family {
            Some(name) => Family::Name(name),
            None => Family::Monospace,
        };
        let attrs = Attrs::new().family(family);
        let mut buf = Buffer::new(&mut self.font_system, metrics);
        buf.set_size(&mut self.font_system, None, None);
        buf.set_text(&mut self.font_system, text, &attrs, Shaping::Advanced, None);
        buf.shape_until_scroll(&mut self.font_system, false);
        buf
    }

    /// Draws one line with its top-left at `(x, y)`; nothing outside `clip`
    /// is touched.
    pub fn render(&mut self, pixmap: &mut Pixmap, text: &str, x: f32, y: f32, clip: Rect, color: [u8; 3]) {
        let buf = self.shaped(text);
        let pw = pixmap.width() as i32;
        for run in buf.layout_runs() {
            for glyph in run.glyphs.iter() {
                let physical = glyph.physical((x, y + run.line_y), 1.0);
                let Some(image) = self.swash_cache.get_image_uncached(&mut self.font_system, physical.cache_key) else {
                    continue;
                };
                let x0 = physical.x + image.placement.left;
                let y0 = physical.y - image.placement.top;
                let w = image.placement.width as i32;
                let h = image.placement.height as i32;
                match image.content {
                    SwashContent::Mask => blit_mask(pixmap.data_mut(), pw, clip, x0, y0, w, h, &image.data, &color),
                    SwashContent::Color => blit_color(pixmap.data_mut(), pw, clip, x0, y0, w, h, &image.data),
                    SwashContent::SubpixelMask => {}
                }
            }
        }
    }
}

impl FontMetrics for TextRenderer {
    fn line_width(&mut self, text: &str) -> f32 {
        self.shaped(text).layout_runs().map(|r| r.line_w).fold(0.0, f32::max)
    }

    fn line_height(&self) -> f32 {
        self.font_size * LINE_HEIGHT
    }
}

// --- Pixels ---

pub fn fill_rect(data: &mut [u8], pw: u32, ph: u32, r: Rect, c: [u8; 3], a: u8) {
    if a == 0 { return; }
    let a32 = a as u32;
    let inv = 255 - a32;
    for py in r.y..r.y.saturating_add(r.h).min(ph) {
        for px in r.x..r.x.saturating_add(r.w).min(pw) {
            let i = (py as usize * pw as usize + px as usize) * 4;
            if a == 0xff {
                data[i] = c[0]; data[i + 1] = c[1]; data[i + 2] = c[2]; data[i + 3] = 0xff;
            } else {
                data[i]     = ((c[0] as u32 * a32 + data[i] as u32 * inv) / 255) as u8;
                data[i + 1] = ((c[1] as u32 * a32 + data[i + 1] as u32 * inv) / 255) as u8;
                data[i + 2] = ((c[2] as u32 * a32 + data[i + 2] as u32 * inv) / 255) as u8;
                data[i + 3] = (a32 + data[i + 3] as u32 * inv / 255) as u8;
            }
        }
    }
}

fn blit_mask(data: &mut [u8], pw: i32, clip: Rect, x0: i32, y0: i32, w: i32, h: i32, mask: &[u8], color: &[u8; 3]) {
    for gy in 0..h {
        for gx in 0..w {
            let (px, py) = (x0 + gx, y0 + gy);
            if !clip.contains(px, py) { continue; }
            let a = mask[(gy * w + gx) as usize] as u32;
            if a == 0 { continue; }
            let i = (py * pw + px) as usize * 4;
            let inv = 255 - a;
            data[i]     = ((color[0] as u32 * a + data[i] as u32 * inv) / 255) as u8;
            data[i + 1] = ((color[1] as u32 * a + data[i + 1] as u32 * inv) / 255) as u8;
            data[i + 2] = ((color[2] as u32 * a + data[i + 2] as u32 * inv) / 255) as u8;
            data[i + 3] = (a + data[i + 3] as u32 * inv / 255) as u8;
        }
    }
}

fn blit_color(data: &mut [u8], pw: i32, clip: Rect, x0: i32, y0: i32, w: i32, h: i32, rgba: &[u8]) {
    for gy in 0..h {
        for gx in 0..w {
            let (px, py) = (x0 + gx, y0 + gy);
            if !clip.contains(px, py) { continue; }
            let si = (gy * w + gx) as usize * 4;
            let a = rgba[si + 3] as u32;
            if a == 0 { continue; }
            let i = (py * pw + px) as usize * 4;
            let inv = 255 - a;
            data[i]     = (rgba[si] as u32 * a / 255 + data[i] as u32 * inv / 255) as u8;
            data[i + 1] = (rgba[si + 1] as u32 * a / 255 + data[i + 1] as u32 * inv / 255) as u8;
            data[i + 2] = (rgba[si + 2] as u32 * a / 255 + data[i + 2] as u32 * inv / 255) as u8;
            data[i + 3] = (a + data[i + 3] as u32 * inv / 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(data: &[u8], pw: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * pw + x) * 4) as usize;
        [data[i], data[i + 1], data[i + 2], data[i + 3]]
    }

    #[test]
    fn fill_rect_clamps_to_pixmap() {
        let mut data = vec![0u8; 4 * 4 * 4];
        fill_rect(&mut data, 4, 4, Rect { x: 2, y: 2, w: 10, h: 10 }, [1, 2, 3], 0xff);
        assert_eq!(pixel(&data, 4, 3, 3), [1, 2, 3, 0xff]);
        assert_eq!(pixel(&data, 4, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn translucent_fill_blends() {
        let mut data = vec![0u8; 4];
        fill_rect(&mut data, 1, 1, Rect { x: 0, y: 0, w: 1, h: 1 }, [255, 255, 255], 0x80);
        assert_eq!(pixel(&data, 1, 0, 0), [0x80, 0x80, 0x80, 0x80]);
    }

    #[test]
    fn glyphs_outside_clip_are_dropped() {
        let mut data = vec![0u8; 4 * 4 * 4];
        let clip = Rect { x: 1, y: 1, w: 2, h: 2 };
        blit_mask(&mut data, 4, clip, 0, 0, 4, 4, &[0xff; 16], &[9, 9, 9]);
        assert_eq!(pixel(&data, 4, 0, 0), [0, 0, 0, 0]);
        assert_eq!(pixel(&data, 4, 1, 1), [9, 9, 9, 0xff]);
        assert_eq!(pixel(&data, 4, 3, 3), [0, 0, 0, 0]);
    }
}
