use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use crate::layout::{Corner, LayoutParams};

// --- Config ---

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub color_file: Option<String>,
    pub background: String,
    pub background_opacity: f32,
    pub border: String,
    pub foreground: String,
    pub font: String,
    pub font_size: f32,
    pub padding: u32,
    pub border_width: u32,
    pub line_spacing: u32,
    /// Seconds; 0 keeps the popup until it is clicked.
    pub duration: u64,
    pub corner: Corner,
    pub margin_x: u32,
    pub margin_y: u32,
    pub max_line_length: usize,
    /// Pixel cap on the window width, 0 for none. A cap narrower than the
    /// border and padding is raised to leave one pixel of text area.
    pub max_width: u32,
    pub lock_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            color_file: None,
            background: "#201f1c".into(),
            background_opacity: 1.0,
            border: "#f18f19".into(),
            foreground: "#e6e5e3".into(),
            font: "monospace".into(),
            font_size: 16.0,
            padding: 10,
            border_width: 3,
            line_spacing: 10,
            duration: 3,
            corner: Corner::TopRight,
            margin_x: 10,
            margin_y: 25,
            max_line_length: 82,
            max_width: 0,
            lock_file: None,
        }
    }
}

impl Config {
    pub fn layout(&self) -> LayoutParams {
        LayoutParams {
            padding: self.padding,
            border_width: self.border_width,
            line_spacing: self.line_spacing,
            corner: self.corner,
            margin_x: self.margin_x,
            margin_y: self.margin_y,
            max_width: (self.max_width > 0).then_some(self.max_width),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        match &self.lock_file {
            Some(p) => expand_path(p),
            None => runtime_dir().join("herald.lock"),
        }
    }
}

/// Loads `path` if given, otherwise the default config file.
///
/// An explicit path must be readable. The default file may be absent, and a
/// file that fails to parse falls back to defaults with a warning.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (path, content) = match path {
        Some(p) => {
            let s = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read config {}", p.display()))?;
            (p.to_path_buf(), s)
        }
        None => {
            let p = config_dir().join("herald.toml");
            match std::fs::read_to_string(&p) {
                Ok(s) => (p, s),
                Err(_) => return Ok(Config::default()),
            }
        }
    };
    match toml::from_str(&content) {
        Ok(cfg) => Ok(cfg),
        Err(e) => {
            warn!("failed to parse {}: {e}", path.display());
            Ok(Config::default())
        }
    }
}

fn config_dir() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"));
    base.join("widgets")
}

fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default()
}

pub fn expand_path(p: &str) -> PathBuf {
    if let Some(rest) = p.strip_prefix("~/") {
        home().join(rest)
    } else {
        PathBuf::from(p)
    }
}

// --- Colors ---

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Colors {
    pub background: [u8; 3],
    pub background_alpha: u8,
    pub border: [u8; 3],
    pub foreground: [u8; 3],
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            background: [0x20, 0x1f, 0x1c],
            background_alpha: 0xff,
            border: [0xf1, 0x8f, 0x19],
            foreground: [0xe6, 0xe5, 0xe3],
        }
    }
}

pub fn parse_hex(s: &str) -> Option<[u8; 3]> {
    let s = s.strip_prefix('#').unwrap_or(s);
    if s.len() != 6 || !s.is_ascii() { return None; }
    Some([u8::from_str_radix(&s[0..2], 16).ok()?,
          u8::from_str_radix(&s[2..4], 16).ok()?,
          u8::from_str_radix(&s[4..6], 16).ok()?])
}

fn opacity(f: f32) -> u8 {
    (f.clamp(0.0, 1.0) * 255.0) as u8
}

fn set_color(slot: &mut [u8; 3], key: &str, val: &str) {
    match parse_hex(val) {
        Some(c) => *slot = c,
        None => warn!("ignoring invalid {key} color {val:?}"),
    }
}

/// Colors from the config file, then overridden by `color_file` if one is set.
pub fn load_colors(cfg: &Config) -> Colors {
    let mut colors = Colors::default();
    set_color(&mut colors.background, "background", &cfg.background);
    set_color(&mut colors.border, "border", &cfg.border);
    set_color(&mut colors.foreground, "foreground", &cfg.foreground);
    colors.background_alpha = opacity(cfg.background_opacity);

    let Some(path) = cfg.color_file.as_deref() else { return colors };
    match std::fs::read_to_string(expand_path(path)) {
        Ok(content) => apply_color_file(&mut colors, &content),
        Err(e) => warn!("failed to read color file {path}: {e}"),
    }
    colors
}

fn apply_color_file(colors: &mut Colors, content: &str) {
    for line in content.lines() {
        let Some((key, val)) = line.split_once('=') else { continue };
        let (key, val) = (key.trim(), val.trim().trim_matches('"'));
        match key {
            "background_opacity" => {
                if let Ok(f) = val.parse::<f32>() {
                    colors.background_alpha = opacity(f);
                }
            }
            "background" => set_color(&mut colors.background, key, val),
            "border" => set_color(&mut colors.border, key, val),
            "foreground" => set_color(&mut colors.foreground, key, val),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.duration, 3);
        assert_eq!(cfg.corner, Corner::TopRight);
        assert_eq!(cfg.max_line_length, 82);
        assert_eq!(cfg.layout().max_width, None);
    }

    #[test]
    fn parses_corner_and_cap() {
        let cfg: Config = toml::from_str(
            "corner = \"bottom-left\"\nmax_width = 400\nduration = 0\n",
        ).unwrap();
        assert_eq!(cfg.corner, Corner::BottomLeft);
        assert_eq!(cfg.duration, 0);
        assert_eq!(cfg.layout().max_width, Some(400));
    }

    #[test]
    fn hex_parsing() {
        assert_eq!(parse_hex("#f18f19"), Some([0xf1, 0x8f, 0x19]));
        assert_eq!(parse_hex("201f1c"), Some([0x20, 0x1f, 0x1c]));
        assert_eq!(parse_hex("#fff"), None);
        assert_eq!(parse_hex("#zzzzzz"), None);
    }

    #[test]
    fn invalid_color_keeps_default() {
        let cfg = Config { border: "orange".into(), ..Config::default() };
        assert_eq!(load_colors(&cfg).border, Colors::default().border);
    }

    #[test]
    fn color_file_overrides_config() {
        let mut colors = Colors::default();
        apply_color_file(&mut colors,
            "background = \"#000000\"\nforeground=#ffffff\nbackground_opacity = 0.5\ncolor3 = #123456\n");
        assert_eq!(colors.background, [0, 0, 0]);
        assert_eq!(colors.foreground, [0xff, 0xff, 0xff]);
        assert_eq!(colors.background_alpha, 127);
        assert_eq!(colors.border, Colors::default().border);
    }

    #[test]
    fn explicit_lock_path_is_expanded() {
        let cfg = Config { lock_file: Some("/run/user/1000/x.lock".into()), ..Config::default() };
        assert_eq!(cfg.lock_path(), PathBuf::from("/run/user/1000/x.lock"));
        assert!(Config::default().lock_path().ends_with("herald.lock"));
    }
}
