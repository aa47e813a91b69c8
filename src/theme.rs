//! Accent and text colors derived from a cover's dominant color.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use image::{DynamicImage, ImageReader, ImageResult};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(0xff, 0xff, 0xff);
    pub const NEUTRAL_GRAY: Color = Color::rgb(0xcf, 0xcf, 0xcf);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Relative luminance in `[0, 1]`.
    pub fn luminance(&self) -> f64 {
        (0.299 * f64::from(self.r) + 0.587 * f64::from(self.g) + 0.114 * f64::from(self.b))
            / 255.0
    }

    /// Black on light accents, white on dark ones.
    pub fn contrasting_text(&self) -> Color {
        if self.luminance() > 0.5 {
            Color::BLACK
        } else {
            Color::WHITE
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThemeColors {
    pub accent: Color,
    pub text: Color,
}

impl ThemeColors {
    pub fn from_accent(accent: Color) -> Self {
        Self {
            accent,
            text: accent.contrasting_text(),
        }
    }
}

impl Default for ThemeColors {
    fn default() -> Self {
        Self::from_accent(Color::NEUTRAL_GRAY)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    /// Every n-th pixel is sampled.
    pub sample_stride: usize,
    pub bucket_size: u8,
    pub min_alpha: u8,
    pub min_brightness: u8,
    pub max_brightness: u8,
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            sample_stride: 4,
            bucket_size: 32,
            min_alpha: 128,
            min_brightness: 60,
            max_brightness: 225,
        }
    }
}

pub fn extract_color(pixels: &[u8], width: u32, height: u32) -> ThemeColors {
    extract_color_with(pixels, width, height, &ColorConfig::default())
}

/// Picks the most frequent quantized color of an RGBA buffer. Transparent,
/// near-black and near-white samples do not vote; ties go to the color seen
/// first.
pub fn extract_color_with(
    pixels: &[u8],
    width: u32,
    height: u32,
    config: &ColorConfig,
) -> ThemeColors {
    let len = (width as usize)
        .saturating_mul(height as usize)
        .saturating_mul(4)
        .min(pixels.len());
    let bucket = config.bucket_size.max(1);

    let mut slots: HashMap<Color, usize> = HashMap::new();
    let mut tallies: Vec<(Color, usize)> = Vec::new();

    for quad in pixels[..len].chunks_exact(4).step_by(config.sample_stride.max(1)) {
        let (r, g, b, alpha) = (quad[0], quad[1], quad[2], quad[3]);
        if alpha < config.min_alpha {
            continue;
        }
        let brightness = (u16::from(r) + u16::from(g) + u16::from(b)) as f64 / 3.0;
        if brightness < f64::from(config.min_brightness)
            || brightness > f64::from(config.max_brightness)
        {
            continue;
        }

        let key = Color::rgb(quantize(r, bucket), quantize(g, bucket), quantize(b, bucket));
        let slot = *slots.entry(key).or_insert_with(|| {
            tallies.push((key, 0));
            tallies.len() - 1
        });
        tallies[slot].1 += 1;
    }

    let mut best: Option<(Color, usize)> = None;
    for &(color, count) in &tallies {
        if best.map_or(true, |(_, max)| count > max) {
            best = Some((color, count));
        }
    }

    best.map(|(color, _)| ThemeColors::from_accent(color))
        .unwrap_or_default()
}

fn quantize(value: u8, bucket: u8) -> u8 {
    (value / bucket) * bucket
}

/// Decodes a cover and extracts its colors. Unreadable covers get the
/// neutral theme.
pub fn theme_for_cover(path: &Path, config: &ColorConfig) -> ThemeColors {
    match decode_cover(path) {
        Ok(decoded) => {
            let rgba = decoded.to_rgba8();
            extract_color_with(rgba.as_raw(), rgba.width(), rgba.height(), config)
        }
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to decode cover for theme");
            ThemeColors::default()
        }
    }
}

/// Picks the decoder from the file contents, not its extension.
fn decode_cover(path: &Path) -> ImageResult<DynamicImage> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}
