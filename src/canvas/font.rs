/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Text compositing over the canvas.
//!
//! The glyph source is opaque: a TrueType font rasterized at a fixed pixel
//! size, with every Latin-1 glyph cached up front so that rendering
//! workers share the cache read-only. Glyphs are composited by darkening
//! the pixels underneath, `out = out * (256 - alpha) >> 8`, which is all a
//! chart on a light background needs.

use super::Canvas;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Where the font lives unless the caller says otherwise.
pub const DEFAULT_FONT_PATH: &str = "/usr/share/munin/VeraMono.ttf";

/// Pixel size every glyph is rasterized at.
const FONT_SIZE: f32 = 10.0;

/// Text direction and alignment relative to the pen position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// Horizontal, pen at the left edge.
    Left,
    /// Horizontal, pen at the right edge.
    Right,
    /// Horizontal, pen at the center.
    Centered,
    /// Rotated 90°, running downward.
    Down,
    /// Rotated 90°, running upward.
    Up,
}

struct Glyph {
    width: usize,
    height: usize,
    xmin: i32,
    ymin: i32,
    advance: i64,
    bitmap: Vec<u8>,
}

/// Measures and draws UTF-8 strings at a fixed size.
pub struct FontRenderer {
    glyphs: HashMap<char, Glyph>,
    descent: i32,
}

impl FontRenderer {
    /// Loads the font at `path` and pre-rasterizes the Latin-1 glyph set.
    pub fn new(path: impl AsRef<Path>) -> Result<FontRenderer> {
        let bytes = std::fs::read(path.as_ref())
            .with_context(|| format!("Cannot read font file {}", path.as_ref().display()))?;
        let font = fontdue::Font::from_bytes(
            bytes,
            fontdue::FontSettings {
                scale: FONT_SIZE,
                ..fontdue::FontSettings::default()
            },
        )
        .map_err(|e| anyhow!("Cannot parse font file {}: {e}", path.as_ref().display()))?;

        let descent = font
            .horizontal_line_metrics(FONT_SIZE)
            .map(|m| m.descent.floor() as i32)
            .unwrap_or(-2);

        let mut glyphs = HashMap::new();
        for ch in (0x20..0x7fu32).chain(0xa0..0x100).filter_map(char::from_u32) {
            if font.lookup_glyph_index(ch) == 0 {
                continue;
            }
            let (metrics, bitmap) = font.rasterize(ch, FONT_SIZE);
            glyphs.insert(
                ch,
                Glyph {
                    width: metrics.width,
                    height: metrics.height,
                    xmin: metrics.xmin,
                    ymin: metrics.ymin,
                    advance: metrics.advance_width.round() as i64,
                    bitmap,
                },
            );
        }

        Ok(FontRenderer { glyphs, descent })
    }

    /// Pixel advance of a horizontal rendering of `text`. Characters
    /// without a cached glyph contribute nothing.
    pub fn width(&self, text: &str) -> i64 {
        text.chars()
            .filter_map(|ch| self.glyphs.get(&ch))
            .map(|g| g.advance)
            .sum()
    }

    /// Draws `text` with its pen at `(x, y)`; `y` is the text baseline
    /// area, `blackness` attenuates the glyph coverage (0 is full black,
    /// 0xff invisible).
    pub fn draw(
        &self,
        canvas: &mut Canvas,
        x: i64,
        y: i64,
        text: &str,
        orientation: Orientation,
        blackness: u8,
    ) {
        let mut pen_x = match orientation {
            Orientation::Right => x - self.width(text),
            Orientation::Centered => x - self.width(text) / 2,
            _ => x,
        };
        let mut pen_y = y;
        let strength = 256 - blackness as u32;

        for ch in text.chars() {
            let Some(glyph) = self.glyphs.get(&ch) else {
                continue;
            };
            let x_off = glyph.xmin as i64;
            let y_off = (-(glyph.ymin + glyph.height as i32) + self.descent - 1) as i64;

            for yy in 0..glyph.height as i64 {
                for xx in 0..glyph.width as i64 {
                    let alpha = glyph.bitmap[yy as usize * glyph.width + xx as usize] as u32;
                    let alpha = (alpha * strength) >> 8;
                    if alpha == 0 {
                        continue;
                    }
                    let (eff_x, eff_y) = match orientation {
                        Orientation::Left | Orientation::Right | Orientation::Centered => {
                            (pen_x + xx + x_off, pen_y + yy + y_off)
                        }
                        Orientation::Down => (pen_x - yy - y_off, pen_y + xx + x_off),
                        Orientation::Up => (pen_x + yy + y_off, pen_y - xx - x_off),
                    };
                    darken(canvas, eff_x, eff_y, alpha);
                }
            }

            match orientation {
                Orientation::Left | Orientation::Right | Orientation::Centered => {
                    pen_x += glyph.advance
                }
                Orientation::Down => pen_y += glyph.advance,
                Orientation::Up => pen_y -= glyph.advance,
            }
        }
    }
}

fn darken(canvas: &mut Canvas, x: i64, y: i64, alpha: u32) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let old = canvas.get_pixel(x, y);
    let inv = 256 - alpha;
    let r = (((old >> 16) & 0xff) * inv) >> 8;
    let g = (((old >> 8) & 0xff) * inv) >> 8;
    let b = ((old & 0xff) * inv) >> 8;
    canvas.pixel(x, y, (r << 16) | (g << 8) | b);
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_font() -> Option<FontRenderer> {
        let candidates = [
            std::env::var("RRDGRAPH_FONT").unwrap_or_default(),
            "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf".to_string(),
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string(),
            "/usr/share/fonts/dejavu/DejaVuSans.ttf".to_string(),
            "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf".to_string(),
        ];
        candidates
            .iter()
            .filter(|p| !p.is_empty())
            .find(|p| std::path::Path::new(p).exists())
            .and_then(|p| FontRenderer::new(p).ok())
    }

    #[test]
    fn width_grows_with_text() {
        let Some(font) = test_font() else {
            eprintln!("no usable font found, skipping");
            return;
        };
        let short = font.width("ab");
        let long = font.width("abcd");
        assert!(short > 0);
        assert!(long > short);
        assert_eq!(font.width(""), 0);
    }

    #[test]
    fn draw_darkens_pixels() {
        let Some(font) = test_font() else {
            eprintln!("no usable font found, skipping");
            return;
        };
        let mut canvas = Canvas::new(64, 20);
        canvas.rect(0, 0, 64, 20, 0xffffff);
        font.draw(&mut canvas, 2, 14, "Xg", Orientation::Left, 0);
        let darkened = (0..64)
            .flat_map(|x| (0..20).map(move |y| (x, y)))
            .filter(|&(x, y)| canvas.get_pixel(x, y) != 0xffffff)
            .count();
        assert!(darkened > 0);
    }

    #[test]
    fn missing_font_file_is_an_error() {
        assert!(FontRenderer::new("/nonexistent/font.ttf").is_err());
    }
}
