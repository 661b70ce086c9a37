/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! PNG sink for finished canvases.

use super::Canvas;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Encodes the canvas to `path` as an 8-bit RGB PNG.
///
/// Rows are stored unfiltered at best-speed compression: the canvases we
/// produce are large flat-colored blocks, so encode time dominates and
/// filtering buys nothing.
pub fn write_png(path: impl AsRef<Path>, canvas: &Canvas) -> Result<()> {
    let file = File::create(path.as_ref())
        .with_context(|| format!("Cannot create {}", path.as_ref().display()))?;
    let mut encoder = png::Encoder::new(
        BufWriter::new(file),
        canvas.width() as u32,
        canvas.height() as u32,
    );
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);
    encoder.set_filter(png::FilterType::NoFilter);

    let mut writer = encoder
        .write_header()
        .with_context(|| format!("Cannot write PNG header to {}", path.as_ref().display()))?;
    writer
        .write_image_data(canvas.data())
        .with_context(|| format!("Cannot write PNG data to {}", path.as_ref().display()))?;
    Ok(())
}
