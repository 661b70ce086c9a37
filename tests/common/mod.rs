/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Shared fixtures: synthetic archives, a rendering context over a
//! temporary tree, and PNG inspection helpers.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use anyhow::Result;
use rrdgraph::canvas::FontRenderer;
use rrdgraph::datafile::parse_datafile;
use rrdgraph::render::Renderer;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

const COOKIE: &[u8; 4] = b"RRD\0";
const FLOAT_COOKIE: f64 = 8.642135e130;
const HEADER_SIZE: usize = 128;
const NAME_SIZE: usize = 20;
const DS_DEF_SIZE: usize = 120;
const RRA_DEF_SIZE: usize = 120;
const PDP_PREP_SIZE: usize = 112;
const CDP_PREP_SIZE: usize = 80;

/// Serializes a version-3 archive with one data source and the given
/// `(cf_name, pdp_count, rows, head)` round-robin archives.
pub fn build_rrd(pdp_step: u64, last_up: i64, rras: &[(&str, u64, Vec<f64>, usize)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(COOKIE);
    out.extend_from_slice(b"0003\0");
    out.resize(16, 0);
    out.extend_from_slice(&FLOAT_COOKIE.to_ne_bytes());
    out.extend_from_slice(&1u64.to_ne_bytes());
    out.extend_from_slice(&(rras.len() as u64).to_ne_bytes());
    out.extend_from_slice(&pdp_step.to_ne_bytes());
    out.resize(HEADER_SIZE, 0);

    let mut name = [0u8; NAME_SIZE];
    name[..5].copy_from_slice(b"value");
    out.extend_from_slice(&name);
    let mut kind = [0u8; NAME_SIZE];
    kind[..5].copy_from_slice(b"GAUGE");
    out.extend_from_slice(&kind);
    out.resize(HEADER_SIZE + DS_DEF_SIZE, 0);

    for (cf, pdp_count, rows, _) in rras {
        let base = out.len();
        let mut cf_name = [0u8; NAME_SIZE];
        cf_name[..cf.len()].copy_from_slice(cf.as_bytes());
        out.extend_from_slice(&cf_name);
        out.resize(base + 24, 0);
        out.extend_from_slice(&(rows.len() as u64).to_ne_bytes());
        out.extend_from_slice(&pdp_count.to_ne_bytes());
        out.resize(base + RRA_DEF_SIZE, 0);
    }

    out.extend_from_slice(&(last_up as u64).to_ne_bytes());
    out.extend_from_slice(&0u64.to_ne_bytes());

    out.resize(out.len() + PDP_PREP_SIZE, 0);
    out.resize(out.len() + rras.len() * CDP_PREP_SIZE, 0);

    for (_, _, _, head) in rras {
        out.extend_from_slice(&(*head as u64).to_ne_bytes());
    }
    for (_, _, rows, _) in rras {
        for v in rows {
            out.extend_from_slice(&v.to_ne_bytes());
        }
    }
    out
}

/// A full archive in the shape the renderer expects: AVERAGE, MIN and MAX
/// buffers at the day, week, month and year resolutions, 100 rows each,
/// all filled by `sample`.
pub fn standard_rrd(last_up: i64, sample: impl Fn(usize) -> f64) -> Vec<u8> {
    let rows: Vec<f64> = (0..100).map(&sample).collect();
    let mut rras = Vec::new();
    for pdp_count in [1u64, 6, 24, 288] {
        for cf in ["AVERAGE", "MIN", "MAX"] {
            rras.push((cf, pdp_count, rows.clone(), 99usize));
        }
    }
    build_rrd(300, last_up, &rras)
}

/// Writes an archive where the renderer will look for it.
pub fn write_rrd(
    dbdir: &Path,
    domain: &str,
    host: &str,
    graph: &str,
    curve: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    let dir = dbdir.join(domain);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{host}-{graph}-{curve}-g.rrd"));
    File::create(&path)?.write_all(bytes)?;
    Ok(path)
}

/// Looks for any usable TrueType font; rendering tests skip without one.
pub fn find_test_font() -> Option<String> {
    let candidates = [
        std::env::var("RRDGRAPH_FONT").unwrap_or_default(),
        "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf".to_string(),
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string(),
        "/usr/share/fonts/dejavu/DejaVuSans.ttf".to_string(),
        "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf".to_string(),
        "/usr/share/fonts/TTF/DejaVuSans.ttf".to_string(),
    ];
    candidates
        .into_iter()
        .filter(|p| !p.is_empty())
        .find(|p| Path::new(p).exists())
}

/// Builds a renderer over a parsed index; `None` when no font exists on
/// this machine.
pub fn make_renderer(index: &str, lazy: bool) -> Result<Option<Renderer>> {
    let Some(font_path) = find_test_font() else {
        eprintln!("no usable font found, skipping");
        return Ok(None);
    };
    let dataset = parse_datafile(index)?;
    let font = FontRenderer::new(&font_path)?;
    Ok(Some(Renderer::new(dataset, font, lazy)))
}

/// Decodes a PNG into `(width, height, rgb_bytes)`.
pub fn read_png(path: &Path) -> Result<(u32, u32, Vec<u8>)> {
    let decoder = png::Decoder::new(File::open(path)?);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    buf.truncate(info.buffer_size());
    Ok((info.width, info.height, buf))
}

/// True when any pixel has exactly this `0xRRGGBB` color.
pub fn has_color(rgb: &[u8], color: u32) -> bool {
    rgb.chunks_exact(3).any(|px| {
        px[0] == (color >> 16) as u8 && px[1] == (color >> 8) as u8 && px[2] == color as u8
    })
}
