/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Randomized smoke test: many curves, mixed styles, mirrors and
//! orders, rendered over and over. Catches panics and degenerate
//! layouts that the hand-written cases miss.

mod common;

use anyhow::Result;
use common::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;

const LAST_UP: i64 = 946_681_200;

fn curve_samples(curve: usize, k: usize) -> f64 {
    match curve {
        0 => (k as f64 * 0.1).sin(),
        1 => 0.1,
        2 => (k as f64 * 0.37).sin() * 0.5,
        3 => (k as f64 * 0.1 + 3.0).cos(),
        9 => f64::NAN,
        n => (k as f64 * 0.1 + n as f64).cos() * (1.0 - n as f64 * 0.08),
    }
}

#[test]
fn randomized_graphs_render_without_failing() -> Result<()> {
    let rounds: u64 = if cfg!(feature = "slow_tests") { 40 } else { 8 };

    for round in 0..rounds {
        let mut rng = SmallRng::seed_from_u64(round);
        let dir = tempfile::TempDir::new()?;
        let dbdir = dir.path().join("db");
        let htmldir = dir.path().join("html");

        let mut body = String::new();
        writeln!(body, "dom;host;stress;graph_title Stress graph")?;
        writeln!(body, "dom;host;stress;graph_vlabel units / ${{graph_period}}")?;
        writeln!(body, "dom;host;stress;graph_order data02 data01 data00")?;
        writeln!(body, "dom;host;stress;graph_total Totals")?;
        if rng.random_bool(0.5) {
            writeln!(body, "dom;host;stress;graph_scale no")?;
        }

        for curve in 0..10usize {
            let name = format!("data{curve:02}");
            write_rrd(
                &dbdir,
                "dom",
                "host",
                "stress",
                &name,
                &standard_rrd(LAST_UP, |k| curve_samples(curve, k)),
            )?;
            writeln!(body, "dom;host;stress;{name};label Data source #{curve:02}")?;
            let draw = match rng.random_range(0..3) {
                0 => "line2",
                1 => "stack",
                _ => "area",
            };
            writeln!(body, "dom;host;stress;{name};draw {draw}")?;
            if rng.random_bool(0.1) {
                writeln!(
                    body,
                    "dom;host;stress;{name};colour {:06x}",
                    rng.random_range(0..0x1000000u32)
                )?;
            }
            if rng.random_bool(0.2) {
                let target = rng.random_range(0..10usize);
                writeln!(body, "dom;host;stress;{name};negative data{target:02}")?;
            }
            if rng.random_bool(0.1) {
                writeln!(body, "dom;host;stress;{name};graph no")?;
            }
        }
        // One derived curve on top of the archive-backed ones.
        writeln!(body, "dom;host;stress;combined;label combined")?;
        writeln!(body, "dom;host;stress;combined;cdef data00,data01,+")?;

        let index = format!(
            "version 1.3.2\ndbdir {}\nhtmldir {}\n{body}",
            dbdir.display(),
            htmldir.display()
        );
        let Some(renderer) = make_renderer(&index, false)? else {
            return Ok(());
        };
        renderer.process_graph(0)?;

        let path = htmldir.join("dom/host/stress-day.png");
        assert!(path.exists(), "round {round} produced no chart");
        let (width, _, _) = read_png(&path)?;
        assert_eq!(width, 495);
    }
    Ok(())
}
