/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The per-graph rendering pipeline: planning, rasterization, output.
//!
//! [`Renderer::process_graph`] is the whole unit of work the scheduler
//! hands to a thread: resolve the graph's data sources, load their
//! archives, then plan and draw one chart per time window (day, week,
//! month, year). Everything it touches besides the filesystem is either
//! owned by the call frame or read from the frozen [`Dataset`], so graphs
//! render concurrently without coordination.
//!
//! Errors split at this boundary: a recoverable problem (bad CDEF,
//! unresolved reference, missing archive) elides the curve or the graph
//! and the run goes on; a fatal one (malformed curve type, oversized
//! dimensions) propagates to the scheduler.

mod grid;
mod scale;

pub use scale::{
    format_args, format_number, format_pair, step_decimals, step_size, NumberFormat, LINE_HEIGHT,
};

use crate::canvas::{write_png, Canvas, FontRenderer, Orientation};
use crate::cdef::{derived_iterator, CdefScript};
use crate::model::{find_word, type_suffix, Dataset, DrawStyle, Graph, IndexVersion, MAX_DIM};
use crate::rrd::{Cf, Rrd, RrdError, RrdIterator};
use anyhow::{bail, Result};
use log::{debug, warn};
use std::cmp::Ordering;
use std::path::PathBuf;

/// The four rendered time windows: sample interval and period suffix.
pub const INTERVALS: [(i64, &str); 4] = [
    (300, "day"),
    (1800, "week"),
    (7200, "month"),
    (86400, "year"),
];

/// Colors assigned to curves without an explicit one, in legend order.
const PALETTE: [u32; 16] = [
    0x21fb21, 0x0022ff, 0xff0000, 0x00aaaa, 0xff00ff, 0xffa500, 0xcc0000, 0x0000cc, 0x0080c0,
    0x8080c0, 0xff0080, 0x800080, 0x688e23, 0x408080, 0x808000, 0x000000,
];

const WARNING_FILL: u32 = 0xffff77;
const CRITICAL_FILL: u32 = 0xff7777;

const WATERMARK: &str = concat!("rrdgraph ", env!("CARGO_PKG_VERSION"));

/// Everything shared by rendering workers, read-only by the time they run.
pub struct Renderer {
    pub dataset: Dataset,
    pub font: FontRenderer,
    /// When set, up-to-date charts are skipped (`--no-lazy` clears it).
    pub lazy: bool,
}

/// One data source of the graph being rendered, after alias resolution
/// and archive loading.
struct CurveJob {
    /// Index into the graph's curve arena (display attributes).
    curve: usize,
    /// The loaded archive; `None` for CDEF-only curves.
    rrd: Option<Rrd>,
}

/// Per-curve aggregates over one time window.
#[derive(Clone, Copy, Debug, Default)]
struct Stats {
    cur: f64,
    min: f64,
    max: f64,
    avg: f64,
    min_avg: f64,
    max_avg: f64,
}

const AVERAGE: usize = 0;
const MIN: usize = 1;
const MAX: usize = 2;

/// The AVERAGE, MIN and MAX iterators of one archive over one window.
fn raw_iterators(
    rrd: &Rrd,
    interval: i64,
    width: usize,
) -> Result<[RrdIterator<'_>; 3], RrdError> {
    Ok([
        rrd.iterator(Cf::Average, interval as u64, width)?,
        rrd.iterator(Cf::Min, interval as u64, width)?,
        rrd.iterator(Cf::Max, interval as u64, width)?,
    ])
}

impl Renderer {
    pub fn new(dataset: Dataset, font: FontRenderer, lazy: bool) -> Self {
        Renderer {
            dataset,
            font,
            lazy,
        }
    }

    /// Renders all four time windows of one graph.
    ///
    /// Returns `Err` only for conditions that must stop the whole run;
    /// per-graph failures are logged and swallowed here.
    pub fn process_graph(&self, graph_index: usize) -> Result<()> {
        let g = &self.dataset.graphs[graph_index];
        if g.nograph {
            return Ok(());
        }

        // Resolve every curve to an archive path and load it. A curve
        // whose archive is missing or unreadable is dropped unless a CDEF
        // can compute it; a graph with no curves left is skipped.
        let mut jobs = Vec::new();
        for (ci, curve) in g.curves.iter().enumerate() {
            let Some((eff_graph, eff_curve)) = self.resolve_data_source(graph_index, ci) else {
                debug!(
                    "skipping data source {};{};{}.{}",
                    g.domain, g.host, g.name, curve.name
                );
                continue;
            };
            let eff_g = &self.dataset.graphs[eff_graph];
            let eff_c = &eff_g.curves[eff_curve];
            let suffix = type_suffix(eff_c.kind.as_deref())?;
            let path = PathBuf::from(format!(
                "{}/{}/{}-{}-{}-{}.rrd",
                self.dataset.paths.dbdir,
                eff_g.domain,
                eff_g.host,
                eff_g.rrd_name,
                eff_c.name,
                suffix
            ));

            let rrd = match Rrd::parse(&path) {
                Ok(Some(rrd)) => Some(rrd),
                Ok(None) => None,
                Err(e) => {
                    debug!("unusable archive {}: {e}", path.display());
                    None
                }
            };
            if rrd.is_none() && curve.cdef.is_none() {
                debug!(
                    "skipping data source {};{};{}.{} ({})",
                    g.domain,
                    g.host,
                    g.name,
                    curve.name,
                    path.display()
                );
                continue;
            }
            jobs.push(CurveJob { curve: ci, rrd });
        }

        if jobs.is_empty() {
            debug!("no data sources left for {};{};{}", g.domain, g.host, g.name);
            return Ok(());
        }

        // Legend and drawing order: curves named by graph_order first, in
        // that order, then the rest by name.
        let order = g.order.as_deref();
        jobs.sort_by(|a, b| {
            curve_order(order, &g.curves[a.curve].name, &g.curves[b.curve].name)
        });

        let mut scripts: Vec<Option<CdefScript>> = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let script = match &g.curves[job.curve].cdef {
                Some(cdef) => match CdefScript::compile(cdef, |name| g.find_curve(name)) {
                    Ok(script) => Some(script),
                    Err(e) => {
                        warn!("CDEF '{cdef}' for '{}': {e}", g.name);
                        return Ok(());
                    }
                },
                None => None,
            };
            scripts.push(script);
        }

        // Negative mirrors point at another curve of the same graph; an
        // unresolved reference gives the graph up.
        let mut negatives: Vec<Option<usize>> = Vec::with_capacity(jobs.len());
        for job in &jobs {
            let negative = match &g.curves[job.curve].negative {
                Some(name) => match g
                    .find_curve(name)
                    .and_then(|ci| jobs.iter().position(|jb| jb.curve == ci))
                {
                    Some(target) => Some(target),
                    None => {
                        warn!(
                            "negative '{name}' for '{}' not found in {}",
                            g.curves[job.curve].name, g.name
                        );
                        return Ok(());
                    }
                },
                None => None,
            };
            negatives.push(negative);
        }

        let last_update = jobs
            .iter()
            .filter_map(|job| job.rrd.as_ref().map(|rrd| rrd.last_up()))
            .max()
            .unwrap_or(0);

        for (interval, period) in INTERVALS {
            self.draw_graph(
                graph_index,
                &jobs,
                &scripts,
                &negatives,
                last_update,
                interval,
                period,
            )?;
        }
        Ok(())
    }

    /// Applies `graph_order` aliases: an entry `name=graph.curve` (with
    /// the separator of the index version) makes `name` borrow the data
    /// of another graph's curve. Returns the effective (graph, curve)
    /// arena indices, or `None` when the alias does not resolve.
    fn resolve_data_source(&self, graph_index: usize, curve_index: usize) -> Option<(usize, usize)> {
        let g = &self.dataset.graphs[graph_index];
        let curve = &g.curves[curve_index];
        let Some(order) = g.order.as_deref() else {
            return Some((graph_index, curve_index));
        };
        let Some(pos) = find_word(order, &curve.name) else {
            return Some((graph_index, curve_index));
        };
        let after = &order[pos + curve.name.len()..];
        let Some(target) = after.strip_prefix('=') else {
            return Some((graph_index, curve_index));
        };
        let target = target.split_whitespace().next().unwrap_or("");

        let separator = self.dataset.version.graph_terminator();
        let (eff_graph, curve_name) = match target.split_once(separator) {
            Some((graph_name, curve_name)) => {
                let eff = self.dataset.find_graph(&g.domain, &g.host, graph_name)?;
                (eff, curve_name)
            }
            None => (graph_index, target),
        };
        let eff_curve = self.dataset.graphs[eff_graph].find_curve(curve_name)?;
        Some((eff_graph, eff_curve))
    }

    fn png_path(&self, g: &Graph, period: &str) -> PathBuf {
        let htmldir = &self.dataset.paths.htmldir;
        match self.dataset.version {
            IndexVersion::V1_2 => PathBuf::from(format!(
                "{htmldir}/{}/{}-{}-{period}.png",
                g.domain, g.host, g.png_name
            )),
            IndexVersion::V1_3 => PathBuf::from(format!(
                "{htmldir}/{}/{}/{}-{period}.png",
                g.domain, g.host, g.png_name
            )),
        }
    }

    /// Plans and draws one `(graph, time-window)` chart.
    #[allow(clippy::too_many_arguments)]
    fn draw_graph(
        &self,
        graph_index: usize,
        jobs: &[CurveJob],
        scripts: &[Option<CdefScript>],
        negatives: &[Option<usize>],
        last_update: i64,
        interval: i64,
        period: &str,
    ) -> Result<()> {
        let g = &self.dataset.graphs[graph_index];
        let png_path = self.png_path(g, period);

        // Laziness: when no curve has new samples since the chart was
        // written, there is nothing to draw. The 5-minute chart always
        // renders.
        if self.lazy && interval > 300 {
            if let Some(mtime) = file_mtime(&png_path) {
                let fresh = jobs.iter().all(|job| {
                    let last_up = job.rrd.as_ref().map(|rrd| rrd.last_up()).unwrap_or(0);
                    last_up / interval == mtime / interval
                });
                if fresh {
                    return Ok(());
                }
            }
        }

        let graph_width = g.plot_width();
        let graph_height = g.plot_height();
        if graph_width > MAX_DIM || graph_height > MAX_DIM {
            bail!("graph dimensions {graph_width}x{graph_height} are too big");
        }

        // Three raw iterators per curve; all three consolidation archives
        // must exist, or the graph is abandoned.
        let mut raws: Vec<[RrdIterator<'_>; 3]> = Vec::with_capacity(jobs.len());
        for job in jobs {
            match &job.rrd {
                Some(rrd) => match raw_iterators(rrd, interval, graph_width) {
                    Ok(iterators) => raws.push(iterators),
                    Err(e) => {
                        warn!(
                            "missing round robin archives for {};{};{}: {e}",
                            g.domain, g.host, g.name
                        );
                        return Ok(());
                    }
                },
                None => raws.push([
                    RrdIterator::empty(),
                    RrdIterator::empty(),
                    RrdIterator::empty(),
                ]),
            }
        }

        // Effective iterators: the raw archive, or the derived CDEF view.
        // CDEF operands read other curves' effective iterators, except a
        // self-reference, which reads its own raw one.
        let mut effs: Vec<[RrdIterator<'_>; 3]> = Vec::with_capacity(jobs.len());
        for j in 0..jobs.len() {
            let eff = match &scripts[j] {
                Some(script) => std::array::from_fn(|cf| {
                    derived_iterator(script, graph_width, |arena_curve| {
                        match jobs.iter().position(|jb| jb.curve == arena_curve) {
                            Some(k) if k == j || k >= effs.len() => raws[k][cf].clone(),
                            Some(k) => effs[k][cf].clone(),
                            None => RrdIterator::empty(),
                        }
                    })
                }),
                None => raws[j].clone(),
            };
            effs.push(eff);
        }

        // Planning pass: per-curve aggregates, stacked-column sums, and
        // the global value range.
        let mut column_sums = vec![0.0f64; graph_width];
        let mut global_min = 0.0f64;
        let mut global_max = 0.0f64;
        let mut stats = Vec::with_capacity(jobs.len());
        let mut visible_count = 0usize;
        let mut has_negative = false;

        for (j, job) in jobs.iter().enumerate() {
            let curve = &g.curves[job.curve];
            let visible = !curve.nograph;
            if visible {
                visible_count += 1;
            }
            if curve.negative.is_some() {
                has_negative = true;
            }

            let stacked = visible && curve.draw.is_area();
            if stacked && curve.draw == DrawStyle::Area {
                column_sums.fill(0.0);
            }

            let mut avg_it = effs[j][AVERAGE].clone();
            let mut min_it = effs[j][MIN].clone();
            let mut max_it = effs[j][MAX].clone();
            let area = stacked.then_some((&mut column_sums[..], &mut global_max));
            stats.push(aggregate(
                &mut avg_it,
                &mut min_it,
                &mut max_it,
                graph_width,
                area,
            ));
        }

        // A single line curve gets the full min/max band treatment; in
        // every other case only the averages shape the axis, which keeps
        // spikes from drowning multi-curve charts.
        let min_max_mode = visible_count == 1 && g.curves[jobs[0].curve].draw.is_line();

        for (j, job) in jobs.iter().enumerate() {
            if g.curves[job.curve].nograph {
                continue;
            }
            let s = &stats[j];
            let (lo, hi) = if min_max_mode {
                (s.min, s.max)
            } else {
                (s.min_avg, s.max_avg)
            };
            global_min = global_min.min(lo);
            global_max = global_max.max(hi);
            if let Some(nj) = negatives[j] {
                let n = &stats[nj];
                let (nlo, nhi) = if min_max_mode {
                    (n.min, n.max)
                } else {
                    (n.min_avg, n.max_avg)
                };
                global_min = global_min.min(-nhi);
                global_max = global_max.max(-nlo);
            }
        }

        if let Some(upper) = g.upper_limit {
            if global_max < upper {
                global_max = upper;
            }
        }

        // Canvas layout: the plot area sits at (60, 30), the legend and
        // the numeric table follow below.
        let graph_x: i64 = 60;
        let graph_y: i64 = 30;
        let gw = graph_width as i64;
        let gh = graph_height as i64;
        let mut rows = visible_count as i64;
        if g.total.is_some() {
            rows += 1;
        }
        let canvas_width = graph_width + 95;
        let canvas_height = (graph_height as i64 + 75 + rows * LINE_HEIGHT) as usize;
        let cw = canvas_width as i64;
        let ch = canvas_height as i64;

        let mut canvas = Canvas::new(canvas_width, canvas_height);
        canvas.rect(0, 0, cw, 1, 0xcccccc);
        canvas.rect(0, 1, cw, ch - 2, 0xf5f5f5);
        canvas.rect(0, ch - 1, cw, 1, 0x777777);
        canvas.vline(0, 0, ch - 1, 0xcccccc);
        canvas.vline(cw - 1, 0, ch - 1, 0x777777);
        canvas.rect(graph_x, graph_y, gw, gh, 0xffffff);

        if let Some(title) = &g.title {
            let text = format!("{title} - by {period}");
            let x = (cw - self.font.width(&text)) / 2;
            self.font.draw(&mut canvas, x, 20, &text, Orientation::Left, 0);
        }
        self.font
            .draw(&mut canvas, cw - 15, 5, WATERMARK, Orientation::Down, 0xc0);

        if let Some(vlabel) = &g.vlabel {
            let period_name = g.period.as_deref().unwrap_or("second");
            let text = vlabel.replace("${graph_period}", period_name);
            let width = self.font.width(&text);
            self.font.draw(
                &mut canvas,
                14,
                graph_y + gh / 2 + width / 2,
                &text,
                Orientation::Up,
                0,
            );
        }

        if global_min != global_max {
            // Pass 0 paints what belongs behind the grid: min/max bands,
            // stacked areas, the legend swatches. Pass 1 draws the grid
            // and strokes the averages on top of it.
            column_sums.fill(0.0);
            for pass in 0..2 {
                let mut palette_index = 0usize;
                let mut y = graph_y + gh + 20 + LINE_HEIGHT;

                if pass == 1 {
                    grid::draw_grid(
                        &mut canvas,
                        &self.font,
                        g.noscale,
                        last_update,
                        interval,
                        global_min,
                        global_max,
                        graph_x,
                        graph_y,
                        gw,
                        gh,
                    );
                }

                for (j, job) in jobs.iter().enumerate() {
                    let curve = &g.curves[job.curve];
                    if curve.nograph {
                        continue;
                    }
                    let color = curve
                        .color
                        .unwrap_or(PALETTE[palette_index % PALETTE.len()]);
                    let style = curve.draw;

                    if style.is_line() {
                        let width = match style {
                            DrawStyle::Line1 => 1,
                            DrawStyle::Line3 => 3,
                            _ => 2,
                        };
                        if min_max_mode {
                            if pass == 0 {
                                plot_min_max(
                                    &mut canvas,
                                    &mut effs[j][MIN].clone(),
                                    &mut effs[j][MAX].clone(),
                                    graph_x,
                                    graph_y,
                                    gw,
                                    gh,
                                    global_min,
                                    global_max,
                                    color,
                                    false,
                                );
                                if let Some(nj) = negatives[j] {
                                    plot_min_max(
                                        &mut canvas,
                                        &mut effs[nj][MIN].clone(),
                                        &mut effs[nj][MAX].clone(),
                                        graph_x,
                                        graph_y,
                                        gw,
                                        gh,
                                        global_min,
                                        global_max,
                                        color,
                                        true,
                                    );
                                }
                            } else {
                                let stroke = darken(color);
                                plot_gauge(
                                    &mut canvas,
                                    &mut effs[j][AVERAGE].clone(),
                                    graph_x,
                                    graph_y,
                                    gw,
                                    gh,
                                    global_min,
                                    global_max,
                                    stroke,
                                    false,
                                    width,
                                );
                                if let Some(nj) = negatives[j] {
                                    plot_gauge(
                                        &mut canvas,
                                        &mut effs[nj][AVERAGE].clone(),
                                        graph_x,
                                        graph_y,
                                        gw,
                                        gh,
                                        global_min,
                                        global_max,
                                        stroke,
                                        true,
                                        width,
                                    );
                                }
                            }
                        } else if pass == 1 {
                            plot_gauge(
                                &mut canvas,
                                &mut effs[j][AVERAGE].clone(),
                                graph_x,
                                graph_y,
                                gw,
                                gh,
                                global_min,
                                global_max,
                                color,
                                false,
                                width,
                            );
                            if let Some(nj) = negatives[j] {
                                plot_gauge(
                                    &mut canvas,
                                    &mut effs[nj][AVERAGE].clone(),
                                    graph_x,
                                    graph_y,
                                    gw,
                                    gh,
                                    global_min,
                                    global_max,
                                    color,
                                    true,
                                    width,
                                );
                            }
                        }
                    } else if pass == 0 {
                        if style == DrawStyle::Area {
                            column_sums.fill(0.0);
                        }
                        plot_area(
                            &mut canvas,
                            &mut effs[j][AVERAGE].clone(),
                            &mut column_sums,
                            graph_x,
                            graph_y,
                            gw,
                            gh,
                            global_min,
                            global_max,
                            color,
                        );
                    }

                    if pass == 0 {
                        let swatch = if min_max_mode { darken(color) } else { color };
                        canvas.rect(10, y, 6, 6, swatch);
                        canvas.line(9, y - 1, 17, y - 1, 0);
                        canvas.line(9, y + 6, 17, y + 6, 0);
                        canvas.vline(9, y, y + 6, 0);
                        canvas.vline(16, y, y + 6, 0);
                        let label = curve.label.as_deref().unwrap_or(&curve.name);
                        self.font
                            .draw(&mut canvas, 22, y + 9, label, Orientation::Left, 0);
                    }

                    palette_index += 1;
                    y += LINE_HEIGHT;
                }
            }
        } else {
            global_min = 0.0;
            global_max = 1.0;
            grid::draw_grid(
                &mut canvas,
                &self.font,
                g.noscale,
                last_update,
                interval,
                global_min,
                global_max,
                graph_x,
                graph_y,
                gw,
                gh,
            );
        }

        let totals_y = graph_y + gh + 20 + LINE_HEIGHT + visible_count as i64 * LINE_HEIGHT;
        if let Some(total) = &g.total {
            self.font
                .draw(&mut canvas, 22, totals_y + 9, total, Orientation::Left, 0);
        }

        self.draw_legend_table(
            &mut canvas,
            g,
            jobs,
            negatives,
            &stats,
            has_negative,
            graph_y + gh + 20,
            totals_y,
        );

        // The zero axis, over everything inside the plot.
        let y = value_y(0.0, global_min, global_max, gh);
        canvas.line(graph_x, graph_y + y, graph_x + gw - 1, graph_y + y, 0);

        if let Some(parent) = png_path.parent() {
            let mut builder = std::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(0o775);
            }
            if let Err(e) = builder.create(parent) {
                warn!("cannot create directory {}: {e}", parent.display());
                return Ok(());
            }
        }
        if let Err(e) = write_png(&png_path, &canvas) {
            warn!("{e:#}");
        }
        Ok(())
    }

    /// The four aligned numeric columns under the plot, with threshold
    /// highlighting and the optional totals row.
    #[allow(clippy::too_many_arguments)]
    fn draw_legend_table(
        &self,
        canvas: &mut Canvas,
        g: &Graph,
        jobs: &[CurveJob],
        negatives: &[Option<usize>],
        stats: &[Stats],
        has_negative: bool,
        header_y: i64,
        totals_y: i64,
    ) {
        let mut max_label_width: i64 = 0;
        for job in jobs {
            let curve = &g.curves[job.curve];
            if curve.nograph {
                continue;
            }
            let label = curve.label.as_deref().unwrap_or(&curve.name);
            max_label_width = max_label_width.max(self.font.width(label));
        }
        if let Some(total) = &g.total {
            max_label_width = max_label_width.max(self.font.width(total));
        }

        let x = 22 + max_label_width + 10;
        let column_width = (canvas.width() as i64 - x - 20) / 4;
        let headers = if has_negative {
            ["Cur (-/+)", "Min (-/+)", "Avg (-/+)", "Max (-/+)"]
        } else {
            ["Cur", "Min", "Avg", "Max"]
        };
        for (k, header) in headers.iter().enumerate() {
            self.font.draw(
                canvas,
                x + column_width * (k as i64 + 1),
                header_y + 9,
                header,
                Orientation::Right,
                0,
            );
        }

        let mut totals = [[0.0f64; 2]; 4];
        let mut y = header_y + LINE_HEIGHT;

        for (j, job) in jobs.iter().enumerate() {
            let curve = &g.curves[job.curve];
            if curve.nograph {
                continue;
            }
            let s = &stats[j];

            if let Some(nj) = negatives[j] {
                let n = &stats[nj];
                let columns = [
                    (n.cur, s.cur),
                    (n.min, s.min),
                    (n.avg, s.avg),
                    (n.max, s.max),
                ];
                for (k, (neg, pos)) in columns.iter().enumerate() {
                    self.font.draw(
                        canvas,
                        x + column_width * (k as i64 + 1),
                        y + 9,
                        &scale::format_pair(*neg, *pos),
                        Orientation::Right,
                        0,
                    );
                }
                totals[0][1] += n.cur;
                totals[1][1] += n.min;
                totals[2][1] += n.avg;
                totals[3][1] += n.max;
            } else {
                if curve.critical.is_some_and(|limit| s.cur > limit) {
                    canvas.rect(x, y - 4, column_width + 2, LINE_HEIGHT, CRITICAL_FILL);
                } else if curve.warning.is_some_and(|limit| s.cur > limit) {
                    canvas.rect(x, y - 4, column_width + 2, LINE_HEIGHT, WARNING_FILL);
                }

                let values = [s.cur, s.min, s.avg, s.max];
                let smallest = values.iter().copied().fold(s.cur, f64::min);
                let biggest = values.iter().copied().fold(s.cur, f64::max);
                for (k, value) in values.iter().enumerate() {
                    let reference = if biggest / smallest < 100.0 {
                        smallest
                    } else {
                        *value
                    };
                    self.font.draw(
                        canvas,
                        x + column_width * (k as i64 + 1),
                        y + 9,
                        &scale::format_number(*value, reference),
                        Orientation::Right,
                        0,
                    );
                }
            }

            totals[0][0] += s.cur;
            totals[1][0] += s.min;
            totals[2][0] += s.avg;
            totals[3][0] += s.max;
            y += LINE_HEIGHT;
        }

        if g.total.is_some() {
            for (k, [pos, neg]) in totals.iter().enumerate() {
                let text = if has_negative {
                    scale::format_pair(*neg, *pos)
                } else {
                    scale::format_number(*pos, *pos)
                };
                self.font.draw(
                    canvas,
                    x + column_width * (k as i64 + 1),
                    totals_y + 9,
                    &text,
                    Orientation::Right,
                    0,
                );
            }
        }
    }
}

/// Curve ordering: words of `graph_order` first, by their position in it,
/// then everything else by name.
fn curve_order(order: Option<&str>, a: &str, b: &str) -> Ordering {
    if let Some(order) = order {
        match (find_word(order, a), find_word(order, b)) {
            (Some(pa), Some(pb)) => return pa.cmp(&pb),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => {}
        }
    }
    a.cmp(b)
}

fn file_mtime(path: &std::path::Path) -> Option<i64> {
    let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
    let secs = mtime
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs();
    Some(secs as i64)
}

fn darken(color: u32) -> u32 {
    (color >> 1) & 0x7f7f7f
}

/// Maps a sample value to a plot-area row; row 0 is the top.
fn value_y(value: f64, global_min: f64, global_max: f64, height: i64) -> i64 {
    (height as f64 - (value - global_min) * (height - 1) as f64 / (global_max - global_min)) as i64
        - 1
}

/// Walks the AVERAGE, MIN and MAX tracks of one curve in lockstep over at
/// most `width` samples, folding the per-curve aggregates. With `area`,
/// positive averages also accumulate into the stacked column sums, whose
/// running maximum feeds the global axis maximum.
fn aggregate(
    avg_it: &mut RrdIterator<'_>,
    min_it: &mut RrdIterator<'_>,
    max_it: &mut RrdIterator<'_>,
    width: usize,
    mut area: Option<(&mut [f64], &mut f64)>,
) -> Stats {
    let mut stats = Stats {
        cur: avg_it.last(),
        ..Stats::default()
    };
    let mut first = true;
    let mut avg_samples = 0usize;

    let n = avg_it.remaining().min(width);
    for x in 0..n {
        let avg_value = avg_it.peek();
        let min_value = min_it.peek();
        let max_value = max_it.peek();
        avg_it.advance();
        min_it.advance();
        max_it.advance();

        if !avg_value.is_nan() {
            if let Some((sums, global_max)) = area.as_mut() {
                if avg_value > 0.0 {
                    sums[x] += avg_value;
                }
                if sums[x] > **global_max {
                    **global_max = sums[x];
                }
            }

            stats.avg += avg_value;
            avg_samples += 1;

            if first {
                stats.max_avg = avg_value;
                stats.min_avg = avg_value;
                stats.min = avg_value;
                first = false;
            } else if avg_value > stats.max_avg {
                stats.max_avg = avg_value;
            } else if avg_value < stats.min_avg {
                stats.min_avg = avg_value;
            }
        }

        if !max_value.is_nan() && max_value > stats.max {
            stats.max = max_value;
        }
        if !min_value.is_nan() && min_value < stats.min {
            stats.min = min_value;
        }
    }

    if avg_samples > 0 {
        stats.avg /= avg_samples as f64;
    }
    stats
}

/// Strokes the averages as a polyline, breaking at NaN samples; the first
/// sample after a gap is a lone dot.
#[allow(clippy::too_many_arguments)]
fn plot_gauge(
    canvas: &mut Canvas,
    it: &mut RrdIterator<'_>,
    graph_x: i64,
    graph_y: i64,
    width: i64,
    height: i64,
    global_min: f64,
    global_max: f64,
    color: u32,
    negative: bool,
    line_width: u8,
) {
    let mut prev_y: Option<i64> = None;
    let n = (it.remaining() as i64).min(width);

    for x in 0..n {
        let mut value = it.peek();
        it.advance();
        if value.is_nan() {
            prev_y = None;
            continue;
        }
        if negative {
            value = -value;
        }
        let y = value_y(value, global_min, global_max, height);

        match prev_y {
            Some(py) => {
                canvas.line(graph_x + x - 1, graph_y + py, graph_x + x, graph_y + y, color);
                if line_width >= 2 {
                    canvas.line(
                        graph_x + x - 1,
                        graph_y + py - 1,
                        graph_x + x,
                        graph_y + y - 1,
                        color,
                    );
                }
                if line_width >= 3 {
                    canvas.line(
                        graph_x + x - 1,
                        graph_y + py + 1,
                        graph_x + x,
                        graph_y + y + 1,
                        color,
                    );
                }
            }
            None => {
                canvas.pixel(graph_x + x, graph_y + y, color);
                if line_width >= 2 {
                    canvas.pixel(graph_x + x, graph_y + y - 1, color);
                }
                if line_width >= 3 {
                    canvas.pixel(graph_x + x, graph_y + y + 1, color);
                }
            }
        }
        prev_y = Some(y);
    }
}

/// Fills the band between the MIN and MAX tracks, one vertical span per
/// column.
#[allow(clippy::too_many_arguments)]
fn plot_min_max(
    canvas: &mut Canvas,
    mins: &mut RrdIterator<'_>,
    maxs: &mut RrdIterator<'_>,
    graph_x: i64,
    graph_y: i64,
    width: i64,
    height: i64,
    global_min: f64,
    global_max: f64,
    color: u32,
    negative: bool,
) {
    let n = (mins.remaining().min(maxs.remaining()) as i64).min(width);
    for x in 0..n {
        let mut min_value = mins.peek();
        let mut max_value = maxs.peek();
        mins.advance();
        maxs.advance();
        if min_value.is_nan() || max_value.is_nan() {
            continue;
        }
        if negative {
            min_value = -min_value;
            max_value = -max_value;
        }
        let y0 = value_y(min_value, global_min, global_max, height);
        let y1 = value_y(max_value, global_min, global_max, height);
        canvas.vline(graph_x + x, graph_y + y0, graph_y + y1, color);
    }
}

/// Fills the columns of an area or stacked curve on top of the running
/// column sums, then accumulates into them.
#[allow(clippy::too_many_arguments)]
fn plot_area(
    canvas: &mut Canvas,
    it: &mut RrdIterator<'_>,
    column_sums: &mut [f64],
    graph_x: i64,
    graph_y: i64,
    width: i64,
    height: i64,
    global_min: f64,
    global_max: f64,
    color: u32,
) {
    let n = (it.remaining() as i64).min(width);
    for x in 0..n {
        let value = it.peek();
        it.advance();
        if value.is_nan() || value <= 0.0 {
            continue;
        }
        let base = column_sums[x as usize];
        let y0 = value_y(base, global_min, global_max, height);
        let y1 = value_y(base + value, global_min, global_max, height);
        canvas.vline(graph_x + x, graph_y + y0, graph_y + y1, color);
        column_sums[x as usize] += value;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rrd::ArchiveView;

    fn iter(values: &[f64]) -> RrdIterator<'_> {
        RrdIterator::archive(ArchiveView::new(values, 0, 1, 0, values.len()), usize::MAX)
    }

    #[test]
    fn constant_curve_aggregates() {
        let values = vec![42.0; 12];
        let stats = aggregate(
            &mut iter(&values),
            &mut iter(&values),
            &mut iter(&values),
            400,
            None,
        );
        assert_eq!(stats.cur, 42.0);
        assert_eq!(stats.min, 42.0);
        assert_eq!(stats.max, 42.0);
        assert_eq!(stats.avg, 42.0);
        assert_eq!(stats.min_avg, 42.0);
        assert_eq!(stats.max_avg, 42.0);
    }

    #[test]
    fn stacked_columns_raise_the_global_maximum() {
        let area: Vec<f64> = vec![10.0; 8];
        let stack: Vec<f64> = vec![20.0; 8];
        let mut sums = vec![0.0f64; 8];
        let mut global_max = 0.0f64;

        aggregate(
            &mut iter(&area),
            &mut iter(&area),
            &mut iter(&area),
            8,
            Some((&mut sums, &mut global_max)),
        );
        aggregate(
            &mut iter(&stack),
            &mut iter(&stack),
            &mut iter(&stack),
            8,
            Some((&mut sums, &mut global_max)),
        );

        assert!(sums.iter().all(|&s| s == 30.0));
        assert!(global_max >= 30.0);
    }

    #[test]
    fn nan_samples_do_not_count() {
        let values = [1.0, f64::NAN, 3.0, f64::NAN];
        let stats = aggregate(&mut iter(&values), &mut iter(&values), &mut iter(&values), 8, None);
        assert_eq!(stats.avg, 2.0);
        assert_eq!(stats.min_avg, 1.0);
        assert_eq!(stats.max_avg, 3.0);
        assert!(stats.cur.is_nan());
    }

    #[test]
    fn polyline_breaks_at_nan_gaps() {
        let values = [5.0, 5.0, f64::NAN, 5.0, 5.0];
        let mut canvas = Canvas::new(10, 12);
        canvas.rect(0, 0, 10, 12, 0xffffff);
        plot_gauge(
            &mut canvas,
            &mut iter(&values),
            0,
            0,
            10,
            10,
            0.0,
            10.0,
            0xff0000,
            false,
            1,
        );
        // No segment crosses the NaN column.
        for y in 0..12 {
            assert_eq!(canvas.get_pixel(2, y), 0xffffff, "row {y}");
        }
        // Both sides of the gap were drawn.
        let y = value_y(5.0, 0.0, 10.0, 10);
        assert_ne!(canvas.get_pixel(0, y), 0xffffff);
        assert_ne!(canvas.get_pixel(3, y), 0xffffff);
    }

    #[test]
    fn area_skips_non_positive_samples() {
        let values = [4.0, -1.0, f64::NAN, 2.0];
        let mut sums = vec![0.0f64; 4];
        let mut canvas = Canvas::new(4, 12);
        plot_area(
            &mut canvas,
            &mut iter(&values),
            &mut sums,
            0,
            0,
            4,
            10,
            0.0,
            10.0,
            0x00ff00,
        );
        assert_eq!(sums, vec![4.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn order_words_come_first_in_position_order() {
        let order = Some("system user nice");
        let mut names = vec!["idle", "nice", "user", "system"];
        names.sort_by(|a, b| curve_order(order, a, b));
        assert_eq!(names, vec!["system", "user", "nice", "idle"]);
    }

    #[test]
    fn value_mapping_spans_the_plot() {
        // The maximum lands on the top row, the minimum on the bottom.
        assert_eq!(value_y(10.0, 0.0, 10.0, 175), 0);
        assert_eq!(value_y(0.0, 0.0, 10.0, 175), 174);
    }
}
