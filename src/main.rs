/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Batch renderer entry point: load the config index, then fan the graphs
//! out over a worker pool sized to the machine.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use itertools::Itertools;
use log::{debug, info};
use rayon::prelude::*;
use rrdgraph::canvas::{FontRenderer, DEFAULT_FONT_PATH};
use rrdgraph::datafile::parse_datafile;
use rrdgraph::render::Renderer;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

const DEFAULT_DATAFILE: &str = "/var/lib/munin/datafile";
const DEFAULT_STATS_PATH: &str = "/var/lib/munin/munin-graph.stats";

#[derive(Parser, Debug)]
#[command(name = "rrdgraph", version, about = "Batch plotting of RRD data files.")]
struct CliArgs {
    /// Load graph information from FILE.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_DATAFILE)]
    data_file: PathBuf,

    /// Print debug messages.
    #[arg(short, long)]
    debug: bool,

    /// Redraw every single graph, even up-to-date ones.
    #[arg(short = 'n', long)]
    no_lazy: bool,
}

/// One line of the stats sink. The sink is the only cross-graph mutable
/// state, so workers send lines over a channel to a single writer.
enum StatLine {
    Graph {
        domain: String,
        host: String,
        name: String,
        seconds: f64,
    },
    Domain {
        domain: String,
        seconds: f64,
    },
    Total {
        seconds: f64,
    },
}

fn stats_writer(file: Option<std::fs::File>, lines: Receiver<StatLine>) {
    let Some(mut file) = file else {
        for _ in lines {}
        return;
    };
    for line in lines {
        let result = match line {
            StatLine::Graph {
                domain,
                host,
                name,
                seconds,
            } => writeln!(file, "GS|{domain}|{host}|{name}|{seconds:.3}"),
            StatLine::Domain { domain, seconds } => writeln!(file, "GD|{domain}|{seconds:.3}"),
            StatLine::Total { seconds } => writeln!(file, "GT|total|{seconds:.3}"),
        };
        if let Err(e) = result {
            debug!("cannot write stats line: {e}");
        }
    }
}

fn main() -> Result<()> {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version go to stdout with status 0; anything else
            // is usage on stderr and status 1.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.debug { "debug" } else { "info" }),
    )
    .init();

    let total_start = Instant::now();

    let content = std::fs::read_to_string(&args.data_file)
        .with_context(|| format!("Failed to open '{}' for reading", args.data_file.display()))?;
    let dataset = parse_datafile(&content)
        .with_context(|| format!("Cannot parse '{}'", args.data_file.display()))?;

    let font_path = std::env::var("RRDGRAPH_FONT")
        .unwrap_or_else(|_| DEFAULT_FONT_PATH.to_string());
    let font = FontRenderer::new(&font_path)?;

    let renderer = Renderer::new(dataset, font, !args.no_lazy);

    // Graphs are submitted sorted by domain, then name, so the stats
    // sink sees each domain as one contiguous run.
    let mut order: Vec<usize> = (0..renderer.dataset.graphs.len()).collect();
    order.sort_by(|&a, &b| {
        let ga = &renderer.dataset.graphs[a];
        let gb = &renderer.dataset.graphs[b];
        ga.domain.cmp(&gb.domain).then_with(|| ga.name.cmp(&gb.name))
    });

    let stats_file = match std::fs::File::create(DEFAULT_STATS_PATH) {
        Ok(file) => Some(file),
        Err(e) => {
            debug!("failed to open {DEFAULT_STATS_PATH} for writing: {e}");
            None
        }
    };
    let (stats, stat_lines) = crossbeam_channel::unbounded();
    let writer = std::thread::spawn(move || stats_writer(stats_file, stat_lines));

    let workers = num_cpus::get().max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("cannot build worker pool")?;
    info!(
        "rendering {} graphs on {} workers",
        order.len(),
        workers
    );

    let renderer = &renderer;
    for (domain, group) in &order
        .iter()
        .chunk_by(|&&gi| renderer.dataset.graphs[gi].domain.clone())
    {
        let graphs: Vec<usize> = group.copied().collect();
        let domain_start = Instant::now();

        let results: Vec<Result<()>> = pool.install(|| {
            graphs
                .par_iter()
                .map(|&gi| {
                    let graph_start = Instant::now();
                    let result = renderer.process_graph(gi);
                    let g = &renderer.dataset.graphs[gi];
                    let _ = stats.send(StatLine::Graph {
                        domain: g.domain.clone(),
                        host: g.host.clone(),
                        name: g.name.clone(),
                        seconds: graph_start.elapsed().as_secs_f64(),
                    });
                    result
                })
                .collect()
        });

        let _ = stats.send(StatLine::Domain {
            domain,
            seconds: domain_start.elapsed().as_secs_f64(),
        });

        // A fatal error stops the run, but only after every graph of the
        // domain already in flight has finished.
        for result in results {
            result?;
        }
    }

    let _ = stats.send(StatLine::Total {
        seconds: total_start.elapsed().as_secs_f64(),
    });
    drop(stats);
    let _ = writer.join();

    Ok(())
}
