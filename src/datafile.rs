/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Parser for the textual config index.
//!
//! The index is line-oriented: a `version MAJOR.MINOR.PATCH` signature,
//! then `KEY VALUE` pairs. A key is either global (`dbdir`, `htmldir`,
//! ...) or hierarchical, `domain;host:graph.curve.field` in version 1.2
//! and `domain;host;graph;curve;field` in 1.3. Unknown keys are logged
//! at debug level and ignored; a key line without its separators is a
//! fatal parse error with a line number.

use crate::model::{Dataset, DrawStyle, Graph, IndexVersion};
use log::debug;
use thiserror::Error;

/// Fatal syntax errors; the run aborts.
#[derive(Error, Debug)]
pub enum DatafileError {
    #[error("unsupported version signature at start of the index")]
    BadVersionSignature,
    #[error("unsupported version {major}.{minor}; only 1.2 and 1.3 are supported")]
    UnsupportedVersion { major: u32, minor: u32 },
    #[error("parse error at line {line}: did not find a SPACE character")]
    MissingSeparator { line: usize },
    #[error("parse error at line {line}: did not find a '{terminator}' character after host name")]
    MissingHostTerminator { line: usize, terminator: char },
}

/// Parses the whole index into a frozen [`Dataset`].
pub fn parse_datafile(content: &str) -> Result<Dataset, DatafileError> {
    let mut lines = content.lines().enumerate();
    let first = lines
        .next()
        .map(|(_, line)| line)
        .ok_or(DatafileError::BadVersionSignature)?;
    let version = parse_version_line(first)?;
    let mut dataset = Dataset::new(version);

    for (index, raw) in lines {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(' ')
            .ok_or(DatafileError::MissingSeparator { line: line_no })?;
        let value = value.trim_start();

        let Some((domain, rest)) = key.split_once(';') else {
            apply_global_key(&mut dataset, key, value, line_no);
            continue;
        };

        let host_terminator = version.host_terminator();
        let Some((host, graph_part)) = rest.split_once(host_terminator) else {
            return Err(DatafileError::MissingHostTerminator {
                line: line_no,
                terminator: host_terminator,
            });
        };

        let separator = version.graph_terminator();
        let Some((graph_and_curve, field)) = graph_part.rsplit_once(separator) else {
            // Host-level keys carry no graph part.
            match graph_part {
                "use_node_name" | "address" => {}
                _ => debug!("skipping unknown host key '{graph_part}' at line {line_no}"),
            }
            continue;
        };

        // Keys prefixed `graph_` configure the graph itself; anything else
        // names a curve as well when one more separator is present.
        let (graph_name, curve_name) = if field.starts_with("graph_") {
            (graph_and_curve, None)
        } else {
            match graph_and_curve.rsplit_once(separator) {
                Some((graph_name, curve_name)) => (graph_name, Some(curve_name)),
                None => (graph_and_curve, None),
            }
        };

        let gi = dataset.graph_or_insert(domain, host, graph_name);
        let graph = &mut dataset.graphs[gi];
        match curve_name {
            Some(curve_name) => {
                let ci = graph.curve_or_insert(curve_name);
                apply_curve_key(&mut graph.curves[ci], field, value, line_no);
            }
            None => apply_graph_key(graph, field, value, line_no),
        }
    }

    Ok(dataset)
}

fn parse_version_line(line: &str) -> Result<IndexVersion, DatafileError> {
    let rest = line
        .trim()
        .strip_prefix("version ")
        .ok_or(DatafileError::BadVersionSignature)?;
    let mut parts = rest.trim().split('.');
    let mut next = || -> Result<u32, DatafileError> {
        parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(DatafileError::BadVersionSignature)
    };
    let (major, minor, _patch) = (next()?, next()?, next()?);
    match (major, minor) {
        (1, 2) => Ok(IndexVersion::V1_2),
        (1, 3) => Ok(IndexVersion::V1_3),
        _ => Err(DatafileError::UnsupportedVersion { major, minor }),
    }
}

fn apply_global_key(dataset: &mut Dataset, key: &str, value: &str, line_no: usize) {
    match key {
        "tmpldir" => dataset.paths.tmpldir = value.to_string(),
        "htmldir" => dataset.paths.htmldir = value.to_string(),
        "dbdir" => dataset.paths.dbdir = value.to_string(),
        "rundir" => dataset.paths.rundir = value.to_string(),
        "logdir" => dataset.paths.logdir = value.to_string(),
        _ => debug!("skipping unknown global key '{key}' at line {line_no}"),
    }
}

fn apply_graph_key(graph: &mut Graph, key: &str, value: &str, line_no: usize) {
    match key {
        "graph" => graph.nograph = value.eq_ignore_ascii_case("no"),
        "graph_args" => apply_graph_args(graph, value, line_no),
        "graph_vlabel" => graph.vlabel = Some(value.to_string()),
        "graph_title" => graph.title = Some(value.to_string()),
        "graph_order" => graph.order = Some(value.to_string()),
        "graph_category" => graph.category = Some(value.to_string()),
        "graph_info" => graph.info = Some(value.to_string()),
        "graph_scale" => graph.noscale = value.eq_ignore_ascii_case("no"),
        "graph_height" => graph.height = parse_dimension(value),
        "graph_width" => graph.width = parse_dimension(value),
        "graph_period" => graph.period = Some(value.to_string()),
        "graph_total" => graph.total = Some(value.to_string()),
        "graph_data_size" => {}
        _ => debug!("skipping unknown graph key '{key}' at line {line_no}"),
    }
}

fn apply_curve_key(curve: &mut crate::model::Curve, key: &str, value: &str, line_no: usize) {
    match key {
        "label" => curve.label = Some(value.to_string()),
        "draw" => curve.draw = DrawStyle::parse(value),
        "color" | "colour" => curve.color = Some(parse_hex(value)),
        "graph" => curve.nograph = value.eq_ignore_ascii_case("no"),
        "skipdraw" => curve.nograph = parse_i64_prefix(value) != 0,
        "type" => curve.kind = Some(value.to_string()),
        "info" => curve.info = Some(value.to_string()),
        "cdef" => curve.cdef = Some(value.to_string()),
        "negative" => curve.negative = Some(value.to_string()),
        "max" => curve.max = Some(parse_f64_prefix(value)),
        "min" => curve.min = Some(parse_f64_prefix(value)),
        "warning" | "warn" => curve.warning = Some(parse_f64_prefix(value)),
        "critical" => curve.critical = Some(parse_f64_prefix(value)),
        "update_rate" => {}
        _ => debug!("skipping unknown data source key '{key}' at line {line_no}"),
    }
}

/// Scans `graph_args` for the handful of rrdtool options the renderer
/// honors. `--vertical-label` is consumed together with its argument so
/// its value is not mistaken for an option.
fn apply_graph_args(graph: &mut Graph, args: &str, line_no: usize) {
    let mut words = args.split_whitespace();
    while let Some(key) = words.next() {
        let takes_value = matches!(
            key,
            "--base" | "-l" | "--lower-limit" | "--upper-limit" | "--vertical-label"
        );
        let value = if takes_value {
            match words.next() {
                Some(value) => value,
                None => {
                    debug!("missing argument for graph arg '{key}' at line {line_no}");
                    continue;
                }
            }
        } else {
            ""
        };
        match key {
            "--base" => graph.base = Some(parse_i64_prefix(value)),
            "-l" | "--lower-limit" => graph.lower_limit = Some(parse_f64_prefix(value)),
            "--upper-limit" => graph.upper_limit = Some(parse_f64_prefix(value)),
            "--logarithmic" => graph.logarithmic = true,
            _ => {}
        }
    }
}

fn parse_dimension(value: &str) -> Option<usize> {
    match parse_i64_prefix(value) {
        v if v > 0 => Some(v as usize),
        _ => None,
    }
}

/// Longest-prefix numeric parse, like `strtod`: `"100:200"` yields 100.
fn parse_f64_prefix(value: &str) -> f64 {
    let value = value.trim_start();
    for end in (1..=value.len()).rev() {
        if !value.is_char_boundary(end) {
            continue;
        }
        if let Ok(v) = value[..end].parse() {
            return v;
        }
    }
    0.0
}

/// Longest-prefix integer parse, like `atoi`.
fn parse_i64_prefix(value: &str) -> i64 {
    let value = value.trim_start();
    for end in (1..=value.len()).rev() {
        if !value.is_char_boundary(end) {
            continue;
        }
        if let Ok(v) = value[..end].parse() {
            return v;
        }
    }
    0
}

/// Hex color parse; garbage becomes black, as with `strtol`.
fn parse_hex(value: &str) -> u32 {
    let value = value.trim_start().trim_start_matches('#');
    let end = value
        .bytes()
        .position(|b| !b.is_ascii_hexdigit())
        .unwrap_or(value.len());
    u32::from_str_radix(&value[..end], 16).unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    const INDEX_1_3: &str = "\
version 1.3.2
htmldir /srv/www/munin
dbdir /srv/lib/munin

example.com;web01;load;graph_title Load average
example.com;web01;load;graph_vlabel load
example.com;web01;load;graph_args --base 1000 -l 0 --upper-limit 10 --vertical-label ignored
example.com;web01;load;load;label load
example.com;web01;load;load;type GAUGE
example.com;web01;load;load;warning 10
example.com;web01;load;load;critical 120
example.com;web01;if_eth0;down;graph no
example.com;web01;if_eth0;down;colour 00cc00
example.com;web01;if_eth0;up;negative down
example.com;web01;if_eth0;up;draw AREA
example.com;web01;if_eth0;up;cdef up,8,*
example.com;web01;use_node_name yes
";

    #[test]
    fn parses_a_1_3_index() {
        let dataset = parse_datafile(INDEX_1_3).unwrap();
        assert_eq!(dataset.version, IndexVersion::V1_3);
        assert_eq!(dataset.paths.htmldir, "/srv/www/munin");
        assert_eq!(dataset.paths.dbdir, "/srv/lib/munin");
        assert_eq!(dataset.graphs.len(), 2);

        let load = &dataset.graphs[0];
        assert_eq!(
            (load.domain.as_str(), load.host.as_str(), load.name.as_str()),
            ("example.com", "web01", "load")
        );
        assert_eq!(load.title.as_deref(), Some("Load average"));
        assert_eq!(load.base, Some(1000));
        assert_eq!(load.lower_limit, Some(0.0));
        assert_eq!(load.upper_limit, Some(10.0));
        let c = &load.curves[0];
        assert_eq!(c.name, "load");
        assert_eq!(c.kind.as_deref(), Some("GAUGE"));
        assert_eq!(c.warning, Some(10.0));
        assert_eq!(c.critical, Some(120.0));

        let eth = &dataset.graphs[1];
        assert_eq!(eth.curves.len(), 2);
        let down = &eth.curves[0];
        assert!(down.nograph);
        assert_eq!(down.color, Some(0x00cc00));
        let up = &eth.curves[1];
        assert_eq!(up.negative.as_deref(), Some("down"));
        assert_eq!(up.draw, DrawStyle::Area);
        assert_eq!(up.cdef.as_deref(), Some("up,8,*"));
    }

    #[test]
    fn parses_a_1_2_index_with_dotted_names() {
        let index = "\
version 1.2.6
dom;host:diskstats_latency.sda.avgwait.label sda
dom;host:diskstats_latency.sda.graph_title Latency
";
        let dataset = parse_datafile(index).unwrap();
        assert_eq!(dataset.version, IndexVersion::V1_2);
        assert_eq!(dataset.graphs.len(), 1);
        let g = &dataset.graphs[0];
        assert_eq!(g.name, "diskstats_latency.sda");
        assert_eq!(g.rrd_name, "diskstats_latency-sda");
        assert_eq!(g.png_name, "diskstats_latency/sda");
        assert_eq!(g.title.as_deref(), Some("Latency"));
        assert_eq!(g.curves.len(), 1);
        assert_eq!(g.curves[0].name, "avgwait");
    }

    #[test]
    fn rejects_bad_signatures_and_versions() {
        assert!(matches!(
            parse_datafile("hello\n"),
            Err(DatafileError::BadVersionSignature)
        ));
        assert!(matches!(
            parse_datafile("version 2.0.0\n"),
            Err(DatafileError::UnsupportedVersion { major: 2, minor: 0 })
        ));
    }

    #[test]
    fn missing_separators_are_fatal_with_line_numbers() {
        assert!(matches!(
            parse_datafile("version 1.3.0\nok value\nbroken-key-without-space\n"),
            Err(DatafileError::MissingSeparator { line: 3 })
        ));
        assert!(matches!(
            parse_datafile("version 1.2.0\ndom;hostonly value\n"),
            Err(DatafileError::MissingHostTerminator { line: 2, terminator: ':' })
        ));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let index = "\
version 1.3.0
frobnicate whatever
dom;host;g;graph_mystery 1
dom;host;g;c;mystery 2
dom;host;mystery_host_key 3
";
        let dataset = parse_datafile(index).unwrap();
        assert_eq!(dataset.graphs.len(), 1);
        assert_eq!(dataset.graphs[0].curves.len(), 1);
    }

    #[test]
    fn numeric_prefix_parses() {
        assert_eq!(parse_f64_prefix("100:200"), 100.0);
        assert_eq!(parse_f64_prefix("1.5e3garbage"), 1500.0);
        assert_eq!(parse_f64_prefix("nope"), 0.0);
        assert_eq!(parse_i64_prefix("42abc"), 42);
        assert_eq!(parse_hex("00aaff"), 0x00aaff);
        assert_eq!(parse_hex("#ff0000"), 0xff0000);
        assert_eq!(parse_hex("zzz"), 0);
    }
}
