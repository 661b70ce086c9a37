/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! The in-memory graph and curve model.
//!
//! The config-index parser fills a [`Dataset`] once; after that the table
//! is frozen and rendering workers only read it. Cross references between
//! curves (negative mirrors, CDEF operands, order aliases) are expressed
//! as indices into this arena and resolved at draw time, never as
//! pointers into growing vectors.

use std::fmt;
use thiserror::Error;

/// Default plot-area width in pixels.
pub const DEFAULT_WIDTH: usize = 400;
/// Default plot-area height in pixels.
pub const DEFAULT_HEIGHT: usize = 175;
/// Plot dimensions above this are refused outright.
pub const MAX_DIM: usize = 2048;

/// Version signature of the config index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexVersion {
    V1_2,
    V1_3,
}

impl IndexVersion {
    /// Character ending the host part of a hierarchical key.
    pub fn host_terminator(self) -> char {
        match self {
            IndexVersion::V1_2 => ':',
            IndexVersion::V1_3 => ';',
        }
    }

    /// Character separating graph, curve and field in keys, and graph
    /// from curve in `graph_order` aliases.
    pub fn graph_terminator(self) -> char {
        match self {
            IndexVersion::V1_2 => '.',
            IndexVersion::V1_3 => ';',
        }
    }
}

impl fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexVersion::V1_2 => "1.2",
            IndexVersion::V1_3 => "1.3",
        })
    }
}

/// How a curve is stroked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawStyle {
    Line1,
    /// The default when the index does not say.
    #[default]
    Line2,
    Line3,
    /// Filled columns, restarting the stacking accumulator.
    Area,
    /// Filled columns stacked on whatever was drawn below.
    Stack,
    AreaStack,
}

impl DrawStyle {
    /// Parses the `draw` field; unknown values fall back to the default.
    pub fn parse(value: &str) -> DrawStyle {
        if value.eq_ignore_ascii_case("line1") {
            DrawStyle::Line1
        } else if value.eq_ignore_ascii_case("line2") {
            DrawStyle::Line2
        } else if value.eq_ignore_ascii_case("line3") {
            DrawStyle::Line3
        } else if value.eq_ignore_ascii_case("area") {
            DrawStyle::Area
        } else if value.eq_ignore_ascii_case("stack") {
            DrawStyle::Stack
        } else if value.eq_ignore_ascii_case("areastack") {
            DrawStyle::AreaStack
        } else {
            log::debug!("unknown draw style '{value}', using the default");
            DrawStyle::default()
        }
    }

    /// Whether the curve is a line of some width.
    pub fn is_line(self) -> bool {
        matches!(self, DrawStyle::Line1 | DrawStyle::Line2 | DrawStyle::Line3)
    }

    /// Whether the curve participates in area stacking.
    pub fn is_area(self) -> bool {
        matches!(self, DrawStyle::Area | DrawStyle::Stack | DrawStyle::AreaStack)
    }
}

/// A malformed `type` field; the whole run gives up, as required for
/// unrecoverable config errors.
#[derive(Error, Debug)]
#[error("unknown curve type '{0}'")]
pub struct UnknownCurveType(pub String);

/// Maps the curve's data-source type to the one-letter suffix used in
/// archive file names.
pub fn type_suffix(kind: Option<&str>) -> Result<char, UnknownCurveType> {
    match kind {
        None => Ok('g'),
        Some(k) if k.eq_ignore_ascii_case("gauge") => Ok('g'),
        Some(k) if k.eq_ignore_ascii_case("derive") => Ok('d'),
        Some(k) if k.eq_ignore_ascii_case("counter") => Ok('c'),
        Some(k) if k.eq_ignore_ascii_case("absolute") => Ok('a'),
        Some(k) => Err(UnknownCurveType(k.to_string())),
    }
}

/// One data source of a graph.
#[derive(Clone, Debug, Default)]
pub struct Curve {
    /// Name, unique within the graph.
    pub name: String,
    pub label: Option<String>,
    pub draw: DrawStyle,
    /// Explicit color, `0xRRGGBB`; otherwise one is assigned from the
    /// palette at draw time.
    pub color: Option<u32>,
    /// Data-source type (`gauge`, `derive`, `counter`, `absolute`).
    pub kind: Option<String>,
    pub info: Option<String>,
    /// RPN expression deriving this curve from others.
    pub cdef: Option<String>,
    /// Name of the curve mirrored below the x axis.
    pub negative: Option<String>,
    /// Hidden from the plot (but still loaded, as others may reference it).
    pub nograph: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
}

/// One chart, identified by `(domain, host, name)`.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub domain: String,
    pub host: String,
    pub name: String,
    /// Graph name with dots turned into slashes, for PNG paths.
    pub png_name: String,
    /// Graph name with dots turned into dashes, for archive paths.
    pub rrd_name: String,

    pub title: Option<String>,
    pub vlabel: Option<String>,
    pub order: Option<String>,
    pub category: Option<String>,
    pub info: Option<String>,
    /// Substituted for `${graph_period}` in the vertical label.
    pub period: Option<String>,
    pub total: Option<String>,
    /// `graph_scale no`: print fixed decimals instead of k/M/G prefixes.
    pub noscale: bool,
    pub nograph: bool,
    /// Accepted from `graph_args`; this renderer draws linear axes only.
    pub logarithmic: bool,

    /// `--base` from `graph_args`; recorded, not interpreted.
    pub base: Option<i64>,
    pub lower_limit: Option<f64>,
    pub upper_limit: Option<f64>,

    pub width: Option<usize>,
    pub height: Option<usize>,

    pub curves: Vec<Curve>,
}

impl Graph {
    /// Plot-area width in pixels.
    pub fn plot_width(&self) -> usize {
        self.width.unwrap_or(DEFAULT_WIDTH)
    }

    /// Plot-area height in pixels.
    pub fn plot_height(&self) -> usize {
        self.height.unwrap_or(DEFAULT_HEIGHT)
    }

    /// Index of the curve called `name`, creating it if needed.
    pub fn curve_or_insert(&mut self, name: &str) -> usize {
        for (i, curve) in self.curves.iter().enumerate().rev() {
            if curve.name == name {
                return i;
            }
        }
        self.curves.push(Curve {
            name: name.to_string(),
            ..Curve::default()
        });
        self.curves.len() - 1
    }

    /// Finds a curve whose basename (the part after the last dot)
    /// matches `name`; CDEF operands and negative mirrors use this.
    pub fn find_curve(&self, name: &str) -> Option<usize> {
        self.curves.iter().position(|curve| {
            let basename = curve.name.rsplit('.').next().unwrap_or(&curve.name);
            basename == name
        })
    }
}

/// Directory roots declared by the config index.
#[derive(Clone, Debug)]
pub struct Paths {
    pub tmpldir: String,
    pub htmldir: String,
    pub dbdir: String,
    pub rundir: String,
    pub logdir: String,
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            tmpldir: "/etc/munin/templates".to_string(),
            htmldir: "/var/www/munin".to_string(),
            dbdir: "/var/lib/munin".to_string(),
            rundir: "/var/run/munin".to_string(),
            logdir: "/var/log/munin".to_string(),
        }
    }
}

/// The frozen graph table plus everything global the renderer needs.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub version: IndexVersion,
    pub paths: Paths,
    pub graphs: Vec<Graph>,
}

impl Dataset {
    pub fn new(version: IndexVersion) -> Self {
        Dataset {
            version,
            paths: Paths::default(),
            graphs: Vec::new(),
        }
    }

    /// Index of the graph `(domain, host, name)`, if present.
    pub fn find_graph(&self, domain: &str, host: &str, name: &str) -> Option<usize> {
        self.graphs
            .iter()
            .rposition(|g| g.domain == domain && g.host == host && g.name == name)
    }

    /// Index of the graph `(domain, host, name)`, creating it if needed.
    pub fn graph_or_insert(&mut self, domain: &str, host: &str, name: &str) -> usize {
        if let Some(i) = self.find_graph(domain, host, name) {
            return i;
        }
        self.graphs.push(Graph {
            domain: domain.to_string(),
            host: host.to_string(),
            name: name.to_string(),
            png_name: name.replace('.', "/"),
            rrd_name: name.replace('.', "-"),
            ..Graph::default()
        });
        self.graphs.len() - 1
    }
}

/// Finds `needle` in `haystack` as a whole word: preceded by nothing or
/// whitespace, followed by nothing, whitespace or `=`. Returns the byte
/// position of the match.
pub fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle).map(|p| p + from) {
        let before_ok = pos == 0 || bytes[pos - 1].is_ascii_whitespace();
        let after = pos + needle.len();
        let after_ok =
            after == bytes.len() || bytes[after] == b'=' || bytes[after].is_ascii_whitespace();
        if before_ok && after_ok {
            return Some(pos);
        }
        from = pos + 1;
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn graph_names_map_to_paths() {
        let mut dataset = Dataset::new(IndexVersion::V1_2);
        let g = dataset.graph_or_insert("dom", "host", "diskstats_latency.sda");
        assert_eq!(dataset.graphs[g].png_name, "diskstats_latency/sda");
        assert_eq!(dataset.graphs[g].rrd_name, "diskstats_latency-sda");
        // Same key resolves to the same slot.
        assert_eq!(
            dataset.graph_or_insert("dom", "host", "diskstats_latency.sda"),
            g
        );
        assert_eq!(dataset.graphs.len(), 1);
    }

    #[test]
    fn curve_lookup_uses_basenames() {
        let mut graph = Graph::default();
        graph.curve_or_insert("apps.postfix");
        graph.curve_or_insert("free");
        assert_eq!(graph.find_curve("postfix"), Some(0));
        assert_eq!(graph.find_curve("free"), Some(1));
        assert_eq!(graph.find_curve("apps"), None);
    }

    #[test]
    fn type_suffixes() {
        assert_eq!(type_suffix(None).unwrap(), 'g');
        assert_eq!(type_suffix(Some("GAUGE")).unwrap(), 'g');
        assert_eq!(type_suffix(Some("derive")).unwrap(), 'd');
        assert_eq!(type_suffix(Some("COUNTER")).unwrap(), 'c');
        assert_eq!(type_suffix(Some("absolute")).unwrap(), 'a');
        assert!(type_suffix(Some("bogus")).is_err());
    }

    #[test]
    fn word_search_respects_boundaries() {
        assert_eq!(find_word("up down up", "up"), Some(0));
        assert_eq!(find_word("cup up", "up"), Some(4));
        assert_eq!(find_word("total=g.c rest", "total"), Some(0));
        assert_eq!(find_word("subtotal", "total"), None);
        assert_eq!(find_word("", "x"), None);
    }
}
