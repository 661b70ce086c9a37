/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Value and time grids behind the plot.

use super::scale::{self, LINE_HEIGHT};
use crate::canvas::{Canvas, FontRenderer, Orientation};
use jiff::tz::TimeZone;
use jiff::Timestamp;

/// Half-blended shade of the ordinary grid lines.
const GRID_COLOR: u32 = 0xaaaaaa;
/// Half-blended shade of the time-label lines.
const LABEL_LINE_COLOR: u32 = 0xaa8888;

/// One row of the time-axis selection table.
pub(crate) struct TimeAxis {
    /// Label format, `strftime` style.
    pub(crate) format: &'static str,
    /// Subtracted before boundary division; aligns weeks on Monday.
    pub(crate) bias: i64,
    /// Seconds between labeled lines; `None` follows month boundaries.
    pub(crate) label_interval: Option<i64>,
    /// Seconds between unlabeled bar lines (0 disables them).
    pub(crate) bar_interval: i64,
}

pub(crate) const TIME_AXES: [TimeAxis; 4] = [
    TimeAxis {
        format: "%a %H:%M",
        bias: 0,
        label_interval: Some(43200),
        bar_interval: 3600,
    },
    TimeAxis {
        format: "%d",
        bias: 0,
        label_interval: Some(86400),
        bar_interval: 21600,
    },
    TimeAxis {
        format: "Week %V",
        bias: 345600,
        label_interval: Some(86400 * 7),
        bar_interval: 86400,
    },
    TimeAxis {
        format: "%b",
        bias: 0,
        label_interval: None,
        bar_interval: 0,
    },
];

/// Picks the densest time axis whose bar spacing stays above ten samples.
pub(crate) fn pick_time_axis(interval: i64) -> &'static TimeAxis {
    for axis in &TIME_AXES[..TIME_AXES.len() - 1] {
        if axis.bar_interval > interval * 10 {
            return axis;
        }
    }
    &TIME_AXES[TIME_AXES.len() - 1]
}

/// Tick values for the value axis: every multiple of `step` inside
/// `[global_min, global_max]`.
pub(crate) fn value_ticks(global_min: f64, global_max: f64, step: f64) -> Vec<f64> {
    let first = (global_min / step).ceil() as i64;
    let last = (global_max / step).floor() as i64;
    (first..=last).map(|j| j as f64 * step).collect()
}

fn format_time(seconds: i64, zone: TimeZone, format: &str) -> Option<String> {
    let ts = Timestamp::from_second(seconds).ok()?;
    jiff::fmt::strtime::format(format, &ts.to_zoned(zone)).ok()
}

/// Draws the value grid, the time grid and their labels, plus the
/// "Last update" line at the canvas bottom. Grid pixels are half-blended
/// so they stay visible over filled areas.
#[allow(clippy::too_many_arguments)]
pub(crate) fn draw_grid(
    canvas: &mut Canvas,
    font: &FontRenderer,
    noscale: bool,
    last_update: i64,
    interval: i64,
    global_min: f64,
    global_max: f64,
    graph_x: i64,
    graph_y: i64,
    graph_width: i64,
    graph_height: i64,
) {
    let axis = pick_time_axis(interval);
    let range = global_max - global_min;
    let step = scale::step_size(range, graph_height as usize);

    let format = if noscale {
        scale::NumberFormat {
            decimals: scale::step_decimals(step),
            suffix: String::new(),
            scale: 1.0,
        }
    } else {
        scale::format_args(global_max.abs().max(global_min.abs()), Some(step))
    };

    for tick in value_ticks(global_min, global_max, step) {
        let y = (graph_height as f64 - (tick - global_min) * (graph_height - 1) as f64 / range)
            as i64
            - 1;
        font.draw(
            canvas,
            graph_x - 5,
            graph_y + y + 7,
            &format.apply(tick),
            Orientation::Right,
            0,
        );
        if tick != 0.0 {
            let mut x = 0;
            while x < graph_width {
                canvas.pixel_50(graph_x + x, graph_y + y, GRID_COLOR);
                x += 2;
            }
        }
    }

    // Walk the columns from the most recent sample backwards, drawing a
    // line wherever the column pair straddles a boundary.
    let zone = TimeZone::system();
    let utc_bias = match Timestamp::from_second(last_update) {
        Ok(ts) => zone.to_offset(ts).seconds() as i64,
        Err(_) => 0,
    };
    let mut t = last_update + utc_bias;
    let mut prev_t = t + interval;

    for j in 0..graph_width {
        let x = graph_x + graph_width - j;
        match axis.label_interval {
            Some(label_interval) => {
                if (prev_t - axis.bias) / label_interval != (t - axis.bias) / label_interval {
                    for y in 0..graph_height {
                        canvas.pixel_50(x, graph_y + y, LABEL_LINE_COLOR);
                    }
                    if let Some(label) = format_time(prev_t, TimeZone::UTC, axis.format) {
                        font.draw(
                            canvas,
                            x,
                            graph_y + graph_height + LINE_HEIGHT,
                            &label,
                            Orientation::Centered,
                            0,
                        );
                    }
                } else if axis.bar_interval != 0
                    && prev_t / axis.bar_interval != t / axis.bar_interval
                {
                    let mut y = 0;
                    while y < graph_height {
                        canvas.pixel_50(x, graph_y + y, GRID_COLOR);
                        y += 2;
                    }
                }
            }
            None => {
                let prev_month = Timestamp::from_second(prev_t)
                    .map(|ts| ts.to_zoned(TimeZone::UTC).month())
                    .unwrap_or(0);
                let month = Timestamp::from_second(t)
                    .map(|ts| ts.to_zoned(TimeZone::UTC).month())
                    .unwrap_or(0);
                if prev_month != month {
                    for y in 0..graph_height {
                        canvas.pixel_50(x, graph_y + y, LABEL_LINE_COLOR);
                    }
                    if let Some(label) = format_time(prev_t, TimeZone::UTC, axis.format) {
                        font.draw(
                            canvas,
                            x,
                            graph_y + graph_height + LINE_HEIGHT,
                            &label,
                            Orientation::Centered,
                            0,
                        );
                    }
                }
            }
        }
        prev_t = t;
        t -= interval;
    }

    if let Some(label) = format_time(
        last_update,
        zone,
        "Last update: %Y-%m-%d %H:%M:%S %Z",
    ) {
        font.draw(
            canvas,
            canvas.width() as i64 - 5,
            canvas.height() as i64 - 3,
            &label,
            Orientation::Right,
            0,
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn axis_selection_per_interval() {
        // 300 s samples: hourly bars, weekday+hour labels.
        assert_eq!(pick_time_axis(300).format, "%a %H:%M");
        // 1800 s samples: six-hour bars, day-of-month labels.
        assert_eq!(pick_time_axis(1800).format, "%d");
        // 7200 s samples: daily bars, ISO-week labels.
        assert_eq!(pick_time_axis(7200).format, "Week %V");
        // 86400 s samples: month labels.
        assert_eq!(pick_time_axis(86400).format, "%b");
    }

    #[test]
    fn ticks_stay_inside_the_range_and_step_evenly() {
        for (min, max) in [(0.0, 100.0), (-55.0, 42.0), (3.0, 17.0), (-1.0, 1.0)] {
            let step = scale::step_size(max - min, 175);
            let ticks = value_ticks(min, max, step);
            assert!(!ticks.is_empty());
            for t in &ticks {
                assert!(*t >= min - 1e-9, "tick {t} below {min}");
                assert!(*t <= max + 1e-9, "tick {t} above {max}");
            }
            for pair in ticks.windows(2) {
                assert!((pair[1] - pair[0] - step).abs() < 1e-9 * step.abs().max(1.0));
            }
        }
    }

    #[test]
    fn week_bias_aligns_boundaries_to_monday() {
        // 1970-01-01 was a Thursday; four days of bias lands the weekly
        // boundary on Monday 00:00.
        let bias = TIME_AXES[2].bias;
        let week = TIME_AXES[2].label_interval.unwrap();
        // 2024-01-01 00:00 UTC, a Monday.
        let monday = 1_704_067_200i64;
        assert_ne!((monday - 1 - bias) / week, (monday - bias) / week);
    }
}
