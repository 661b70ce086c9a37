/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Axis step selection and engineering-prefix number formatting.

/// Vertical pitch of text rows on the canvas.
pub const LINE_HEIGHT: i64 = 14;

const BIG_SUFFIXES: [&str; 8] = ["k", "M", "G", "T", "P", "E", "Z", "Y"];
const SMALL_SUFFIXES: [&str; 8] = ["m", "µ", "n", "p", "f", "a", "z", "y"];

/// Chooses the value-axis tick step for a range displayed over
/// `graph_height` pixels.
///
/// The step is the smallest `factor × 10^⌊log10(min_step)⌋` with `factor`
/// in {1, 2, 5} that is at least `min_step`, the range divided by one
/// label row per 14 pixels; if no factor suffices the next power of ten
/// is used.
pub fn step_size(range: f64, graph_height: usize) -> f64 {
    let min_step = range / (graph_height as f64 / LINE_HEIGHT as f64);
    let mag = 10.0f64.powf(min_step.log10().floor());
    for factor in [1.0, 2.0, 5.0] {
        if mag * factor >= min_step {
            return mag * factor;
        }
    }
    mag * 10.0
}

/// How to print numbers that share a scale reference.
#[derive(Clone, Debug, PartialEq)]
pub struct NumberFormat {
    pub decimals: usize,
    pub suffix: String,
    /// Multiply a value by this before printing.
    pub scale: f64,
}

impl NumberFormat {
    /// Renders one value with this format.
    pub fn apply(&self, value: f64) -> String {
        format!("{:.*}{}", self.decimals, value * self.scale, self.suffix)
    }
}

/// Picks the engineering prefix, scale factor and decimal count for
/// numbers in the magnitude of `reference`.
///
/// With a `step` (the axis tick step) the decimal count is derived from
/// the scaled step so adjacent labels stay distinct; without one it is
/// derived from the reference's position within its decade.
pub fn format_args(reference: f64, step: Option<f64>) -> NumberFormat {
    let mut format = if reference == 0.0 {
        NumberFormat {
            decimals: 0,
            suffix: String::new(),
            scale: 1.0,
        }
    } else if reference.abs() < 1.0 {
        let mut mag = (-(reference.abs().log10() + 1.0).floor()) as i64;
        let decimals = (mag % 3) as usize;
        mag /= 3;
        let suffix = match SMALL_SUFFIXES.get(mag as usize) {
            Some(s) => s.to_string(),
            None => format!("E-{}", (mag + 1) * 3),
        };
        NumberFormat {
            decimals,
            suffix,
            scale: 1000.0f64.powi(mag as i32 + 1),
        }
    } else {
        let mut mag = reference.abs().log10().floor() as i64;
        let rad = (mag % 3) as usize;
        mag /= 3;
        if mag == 0 {
            NumberFormat {
                decimals: 2 - rad,
                suffix: String::new(),
                scale: 1.0,
            }
        } else {
            let suffix = match BIG_SUFFIXES.get(mag as usize - 1) {
                Some(s) => s.to_string(),
                None => format!("E+{}", mag * 3),
            };
            NumberFormat {
                decimals: 2 - rad,
                suffix,
                scale: 1000.0f64.powi(-mag as i32),
            }
        }
    };

    if let Some(step) = step {
        format.decimals = step_decimals(step * format.scale);
    }
    format
}

/// Decimal places needed to tell ticks `step` apart.
pub fn step_decimals(step: f64) -> usize {
    if step < 0.01 {
        3
    } else if step < 0.1 {
        2
    } else if step < 1.0 {
        1
    } else {
        0
    }
}

/// Formats `value` using the prefix of `reference`; NaN prints as "nan".
pub fn format_number(value: f64, reference: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    format_args(reference, None).apply(value)
}

/// Formats a mirrored pair as "neg/pos", each in its own scale.
pub fn format_pair(neg: f64, pos: f64) -> String {
    format!("{}/{}", format_number(neg, neg), format_number(pos, pos))
}
