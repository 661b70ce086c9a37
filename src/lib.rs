/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]

pub mod canvas;
pub mod cdef;
pub mod datafile;
pub mod model;
pub mod render;
pub mod rrd;

/// Prelude module to import everything from this crate
pub mod prelude {
    pub use crate::canvas::*;
    pub use crate::cdef::*;
    pub use crate::datafile::*;
    pub use crate::model::*;
    pub use crate::render::*;
    pub use crate::rrd::*;
}
