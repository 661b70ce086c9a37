/*
 * SPDX-FileCopyrightText: 2023 Inria
 * SPDX-FileCopyrightText: 2023 Sebastiano Vigna
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Memory-mapped decoder for round-robin archive (RRD) files.
//!
//! An RRD file is a fixed-layout binary dump of the data structures of the
//! tool that produced it: a header, data-source and archive definitions,
//! scratch regions, the circular-buffer head pointers, and a flat array of
//! `f64` samples. The layout uses the native word size and alignment of an
//! LP64 host, which is also what this decoder expects.
//!
//! [`Rrd::parse`] validates the file and returns a view that borrows
//! directly from the mapping; samples are never copied. Archives are read
//! through [`RrdIterator`]s selecting one consolidation function and one
//! data-source column.

use mmap_rs::{Mmap, MmapFlags, MmapOptions};
use std::fmt;
use std::path::Path;
use thiserror::Error;

mod iter;
pub use iter::{ArchiveView, RrdIterator};

/// Magic bytes at the start of every archive.
const COOKIE: &[u8; 4] = b"RRD\0";
/// Value of the floating-point sanity field; anything else means the file
/// was produced on an incompatible host.
const FLOAT_COOKIE: f64 = 8.642135e130;

/// All fixed-size records carry ten 8-byte tagged-union parameters.
const PAR_SIZE: usize = 10 * 8;
/// Fixed strings are NUL-terminated within a 20-byte window.
const NAME_SIZE: usize = 20;

const HEADER_SIZE: usize = 128;
const DS_DEF_SIZE: usize = 2 * NAME_SIZE + PAR_SIZE;
const RRA_DEF_SIZE: usize = 24 + 16 + PAR_SIZE;
const PDP_PREP_SIZE: usize = 32 + PAR_SIZE;
const CDP_PREP_SIZE: usize = PAR_SIZE;

/// Errors returned by [`Rrd::parse`] and [`Rrd::iterator`].
///
/// A file that simply does not exist is *not* an error: [`Rrd::parse`]
/// reports it as `Ok(None)` so that callers can skip the curve.
#[derive(Error, Debug)]
pub enum RrdError {
    #[error("incorrect magic cookie")]
    BadCookie,
    #[error("unsupported RRD version {0}")]
    UnsupportedVersion(u32),
    #[error("floating point sanity test failed")]
    BadFloatCookie,
    #[error("zero PDP step")]
    ZeroStep,
    #[error("file length mismatch: computed {expected} bytes, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("missing NUL terminator in {section} definition string")]
    UnterminatedName { section: &'static str },
    #[error("no {cf} round robin archive with {interval} s resolution")]
    NoMatchingArchive { cf: Cf, interval: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Consolidation functions an archive may store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Cf {
    Average,
    Min,
    Max,
    Last,
}

impl Cf {
    /// The name stored in the archive's RRA definitions.
    pub fn name(self) -> &'static str {
        match self {
            Cf::Average => "AVERAGE",
            Cf::Min => "MIN",
            Cf::Max => "MAX",
            Cf::Last => "LAST",
        }
    }
}

impl fmt::Display for Cf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One data-source column declared by the archive.
#[derive(Clone, Debug)]
pub struct DsDef {
    /// Data-source name.
    pub name: String,
    /// Type tag (`GAUGE`, `DERIVE`, ...); opaque to the renderer.
    pub kind: String,
}

/// One round-robin archive: a circular buffer of consolidated data points.
#[derive(Clone, Debug)]
pub struct RraDef {
    /// Consolidation-function name as stored in the file.
    pub cf_name: String,
    /// Number of rows in the circular buffer.
    pub row_count: usize,
    /// Primary data points consolidated into each row.
    pub pdp_count: u64,
    /// Cumulative offset of this archive in the values array, in slots.
    base: usize,
}

/// A validated, read-only view of an archive file.
///
/// The struct owns the memory mapping and releases it on drop; every
/// accessor returning samples borrows from the mapping.
pub struct Rrd {
    mapping: Mapping,
    version: u32,
    ds_count: usize,
    pdp_step: u64,
    last_up: i64,
    last_up_usec: u64,
    ds_defs: Vec<DsDef>,
    rra_defs: Vec<RraDef>,
    rra_ptrs_start: usize,
    values_start: usize,
    value_count: usize,
}

impl fmt::Debug for Rrd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rrd")
            .field("version", &self.version)
            .field("ds_count", &self.ds_count)
            .field("rra_count", &self.rra_defs.len())
            .field("pdp_step", &self.pdp_step)
            .field("last_up", &self.last_up)
            .finish()
    }
}

impl Rrd {
    /// Parses the archive at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist; every other failure
    /// (short file, bad cookie, unsupported version, failed float-cookie
    /// check, missing NUL terminator, length mismatch) is an [`RrdError`].
    pub fn parse(path: impl AsRef<Path>) -> Result<Option<Rrd>, RrdError> {
        let file = match std::fs::File::open(path.as_ref()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file_len = file.metadata()?.len() as usize;
        let mapping = Mapping::map(&file, file_len)?;
        Self::decode(mapping).map(Some)
    }

    fn decode(mapping: Mapping) -> Result<Rrd, RrdError> {
        let data = mapping.as_bytes();
        if data.len() < HEADER_SIZE {
            return Err(RrdError::LengthMismatch {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        if &data[0..4] != COOKIE {
            return Err(RrdError::BadCookie);
        }

        // Four ASCII digits, e.g. "0003".
        let mut version = 0u32;
        for &digit in &data[4..8] {
            if !digit.is_ascii_digit() {
                return Err(RrdError::BadCookie);
            }
            version = version * 10 + (digit - b'0') as u32;
        }
        if !(1..=3).contains(&version) {
            return Err(RrdError::UnsupportedVersion(version));
        }

        if read_f64(data, 16) != FLOAT_COOKIE {
            return Err(RrdError::BadFloatCookie);
        }

        let ds_count = read_u64(data, 24) as usize;
        let rra_count = read_u64(data, 32) as usize;
        let pdp_step = read_u64(data, 40);
        if pdp_step == 0 {
            return Err(RrdError::ZeroStep);
        }

        let mut cursor = Layout::new(data.len(), HEADER_SIZE);

        let ds_start = cursor.take(ds_count, DS_DEF_SIZE)?;
        let rra_start = cursor.take(rra_count, RRA_DEF_SIZE)?;
        // Versions 1 and 2 store only the seconds of the live header.
        let live_start = cursor.take(1, if version >= 3 { 16 } else { 8 })?;
        let _pdp_start = cursor.take(ds_count, PDP_PREP_SIZE)?;
        let _cdp_start = cursor.take(ds_count.saturating_mul(rra_count), CDP_PREP_SIZE)?;
        let rra_ptrs_start = cursor.take(rra_count, 8)?;

        let mut ds_defs = Vec::with_capacity(ds_count);
        for i in 0..ds_count {
            let base = ds_start + i * DS_DEF_SIZE;
            ds_defs.push(DsDef {
                name: read_name(data, base, "data source")?,
                kind: read_name(data, base + NAME_SIZE, "data source")?,
            });
        }

        let mut rra_defs = Vec::with_capacity(rra_count);
        let mut value_count = 0usize;
        for i in 0..rra_count {
            let base = rra_start + i * RRA_DEF_SIZE;
            let row_count = read_u64(data, base + 24) as usize;
            rra_defs.push(RraDef {
                cf_name: read_name(data, base, "rr-archive")?,
                row_count,
                pdp_count: read_u64(data, base + 32),
                base: value_count,
            });
            value_count = row_count
                .checked_mul(ds_count)
                .and_then(|slots| value_count.checked_add(slots))
                .ok_or(RrdError::LengthMismatch {
                    expected: usize::MAX,
                    actual: data.len(),
                })?;
        }

        let values_start = cursor.take(value_count, 8)?;
        // The computed layout must account for the file exactly.
        if cursor.offset != data.len() {
            return Err(RrdError::LengthMismatch {
                expected: cursor.offset,
                actual: data.len(),
            });
        }

        let last_up = read_u64(data, live_start) as i64;
        let last_up_usec = if version >= 3 {
            read_u64(data, live_start + 8)
        } else {
            0
        };

        Ok(Rrd {
            mapping,
            version,
            ds_count,
            pdp_step,
            last_up,
            last_up_usec,
            ds_defs,
            rra_defs,
            rra_ptrs_start,
            values_start,
            value_count,
        })
    }

    /// Archive format version (1..=3).
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Number of data-source columns.
    pub fn ds_count(&self) -> usize {
        self.ds_count
    }

    /// Primary data point interval in seconds.
    pub fn pdp_step(&self) -> u64 {
        self.pdp_step
    }

    /// Seconds of the most recent update.
    pub fn last_up(&self) -> i64 {
        self.last_up
    }

    /// Sub-second part of the most recent update (zero before version 3).
    pub fn last_up_usec(&self) -> u64 {
        self.last_up_usec
    }

    /// Declared data sources.
    pub fn ds_defs(&self) -> &[DsDef] {
        &self.ds_defs
    }

    /// Declared round-robin archives.
    pub fn rra_defs(&self) -> &[RraDef] {
        &self.rra_defs
    }

    /// The whole values array, reinterpreted in place from the mapping.
    pub fn values(&self) -> &[f64] {
        let bytes = &self.mapping.as_bytes()[self.values_start..];
        // The values section starts at a multiple of 8 in a page-aligned
        // mapping, so the cast cannot misalign.
        unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const f64, self.value_count) }
    }

    /// Circular-buffer head index of archive `r`.
    fn rra_ptr(&self, r: usize) -> usize {
        read_u64(self.mapping.as_bytes(), self.rra_ptrs_start + r * 8) as usize
    }

    /// Returns an iterator over the samples of data source `0` in the
    /// archive whose consolidation function is `cf` and whose rows span
    /// `interval` seconds each.
    ///
    /// Logical row 0 is the oldest retained sample. When the archive holds
    /// more than `max_width` rows the cursor starts at `count - max_width`
    /// so that only the most recent `max_width` samples are emitted.
    pub fn iterator(
        &self,
        cf: Cf,
        interval: u64,
        max_width: usize,
    ) -> Result<RrdIterator<'_>, RrdError> {
        if self.ds_count == 0 {
            return Err(RrdError::NoMatchingArchive { cf, interval });
        }
        let pdp_count = interval / self.pdp_step;
        for (r, rra) in self.rra_defs.iter().enumerate() {
            if rra.pdp_count != pdp_count || rra.cf_name != cf.name() {
                continue;
            }
            let count = rra.row_count;
            let slots = count * self.ds_count;
            let values = &self.values()[rra.base..rra.base + slots];
            let first = if count == 0 {
                0
            } else {
                (self.rra_ptr(r) + 1) % count
            };
            return Ok(RrdIterator::archive(ArchiveView::new(
                values,
                0,
                self.ds_count,
                first,
                count,
            ), max_width));
        }
        Err(RrdError::NoMatchingArchive { cf, interval })
    }
}

/// Read-only mapping of a whole file, in the manner of a typed mmap helper:
/// the file is mapped once and dropped with the struct.
struct Mapping {
    mmap: Mmap,
    len: usize,
}

impl Mapping {
    fn map(file: &std::fs::File, len: usize) -> Result<Self, RrdError> {
        // A zero-length mapping is rejected by the kernel; map one page and
        // keep the logical length separate.
        let mmap = unsafe {
            MmapOptions::new(len.max(1))
                .map_err(other_io)?
                .with_flags(MmapFlags::empty())
                .with_file(file, 0)
                .map()
                .map_err(other_io)?
        };
        Ok(Mapping { mmap, len })
    }

    fn as_bytes(&self) -> &[u8] {
        // The mapping is page-padded; expose the file's bytes only.
        unsafe { std::slice::from_raw_parts(self.mmap.as_ptr(), self.len) }
    }
}

fn other_io(e: mmap_rs::Error) -> RrdError {
    RrdError::Io(std::io::Error::other(e))
}

/// Sequential section layout with overflow- and bounds-checked advances.
struct Layout {
    file_len: usize,
    offset: usize,
}

impl Layout {
    fn new(file_len: usize, offset: usize) -> Self {
        Layout { file_len, offset }
    }

    /// Reserves `count` records of `size` bytes, returning their start.
    fn take(&mut self, count: usize, size: usize) -> Result<usize, RrdError> {
        let start = self.offset;
        let end = count
            .checked_mul(size)
            .and_then(|len| start.checked_add(len))
            .filter(|&end| end <= self.file_len)
            .ok_or(RrdError::LengthMismatch {
                expected: start.saturating_add(count.saturating_mul(size)),
                actual: self.file_len,
            })?;
        self.offset = end;
        Ok(start)
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap())
}

fn read_f64(data: &[u8], offset: usize) -> f64 {
    f64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap())
}

/// Decodes a NUL-terminated string from a 20-byte window.
fn read_name(data: &[u8], offset: usize, section: &'static str) -> Result<String, RrdError> {
    let window = &data[offset..offset + NAME_SIZE];
    let len = window
        .iter()
        .position(|&b| b == 0)
        .ok_or(RrdError::UnterminatedName { section })?;
    Ok(String::from_utf8_lossy(&window[..len]).into_owned())
}
