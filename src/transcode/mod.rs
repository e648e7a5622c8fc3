//! The four transcoders
//!
//! Each submodule exposes a `convert` function taking an input path, an
//! output path, its options struct and a [`CancelToken`](crate::CancelToken).
//! A conversion either returns a [`ConversionReport`] with the output file
//! complete on disk, or an error with no output file left behind.

pub mod depth;
pub mod legacy;
pub mod structured;
pub mod trigger;

use std::path::Path;

use crate::error::{EdfError, Result};

/// What a finished conversion produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionReport {
    /// Records (or blocks) consumed from the source
    pub records_read: i64,
    pub records_written: i64,
    pub annotations_written: usize,
    /// Annotations that did not fit into the output's annotation signals
    pub annotations_dropped: usize,
    /// Factor the source record duration was divided by
    pub divisor: i64,
}

/// 输入和输出不能是同一个文件
pub(crate) fn check_distinct_paths(input: &Path, output: &Path) -> Result<()> {
    let same = match (input.canonicalize(), output.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => input == output,
    };
    if same {
        return Err(EdfError::InvalidArgument(
            "Input file and output file are the same".to_string(),
        ));
    }
    Ok(())
}
