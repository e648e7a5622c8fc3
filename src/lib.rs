//! # edfconv
//!
//! Transcoders that turn biosignal recordings into EDF, EDF+ and BDF+ files,
//! built on a small EDF/BDF reader and writer.
//!
//! | transcoder | source | target |
//! |---|---|---|
//! | [`transcode::depth`] | BDF / BDF+ (24 bit) | EDF / EDF+ (16 bit), optional high-pass filter and divider |
//! | [`transcode::legacy`] | BI9800 `.dcm` + `.evt` | EDF+ with the logged events |
//! | [`transcode::trigger`] | Biosemi BDF | BDF+ with annotations from the `Status` trigger lines |
//! | [`transcode::structured`] | Mortara ECG XML | EDF+ |
//!
//! Every transcoder reads the whole source, writes the whole target and
//! either succeeds or leaves no output file behind. A long conversion can be
//! stopped from another thread through a [`CancelToken`].
//!
//! ## Quick Start
//!
//! ### Converting a BDF recording to EDF
//!
//! ```rust
//! use edfconv::transcode::depth::{self, DepthOptions};
//! use edfconv::{CancelToken, EdfReader, FileType};
//! use edfconv::doctest_utils::BdfFixture;
//!
//! # fn main() -> edfconv::Result<()> {
//! BdfFixture {
//!     file_type: FileType::Bdf,
//!     labels: &["Fp1", "Fp2"],
//!     samples_per_record: 256,
//!     records: 4,
//!     annotations: &[],
//! }
//! .write("quickstart.bdf", |_, _, i| i as i32 * 1000)?;
//!
//! let options = DepthOptions { highpass: None, divider: 4.0, ..DepthOptions::default() };
//! let report = depth::convert("quickstart.bdf", "quickstart.edf", &options, &CancelToken::new())?;
//! assert_eq!(report.records_written, 4);
//!
//! let reader = EdfReader::open("quickstart.edf")?;
//! assert_eq!(reader.header().file_type, FileType::Edf);
//! // 物理范围随除数扩大
//! assert!(reader.header().signals[0].physical_max > 1000.0);
//! # std::fs::remove_file("quickstart.bdf").ok();
//! # std::fs::remove_file("quickstart.edf").ok();
//! # Ok(())
//! # }
//! ```
//!
//! ### Writing an EDF+ file
//!
//! ```rust
//! use edfconv::{EdfWriter, FileType};
//!
//! # fn main() -> edfconv::Result<()> {
//! let mut writer = EdfWriter::create("quickstart_writer.edf", FileType::EdfPlus, 1)?;
//! writer.set_label(0, "ECG")?;
//! writer.set_sample_frequency(0, 100)?;
//! writer.set_physical_maximum(0, 5.0)?;
//! writer.set_physical_minimum(0, -5.0)?;
//! writer.set_physical_dimension(0, "mV")?;
//!
//! for _ in 0..5 {
//!     writer.write_digital_record(&[0; 100])?;
//! }
//! writer.write_annotation(0, None, "Recording starts")?;
//! let summary = writer.close()?;
//! assert_eq!(summary.datarecords, 5);
//! # std::fs::remove_file("quickstart_writer.edf").ok();
//! # Ok(())
//! # }
//! ```
//!
//! ## Time units
//!
//! Onsets, durations and data record lengths are integers in units of
//! 100 ns, [`EDFLIB_TIME_DIMENSION`] per second.

pub mod error;
pub mod types;
pub mod utils;
pub mod header;
pub mod reader;
pub mod writer;
pub mod filter;
pub mod cancel;
pub mod config;
pub mod transcode;

#[doc(hidden)]
pub mod doctest_utils; // For doctests and integration tests

// Re-export main types for convenience
pub use error::{EdfError, ErrorCategory, Result};
pub use types::{Annotation, ChannelSpec, EdfHeader, FileType, SignalParam};
pub use reader::EdfReader;
pub use writer::{EdfWriter, WriteSummary};
pub use cancel::CancelToken;
pub use config::Config;
pub use transcode::ConversionReport;

// Important constants
pub const EDFLIB_TIME_DIMENSION: i64 = 10_000_000; // 100 nanoseconds unit
pub const EDFLIB_MAXSIGNALS: usize = 4096;

/// Library version
///
/// ```rust
/// let version = edfconv::version();
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
