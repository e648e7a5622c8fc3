//! BI9800 holter recordings (`.dcm` data + `.evt` header and event log) to EDF+
//!
//! The `.dcm` file is a sequence of one-second blocks, three channels of
//! 8-bit samples interleaved per sample point. The `.evt` companion starts
//! with `key=value` header lines followed by `HH:MM:SS text` event lines.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::cancel::{CancelToken, ProgressCadence};
use crate::error::{EdfError, Result};
use crate::transcode::{check_distinct_paths, ConversionReport};
use crate::types::FileType;
use crate::utils::{atoi_nonlocalized, fixed_digits};
use crate::writer::EdfWriter;
use crate::EDFLIB_TIME_DIMENSION;

pub const CHANNELS: usize = 3;

const SAMPLE_RATES: [u32; 4] = [128, 256, 512, 1024];
const MODEL_NUMBERS: [&str; 2] = ["TM SD01G", "SD SD02G"];
const RECORD_HOURS: [u32; 2] = [24, 48];

const PHYSICAL_MAX: f64 = 2442.307692;
const PHYSICAL_MIN: f64 = -2461.538462;

/// Event text starts at this column of a log line
const EVENT_TEXT_COLUMN: usize = 9;

#[derive(Debug, Clone, PartialEq)]
pub struct LegacyOptions {
    pub patient_name: String,
    /// Log lines are cut at this many bytes
    pub max_line_length: usize,
}

impl Default for LegacyOptions {
    fn default() -> Self {
        LegacyOptions {
            patient_name: "BI9800".to_string(),
            max_line_length: 256,
        }
    }
}

/// Header of a BI9800 recording, read from the `.evt` file
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyHeader {
    pub sample_rate: u32,
    pub model: String,
    pub start: NaiveDateTime,
    pub record_hours: u32,
}

impl LegacyHeader {
    /// Bytes in one one-second block
    pub fn block_size(&self) -> usize {
        CHANNELS * self.sample_rate as usize
    }
}

/// Parses and validates the header lines
///
/// ```rust
/// use edfconv::transcode::legacy::parse_event_header;
///
/// let lines = [
///     "Sampling Rate=256",
///     "Model number=TM SD01G",
///     "Record Date=2004-06-21",
///     "Record Time=08:15:00",
///     "Record Hours=24",
/// ].map(String::from);
/// let header = parse_event_header(&lines)?;
/// assert_eq!(header.block_size(), 768);
/// # Ok::<(), edfconv::EdfError>(())
/// ```
pub fn parse_event_header(lines: &[String]) -> Result<LegacyHeader> {
    let mut sample_rate = None;
    let mut model = None;
    let mut date = None;
    let mut time = None;
    let mut record_hours = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("Sampling Rate=") {
            let rate = atoi_nonlocalized(value);
            if !SAMPLE_RATES.iter().any(|&r| r as i32 == rate) {
                return Err(EdfError::InvalidSource(format!("Unknown sample rate {}", value.trim())));
            }
            sample_rate = Some(rate as u32);
        } else if let Some(value) = line.strip_prefix("Model number=") {
            let number: String = value.chars().take(8).collect();
            if !MODEL_NUMBERS.contains(&number.as_str()) {
                return Err(EdfError::InvalidSource(format!("Unknown model number {}", number)));
            }
            model = Some(number);
        } else if let Some(value) = line.strip_prefix("Record Date=") {
            date = Some(parse_record_date(value.as_bytes())?);
        } else if let Some(value) = line.strip_prefix("Record Time=") {
            let (h, m, s) = parse_clock(value.as_bytes())
                .ok_or_else(|| EdfError::InvalidSource(format!("Invalid record time {}", value.trim())))?;
            time = NaiveTime::from_hms_opt(h, m, s);
        } else if let Some(value) = line.strip_prefix("Record Hours=") {
            let hours = fixed_digits(value.as_bytes(), 0, 2)
                .filter(|h| RECORD_HOURS.contains(h))
                .ok_or_else(|| EdfError::InvalidSource(format!("Invalid record hours {}", value.trim())))?;
            record_hours = Some(hours);
        }
    }

    let missing = |name: &str| EdfError::InvalidSource(format!("Missing line \"{}=\" in event file", name));
    let sample_rate = sample_rate.ok_or_else(|| missing("Sampling Rate"))?;
    let model = model.ok_or_else(|| missing("Model number"))?;
    let date = date.ok_or_else(|| missing("Record Date"))?;
    let time = time.ok_or_else(|| missing("Record Time"))?;
    let record_hours = record_hours.ok_or_else(|| missing("Record Hours"))?;

    Ok(LegacyHeader {
        sample_rate,
        model,
        start: date.and_time(time),
        record_hours,
    })
}

/// `YYYY-MM-DD`, year 1970 - 3000
fn parse_record_date(value: &[u8]) -> Result<NaiveDate> {
    let invalid = || EdfError::InvalidSource(format!(
        "Invalid record date {}", String::from_utf8_lossy(value).trim()
    ));
    let year = fixed_digits(value, 0, 4).ok_or_else(invalid)?;
    let month = fixed_digits(value, 5, 2).ok_or_else(invalid)?;
    let day = fixed_digits(value, 8, 2).ok_or_else(invalid)?;
    if !(1970..=3000).contains(&year) {
        return Err(invalid());
    }
    NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(invalid)
}

/// `HH:MM:SS` at fixed columns, `None` unless every field is two digits in range
fn parse_clock(value: &[u8]) -> Option<(u32, u32, u32)> {
    let hour = fixed_digits(value, 0, 2)?;
    let minute = fixed_digits(value, 3, 2)?;
    let second = fixed_digits(value, 6, 2)?;
    (hour <= 23 && minute <= 59 && second <= 59).then_some((hour, minute, second))
}

/// Splits the event file into lines
///
/// A line ends at `\n` or `\r`; a line longer than `max_len` bytes continues
/// as the next line.
pub fn event_lines(content: &[u8], max_len: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = Vec::with_capacity(max_len);
    for &byte in content {
        if byte == b'\n' || byte == b'\r' {
            lines.push(String::from_utf8_lossy(&line).into_owned());
            line.clear();
            continue;
        }
        line.push(byte);
        if line.len() == max_len {
            lines.push(String::from_utf8_lossy(&line).into_owned());
            line.clear();
        }
    }
    if !line.is_empty() {
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    lines
}

/// An event line `HH:MM:SS text`: time of day in seconds and the text
///
/// Header lines, lines with a malformed time and lines without text give `None`.
pub fn parse_event_line(line: &str) -> Option<(u32, &str)> {
    let (hour, minute, second) = parse_clock(line.as_bytes())?;
    let text = line.get(EVENT_TEXT_COLUMN..)?;
    if text.is_empty() {
        return None;
    }
    Some((hour * 3600 + minute * 60 + second, text))
}

/// Onset in 100 ns units of an event `elapsed_samples` after the recording start
///
/// ```rust
/// use edfconv::transcode::legacy::event_onset;
///
/// // 100 samples at 256 Hz
/// assert_eq!(event_onset(100, 256), 3_906_250);
/// ```
pub fn event_onset(elapsed_samples: i64, sample_rate: u32) -> i64 {
    elapsed_samples * EDFLIB_TIME_DIMENSION / sample_rate as i64
}

/// Signed sample biased by 128 with 8-bit wraparound, i.e. offset binary
fn legacy_sample(byte: u8) -> i32 {
    byte as i32 - 128
}

/// `X.EVT` next to `X.dcm`, or `X.evt`
fn companion_event_file(input: &Path) -> Result<PathBuf> {
    ["EVT", "evt"]
        .iter()
        .map(|ext| input.with_extension(ext))
        .find(|path| path.is_file())
        .ok_or_else(|| EdfError::FileNotFound(format!(
            "{}",
            input.with_extension("evt").display()
        )))
}

/// Converts a BI9800 `.dcm` recording into an EDF+ file
///
/// # Errors
///
/// * `EdfError::FileNotFound` - The `.dcm` file or its `.EVT`/`.evt` companion is missing
/// * `EdfError::InvalidSource` - A header line is missing or invalid, or no complete block
/// * `EdfError::Cancelled` - `cancel` was triggered; no output file is left
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &LegacyOptions,
    cancel: &CancelToken,
) -> Result<ConversionReport> {
    let (input, output) = (input.as_ref(), output.as_ref());
    check_distinct_paths(input, output)?;

    let dcm = File::open(input)
        .map_err(|e| EdfError::FileNotFound(format!("{}: {}", input.display(), e)))?;
    let dcm_len = dcm.metadata()?.len();
    let event_path = companion_event_file(input)?;
    let lines = event_lines(&fs::read(&event_path)?, options.max_line_length.max(1));

    let header = parse_event_header(&lines)?;
    let block_size = header.block_size();
    let blocks = (dcm_len / block_size as u64) as i64;
    if blocks == 0 {
        return Err(EdfError::InvalidSource(format!(
            "{} holds no complete {} byte block", input.display(), block_size
        )));
    }

    let start = if (1985..=2084).contains(&header.start.year()) {
        header.start
    } else {
        log::warn!("record date {} outside 1985..2084, start set to 1985-01-01", header.start.date());
        NaiveDate::from_ymd_opt(1985, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| EdfError::InvalidArgument("default start time".to_string()))?
    };

    log::info!(
        "converting {}: {} Hz, model {}, {} blocks",
        input.display(), header.sample_rate, header.model, blocks
    );

    let sample_rate = header.sample_rate as usize;
    let mut writer = EdfWriter::create(output, FileType::EdfPlus, CHANNELS)?;
    for channel in 0..CHANNELS {
        writer.set_sample_frequency(channel, sample_rate as i32)?;
        writer.set_digital_maximum(channel, 127)?;
        writer.set_digital_minimum(channel, -128)?;
        writer.set_physical_maximum(channel, PHYSICAL_MAX)?;
        writer.set_physical_minimum(channel, PHYSICAL_MIN)?;
        writer.set_physical_dimension(channel, "uV")?;
        writer.set_label(channel, &format!("channel {}", channel + 1))?;
    }
    writer.set_equipment(&header.model)?;
    writer.set_patient_name(&options.patient_name)?;
    writer.set_start_datetime(start)?;

    let mut dcm = BufReader::new(dcm);
    let mut block = vec![0u8; block_size];
    let mut samples = vec![0i32; block_size];
    let cadence = ProgressCadence::new("bi9800", blocks);

    for index in 0..blocks {
        cadence.tick(index, cancel)?;
        dcm.read_exact(&mut block)?;

        // 交错存储: 第 i 个采样点的 3 个通道相邻
        for (i, point) in block.chunks_exact(CHANNELS).enumerate() {
            for (channel, &byte) in point.iter().enumerate() {
                samples[channel * sample_rate + i] = legacy_sample(byte);
            }
        }
        writer.write_digital_record(&samples)?;
    }

    writer.write_annotation(0, None, "Recording starts")?;

    let start_of_day = header.start.time().num_seconds_from_midnight() as i64;
    let mut skipped = 0;
    for line in &lines {
        let Some((time_of_day, text)) = parse_event_line(line) else {
            if line.as_bytes().first().is_some_and(u8::is_ascii_digit) {
                skipped += 1;
            }
            continue;
        };
        let elapsed = (time_of_day as i64 - start_of_day).rem_euclid(86_400);
        writer.write_annotation(event_onset(elapsed * sample_rate as i64, header.sample_rate), None, text)?;
    }
    if skipped > 0 {
        log::warn!("skipped {} malformed event lines", skipped);
    }

    writer.write_annotation(blocks * EDFLIB_TIME_DIMENSION, None, "Recording ends")?;
    let summary = writer.close()?;

    log::info!(
        "wrote {} records and {} annotations to {}",
        summary.datarecords, summary.annotations_written, output.display()
    );
    Ok(ConversionReport {
        records_read: blocks,
        records_written: summary.datarecords,
        annotations_written: summary.annotations_written,
        annotations_dropped: summary.annotations_dropped,
        divisor: 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_lines() -> Vec<String> {
        [
            "Sampling Rate=256",
            "Model number=SD SD02G extra",
            "Record Date=2004-06-21",
            "Record Time=23:59:30",
            "Record Hours=48",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_parse_event_header() {
        let header = parse_event_header(&header_lines()).unwrap();
        assert_eq!(header.sample_rate, 256);
        assert_eq!(header.model, "SD SD02G");
        assert_eq!(header.record_hours, 48);
        assert_eq!(header.start.to_string(), "2004-06-21 23:59:30");
    }

    #[test]
    fn test_header_line_validation() {
        let mut lines = header_lines();
        lines[0] = "Sampling Rate=250".to_string();
        assert!(matches!(parse_event_header(&lines), Err(EdfError::InvalidSource(_))));

        let mut lines = header_lines();
        lines[2] = "Record Date=2004-13-21".to_string();
        assert!(parse_event_header(&lines).is_err());

        let mut lines = header_lines();
        lines[3] = "Record Time=24:00:00".to_string();
        assert!(parse_event_header(&lines).is_err());

        let mut lines = header_lines();
        lines.remove(4);
        let err = parse_event_header(&lines).unwrap_err();
        assert!(err.to_string().contains("Record Hours"));
    }

    #[test]
    fn test_parse_event_line() {
        assert_eq!(parse_event_line("12:30:45 Seizure onset"), Some((45045, "Seizure onset")));
        assert_eq!(parse_event_line("12:3x:45 Seizure onset"), None);
        assert_eq!(parse_event_line("12:30:45 "), None);
        assert_eq!(parse_event_line("25:00:00 Late"), None);
        assert_eq!(parse_event_line("Record Hours=24"), None);
    }

    #[test]
    fn test_event_lines() {
        let lines = event_lines(b"a\r\nbc\nabcdef", 4);
        assert_eq!(lines, vec!["a", "", "bc", "abcd", "ef"]);
    }

    #[test]
    fn test_event_onset() {
        assert_eq!(event_onset(100, 256), 3_906_250);
        assert_eq!(event_onset(256 * 60, 256), 60 * EDFLIB_TIME_DIMENSION);
    }

    #[test]
    fn test_legacy_sample() {
        assert_eq!(legacy_sample(0x80), 0);
        assert_eq!(legacy_sample(0x00), -128);
        assert_eq!(legacy_sample(0xff), 127);
    }
}
