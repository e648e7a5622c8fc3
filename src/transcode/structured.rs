//! Mortara ECG XML to EDF+
//!
//! The document root is `ECG` with an `ACQUISITION_TIME_XML` attribute and
//! one `CHANNEL` element per lead. Each channel carries its acquisition
//! parameters as attributes and its samples as base64 encoded little-endian
//! 16-bit values in `DATA`.

use std::fs;
use std::path::Path;

use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime};
use roxmltree::{Document, Node};

use crate::cancel::{CancelToken, ProgressCadence};
use crate::error::{EdfError, Result};
use crate::transcode::{check_distinct_paths, ConversionReport};
use crate::types::FileType;
use crate::utils::fixed_digits;
use crate::writer::EdfWriter;
use crate::EDFLIB_TIME_DIMENSION;

const MAX_NAME_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOptions {
    /// Sample rate divisors in order of preference
    pub divisor_candidates: Vec<u32>,
    /// Smallest accepted decoded payload per channel
    pub min_payload_bytes: usize,
    /// Channels beyond this count are ignored
    pub max_channels: usize,
}

impl Default for StructuredOptions {
    fn default() -> Self {
        StructuredOptions {
            divisor_candidates: vec![10, 8, 5, 4, 2, 1],
            min_payload_bytes: 100,
            max_channels: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EcgChannel {
    pub name: String,
    pub units_per_mv: i32,
    pub samples: Vec<i16>,
}

/// A validated ECG document
#[derive(Debug, Clone, PartialEq)]
pub struct EcgDocument {
    pub channels: Vec<EcgChannel>,
    pub sample_frequency: u32,
    pub start: NaiveDateTime,
    pub subject_name: Option<String>,
    /// "M", "F" or "X"
    pub sex: String,
    pub model: Option<String>,
}

/// Acquisition parameters that have to agree across channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Acquisition {
    offset: i64,
    bits: i64,
    duration: i64,
    sample_frequency: i64,
    units_per_mv: i64,
}

fn attribute<'a>(node: &Node<'a, '_>, name: &str, channel: usize) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        EdfError::InvalidSource(format!(
            "cannot find attribute \"{}\" in channel number {}", name, channel + 1
        ))
    })
}

fn int_attribute(node: &Node, name: &str, channel: usize, min: i64) -> Result<i64> {
    let text = attribute(node, name, channel)?;
    let value: i64 = text.trim().parse().map_err(|_| {
        EdfError::InvalidSource(format!(
            "attribute \"{}\" in channel number {} is not a number: {}", name, channel + 1, text
        ))
    })?;
    if value < min {
        return Err(EdfError::InvalidSource(format!(
            "attribute \"{}\" in channel number {} is {}, expected at least {}",
            name, channel + 1, value, min
        )));
    }
    Ok(value)
}

fn decode_payload(node: &Node, channel: usize) -> Result<Vec<u8>> {
    let data = attribute(node, "DATA", channel)?;
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| EdfError::InvalidSource(format!(
            "cannot decode data in channel number {}: {}", channel + 1, e
        )))
}

/// Parses and validates an ECG document
pub fn parse_document(text: &str, options: &StructuredOptions) -> Result<EcgDocument> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "ECG" {
        return Err(EdfError::InvalidSource(format!(
            "root element is \"{}\", expected \"ECG\"", root.tag_name().name()
        )));
    }

    let nodes: Vec<Node> = root.children().filter(|n| n.has_tag_name("CHANNEL")).collect();
    if nodes.is_empty() {
        return Err(EdfError::InvalidSource("no CHANNEL elements".to_string()));
    }
    if nodes.len() > options.max_channels {
        log::warn!("{} channels found, only the first {} are used", nodes.len(), options.max_channels);
    }

    let mut acquisition: Option<Acquisition> = None;
    let mut channels = Vec::new();
    let mut payload_len = None;

    for (i, node) in nodes.iter().take(options.max_channels).enumerate() {
        let current = Acquisition {
            offset: int_attribute(node, "OFFSET", i, 0)?,
            bits: int_attribute(node, "BITS", i, 16)?,
            duration: int_attribute(node, "DURATION", i, 1)?,
            sample_frequency: int_attribute(node, "SAMPLE_FREQ", i, 1)?,
            units_per_mv: int_attribute(node, "UNITS_PER_MV", i, 1)?,
        };
        if current.bits != 16 {
            return Err(EdfError::InvalidSource(format!(
                "{} bits in channel number {}, only 16 bits are supported", current.bits, i + 1
            )));
        }
        if let Some(first) = acquisition {
            let differs = [
                ("OFFSET", first.offset != current.offset),
                ("BITS", first.bits != current.bits),
                ("DURATION", first.duration != current.duration),
                ("SAMPLE_FREQ", first.sample_frequency != current.sample_frequency),
                ("UNITS_PER_MV", first.units_per_mv != current.units_per_mv),
            ];
            if let Some((name, _)) = differs.iter().find(|(_, d)| *d) {
                return Err(EdfError::InvalidSource(format!(
                    "attribute \"{}\" in channel number {} is not equal to other channels", name, i + 1
                )));
            }
        }
        acquisition = Some(current);

        let format = attribute(node, "FORMAT", i)?;
        if format != "SIGNED" {
            return Err(EdfError::InvalidSource(format!(
                "format \"{}\" in channel number {}, only SIGNED is supported", format, i + 1
            )));
        }
        let name: String = attribute(node, "NAME", i)?.chars().take(MAX_NAME_LEN).collect();
        let encoding = attribute(node, "ENCODING", i)?;
        if encoding != "BASE64" {
            return Err(EdfError::InvalidSource(format!(
                "encoding \"{}\" in channel number {}, only BASE64 is supported", encoding, i + 1
            )));
        }

        let payload = decode_payload(node, i)?;
        if payload.len() < options.min_payload_bytes {
            return Err(EdfError::InvalidSource(format!("not enough samples in channel number {}", i + 1)));
        }
        if payload_len.is_some_and(|len| len != payload.len()) {
            return Err(EdfError::InvalidSource(format!(
                "number of samples in channel number {} is not equal to other channels", i + 1
            )));
        }
        payload_len = Some(payload.len());

        channels.push(EcgChannel {
            name,
            units_per_mv: i32::try_from(current.units_per_mv).unwrap_or(i32::MAX),
            samples: payload
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect(),
        });
    }

    let sample_frequency = acquisition
        .map(|a| a.sample_frequency)
        .and_then(|sf| u32::try_from(sf).ok())
        .ok_or_else(|| EdfError::InvalidSource("sample frequency out of range".to_string()))?;

    let start = root
        .attribute("ACQUISITION_TIME_XML")
        .ok_or_else(|| EdfError::InvalidSource("cannot find attribute \"ACQUISITION_TIME_XML\"".to_string()))
        .and_then(parse_acquisition_time)?;

    let mut subject_name = None;
    let mut sex = "X".to_string();
    match root.children().find(|n| n.has_tag_name("SUBJECT")) {
        None => log::warn!("subject name not present"),
        Some(subject) => {
            let first = subject.attribute("FIRST_NAME").filter(|s| !s.is_empty());
            let last = subject.attribute("LAST_NAME").filter(|s| !s.is_empty());
            if first.is_none() {
                log::warn!("subject's first name not present");
            }
            if last.is_none() {
                log::warn!("subject's last name not present");
            }
            let name = [first, last].iter().flatten().copied().collect::<Vec<_>>().join(" ");
            if !name.is_empty() {
                subject_name = Some(name);
            }
            match subject.attribute("GENDER") {
                Some(gender) if gender.starts_with('M') => sex = "M".to_string(),
                Some(gender) if gender.starts_with('F') => sex = "F".to_string(),
                Some(_) => {}
                None => log::warn!("subject's gender not present"),
            }
        }
    }

    let model = match root.children().find(|n| n.has_tag_name("SOURCE")) {
        None => {
            log::warn!("source/device info not present");
            None
        }
        Some(source) => {
            let model = source.attribute("MODEL").filter(|s| !s.is_empty()).map(str::to_string);
            if model.is_none() {
                log::warn!("model name not present");
            }
            model
        }
    };

    Ok(EcgDocument {
        channels,
        sample_frequency,
        start,
        subject_name,
        sex,
        model,
    })
}

/// `YYYY-MM-DDTHH:MM:SS`, year 1985 - 2084
pub fn parse_acquisition_time(value: &str) -> Result<NaiveDateTime> {
    let invalid = || EdfError::InvalidSource(format!("invalid ACQUISITION_TIME_XML \"{}\"", value));
    let bytes = value.as_bytes();
    if bytes.len() < 19 {
        return Err(invalid());
    }
    let field = |start, len| fixed_digits(bytes, start, len).ok_or_else(invalid);
    let (year, month, day) = (field(0, 4)?, field(5, 2)?, field(8, 2)?);
    let (hour, minute, second) = (field(11, 2)?, field(14, 2)?, field(17, 2)?);
    if !(1985..=2084).contains(&year) {
        return Err(invalid());
    }
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(invalid)
}

/// First candidate that divides the sample frequency, 1 if none does
///
/// ```rust
/// use edfconv::transcode::structured::choose_divisor;
///
/// let candidates = [10, 8, 5, 4, 2, 1];
/// assert_eq!(choose_divisor(500, &candidates), 10);
/// assert_eq!(choose_divisor(256, &candidates), 8);
/// assert_eq!(choose_divisor(1001, &candidates), 1);
/// ```
pub fn choose_divisor(sample_frequency: u32, candidates: &[u32]) -> u32 {
    candidates
        .iter()
        .copied()
        .find(|&d| d > 0 && sample_frequency % d == 0)
        .unwrap_or(1)
}

/// Physical minimum, maximum and unit of a channel
///
/// Above 327 units per mV the range is expressed in uV so the header field
/// keeps its precision.
pub fn physical_range(units_per_mv: i32) -> (f64, f64, &'static str) {
    let units = units_per_mv as f64;
    if units_per_mv > 327 {
        (-32_768_000.0 / units, 32_767_000.0 / units, "uV")
    } else {
        (-32_768.0 / units, 32_767.0 / units, "mV")
    }
}

/// Mortara 的 XML 可能是 Latin-1 编码
fn read_document(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .map_err(|e| EdfError::FileNotFound(format!("{}: {}", path.display(), e)))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => Ok(e.into_bytes().iter().map(|&b| b as char).collect()),
    }
}

/// Converts a Mortara ECG XML file into EDF+
///
/// The whole document is validated before the output file is created.
///
/// # Errors
///
/// * `EdfError::Xml` - The document is not well-formed
/// * `EdfError::InvalidSource` - Missing or inconsistent channel attributes,
///   undecodable or short payloads, or a bad acquisition time
/// * `EdfError::Cancelled` - `cancel` was triggered; no output file is left
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &StructuredOptions,
    cancel: &CancelToken,
) -> Result<ConversionReport> {
    let (input, output) = (input.as_ref(), output.as_ref());
    check_distinct_paths(input, output)?;

    let text = read_document(input)?;
    let document = parse_document(&text, options)?;
    drop(text);

    let divisor = choose_divisor(document.sample_frequency, &options.divisor_candidates);
    let block = (document.sample_frequency / divisor) as usize;
    let records = document.channels[0].samples.len() / block;
    if records == 0 {
        return Err(EdfError::InvalidSource(format!(
            "fewer than {} samples per channel, not enough for one data record", block
        )));
    }

    log::info!(
        "converting {}: {} channels at {} Hz, divisor {}, {} records",
        input.display(), document.channels.len(), document.sample_frequency, divisor, records
    );

    let mut writer = EdfWriter::create(output, FileType::EdfPlus, document.channels.len())?;
    for (i, channel) in document.channels.iter().enumerate() {
        let (physical_min, physical_max, unit) = physical_range(channel.units_per_mv);
        writer.set_sample_frequency(i, block as i32)?;
        writer.set_physical_maximum(i, physical_max)?;
        writer.set_physical_minimum(i, physical_min)?;
        writer.set_physical_dimension(i, unit)?;
        writer.set_digital_maximum(i, 32767)?;
        writer.set_digital_minimum(i, -32768)?;
        writer.set_label(i, &channel.name)?;
    }
    writer.set_start_datetime(document.start)?;
    if let Some(name) = &document.subject_name {
        writer.set_patient_name(name)?;
    }
    writer.set_sex(&document.sex)?;
    if let Some(model) = &document.model {
        writer.set_equipment(model)?;
    }
    if divisor == 1 {
        writer.set_number_of_annotation_signals(2)?;
    } else {
        writer.set_datarecord_duration(EDFLIB_TIME_DIMENSION / divisor as i64)?;
    }

    let mut samples = Vec::with_capacity(block * document.channels.len());
    let cadence = ProgressCadence::new("mortara", records as i64);
    for record in 0..records {
        cadence.tick(record as i64, cancel)?;
        samples.clear();
        for channel in &document.channels {
            let slice = &channel.samples[record * block..(record + 1) * block];
            samples.extend(slice.iter().map(|&s| s as i32));
        }
        writer.write_digital_record(&samples)?;
    }
    let summary = writer.close()?;

    log::info!("wrote {} records to {}", summary.datarecords, output.display());
    Ok(ConversionReport {
        records_read: records as i64,
        records_written: summary.datarecords,
        annotations_written: summary.annotations_written,
        annotations_dropped: summary.annotations_dropped,
        divisor: divisor as i64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_xml(name: &str, sample_freq: u32, samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        format!(
            r#"<CHANNEL OFFSET="0" BITS="16" FORMAT="SIGNED" UNITS_PER_MV="200" DURATION="10000" SAMPLE_FREQ="{}" NAME="{}" ENCODING="BASE64" DATA="{}"/>"#,
            sample_freq, name, base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    fn document(channels: &[String]) -> String {
        format!(
            r#"<?xml version="1.0"?><ECG ACQUISITION_TIME_XML="2011-03-04T10:20:30"><SUBJECT FIRST_NAME="Jan" LAST_NAME="Jansen" GENDER="MALE"/><SOURCE MODEL="ELI 250"/>{}</ECG>"#,
            channels.concat()
        )
    }

    #[test]
    fn test_parse_document() {
        let samples: Vec<i16> = (0..500).map(|i| (i * 7 - 1000) as i16).collect();
        let xml = document(&[channel_xml("I", 500, &samples), channel_xml("II", 500, &samples)]);
        let doc = parse_document(&xml, &StructuredOptions::default()).unwrap();

        assert_eq!(doc.channels.len(), 2);
        assert_eq!(doc.channels[1].name, "II");
        assert_eq!(doc.channels[0].samples, samples);
        assert_eq!(doc.sample_frequency, 500);
        assert_eq!(doc.subject_name.as_deref(), Some("Jan Jansen"));
        assert_eq!(doc.sex, "M");
        assert_eq!(doc.model.as_deref(), Some("ELI 250"));
        assert_eq!(doc.start.to_string(), "2011-03-04 10:20:30");
    }

    #[test]
    fn test_mismatched_sample_freq_rejected() {
        let samples = vec![0i16; 100];
        let xml = document(&[channel_xml("I", 500, &samples), channel_xml("II", 250, &samples)]);
        let err = parse_document(&xml, &StructuredOptions::default()).unwrap_err();
        assert!(matches!(err, EdfError::InvalidSource(_)));
        assert!(err.to_string().contains("SAMPLE_FREQ"));
    }

    #[test]
    fn test_short_and_unequal_payloads_rejected() {
        let xml = document(&[channel_xml("I", 500, &[0; 10])]);
        assert!(parse_document(&xml, &StructuredOptions::default()).is_err());

        let xml = document(&[channel_xml("I", 500, &[0; 100]), channel_xml("II", 500, &[0; 101])]);
        let err = parse_document(&xml, &StructuredOptions::default()).unwrap_err();
        assert!(err.to_string().contains("not equal"));
    }

    #[test]
    fn test_malformed_xml() {
        let err = parse_document("<ECG><CHANNEL></ECG>", &StructuredOptions::default()).unwrap_err();
        assert!(matches!(err, EdfError::Xml(_)));
    }

    #[test]
    fn test_parse_acquisition_time() {
        assert!(parse_acquisition_time("2011-03-04T10:20:30").is_ok());
        assert!(parse_acquisition_time("1984-03-04T10:20:30").is_err());
        assert!(parse_acquisition_time("2011-02-30T10:20:30").is_err());
        assert!(parse_acquisition_time("2011-03-04T10:60:30").is_err());
        assert!(parse_acquisition_time("2011-03-04").is_err());
    }

    #[test]
    fn test_choose_divisor_skips_odd_candidates() {
        let candidates = StructuredOptions::default().divisor_candidates;
        assert_eq!(choose_divisor(1000, &candidates), 10);
        assert_eq!(choose_divisor(300, &candidates), 10);
        // 9, 7, 6, 3 不在候选列表中
        assert_eq!(choose_divisor(63, &candidates), 1);
        assert_eq!(choose_divisor(18, &candidates), 2);
        assert_eq!(choose_divisor(25, &candidates), 5);
    }

    #[test]
    fn test_physical_range() {
        let (min, max, unit) = physical_range(1000);
        assert_eq!(unit, "uV");
        assert!((max - 32767.0).abs() < 1e-9);
        assert!((min + 32768.0).abs() < 1e-9);

        let (min, max, unit) = physical_range(200);
        assert_eq!(unit, "mV");
        assert!((max - 163.835).abs() < 1e-9);
        assert!((min + 163.84).abs() < 1e-9);
    }
}
