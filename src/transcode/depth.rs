//! BDF/BDF+ (24 bit) to EDF/EDF+ (16 bit)
//!
//! Every selected signal goes through an optional first-order high-pass
//! filter and a divider before it is rounded and clipped to 16 bits. The
//! physical range written to the header grows with the divider, so the
//! divider trades amplitude resolution for range. Annotation signals of a
//! BDF+ source are copied byte for byte.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::cancel::{CancelToken, ProgressCadence};
use crate::error::{EdfError, Result};
use crate::filter::FirstOrderFilter;
use crate::header::{prefilter_field, HeaderBuffer};
use crate::reader::{decode_sample, EdfReader};
use crate::transcode::{check_distinct_paths, ConversionReport};
use crate::types::{AnnotationChannel, ChannelSpec, EdfHeader, FileType, SignalChannel, ANNOTATION_LABEL};
use crate::writer::PendingOutput;
use crate::EDFLIB_TIME_DIMENSION;

const TARGET_DIGITAL_MIN: i32 = -32768;
const TARGET_DIGITAL_MAX: i32 = 32767;

/// Accepted high-pass cutoff range in Hz
pub const HIGHPASS_RANGE: (f64, f64) = (0.001, 100.0);

/// Accepted divider range
pub const DIVIDER_RANGE: (f64, f64) = (1.0, 256.0);

#[derive(Debug, Clone, PartialEq)]
pub struct DepthOptions {
    /// Cutoff used for channels without their own setting, `None` disables filtering
    pub highpass: Option<f64>,
    pub divider: f64,
    /// Source signals to convert; empty selects every signal
    pub selection: Vec<usize>,
    pub channels: Vec<ChannelSetting>,
}

/// Filter and divider for one source signal
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSetting {
    pub source: usize,
    pub highpass: Option<f64>,
    pub divider: f64,
}

impl Default for DepthOptions {
    fn default() -> Self {
        DepthOptions {
            highpass: Some(0.1),
            divider: 1.0,
            selection: Vec::new(),
            channels: Vec::new(),
        }
    }
}

impl DepthOptions {
    /// Filter and divider that apply to `source`
    pub fn setting_for(&self, source: usize) -> Result<(Option<f64>, f64)> {
        let (highpass, divider) = self.channels
            .iter()
            .find(|c| c.source == source)
            .map(|c| (c.highpass, c.divider))
            .unwrap_or((self.highpass, self.divider));

        if !(divider >= DIVIDER_RANGE.0 && divider <= DIVIDER_RANGE.1) {
            return Err(EdfError::InvalidArgument(format!(
                "Divider {} of signal {} outside {}..{}",
                divider, source, DIVIDER_RANGE.0, DIVIDER_RANGE.1
            )));
        }
        if let Some(cutoff) = highpass {
            if !(cutoff >= HIGHPASS_RANGE.0 && cutoff <= HIGHPASS_RANGE.1) {
                return Err(EdfError::InvalidArgument(format!(
                    "High-pass cutoff {} Hz of signal {} outside {}..{} Hz",
                    cutoff, source, HIGHPASS_RANGE.0, HIGHPASS_RANGE.1
                )));
            }
        }
        Ok((highpass, divider))
    }
}

/// Builds the output channel list in source order
///
/// Annotation signals are always part of the output; signal channels only
/// when selected.
pub fn plan_channels(header: &EdfHeader, options: &DepthOptions) -> Result<Vec<ChannelSpec>> {
    for (i, &source) in options.selection.iter().enumerate() {
        if source >= header.signals.len() {
            return Err(EdfError::InvalidSignalIndex(source));
        }
        if options.selection[..i].contains(&source) {
            return Err(EdfError::InvalidArgument(format!("Signal {} selected twice", source)));
        }
    }

    let mut channels = Vec::new();
    for (source, param) in header.signals.iter().enumerate() {
        if param.annotation {
            channels.push(ChannelSpec::Annotation(AnnotationChannel {
                source,
                source_samples_per_record: param.samples_per_record,
                source_bytes: param.samples_per_record as usize * 3,
            }));
            continue;
        }
        if !options.selection.is_empty() && !options.selection.contains(&source) {
            continue;
        }

        let (highpass, divider) = options.setting_for(source)?;
        let bit_value = param.bit_value();
        channels.push(ChannelSpec::Signal(SignalChannel {
            source,
            label: param.label.clone(),
            transducer: param.transducer.clone(),
            physical_dimension: param.physical_dimension.clone(),
            physical_min: bit_value * TARGET_DIGITAL_MIN as f64 * divider,
            physical_max: bit_value * TARGET_DIGITAL_MAX as f64 * divider,
            digital_min: TARGET_DIGITAL_MIN,
            digital_max: TARGET_DIGITAL_MAX,
            samples_per_record: param.samples_per_record,
            prefilter: String::from_utf8_lossy(&prefilter_field(highpass, &param.prefilter)).into_owned(),
            highpass,
            divider,
        }));
    }

    if !channels.iter().any(|c| !c.is_annotation()) {
        return Err(EdfError::InvalidArgument("No signals selected".to_string()));
    }
    Ok(channels)
}

/// One source sample to one 16-bit target sample
///
/// `value` already carries the zero offset. The filtered or plain value is
/// divided, rounded half up and clipped.
///
/// ```rust
/// use edfconv::transcode::depth::transcode_sample;
///
/// assert_eq!(transcode_sample(1001, None, 2.0), 501);
/// assert_eq!(transcode_sample(8_000_000, None, 1.0), 32767);
/// assert_eq!(transcode_sample(-8_000_000, None, 1.0), -32768);
/// ```
pub fn transcode_sample(value: i32, filter: Option<&mut FirstOrderFilter>, divider: f64) -> i16 {
    let filtered = match filter {
        Some(filter) => filter.process(value),
        None => value as f64,
    };
    let rounded = (filtered / divider + 0.5).floor();
    rounded.clamp(TARGET_DIGITAL_MIN as f64, TARGET_DIGITAL_MAX as f64) as i16
}

/// Per-channel state of the record loop
struct ChannelState {
    spec: ChannelSpec,
    /// Byte offset of the channel in a source record
    offset: usize,
    zero_offset: i32,
    filter: Option<FirstOrderFilter>,
}

impl ChannelState {
    fn transcode(&mut self, record: &[u8], out: &mut Vec<u8>) {
        match &self.spec {
            ChannelSpec::Annotation(annotation) => {
                out.extend_from_slice(&record[self.offset..self.offset + annotation.source_bytes]);
                if annotation.needs_padding() {
                    out.push(0);
                }
            }
            ChannelSpec::Signal(signal) => {
                let end = self.offset + signal.samples_per_record as usize * 3;
                for raw in record[self.offset..end].chunks_exact(3) {
                    let value = decode_sample(raw) + self.zero_offset;
                    let sample = transcode_sample(value, self.filter.as_mut(), signal.divider);
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }
        }
    }
}

/// Converts `input` (BDF or BDF+) into `output` (EDF or EDF+)
///
/// # Errors
///
/// * `EdfError::InvalidSource` - The input is not a BDF file
/// * `EdfError::InvalidArgument` - A divider or cutoff is out of range, or nothing is selected
/// * `EdfError::Cancelled` - `cancel` was triggered; no output file is left
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &DepthOptions,
    cancel: &CancelToken,
) -> Result<ConversionReport> {
    let (input, output) = (input.as_ref(), output.as_ref());
    check_distinct_paths(input, output)?;

    let mut reader = EdfReader::open(input)?;
    let header = reader.header();
    if !header.file_type.is_bdf() {
        return Err(EdfError::InvalidSource(format!("{} is not a BDF file", input.display())));
    }

    let channels = plan_channels(header, options)?;
    let target = if header.file_type.is_plus() { FileType::EdfPlus } else { FileType::Edf };
    let header_bytes = build_header(reader.main_header_bytes(), header, &channels, target);
    let records = header.datarecords_in_file;
    let source_record_size = header.record_size;
    let duration_secs = header.datarecord_duration as f64 / EDFLIB_TIME_DIMENSION as f64;

    let mut states = Vec::with_capacity(channels.len());
    for spec in channels {
        let param = &header.signals[spec.source()];
        let filter = match &spec {
            ChannelSpec::Signal(SignalChannel { highpass: Some(cutoff), .. }) => Some(
                FirstOrderFilter::high_pass(*cutoff, param.samples_per_record as f64 / duration_secs),
            ),
            _ => None,
        };
        states.push(ChannelState {
            offset: reader.signal_record_offset(spec.source())?,
            zero_offset: if spec.is_annotation() { 0 } else { param.offset() as i32 },
            filter,
            spec,
        });
    }
    let target_record_size: usize = states.iter().map(|s| s.spec.samples_per_record() as usize * 2).sum();

    log::info!(
        "converting {} to {:?}: {} signals, {} records",
        input.display(), target, states.len(), records
    );

    let file = File::create(output)
        .map_err(|e| EdfError::FileNotFound(format!("{}: {}", output.display(), e)))?;
    let mut guard = PendingOutput::new(output);
    let mut out = BufWriter::new(file);
    out.write_all(&header_bytes)?;

    let mut record = vec![0u8; source_record_size];
    let mut target_record = Vec::with_capacity(target_record_size);
    let cadence = ProgressCadence::new("bdf to edf", records);

    for index in 0..records {
        cadence.tick(index, cancel)?;
        reader.read_record(index, &mut record)?;

        target_record.clear();
        for state in &mut states {
            state.transcode(&record, &mut target_record);
        }
        out.write_all(&target_record)?;
    }

    out.flush()?;
    out.get_ref().sync_all()?;
    drop(out);
    guard.commit();

    log::info!("wrote {} records to {}", records, output.display());
    Ok(ConversionReport {
        records_read: records,
        records_written: records,
        annotations_written: 0,
        annotations_dropped: 0,
        divisor: 1,
    })
}

/// 生成目标文件头部
///
/// Patient, recording, start date and start time are the source's bytes.
fn build_header(main_header: &[u8], source: &EdfHeader, channels: &[ChannelSpec], target: FileType) -> Vec<u8> {
    let header_size = (channels.len() + 1) * 256;
    let mut buf = HeaderBuffer::with_capacity(header_size);

    buf.push_version(target);
    buf.push_raw(&main_header[8..184], 176);
    buf.push_int(header_size as i64, 8);
    if target.is_plus() {
        buf.push_text(if source.discontinuous { "EDF+D" } else { "EDF+C" }, 44);
    } else {
        buf.push_spaces(44);
    }
    buf.push_int(source.datarecords_in_file, 8);
    buf.push_number(source.datarecord_duration as f64 / EDFLIB_TIME_DIMENSION as f64, 8);
    buf.push_int(channels.len() as i64, 4);

    for channel in channels {
        match channel {
            ChannelSpec::Signal(s) => buf.push_text(&s.label, 16),
            ChannelSpec::Annotation(_) => buf.push_text(ANNOTATION_LABEL, 16),
        }
    }
    for channel in channels {
        match channel {
            ChannelSpec::Signal(s) => buf.push_text(&s.transducer, 80),
            ChannelSpec::Annotation(_) => buf.push_spaces(80),
        }
    }
    for channel in channels {
        match channel {
            ChannelSpec::Signal(s) => buf.push_text(&s.physical_dimension, 8),
            ChannelSpec::Annotation(_) => buf.push_spaces(8),
        }
    }
    for channel in channels {
        match channel {
            ChannelSpec::Signal(s) => buf.push_number(s.physical_min, 8),
            ChannelSpec::Annotation(_) => buf.push_number(-1.0, 8),
        }
    }
    for channel in channels {
        match channel {
            ChannelSpec::Signal(s) => buf.push_number(s.physical_max, 8),
            ChannelSpec::Annotation(_) => buf.push_number(1.0, 8),
        }
    }
    for _ in channels {
        buf.push_int(TARGET_DIGITAL_MIN as i64, 8);
    }
    for _ in channels {
        buf.push_int(TARGET_DIGITAL_MAX as i64, 8);
    }
    for channel in channels {
        match channel {
            ChannelSpec::Signal(s) => buf.push_text(&s.prefilter, 80),
            ChannelSpec::Annotation(_) => buf.push_spaces(80),
        }
    }
    for channel in channels {
        buf.push_int(channel.samples_per_record() as i64, 8);
    }
    buf.push_spaces(32 * channels.len());

    debug_assert_eq!(buf.len(), header_size);
    buf.into_bytes()
}
