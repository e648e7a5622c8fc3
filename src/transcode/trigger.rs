//! Biosemi BDF to BDF+ with annotations derived from the `Status` signal
//!
//! Bits 0-15 of every status sample are the trigger inputs, bit 16 marks the
//! start of a new epoch. Edges on these 17 lines become annotations. The
//! recording is then copied into a BDF+ file whose data records are short
//! enough to give every annotation a record.

use std::path::Path;

use crate::cancel::{CancelToken, ProgressCadence};
use crate::error::{EdfError, Result};
use crate::reader::{decode_sample, EdfReader};
use crate::transcode::{check_distinct_paths, ConversionReport};
use crate::types::{Annotation, FileType};
use crate::writer::EdfWriter;
use crate::EDFLIB_TIME_DIMENSION;

/// User trigger lines in the status word
pub const TRIGGER_INPUTS: usize = 16;

/// Lines that are scanned: the trigger inputs plus the epoch line
const SCANNED_LINES: usize = TRIGGER_INPUTS + 1;

/// Bits tracked per status sample
const STATUS_BITS: usize = 24;

const NEW_EPOCH_LABEL: &str = "new epoch";

const MAX_LABEL_LEN: usize = 16;

/// Largest record split; the lowest Biosemi rate (32 Hz) still leaves one sample per sub-record
const MAX_DIVISOR: i64 = 32;

/// Samples per 1 s record a Biosemi recording can have
const SAMPLE_FREQUENCIES: [i32; 10] = [16384, 8192, 4096, 2048, 1024, 512, 256, 128, 64, 32];

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOptions {
    /// Annotation text for trigger inputs 1-16
    pub labels: Vec<String>,
    /// `true`: a rising edge starts an event, `false`: a falling edge does
    pub rising_edge: bool,
    /// Close events on the opposite edge and record their duration
    pub measure_duration: bool,
    /// Absolute ceiling on derived annotations
    pub max_annotations: usize,
    /// Derived annotations are also limited to `records × annotations_per_record − margin`
    pub annotations_per_record: i64,
    pub margin: i64,
    /// Power of two, at most 32
    pub max_divisor: i64,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        TriggerOptions {
            labels: (1..=TRIGGER_INPUTS).map(|i| format!("Trigger Input {}", i)).collect(),
            rising_edge: true,
            measure_duration: false,
            max_annotations: 100_000,
            annotations_per_record: 32,
            margin: 2,
            max_divisor: 32,
        }
    }
}

impl TriggerOptions {
    /// Labels must be non-empty, at most 16 bytes and unique; `max_divisor`
    /// must be a power of two no larger than 32
    pub fn validate(&self) -> Result<()> {
        if self.labels.len() != TRIGGER_INPUTS {
            return Err(EdfError::InvalidArgument(format!(
                "Expected {} trigger labels, got {}", TRIGGER_INPUTS, self.labels.len()
            )));
        }
        for (i, label) in self.labels.iter().enumerate() {
            if label.is_empty() {
                return Err(EdfError::InvalidArgument(format!("Trigger Input label {} is empty", i + 1)));
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(EdfError::InvalidArgument(format!(
                    "Trigger Input label {} is longer than {} bytes", i + 1, MAX_LABEL_LEN
                )));
            }
            if let Some(j) = self.labels[..i].iter().position(|other| other == label) {
                return Err(EdfError::InvalidArgument(format!(
                    "Trigger Input labels {} and {} are the same", j + 1, i + 1
                )));
            }
        }
        if self.max_divisor < 1 || self.max_divisor > MAX_DIVISOR || self.max_divisor & (self.max_divisor - 1) != 0 {
            return Err(EdfError::InvalidArgument(format!(
                "Maximum divisor {} is not a power of two between 1 and {}", self.max_divisor, MAX_DIVISOR
            )));
        }
        Ok(())
    }
}

/// Edge detector over the status signal
///
/// Levels start at the "active" polarity so the first transition into an
/// event is caught: high for rising-edge triggers, low for falling-edge
/// triggers. The epoch line and the reserved bits start high.
///
/// ```rust
/// use edfconv::transcode::trigger::{TriggerOptions, TriggerScanner};
///
/// let options = TriggerOptions { measure_duration: true, ..TriggerOptions::default() };
/// let mut scanner = TriggerScanner::new(&options, 10)?;
///
/// // input 1 goes high in the second sample and low again in the fourth
/// scanner.scan_record(0, &[0, 1, 1, 0], 2_500_000.0);
///
/// let annotations = scanner.into_annotations();
/// assert_eq!(annotations.len(), 1);
/// assert_eq!(annotations[0].onset, 2_500_000);
/// assert_eq!(annotations[0].duration, Some(5_000_000));
/// # Ok::<(), edfconv::EdfError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TriggerScanner {
    labels: Vec<String>,
    levels: [bool; STATUS_BITS],
    rising_edge: bool,
    measure_duration: bool,
    cap: usize,
    truncated: bool,
    annotations: Vec<Annotation>,
}

impl TriggerScanner {
    /// A scanner for a recording of `records` data records
    pub fn new(options: &TriggerOptions, records: i64) -> Result<Self> {
        options.validate()?;

        let mut labels = options.labels.clone();
        labels.push(NEW_EPOCH_LABEL.to_string());

        let mut levels = [true; STATUS_BITS];
        levels[..TRIGGER_INPUTS].fill(options.rising_edge);

        let record_cap = (records * options.annotations_per_record - options.margin).max(0);
        let cap = options.max_annotations.min(usize::try_from(record_cap).unwrap_or(usize::MAX));

        Ok(TriggerScanner {
            labels,
            levels,
            rising_edge: options.rising_edge,
            measure_duration: options.measure_duration,
            cap,
            truncated: false,
            annotations: Vec::new(),
        })
    }

    /// Scans the status samples of one record
    ///
    /// `sample_duration` is the time between two status samples in 100 ns
    /// units. Returns `false` once the annotation cap is reached; the scan is
    /// over from then on.
    pub fn scan_record(&mut self, record: i64, status: &[i32], sample_duration: f64) -> bool {
        if self.truncated {
            return false;
        }

        for (i, &word) in status.iter().enumerate() {
            for line in 0..SCANNED_LINES {
                let high = word & (1 << line) != 0;
                if high == self.levels[line] {
                    continue;
                }
                self.levels[line] = high;

                // 新纪元线总是以上升沿开始
                let opens = if line == TRIGGER_INPUTS { high } else { high == self.rising_edge };
                let now = sample_time(record, i, sample_duration);

                if opens {
                    if self.annotations.len() >= self.cap {
                        self.truncated = true;
                        return false;
                    }
                    self.annotations.push(Annotation::new(now, None, &self.labels[line]));
                } else if self.measure_duration {
                    self.close_event(line, now);
                }
            }
        }
        true
    }

    /// Gives the most recently opened event with this line's label its duration
    fn close_event(&mut self, line: usize, now: i64) {
        let label = &self.labels[line];
        if let Some(open) = self.annotations.iter_mut().rev().find(|a| &a.description == label) {
            open.duration = Some(now - open.onset);
        }
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// `true` when the scan stopped at the annotation cap
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_annotations(self) -> Vec<Annotation> {
        self.annotations
    }
}

fn sample_time(record: i64, sample: usize, sample_duration: f64) -> i64 {
    ((record * EDFLIB_TIME_DIMENSION) as f64 + sample as f64 * sample_duration + 0.5) as i64
}

/// Factor the record duration is divided by
///
/// The smallest power of two `d ≤ max_divisor` with
/// `annotation_count + margin ≤ records × d`; the largest power of two not
/// above `max_divisor` when none qualifies.
///
/// ```rust
/// use edfconv::transcode::trigger::choose_divisor;
///
/// assert_eq!(choose_divisor(8, 10, 2, 32), 1);
/// assert_eq!(choose_divisor(9, 10, 2, 32), 2);
/// assert_eq!(choose_divisor(100_000, 10, 2, 32), 32);
/// ```
pub fn choose_divisor(annotation_count: usize, records: i64, margin: i64, max_divisor: i64) -> i64 {
    let needed = annotation_count as i64 + margin;
    let mut divisor = 1;
    while divisor * 2 <= max_divisor && needed > records * divisor {
        divisor *= 2;
    }
    divisor
}

/// Converts a Biosemi BDF file into BDF+ with trigger annotations
///
/// # Errors
///
/// * `EdfError::InvalidSource` - Not a plain BDF file, record duration other
///   than 1 s, unequal or unsupported sample rates, no `Status` signal, or no data records
/// * `EdfError::InvalidArgument` - Invalid trigger labels or divisor limit, or the output path equals the input
/// * `EdfError::Cancelled` - `cancel` was triggered; no output file is left
pub fn convert<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    options: &TriggerOptions,
    cancel: &CancelToken,
) -> Result<ConversionReport> {
    let (input, output) = (input.as_ref(), output.as_ref());
    options.validate()?;
    check_distinct_paths(input, output)?;

    let mut reader = EdfReader::open(input)?;
    let header = reader.header();
    match header.file_type {
        FileType::Bdf => {}
        FileType::BdfPlus => {
            return Err(EdfError::InvalidSource(format!("{} is already a BDF+ file", input.display())))
        }
        _ => return Err(EdfError::InvalidSource(format!("{} is not a BDF file", input.display()))),
    }
    if header.datarecord_duration != EDFLIB_TIME_DIMENSION {
        return Err(EdfError::InvalidSource("Data record duration must be 1 second".to_string()));
    }

    let samples_per_record = header.signals[0].samples_per_record;
    if header.signals.iter().any(|s| s.samples_per_record != samples_per_record) {
        return Err(EdfError::InvalidSource("All signals must have the same sample frequency".to_string()));
    }
    if !SAMPLE_FREQUENCIES.contains(&samples_per_record) {
        return Err(EdfError::InvalidSource(format!(
            "Sample frequency {} Hz is not one of 16384, 8192, ..., 32 Hz", samples_per_record
        )));
    }
    let status_signal = header
        .signal_index("Status")
        .ok_or_else(|| EdfError::InvalidSource("There is no Status signal".to_string()))?;

    let records = header.datarecords_in_file;
    if records < 1 {
        return Err(EdfError::InvalidSource(format!("{} contains no data records", input.display())));
    }
    let signals = header.signals.clone();
    let start = header.start_date.and_time(header.start_time);
    let patient = header.patient.clone();
    let recording = header.recording.clone();
    let record_size = header.record_size;

    log::info!("collecting triggers from {} ({} records)", input.display(), records);

    let status_samples = samples_per_record as usize;
    let sample_duration = EDFLIB_TIME_DIMENSION as f64 / status_samples as f64;
    let mut scanner = TriggerScanner::new(options, records)?;
    let cadence = ProgressCadence::new("collecting triggers", records);

    for record in 0..records {
        cadence.tick(record, cancel)?;
        let status = reader.read_digital_samples(status_signal, status_samples)?;
        if !scanner.scan_record(record, &status, sample_duration) {
            log::warn!(
                "trigger scan stopped at record {}: {} annotations reached the limit",
                record, scanner.len()
            );
            break;
        }
    }

    let divisor = choose_divisor(scanner.len(), records, options.margin, options.max_divisor);
    let target_samples = samples_per_record / divisor as i32;
    log::info!("{} triggers, data record duration divided by {}", scanner.len(), divisor);

    let mut writer = EdfWriter::create(output, FileType::BdfPlus, signals.len())?;
    for (i, param) in signals.iter().enumerate() {
        writer.set_signal_param(i, param)?;
        writer.set_sample_frequency(i, target_samples)?;
    }
    writer.set_datarecord_duration(EDFLIB_TIME_DIMENSION / divisor)?;
    writer.set_start_datetime(start)?;
    writer.set_patient_name(&patient)?;
    writer.set_recording_additional(&recording)?;

    let offsets = (0..signals.len())
        .map(|i| reader.signal_record_offset(i))
        .collect::<Result<Vec<_>>>()?;
    let mut raw = vec![0u8; record_size];
    let mut samples = vec![0i32; signals.len() * target_samples as usize];
    let cadence = ProgressCadence::new("writing bdf+", records);

    reader.rewind_records();
    for record in 0..records {
        cadence.tick(record, cancel)?;
        reader.read_record(record, &mut raw)?;

        // 每个源记录拆成 divisor 个子记录, 每个子记录取各信号的连续片段
        for part in 0..divisor as usize {
            let first = part * target_samples as usize;
            for (i, &offset) in offsets.iter().enumerate() {
                let chunk = &mut samples[i * target_samples as usize..(i + 1) * target_samples as usize];
                for (k, sample) in chunk.iter_mut().enumerate() {
                    let at = offset + (first + k) * 3;
                    *sample = decode_sample(&raw[at..at + 3]);
                }
            }
            writer.write_digital_record(&samples)?;
        }
    }

    let annotations = scanner.into_annotations();
    writer.write_annotation(0, None, "Recording starts")?;
    for annotation in &annotations {
        let duration = annotation.duration.filter(|&d| d > 0);
        writer.write_annotation(annotation.onset, duration, &annotation.description)?;
    }
    writer.write_annotation(records * EDFLIB_TIME_DIMENSION, None, "Recording ends")?;
    let summary = writer.close()?;

    log::info!(
        "wrote {} records and {} annotations to {}",
        summary.datarecords, summary.annotations_written, output.display()
    );
    Ok(ConversionReport {
        records_read: records,
        records_written: summary.datarecords,
        annotations_written: summary.annotations_written,
        annotations_dropped: summary.annotations_dropped,
        divisor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TD: f64 = EDFLIB_TIME_DIMENSION as f64;

    fn scan(options: &TriggerOptions, records: &[Vec<i32>]) -> Vec<Annotation> {
        let mut scanner = TriggerScanner::new(options, records.len() as i64).unwrap();
        for (r, status) in records.iter().enumerate() {
            scanner.scan_record(r as i64, status, TD / status.len() as f64);
        }
        scanner.into_annotations()
    }

    #[test]
    fn test_rising_edges_open_events() {
        let options = TriggerOptions::default();
        let annotations = scan(&options, &[vec![0, 0b11, 0b10, 0b11]]);

        let labels: Vec<&str> = annotations.iter().map(|a| a.description.as_str()).collect();
        assert_eq!(labels, vec!["Trigger Input 1", "Trigger Input 2", "Trigger Input 1"]);
        assert_eq!(annotations[0].onset, 2_500_000);
        assert_eq!(annotations[2].onset, 7_500_000);
        assert!(annotations.iter().all(|a| a.duration.is_none()));
    }

    #[test]
    fn test_falling_edge_polarity() {
        let options = TriggerOptions { rising_edge: false, measure_duration: true, ..TriggerOptions::default() };
        // 低电平为起始: 初始状态为低, 第一个高电平只是闭合
        let annotations = scan(&options, &[vec![0b1, 0b0, 0b0, 0b1]]);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].onset, 2_500_000);
        assert_eq!(annotations[0].duration, Some(5_000_000));
    }

    #[test]
    fn test_new_epoch_line_is_always_rising() {
        let options = TriggerOptions { rising_edge: false, ..TriggerOptions::default() };
        let epoch = 1 << 16;
        let annotations = scan(&options, &[vec![epoch, 0, epoch, epoch]]);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].description, "new epoch");
        assert_eq!(annotations[0].onset, 5_000_000);
    }

    #[test]
    fn test_duration_closes_most_recent_opener() {
        let options = TriggerOptions { measure_duration: true, ..TriggerOptions::default() };
        let records = vec![vec![0, 1], vec![0, 1], vec![0, 0]];
        let annotations = scan(&options, &records);
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].duration, Some(5_000_000));
        assert_eq!(annotations[1].onset, 15_000_000);
        assert_eq!(annotations[1].duration, Some(5_000_000));
    }

    #[test]
    fn test_record_5_to_9_round_trip() {
        let options = TriggerOptions { measure_duration: true, ..TriggerOptions::default() };
        let records: Vec<Vec<i32>> = (0..12)
            .map(|r| vec![if (5..9).contains(&r) { 1 } else { 0 }; 32])
            .collect();
        let annotations = scan(&options, &records);
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].onset, 5 * EDFLIB_TIME_DIMENSION);
        assert_eq!(annotations[0].duration, Some(4 * EDFLIB_TIME_DIMENSION));
    }

    #[test]
    fn test_scan_is_idempotent() {
        let options = TriggerOptions { measure_duration: true, ..TriggerOptions::default() };
        let records: Vec<Vec<i32>> = (0..20)
            .map(|r| (0..64).map(|i| ((r * 64 + i) / 7 % 5) as i32).collect())
            .collect();
        assert_eq!(scan(&options, &records), scan(&options, &records));
    }

    #[test]
    fn test_cap_truncates_scan() {
        let options = TriggerOptions { max_annotations: 3, ..TriggerOptions::default() };
        let mut scanner = TriggerScanner::new(&options, 100).unwrap();
        let toggling: Vec<i32> = (0..16).map(|i| i % 2).collect();
        assert!(!scanner.scan_record(0, &toggling, TD / 16.0));
        assert!(scanner.is_truncated());
        assert_eq!(scanner.len(), 3);
        assert!(!scanner.scan_record(1, &toggling, TD / 16.0));
    }

    #[test]
    fn test_record_cap() {
        // 1 条记录 × 32 − 2 = 30
        let options = TriggerOptions::default();
        let mut scanner = TriggerScanner::new(&options, 1).unwrap();
        let toggling: Vec<i32> = (0..128).map(|i| i % 2).collect();
        scanner.scan_record(0, &toggling, TD / 128.0);
        assert_eq!(scanner.len(), 30);
    }

    #[test]
    fn test_choose_divisor() {
        assert_eq!(choose_divisor(0, 1, 2, 32), 2);
        assert_eq!(choose_divisor(98, 100, 2, 32), 1);
        assert_eq!(choose_divisor(99, 100, 2, 32), 2);
        assert_eq!(choose_divisor(398, 100, 2, 32), 4);
        assert_eq!(choose_divisor(1_000_000, 100, 2, 32), 32);
        assert_eq!(choose_divisor(1_000_000, 100, 2, 20), 16);
        assert_eq!(choose_divisor(1_000_000, 100, 2, 1), 1);
    }

    #[test]
    fn test_label_validation() {
        let mut options = TriggerOptions::default();
        assert!(options.validate().is_ok());

        options.labels[3] = String::new();
        assert!(matches!(options.validate(), Err(EdfError::InvalidArgument(_))));

        options.labels[3] = "Trigger Input 1".to_string();
        let err = options.validate().unwrap_err();
        assert!(err.to_string().contains("1 and 4"));

        options.labels[3] = "A label that is far too long".to_string();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_max_divisor_validation() {
        let mut options = TriggerOptions::default();
        for divisor in [1, 2, 16, 32] {
            options.max_divisor = divisor;
            assert!(options.validate().is_ok());
        }
        // 超过 32 时 32 Hz 的子记录没有样本; 非 2 的幂不能整除采样率
        for divisor in [0, -4, 3, 24, 64, 256] {
            options.max_divisor = divisor;
            assert!(matches!(options.validate(), Err(EdfError::InvalidArgument(_))));
        }
    }
}
