use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::header::HeaderBuffer;
use crate::types::{Annotation, FileType, SignalParam};
use crate::error::{EdfError, Result};
use crate::utils::format_edf_time;
use crate::EDFLIB_TIME_DIMENSION;

/// Maximum number of annotation channels (matches edflib)
const EDFLIB_MAX_ANNOTATION_CHANNELS: usize = 64;

/// Bytes reserved for TALs per annotation channel in every data record
const EDFLIB_ANNOTATION_BYTES: usize = 120;

/// Descriptions longer than this are truncated when the TAL is packed
const EDFLIB_WRITE_MAX_ANNOTATION_LEN: usize = 40;

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// An output file that is deleted when dropped before being committed
///
/// Every conversion writes through one of these, so a conversion that fails
/// or is cancelled never leaves a partially written file behind.
#[derive(Debug)]
pub struct PendingOutput {
    path: PathBuf,
    committed: bool,
}

impl PendingOutput {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        PendingOutput {
            path: path.as_ref().to_path_buf(),
            committed: false,
        }
    }

    /// Keeps the file on disk
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PendingOutput {
    fn drop(&mut self) {
        if !self.committed && fs::remove_file(&self.path).is_ok() {
            log::debug!("discarded incomplete output {}", self.path.display());
        }
    }
}

/// Counts reported by [`EdfWriter::close`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub datarecords: i64,
    pub annotations_written: usize,
    pub annotations_dropped: usize,
}

/// Writer for EDF, EDF+, BDF and BDF+ files
///
/// The channel count and file type are fixed at creation; every channel then
/// has to be described with the per-channel setters before the first record
/// is written, which is when the header goes to disk. Records are written as
/// digital values. Annotations can be added at any time before [`close`] and
/// are packed into the annotation signals when the file is closed.
///
/// A writer that is dropped without `close()` deletes its file.
///
/// [`close`]: EdfWriter::close
///
/// # Examples
///
/// ```rust
/// use edfconv::{EdfReader, EdfWriter, FileType};
///
/// let mut writer = EdfWriter::create("writer_doc.edf", FileType::EdfPlus, 1)?;
/// writer.set_label(0, "EEG Fp1")?;
/// writer.set_sample_frequency(0, 256)?;
/// writer.set_physical_maximum(0, 200.0)?;
/// writer.set_physical_minimum(0, -200.0)?;
/// writer.set_digital_maximum(0, 32767)?;
/// writer.set_digital_minimum(0, -32768)?;
/// writer.set_physical_dimension(0, "uV")?;
///
/// for _ in 0..10 {
///     writer.write_digital_record(&[0; 256])?;
/// }
/// writer.write_annotation(20_000_000, None, "Eyes closed")?;
/// writer.close()?;
///
/// let reader = EdfReader::open("writer_doc.edf")?;
/// assert_eq!(reader.header().datarecords_in_file, 10);
/// assert_eq!(reader.annotations()[0].description, "Eyes closed");
/// # std::fs::remove_file("writer_doc.edf").ok();
/// # Ok::<(), edfconv::EdfError>(())
/// ```
pub struct EdfWriter {
    file: BufWriter<File>,
    guard: PendingOutput,
    file_type: FileType,
    signals: Vec<SignalParam>,
    start: NaiveDateTime,
    datarecord_duration: i64,
    records_written: i64,
    header_written: bool,
    header_size: usize,
    record_size: usize,

    // EDF+ 字段
    sex: String,
    patient_name: String,
    equipment: String,
    recording_additional: String,

    // 注释存储, 在 close 时写入
    annotations: Vec<Annotation>,
    nr_annot_chns: usize,
}

impl EdfWriter {
    /// Creates (or truncates) `path` for a recording with `signal_count` signals
    ///
    /// Annotation signals are not part of `signal_count`; EDF+ and BDF+ files
    /// get one by default, see [`set_number_of_annotation_signals`].
    ///
    /// # Errors
    ///
    /// * `EdfError::InvalidSignalCount` - `signal_count` is 0 or too large
    /// * `EdfError::FileNotFound` - The file cannot be created
    ///
    /// [`set_number_of_annotation_signals`]: EdfWriter::set_number_of_annotation_signals
    pub fn create<P: AsRef<Path>>(path: P, file_type: FileType, signal_count: usize) -> Result<Self> {
        if signal_count == 0 || signal_count > crate::EDFLIB_MAXSIGNALS {
            return Err(EdfError::InvalidSignalCount(signal_count as i32));
        }

        let file = File::create(&path)
            .map_err(|e| EdfError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;
        let guard = PendingOutput::new(&path);

        let (digital_min, digital_max) = file_type.digital_limits();
        let signal = SignalParam {
            label: String::new(),
            samples_in_file: 0,
            physical_max: 0.0,
            physical_min: 0.0,
            digital_max,
            digital_min,
            samples_per_record: 0,
            physical_dimension: String::new(),
            prefilter: String::new(),
            transducer: String::new(),
            annotation: false,
        };

        // 默认开始时间 1985-01-01 00:00:00
        let start = NaiveDate::from_ymd_opt(1985, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| EdfError::InvalidArgument("default start time".to_string()))?;

        Ok(EdfWriter {
            file: BufWriter::new(file),
            guard,
            file_type,
            signals: vec![signal; signal_count],
            start,
            datarecord_duration: EDFLIB_TIME_DIMENSION,
            records_written: 0,
            header_written: false,
            header_size: 0,
            record_size: 0,
            sex: "X".to_string(),
            patient_name: "X".to_string(),
            equipment: "X".to_string(),
            recording_additional: String::new(),
            annotations: Vec::new(),
            nr_annot_chns: if file_type.is_plus() { 1 } else { 0 },
        })
    }

    fn signal_mut(&mut self, signal: usize) -> Result<&mut SignalParam> {
        if self.header_written {
            return Err(EdfError::InvalidFormat("Cannot modify a signal after writing header".to_string()));
        }
        self.signals.get_mut(signal).ok_or(EdfError::InvalidSignalIndex(signal))
    }

    fn check_header_pending(&self) -> Result<()> {
        if self.header_written {
            return Err(EdfError::InvalidFormat("Cannot modify header after writing header".to_string()));
        }
        Ok(())
    }

    /// Samples of `signal` in one data record (the sample rate for 1 s records)
    pub fn set_sample_frequency(&mut self, signal: usize, samples_per_record: i32) -> Result<()> {
        if samples_per_record < 1 {
            return Err(EdfError::InvalidArgument(format!(
                "Samples per record must be positive, got {}", samples_per_record
            )));
        }
        self.signal_mut(signal)?.samples_per_record = samples_per_record;
        Ok(())
    }

    pub fn set_physical_maximum(&mut self, signal: usize, value: f64) -> Result<()> {
        self.signal_mut(signal)?.physical_max = value;
        Ok(())
    }

    pub fn set_physical_minimum(&mut self, signal: usize, value: f64) -> Result<()> {
        self.signal_mut(signal)?.physical_min = value;
        Ok(())
    }

    pub fn set_digital_maximum(&mut self, signal: usize, value: i32) -> Result<()> {
        let (_, limit) = self.file_type.digital_limits();
        if value > limit {
            return Err(EdfError::InvalidArgument(format!("Digital maximum {} exceeds {}", value, limit)));
        }
        self.signal_mut(signal)?.digital_max = value;
        Ok(())
    }

    pub fn set_digital_minimum(&mut self, signal: usize, value: i32) -> Result<()> {
        let (limit, _) = self.file_type.digital_limits();
        if value < limit {
            return Err(EdfError::InvalidArgument(format!("Digital minimum {} is below {}", value, limit)));
        }
        self.signal_mut(signal)?.digital_min = value;
        Ok(())
    }

    pub fn set_label(&mut self, signal: usize, label: &str) -> Result<()> {
        self.signal_mut(signal)?.label = label.to_string();
        Ok(())
    }

    pub fn set_prefilter(&mut self, signal: usize, prefilter: &str) -> Result<()> {
        self.signal_mut(signal)?.prefilter = prefilter.to_string();
        Ok(())
    }

    pub fn set_transducer(&mut self, signal: usize, transducer: &str) -> Result<()> {
        self.signal_mut(signal)?.transducer = transducer.to_string();
        Ok(())
    }

    pub fn set_physical_dimension(&mut self, signal: usize, dimension: &str) -> Result<()> {
        self.signal_mut(signal)?.physical_dimension = dimension.to_string();
        Ok(())
    }

    /// Copies every header field of `param` onto `signal`
    pub fn set_signal_param(&mut self, signal: usize, param: &SignalParam) -> Result<()> {
        let target = self.signal_mut(signal)?;
        target.label = param.label.clone();
        target.transducer = param.transducer.clone();
        target.physical_dimension = param.physical_dimension.clone();
        target.physical_min = param.physical_min;
        target.physical_max = param.physical_max;
        target.digital_min = param.digital_min;
        target.digital_max = param.digital_max;
        target.prefilter = param.prefilter.clone();
        target.samples_per_record = param.samples_per_record;
        Ok(())
    }

    /// Sets the recording start; EDF+ dates are limited to 1985..=2084
    pub fn set_start_datetime(&mut self, start: NaiveDateTime) -> Result<()> {
        self.check_header_pending()?;
        if !(1985..=2084).contains(&start.year()) {
            return Err(EdfError::InvalidArgument(format!(
                "Start year {} outside 1985..2084", start.year()
            )));
        }
        self.start = start;
        Ok(())
    }

    pub fn set_patient_name(&mut self, name: &str) -> Result<()> {
        self.check_header_pending()?;
        self.patient_name = name.to_string();
        Ok(())
    }

    /// "M", "F" or anything else for unknown
    pub fn set_sex(&mut self, sex: &str) -> Result<()> {
        self.check_header_pending()?;
        self.sex = match sex {
            "M" | "F" => sex.to_string(),
            _ => "X".to_string(),
        };
        Ok(())
    }

    pub fn set_equipment(&mut self, equipment: &str) -> Result<()> {
        self.check_header_pending()?;
        self.equipment = equipment.to_string();
        Ok(())
    }

    pub fn set_recording_additional(&mut self, additional: &str) -> Result<()> {
        self.check_header_pending()?;
        self.recording_additional = additional.to_string();
        Ok(())
    }

    /// Sets the data record duration in units of 100 ns
    ///
    /// Accepted range is 100 µs to 60 s.
    ///
    /// ```rust
    /// use edfconv::{EdfWriter, FileType, EDFLIB_TIME_DIMENSION};
    ///
    /// let mut writer = EdfWriter::create("duration_doc.bdf", FileType::BdfPlus, 1)?;
    /// writer.set_datarecord_duration(EDFLIB_TIME_DIMENSION / 32)?;
    /// assert!(writer.set_datarecord_duration(0).is_err());
    /// # Ok::<(), edfconv::EdfError>(())
    /// ```
    pub fn set_datarecord_duration(&mut self, duration: i64) -> Result<()> {
        self.check_header_pending()?;
        if !(1000..=60 * EDFLIB_TIME_DIMENSION).contains(&duration) {
            return Err(EdfError::InvalidArgument(format!(
                "Data record duration must be between 0.0001 and 60 seconds, got {}",
                format_edf_time(duration)
            )));
        }
        self.datarecord_duration = duration;
        Ok(())
    }

    /// Sets the number of annotation signals (1-64, EDF+/BDF+ only)
    pub fn set_number_of_annotation_signals(&mut self, annot_signals: usize) -> Result<()> {
        self.check_header_pending()?;
        if !self.file_type.is_plus() {
            return Err(EdfError::InvalidArgument("Only EDF+ and BDF+ files carry annotation signals".to_string()));
        }
        if annot_signals == 0 || annot_signals > EDFLIB_MAX_ANNOTATION_CHANNELS {
            return Err(EdfError::InvalidArgument(format!(
                "Annotation signals must be 1-{}, got {}",
                EDFLIB_MAX_ANNOTATION_CHANNELS, annot_signals
            )));
        }
        self.nr_annot_chns = annot_signals;
        Ok(())
    }

    fn annotation_samples_per_record(&self) -> usize {
        EDFLIB_ANNOTATION_BYTES / self.file_type.bytes_per_sample()
    }

    /// Byte offset of the annotation signals inside a data record
    fn annotation_offset(&self) -> usize {
        self.record_size - self.nr_annot_chns * EDFLIB_ANNOTATION_BYTES
    }

    fn validate_signals(&self) -> Result<()> {
        for (i, signal) in self.signals.iter().enumerate() {
            if signal.samples_per_record < 1 {
                return Err(EdfError::InvalidArgument(format!("Signal {} has no sample frequency", i)));
            }
            if signal.physical_min == signal.physical_max {
                return Err(EdfError::PhysicalMinEqualsMax);
            }
            if signal.digital_min >= signal.digital_max {
                return Err(EdfError::DigitalMinEqualsMax);
            }
        }
        Ok(())
    }

    /// 写入头部
    fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        self.validate_signals()?;

        let bytes_per_sample = self.file_type.bytes_per_sample();
        let total_signals = self.signals.len() + self.nr_annot_chns;
        self.header_size = (total_signals + 1) * 256;
        self.record_size = self.signals
            .iter()
            .map(|s| s.samples_per_record as usize * bytes_per_sample)
            .sum::<usize>()
            + self.nr_annot_chns * EDFLIB_ANNOTATION_BYTES;

        let mut buf = HeaderBuffer::with_capacity(self.header_size);
        buf.push_version(self.file_type);
        buf.push_text(&self.patient_field(), 80);
        buf.push_text(&self.recording_field(), 80);

        // 开始日期 "dd.mm.yy" 和开始时间 "hh.mm.ss"
        buf.push_text(&format!("{:02}.{:02}.{:02}",
            self.start.day(), self.start.month(), self.start.year() % 100), 8);
        buf.push_text(&format!("{:02}.{:02}.{:02}",
            self.start.hour(), self.start.minute(), self.start.second()), 8);

        buf.push_int(self.header_size as i64, 8);
        match self.file_type {
            FileType::EdfPlus => buf.push_text("EDF+C", 44),
            FileType::BdfPlus => buf.push_text("BDF+C", 44),
            _ => buf.push_spaces(44),
        }
        // 记录数在 close 时回填
        buf.push_int(0, 8);
        buf.push_text(&format_edf_time(self.datarecord_duration), 8);
        buf.push_int(total_signals as i64, 4);

        let (annot_digital_min, annot_digital_max) = self.file_type.digital_limits();
        let annotation_label = if self.file_type.is_bdf() { "BDF Annotations" } else { "EDF Annotations" };
        let annotations = self.nr_annot_chns;

        // 按字段写入，每个字段所有信号一起写
        for signal in &self.signals {
            buf.push_text(&signal.label, 16);
        }
        for _ in 0..annotations {
            buf.push_text(annotation_label, 16);
        }
        for signal in &self.signals {
            buf.push_text(&signal.transducer, 80);
        }
        buf.push_spaces(80 * annotations);
        for signal in &self.signals {
            buf.push_text(&signal.physical_dimension, 8);
        }
        buf.push_spaces(8 * annotations);
        for signal in &self.signals {
            buf.push_number(signal.physical_min, 8);
        }
        for _ in 0..annotations {
            buf.push_number(-1.0, 8);
        }
        for signal in &self.signals {
            buf.push_number(signal.physical_max, 8);
        }
        for _ in 0..annotations {
            buf.push_number(1.0, 8);
        }
        for signal in &self.signals {
            buf.push_int(signal.digital_min as i64, 8);
        }
        for _ in 0..annotations {
            buf.push_int(annot_digital_min as i64, 8);
        }
        for signal in &self.signals {
            buf.push_int(signal.digital_max as i64, 8);
        }
        for _ in 0..annotations {
            buf.push_int(annot_digital_max as i64, 8);
        }
        for signal in &self.signals {
            buf.push_text(&signal.prefilter, 80);
        }
        buf.push_spaces(80 * annotations);
        for signal in &self.signals {
            buf.push_int(signal.samples_per_record as i64, 8);
        }
        for _ in 0..annotations {
            buf.push_int(self.annotation_samples_per_record() as i64, 8);
        }
        buf.push_spaces(32 * total_signals);

        debug_assert_eq!(buf.len(), self.header_size);
        self.file.write_all(&buf.into_bytes())?;
        self.header_written = true;
        Ok(())
    }

    /// 患者字段: "code sex birthdate name additional"
    fn patient_field(&self) -> String {
        if !self.file_type.is_plus() {
            return self.patient_name.clone();
        }
        format!("X {} X {}", self.sex, subfield(&self.patient_name))
    }

    /// 记录字段: "Startdate dd-MMM-yyyy admincode technician equipment additional"
    fn recording_field(&self) -> String {
        if !self.file_type.is_plus() {
            return self.recording_additional.clone();
        }
        let mut field = format!(
            "Startdate {:02}-{}-{} X X {}",
            self.start.day(),
            MONTHS[self.start.month0() as usize],
            self.start.year(),
            subfield(&self.equipment),
        );
        if !self.recording_additional.is_empty() {
            field.push(' ');
            field.push_str(&self.recording_additional);
        }
        field
    }

    /// Writes one data record of digital samples
    ///
    /// `samples` holds the samples of every signal back to back, in signal
    /// order, `samples_per_record` of each. Values outside a signal's digital
    /// range are clamped.
    pub fn write_digital_record(&mut self, samples: &[i32]) -> Result<()> {
        self.write_header()?;

        let expected: usize = self.signals.iter().map(|s| s.samples_per_record as usize).sum();
        if samples.len() != expected {
            return Err(EdfError::InvalidArgument(format!(
                "Data record needs {} samples, got {}", expected, samples.len()
            )));
        }

        let bytes_per_sample = self.file_type.bytes_per_sample();
        let mut record = Vec::with_capacity(self.record_size);

        let mut remaining = samples;
        for signal in &self.signals {
            let (chunk, rest) = remaining.split_at(signal.samples_per_record as usize);
            remaining = rest;
            for &value in chunk {
                let value = value.clamp(signal.digital_min, signal.digital_max);
                record.extend_from_slice(&value.to_le_bytes()[..bytes_per_sample]);
            }
        }

        // 注释信号: 第一个通道写入时间戳 TAL
        for channel in 0..self.nr_annot_chns {
            let mut block = Vec::with_capacity(EDFLIB_ANNOTATION_BYTES);
            if channel == 0 {
                push_timekeeping_tal(&mut block, self.records_written * self.datarecord_duration);
            }
            block.resize(EDFLIB_ANNOTATION_BYTES, 0);
            record.extend_from_slice(&block);
        }

        self.file.write_all(&record)?;
        self.records_written += 1;
        Ok(())
    }

    /// Queues an annotation; onset and duration are in units of 100 ns
    ///
    /// Annotations are written at [`close`](EdfWriter::close), in the order
    /// they were added, so they may be queued before or after the records
    /// they refer to.
    pub fn write_annotation(&mut self, onset: i64, duration: Option<i64>, description: &str) -> Result<()> {
        if self.nr_annot_chns == 0 {
            return Err(EdfError::InvalidArgument("File type has no annotation signals".to_string()));
        }
        if onset < 0 {
            return Err(EdfError::InvalidArgument("Annotation onset cannot be negative".to_string()));
        }
        if duration.is_some_and(|d| d < 0) {
            return Err(EdfError::InvalidArgument("Annotation duration cannot be negative".to_string()));
        }
        if description.is_empty() {
            return Err(EdfError::InvalidArgument("Annotation description cannot be empty".to_string()));
        }

        self.annotations.push(Annotation::new(onset, duration, description));
        Ok(())
    }

    /// Packs the queued annotations, completes the header and keeps the file
    ///
    /// # Errors
    ///
    /// Any I/O error; the file is removed in that case.
    pub fn close(mut self) -> Result<WriteSummary> {
        self.write_header()?;
        self.file.flush()?;

        let (written, dropped) = self.pack_annotations()?;
        if dropped > 0 {
            log::warn!(
                "{} of {} annotations did not fit into {} data records and were dropped",
                dropped, self.annotations.len(), self.records_written
            );
        }

        // 更新数据记录数 (236-244字节)
        self.file.seek(SeekFrom::Start(236))?;
        let mut count = HeaderBuffer::with_capacity(8);
        count.push_int(self.records_written, 8);
        self.file.write_all(&count.into_bytes())?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;

        self.guard.commit();

        Ok(WriteSummary {
            datarecords: self.records_written,
            annotations_written: written,
            annotations_dropped: dropped,
        })
    }

    /// Rewrites the annotation signals of as many records as the queue needs
    fn pack_annotations(&mut self) -> Result<(usize, usize)> {
        if self.annotations.is_empty() || self.nr_annot_chns == 0 {
            return Ok((0, 0));
        }

        let annotation_offset = self.annotation_offset();
        let mut next = 0;

        for record in 0..self.records_written {
            if next == self.annotations.len() {
                break;
            }

            let mut area = Vec::with_capacity(EDFLIB_ANNOTATION_BYTES * self.nr_annot_chns);
            for channel in 0..self.nr_annot_chns {
                let mut block = Vec::with_capacity(EDFLIB_ANNOTATION_BYTES);
                if channel == 0 {
                    push_timekeeping_tal(&mut block, record * self.datarecord_duration);
                }
                while let Some(annotation) = self.annotations.get(next) {
                    let tal = annotation_tal(annotation);
                    if block.len() + tal.len() > EDFLIB_ANNOTATION_BYTES {
                        break;
                    }
                    block.extend_from_slice(&tal);
                    next += 1;
                }
                block.resize(EDFLIB_ANNOTATION_BYTES, 0);
                area.extend_from_slice(&block);
            }

            let position = self.header_size as u64
                + record as u64 * self.record_size as u64
                + annotation_offset as u64;
            self.file.seek(SeekFrom::Start(position))?;
            self.file.write_all(&area)?;
        }

        Ok((next, self.annotations.len() - next))
    }
}

/// 子字段中的空格替换为 '_'
fn subfield(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        "X".to_string()
    } else {
        text.replace(' ', "_")
    }
}

fn push_timekeeping_tal(block: &mut Vec<u8>, onset: i64) {
    block.push(b'+');
    block.extend_from_slice(format_edf_time(onset).as_bytes());
    block.extend_from_slice(&[0x14, 0x14, 0x00]);
}

/// 格式: "+<onset>[\x15<duration>]\x14<description>\x14\x00"
fn annotation_tal(annotation: &Annotation) -> Vec<u8> {
    let mut tal = Vec::with_capacity(EDFLIB_WRITE_MAX_ANNOTATION_LEN + 40);
    tal.push(if annotation.onset < 0 { b'-' } else { b'+' });
    tal.extend_from_slice(format_edf_time(annotation.onset).as_bytes());
    if let Some(duration) = annotation.duration {
        tal.push(0x15);
        tal.extend_from_slice(format_edf_time(duration).as_bytes());
    }
    tal.push(0x14);

    // 截断过长的描述, 不拆分 UTF-8 字符
    let mut end = annotation.description.len().min(EDFLIB_WRITE_MAX_ANNOTATION_LEN);
    while !annotation.description.is_char_boundary(end) {
        end -= 1;
    }
    tal.extend_from_slice(annotation.description[..end].as_bytes());
    tal.extend_from_slice(&[0x14, 0x00]);
    tal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EdfReader;

    fn configure(writer: &mut EdfWriter, samples: i32) {
        writer.set_label(0, "Test").unwrap();
        writer.set_sample_frequency(0, samples).unwrap();
        writer.set_physical_maximum(0, 100.0).unwrap();
        writer.set_physical_minimum(0, -100.0).unwrap();
    }

    #[test]
    fn test_annotation_tal() {
        let tal = annotation_tal(&Annotation::new(15_000_000, Some(20_000_000), "Artifact"));
        assert_eq!(tal, b"+1.5\x152\x14Artifact\x14\x00".to_vec());

        let long = "x".repeat(60);
        let tal = annotation_tal(&Annotation::new(0, None, &long));
        assert_eq!(tal.len(), 2 + 1 + 40 + 2);
    }

    #[test]
    fn test_dropped_writer_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.edf");
        {
            let mut writer = EdfWriter::create(&path, FileType::EdfPlus, 1).unwrap();
            configure(&mut writer, 10);
            writer.write_digital_record(&[0; 10]).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_modification_after_header_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EdfWriter::create(dir.path().join("locked.edf"), FileType::EdfPlus, 1).unwrap();
        configure(&mut writer, 10);
        writer.write_digital_record(&[0; 10]).unwrap();

        assert!(writer.set_label(0, "Late").is_err());
        assert!(writer.set_number_of_annotation_signals(2).is_err());
        assert!(writer.set_datarecord_duration(EDFLIB_TIME_DIMENSION / 2).is_err());
    }

    #[test]
    fn test_bdf_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.bdf");
        let mut writer = EdfWriter::create(&path, FileType::BdfPlus, 1).unwrap();
        configure(&mut writer, 4);
        writer.write_digital_record(&[1, -1, 9_000_000, -9_000_000]).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 3 * 256 + 4 * 3 + 120);
        assert_eq!(&bytes[0..8], b"\xffBIOSEMI");
        assert_eq!(&bytes[192..197], b"BDF+C");
        assert_eq!(&bytes[236..244], b"1       ");
        let data = &bytes[768..];
        assert_eq!(&data[0..3], &[1, 0, 0]);
        assert_eq!(&data[3..6], &[0xff, 0xff, 0xff]);
        assert_eq!(&data[6..9], &[0xff, 0xff, 0x7f]);
        assert_eq!(&data[9..12], &[0x00, 0x00, 0x80]);
        assert!(data[12..].starts_with(b"+0\x14\x14\x00"));
    }

    #[test]
    fn test_annotation_overflow_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overflow.edf");
        let mut writer = EdfWriter::create(&path, FileType::EdfPlus, 1).unwrap();
        configure(&mut writer, 10);
        writer.write_digital_record(&[0; 10]).unwrap();
        for i in 0..20 {
            writer.write_annotation(i, None, "a fairly long event description").unwrap();
        }
        let summary = writer.close().unwrap();
        assert_eq!(summary.annotations_written + summary.annotations_dropped, 20);
        assert!(summary.annotations_dropped > 0);

        let reader = EdfReader::open(&path).unwrap();
        assert_eq!(reader.annotations().len(), summary.annotations_written);
    }

    #[test]
    fn test_start_year_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EdfWriter::create(dir.path().join("year.edf"), FileType::EdfPlus, 1).unwrap();
        let early = NaiveDate::from_ymd_opt(1984, 12, 31).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert!(writer.set_start_datetime(early).is_err());
        let late = NaiveDate::from_ymd_opt(2084, 12, 31).unwrap().and_hms_opt(23, 59, 59).unwrap();
        assert!(writer.set_start_datetime(late).is_ok());
    }
}
