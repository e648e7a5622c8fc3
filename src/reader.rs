use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use chrono::{NaiveDate, NaiveTime};

use crate::types::{Annotation, EdfHeader, FileType, SignalParam};
use crate::error::{EdfError, Result};
use crate::utils::{atoi_nonlocalized, atof_nonlocalized, is_integer_number, parse_edf_time};

/// Reader for EDF, EDF+, BDF and BDF+ recordings
///
/// The reader validates the header when the file is opened and keeps one
/// sample cursor per signal plus a record cursor for whole-record access.
/// Annotation signals are part of [`EdfHeader::signals`] (flagged with
/// `annotation`); their TALs are decoded once at open time and returned by
/// [`EdfReader::annotations`].
///
/// # Examples
///
/// ```rust
/// use edfconv::EdfReader;
///
/// # edfconv::doctest_utils::create_simple_test_file("reader_doc.edf")?;
/// let mut reader = EdfReader::open("reader_doc.edf")?;
///
/// let header = reader.header();
/// println!("Records: {} x {:.3} s", header.datarecords_in_file,
///     header.datarecord_duration as f64 / 10_000_000.0);
///
/// let samples = reader.read_physical_samples(0, 256)?;
/// assert_eq!(samples.len(), 256);
/// # std::fs::remove_file("reader_doc.edf").ok();
/// # Ok::<(), edfconv::EdfError>(())
/// ```
#[derive(Debug)]
pub struct EdfReader {
    file: BufReader<File>,
    header: EdfHeader,
    /// 原始主头部 (256 字节)
    main_header: Vec<u8>,
    /// 每个信号在数据记录中的字节偏移
    signal_offsets: Vec<usize>,
    /// 当前每个信号的样本位置指针
    sample_positions: Vec<i64>,
    /// 顺序读取数据记录的游标
    record_cursor: i64,
    annotations: Vec<Annotation>,
}

impl EdfReader {
    /// Opens a recording read-only and validates its header
    ///
    /// # Errors
    ///
    /// * `EdfError::FileNotFound` - File doesn't exist or can't be opened
    /// * `EdfError::UnsupportedFileType` - Neither an EDF nor a BDF signature
    /// * `EdfError::InvalidHeader` - Header size does not match the signal count
    /// * `EdfError::InvalidSignalCount` - Invalid number of signals
    /// * `EdfError::InvalidFormat` - A header field cannot be parsed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .map_err(|e| EdfError::FileNotFound(format!("{}: {}", path.as_ref().display(), e)))?;
        let file_len = file.metadata()?.len();

        let mut reader = BufReader::new(file);

        let mut main_header = vec![0u8; 256];
        reader.read_exact(&mut main_header)
            .map_err(|_| EdfError::InvalidFormat("File is shorter than a header".to_string()))?;

        let (header, signal_offsets) = Self::parse_header(&mut reader, &main_header, file_len)?;

        let sample_positions = vec![0i64; header.signals.len()];

        let mut edf_reader = EdfReader {
            file: reader,
            header,
            main_header,
            signal_offsets,
            sample_positions,
            record_cursor: 0,
            annotations: Vec::new(),
        };

        if edf_reader.header.file_type.is_plus() {
            edf_reader.annotations = edf_reader.read_annotations()?;
        }

        Ok(edf_reader)
    }

    pub fn header(&self) -> &EdfHeader {
        &self.header
    }

    /// The 256-byte main header exactly as stored in the file
    pub fn main_header_bytes(&self) -> &[u8] {
        &self.main_header
    }

    /// Annotations found in the annotation signals, timekeeping TALs excluded
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Byte offset of a signal inside one data record
    pub fn signal_record_offset(&self, signal: usize) -> Result<usize> {
        self.signal_offsets
            .get(signal)
            .copied()
            .ok_or(EdfError::InvalidSignalIndex(signal))
    }

    /// Reads physical values (digital values scaled by the signal's calibration)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use edfconv::EdfReader;
    ///
    /// # edfconv::doctest_utils::create_simple_test_file("physical_doc.edf")?;
    /// let mut reader = EdfReader::open("physical_doc.edf")?;
    /// let samples = reader.read_physical_samples(0, 256)?;
    /// let max = samples.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    /// assert!(max <= reader.header().signals[0].physical_max);
    /// # std::fs::remove_file("physical_doc.edf").ok();
    /// # Ok::<(), edfconv::EdfError>(())
    /// ```
    pub fn read_physical_samples(&mut self, signal: usize, count: usize) -> Result<Vec<f64>> {
        let digital_samples = self.read_digital_samples(signal, count)?;

        let signal_param = &self.header.signals[signal];
        let physical_samples = digital_samples
            .into_iter()
            .map(|d| signal_param.to_physical(d))
            .collect();

        Ok(physical_samples)
    }

    /// Reads raw digital values from the current position of a signal's cursor
    ///
    /// Values are decoded from 2-byte (EDF) or 3-byte (BDF) little-endian
    /// samples and limited to the signal's digital range. Fewer than `count`
    /// samples are returned at the end of the file.
    pub fn read_digital_samples(&mut self, signal: usize, count: usize) -> Result<Vec<i32>> {
        if signal >= self.header.signals.len() {
            return Err(EdfError::InvalidSignalIndex(signal));
        }

        if count == 0 {
            return Ok(Vec::new());
        }

        let bytes_per_sample = self.header.file_type.bytes_per_sample();
        let signal_param = &self.header.signals[signal];
        let samples_per_record = signal_param.samples_per_record as i64;
        let (digital_min, digital_max) = (signal_param.digital_min, signal_param.digital_max);

        // 计算可读取的最大样本数
        let samples_in_file = samples_per_record * self.header.datarecords_in_file;
        let available_samples = (samples_in_file - self.sample_positions[signal]).max(0) as usize;
        let actual_count = count.min(available_samples);

        let mut samples = Vec::with_capacity(actual_count);
        let mut chunk = Vec::new();

        while samples.len() < actual_count {
            let current_pos = self.sample_positions[signal];
            let record_index = current_pos / samples_per_record;
            let sample_in_record = current_pos % samples_per_record;

            let file_offset = self.header.header_size as u64
                + record_index as u64 * self.header.record_size as u64
                + self.signal_offsets[signal] as u64
                + sample_in_record as u64 * bytes_per_sample as u64;

            self.file.seek(SeekFrom::Start(file_offset))?;

            let samples_in_current_record = (samples_per_record - sample_in_record) as usize;
            let samples_to_read = (actual_count - samples.len()).min(samples_in_current_record);

            chunk.resize(samples_to_read * bytes_per_sample, 0);
            self.file.read_exact(&mut chunk)?;

            for raw in chunk.chunks_exact(bytes_per_sample) {
                let value = decode_sample(raw);
                samples.push(value.clamp(digital_min, digital_max));
            }

            self.sample_positions[signal] = current_pos + samples_to_read as i64;
        }

        Ok(samples)
    }

    /// 设置指定信号的样本位置
    pub fn seek(&mut self, signal: usize, position: i64) -> Result<i64> {
        if signal >= self.header.signals.len() {
            return Err(EdfError::InvalidSignalIndex(signal));
        }

        let signal_param = &self.header.signals[signal];
        let max_position = signal_param.samples_per_record as i64 * self.header.datarecords_in_file;

        let new_position = position.clamp(0, max_position);
        self.sample_positions[signal] = new_position;

        Ok(new_position)
    }

    /// 获取指定信号的当前样本位置
    pub fn tell(&self, signal: usize) -> Result<i64> {
        self.sample_positions
            .get(signal)
            .copied()
            .ok_or(EdfError::InvalidSignalIndex(signal))
    }

    /// 将指定信号的位置重置到开头
    pub fn rewind(&mut self, signal: usize) -> Result<()> {
        self.seek(signal, 0)?;
        Ok(())
    }

    /// Reads the raw bytes of one data record into `buf`
    ///
    /// `buf` must be exactly `record_size` bytes long.
    pub fn read_record(&mut self, index: i64, buf: &mut [u8]) -> Result<()> {
        if index < 0 || index >= self.header.datarecords_in_file {
            return Err(EdfError::InvalidFormat(format!(
                "Data record {} out of range (0..{})",
                index, self.header.datarecords_in_file
            )));
        }
        if buf.len() != self.header.record_size {
            return Err(EdfError::InvalidArgument(format!(
                "Record buffer is {} bytes, records are {} bytes",
                buf.len(), self.header.record_size
            )));
        }

        let offset = self.header.header_size as u64 + index as u64 * self.header.record_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Reads the record under the record cursor and advances it
    ///
    /// Returns `Ok(false)` once every record has been read.
    pub fn read_next_record(&mut self, buf: &mut [u8]) -> Result<bool> {
        if self.record_cursor >= self.header.datarecords_in_file {
            return Ok(false);
        }
        self.read_record(self.record_cursor, buf)?;
        self.record_cursor += 1;
        Ok(true)
    }

    pub fn rewind_records(&mut self) {
        self.record_cursor = 0;
    }

    /// 解析文件头部
    fn parse_header(
        reader: &mut BufReader<File>,
        main_header: &[u8],
        file_len: u64,
    ) -> Result<(EdfHeader, Vec<usize>)> {
        let is_bdf = main_header[0] == 0xff && &main_header[1..8] == b"BIOSEMI";
        if !is_bdf && &main_header[0..8] != b"0       " {
            let version = String::from_utf8_lossy(&main_header[0..8]);
            return Err(EdfError::UnsupportedFileType(format!("Not an EDF or BDF file: {}", version)));
        }

        // 解析信号数量
        let signals_str = String::from_utf8_lossy(&main_header[252..256]);
        if !is_integer_number(&signals_str) {
            return Err(EdfError::InvalidFormat(format!("Number of signals field: {}", signals_str)));
        }
        let total_signal_count = atoi_nonlocalized(&signals_str);
        if total_signal_count < 1 || total_signal_count > crate::EDFLIB_MAXSIGNALS as i32 {
            return Err(EdfError::InvalidSignalCount(total_signal_count));
        }

        // 验证头部大小
        let header_size_str = String::from_utf8_lossy(&main_header[184..192]);
        let header_size = (total_signal_count as usize + 1) * 256;
        if atoi_nonlocalized(&header_size_str) != header_size as i32 {
            return Err(EdfError::InvalidHeader);
        }

        // 检查 EDF+/BDF+ 标识
        let reserved = &main_header[192..236];
        let is_plus = reserved.starts_with(b"EDF+") || reserved.starts_with(b"BDF+");
        let discontinuous = is_plus && reserved[4] == b'D';
        let file_type = match (is_bdf, is_plus) {
            (false, false) => FileType::Edf,
            (false, true) => FileType::EdfPlus,
            (true, false) => FileType::Bdf,
            (true, true) => FileType::BdfPlus,
        };

        let patient = String::from_utf8_lossy(&main_header[8..88]).trim_end().to_string();
        let recording = String::from_utf8_lossy(&main_header[88..168]).trim_end().to_string();

        let date_str = String::from_utf8_lossy(&main_header[168..176]);
        let time_str = String::from_utf8_lossy(&main_header[176..184]);
        let (start_date, start_time) = Self::parse_datetime(&date_str, &time_str)?;

        let duration_str = String::from_utf8_lossy(&main_header[244..252]);
        let datarecord_duration = parse_edf_time(&duration_str)?;
        if datarecord_duration < 0 {
            return Err(EdfError::InvalidFormat(format!("Data record duration: {}", duration_str)));
        }

        // 读取信号头部信息
        let mut signal_header = vec![0u8; total_signal_count as usize * 256];
        reader.read_exact(&mut signal_header)
            .map_err(|_| EdfError::InvalidFormat("Signal headers are truncated".to_string()))?;

        let (mut signals, signal_offsets, record_size) = Self::parse_signals(
            &signal_header,
            total_signal_count as usize,
            file_type,
        )?;

        if record_size == 0 {
            return Err(EdfError::InvalidFormat("Data records are empty".to_string()));
        }

        // 解析数据记录数, -1 表示记录数未知, 由文件大小推算
        let datarecords_str = String::from_utf8_lossy(&main_header[236..244]);
        if !is_integer_number(&datarecords_str) {
            return Err(EdfError::InvalidFormat(format!("Number of data records field: {}", datarecords_str)));
        }
        let available = (file_len.saturating_sub(header_size as u64) / record_size as u64) as i64;
        let mut datarecords = atoi_nonlocalized(&datarecords_str) as i64;
        if datarecords < 0 {
            datarecords = available;
        } else if datarecords > available {
            return Err(EdfError::InvalidFormat(format!(
                "Header announces {} data records, file holds {}",
                datarecords, available
            )));
        }

        for signal in signals.iter_mut() {
            signal.samples_in_file = signal.samples_per_record as i64 * datarecords;
        }

        let (patient_code, sex, birthdate, patient_name, patient_additional) = if is_plus {
            Self::parse_edfplus_patient(&patient)
        } else {
            Default::default()
        };

        let (admin_code, technician, equipment, recording_additional) = if is_plus {
            Self::parse_edfplus_recording(&recording)
        } else {
            Default::default()
        };

        let header = EdfHeader {
            file_type,
            signals,
            file_duration: datarecord_duration * datarecords,
            start_date,
            start_time,
            datarecords_in_file: datarecords,
            datarecord_duration,
            header_size,
            record_size,
            discontinuous,
            patient,
            recording,
            patient_code,
            sex,
            birthdate,
            patient_name,
            patient_additional,
            admin_code,
            technician,
            equipment,
            recording_additional,
        };

        Ok((header, signal_offsets))
    }

    /// 解析日期时间
    fn parse_datetime(date_str: &str, time_str: &str) -> Result<(NaiveDate, NaiveTime)> {
        // 解析日期 "dd.mm.yy"
        let date_parts: Vec<&str> = date_str.split('.').collect();
        if date_parts.len() != 3 {
            return Err(EdfError::InvalidFormat(format!("Start date: {}", date_str)));
        }

        let day = atoi_nonlocalized(date_parts[0]);
        let month = atoi_nonlocalized(date_parts[1]);
        let year = {
            let yy = atoi_nonlocalized(date_parts[2]);
            if yy > 84 { 1900 + yy } else { 2000 + yy }
        };

        let start_date = NaiveDate::from_ymd_opt(year, month as u32, day as u32)
            .ok_or_else(|| EdfError::InvalidFormat(format!("Start date: {}", date_str)))?;

        // 解析时间 "hh.mm.ss"
        let time_parts: Vec<&str> = time_str.split('.').collect();
        if time_parts.len() != 3 {
            return Err(EdfError::InvalidFormat(format!("Start time: {}", time_str)));
        }

        let hour = atoi_nonlocalized(time_parts[0]);
        let minute = atoi_nonlocalized(time_parts[1]);
        let second = atoi_nonlocalized(time_parts[2]);

        let start_time = NaiveTime::from_hms_opt(hour as u32, minute as u32, second as u32)
            .ok_or_else(|| EdfError::InvalidFormat(format!("Start time: {}", time_str)))?;

        Ok((start_date, start_time))
    }

    /// 解析信号参数
    fn parse_signals(
        signal_header: &[u8],
        total_signal_count: usize,
        file_type: FileType,
    ) -> Result<(Vec<SignalParam>, Vec<usize>, usize)> {
        let n = total_signal_count;
        let field = |base: usize, width: usize, i: usize| -> String {
            let start = n * base + i * width;
            String::from_utf8_lossy(&signal_header[start..start + width]).trim().to_string()
        };

        let bytes_per_sample = file_type.bytes_per_sample();
        let mut signals = Vec::with_capacity(n);
        let mut signal_offsets = Vec::with_capacity(n);
        let mut buffer_offset = 0;

        for i in 0..n {
            let label = field(0, 16, i);
            let annotation = file_type.is_plus()
                && (label == "EDF Annotations" || label == "BDF Annotations");

            let transducer = field(16, 80, i);
            let physical_dimension = field(96, 8, i);
            let physical_min = atof_nonlocalized(&field(104, 8, i));
            let physical_max = atof_nonlocalized(&field(112, 8, i));
            let digital_min = atoi_nonlocalized(&field(120, 8, i));
            let digital_max = atoi_nonlocalized(&field(128, 8, i));
            let prefilter = field(136, 80, i);
            let samples_str = field(216, 8, i);

            if !is_integer_number(&samples_str) {
                return Err(EdfError::InvalidFormat(format!(
                    "Samples per record of signal {}: {}", i + 1, samples_str
                )));
            }
            let samples_per_record = atoi_nonlocalized(&samples_str);
            if samples_per_record < 1 {
                return Err(EdfError::InvalidFormat(format!(
                    "Signal {} has {} samples per record", i + 1, samples_per_record
                )));
            }

            if !annotation {
                if physical_min == physical_max {
                    return Err(EdfError::PhysicalMinEqualsMax);
                }
                if digital_min == digital_max {
                    return Err(EdfError::DigitalMinEqualsMax);
                }
            }

            signals.push(SignalParam {
                label,
                samples_in_file: 0,
                physical_max,
                physical_min,
                digital_max,
                digital_min,
                samples_per_record,
                physical_dimension,
                prefilter,
                transducer,
                annotation,
            });
            signal_offsets.push(buffer_offset);

            buffer_offset += samples_per_record as usize * bytes_per_sample;
        }

        Ok((signals, signal_offsets, buffer_offset))
    }

    /// 读取并解析所有注释信号中的 TAL
    fn read_annotations(&mut self) -> Result<Vec<Annotation>> {
        let annotation_signals: Vec<usize> = self.header.signals
            .iter()
            .enumerate()
            .filter(|(_, s)| s.annotation)
            .map(|(i, _)| i)
            .collect();

        let mut annotations = Vec::new();
        if annotation_signals.is_empty() {
            return Ok(annotations);
        }

        let bytes_per_sample = self.header.file_type.bytes_per_sample();
        let mut record = vec![0u8; self.header.record_size];

        for index in 0..self.header.datarecords_in_file {
            self.read_record(index, &mut record)?;

            for &signal in &annotation_signals {
                let start = self.signal_offsets[signal];
                let len = self.header.signals[signal].samples_per_record as usize * bytes_per_sample;
                parse_tal_block(&record[start..start + len], &mut annotations);
            }
        }

        Ok(annotations)
    }

    /// 解析EDF+患者字段
    fn parse_edfplus_patient(patient_field: &str) -> (String, String, String, String, String) {
        // EDF+ 患者字段格式: "patientcode sex birthdate patientname additional_info"
        let parts: Vec<&str> = patient_field.split_whitespace().collect();

        let patient_code = parts.first().unwrap_or(&"").to_string();
        let sex = parts.get(1).unwrap_or(&"").to_string();
        let birthdate = parts.get(2).unwrap_or(&"").to_string();
        let patient_name = parts.get(3).unwrap_or(&"").replace('_', " ");
        let patient_additional = parts.get(4..).map(|s| s.join(" ")).unwrap_or_default();

        (patient_code, sex, birthdate, patient_name, patient_additional)
    }

    /// 解析EDF+记录字段
    fn parse_edfplus_recording(recording_field: &str) -> (String, String, String, String) {
        // EDF+ 记录字段格式: "Startdate dd-MMM-yyyy admincode technician equipment additional_info"
        let parts: Vec<&str> = recording_field.split_whitespace().collect();

        let admin_code = parts.get(2).unwrap_or(&"").to_string();
        let technician = parts.get(3).unwrap_or(&"").to_string();
        let equipment = parts.get(4).unwrap_or(&"").replace('_', " ");
        let recording_additional = parts.get(5..).map(|s| s.join(" ")).unwrap_or_default();

        (admin_code, technician, equipment, recording_additional)
    }
}

/// Sign-extends one little-endian sample of 2 or 3 bytes
pub(crate) fn decode_sample(raw: &[u8]) -> i32 {
    match raw.len() {
        2 => i16::from_le_bytes([raw[0], raw[1]]) as i32,
        _ => {
            let sign = if raw[2] & 0x80 != 0 { 0xff } else { 0x00 };
            i32::from_le_bytes([raw[0], raw[1], raw[2], sign])
        }
    }
}

/// Parses the TALs of one annotation signal block
///
/// TALs are separated by NUL bytes; each is `+onset[\x15duration]\x14text\x14...`.
/// A TAL without text is the record's timekeeping entry and is skipped.
fn parse_tal_block(block: &[u8], annotations: &mut Vec<Annotation>) {
    for tal in block.split(|&b| b == 0).filter(|t| !t.is_empty()) {
        let mut parts = tal.split(|&b| b == 0x14);
        let Some(timing) = parts.next() else { continue };

        let mut timing_parts = timing.split(|&b| b == 0x15);
        let onset_str = String::from_utf8_lossy(timing_parts.next().unwrap_or_default());
        let Ok(onset) = parse_edf_time(&onset_str) else { continue };
        let duration = timing_parts
            .next()
            .and_then(|d| parse_edf_time(&String::from_utf8_lossy(d)).ok());

        for text in parts.filter(|p| !p.is_empty()) {
            annotations.push(Annotation {
                onset,
                duration,
                description: String::from_utf8_lossy(text).to_string(),
            });
        }
    }
}
