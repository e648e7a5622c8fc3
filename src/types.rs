use chrono::{NaiveDate, NaiveTime};

/// Label every EDF+/BDF+ annotation signal carries, padded to the 16-byte label field
pub const ANNOTATION_LABEL: &str = "EDF Annotations ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Edf,
    EdfPlus,
    Bdf,
    BdfPlus,
}

impl FileType {
    /// 每个样本的字节数 (EDF 2 字节, BDF 3 字节)
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            FileType::Edf | FileType::EdfPlus => 2,
            FileType::Bdf | FileType::BdfPlus => 3,
        }
    }

    pub fn is_bdf(&self) -> bool {
        matches!(self, FileType::Bdf | FileType::BdfPlus)
    }

    /// EDF+ / BDF+ carry annotation signals
    pub fn is_plus(&self) -> bool {
        matches!(self, FileType::EdfPlus | FileType::BdfPlus)
    }

    /// Widest digital range the sample width can hold
    pub fn digital_limits(&self) -> (i32, i32) {
        if self.is_bdf() {
            (-8_388_608, 8_388_607)
        } else {
            (-32768, 32767)
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignalParam {
    pub label: String,
    pub samples_in_file: i64,
    pub physical_max: f64,
    pub physical_min: f64,
    pub digital_max: i32,
    pub digital_min: i32,
    pub samples_per_record: i32,
    pub physical_dimension: String,
    pub prefilter: String,
    pub transducer: String,
    /// 是否是注释信号 ("EDF Annotations" / "BDF Annotations")
    pub annotation: bool,
}

impl SignalParam {
    /// 计算物理值转换参数
    pub fn bit_value(&self) -> f64 {
        (self.physical_max - self.physical_min) /
        (self.digital_max - self.digital_min) as f64
    }

    /// 计算偏移量
    pub fn offset(&self) -> f64 {
        self.physical_max / self.bit_value() - self.digital_max as f64
    }

    /// 将数字值转换为物理值
    pub fn to_physical(&self, digital_value: i32) -> f64 {
        self.bit_value() * (self.offset() + digital_value as f64)
    }

    /// Sample frequency in Hz for the given record duration (100 ns units)
    pub fn sample_frequency(&self, datarecord_duration: i64) -> f64 {
        self.samples_per_record as f64 * crate::EDFLIB_TIME_DIMENSION as f64
            / datarecord_duration as f64
    }
}

/// A time-stamped annotation (TAL entry)
///
/// `onset` and `duration` are in units of 100 nanoseconds
/// ([`crate::EDFLIB_TIME_DIMENSION`] per second).
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub onset: i64,
    pub duration: Option<i64>,
    pub description: String,
}

impl Annotation {
    pub fn new(onset: i64, duration: Option<i64>, description: &str) -> Self {
        Annotation {
            onset,
            duration,
            description: description.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct EdfHeader {
    pub file_type: FileType,
    /// All signals in file order, annotation signals included
    pub signals: Vec<SignalParam>,
    pub file_duration: i64,           // 文件持续时间（100纳秒为单位）
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub datarecords_in_file: i64,
    pub datarecord_duration: i64,     // 数据记录持续时间（100纳秒为单位）
    pub header_size: usize,
    pub record_size: usize,
    pub discontinuous: bool,

    // 原始的 80 字节字段
    pub patient: String,
    pub recording: String,

    // EDF+ 特有字段
    pub patient_code: String,
    pub sex: String,
    pub birthdate: String,
    pub patient_name: String,
    pub patient_additional: String,
    pub admin_code: String,
    pub technician: String,
    pub equipment: String,
    pub recording_additional: String,
}

impl EdfHeader {
    /// Signals that carry samples, with their index in the file
    pub fn data_signals(&self) -> impl Iterator<Item = (usize, &SignalParam)> {
        self.signals.iter().enumerate().filter(|(_, s)| !s.annotation)
    }

    pub fn signal_index(&self, label: &str) -> Option<usize> {
        self.signals.iter().position(|s| s.label == label)
    }
}

/// One channel of a transcoded output file
///
/// Signal channels are filtered and scaled on their way to the target; annotation
/// channels are copied byte for byte and never see a filter or a divider.
#[derive(Debug, Clone)]
pub enum ChannelSpec {
    Signal(SignalChannel),
    Annotation(AnnotationChannel),
}

#[derive(Debug, Clone)]
pub struct SignalChannel {
    /// Index of the channel in the source recording
    pub source: usize,
    pub label: String,
    pub transducer: String,
    pub physical_dimension: String,
    pub physical_min: f64,
    pub physical_max: f64,
    pub digital_min: i32,
    pub digital_max: i32,
    pub samples_per_record: i32,
    pub prefilter: String,
    /// High-pass cutoff in Hz, `None` when the channel is passed unfiltered
    pub highpass: Option<f64>,
    pub divider: f64,
}

#[derive(Debug, Clone)]
pub struct AnnotationChannel {
    pub source: usize,
    /// Samples per record in the source encoding
    pub source_samples_per_record: i32,
    /// Bytes copied per record from the source
    pub source_bytes: usize,
}

impl AnnotationChannel {
    /// Output byte length per record, padded to an even count
    pub fn target_bytes(&self) -> usize {
        self.source_bytes + self.source_bytes % 2
    }

    /// Samples per record in a 2-byte target
    pub fn target_samples_per_record(&self) -> i32 {
        (self.target_bytes() / 2) as i32
    }

    pub fn needs_padding(&self) -> bool {
        self.source_bytes % 2 == 1
    }
}

impl ChannelSpec {
    pub fn source(&self) -> usize {
        match self {
            ChannelSpec::Signal(s) => s.source,
            ChannelSpec::Annotation(a) => a.source,
        }
    }

    pub fn is_annotation(&self) -> bool {
        matches!(self, ChannelSpec::Annotation(_))
    }

    pub fn samples_per_record(&self) -> i32 {
        match self {
            ChannelSpec::Signal(s) => s.samples_per_record,
            ChannelSpec::Annotation(a) => a.target_samples_per_record(),
        }
    }
}
