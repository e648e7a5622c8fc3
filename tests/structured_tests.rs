use std::fs;

use approx::assert_relative_eq;
use chrono::{NaiveDate, NaiveTime};
use edfconv::doctest_utils::{mortara_xml, MortaraChannel};
use edfconv::error::ErrorCategory;
use edfconv::transcode::structured::{self, StructuredOptions};
use edfconv::{CancelToken, EdfError, EdfReader, FileType};

fn lead_samples(count: usize, sign: i32) -> Vec<i16> {
    (0..count).map(|i| (sign * (((i * 13) % 4000) as i32 - 2000)) as i16).collect()
}

#[test]
fn test_ecg_document_to_edf_plus() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("ecg.xml"), dir.path().join("ecg.edf"));
    let lead_i = lead_samples(2000, 1);
    let lead_ii = lead_samples(2000, -1);
    let xml = mortara_xml(
        "2011-03-04T10:20:30",
        &[
            MortaraChannel { name: "I", sample_freq: 500, units_per_mv: 200, samples: &lead_i },
            MortaraChannel { name: "II", sample_freq: 500, units_per_mv: 200, samples: &lead_ii },
        ],
    );
    fs::write(&input, xml).unwrap();

    let report = structured::convert(&input, &output, &StructuredOptions::default(), &CancelToken::new()).unwrap();
    // 500 Hz 可被 10 整除: 0.1 秒一条记录
    assert_eq!(report.divisor, 10);
    assert_eq!(report.records_written, 40);

    let mut reader = EdfReader::open(&output).unwrap();
    let header = reader.header();
    assert_eq!(header.file_type, FileType::EdfPlus);
    assert_eq!(header.datarecord_duration, 1_000_000);
    assert_eq!(header.datarecords_in_file, 40);
    assert_eq!(header.start_date, NaiveDate::from_ymd_opt(2011, 3, 4).unwrap());
    assert_eq!(header.start_time, NaiveTime::from_hms_opt(10, 20, 30).unwrap());
    assert_eq!(header.patient_name, "Anna de Vries");
    assert_eq!(header.sex, "F");
    assert_eq!(header.equipment, "ELI 350");

    let signal = &header.signals[0];
    assert_eq!(signal.label, "I");
    assert_eq!(header.signals[1].label, "II");
    assert_eq!(signal.samples_per_record, 50);
    assert_eq!(signal.physical_dimension, "mV");
    assert_relative_eq!(signal.physical_max, 163.835, max_relative = 1e-6);
    assert_relative_eq!(signal.physical_min, -163.84, max_relative = 1e-6);
    assert_eq!(header.signals.iter().filter(|s| s.annotation).count(), 1);

    let expected: Vec<i32> = lead_ii.iter().map(|&s| s as i32).collect();
    assert_eq!(reader.read_digital_samples(1, 2000).unwrap(), expected);
}

#[test]
fn test_prime_sample_frequency_keeps_one_second_records() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("prime.xml"), dir.path().join("prime.edf"));
    let samples = lead_samples(998, 1);
    let xml = mortara_xml(
        "2011-03-04T10:20:30",
        &[MortaraChannel { name: "V1", sample_freq: 499, units_per_mv: 1000, samples: &samples }],
    );
    fs::write(&input, xml).unwrap();

    let report = structured::convert(&input, &output, &StructuredOptions::default(), &CancelToken::new()).unwrap();
    assert_eq!(report.divisor, 1);
    assert_eq!(report.records_written, 2);

    let reader = EdfReader::open(&output).unwrap();
    let header = reader.header();
    assert_eq!(header.datarecord_duration, edfconv::EDFLIB_TIME_DIMENSION);
    assert_eq!(header.signals.len(), 3);
    assert_eq!(header.signals.iter().filter(|s| s.annotation).count(), 2);
    // 高分辨率通道以 uV 表示
    assert_eq!(header.signals[0].physical_dimension, "uV");
    assert_relative_eq!(header.signals[0].physical_max, 32_767.0, max_relative = 1e-6);
}

#[test]
fn test_mismatched_sample_frequency_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("mixed.xml"), dir.path().join("mixed.edf"));
    let fast = lead_samples(1000, 1);
    let slow = lead_samples(500, 1);
    // 两个通道的 DURATION 相同, 只有 SAMPLE_FREQ 不同
    let xml = mortara_xml(
        "2011-03-04T10:20:30",
        &[
            MortaraChannel { name: "I", sample_freq: 500, units_per_mv: 200, samples: &fast },
            MortaraChannel { name: "II", sample_freq: 250, units_per_mv: 200, samples: &slow },
        ],
    );
    fs::write(&input, xml).unwrap();

    let err = structured::convert(&input, &output, &StructuredOptions::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidSource(ref msg) if msg.contains("SAMPLE_FREQ")));
    assert_eq!(err.category(), ErrorCategory::SourceInvalid);
    assert!(!output.exists());
}

#[test]
fn test_mismatched_scale_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("scale.xml"), dir.path().join("scale.edf"));
    let samples = lead_samples(1000, 1);
    let xml = mortara_xml(
        "2011-03-04T10:20:30",
        &[
            MortaraChannel { name: "I", sample_freq: 500, units_per_mv: 200, samples: &samples },
            MortaraChannel { name: "II", sample_freq: 500, units_per_mv: 1000, samples: &samples },
        ],
    );
    fs::write(&input, xml).unwrap();

    let err = structured::convert(&input, &output, &StructuredOptions::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidSource(ref msg) if msg.contains("UNITS_PER_MV")));
    assert!(!output.exists());
}

#[test]
fn test_malformed_document() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("broken.xml"), dir.path().join("broken.edf"));
    fs::write(&input, "<ECG ACQUISITION_TIME_XML=\"2011-03-04T10:20:30\"><CHANNEL").unwrap();

    let err = structured::convert(&input, &output, &StructuredOptions::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::Xml(_)));
    assert!(!output.exists());
}

#[test]
fn test_latin1_document() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("latin1.xml"), dir.path().join("latin1.edf"));
    let samples = lead_samples(500, 1);
    let xml = mortara_xml(
        "2011-03-04T10:20:30",
        &[MortaraChannel { name: "I", sample_freq: 500, units_per_mv: 200, samples: &samples }],
    )
    .replace("de Vries", "Andr\u{e9}");
    // 每个字符写成一个字节
    let bytes: Vec<u8> = xml.chars().map(|c| c as u32 as u8).collect();
    fs::write(&input, bytes).unwrap();

    structured::convert(&input, &output, &StructuredOptions::default(), &CancelToken::new()).unwrap();

    let reader = EdfReader::open(&output).unwrap();
    assert!(reader.header().patient_name.starts_with("Anna Andr"));
}

#[test]
fn test_cancelled_conversion_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("cancel.xml"), dir.path().join("cancel.edf"));
    let samples = lead_samples(1000, 1);
    let xml = mortara_xml(
        "2011-03-04T10:20:30",
        &[MortaraChannel { name: "I", sample_freq: 500, units_per_mv: 200, samples: &samples }],
    );
    fs::write(&input, xml).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let err = structured::convert(&input, &output, &StructuredOptions::default(), &token).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!output.exists());
}
