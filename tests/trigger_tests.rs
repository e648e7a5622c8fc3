use edfconv::doctest_utils::{create_biosemi_file, BdfFixture};
use edfconv::transcode::trigger::{self, TriggerOptions};
use edfconv::{Annotation, CancelToken, EdfError, EdfReader, FileType, EDFLIB_TIME_DIMENSION};

const TD: i64 = EDFLIB_TIME_DIMENSION;

fn measuring() -> TriggerOptions {
    TriggerOptions { measure_duration: true, ..TriggerOptions::default() }
}

#[test]
fn test_trigger_with_duration() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("biosemi.bdf"), dir.path().join("biosemi_plus.bdf"));
    // 输入 1 在记录 5 开始为高, 记录 9 回到低
    create_biosemi_file(&input, 12, 256, |record, _| if (5..9).contains(&record) { 1 } else { 0 }).unwrap();

    let report = trigger::convert(&input, &output, &measuring(), &CancelToken::new()).unwrap();
    assert_eq!(report.divisor, 1);
    assert_eq!(report.records_read, 12);
    assert_eq!(report.records_written, 12);
    assert_eq!(report.annotations_written, 3);
    assert_eq!(report.annotations_dropped, 0);

    let mut reader = EdfReader::open(&output).unwrap();
    let header = reader.header();
    assert_eq!(header.file_type, FileType::BdfPlus);
    assert_eq!(header.datarecord_duration, TD);
    assert_eq!(header.signals[0].label, "A1");
    assert_eq!(header.signals[1].label, "Status");
    assert!(header.signals[2].annotation);
    assert_eq!(header.patient_name, "Fixture Subject");

    assert_eq!(
        reader.annotations(),
        &[
            Annotation::new(0, None, "Recording starts"),
            Annotation::new(5 * TD, Some(4 * TD), "Trigger Input 1"),
            Annotation::new(12 * TD, None, "Recording ends"),
        ]
    );

    // 信号数据原样复制
    let status = reader.read_digital_samples(1, 12 * 256).unwrap();
    assert_eq!(status[5 * 256 - 1], 0);
    assert_eq!(status[5 * 256], 1);
    assert_eq!(status[9 * 256 - 1], 1);
    assert_eq!(status[9 * 256], 0);
    let a1 = reader.read_digital_samples(0, 4).unwrap();
    assert_eq!(a1, vec![0, 100, 200, 300]);
}

#[test]
fn test_conversion_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("repeat.bdf");
    create_biosemi_file(&input, 6, 128, |record, index| match (record, index) {
        (1, 10..=20) => 0b101,
        (3, _) => 0b10,
        _ => 0,
    })
    .unwrap();

    let first = dir.path().join("first.bdf");
    let second = dir.path().join("second.bdf");
    trigger::convert(&input, &first, &measuring(), &CancelToken::new()).unwrap();
    trigger::convert(&input, &second, &measuring(), &CancelToken::new()).unwrap();

    let first = EdfReader::open(&first).unwrap();
    let second = EdfReader::open(&second).unwrap();
    assert_eq!(first.annotations(), second.annotations());

    let labels: Vec<&str> = first.annotations().iter().map(|a| a.description.as_str()).collect();
    assert_eq!(
        labels,
        vec!["Recording starts", "Trigger Input 1", "Trigger Input 3", "Trigger Input 2", "Recording ends"]
    );
}

#[test]
fn test_many_triggers_split_records() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("busy.bdf"), dir.path().join("busy_plus.bdf"));
    // 每两个采样点一次上升沿: 每条记录 32 个触发
    create_biosemi_file(&input, 4, 64, |_, index| (index % 2) as i32).unwrap();

    let report = trigger::convert(&input, &output, &TriggerOptions::default(), &CancelToken::new()).unwrap();
    // 上限 4 * 32 - 2 = 126 个触发, 外加开始和结束
    assert_eq!(report.divisor, 32);
    assert_eq!(report.records_written, 128);
    assert_eq!(report.annotations_written, 128);
    assert_eq!(report.annotations_dropped, 0);

    let mut reader = EdfReader::open(&output).unwrap();
    let header = reader.header();
    assert_eq!(header.datarecords_in_file, 128);
    assert_eq!(header.datarecord_duration, TD / 32);
    assert_eq!(header.signals[0].samples_per_record, 2);
    assert_eq!(header.signals[1].samples_per_record, 2);

    let annotations = reader.annotations().to_vec();
    assert_eq!(annotations.len(), 128);
    assert_eq!(annotations[1].onset, TD / 64);
    assert_eq!(annotations[1].description, "Trigger Input 1");
    assert_eq!(annotations.last().map(|a| a.onset), Some(4 * TD));

    // 子记录按顺序拼接
    let a1 = reader.read_digital_samples(0, 8).unwrap();
    assert_eq!(a1, vec![0, 100, 200, 300, 400, 500, 600, 700]);
}

#[test]
fn test_rejects_bdf_plus_input() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("plus.bdf"), dir.path().join("out.bdf"));
    BdfFixture {
        file_type: FileType::BdfPlus,
        labels: &["A1", "Status"],
        samples_per_record: 256,
        records: 2,
        annotations: &[],
    }
    .write(&input, |_, _, _| 0)
    .unwrap();

    let err = trigger::convert(&input, &output, &TriggerOptions::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidSource(ref msg) if msg.contains("already a BDF+")));
    assert!(!output.exists());
}

#[test]
fn test_rejects_missing_status_signal() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("nostatus.bdf"), dir.path().join("out.bdf"));
    BdfFixture {
        file_type: FileType::Bdf,
        labels: &["A1", "A2"],
        samples_per_record: 256,
        records: 2,
        annotations: &[],
    }
    .write(&input, |_, _, _| 0)
    .unwrap();

    let err = trigger::convert(&input, &output, &TriggerOptions::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidSource(_)));
    assert!(!output.exists());
}

#[test]
fn test_rejects_unusual_sample_frequency() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("odd_rate.bdf"), dir.path().join("out.bdf"));
    create_biosemi_file(&input, 2, 100, |_, _| 0).unwrap();

    let err = trigger::convert(&input, &output, &TriggerOptions::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidSource(_)));
    assert!(!output.exists());
}

#[test]
fn test_invalid_labels_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("labels.bdf"), dir.path().join("out.bdf"));
    create_biosemi_file(&input, 2, 256, |_, _| 0).unwrap();

    let mut options = TriggerOptions::default();
    options.labels[3] = "a label that is too long".to_string();
    let err = trigger::convert(&input, &output, &options, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidArgument(_)));
    assert!(!output.exists());
}

#[test]
fn test_cancelled_conversion_leaves_no_file() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("cancel.bdf"), dir.path().join("cancel_plus.bdf"));
    create_biosemi_file(&input, 4, 256, |_, _| 0).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let err = trigger::convert(&input, &output, &TriggerOptions::default(), &token).unwrap_err();
    assert!(err.is_cancelled());
    assert!(!output.exists());
}

#[test]
fn test_rejects_file_without_records() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("empty.bdf"), dir.path().join("empty_plus.bdf"));
    create_biosemi_file(&input, 0, 256, |_, _| 0).unwrap();

    let err = trigger::convert(&input, &output, &TriggerOptions::default(), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidSource(ref msg) if msg.contains("no data records")));
    assert!(!output.exists());
}

#[test]
fn test_rejects_divisor_limit_above_lowest_rate() {
    let dir = tempfile::tempdir().unwrap();
    let (input, output) = (dir.path().join("slow.bdf"), dir.path().join("slow_plus.bdf"));
    create_biosemi_file(&input, 2, 32, |_, _| 0).unwrap();

    let options = TriggerOptions { max_divisor: 64, ..TriggerOptions::default() };
    let err = trigger::convert(&input, &output, &options, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, EdfError::InvalidArgument(ref msg) if msg.contains("Maximum divisor 64")));
    assert!(!output.exists());
}
