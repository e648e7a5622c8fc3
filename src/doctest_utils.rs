// Fixture builders for documentation and integration tests
// Every source format the transcoders accept can be produced here.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::{EdfWriter, FileType, Result};

/// Creates a 10 s EDF+ file with one 256 Hz signal "EEG Fp1" (±200 uV)
pub fn create_simple_test_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let mut writer = EdfWriter::create(&path, FileType::EdfPlus, 1)?;
    writer.set_label(0, "EEG Fp1")?;
    writer.set_sample_frequency(0, 256)?;
    writer.set_physical_maximum(0, 200.0)?;
    writer.set_physical_minimum(0, -200.0)?;
    writer.set_digital_maximum(0, 32767)?;
    writer.set_digital_minimum(0, -32768)?;
    writer.set_physical_dimension(0, "uV")?;
    writer.set_prefilter(0, "HP:0.1Hz LP:70Hz")?;
    writer.set_transducer(0, "AgAgCl cup electrodes")?;
    writer.set_patient_name("Test Patient")?;

    // 10Hz 正弦波, 幅度 50 uV
    let samples: Vec<i32> = (0..256)
        .map(|i| {
            let t = i as f64 / 256.0;
            let value = 50.0 * (2.0 * std::f64::consts::PI * 10.0 * t).sin();
            (value * 32767.0 / 200.0).round() as i32
        })
        .collect();
    for _ in 0..10 {
        writer.write_digital_record(&samples)?;
    }
    writer.close()?;
    Ok(())
}

/// Layout of a generated BDF or BDF+ recording with 1 s data records
///
/// A signal labelled `Status` gets the Biosemi status calibration (digital
/// equals physical); every other signal is ±262144 uV over the full 24-bit
/// range.
#[derive(Debug, Clone)]
pub struct BdfFixture<'a> {
    pub file_type: FileType,
    pub labels: &'a [&'a str],
    pub samples_per_record: i32,
    pub records: i64,
    /// (onset, text) pairs, BDF+ only
    pub annotations: &'a [(i64, &'a str)],
}

impl BdfFixture<'_> {
    /// Writes the recording; `sample(signal, record, index)` gives each digital value
    pub fn write<P, F>(&self, path: P, mut sample: F) -> Result<()>
    where
        P: AsRef<Path>,
        F: FnMut(usize, i64, usize) -> i32,
    {
        let mut writer = EdfWriter::create(&path, self.file_type, self.labels.len())?;
        for (i, label) in self.labels.iter().enumerate() {
            writer.set_label(i, label)?;
            writer.set_sample_frequency(i, self.samples_per_record)?;
            writer.set_digital_maximum(i, 8_388_607)?;
            writer.set_digital_minimum(i, -8_388_608)?;
            if *label == "Status" {
                writer.set_physical_maximum(i, 8_388_607.0)?;
                writer.set_physical_minimum(i, -8_388_608.0)?;
                writer.set_physical_dimension(i, "Boolean")?;
                writer.set_transducer(i, "Triggers and Status")?;
            } else {
                writer.set_physical_maximum(i, 262_144.0)?;
                writer.set_physical_minimum(i, -262_144.0)?;
                writer.set_physical_dimension(i, "uV")?;
                writer.set_transducer(i, "Active Electrode")?;
                writer.set_prefilter(i, "HP: DC; LP:417 Hz")?;
            }
        }
        writer.set_patient_name("Fixture Subject")?;
        writer.set_equipment("BioSemi")?;

        let per_record = self.samples_per_record as usize;
        let mut record = vec![0i32; per_record * self.labels.len()];
        for r in 0..self.records {
            for (s, chunk) in record.chunks_exact_mut(per_record).enumerate() {
                for (k, value) in chunk.iter_mut().enumerate() {
                    *value = sample(s, r, k);
                }
            }
            writer.write_digital_record(&record)?;
        }
        for (onset, text) in self.annotations {
            writer.write_annotation(*onset, None, text)?;
        }
        writer.close()?;
        Ok(())
    }
}

/// Plain BDF with one EEG signal and a `Status` signal, as a Biosemi system writes it
///
/// `status(record, index)` gives the status word of every sample.
pub fn create_biosemi_file<P, F>(
    path: P,
    records: i64,
    samples_per_record: i32,
    mut status: F,
) -> Result<()>
where
    P: AsRef<Path>,
    F: FnMut(i64, usize) -> i32,
{
    BdfFixture {
        file_type: FileType::Bdf,
        labels: &["A1", "Status"],
        samples_per_record,
        records,
        annotations: &[],
    }
    .write(path, |signal, record, index| match signal {
        1 => status(record, index),
        _ => (record as i32 * samples_per_record + index as i32) * 100,
    })
}

/// Writes `<dir>/<name>.dcm` and `<dir>/<name>.evt`, returns the `.dcm` path
///
/// The data file holds `blocks` one-second blocks of three interleaved
/// channels; byte `k` of block `b` is `(b + k) % 256`. The event file has a
/// complete header (model `TM SD01G`, date 2004-06-21, 24 hours) followed by
/// `events`.
pub fn create_legacy_recording(
    dir: &Path,
    name: &str,
    sample_rate: u32,
    record_time: &str,
    blocks: usize,
    events: &[&str],
) -> Result<PathBuf> {
    let block_size = 3 * sample_rate as usize;
    let data: Vec<u8> = (0..blocks)
        .flat_map(|b| (0..block_size).map(move |k| ((b + k) % 256) as u8))
        .collect();
    let dcm = dir.join(format!("{}.dcm", name));
    fs::write(&dcm, data)?;

    let mut evt = format!(
        "Sampling Rate={}\r\nModel number=TM SD01G\r\nRecord Date=2004-06-21\r\nRecord Time={}\r\nRecord Hours=24\r\n",
        sample_rate, record_time
    );
    for line in events {
        evt.push_str(line);
        evt.push_str("\r\n");
    }
    fs::write(dir.join(format!("{}.evt", name)), evt)?;
    Ok(dcm)
}

/// One `CHANNEL` element of a Mortara document
#[derive(Debug, Clone)]
pub struct MortaraChannel<'a> {
    pub name: &'a str,
    pub sample_freq: u32,
    pub units_per_mv: i32,
    pub samples: &'a [i16],
}

/// A Mortara ECG document with subject and source information
pub fn mortara_xml(acquisition_time: &str, channels: &[MortaraChannel]) -> String {
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ECG ACQUISITION_TIME_XML=\"{}\">\n  \
         <SUBJECT FIRST_NAME=\"Anna\" LAST_NAME=\"de Vries\" GENDER=\"FEMALE\"/>\n  \
         <SOURCE MODEL=\"ELI 350\"/>\n",
        acquisition_time
    );
    for channel in channels {
        let bytes: Vec<u8> = channel.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        xml.push_str(&format!(
            "  <CHANNEL OFFSET=\"0\" BITS=\"16\" FORMAT=\"SIGNED\" UNITS_PER_MV=\"{}\" DURATION=\"{}\" \
             SAMPLE_FREQ=\"{}\" NAME=\"{}\" ENCODING=\"BASE64\" DATA=\"{}\"/>\n",
            channel.units_per_mv,
            channel.samples.len() as u64 * 1000 / channel.sample_freq.max(1) as u64,
            channel.sample_freq,
            channel.name,
            base64::engine::general_purpose::STANDARD.encode(bytes),
        ));
    }
    xml.push_str("</ECG>\n");
    xml
}
