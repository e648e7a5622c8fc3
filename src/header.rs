//! Fixed-width header field synthesis
//!
//! Every EDF/BDF header field has a width mandated by the format (8, 16, 44,
//! 80 bytes, ...). Fields are left-justified, padded with spaces and truncated
//! to their slot, so the header layout never depends on the values written
//! into it.

use crate::types::FileType;

/// Width of the per-signal numeric fields
pub const NUMBER_FIELD: usize = 8;

/// Phrases some recorders put in the prefilter field that say nothing about filtering
const PREFILTER_FILLERS: [&str; 3] = ["No filtering", "None", "HP: DC;"];

/// Byte buffer that appends header fields at their exact width
#[derive(Debug, Default)]
pub struct HeaderBuffer {
    buf: Vec<u8>,
}

impl HeaderBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        HeaderBuffer { buf: Vec::with_capacity(capacity) }
    }

    /// 写入版本字段: EDF "0       ", BDF "\xffBIOSEMI"
    pub fn push_version(&mut self, file_type: FileType) {
        if file_type.is_bdf() {
            self.buf.push(0xff);
            self.buf.extend_from_slice(b"BIOSEMI");
        } else {
            self.buf.extend_from_slice(b"0       ");
        }
    }

    /// Text, left-justified and space padded; non-ASCII characters become '_'
    pub fn push_text(&mut self, text: &str, width: usize) {
        self.buf.extend_from_slice(&text_field(text, width));
    }

    /// Integer in `%-Ni` layout
    pub fn push_int(&mut self, value: i64, width: usize) {
        self.buf.extend_from_slice(&fit(format!("{}", value).into_bytes(), width));
    }

    /// Floating point value in the compact physical-range layout, see [`number_field`]
    pub fn push_number(&mut self, value: f64, width: usize) {
        self.buf.extend_from_slice(&number_field(value, width));
    }

    pub fn push_spaces(&mut self, count: usize) {
        self.buf.resize(self.buf.len() + count, b' ');
    }

    /// Bytes that are already formatted (copied from a source header)
    pub fn push_raw(&mut self, bytes: &[u8], width: usize) {
        self.buf.extend_from_slice(&fit(bytes.to_vec(), width));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

fn fit(mut bytes: Vec<u8>, width: usize) -> Vec<u8> {
    bytes.resize(width, b' ');
    bytes
}

/// 将字符串转换为 7-bit ASCII，非 ASCII 替换为 '_'，并填充到指定宽度
pub fn text_field(text: &str, width: usize) -> Vec<u8> {
    let ascii: Vec<u8> = text
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c as u8 } else { b'_' })
        .collect();
    fit(ascii, width)
}

/// Formats a number the way physical minimum/maximum fields are written
///
/// The value is printed with six decimals, trailing zeros after the decimal
/// point are turned into spaces (the point too when nothing follows it), the
/// point is blanked when it would be the last character of the slot and the
/// result is cut to `width`.
///
/// ```rust
/// use edfconv::header::number_field;
///
/// assert_eq!(number_field(-32768.0, 8), b"-32768  ".to_vec());
/// assert_eq!(number_field(0.03125, 8), b"0.03125 ".to_vec());
/// assert_eq!(number_field(1234567.5, 8), b"1234567 ".to_vec());
/// ```
pub fn number_field(value: f64, width: usize) -> Vec<u8> {
    let mut bytes = format!("{:.6}", value).into_bytes();
    convert_trailing_zeros_to_spaces(&mut bytes);
    if width > 0 && bytes.get(width - 1) == Some(&b'.') {
        bytes[width - 1] = b' ';
    }
    bytes.truncate(width);
    fit(bytes, width)
}

/// Replaces trailing zeros of the fractional part (and a bare point) with spaces
pub fn convert_trailing_zeros_to_spaces(bytes: &mut [u8]) {
    if !bytes.contains(&b'.') {
        return;
    }
    for b in bytes.iter_mut().rev() {
        match *b {
            b'0' => *b = b' ',
            b'.' => {
                *b = b' ';
                break;
            }
            _ => break,
        }
    }
}

/// Drops trailing zeros of the fractional part, and the point itself if nothing is left
pub fn remove_trailing_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_string();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Builds an 80-byte prefilter field `"HP:<cutoff>Hz <source prefilter>"`
///
/// Filler phrases are blanked in place rather than removed so everything after
/// them keeps its column.
pub fn prefilter_field(highpass: Option<f64>, source_prefilter: &str) -> Vec<u8> {
    let mut text = String::new();
    if let Some(cutoff) = highpass {
        text.push_str(&remove_trailing_zeros(&format!("HP:{:.6}", cutoff)));
        text.push_str("Hz ");
    }
    text.push_str(source_prefilter);

    let mut bytes = text_field(&text, 200);
    for filler in PREFILTER_FILLERS {
        blank_phrase(&mut bytes, filler.as_bytes(), 80);
    }
    bytes.truncate(80);
    bytes
}

fn blank_phrase(bytes: &mut [u8], phrase: &[u8], search_limit: usize) {
    for start in 0..search_limit.min(bytes.len()) {
        if bytes[start..].starts_with(phrase) {
            bytes[start..start + phrase.len()].fill(b' ');
        }
    }
}
