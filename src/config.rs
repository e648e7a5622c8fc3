//! TOML configuration for the transcoders
//!
//! Every section and every field has a default, so an empty file (or no file
//! at all) yields a usable configuration.
//!
//! ```toml
//! [depth]
//! highpass_enabled = true
//! highpass_hz = 0.1
//! divider = 1.0
//!
//! [trigger]
//! rising_edge = true
//! measure_duration = false
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EdfError, Result};
use crate::transcode::depth::{ChannelSetting, DepthOptions};
use crate::transcode::legacy::LegacyOptions;
use crate::transcode::structured::StructuredOptions;
use crate::transcode::trigger::{TriggerOptions, TRIGGER_INPUTS};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub depth: DepthConfig,
    #[serde(default)]
    pub legacy: LegacyConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub structured: StructuredConfig,
}

/// BDF → EDF settings
///
/// # Defaults
///
/// - `highpass_enabled`: true
/// - `highpass_hz`: 0.1 Hz (allowed 0.001 - 100)
/// - `divider`: 1.0 (allowed 1 - 256)
/// - `signals`: empty, every signal channel is converted
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DepthConfig {
    #[serde(default = "default_highpass_enabled")]
    pub highpass_enabled: bool,
    #[serde(default = "default_highpass_hz")]
    pub highpass_hz: f64,
    #[serde(default = "default_divider")]
    pub divider: f64,
    /// Source signal indices to convert
    #[serde(default)]
    pub signals: Vec<usize>,
    #[serde(default)]
    pub channel: Vec<DepthChannelConfig>,
}

/// Override for one source signal
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DepthChannelConfig {
    pub index: usize,
    pub highpass_hz: Option<f64>,
    pub divider: Option<f64>,
}

/// BI9800 settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LegacyConfig {
    #[serde(default = "default_legacy_patient")]
    pub patient_name: String,
    /// Event log lines are cut at this many bytes
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Biosemi trigger settings
///
/// # Defaults
///
/// - `labels`: "Trigger Input 1" ... "Trigger Input 16"
/// - `rising_edge`: true
/// - `max_annotations`: 100000
/// - `annotations_per_record`: 32, `margin`: 2, `max_divisor`: 32
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TriggerConfig {
    #[serde(default = "default_trigger_labels")]
    pub labels: Vec<String>,
    #[serde(default = "default_rising_edge")]
    pub rising_edge: bool,
    #[serde(default)]
    pub measure_duration: bool,
    #[serde(default = "default_max_annotations")]
    pub max_annotations: usize,
    #[serde(default = "default_annotations_per_record")]
    pub annotations_per_record: i64,
    #[serde(default = "default_margin")]
    pub margin: i64,
    #[serde(default = "default_max_divisor")]
    pub max_divisor: i64,
}

/// Mortara ECG settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StructuredConfig {
    #[serde(default = "default_divisor_candidates")]
    pub divisor_candidates: Vec<u32>,
    #[serde(default = "default_min_payload_bytes")]
    pub min_payload_bytes: usize,
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,
}

// Default functions
fn default_highpass_enabled() -> bool {
    true
}

fn default_highpass_hz() -> f64 {
    0.1
}

fn default_divider() -> f64 {
    1.0
}

fn default_legacy_patient() -> String {
    "BI9800".to_string()
}

fn default_max_line_length() -> usize {
    256
}

fn default_trigger_labels() -> Vec<String> {
    (1..=TRIGGER_INPUTS).map(|i| format!("Trigger Input {}", i)).collect()
}

fn default_rising_edge() -> bool {
    true
}

fn default_max_annotations() -> usize {
    100_000
}

fn default_annotations_per_record() -> i64 {
    32
}

fn default_margin() -> i64 {
    2
}

fn default_max_divisor() -> i64 {
    32
}

fn default_divisor_candidates() -> Vec<u32> {
    vec![10, 8, 5, 4, 2, 1]
}

fn default_min_payload_bytes() -> usize {
    100
}

fn default_max_channels() -> usize {
    256
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            highpass_enabled: default_highpass_enabled(),
            highpass_hz: default_highpass_hz(),
            divider: default_divider(),
            signals: Vec::new(),
            channel: Vec::new(),
        }
    }
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            patient_name: default_legacy_patient(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            labels: default_trigger_labels(),
            rising_edge: default_rising_edge(),
            measure_duration: false,
            max_annotations: default_max_annotations(),
            annotations_per_record: default_annotations_per_record(),
            margin: default_margin(),
            max_divisor: default_max_divisor(),
        }
    }
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            divisor_candidates: default_divisor_candidates(),
            min_payload_bytes: default_min_payload_bytes(),
            max_channels: default_max_channels(),
        }
    }
}

impl Config {
    /// 从文件读取配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| EdfError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EdfError::Config(e.to_string()))
    }

    /// Writes the default configuration to `path`
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let content = toml::to_string_pretty(&Config::default())
            .map_err(|e| EdfError::Config(e.to_string()))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Reads `path`, falling back to the defaults when it does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Config::default())
        }
    }
}

impl DepthConfig {
    pub fn to_options(&self) -> DepthOptions {
        let highpass = self.highpass_enabled.then_some(self.highpass_hz);
        DepthOptions {
            highpass,
            divider: self.divider,
            selection: self.signals.clone(),
            channels: self.channel
                .iter()
                .map(|c| ChannelSetting {
                    source: c.index,
                    // 全局关闭滤波时忽略单通道截止频率
                    highpass: if self.highpass_enabled { c.highpass_hz.or(highpass) } else { None },
                    divider: c.divider.unwrap_or(self.divider),
                })
                .collect(),
        }
    }
}

impl LegacyConfig {
    pub fn to_options(&self) -> LegacyOptions {
        LegacyOptions {
            patient_name: self.patient_name.clone(),
            max_line_length: self.max_line_length,
        }
    }
}

impl TriggerConfig {
    pub fn to_options(&self) -> TriggerOptions {
        TriggerOptions {
            labels: self.labels.clone(),
            rising_edge: self.rising_edge,
            measure_duration: self.measure_duration,
            max_annotations: self.max_annotations,
            annotations_per_record: self.annotations_per_record,
            margin: self.margin,
            max_divisor: self.max_divisor,
        }
    }
}

impl StructuredConfig {
    pub fn to_options(&self) -> StructuredOptions {
        StructuredOptions {
            divisor_candidates: self.divisor_candidates.clone(),
            min_payload_bytes: self.min_payload_bytes,
            max_channels: self.max_channels,
        }
    }
}
