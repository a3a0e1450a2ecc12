use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One decoded `WaveformData` element.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSample {
    pub id: i32,
    pub label: String,
    pub native_rate_hz: f64,
    /// sample count declared by the `Samples` attribute
    pub sample_count: usize,
    pub unit_of_measure: String,
    pub samples: Vec<i16>,
}

/// A `Waveforms` element: same-timestamp samples for every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformBlock {
    pub collection_time: String,
    pub collection_time_utc: String,
    pub channels: Vec<ChannelSample>,
}

impl WaveformBlock {
    /// Ordered channel labels, the identity of a waveform file.
    pub fn labels(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.label.clone()).collect()
    }
}

/// A `VitalSign` element as text, exactly as found in the export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VitalSignEntry {
    pub parameter: String,
    pub time: String,
    pub value: String,
    pub uom: String,
    pub alarm_limit_low: String,
    pub alarm_limit_high: String,
}

/// A `VitalSigns` element.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalSignsBlock {
    pub collection_time: String,
    pub collection_time_utc: String,
    pub entries: Vec<VitalSignEntry>,
}

/// Numeric field of a vital sign that may not hold a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Value(f64),
    Unparseable,
}

impl Reading {
    pub fn parse(text: &str) -> Self {
        match text.trim().parse::<f64>() {
            Ok(v) => Reading::Value(v),
            Err(_) => Reading::Unparseable,
        }
    }

    /// The stored number, or `sentinel` when the field could not be parsed.
    pub fn or_sentinel(self, sentinel: f64) -> f64 {
        match self {
            Reading::Value(v) => v,
            Reading::Unparseable => sentinel,
        }
    }
}

/// A vital sign with its timestamp and numeric fields resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct VitalSignPoint {
    pub parameter: String,
    pub timestamp: NaiveDateTime,
    pub value: Reading,
    pub unit: String,
    pub alarm_low: Reading,
    pub alarm_high: Reading,
}

/// Label pattern plus the attributes it overrides.
///
/// Patterns always match the whole label.
#[derive(Debug, Clone)]
pub struct ChannelConfigEntry {
    pub label_pattern: Regex,
    pub uom: Option<String>,
    pub range_low: Option<f64>,
    pub range_high: Option<f64>,
    pub offset: Option<f64>,
    pub scale: Option<f64>,
    pub rename_to: Option<String>,
}

impl ChannelConfigEntry {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(ChannelConfigEntry {
            label_pattern: anchored_regex(pattern)?,
            uom: None,
            range_low: None,
            range_high: None,
            offset: None,
            scale: None,
            rename_to: None,
        })
    }

    pub fn with_rename_to(mut self, target: &str) -> Self {
        self.rename_to = Some(target.to_string());
        self
    }

    pub fn with_uom(mut self, uom: &str) -> Self {
        self.uom = Some(uom.to_string());
        self
    }

    pub fn with_range(mut self, low: f64, high: f64) -> Self {
        self.range_low = Some(low);
        self.range_high = Some(high);
        self
    }

    pub fn with_calibration(mut self, offset: f64, scale: f64) -> Self {
        self.offset = Some(offset);
        self.scale = Some(scale);
        self
    }

    pub fn matches(&self, label: &str) -> bool {
        self.label_pattern.is_match(label)
    }

    /// Non-empty rename target, if any.
    pub fn rename_target(&self) -> Option<&str> {
        self.rename_to.as_deref().filter(|t| !t.is_empty())
    }
}

/// Compiles `pattern` so that it has to match the entire label.
pub fn anchored_regex(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})$", pattern))?)
}

/// What the next invocation needs to resume a vital-sign file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalContinuation {
    pub parameter: String,
    pub start_time: NaiveDateTime,
    pub filename: PathBuf,
}

/// State threaded by the caller between sequential `convert` calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionState {
    /// Waveform file still being extended, if any.
    pub last_bin_filename: Option<PathBuf>,
    pub vital_files: Vec<VitalContinuation>,
    /// Execution timestamp of the session, used for the `exetime` tag.
    pub execution_time: NaiveDateTime,
}

impl ConversionState {
    pub fn new(execution_time: NaiveDateTime) -> Self {
        ConversionState {
            last_bin_filename: None,
            vital_files: Vec::new(),
            execution_time,
        }
    }

    pub fn add_or_update_vital_file(&mut self, parameter: &str, start_time: NaiveDateTime, filename: &Path) {
        match self.vital_files.iter_mut().find(|v| v.parameter == parameter) {
            Some(existing) => {
                existing.start_time = start_time;
                existing.filename = filename.to_path_buf();
            }
            None => self.vital_files.push(VitalContinuation {
                parameter: parameter.to_string(),
                start_time,
                filename: filename.to_path_buf(),
            }),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Every waveform file finalized so far, in order, without duplicates.
#[derive(Debug, Clone, Default)]
pub struct OutputFileRegistry {
    seen: HashSet<PathBuf>,
    files: Vec<PathBuf>,
}

impl OutputFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the file was already registered.
    pub fn register(&mut self, path: &Path) -> bool {
        if !self.seen.insert(path.to_path_buf()) {
            return false;
        }
        self.files.push(path.to_path_buf());
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.files.clear();
    }
}

/// Non-fatal report of a discontinuity between two waveform blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct GapWarning {
    pub collection_time: String,
    pub gap_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_parse() {
        assert_eq!(Reading::parse("72"), Reading::Value(72.0));
        assert_eq!(Reading::parse(" 36.6 "), Reading::Value(36.6));
        assert_eq!(Reading::parse("--"), Reading::Unparseable);
        assert_eq!(Reading::parse(""), Reading::Unparseable);
        assert_eq!(Reading::parse("n/a").or_sentinel(-1.0), -1.0);
    }

    #[test]
    fn test_registry_deduplicates() {
        let mut registry = OutputFileRegistry::new();
        assert!(registry.register(Path::new("a.bin")));
        assert!(registry.register(Path::new("b.bin")));
        assert!(!registry.register(Path::new("a.bin")));
        assert_eq!(registry.files(), &[PathBuf::from("a.bin"), PathBuf::from("b.bin")]);
    }

    #[test]
    fn test_add_or_update_vital_file() {
        let t0 = chrono::NaiveDate::from_ymd_opt(2019, 4, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(60);
        let mut state = ConversionState::new(t0);
        state.add_or_update_vital_file("HR", t0, Path::new("hr.vital"));
        state.add_or_update_vital_file("SPO2", t0, Path::new("spo2.vital"));
        state.add_or_update_vital_file("HR", t1, Path::new("hr2.vital"));

        assert_eq!(state.vital_files.len(), 2);
        assert_eq!(state.vital_files[0].start_time, t1);
        assert_eq!(state.vital_files[0].filename, PathBuf::from("hr2.vital"));
    }

    #[test]
    fn test_anchored_pattern() {
        let entry = ChannelConfigEntry::new("ECG.*").unwrap();
        assert!(entry.matches("ECG II"));
        assert!(!entry.matches("aECG"));
        let entry = ChannelConfigEntry::new("I").unwrap();
        assert!(entry.matches("I"));
        assert!(!entry.matches("II"));
    }
}
