//! Converter settings loaded from JSON.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::ChannelMatcher;
use crate::error::{ConvertError, Result};
use crate::filename::FilenameResolver;
use crate::gap::GapPolicy;
use crate::types::ChannelConfigEntry;

pub const DEFAULT_SAMPLES_PER_SEC: f64 = 240.0;
pub const DEFAULT_OUTPUT_FN_EXT: &str = "bin";

fn default_samples_per_sec() -> f64 {
    DEFAULT_SAMPLES_PER_SEC
}

fn default_output_fn_ext() -> String {
    DEFAULT_OUTPUT_FN_EXT.to_string()
}

/// Serialized form of a [`ChannelConfigEntry`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSetting {
    pub label_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_to: Option<String>,
}

impl ChannelSetting {
    /// Compiles the label pattern
    pub fn compile(&self) -> Result<ChannelConfigEntry> {
        let mut entry = ChannelConfigEntry::new(&self.label_pattern)?;
        entry.uom = self.uom.clone();
        entry.range_low = self.range_low;
        entry.range_high = self.range_high;
        entry.offset = self.offset;
        entry.scale = self.scale;
        entry.rename_to = self.rename_to.clone();
        Ok(entry)
    }
}

/// Settings of one conversion session
///
/// # Examples
///
/// ```rust
/// use xml2bin::config::ConverterConfig;
///
/// let config: ConverterConfig = serde_json::from_str(r#"{
///     "output_dir": "out",
///     "output_fn_pattern": "{bed}_{starttime}_{endtime}",
///     "channel_patterns": ["I", "II", "V"],
///     "channel_info": [{ "label_pattern": "V", "rename_to": "V1" }]
/// }"#)?;
/// config.validate()?;
/// assert_eq!(config.default_samples_per_sec, 240.0);
/// assert_eq!(config.output_fn_ext, "bin");
/// # Ok::<(), xml2bin::ConvertError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterConfig {
    #[serde(default)]
    pub output_dir: PathBuf,
    pub output_fn_pattern: String,
    #[serde(default = "default_output_fn_ext")]
    pub output_fn_ext: String,
    #[serde(default = "default_samples_per_sec")]
    pub default_samples_per_sec: f64,
    /// Inclusion list; empty keeps every channel
    #[serde(default)]
    pub channel_patterns: Vec<String>,
    #[serde(default)]
    pub channel_info: Vec<ChannelSetting>,
    #[serde(default)]
    pub ignore_gap: bool,
    #[serde(default)]
    pub ignore_gap_between_segs: bool,
    #[serde(default)]
    pub warning_on_gaps: bool,
    /// Tag name → strftime format
    #[serde(default)]
    pub output_fn_time_format: HashMap<String, String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        ConverterConfig {
            output_dir: PathBuf::new(),
            output_fn_pattern: String::new(),
            output_fn_ext: default_output_fn_ext(),
            default_samples_per_sec: DEFAULT_SAMPLES_PER_SEC,
            channel_patterns: Vec::new(),
            channel_info: Vec::new(),
            ignore_gap: false,
            ignore_gap_between_segs: false,
            warning_on_gaps: false,
            output_fn_time_format: HashMap::new(),
        }
    }
}

impl ConverterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| ConvertError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        let config: ConverterConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the sample rate, the filename pattern and every regex
    pub fn validate(&self) -> Result<()> {
        if !(self.default_samples_per_sec > 0.0) || !self.default_samples_per_sec.is_finite() {
            return Err(ConvertError::InvalidSampleRate(self.default_samples_per_sec));
        }
        if self.output_fn_pattern.is_empty() {
            return Err(ConvertError::Config("output_fn_pattern must not be empty".to_string()));
        }
        self.channel_matcher()?;
        Ok(())
    }

    pub fn gap_policy(&self) -> GapPolicy {
        GapPolicy::new(self.ignore_gap, self.ignore_gap_between_segs)
    }

    pub fn channel_entries(&self) -> Result<Vec<ChannelConfigEntry>> {
        self.channel_info.iter().map(ChannelSetting::compile).collect()
    }

    pub fn channel_matcher(&self) -> Result<ChannelMatcher> {
        ChannelMatcher::from_patterns(&self.channel_patterns, self.channel_entries()?)
    }

    pub fn filename_resolver(&self) -> FilenameResolver {
        FilenameResolver::new(
            &self.output_dir,
            &self.output_fn_pattern,
            &self.output_fn_ext,
            self.output_fn_time_format.clone(),
        )
    }
}
