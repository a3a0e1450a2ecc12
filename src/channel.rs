use regex::Regex;

use crate::error::Result;
use crate::types::{anchored_regex, ChannelConfigEntry};

/// Default attributes written for a channel without a matching config entry
pub const DEFAULT_RANGE_LOW: f64 = 0.0;
pub const DEFAULT_RANGE_HIGH: f64 = 100.0;
pub const DEFAULT_OFFSET: f64 = 0.0;
pub const DEFAULT_SCALE: f64 = 1.0;

/// Output attributes of one channel
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelAttributes {
    pub uom: String,
    pub range_low: f64,
    pub range_high: f64,
    pub offset: f64,
    pub scale: f64,
}

/// Filters channel labels and looks up per-channel overrides
///
/// Entries are tried in list order; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct ChannelMatcher {
    patterns: Vec<Regex>,
    entries: Vec<ChannelConfigEntry>,
}

impl ChannelMatcher {
    pub fn new(patterns: Vec<Regex>, entries: Vec<ChannelConfigEntry>) -> Self {
        ChannelMatcher { patterns, entries }
    }

    /// Compiles textual inclusion patterns
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S], entries: Vec<ChannelConfigEntry>) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| anchored_regex(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(ChannelMatcher { patterns, entries })
    }

    pub fn set_patterns(&mut self, patterns: Vec<Regex>) {
        self.patterns = patterns;
    }

    pub fn entries(&self) -> &[ChannelConfigEntry] {
        &self.entries
    }

    /// True when no inclusion list is configured or `label` matches one of it
    pub fn include_channel(&self, label: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(label))
    }

    pub fn resolve_config(&self, label: &str) -> Option<&ChannelConfigEntry> {
        self.entries.iter().find(|e| e.matches(label))
    }

    /// Attributes to write for `label`, `xml_uom` being the unit found in the export
    pub fn resolve_attributes(&self, label: &str, xml_uom: &str) -> ChannelAttributes {
        match self.resolve_config(label) {
            Some(entry) => ChannelAttributes {
                uom: entry.uom.clone().unwrap_or_else(|| xml_uom.to_string()),
                range_low: entry.range_low.unwrap_or(DEFAULT_RANGE_LOW),
                range_high: entry.range_high.unwrap_or(DEFAULT_RANGE_HIGH),
                offset: entry.offset.unwrap_or(DEFAULT_OFFSET),
                scale: entry.scale.unwrap_or(DEFAULT_SCALE),
            },
            None => ChannelAttributes {
                uom: xml_uom.to_string(),
                range_low: DEFAULT_RANGE_LOW,
                range_high: DEFAULT_RANGE_HIGH,
                offset: DEFAULT_OFFSET,
                scale: DEFAULT_SCALE,
            },
        }
    }

    /// New label for `label`, if a matching entry renames it
    pub fn rename_target(&self, label: &str) -> Option<&str> {
        self.resolve_config(label).and_then(ChannelConfigEntry::rename_target)
    }

    pub fn has_rename_targets(&self) -> bool {
        self.entries.iter().any(|e| e.rename_target().is_some())
    }
}
