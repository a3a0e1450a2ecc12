//! # BedMasterEx XML to CFWB converter
//!
//! Converts the sequential XML exports written by a BedMasterEx bedside
//! monitoring server into two kinds of binary time-series files:
//!
//! - a multi-channel CFWB waveform file, kept growing across exports until
//!   the set of active waveform channels changes, and
//! - one vital-sign file per parameter (HR, SPO2, ...), kept open for the
//!   whole session.
//!
//! ## Quick Start
//!
//! ### Converting a series of exports
//!
//! ```rust
//! use xml2bin::{Converter, ConverterConfig, ConversionState, TagMap, Result};
//! use xml2bin::binfile::{BinFile, OpenMode};
//! # use xml2bin::doctest_utils::{write_sample_xml, SampleVital, SampleWaveform};
//!
//! fn main() -> Result<()> {
//!     # let dir = std::env::temp_dir().join("xml2bin_lib_doc");
//!     # std::fs::create_dir_all(&dir)?;
//!     # let first = dir.join("segment_001.xml");
//!     # let second = dir.join("segment_002.xml");
//!     # write_sample_xml(&first, &[SampleWaveform::new("2019-04-01T10:00:00", &["I", "II"], 480)],
//!     #     &[SampleVital::new("HR", "2019-04-01T10:00:00", "80")])?;
//!     # write_sample_xml(&second, &[SampleWaveform::new("2019-04-01T10:00:02", &["I", "II"], 480)],
//!     #     &[SampleVital::new("HR", "2019-04-01T10:00:30", "82")])?;
//!     let config = ConverterConfig {
//!         output_dir: dir.clone(),
//!         output_fn_pattern: "bed07_{starttime}_{endtime}".to_string(),
//!         default_samples_per_sec: 240.0,
//!         ..Default::default()
//!     };
//!     let mut converter = Converter::new(&config)?;
//!
//!     // 同一会话的状态在每次调用之间传递
//!     let mut state = ConversionState::new(chrono::Local::now().naive_local());
//!     let mut tags = TagMap::new();
//!     for xml in [&first, &second] {
//!         converter.convert(xml, &mut tags, &mut state)?;
//!     }
//!     converter.rename_channels(false)?;
//!
//!     // Both exports went into one waveform file
//!     let files = converter.output_files();
//!     assert_eq!(files.len(), 1);
//!     let mut file = BinFile::open(&files[0], OpenMode::Read)?;
//!     file.read_header()?;
//!     assert_eq!(file.header().samples_per_channel, 960);
//!     assert_eq!(state.vital_files.len(), 1);
//!     # drop(file);
//!     # std::fs::remove_dir_all(&dir).ok();
//!     Ok(())
//! }
//! ```
//!
//! ### Loading settings from JSON
//!
//! ```rust
//! use xml2bin::ConverterConfig;
//!
//! let config: ConverterConfig = serde_json::from_str(r#"{
//!     "output_dir": "out",
//!     "output_fn_pattern": "{bed}_{starttime}_{endtime}",
//!     "default_samples_per_sec": 240,
//!     "channel_patterns": ["I", "II", "III", "V", "SPO2"],
//!     "channel_info": [
//!         { "label_pattern": "SPO2", "uom": "%", "range_low": 0, "range_high": 100 },
//!         { "label_pattern": "V", "rename_to": "V1" }
//!     ],
//!     "warning_on_gaps": true,
//!     "output_fn_time_format": { "starttime": "%Y%m%d_%H%M%S" }
//! }"#)?;
//! assert!(config.validate().is_ok());
//! # Ok::<(), xml2bin::ConvertError>(())
//! ```
//!
//! ## Gap handling
//!
//! When a block of waveforms does not start exactly where the data already
//! in the file ends, the difference in whole seconds is written as zero
//! samples (a gap) or by dropping leading samples (an overlap), unless the
//! configuration says to ignore it. See [`gap::GapPolicy`].

pub mod binfile;
pub mod channel;
pub mod config;
pub mod converter;
pub mod error;
pub mod filename;
pub mod gap;
pub mod pretty;
pub mod resample;
pub mod types;
pub mod utils;
pub mod vital;
pub mod vitalfile;
pub mod waveform;
pub mod xml;

#[doc(hidden)]
pub mod doctest_utils; // For internal doctest support

// Re-export main types for convenience
pub use config::{ChannelSetting, ConverterConfig};
pub use converter::Converter;
pub use error::{ConvertError, Result};
pub use filename::TagMap;
pub use types::{ChannelConfigEntry, ConversionState, GapWarning, VitalContinuation};

/// Written for a vital value or low alarm limit that is not a number
pub const DEFAULT_VS_LIMIT_LOW: f64 = -999999.0;
/// Written for a high alarm limit that is not a number
pub const DEFAULT_VS_LIMIT_HIGH: f64 = 999999.0;

/// Library version
///
/// # Examples
///
/// ```rust
/// let version = xml2bin::version();
/// assert!(version.contains('.'));
/// ```
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
