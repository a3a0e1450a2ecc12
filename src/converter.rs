//! BedMasterEx XML to CFWB/vital conversion.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::binfile::{BinFile, OpenMode};
use crate::channel::ChannelMatcher;
use crate::config::ConverterConfig;
use crate::error::{ConvertError, Result};
use crate::filename::{FilenameResolver, TagMap};
use crate::resample::WaveResampler;
use crate::types::{anchored_regex, ChannelSample, ConversionState, GapWarning, OutputFileRegistry, WaveformBlock};
use crate::vital::{VitalFileManager, VitalSession};
use crate::waveform::{WaveformContext, WaveformFileManager};
use crate::xml::{read_document, Section, WaveformsSection};

/// Converts a sequence of XML exports of one monitoring session
///
/// Call [`Converter::convert`] once per export in chronological order,
/// threading the same [`ConversionState`] through every call, then run
/// [`Converter::rename_channels`] once.
///
/// # Examples
///
/// ```rust
/// use xml2bin::{Converter, ConverterConfig, ConversionState, TagMap};
/// # use xml2bin::doctest_utils::{write_sample_xml, SampleWaveform};
/// # let dir = std::env::temp_dir().join("xml2bin_converter_doc");
/// # std::fs::create_dir_all(&dir)?;
/// # let xml = dir.join("segment1.xml");
/// # write_sample_xml(&xml, &[SampleWaveform::new("2019-04-01T10:00:00", &["I", "II"], 480)], &[])?;
///
/// let config = ConverterConfig {
///     output_dir: dir.clone(),
///     output_fn_pattern: "bed07_{starttime}_{endtime}".to_string(),
///     ..Default::default()
/// };
/// let mut converter = Converter::new(&config)?;
/// let mut state = ConversionState::new(chrono::Local::now().naive_local());
/// let mut tags = TagMap::new();
///
/// let written = converter.convert(&xml, &mut tags, &mut state)?;
/// assert_eq!(written, 480);
/// assert_eq!(converter.output_files().len(), 1);
/// # std::fs::remove_dir_all(&dir).ok();
/// # Ok::<(), xml2bin::ConvertError>(())
/// ```
pub struct Converter {
    resolver: FilenameResolver,
    matcher: ChannelMatcher,
    resampler: WaveResampler,
    waveform: WaveformFileManager,
    registry: OutputFileRegistry,
}

impl Converter {
    pub fn new(config: &ConverterConfig) -> Result<Self> {
        config.validate()?;
        let resampler = WaveResampler::new(config.default_samples_per_sec)?;
        Ok(Converter {
            resolver: config.filename_resolver(),
            matcher: config.channel_matcher()?,
            resampler,
            waveform: WaveformFileManager::new(
                config.default_samples_per_sec,
                config.gap_policy(),
                config.warning_on_gaps,
            ),
            registry: OutputFileRegistry::new(),
        })
    }

    pub fn matcher(&self) -> &ChannelMatcher {
        &self.matcher
    }

    pub fn resolver(&self) -> &FilenameResolver {
        &self.resolver
    }

    pub fn default_samples_per_sec(&self) -> f64 {
        self.resampler.target_rate()
    }

    pub fn set_default_samples_per_sec(&mut self, rate: f64) -> Result<()> {
        self.resampler = WaveResampler::new(rate)?;
        self.waveform.set_sample_rate(rate);
        Ok(())
    }

    /// Replaces the channel inclusion list; an empty list keeps every channel
    pub fn set_channel_patterns<S: AsRef<str>>(&mut self, patterns: &[S]) -> Result<()> {
        let patterns = patterns
            .iter()
            .map(|p| anchored_regex(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.matcher.set_patterns(patterns);
        Ok(())
    }

    /// Forgets the header of the last waveform file
    pub fn clear_state(&mut self) {
        self.waveform.reset();
    }

    pub fn clear_output_files(&mut self) {
        self.registry.clear();
    }

    /// Waveform files finalized so far, in creation order
    pub fn output_files(&self) -> &[PathBuf] {
        self.registry.files()
    }

    /// Gap warnings of the latest [`Converter::convert`] call
    ///
    /// Each call starts with an empty list, so undrained warnings do not
    /// accumulate across a session.
    pub fn take_gap_warnings(&mut self) -> Vec<GapWarning> {
        self.waveform.take_gap_warnings()
    }

    /// Converts one export, returns the number of waveform frames written
    ///
    /// `state` is updated so that the next call continues the same files.
    /// Open handles are released whether the call succeeds or not.
    pub fn convert<P: AsRef<Path>>(&mut self, xml: P, tags: &mut TagMap, state: &mut ConversionState) -> Result<usize> {
        let xml = xml.as_ref();
        if !xml.exists() {
            return Err(ConvertError::SourceNotFound(xml.display().to_string()));
        }

        let result = self.run(xml, tags, state);
        if result.is_err() {
            self.waveform.release();
        }
        result
    }

    fn run(&mut self, xml: &Path, tags: &mut TagMap, state: &mut ConversionState) -> Result<usize> {
        self.waveform.begin(state.last_bin_filename.as_deref())?;
        let mut vitals = VitalFileManager::resume(&state.vital_files)?;

        info!(
            "Processing XML file: {}",
            xml.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );

        let mut total = 0;
        match read_document(xml)? {
            Some(doc) => {
                let session = VitalSession {
                    unit: &doc.file_info.unit,
                    bed: &doc.file_info.bed,
                    execution_time: state.execution_time,
                };
                for section in &doc.sections {
                    match section {
                        Section::Waveforms(section) => {
                            let block = self.decode_block(section)?;
                            let mut ctx = WaveformContext {
                                matcher: &self.matcher,
                                resolver: &self.resolver,
                                tags: &mut *tags,
                                registry: &mut self.registry,
                                state: &mut *state,
                            };
                            total += self.waveform.process_block(&block, &mut ctx)?;
                        }
                        Section::VitalSigns(block) => {
                            let written = vitals.process_block(block, &self.resolver, tags, &session)?;
                            debug!("{} vital signs at {}", written, block.collection_time);
                        }
                    }
                }
            }
            None => debug!("{} is not a BedMasterEx export", xml.display()),
        }

        let mut ctx = WaveformContext {
            matcher: &self.matcher,
            resolver: &self.resolver,
            tags,
            registry: &mut self.registry,
            state: &mut *state,
        };
        self.waveform.finish(&mut ctx)?;
        vitals.close_all(state)?;
        Ok(total)
    }

    /// Filters and resamples the channels of one `Waveforms` section
    pub fn decode_block(&self, section: &WaveformsSection) -> Result<WaveformBlock> {
        let mut channels = Vec::with_capacity(section.data.len());
        for data in &section.data {
            if !self.matcher.include_channel(&data.label) {
                continue;
            }
            channels.push(ChannelSample {
                id: data.id,
                label: data.label.clone(),
                native_rate_hz: data.sample_rate,
                sample_count: data.samples,
                unit_of_measure: data.uom.clone(),
                samples: self.resampler.decode(&data.text, data.sample_rate)?,
            });
        }
        Ok(WaveformBlock {
            collection_time: section.collection_time.clone(),
            collection_time_utc: section.collection_time_utc.clone(),
            channels,
        })
    }

    /// Applies configured `rename_to` targets to every output file
    ///
    /// Only channel definitions are rewritten, sample data is left as is.
    /// Returns the number of files whose header changed.
    pub fn rename_channels(&self, details: bool) -> Result<usize> {
        if !self.matcher.has_rename_targets() {
            return Ok(0);
        }

        info!("Renaming channels in output files...");
        let mut files_changed = 0;
        for path in self.registry.files() {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            debug!("processing {}...", name);

            let mut file = BinFile::open(path, OpenMode::ReadWrite)?;
            file.read_header()?;
            let mut updated = false;
            for channel in file.channels_mut() {
                let Some(target) = self.matcher.rename_target(&channel.title) else {
                    continue;
                };
                if channel.title == target {
                    continue;
                }
                if details {
                    info!("{} file: {} -> {}", name, channel.title, target);
                }
                channel.title = target.to_string();
                updated = true;
            }
            if updated {
                file.write_header()?;
                files_changed += 1;
            }
            file.close()?;
        }

        if files_changed == 0 && details {
            info!("No output files's channel labels need to be changed.");
        }
        Ok(files_changed)
    }
}
