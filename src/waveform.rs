//! Waveform output file lifecycle: rollover, append and gap handling.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::binfile::{BinFile, CfwbChannel, CfwbHeader, OpenMode};
use crate::channel::ChannelMatcher;
use crate::error::Result;
use crate::filename::{FilenameResolver, TagMap};
use crate::gap::{expected_continuation, measured_gap, GapPolicy};
use crate::types::{ConversionState, GapWarning, OutputFileRegistry, WaveformBlock};
use crate::utils::parse_timestamp;

/// True when `next` differs from `active` in length or in any position
pub fn channels_changed(active: &[String], next: &[String]) -> bool {
    active != next
}

/// Everything a block needs besides the block itself
pub struct WaveformContext<'a> {
    pub matcher: &'a ChannelMatcher,
    pub resolver: &'a FilenameResolver,
    pub tags: &'a mut TagMap,
    pub registry: &'a mut OutputFileRegistry,
    pub state: &'a mut ConversionState,
}

/// Owns the waveform file currently being written
///
/// At most one file is open at a time. Its channel labels are fixed for its
/// whole life; a block with other labels closes it and opens a new one.
pub struct WaveformFileManager {
    sample_rate: f64,
    gap_policy: GapPolicy,
    warning_on_gaps: bool,
    file: Option<BinFile>,
    header_start: Option<NaiveDateTime>,
    active_labels: Vec<String>,
    num_samples: usize,
    first_measurement: bool,
    gap_warnings: Vec<GapWarning>,
}

impl WaveformFileManager {
    pub fn new(sample_rate: f64, gap_policy: GapPolicy, warning_on_gaps: bool) -> Self {
        WaveformFileManager {
            sample_rate,
            gap_policy,
            warning_on_gaps,
            file: None,
            header_start: None,
            active_labels: Vec::new(),
            num_samples: 0,
            first_measurement: true,
            gap_warnings: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn active_labels(&self) -> &[String] {
        &self.active_labels
    }

    pub fn header_start(&self) -> Option<NaiveDateTime> {
        self.header_start
    }

    /// Frames stored in the open file
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.file.as_ref().map(BinFile::path)
    }

    /// Forgets the header fields of the last file
    pub fn reset(&mut self) {
        self.release();
        self.header_start = None;
        self.active_labels.clear();
        self.num_samples = 0;
    }

    /// Drops the open handle without finalizing its name
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            debug!("releasing {}", file.path().display());
        }
    }

    pub fn take_gap_warnings(&mut self) -> Vec<GapWarning> {
        std::mem::take(&mut self.gap_warnings)
    }

    /// Starts a conversion call, reopening `last` when a file is being continued
    ///
    /// Gap warnings left over from the previous call are dropped.
    pub fn begin(&mut self, last: Option<&Path>) -> Result<()> {
        self.release();
        self.first_measurement = true;
        self.gap_warnings.clear();

        let Some(path) = last else {
            return Ok(());
        };

        let mut file = BinFile::open(path, OpenMode::ReadWrite)?;
        file.read_header()?;
        self.header_start = Some(file.header().start_datetime()?);
        self.active_labels = file.channels().iter().map(|c| c.title.clone()).collect();
        self.num_samples = file.header().samples_per_channel as usize;
        debug!(
            "resuming {} with {} channels, {} samples",
            path.display(),
            self.active_labels.len(),
            self.num_samples
        );
        self.file = Some(file);
        Ok(())
    }

    /// Writes one filtered, resampled block, returns the frames written
    pub fn process_block(&mut self, block: &WaveformBlock, ctx: &mut WaveformContext) -> Result<usize> {
        let collection_time = parse_timestamp(&block.collection_time)?;
        let labels = block.labels();

        let rollover = !self.is_open() || (!labels.is_empty() && channels_changed(&self.active_labels, &labels));
        if rollover {
            self.rollover(block, labels, collection_time, ctx)
        } else if labels.is_empty() {
            Ok(0)
        } else {
            self.append(block, collection_time)
        }
    }

    fn rollover(
        &mut self,
        block: &WaveformBlock,
        labels: Vec<String>,
        start: NaiveDateTime,
        ctx: &mut WaveformContext,
    ) -> Result<usize> {
        self.finish(ctx)?;

        let exe_time = ctx.state.execution_time;
        let path = ctx.resolver.temporary_waveform_filename(ctx.tags, &start, &exe_time)?;
        info!("creating waveform file {} ({} channels)", path.display(), labels.len());

        let (file, written) = match self.create_file(&path, block, start, ctx.matcher) {
            Ok(created) => created,
            Err(e) => {
                // 创建失败的文件不能留给下一次续写
                if path.exists() && fs::remove_file(&path).is_ok() {
                    debug!("removed incomplete {}", path.display());
                }
                return Err(e);
            }
        };

        ctx.state.last_bin_filename = Some(path);
        self.file = Some(file);
        self.header_start = Some(start);
        self.active_labels = labels;
        self.num_samples = written;
        self.first_measurement = false;
        Ok(written)
    }

    fn create_file(
        &self,
        path: &Path,
        block: &WaveformBlock,
        start: NaiveDateTime,
        matcher: &ChannelMatcher,
    ) -> Result<(BinFile, usize)> {
        let mut file = BinFile::create(path)?;
        file.set_header(CfwbHeader::new(self.sample_rate, &start));
        for channel in &block.channels {
            let attrs = matcher.resolve_attributes(&channel.label, &channel.unit_of_measure);
            file.add_channel(CfwbChannel::new(
                &channel.label,
                &attrs.uom,
                attrs.scale,
                attrs.offset,
                attrs.range_low,
                attrs.range_high,
            ));
        }
        file.write_header()?;

        let data: Vec<Vec<i16>> = block.channels.iter().map(|c| c.samples.clone()).collect();
        let written = file.write_channel_data(&data)?;
        file.update_samples_per_channel(written, true)?;
        Ok((file, written))
    }

    fn append(&mut self, block: &WaveformBlock, collection_time: NaiveDateTime) -> Result<usize> {
        let (Some(file), Some(start)) = (self.file.as_mut(), self.header_start) else {
            return Ok(0);
        };

        let expected = expected_continuation(&start, self.num_samples, self.sample_rate);
        let actual = measured_gap(&expected, &collection_time);
        let gap = self.gap_policy.effective_gap(actual, self.first_measurement);
        if gap != 0 && self.warning_on_gaps {
            warn!(
                "Waveforms CollectionTime: {} shows gap (or overlap) = {} secs",
                block.collection_time, gap
            );
            self.gap_warnings.push(GapWarning {
                collection_time: block.collection_time.clone(),
                gap_seconds: gap,
            });
        }

        let data: Vec<Vec<i16>> = block.channels.iter().map(|c| c.samples.clone()).collect();
        let written = file.write_channel_data_with_gap(&data, self.sample_rate, gap)?;
        self.num_samples += written;
        file.update_samples_per_channel(self.num_samples, true)?;
        self.first_measurement = false;
        Ok(written)
    }

    /// Closes the open file, gives it its final name and registers it
    ///
    /// Returns the final path, or `None` when no file was open.
    pub fn finish(&mut self, ctx: &mut WaveformContext) -> Result<Option<PathBuf>> {
        let (Some(file), Some(start)) = (self.file.take(), self.header_start) else {
            return Ok(None);
        };

        let current = file.path().to_path_buf();
        file.close()?;

        let exe_time = ctx.state.execution_time;
        let last = ctx.resolver.finalize_waveform(
            ctx.tags,
            &current,
            &start,
            self.num_samples,
            self.sample_rate,
            &exe_time,
        )?;
        ctx.state.last_bin_filename = Some(last.clone());
        if ctx.registry.register(&last) {
            debug!("registered output file {}", last.display());
        }
        Ok(Some(last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChannelSample;
    use std::collections::HashMap;
    use temp_dir::TempDir;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn block(time: &str, names: &[&str], samples: usize) -> WaveformBlock {
        WaveformBlock {
            collection_time: time.to_string(),
            collection_time_utc: String::new(),
            channels: names
                .iter()
                .map(|n| ChannelSample {
                    id: 1,
                    label: n.to_string(),
                    native_rate_hz: 4.0,
                    sample_count: samples,
                    unit_of_measure: "mV".to_string(),
                    samples: vec![1; samples],
                })
                .collect(),
        }
    }

    struct Fixture {
        dir: TempDir,
        matcher: ChannelMatcher,
        resolver: FilenameResolver,
        tags: TagMap,
        registry: OutputFileRegistry,
        state: ConversionState,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let resolver = FilenameResolver::new(dir.path(), "wf_{starttime}_{endtime}", "bin", HashMap::new());
            Fixture {
                dir,
                matcher: ChannelMatcher::default(),
                resolver,
                tags: TagMap::new(),
                registry: OutputFileRegistry::new(),
                state: ConversionState::new(parse_timestamp("2019-04-01T12:00:00").unwrap()),
            }
        }

        fn ctx(&mut self) -> WaveformContext<'_> {
            WaveformContext {
                matcher: &self.matcher,
                resolver: &self.resolver,
                tags: &mut self.tags,
                registry: &mut self.registry,
                state: &mut self.state,
            }
        }
    }

    #[test]
    fn test_channels_changed() {
        assert!(!channels_changed(&labels(&["I", "II"]), &labels(&["I", "II"])));
        assert!(channels_changed(&labels(&["I", "II"]), &labels(&["II", "I"])));
        assert!(channels_changed(&labels(&["I", "II"]), &labels(&["I"])));
        assert!(channels_changed(&labels(&[]), &labels(&["I"])));
    }

    #[test]
    fn test_append_then_rollover() {
        let mut fx = Fixture::new();
        let mut manager = WaveformFileManager::new(4.0, GapPolicy::default(), true);
        manager.begin(None).unwrap();

        let mut ctx = fx.ctx();
        assert_eq!(manager.process_block(&block("2019-04-01T10:00:00", &["I", "II"], 8), &mut ctx).unwrap(), 8);
        assert_eq!(manager.process_block(&block("2019-04-01T10:00:02", &["I", "II"], 8), &mut ctx).unwrap(), 8);
        assert_eq!(manager.num_samples(), 16);
        assert!(manager.take_gap_warnings().is_empty());

        // empty block keeps the current file
        assert_eq!(manager.process_block(&block("2019-04-01T10:00:04", &[], 0), &mut ctx).unwrap(), 0);
        assert_eq!(manager.active_labels(), &labels(&["I", "II"])[..]);

        assert_eq!(manager.process_block(&block("2019-04-01T10:00:04", &["I"], 4), &mut ctx).unwrap(), 4);
        assert_eq!(ctx.registry.len(), 1);
        assert!(ctx.registry.files()[0].ends_with("wf_20190401100000_20190401100004.bin"));

        let last = manager.finish(&mut ctx).unwrap().unwrap();
        assert!(last.ends_with("wf_20190401100004_20190401100005.bin"));
        assert_eq!(ctx.registry.len(), 2);
        assert_eq!(ctx.state.last_bin_filename.as_deref(), Some(last.as_path()));
        drop(ctx);
        assert!(fx.dir.path().join("wf_20190401100004_20190401100005.bin").exists());
    }

    #[test]
    fn test_gap_is_reported_and_filled() {
        let mut fx = Fixture::new();
        let mut manager = WaveformFileManager::new(4.0, GapPolicy::default(), true);
        manager.begin(None).unwrap();

        let mut ctx = fx.ctx();
        manager.process_block(&block("2019-04-01T10:00:00", &["I"], 8), &mut ctx).unwrap();
        let written = manager.process_block(&block("2019-04-01T10:00:07", &["I"], 8), &mut ctx).unwrap();
        assert_eq!(written, 8 + 5 * 4);

        let warnings = manager.take_gap_warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].gap_seconds, 5);
    }

    #[test]
    fn test_resume_continues_same_file() {
        let mut fx = Fixture::new();
        let mut manager = WaveformFileManager::new(4.0, GapPolicy::default(), false);
        manager.begin(None).unwrap();
        {
            let mut ctx = fx.ctx();
            manager.process_block(&block("2019-04-01T10:00:00", &["I"], 8), &mut ctx).unwrap();
            manager.finish(&mut ctx).unwrap();
        }
        let last = fx.state.last_bin_filename.clone().unwrap();

        let mut manager = WaveformFileManager::new(4.0, GapPolicy::default(), false);
        manager.begin(Some(&last)).unwrap();
        assert_eq!(manager.num_samples(), 8);
        assert_eq!(manager.active_labels(), &labels(&["I"])[..]);

        let mut ctx = fx.ctx();
        manager.process_block(&block("2019-04-01T10:00:02", &["I"], 8), &mut ctx).unwrap();
        let again = manager.finish(&mut ctx).unwrap().unwrap();
        assert_eq!(again, last);
        assert_eq!(ctx.registry.len(), 1);
    }
}
