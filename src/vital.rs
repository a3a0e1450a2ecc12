use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::error::Result;
use crate::filename::{FilenameResolver, TagMap};
use crate::types::{ConversionState, Reading, VitalContinuation, VitalSignEntry, VitalSignPoint, VitalSignsBlock};
use crate::utils::{fractional_seconds, parse_timestamp};
use crate::vitalfile::{VitalFile, VitalHeader};
use crate::{DEFAULT_VS_LIMIT_HIGH, DEFAULT_VS_LIMIT_LOW};

/// Resolves the numeric fields of a vital sign
///
/// Returns `Ok(None)` for entries without a parameter name. Unparseable
/// value and alarm fields become [`Reading::Unparseable`].
pub fn parse_point(entry: &VitalSignEntry) -> Result<Option<VitalSignPoint>> {
    if entry.parameter.is_empty() {
        return Ok(None);
    }
    Ok(Some(VitalSignPoint {
        parameter: entry.parameter.clone(),
        timestamp: parse_timestamp(&entry.time)?,
        value: Reading::parse(&entry.value),
        unit: entry.uom.clone(),
        alarm_low: Reading::parse(&entry.alarm_limit_low),
        alarm_high: Reading::parse(&entry.alarm_limit_high),
    }))
}

/// Session-level identifiers written into new vital file headers
#[derive(Debug, Clone)]
pub struct VitalSession<'a> {
    pub unit: &'a str,
    pub bed: &'a str,
    pub execution_time: NaiveDateTime,
}

/// Open destination of one vital-sign parameter
pub struct VitalFileRecord {
    pub parameter: String,
    /// Fixed at creation, every offset is relative to it
    pub start_time: NaiveDateTime,
    pub filename: PathBuf,
    file: VitalFile,
}

impl VitalFileRecord {
    /// Appends one point relative to the record's start time
    pub fn append(&mut self, point: &VitalSignPoint) -> Result<()> {
        let offset = fractional_seconds(point.timestamp - self.start_time);
        self.file.write_vital_data(
            point.value.or_sentinel(DEFAULT_VS_LIMIT_LOW),
            offset,
            point.alarm_low.or_sentinel(DEFAULT_VS_LIMIT_LOW),
            point.alarm_high.or_sentinel(DEFAULT_VS_LIMIT_HIGH),
        )
    }
}

/// One vital file per parameter across conversion calls
#[derive(Default)]
pub struct VitalFileManager {
    records: Vec<VitalFileRecord>,
    by_parameter: HashMap<String, usize>,
}

impl VitalFileManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reopens the files recorded by a previous call for appending
    pub fn resume(continuations: &[VitalContinuation]) -> Result<Self> {
        let mut manager = Self::new();
        for c in continuations {
            let file = VitalFile::open_append(&c.filename)?;
            manager.insert(VitalFileRecord {
                parameter: c.parameter.clone(),
                start_time: c.start_time,
                filename: c.filename.clone(),
                file,
            });
        }
        Ok(manager)
    }

    fn insert(&mut self, record: VitalFileRecord) -> usize {
        let idx = self.records.len();
        self.by_parameter.insert(record.parameter.clone(), idx);
        self.records.push(record);
        idx
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn filename(&self, parameter: &str) -> Option<&Path> {
        self.by_parameter
            .get(parameter)
            .map(|&idx| self.records[idx].filename.as_path())
    }

    /// Writes every point of `block`, returns how many were written
    pub fn process_block(
        &mut self,
        block: &VitalSignsBlock,
        resolver: &FilenameResolver,
        tags: &mut TagMap,
        session: &VitalSession,
    ) -> Result<usize> {
        let mut written = 0;
        for entry in &block.entries {
            let Some(point) = parse_point(entry)? else {
                continue;
            };
            let idx = match self.by_parameter.get(&point.parameter) {
                Some(&idx) => idx,
                None => self.open_new(&point, resolver, tags, session)?,
            };
            self.records[idx].append(&point)?;
            written += 1;
        }
        Ok(written)
    }

    fn open_new(
        &mut self,
        point: &VitalSignPoint,
        resolver: &FilenameResolver,
        tags: &mut TagMap,
        session: &VitalSession,
    ) -> Result<usize> {
        let filename = resolver.vital_filename(tags, &point.parameter, &point.timestamp, &session.execution_time)?;
        info!("creating vital file {} for {}", filename.display(), point.parameter);

        let mut file = VitalFile::create(&filename)?;
        file.set_header(VitalHeader::new(
            &point.parameter,
            &point.unit,
            session.unit,
            session.bed,
            &point.timestamp,
        ));
        file.write_header()?;

        Ok(self.insert(VitalFileRecord {
            parameter: point.parameter.clone(),
            start_time: point.timestamp,
            filename,
            file,
        }))
    }

    /// Closes every file and records how to resume it in `state`
    pub fn close_all(self, state: &mut ConversionState) -> Result<()> {
        for record in self.records {
            debug!("closing vital file {}", record.filename.display());
            record.file.close()?;
            state.add_or_update_vital_file(&record.parameter, record.start_time, &record.filename);
        }
        Ok(())
    }
}
