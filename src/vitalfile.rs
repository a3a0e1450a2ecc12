use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{ConvertError, Result};
use crate::utils::{field_to_string, fixed_field};

/// Size of the vital file header in bytes
pub const VITAL_HEADER_SIZE: usize = 72;
/// Size of one vital record in bytes
pub const VITAL_RECORD_SIZE: usize = 32;

/// 生命体征文件头
#[derive(Debug, Clone, PartialEq)]
pub struct VitalHeader {
    pub label: String,
    pub uom: String,
    pub unit: String,
    pub bed: String,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
}

impl VitalHeader {
    pub fn new(label: &str, uom: &str, unit: &str, bed: &str, start: &NaiveDateTime) -> Self {
        VitalHeader {
            label: label.to_string(),
            uom: uom.to_string(),
            unit: unit.to_string(),
            bed: bed.to_string(),
            year: start.year(),
            month: start.month() as i32,
            day: start.day() as i32,
            hour: start.hour() as i32,
            minute: start.minute() as i32,
            second: start.second() as i32,
        }
    }

    pub fn start_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)
    }

    fn encode(&self) -> [u8; VITAL_HEADER_SIZE] {
        let mut buf = [0u8; VITAL_HEADER_SIZE];
        buf[0..16].copy_from_slice(&fixed_field::<16>(&self.label));
        buf[16..24].copy_from_slice(&fixed_field::<8>(&self.uom));
        buf[24..32].copy_from_slice(&fixed_field::<8>(&self.unit));
        buf[32..40].copy_from_slice(&fixed_field::<8>(&self.bed));
        let fields = [self.year, self.month, self.day, self.hour, self.minute, self.second];
        for (i, v) in fields.iter().enumerate() {
            let at = 40 + i * 4;
            buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
        }
        buf
    }

    fn decode(buf: &[u8; VITAL_HEADER_SIZE]) -> Self {
        let int_at = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&buf[at..at + 4]);
            i32::from_le_bytes(bytes)
        };
        VitalHeader {
            label: field_to_string(&buf[0..16]),
            uom: field_to_string(&buf[16..24]),
            unit: field_to_string(&buf[24..32]),
            bed: field_to_string(&buf[32..40]),
            year: int_at(40),
            month: int_at(44),
            day: int_at(48),
            hour: int_at(52),
            minute: int_at(56),
            second: int_at(60),
        }
    }
}

/// One stored reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalRecord {
    pub value: f64,
    /// Seconds since the file start time
    pub offset: f64,
    pub low: f64,
    pub high: f64,
}

/// Per-parameter vital-sign file
///
/// Records are always appended at the end of the file.
pub struct VitalFile {
    path: PathBuf,
    file: File,
    header: Option<VitalHeader>,
}

impl VitalFile {
    /// Creates (or truncates) a vital file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ConvertError::output_file(path.as_ref(), e))?;
        Ok(VitalFile {
            path: path.as_ref().to_path_buf(),
            file,
            header: None,
        })
    }

    /// Opens an existing vital file to append more records
    pub fn open_append<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ConvertError::output_file(path.as_ref(), e))?;
        Ok(VitalFile {
            path: path.as_ref().to_path_buf(),
            file,
            header: None,
        })
    }

    /// Opens a vital file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .map_err(|e| ConvertError::output_file(path.as_ref(), e))?;
        Ok(VitalFile {
            path: path.as_ref().to_path_buf(),
            file,
            header: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Option<&VitalHeader> {
        self.header.as_ref()
    }

    pub fn set_header(&mut self, header: VitalHeader) {
        self.header = Some(header);
    }

    pub fn write_header(&mut self) -> Result<()> {
        let header = self
            .header
            .as_ref()
            .ok_or_else(|| ConvertError::InvalidFormat("Vital header not set".to_string()))?;
        let buf = header.encode();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn read_header(&mut self) -> Result<&VitalHeader> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; VITAL_HEADER_SIZE];
        self.file.read_exact(&mut buf)?;
        Ok(self.header.insert(VitalHeader::decode(&buf)))
    }

    /// 追加一条记录
    pub fn write_vital_data(&mut self, value: f64, offset: f64, low: f64, high: f64) -> Result<()> {
        let mut buf = [0u8; VITAL_RECORD_SIZE];
        buf[0..8].copy_from_slice(&value.to_le_bytes());
        buf[8..16].copy_from_slice(&offset.to_le_bytes());
        buf[16..24].copy_from_slice(&low.to_le_bytes());
        buf[24..32].copy_from_slice(&high.to_le_bytes());
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    pub fn read_records(&mut self) -> Result<Vec<VitalRecord>> {
        self.file.seek(SeekFrom::Start(VITAL_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        if buf.len() % VITAL_RECORD_SIZE != 0 {
            return Err(ConvertError::InvalidFormat(format!(
                "{}: trailing partial record",
                self.path.display()
            )));
        }

        let f64_at = |chunk: &[u8], at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&chunk[at..at + 8]);
            f64::from_le_bytes(bytes)
        };
        Ok(buf
            .chunks_exact(VITAL_RECORD_SIZE)
            .map(|chunk| VitalRecord {
                value: f64_at(chunk, 0),
                offset: f64_at(chunk, 8),
                low: f64_at(chunk, 16),
                high: f64_at(chunk, 24),
            })
            .collect())
    }

    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    #[test]
    fn test_write_then_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("hr.vital");
        let start = NaiveDate::from_ymd_opt(2019, 4, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();

        let mut file = VitalFile::create(&path).unwrap();
        file.set_header(VitalHeader::new("HR", "bpm", "ICU1", "07", &start));
        file.write_header().unwrap();
        file.write_vital_data(80.0, 0.0, 50.0, 120.0).unwrap();
        file.close().unwrap();

        let mut file = VitalFile::open_append(&path).unwrap();
        file.write_vital_data(82.0, 30.0, 50.0, 120.0).unwrap();
        file.close().unwrap();

        let mut file = VitalFile::open(&path).unwrap();
        let header = file.read_header().unwrap().clone();
        assert_eq!(header.label, "HR");
        assert_eq!(header.bed, "07");
        assert_eq!(header.start_datetime(), Some(start));

        let records = file.read_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].value, 82.0);
        assert_eq!(records[1].offset, 30.0);
    }

    #[test]
    fn test_write_header_requires_header() {
        let dir = TempDir::new().unwrap();
        let mut file = VitalFile::create(dir.child("none.vital")).unwrap();
        assert!(file.write_header().is_err());
    }
}
