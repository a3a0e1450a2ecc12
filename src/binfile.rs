use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{ConvertError, Result};
use crate::utils::{field_to_string, fixed_field};

/// Magic bytes at the start of every CFWB file
pub const CFWB_MAGIC: &[u8; 4] = b"CFWB";
pub const CFWB_VERSION: i32 = 1;
/// Size of the file header in bytes
pub const CFWB_HEADER_SIZE: usize = 68;
/// Size of one channel definition in bytes
pub const CFWB_CHANNEL_SIZE: usize = 96;

pub const FORMAT_DOUBLE: i32 = 1;
pub const FORMAT_FLOAT: i32 = 2;
pub const FORMAT_SHORT: i32 = 3;

/// 头部中 SamplesPerChannel 字段的字节偏移
const SAMPLES_PER_CHANNEL_OFFSET: u64 = 56;

/// CFWB file header
#[derive(Debug, Clone, PartialEq)]
pub struct CfwbHeader {
    /// Sample period in seconds
    pub secs_per_tick: f64,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub hour: i32,
    pub minute: i32,
    pub second: f64,
    pub trigger: f64,
    pub n_channels: i32,
    pub samples_per_channel: i32,
    pub time_channel: i32,
    pub data_format: i32,
}

impl CfwbHeader {
    /// Header for a new 16-bit file starting at `start`
    pub fn new(sample_rate: f64, start: &NaiveDateTime) -> Self {
        let mut header = CfwbHeader {
            secs_per_tick: 1.0 / sample_rate,
            ..Self::empty()
        };
        header.set_start(start);
        header
    }

    fn empty() -> Self {
        CfwbHeader {
            secs_per_tick: 1.0,
            year: 0,
            month: 0,
            day: 0,
            hour: 0,
            minute: 0,
            second: 0.0,
            trigger: 0.0,
            n_channels: 0,
            samples_per_channel: 0,
            time_channel: 0,
            data_format: FORMAT_SHORT,
        }
    }

    /// 设置开始时间（整秒）
    pub fn set_start(&mut self, start: &NaiveDateTime) {
        self.year = start.year();
        self.month = start.month() as i32;
        self.day = start.day() as i32;
        self.hour = start.hour() as i32;
        self.minute = start.minute() as i32;
        self.second = start.second() as f64;
    }

    pub fn sample_rate(&self) -> f64 {
        1.0 / self.secs_per_tick
    }

    /// Start time stored in the header
    pub fn start_datetime(&self) -> Result<NaiveDateTime> {
        let whole = self.second.floor();
        let nanos = ((self.second - whole) * 1e9).round() as u32;
        NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32)
            .and_then(|d| d.and_hms_nano_opt(self.hour as u32, self.minute as u32, whole as u32, nanos))
            .ok_or_else(|| ConvertError::InvalidFormat(format!(
                "Invalid start time in header: {}-{}-{} {}:{}:{}",
                self.year, self.month, self.day, self.hour, self.minute, self.second
            )))
    }

    fn encode(&self) -> [u8; CFWB_HEADER_SIZE] {
        let mut buf = [0u8; CFWB_HEADER_SIZE];
        buf[0..4].copy_from_slice(CFWB_MAGIC);
        buf[4..8].copy_from_slice(&CFWB_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.secs_per_tick.to_le_bytes());
        buf[16..20].copy_from_slice(&self.year.to_le_bytes());
        buf[20..24].copy_from_slice(&self.month.to_le_bytes());
        buf[24..28].copy_from_slice(&self.day.to_le_bytes());
        buf[28..32].copy_from_slice(&self.hour.to_le_bytes());
        buf[32..36].copy_from_slice(&self.minute.to_le_bytes());
        buf[36..44].copy_from_slice(&self.second.to_le_bytes());
        buf[44..52].copy_from_slice(&self.trigger.to_le_bytes());
        buf[52..56].copy_from_slice(&self.n_channels.to_le_bytes());
        buf[56..60].copy_from_slice(&self.samples_per_channel.to_le_bytes());
        buf[60..64].copy_from_slice(&self.time_channel.to_le_bytes());
        buf[64..68].copy_from_slice(&self.data_format.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; CFWB_HEADER_SIZE]) -> Result<Self> {
        if &buf[0..4] != CFWB_MAGIC {
            return Err(ConvertError::InvalidFormat("Not a CFWB file".to_string()));
        }
        let version = read_i32(buf, 4);
        if version != CFWB_VERSION {
            return Err(ConvertError::InvalidFormat(format!("Unsupported CFWB version {}", version)));
        }
        let header = CfwbHeader {
            secs_per_tick: read_f64(buf, 8),
            year: read_i32(buf, 16),
            month: read_i32(buf, 20),
            day: read_i32(buf, 24),
            hour: read_i32(buf, 28),
            minute: read_i32(buf, 32),
            second: read_f64(buf, 36),
            trigger: read_f64(buf, 44),
            n_channels: read_i32(buf, 52),
            samples_per_channel: read_i32(buf, 56),
            time_channel: read_i32(buf, 60),
            data_format: read_i32(buf, 64),
        };
        if header.n_channels < 0 || header.samples_per_channel < 0 {
            return Err(ConvertError::InvalidFormat("Negative channel or sample count".to_string()));
        }
        Ok(header)
    }
}

/// CFWB channel definition
#[derive(Debug, Clone, PartialEq)]
pub struct CfwbChannel {
    pub title: String,
    pub units: String,
    pub scale: f64,
    pub offset: f64,
    pub range_high: f64,
    pub range_low: f64,
}

impl CfwbChannel {
    pub fn new(title: &str, units: &str, scale: f64, offset: f64, range_low: f64, range_high: f64) -> Self {
        CfwbChannel {
            title: title.to_string(),
            units: units.to_string(),
            scale,
            offset,
            range_high,
            range_low,
        }
    }

    fn encode(&self) -> [u8; CFWB_CHANNEL_SIZE] {
        let mut buf = [0u8; CFWB_CHANNEL_SIZE];
        buf[0..32].copy_from_slice(&fixed_field::<32>(&self.title));
        buf[32..64].copy_from_slice(&fixed_field::<32>(&self.units));
        buf[64..72].copy_from_slice(&self.scale.to_le_bytes());
        buf[72..80].copy_from_slice(&self.offset.to_le_bytes());
        buf[80..88].copy_from_slice(&self.range_high.to_le_bytes());
        buf[88..96].copy_from_slice(&self.range_low.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        CfwbChannel {
            title: field_to_string(&buf[0..32]),
            units: field_to_string(&buf[32..64]),
            scale: read_f64(buf, 64),
            offset: read_f64(buf, 72),
            range_high: read_f64(buf, 80),
            range_low: read_f64(buf, 88),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    ReadWrite,
}

/// CFWB multi-channel waveform file
///
/// The handle is released when the value is dropped; [`BinFile::close`]
/// additionally flushes and reports errors.
///
/// # Examples
///
/// ```rust
/// use xml2bin::binfile::{BinFile, CfwbChannel, CfwbHeader, OpenMode};
/// # let dir = std::env::temp_dir().join("xml2bin_binfile_doc");
/// # std::fs::create_dir_all(&dir)?;
/// # let path = dir.join("doc.bin");
/// let start = chrono::NaiveDate::from_ymd_opt(2019, 4, 1).unwrap()
///     .and_hms_opt(10, 0, 0).unwrap();
///
/// let mut file = BinFile::create(&path)?;
/// file.set_header(CfwbHeader::new(240.0, &start));
/// file.add_channel(CfwbChannel::new("II", "mV", 1.0, 0.0, 0.0, 100.0));
/// file.write_header()?;
/// let written = file.write_channel_data(&[vec![1, 2, 3, 4]])?;
/// file.update_samples_per_channel(written, true)?;
/// file.close()?;
///
/// let mut file = BinFile::open(&path, OpenMode::Read)?;
/// file.read_header()?;
/// assert_eq!(file.header().samples_per_channel, 4);
/// assert_eq!(file.channels()[0].title, "II");
/// # std::fs::remove_dir_all(&dir).ok();
/// # Ok::<(), xml2bin::ConvertError>(())
/// ```
pub struct BinFile {
    path: PathBuf,
    file: File,
    header: CfwbHeader,
    channels: Vec<CfwbChannel>,
}

impl BinFile {
    /// Creates (or truncates) a file for writing
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ConvertError::output_file(path.as_ref(), e))?;

        Ok(BinFile {
            path: path.as_ref().to_path_buf(),
            file,
            header: CfwbHeader::empty(),
            channels: Vec::new(),
        })
    }

    /// Opens an existing file; call [`BinFile::read_header`] before use
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(&path)
            .map_err(|e| ConvertError::output_file(path.as_ref(), e))?;

        Ok(BinFile {
            path: path.as_ref().to_path_buf(),
            file,
            header: CfwbHeader::empty(),
            channels: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &CfwbHeader {
        &self.header
    }

    pub fn set_header(&mut self, header: CfwbHeader) {
        self.header = header;
    }

    pub fn channels(&self) -> &[CfwbChannel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [CfwbChannel] {
        &mut self.channels
    }

    pub fn add_channel(&mut self, channel: CfwbChannel) {
        self.channels.push(channel);
    }

    /// 读取文件头和通道定义
    pub fn read_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; CFWB_HEADER_SIZE];
        self.file.read_exact(&mut buf)?;
        self.header = CfwbHeader::decode(&buf)?;

        let mut channel_buf = vec![0u8; self.header.n_channels as usize * CFWB_CHANNEL_SIZE];
        self.file.read_exact(&mut channel_buf)?;
        self.channels = channel_buf
            .chunks_exact(CFWB_CHANNEL_SIZE)
            .map(CfwbChannel::decode)
            .collect();
        Ok(())
    }

    /// Writes header and channel definitions at the start of the file
    ///
    /// Sample data following the channel definitions is left untouched as
    /// long as the channel count does not change.
    pub fn write_header(&mut self) -> Result<()> {
        self.header.n_channels = self.channels.len() as i32;

        let mut buf = Vec::with_capacity(self.data_offset() as usize);
        buf.extend_from_slice(&self.header.encode());
        for channel in &self.channels {
            buf.extend_from_slice(&channel.encode());
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&buf)?;
        Ok(())
    }

    /// Appends frame-interleaved samples, returns the number of frames written
    pub fn write_channel_data(&mut self, data: &[Vec<i16>]) -> Result<usize> {
        self.write_frames(data, 0, 0)
    }

    /// Appends samples after materializing a gap of `gap_seconds`
    ///
    /// A positive gap inserts zero frames, a negative gap (overlap) drops the
    /// leading frames of `data`. The returned count includes inserted frames.
    pub fn write_channel_data_with_gap(&mut self, data: &[Vec<i16>], sample_rate: f64, gap_seconds: i64) -> Result<usize> {
        let gap_frames = (gap_seconds.unsigned_abs() as f64 * sample_rate).round() as usize;
        if gap_seconds >= 0 {
            self.write_frames(data, gap_frames, 0)
        } else {
            self.write_frames(data, 0, gap_frames)
        }
    }

    fn write_frames(&mut self, data: &[Vec<i16>], fill_frames: usize, skip_frames: usize) -> Result<usize> {
        if data.len() != self.channels.len() {
            return Err(ConvertError::InvalidFormat(format!(
                "Expected data for {} channels, got {}",
                self.channels.len(),
                data.len()
            )));
        }
        if self.header.data_format != FORMAT_SHORT {
            return Err(ConvertError::InvalidFormat(format!(
                "Unsupported data format {}",
                self.header.data_format
            )));
        }

        let frames = data.iter().map(Vec::len).max().unwrap_or(0);
        let data_frames = frames.saturating_sub(skip_frames);
        let n_channels = data.len();

        let mut buf = Vec::with_capacity((fill_frames + data_frames) * n_channels * 2);
        buf.resize(fill_frames * n_channels * 2, 0);
        for frame in skip_frames..frames {
            for channel in data {
                // 较短的通道以0补齐
                let value = channel.get(frame).copied().unwrap_or(0);
                buf.extend_from_slice(&value.to_le_bytes());
            }
        }

        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&buf)?;
        Ok(fill_frames + data_frames)
    }

    /// Stores the total frame count in the header
    pub fn update_samples_per_channel(&mut self, count: usize, flush: bool) -> Result<()> {
        let count = i32::try_from(count)
            .map_err(|_| ConvertError::InvalidFormat(format!("Too many samples: {}", count)))?;
        self.header.samples_per_channel = count;
        self.file.seek(SeekFrom::Start(SAMPLES_PER_CHANNEL_OFFSET))?;
        self.file.write_all(&count.to_le_bytes())?;
        if flush {
            self.file.flush()?;
        }
        Ok(())
    }

    /// Reads all stored samples, one vector per channel
    pub fn read_channel_data(&mut self) -> Result<Vec<Vec<i16>>> {
        if self.header.data_format != FORMAT_SHORT {
            return Err(ConvertError::InvalidFormat(format!(
                "Unsupported data format {}",
                self.header.data_format
            )));
        }
        let n_channels = self.channels.len();
        let frames = self.header.samples_per_channel as usize;

        let mut buf = vec![0u8; frames * n_channels * 2];
        self.file.seek(SeekFrom::Start(self.data_offset()))?;
        self.file.read_exact(&mut buf)?;

        let mut data = vec![Vec::with_capacity(frames); n_channels];
        for (i, sample) in buf.chunks_exact(2).enumerate() {
            data[i % n_channels].push(i16::from_le_bytes([sample[0], sample[1]]));
        }
        Ok(data)
    }

    /// Byte offset of the first sample frame
    pub fn data_offset(&self) -> u64 {
        (CFWB_HEADER_SIZE + self.channels.len() * CFWB_CHANNEL_SIZE) as u64
    }

    /// Flushes and releases the handle
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(bytes)
}

fn read_f64(buf: &[u8], offset: usize) -> f64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    f64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use temp_dir::TempDir;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 4, 1).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    fn create_two_channel_file(path: &Path) -> BinFile {
        let mut file = BinFile::create(path).unwrap();
        file.set_header(CfwbHeader::new(2.0, &start()));
        file.add_channel(CfwbChannel::new("I", "mV", 1.0, 0.0, 0.0, 100.0));
        file.add_channel(CfwbChannel::new("II", "mV", 1.0, 0.0, 0.0, 100.0));
        file.write_header().unwrap();
        file
    }

    #[test]
    fn test_header_layout() {
        let header = CfwbHeader::new(240.0, &start());
        let buf = header.encode();
        assert_eq!(&buf[0..4], b"CFWB");
        assert_eq!(read_i32(&buf, 16), 2019);
        assert_eq!(read_i32(&buf, 64), FORMAT_SHORT);
        assert_eq!(CfwbHeader::decode(&buf).unwrap(), header);
        assert_eq!(header.start_datetime().unwrap(), start());
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut buf = CfwbHeader::new(240.0, &start()).encode();
        buf[0] = b'X';
        assert!(CfwbHeader::decode(&buf).is_err());
    }

    #[test]
    fn test_gap_inserts_zero_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("gap.bin");
        let mut file = create_two_channel_file(&path);

        let n = file.write_channel_data(&[vec![1, 2], vec![3, 4]]).unwrap();
        let m = file.write_channel_data_with_gap(&[vec![5, 6], vec![7, 8]], 2.0, 1).unwrap();
        assert_eq!(n, 2);
        assert_eq!(m, 4);
        file.update_samples_per_channel(n + m, true).unwrap();
        file.close().unwrap();

        let mut file = BinFile::open(&path, OpenMode::Read).unwrap();
        file.read_header().unwrap();
        let data = file.read_channel_data().unwrap();
        assert_eq!(data[0], vec![1, 2, 0, 0, 5, 6]);
        assert_eq!(data[1], vec![3, 4, 0, 0, 7, 8]);
    }

    #[test]
    fn test_overlap_drops_leading_frames() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("overlap.bin");
        let mut file = create_two_channel_file(&path);

        let m = file
            .write_channel_data_with_gap(&[vec![1, 2, 3, 4], vec![5, 6, 7, 8]], 2.0, -1)
            .unwrap();
        assert_eq!(m, 2);
        file.update_samples_per_channel(m, true).unwrap();
        drop(file);

        let mut file = BinFile::open(&path, OpenMode::Read).unwrap();
        file.read_header().unwrap();
        assert_eq!(file.read_channel_data().unwrap(), vec![vec![3, 4], vec![7, 8]]);
    }

    #[test]
    fn test_short_channels_are_padded() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("pad.bin");
        let mut file = create_two_channel_file(&path);
        assert_eq!(file.write_channel_data(&[vec![1, 2, 3], vec![4]]).unwrap(), 3);
    }

    #[test]
    fn test_channel_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("mismatch.bin");
        let mut file = create_two_channel_file(&path);
        assert!(file.write_channel_data(&[vec![1, 2, 3]]).is_err());
    }
}
