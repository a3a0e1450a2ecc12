use pretty_assertions::assert_eq;
use std::fs;
use temp_dir::TempDir;

use xml2bin::binfile::{BinFile, CfwbChannel, CfwbHeader, OpenMode, CFWB_CHANNEL_SIZE, CFWB_HEADER_SIZE};
use xml2bin::utils::parse_timestamp;
use xml2bin::vitalfile::{VitalFile, VitalHeader, VITAL_HEADER_SIZE, VITAL_RECORD_SIZE};
use xml2bin::ConvertError;

fn ecg_channel(title: &str) -> CfwbChannel {
    CfwbChannel::new(title, "mV", 1.0, 0.0, -5.0, 5.0)
}

#[test]
fn test_reopen_and_append() {
    let dir = TempDir::new().unwrap();
    let path = dir.child("append.bin");
    let start = parse_timestamp("2019-04-01T10:00:00").unwrap();

    // 写入阶段
    {
        let mut file = BinFile::create(&path).unwrap();
        file.set_header(CfwbHeader::new(4.0, &start));
        file.add_channel(ecg_channel("I"));
        file.add_channel(ecg_channel("II"));
        file.write_header().unwrap();
        let n = file.write_channel_data(&[vec![1, 2, 3, 4], vec![5, 6, 7, 8]]).unwrap();
        file.update_samples_per_channel(n, true).unwrap();
        file.close().unwrap();
    }

    // 续写阶段
    {
        let mut file = BinFile::open(&path, OpenMode::ReadWrite).unwrap();
        file.read_header().unwrap();
        assert_eq!(file.header().start_datetime().unwrap(), start);
        assert_eq!(file.header().sample_rate(), 4.0);
        let existing = file.header().samples_per_channel as usize;
        let m = file.write_channel_data_with_gap(&[vec![9, 10], vec![11, 12]], 4.0, 0).unwrap();
        file.update_samples_per_channel(existing + m, true).unwrap();
    }

    let len = fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(len, CFWB_HEADER_SIZE + 2 * CFWB_CHANNEL_SIZE + 6 * 2 * 2);

    let mut file = BinFile::open(&path, OpenMode::Read).unwrap();
    file.read_header().unwrap();
    assert_eq!(
        file.read_channel_data().unwrap(),
        vec![vec![1, 2, 3, 4, 9, 10], vec![5, 6, 7, 8, 11, 12]]
    );
}

#[test]
fn test_header_rewrite_leaves_samples() {
    let dir = TempDir::new().unwrap();
    let path = dir.child("rename.bin");
    let start = parse_timestamp("2019-04-01T10:00:00").unwrap();

    let mut file = BinFile::create(&path).unwrap();
    file.set_header(CfwbHeader::new(2.0, &start));
    file.add_channel(ecg_channel("ECG"));
    file.write_header().unwrap();
    let n = file.write_channel_data(&[vec![-3, 0, 3]]).unwrap();
    file.update_samples_per_channel(n, true).unwrap();
    drop(file);
    let before = fs::read(&path).unwrap();

    let mut file = BinFile::open(&path, OpenMode::ReadWrite).unwrap();
    file.read_header().unwrap();
    file.channels_mut()[0].title = "ECG II".to_string();
    file.write_header().unwrap();
    file.close().unwrap();

    let after = fs::read(&path).unwrap();
    let data_offset = CFWB_HEADER_SIZE + CFWB_CHANNEL_SIZE;
    assert_eq!(before[..CFWB_HEADER_SIZE], after[..CFWB_HEADER_SIZE]);
    assert_eq!(before[data_offset..], after[data_offset..]);

    let mut file = BinFile::open(&path, OpenMode::Read).unwrap();
    file.read_header().unwrap();
    assert_eq!(file.channels()[0], CfwbChannel::new("ECG II", "mV", 1.0, 0.0, -5.0, 5.0));
}

#[test]
fn test_open_missing_file() {
    let dir = TempDir::new().unwrap();
    let missing = dir.child("none.bin");
    let err = BinFile::open(&missing, OpenMode::Read).err().unwrap();
    assert!(matches!(err, ConvertError::OutputFile { ref path, .. } if *path == missing));
    let err = VitalFile::open_append(dir.child("none.vital")).err().unwrap();
    assert!(matches!(err, ConvertError::OutputFile { .. }));
}

#[test]
fn test_vital_file_layout() {
    let dir = TempDir::new().unwrap();
    let path = dir.child("hr.vital");
    let start = parse_timestamp("2019-04-01T10:20:30").unwrap();

    let mut file = VitalFile::create(&path).unwrap();
    file.set_header(VitalHeader::new("HR", "bpm", "ICU", "07", &start));
    file.write_header().unwrap();
    file.write_vital_data(72.0, 0.0, 50.0, 120.0).unwrap();
    file.close().unwrap();

    let mut file = VitalFile::open_append(&path).unwrap();
    file.write_vital_data(75.0, 12.5, 50.0, 120.0).unwrap();
    file.close().unwrap();

    let len = fs::metadata(&path).unwrap().len() as usize;
    assert_eq!(len, VITAL_HEADER_SIZE + 2 * VITAL_RECORD_SIZE);

    let mut file = VitalFile::open(&path).unwrap();
    assert_eq!(file.read_header().unwrap().start_datetime(), Some(start));
    let records = file.read_records().unwrap();
    assert_eq!(records[1].value, 75.0);
    assert_eq!(records[1].offset, 12.5);
}
