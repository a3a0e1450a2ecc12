use chrono::{DateTime, NaiveDateTime};

use crate::error::{ConvertError, Result};

/// Format used for time tags when no per-tag format is configured
pub const DEFAULT_TAG_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

const NAIVE_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S%.f",
];

/// 解析导出文件中的时间字符串
///
/// Offsets are dropped: the wall-clock time written by the monitor is kept.
pub fn parse_timestamp(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConvertError::InvalidTimestamp("Empty time string".to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local());
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| ConvertError::InvalidTimestamp(s.to_string()))
}

/// Formats a time tag value, falling back to [`DEFAULT_TAG_TIME_FORMAT`]
pub fn format_timestamp(dt: &NaiveDateTime, fmt: Option<&str>) -> String {
    dt.format(fmt.unwrap_or(DEFAULT_TAG_TIME_FORMAT)).to_string()
}

/// 将逗号分隔的采样文本解码为16位整数
pub fn decode_wave(text: &str) -> Result<Vec<i16>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(',')
        .map(|v| {
            v.trim()
                .parse::<i16>()
                .map_err(|_| ConvertError::InvalidFormat(format!("Invalid waveform sample: {:?}", v)))
        })
        .collect()
}

/// Whole seconds in `delta`, truncated toward zero
pub fn whole_seconds(delta: chrono::Duration) -> i64 {
    delta.num_seconds()
}

/// Fractional seconds in `delta`
pub fn fractional_seconds(delta: chrono::Duration) -> f64 {
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}

/// Copies `s` into a fixed-width, zero-padded byte field
pub fn fixed_field<const N: usize>(s: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let bytes = s.as_bytes();
    let len = bytes.len().min(N);
    field[..len].copy_from_slice(&bytes[..len]);
    field
}

/// Reads a zero-padded byte field back into a string
pub fn field_to_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 4, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("2019-04-01T10:00:00").unwrap(), dt(10, 0, 0));
        assert_eq!(parse_timestamp("2019-04-01 10:00:05").unwrap(), dt(10, 0, 5));
        assert_eq!(parse_timestamp("04/01/2019 10:00:05").unwrap(), dt(10, 0, 5));
        assert_eq!(parse_timestamp("2019-04-01T10:00:00-07:00").unwrap(), dt(10, 0, 0));

        let with_fraction = parse_timestamp("2019-04-01T10:00:00.250").unwrap();
        assert_eq!(with_fraction, dt(10, 0, 0) + chrono::Duration::milliseconds(250));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(&dt(10, 0, 5), None), "20190401100005");
        assert_eq!(format_timestamp(&dt(10, 0, 5), Some("%Y-%m-%d_%H%M")), "2019-04-01_1000");
    }

    #[test]
    fn test_decode_wave() {
        assert_eq!(decode_wave("1,-2, 3").unwrap(), vec![1, -2, 3]);
        assert_eq!(decode_wave("").unwrap(), Vec::<i16>::new());
        assert!(decode_wave("1,x").is_err());
        assert!(decode_wave("40000").is_err());
    }

    #[test]
    fn test_fixed_field_round_trip() {
        let field: [u8; 8] = fixed_field("mmHg");
        assert_eq!(&field[..5], b"mmHg\0");
        assert_eq!(field_to_string(&field), "mmHg");

        let truncated: [u8; 4] = fixed_field("PLETH");
        assert_eq!(field_to_string(&truncated), "PLET");
    }
}
