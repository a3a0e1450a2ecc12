use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::utils::format_timestamp;

/// Tag name → value used to expand filename templates
pub type TagMap = HashMap<String, String>;

pub const TAG_STARTTIME: &str = "starttime";
pub const TAG_EXETIME: &str = "exetime";
pub const TAG_ENDTIME: &str = "endtime";

/// Prefix of the placeholder `endtime` value used while a waveform file is open
pub const TEMP_ENDTIME_PREFIX: &str = "tempendtime";
/// `endtime` value for vital-sign files, which have no end
pub const VITAL_ENDTIME_PLACEHOLDER: &str = "0000";
pub const VITAL_EXTENSION: &str = "vital";

const MAX_TEMP_NAME_ATTEMPTS: usize = 32;

/// Expands `{tag}` placeholders in `template`
///
/// # Examples
///
/// ```rust
/// use xml2bin::filename::{expand_template, TagMap};
///
/// let mut tags = TagMap::new();
/// tags.insert("bed".to_string(), "07".to_string());
/// assert_eq!(expand_template("bed{bed}", &tags)?, "bed07");
/// assert!(expand_template("{missing}", &tags).is_err());
/// # Ok::<(), xml2bin::ConvertError>(())
/// ```
pub fn expand_template(template: &str, tags: &TagMap) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| ConvertError::Config(format!("Unclosed tag in filename template: {}", template)))?;
        let key = &after[..close];
        let value = tags
            .get(key)
            .ok_or_else(|| ConvertError::UnresolvedTag(key.to_string()))?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Builds output filenames from the configured template
#[derive(Debug, Clone)]
pub struct FilenameResolver {
    output_dir: PathBuf,
    pattern: String,
    extension: String,
    time_formats: HashMap<String, String>,
}

impl FilenameResolver {
    pub fn new<P: AsRef<Path>>(output_dir: P, pattern: &str, extension: &str, time_formats: HashMap<String, String>) -> Self {
        FilenameResolver {
            output_dir: output_dir.as_ref().to_path_buf(),
            pattern: pattern.to_string(),
            extension: extension.to_string(),
            time_formats,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the end time is only known once a file is closed
    pub fn defers_endtime(&self) -> bool {
        self.pattern.contains("{endtime}")
    }

    /// Formats `dt` with the format configured for `tag`
    pub fn time_tag(&self, tag: &str, dt: &NaiveDateTime) -> String {
        format_timestamp(dt, self.time_formats.get(tag).map(String::as_str))
    }

    /// `output_dir/<expanded pattern>.<extension>`
    pub fn resolve_with(&self, pattern: &str, tags: &TagMap, extension: &str) -> Result<PathBuf> {
        let stem = expand_template(pattern, tags)?;
        let name = if extension.is_empty() {
            stem
        } else {
            format!("{}.{}", stem, extension)
        };
        Ok(self.output_dir.join(name))
    }

    pub fn resolve(&self, tags: &TagMap) -> Result<PathBuf> {
        self.resolve_with(&self.pattern, tags, &self.extension)
    }

    fn set_time_tags(&self, tags: &mut TagMap, start: &NaiveDateTime, exe_time: &NaiveDateTime) {
        tags.insert(TAG_STARTTIME.to_string(), self.time_tag(TAG_STARTTIME, start));
        tags.insert(TAG_EXETIME.to_string(), self.time_tag(TAG_EXETIME, exe_time));
    }

    /// Name for a new waveform file whose end time is not known yet
    ///
    /// `endtime` gets a random placeholder; names already on disk are skipped.
    pub fn temporary_waveform_filename(&self, tags: &mut TagMap, start: &NaiveDateTime, exe_time: &NaiveDateTime) -> Result<PathBuf> {
        self.set_time_tags(tags, start, exe_time);
        let mut rng = rand::thread_rng();
        let mut candidate = PathBuf::new();
        for _ in 0..MAX_TEMP_NAME_ATTEMPTS {
            let suffix: u32 = rng.gen_range(10000..100000);
            tags.insert(TAG_ENDTIME.to_string(), format!("{}{}", TEMP_ENDTIME_PREFIX, suffix));
            candidate = self.resolve(tags)?;
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(ConvertError::output_file(
            &candidate,
            io::Error::new(io::ErrorKind::AlreadyExists, "no unused temporary name left"),
        ))
    }

    /// Name for the file of one vital-sign parameter
    pub fn vital_filename(&self, tags: &mut TagMap, parameter: &str, start: &NaiveDateTime, exe_time: &NaiveDateTime) -> Result<PathBuf> {
        self.set_time_tags(tags, start, exe_time);
        tags.insert(TAG_ENDTIME.to_string(), VITAL_ENDTIME_PLACEHOLDER.to_string());
        let pattern = format!("{}_{}", self.pattern, parameter);
        self.resolve_with(&pattern, tags, VITAL_EXTENSION)
    }

    /// Renames a closed waveform file to carry its real end time
    ///
    /// The end time is `start + floor(samples / rate)` seconds. Files whose
    /// name holds no temporary tag are left alone. Returns the final path.
    pub fn finalize_waveform(
        &self,
        tags: &mut TagMap,
        current: &Path,
        start: &NaiveDateTime,
        samples: usize,
        sample_rate: f64,
        exe_time: &NaiveDateTime,
    ) -> Result<PathBuf> {
        if !self.defers_endtime() {
            return Ok(current.to_path_buf());
        }

        let end = *start + Duration::seconds((samples as f64 / sample_rate).floor() as i64);
        self.set_time_tags(tags, start, exe_time);
        tags.insert(TAG_ENDTIME.to_string(), self.time_tag(TAG_ENDTIME, &end));

        let is_temporary = current
            .file_name()
            .map(|n| n.to_string_lossy().contains(TEMP_ENDTIME_PREFIX))
            .unwrap_or(false);
        if !is_temporary {
            return Ok(current.to_path_buf());
        }

        let target = self.resolve(tags)?;
        if target != current {
            debug!("renaming {} -> {}", current.display(), target.display());
            fs::rename(current, &target)?;
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use temp_dir::TempDir;

    fn t(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2019, 4, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_expand_template() {
        let mut tags = TagMap::new();
        tags.insert("starttime".to_string(), "20190401100000".to_string());
        tags.insert("bed".to_string(), "07".to_string());
        assert_eq!(expand_template("{bed}_{starttime}", &tags).unwrap(), "07_20190401100000");
        assert_eq!(expand_template("plain", &tags).unwrap(), "plain");
        assert!(matches!(expand_template("{nope}", &tags), Err(ConvertError::UnresolvedTag(_))));
        assert!(expand_template("{bed", &tags).is_err());
    }

    #[test]
    fn test_temporary_name_then_finalize() {
        let dir = TempDir::new().unwrap();
        let resolver = FilenameResolver::new(dir.path(), "wf_{starttime}_{endtime}", "bin", HashMap::new());
        let mut tags = TagMap::new();

        let temp = resolver.temporary_waveform_filename(&mut tags, &t(10, 0, 0), &t(12, 0, 0)).unwrap();
        let temp_name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(temp_name.starts_with("wf_20190401100000_tempendtime"));
        fs::write(&temp, b"data").unwrap();

        let last = resolver
            .finalize_waveform(&mut tags, &temp, &t(10, 0, 0), 2400, 240.0, &t(12, 0, 0))
            .unwrap();
        assert_eq!(last, dir.path().join("wf_20190401100000_20190401100010.bin"));
        assert!(last.exists());
        assert!(!temp.exists());
    }

    #[test]
    fn test_temporary_name_never_reuses_existing_file() {
        let dir = TempDir::new().unwrap();
        // 模板里没有 {endtime}，每次候选都是同一个文件名
        let resolver = FilenameResolver::new(dir.path(), "wf_{starttime}", "bin", HashMap::new());
        let taken = dir.path().join("wf_20190401100000.bin");
        fs::write(&taken, b"keep").unwrap();

        let mut tags = TagMap::new();
        let err = resolver
            .temporary_waveform_filename(&mut tags, &t(10, 0, 0), &t(12, 0, 0))
            .unwrap_err();
        assert!(matches!(err, ConvertError::OutputFile { ref path, .. } if *path == taken));
        assert_eq!(fs::read(&taken).unwrap(), b"keep");
    }

    #[test]
    fn test_finalize_is_noop_for_final_names() {
        let dir = TempDir::new().unwrap();
        let resolver = FilenameResolver::new(dir.path(), "wf_{starttime}_{endtime}", "bin", HashMap::new());
        let already = dir.path().join("wf_20190401100000_20190401100010.bin");
        fs::write(&already, b"data").unwrap();

        let mut tags = TagMap::new();
        let last = resolver
            .finalize_waveform(&mut tags, &already, &t(10, 0, 0), 4800, 240.0, &t(12, 0, 0))
            .unwrap();
        assert_eq!(last, already);
        assert!(already.exists());
    }

    #[test]
    fn test_finalize_without_endtime_tag() {
        let resolver = FilenameResolver::new("/out", "wf_{starttime}", "bin", HashMap::new());
        let mut tags = TagMap::new();
        let path = PathBuf::from("/out/wf_20190401100000.bin");
        let last = resolver
            .finalize_waveform(&mut tags, &path, &t(10, 0, 0), 240, 240.0, &t(12, 0, 0))
            .unwrap();
        assert_eq!(last, path);
    }

    #[test]
    fn test_vital_filename_uses_constant_endtime() {
        let mut formats = HashMap::new();
        formats.insert("starttime".to_string(), "%H%M".to_string());
        let resolver = FilenameResolver::new("/out", "{starttime}_{endtime}", "bin", formats);
        let mut tags = TagMap::new();
        let path = resolver.vital_filename(&mut tags, "HR", &t(10, 30, 0), &t(12, 0, 0)).unwrap();
        assert_eq!(path, PathBuf::from("/out/1030_0000_HR.vital"));
    }
}
