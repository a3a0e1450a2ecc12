//! Reader for BedMasterEx XML exports.
//!
//! The export is read with a pull parser into a [`BedMasterDocument`] that
//! keeps the `Waveforms` and `VitalSigns` sections in document order.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;

use crate::error::{ConvertError, Result};
use crate::types::{VitalSignEntry, VitalSignsBlock};

/// Root element of a recognized export
pub const ROOT_TAG: &[u8] = b"BedMasterEx";

/// Descriptive identifiers from the `FileInfo` section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileInfo {
    pub unit: String,
    pub bed: String,
}

/// A `WaveformData` element before decoding
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformData {
    pub id: i32,
    pub label: String,
    pub sample_rate: f64,
    pub samples: usize,
    pub uom: String,
    /// comma-separated samples
    pub text: String,
}

/// A `Waveforms` element before filtering and decoding
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformsSection {
    pub collection_time: String,
    pub collection_time_utc: String,
    pub data: Vec<WaveformData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Waveforms(WaveformsSection),
    VitalSigns(VitalSignsBlock),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BedMasterDocument {
    pub file_info: FileInfo,
    pub sections: Vec<Section>,
}

/// Reads an export from disk
///
/// Returns `Ok(None)` when the root element is not `BedMasterEx`.
pub fn read_document<P: AsRef<Path>>(path: P) -> Result<Option<BedMasterDocument>> {
    let file = File::open(&path)
        .map_err(|e| ConvertError::SourceNotFound(format!("{}: {}", path.as_ref().display(), e)))?;
    parse(Reader::from_reader(BufReader::new(file)))
}

/// Reads an export held in memory
///
/// # Examples
///
/// ```rust
/// use xml2bin::xml::{parse_str, Section};
///
/// let xml = r#"<BedMasterEx>
///   <FileInfo><Unit>ICU</Unit><Bed>07</Bed></FileInfo>
///   <Segment>
///     <Waveforms CollectionTime="2019-04-01T10:00:00" CollectionTimeUTC="2019-04-01T17:00:00">
///       <WaveformData ID="1" Label="II" SampleRate="240" Samples="3" UOM="mV">1,2,3</WaveformData>
///     </Waveforms>
///   </Segment>
/// </BedMasterEx>"#;
///
/// let doc = parse_str(xml)?.expect("recognized root");
/// assert_eq!(doc.file_info.bed, "07");
/// match &doc.sections[0] {
///     Section::Waveforms(w) => assert_eq!(w.data[0].label, "II"),
///     _ => unreachable!(),
/// }
/// # Ok::<(), xml2bin::ConvertError>(())
/// ```
pub fn parse_str(xml: &str) -> Result<Option<BedMasterDocument>> {
    parse(Reader::from_reader(xml.as_bytes()))
}

fn parse<R: BufRead>(mut reader: Reader<R>) -> Result<Option<BedMasterDocument>> {
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    // 查找根元素
    loop {
        let event = reader.read_event_into(&mut buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(e) => {
                if e.name().as_ref() != ROOT_TAG {
                    return Ok(None);
                }
                break;
            }
            Event::Empty(e) => {
                return Ok(if e.name().as_ref() == ROOT_TAG {
                    Some(BedMasterDocument::default())
                } else {
                    None
                });
            }
            Event::Eof => {
                return Err(ConvertError::InvalidFormat("XML document has no root element".to_string()));
            }
            _ => {}
        }
    }

    let mut doc = BedMasterDocument::default();
    loop {
        let event = reader.read_event_into(&mut buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"FileInfo" => doc.file_info = read_file_info(&mut reader, &mut buf)?,
                b"Segment" => read_segment(&mut reader, &mut buf, &mut doc.sections)?,
                other => skip_element(&mut reader, &mut buf, other)?,
            },
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof("BedMasterEx")),
            _ => {}
        }
    }
    Ok(Some(doc))
}

fn read_file_info<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<FileInfo> {
    let mut info = FileInfo::default();
    loop {
        let event = reader.read_event_into(buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"Unit" => info.unit = read_text(reader, buf, b"Unit")?,
                b"Bed" => info.bed = read_text(reader, buf, b"Bed")?,
                other => skip_element(reader, buf, other)?,
            },
            Event::End(_) => return Ok(info),
            Event::Eof => return Err(unexpected_eof("FileInfo")),
            _ => {}
        }
    }
}

fn read_segment<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>, sections: &mut Vec<Section>) -> Result<()> {
    loop {
        let event = reader.read_event_into(buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"Waveforms" => {
                    let section = read_waveforms(reader, buf, &e)?;
                    sections.push(Section::Waveforms(section));
                }
                b"VitalSigns" => {
                    let block = read_vital_signs(reader, buf, &e)?;
                    sections.push(Section::VitalSigns(block));
                }
                other => skip_element(reader, buf, other)?,
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"Waveforms" => sections.push(Section::Waveforms(WaveformsSection {
                    collection_time: attribute(&e, "CollectionTime")?,
                    collection_time_utc: attribute(&e, "CollectionTimeUTC")?,
                    data: Vec::new(),
                })),
                b"VitalSigns" => sections.push(Section::VitalSigns(VitalSignsBlock {
                    collection_time: attribute(&e, "CollectionTime")?,
                    collection_time_utc: attribute(&e, "CollectionTimeUTC")?,
                    entries: Vec::new(),
                })),
                _ => {}
            },
            Event::End(_) => return Ok(()),
            Event::Eof => return Err(unexpected_eof("Segment")),
            _ => {}
        }
    }
}

fn read_waveforms<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>, start: &BytesStart) -> Result<WaveformsSection> {
    let mut section = WaveformsSection {
        collection_time: attribute(start, "CollectionTime")?,
        collection_time_utc: attribute(start, "CollectionTimeUTC")?,
        data: Vec::new(),
    };
    loop {
        let event = reader.read_event_into(buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(e) if e.name().as_ref() == b"WaveformData" => {
                let text = read_text(reader, buf, b"WaveformData")?;
                section.data.push(waveform_data(&e, text)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"WaveformData" => {
                section.data.push(waveform_data(&e, String::new())?);
            }
            Event::Start(e) => skip_element(reader, buf, e.name().as_ref())?,
            Event::End(_) => return Ok(section),
            Event::Eof => return Err(unexpected_eof("Waveforms")),
            _ => {}
        }
    }
}

fn waveform_data(e: &BytesStart, text: String) -> Result<WaveformData> {
    Ok(WaveformData {
        id: numeric_attribute(e, "ID")?,
        label: attribute(e, "Label")?,
        sample_rate: numeric_attribute(e, "SampleRate")?,
        samples: numeric_attribute(e, "Samples")?,
        uom: attribute(e, "UOM")?,
        text,
    })
}

fn read_vital_signs<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>, start: &BytesStart) -> Result<VitalSignsBlock> {
    let mut block = VitalSignsBlock {
        collection_time: attribute(start, "CollectionTime")?,
        collection_time_utc: attribute(start, "CollectionTimeUTC")?,
        entries: Vec::new(),
    };
    loop {
        let event = reader.read_event_into(buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(e) if e.name().as_ref() == b"VitalSign" => {
                block.entries.push(read_vital_sign(reader, buf)?);
            }
            Event::Empty(e) if e.name().as_ref() == b"VitalSign" => {
                block.entries.push(VitalSignEntry::default());
            }
            Event::Start(e) => skip_element(reader, buf, e.name().as_ref())?,
            Event::End(_) => return Ok(block),
            Event::Eof => return Err(unexpected_eof("VitalSigns")),
            _ => {}
        }
    }
}

fn read_vital_sign<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<VitalSignEntry> {
    let mut entry = VitalSignEntry::default();
    loop {
        let event = reader.read_event_into(buf)?.into_owned();
        buf.clear();
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"Parameter" => entry.parameter = read_text(reader, buf, b"Parameter")?,
                b"Time" => entry.time = read_text(reader, buf, b"Time")?,
                b"Value" => {
                    entry.uom = attribute(&e, "UOM")?;
                    entry.value = read_text(reader, buf, b"Value")?;
                }
                b"AlarmLimitLow" => entry.alarm_limit_low = read_text(reader, buf, b"AlarmLimitLow")?,
                b"AlarmLimitHigh" => entry.alarm_limit_high = read_text(reader, buf, b"AlarmLimitHigh")?,
                other => skip_element(reader, buf, other)?,
            },
            Event::Empty(e) if e.name().as_ref() == b"Value" => {
                entry.uom = attribute(&e, "UOM")?;
            }
            Event::End(_) => return Ok(entry),
            Event::Eof => return Err(unexpected_eof("VitalSign")),
            _ => {}
        }
    }
}

/// 读取元素内的文本，忽略嵌套元素
fn read_text<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>, name: &[u8]) -> Result<String> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event_into(buf)? {
            Event::Text(t) if depth == 0 => {
                text.push_str(&t.unescape().map_err(quick_xml::Error::from)?);
            }
            Event::CData(c) if depth == 0 => {
                text.push_str(&String::from_utf8_lossy(&c));
            }
            Event::Start(_) => depth += 1,
            Event::End(_) if depth > 0 => depth -= 1,
            Event::End(_) => break,
            Event::Eof => return Err(unexpected_eof(&String::from_utf8_lossy(name))),
            _ => {}
        }
        buf.clear();
    }
    buf.clear();
    Ok(text)
}

fn skip_element<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>, name: &[u8]) -> Result<()> {
    reader.read_to_end_into(QName(name), buf)?;
    buf.clear();
    Ok(())
}

/// Attribute value, empty when absent
fn attribute(e: &BytesStart, name: &str) -> Result<String> {
    match e.try_get_attribute(name).map_err(quick_xml::Error::from)? {
        Some(attr) => Ok(attr.unescape_value().map_err(quick_xml::Error::from)?.into_owned()),
        None => Ok(String::new()),
    }
}

fn numeric_attribute<T: std::str::FromStr>(e: &BytesStart, name: &str) -> Result<T> {
    let value = attribute(e, name)?;
    value.trim().parse::<T>().map_err(|_| {
        ConvertError::InvalidFormat(format!(
            "Attribute {} of {} is not a number: {:?}",
            name,
            String::from_utf8_lossy(e.name().as_ref()),
            value
        ))
    })
}

fn unexpected_eof(element: &str) -> ConvertError {
    ConvertError::InvalidFormat(format!("Unexpected end of document inside <{}>", element))
}
