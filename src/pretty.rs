//! Re-indents XML exports for reading.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::{Reader, Writer};

use crate::error::{ConvertError, Result};

/// Indentation width in spaces
pub const INDENT: usize = 2;

/// Rewrites `input` into `output` with one element per line
pub fn prettify<P: AsRef<Path>, Q: AsRef<Path>>(input: P, output: Q) -> Result<()> {
    let file = File::open(input.as_ref())
        .map_err(|e| ConvertError::SourceNotFound(format!("{}: {}", input.as_ref().display(), e)))?;
    let out = BufWriter::new(File::create(output.as_ref())?);
    let mut out = prettify_to(BufReader::new(file), out)?;
    out.flush()?;
    Ok(())
}

/// In-memory variant of [`prettify`]
///
/// # Examples
///
/// ```rust
/// use xml2bin::pretty::prettify_str;
///
/// let pretty = prettify_str("<a><b>1</b><c/></a>")?;
/// assert_eq!(pretty, "<a>\n  <b>1</b>\n  <c/>\n</a>");
/// # Ok::<(), xml2bin::ConvertError>(())
/// ```
pub fn prettify_str(xml: &str) -> Result<String> {
    let out = prettify_to(xml.as_bytes(), Vec::new())?;
    String::from_utf8(out).map_err(|e| ConvertError::InvalidFormat(e.to_string()))
}

fn prettify_to<R: BufRead, W: Write>(input: R, output: W) -> Result<W> {
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new_with_indent(output, b' ', INDENT);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            event => writer.write_event(event)?,
        }
        buf.clear();
    }
    Ok(writer.into_inner())
}
