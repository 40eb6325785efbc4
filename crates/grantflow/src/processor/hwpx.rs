use std::io::{Cursor, Read, Seek};

use quick_xml::escape::{resolve_predefined_entity, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::ExtractError;
use crate::processor::{DocumentFormat, DocumentProcessor};

/// HWPX (OWPML) documents: a zip archive with one XML file per section.
pub struct HwpxProcessor;

impl HwpxProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HwpxProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for HwpxProcessor {
    fn name(&self) -> &'static str {
        "hwpx"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let _span = tracing::info_span!("processor.hwpx").entered();

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractError::Hwpx(format!("Failed to open HWPX: {}", e)))?;

        let sections = section_names(&archive);
        if sections.is_empty() {
            return Err(ExtractError::Hwpx("no Contents/section*.xml entries".to_string()));
        }

        let mut text = String::new();
        for name in sections {
            let xml = read_entry(&mut archive, &name)?;
            text.push_str(&parse_section_xml(&xml)?);
        }

        Ok(text)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Hwpx)
    }
}

/// Section entries sorted by their numeric suffix so `section10` follows
/// `section9`.
fn section_names<R: Read + Seek>(archive: &zip::ZipArchive<R>) -> Vec<String> {
    let mut sections: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let index = name
                .strip_prefix("Contents/section")?
                .strip_suffix(".xml")?
                .parse::<u32>()
                .ok()?;
            Some((index, name.to_string()))
        })
        .collect();

    sections.sort_by_key(|(index, _)| *index);
    sections.into_iter().map(|(_, name)| name).collect()
}

fn read_entry<R: Read + Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String, ExtractError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Hwpx(format!("Failed to find {}: {}", name, e)))?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|e| ExtractError::Hwpx(format!("Failed to read {}: {}", name, e)))?;
    Ok(xml)
}

/// Collects `<hp:t>` runs, emitting a newline at the end of each `<hp:p>`.
fn parse_section_xml(xml: &str) -> Result<String, ExtractError> {
    let mut reader = Reader::from_str(xml);

    let mut text = String::new();
    let mut in_text_element = false;
    let mut paragraph_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = true,
                b"p" => paragraph_depth += 1,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                // <hp:lineBreak/> and <hp:tab/> inside a run.
                if in_text_element {
                    match e.local_name().as_ref() {
                        b"lineBreak" => text.push('\n'),
                        b"tab" => text.push('\t'),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text_element = false,
                b"p" => {
                    if paragraph_depth > 0 {
                        paragraph_depth -= 1;
                        if !text.ends_with('\n') {
                            text.push('\n');
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_element {
                    if let Ok(raw) = e.decode() {
                        match unescape(&raw) {
                            Ok(unescaped) => text.push_str(&unescaped),
                            Err(_) => text.push_str(&raw),
                        }
                    }
                }
            }
            // Entity references arrive as their own events.
            Ok(Event::GeneralRef(e)) => {
                if in_text_element {
                    if let Ok(Some(ch)) = e.resolve_char_ref() {
                        text.push(ch);
                    } else if let Ok(name) = e.decode() {
                        if let Some(resolved) = resolve_predefined_entity(&name) {
                            text.push_str(resolved);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Hwpx(format!("XML parsing error: {}", e)));
            }
            _ => {}
        }
    }

    Ok(text)
}
