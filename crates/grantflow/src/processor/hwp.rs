//! Native HWP 5.0 text extraction.
//!
//! An HWP 5.0 file is an OLE2 compound file. Body text lives in
//! `BodyText/Section0..N` streams as a sequence of tagged records, usually
//! raw-deflate compressed. A UTF-16LE plain-text preview is stored separately
//! in `PrvText` and is used as a second strategy when the body cannot be read.

use std::io::{Cursor, Read};

use cfb::CompoundFile;
use flate2::read::DeflateDecoder;

use crate::error::ExtractError;
use crate::processor::{DocumentFormat, DocumentProcessor};

const FILE_HEADER_SIGNATURE: &[u8] = b"HWP Document File";

const FLAG_COMPRESSED: u32 = 0x01;
const FLAG_ENCRYPTED: u32 = 0x02;
const FLAG_DISTRIBUTION: u32 = 0x04;

/// HWPTAG_BEGIN (0x10) + 51.
const HWPTAG_PARA_TEXT: u16 = 67;

/// Size marker meaning "the real size follows in the next four bytes".
const EXTENDED_SIZE: u32 = 0xFFF;

/// Stops runaway loops on damaged files that claim thousands of sections.
const MAX_SECTIONS: usize = 1024;

/// Ceiling on one inflated section; real sections are a few megabytes.
const MAX_SECTION_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct FileHeader {
    properties: u32,
}

impl FileHeader {
    fn parse(bytes: &[u8]) -> Result<Self, ExtractError> {
        if bytes.len() < 40 || !bytes.starts_with(FILE_HEADER_SIGNATURE) {
            return Err(ExtractError::Hwp("missing HWP file header signature".to_string()));
        }

        let properties = u32::from_le_bytes([bytes[36], bytes[37], bytes[38], bytes[39]]);
        Ok(Self { properties })
    }

    fn compressed(&self) -> bool {
        self.properties & FLAG_COMPRESSED != 0
    }

    fn encrypted(&self) -> bool {
        self.properties & FLAG_ENCRYPTED != 0
    }

    fn distribution(&self) -> bool {
        self.properties & FLAG_DISTRIBUTION != 0
    }
}

fn open(bytes: &[u8]) -> Result<CompoundFile<Cursor<&[u8]>>, ExtractError> {
    CompoundFile::open(Cursor::new(bytes))
        .map_err(|e| ExtractError::Hwp(format!("not a compound file: {}", e)))
}

fn read_stream(
    comp: &mut CompoundFile<Cursor<&[u8]>>,
    path: &str,
) -> Result<Vec<u8>, ExtractError> {
    let mut stream = comp
        .open_stream(path)
        .map_err(|e| ExtractError::Hwp(format!("failed to open {}: {}", path, e)))?;
    let mut data = Vec::new();
    stream
        .read_to_end(&mut data)
        .map_err(|e| ExtractError::Hwp(format!("failed to read {}: {}", path, e)))?;
    Ok(data)
}

fn read_header(comp: &mut CompoundFile<Cursor<&[u8]>>) -> Result<FileHeader, ExtractError> {
    let data = read_stream(comp, "/FileHeader")?;
    FileHeader::parse(&data)
}

/// Reads paragraph text from the `BodyText` section streams.
pub struct HwpBodyProcessor;

impl HwpBodyProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HwpBodyProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for HwpBodyProcessor {
    fn name(&self) -> &'static str {
        "hwp-body"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let _span = tracing::info_span!("processor.hwp_body").entered();

        let mut comp = open(bytes)?;
        let header = read_header(&mut comp)?;

        if header.encrypted() {
            return Err(ExtractError::Encrypted("password protected".to_string()));
        }
        if header.distribution() {
            // Distribution documents keep their body in ViewText, encrypted.
            return Err(ExtractError::Encrypted("distribution document".to_string()));
        }

        let mut text = String::new();
        let mut sections = 0;

        while sections < MAX_SECTIONS {
            let path = format!("/BodyText/Section{}", sections);
            if !comp.is_stream(&path) {
                break;
            }

            let raw = read_stream(&mut comp, &path)?;
            let records = if header.compressed() {
                inflate(&raw, MAX_SECTION_BYTES)?
            } else {
                raw
            };

            append_section_text(&records, &mut text)?;
            sections += 1;
        }

        if sections == 0 {
            return Err(ExtractError::Hwp("no BodyText sections".to_string()));
        }

        Ok(text)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Hwp)
    }
}

/// Reads the UTF-16LE preview text stream.
pub struct HwpPreviewProcessor;

impl HwpPreviewProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HwpPreviewProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for HwpPreviewProcessor {
    fn name(&self) -> &'static str {
        "hwp-preview"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let _span = tracing::info_span!("processor.hwp_preview").entered();

        let mut comp = open(bytes)?;
        if !comp.is_stream("/PrvText") {
            return Err(ExtractError::Hwp("no PrvText stream".to_string()));
        }

        let data = read_stream(&mut comp, "/PrvText")?;
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        let text: String = char::decode_utf16(units.iter().copied())
            .filter_map(|c| c.ok())
            .filter(|c| *c != '\0')
            .collect();

        Ok(text.replace("\r\n", "\n"))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Hwp)
    }
}

fn inflate(raw: &[u8], limit: u64) -> Result<Vec<u8>, ExtractError> {
    let mut decoder = DeflateDecoder::new(raw).take(limit + 1);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Hwp(format!("failed to inflate section: {}", e)))?;
    if out.len() as u64 > limit {
        return Err(ExtractError::Hwp(format!(
            "section inflates past {} bytes",
            limit
        )));
    }
    Ok(out)
}

/// Walks a section's record stream and appends every paragraph's text.
fn append_section_text(records: &[u8], out: &mut String) -> Result<(), ExtractError> {
    let mut pos = 0;

    while pos + 4 <= records.len() {
        let header = read_u32(records, pos);
        pos += 4;

        let tag = (header & 0x3FF) as u16;
        let mut size = header >> 20;
        if size == EXTENDED_SIZE {
            if pos + 4 > records.len() {
                return Err(ExtractError::Hwp("truncated extended record size".to_string()));
            }
            size = read_u32(records, pos);
            pos += 4;
        }

        let end = pos
            .checked_add(size as usize)
            .filter(|end| *end <= records.len())
            .ok_or_else(|| ExtractError::Hwp(format!("record at {} overruns section", pos)))?;

        if tag == HWPTAG_PARA_TEXT {
            decode_para_text(&records[pos..end], out);
        }

        pos = end;
    }

    Ok(())
}

fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}

/// Decodes a PARA_TEXT payload. Control codes below 32 are either one-unit
/// character controls or eight-unit inline/extended controls whose payload is
/// skipped.
fn decode_para_text(payload: &[u8], out: &mut String) {
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let mut plain: Vec<u16> = Vec::with_capacity(units.len());
    let mut i = 0;

    while i < units.len() {
        let unit = units[i];
        if unit >= 32 {
            plain.push(unit);
            i += 1;
            continue;
        }

        match unit {
            // Paragraph end and line break.
            10 | 13 => {
                plain.push(b'\n' as u16);
                i += 1;
            }
            // Hyphen, reserved, non-breaking and fixed-width spaces.
            24 => {
                plain.push(b'-' as u16);
                i += 1;
            }
            25..=31 => {
                plain.push(b' ' as u16);
                i += 1;
            }
            0 => i += 1,
            // Tab is an inline control but still separates words.
            9 => {
                plain.push(b'\t' as u16);
                i += 8;
            }
            _ => i += 8,
        }
    }

    out.extend(char::decode_utf16(plain).filter_map(|c| c.ok()));
    if !out.ends_with('\n') {
        out.push('\n');
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn utf16(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn record(tag: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        if payload.len() >= EXTENDED_SIZE as usize {
            let header = (tag as u32) | (EXTENDED_SIZE << 20);
            out.extend_from_slice(&header.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        } else {
            let header = (tag as u32) | ((payload.len() as u32) << 20);
            out.extend_from_slice(&header.to_le_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    fn file_header(properties: u32) -> Vec<u8> {
        let mut header = vec![0u8; 256];
        header[..FILE_HEADER_SIGNATURE.len()].copy_from_slice(FILE_HEADER_SIGNATURE);
        header[36..40].copy_from_slice(&properties.to_le_bytes());
        header
    }

    /// Builds a minimal HWP 5.0 compound file with one paragraph per entry.
    pub(crate) fn build_hwp(paragraphs: &[&str], properties: u32, preview: Option<&str>) -> Vec<u8> {
        let mut section = Vec::new();
        // A PARA_HEADER record (tag 66) to make sure unrelated records are skipped.
        section.extend(record(66, &[0u8; 22]));
        for paragraph in paragraphs {
            let mut payload = utf16(paragraph);
            payload.extend_from_slice(&13u16.to_le_bytes());
            section.extend(record(HWPTAG_PARA_TEXT, &payload));
        }

        let body = if properties & FLAG_COMPRESSED != 0 {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&section).unwrap();
            encoder.finish().unwrap()
        } else {
            section
        };

        let mut comp = CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        comp.create_stream("/FileHeader")
            .unwrap()
            .write_all(&file_header(properties))
            .unwrap();
        comp.create_storage("/BodyText").unwrap();
        comp.create_stream("/BodyText/Section0")
            .unwrap()
            .write_all(&body)
            .unwrap();
        if let Some(preview) = preview {
            comp.create_stream("/PrvText")
                .unwrap()
                .write_all(&utf16(preview))
                .unwrap();
        }
        comp.flush().unwrap();
        comp.into_inner().into_inner()
    }

    #[test]
    fn test_supports_only_hwp() {
        assert!(HwpBodyProcessor::new().supports(DocumentFormat::Hwp));
        assert!(!HwpBodyProcessor::new().supports(DocumentFormat::Hwpx));
        assert!(HwpPreviewProcessor::new().supports(DocumentFormat::Hwp));
        assert!(!HwpPreviewProcessor::new().supports(DocumentFormat::Pdf));
    }

    #[test]
    fn test_extract_compressed_body() {
        let bytes = build_hwp(
            &["2024년 원자력 기술개발사업 공고", "정부출연금 5억원 이내"],
            FLAG_COMPRESSED,
            None,
        );

        let text = HwpBodyProcessor::new().extract(&bytes).unwrap();
        assert!(text.contains("2024년 원자력 기술개발사업 공고"));
        assert!(text.contains("정부출연금 5억원 이내"));
    }

    #[test]
    fn test_extract_uncompressed_body() {
        let bytes = build_hwp(&["비압축 본문"], 0, None);
        let text = HwpBodyProcessor::new().extract(&bytes).unwrap();
        assert_eq!(text.trim(), "비압축 본문");
    }

    #[test]
    fn test_encrypted_document_is_rejected() {
        let bytes = build_hwp(&["secret"], FLAG_COMPRESSED | FLAG_ENCRYPTED, None);
        assert!(matches!(
            HwpBodyProcessor::new().extract(&bytes),
            Err(ExtractError::Encrypted(_))
        ));
    }

    #[test]
    fn test_distribution_document_is_rejected() {
        let bytes = build_hwp(&["배포용"], FLAG_COMPRESSED | FLAG_DISTRIBUTION, None);
        assert!(matches!(
            HwpBodyProcessor::new().extract(&bytes),
            Err(ExtractError::Encrypted(_))
        ));
    }

    #[test]
    fn test_preview_text() {
        let bytes = build_hwp(&[], FLAG_COMPRESSED, Some("<미리보기>\r\n공고 요약"));
        let text = HwpPreviewProcessor::new().extract(&bytes).unwrap();
        assert!(text.contains("공고 요약"));
        assert!(!text.contains('\r'));
    }

    #[test]
    fn test_preview_missing_stream() {
        let bytes = build_hwp(&["본문"], FLAG_COMPRESSED, None);
        assert!(HwpPreviewProcessor::new().extract(&bytes).is_err());
    }

    #[test]
    fn test_not_a_compound_file() {
        assert!(matches!(
            HwpBodyProcessor::new().extract(b"definitely not hwp"),
            Err(ExtractError::Hwp(_))
        ));
    }

    #[test]
    fn test_inline_controls_are_skipped() {
        let mut payload = utf16("앞");
        // Extended control (section definition) followed by 7 payload units.
        payload.extend_from_slice(&2u16.to_le_bytes());
        for _ in 0..7 {
            payload.extend_from_slice(&0x6365u16.to_le_bytes());
        }
        payload.extend(utf16("뒤"));

        let mut out = String::new();
        decode_para_text(&payload, &mut out);
        assert_eq!(out, "앞뒤\n");
    }

    #[test]
    fn test_inflate_stops_at_limit() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&vec![0u8; 1 << 20]).unwrap();
        let bomb = encoder.finish().unwrap();
        assert!(bomb.len() < 16 * 1024);

        let err = inflate(&bomb, 4096).unwrap_err();
        assert!(err.to_string().contains("inflates past 4096 bytes"), "{err}");

        let exact = inflate(&bomb, 1 << 20).unwrap();
        assert_eq!(exact.len(), 1 << 20);
    }

    #[test]
    fn test_extended_record_size() {
        let long = "가".repeat(3000);
        let section = record(HWPTAG_PARA_TEXT, &utf16(&long));

        let mut out = String::new();
        append_section_text(&section, &mut out).unwrap();
        assert_eq!(out.trim().chars().count(), 3000);
    }

    #[test]
    fn test_overrunning_record_is_an_error() {
        let mut section = record(HWPTAG_PARA_TEXT, &utf16("정상"));
        section.truncate(section.len() - 2);

        let mut out = String::new();
        assert!(append_section_text(&section, &mut out).is_err());
    }
}
