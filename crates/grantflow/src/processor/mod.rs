pub mod extractor;
pub mod hwp;
pub mod hwpx;
pub mod pdf;
pub mod text;

use std::io::Cursor;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

pub use extractor::{AttachmentText, AttachmentTextExtractor, ExtractionStrategy};

/// OLE2 compound file signature used by HWP 5.0 documents.
const CFB_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Hwp,
    Hwpx,
    Pdf,
    Text,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "hwp" => Some(Self::Hwp),
            "hwpx" => Some(Self::Hwpx),
            "pdf" => Some(Self::Pdf),
            "txt" | "text" => Some(Self::Text),
            _ => None,
        }
    }

    /// Detects the format from the file's leading bytes, falling back to the
    /// filename extension when the content is not recognised.
    pub fn detect(filename: &str, bytes: &[u8]) -> Option<Self> {
        Self::from_magic(bytes).or_else(|| {
            let ext = Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("");
            Self::from_extension(ext)
        })
    }

    fn from_magic(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&CFB_MAGIC) {
            Some(Self::Hwp)
        } else if bytes.starts_with(PDF_MAGIC) {
            Some(Self::Pdf)
        } else if bytes.starts_with(ZIP_MAGIC) && is_hwpx_archive(bytes) {
            Some(Self::Hwpx)
        } else {
            None
        }
    }

    /// Formats the remote conversion service can turn into text.
    pub fn is_convertible(&self) -> bool {
        matches!(self, Self::Hwp | Self::Hwpx | Self::Pdf)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hwp => "hwp",
            Self::Hwpx => "hwpx",
            Self::Pdf => "pdf",
            Self::Text => "text",
        }
    }
}

fn is_hwpx_archive(bytes: &[u8]) -> bool {
    match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive
            .file_names()
            .any(|name| name.starts_with("Contents/section") && name.ends_with(".xml")),
        Err(_) => false,
    }
}

/// Returns true when extracted text is long enough to count as a real
/// extraction rather than an empty shell.
pub fn is_acceptable(text: &str, min_chars: usize) -> bool {
    text.trim().chars().count() >= min_chars
}

/// A native, in-process text extraction strategy.
pub trait DocumentProcessor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError>;
    fn supports(&self, format: DocumentFormat) -> bool;
}

/// Ordered list of native strategies. For a given format, processors are
/// tried in registration order.
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn DocumentProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        let processors: Vec<Box<dyn DocumentProcessor>> = vec![
            Box::new(hwp::HwpBodyProcessor::new()),
            Box::new(hwp::HwpPreviewProcessor::new()),
            Box::new(hwpx::HwpxProcessor::new()),
            Box::new(pdf::PdfProcessor::new()),
            Box::new(text::TextProcessor::new()),
        ];

        Self { processors }
    }

    pub fn with_processors(processors: Vec<Box<dyn DocumentProcessor>>) -> Self {
        Self { processors }
    }

    /// Runs every processor that supports `format` until one yields
    /// acceptable text. Returns the last failure when none did.
    pub fn extract(
        &self,
        format: DocumentFormat,
        bytes: &[u8],
        min_chars: usize,
    ) -> Result<(&'static str, String), ExtractError> {
        let mut last_error = ExtractError::UnsupportedFormat(format.as_str().to_string());

        for processor in self.processors.iter().filter(|p| p.supports(format)) {
            match processor.extract(bytes) {
                Ok(text) if is_acceptable(&text, min_chars) => {
                    return Ok((processor.name(), text));
                }
                Ok(text) => {
                    let chars = text.trim().chars().count();
                    log::debug!(
                        "{} produced {} chars, below the {} char minimum",
                        processor.name(),
                        chars,
                        min_chars
                    );
                    last_error = ExtractError::Unusable {
                        chars,
                        min: min_chars,
                    };
                }
                Err(e) => {
                    log::debug!("{} failed: {}", processor.name(), e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
