use crate::error::ExtractError;
use crate::processor::{DocumentFormat, DocumentProcessor};

pub struct PdfProcessor;

impl PdfProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PdfProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for PdfProcessor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let _span = tracing::info_span!("processor.pdf").entered();

        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| ExtractError::Pdf(format!("Failed to load PDF: {}", e)))?;

        let text = page_text(&doc);

        if is_garbled(&text) {
            // Scanned or CID-font PDFs; the conversion service handles these.
            return Err(ExtractError::Pdf(
                "no usable embedded text (empty or garbled)".to_string(),
            ));
        }

        Ok(text)
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf)
    }
}

/// Concatenates the text of every page lopdf can decode.
fn page_text(doc: &lopdf::Document) -> String {
    doc.get_pages()
        .into_keys()
        .filter_map(|page| match doc.extract_text(&[page]) {
            Ok(text) => Some(text),
            Err(e) => {
                log::debug!("Skipping PDF page {}: {}", page, e);
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Placeholder lopdf emits for glyphs in Identity-H encoded CID fonts.
const CID_PLACEHOLDER: &str = "?Identity-H Unimplemented?";

/// The ratio check only applies to text longer than this.
const RATIO_MIN_CHARS: usize = 50;
const MIN_ALNUM_PERCENT: usize = 10;

/// Empty output, CID placeholders only, or mostly symbols.
fn is_garbled(text: &str) -> bool {
    let trimmed = text.trim();
    let without_placeholders = trimmed.replace(CID_PLACEHOLDER, "");
    if without_placeholders.chars().all(char::is_whitespace) {
        return true;
    }

    // Hangul syllables are alphanumeric, so Korean text passes.
    let (total, alnum) = trimmed.chars().fold((0usize, 0usize), |(t, a), c| {
        (t + 1, a + usize::from(c.is_alphanumeric()))
    });
    total > RATIO_MIN_CHARS && alnum * 100 < total * MIN_ALNUM_PERCENT
}
