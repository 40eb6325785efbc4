use crate::error::ExtractError;
use crate::processor::{DocumentFormat, DocumentProcessor};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub struct TextProcessor;

impl TextProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TextProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentProcessor for TextProcessor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extract(&self, bytes: &[u8]) -> Result<String, ExtractError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let text = std::str::from_utf8(bytes)
            .map_err(|e| ExtractError::Text(format!("not valid UTF-8: {}", e)))?;
        Ok(text.replace("\r\n", "\n"))
    }

    fn supports(&self, format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_text_format() {
        let processor = TextProcessor::new();
        assert!(processor.supports(DocumentFormat::Text));
        assert!(!processor.supports(DocumentFormat::Pdf));
    }

    #[test]
    fn test_utf8_text() {
        let text = TextProcessor::new()
            .extract("접수기간: 2024.03.01 ~ 2024.03.31\r\n".as_bytes())
            .unwrap();
        assert_eq!(text, "접수기간: 2024.03.01 ~ 2024.03.31\n");
    }

    #[test]
    fn test_bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("공고".as_bytes());
        assert_eq!(TextProcessor::new().extract(&bytes).unwrap(), "공고");
    }

    #[test]
    fn test_invalid_utf8() {
        let result = TextProcessor::new().extract(&[0xB0, 0xF8, 0xB0, 0xED]);
        assert!(matches!(result, Err(ExtractError::Text(_))));
    }
}
