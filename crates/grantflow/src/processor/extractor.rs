use std::sync::Arc;

use crate::conversion::{ConversionFile, Converter};
use crate::error::{ConversionError, ExtractError};
use crate::processor::{is_acceptable, DocumentFormat, ProcessorRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Native(&'static str),
    Conversion,
}

impl std::fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(name) => write!(f, "native:{}", name),
            Self::Conversion => f.write_str("conversion"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentText {
    pub text: String,
    pub format: DocumentFormat,
    pub strategy: ExtractionStrategy,
}

/// Best-effort text recovery for one attachment: native parsers first, then
/// a single conversion attempt when the format allows it.
pub struct AttachmentTextExtractor {
    registry: ProcessorRegistry,
    converter: Option<Arc<Converter>>,
    min_text_length: usize,
}

impl AttachmentTextExtractor {
    pub fn new(converter: Option<Arc<Converter>>, min_text_length: usize) -> Self {
        Self {
            registry: ProcessorRegistry::new(),
            converter,
            min_text_length,
        }
    }

    pub fn min_text_length(&self) -> usize {
        self.min_text_length
    }

    /// Returns `Ok(None)` when no acceptable text can be recovered from this
    /// attachment. Only transient conversion failures are returned as errors.
    pub async fn extract(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> Result<Option<AttachmentText>, ConversionError> {
        let Some(format) = DocumentFormat::detect(filename, bytes) else {
            log::info!("Skipping {}: unsupported format", filename);
            return Ok(None);
        };

        let native_error = match self.registry.extract(format, bytes, self.min_text_length) {
            Ok((name, text)) => {
                tracing::debug!("Extracted {} chars from {} via {}", text.len(), filename, name);
                return Ok(Some(AttachmentText {
                    text,
                    format,
                    strategy: ExtractionStrategy::Native(name),
                }));
            }
            Err(e) => e,
        };

        tracing::info!("Native extraction failed for {}: {}", filename, native_error);

        if !format.is_convertible() {
            return Ok(None);
        }

        let Some(converter) = &self.converter else {
            return Ok(None);
        };

        self.convert(converter, filename, format, bytes, &native_error)
            .await
    }

    async fn convert(
        &self,
        converter: &Converter,
        filename: &str,
        format: DocumentFormat,
        bytes: &[u8],
        native_error: &ExtractError,
    ) -> Result<Option<AttachmentText>, ConversionError> {
        let file = ConversionFile {
            filename: filename.to_string(),
            format,
            bytes: bytes.to_vec(),
        };

        match converter.convert(&file).await {
            Ok(text) if is_acceptable(&text, self.min_text_length) => {
                tracing::info!("Recovered {} via conversion fallback", filename);
                Ok(Some(AttachmentText {
                    text,
                    format,
                    strategy: ExtractionStrategy::Conversion,
                }))
            }
            Ok(text) => {
                tracing::info!(
                    "Conversion of {} returned {} chars, below the minimum",
                    filename,
                    text.trim().chars().count()
                );
                Ok(None)
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                tracing::warn!(
                    "Conversion rejected {} ({}); native error was: {}",
                    filename,
                    e,
                    native_error
                );
                Ok(None)
            }
        }
    }
}
