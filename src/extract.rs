//! PDF text extraction.
//!
//! Uploads arrive as raw bytes; this module turns them into one UTF-8 string
//! per page. The [`PageExtractor`] trait is the seam the ingestion pipeline
//! depends on, so tests and custom binaries can swap in their own extractor.

use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Only PDF files are accepted")]
    NotPdf,
    #[error("File too large ({size_mb:.1}MB). Maximum: {max_mb}MB")]
    TooLarge { size_mb: f64, max_mb: usize },
    #[error("Invalid PDF file: {0}")]
    Pdf(String),
    #[error("PDF has no pages")]
    NoPages,
    #[error("Document has {pages} pages. Maximum: {max}")]
    TooManyPages { pages: usize, max: usize },
}

/// Extracts per-page text from document bytes.
pub trait PageExtractor: Send + Sync {
    /// Returns one entry per page, in page order. Pages without a text
    /// layer yield empty strings.
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;
}

/// [`PageExtractor`] backed by `pdf-extract`.
pub struct PdfExtractor;

impl PageExtractor for PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(ExtractError::Pdf("missing %PDF header".to_string()));
        }
        pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))
    }
}

/// Cheap checks that need no parsing: extension and size.
pub fn validate_upload(filename: &str, size_bytes: usize, max_mb: usize) -> Result<(), ExtractError> {
    if !is_pdf_filename(filename) {
        return Err(ExtractError::NotPdf);
    }
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    if size_mb > max_mb as f64 {
        return Err(ExtractError::TooLarge { size_mb, max_mb });
    }
    Ok(())
}

/// Extracts pages and enforces the page-count bounds.
pub fn extract_checked(
    extractor: &dyn PageExtractor,
    bytes: &[u8],
    max_pages: usize,
) -> Result<Vec<String>, ExtractError> {
    let pages = extractor.extract_pages(bytes)?;
    if pages.is_empty() {
        return Err(ExtractError::NoPages);
    }
    if pages.len() > max_pages {
        return Err(ExtractError::TooManyPages {
            pages: pages.len(),
            max: max_pages,
        });
    }
    Ok(pages)
}

pub fn is_pdf_filename(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".pdf")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPages(Vec<String>);

    impl PageExtractor for FixedPages {
        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = PdfExtractor.extract_pages(b"not a pdf").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn non_pdf_extension_rejected() {
        let err = validate_upload("notes.docx", 10, 10).unwrap_err();
        assert!(matches!(err, ExtractError::NotPdf));
        assert_eq!(err.to_string(), "Only PDF files are accepted");
        assert!(validate_upload("Contract.PDF", 10, 10).is_ok());
    }

    #[test]
    fn oversized_upload_rejected() {
        let err = validate_upload("big.pdf", 11 * 1024 * 1024, 10).unwrap_err();
        assert!(err.to_string().starts_with("File too large (11.0MB)"));
    }

    #[test]
    fn page_bounds_enforced() {
        let empty = FixedPages(vec![]);
        assert!(matches!(
            extract_checked(&empty, b"", 80),
            Err(ExtractError::NoPages)
        ));

        let three = FixedPages(vec!["a".into(), "b".into(), "c".into()]);
        assert!(matches!(
            extract_checked(&three, b"", 2),
            Err(ExtractError::TooManyPages { pages: 3, max: 2 })
        ));
        assert_eq!(extract_checked(&three, b"", 3).unwrap().len(), 3);
    }
}
