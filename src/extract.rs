//! Text extraction from the uploaded policy PDF and the invoice ZIP.

use std::io::{Cursor, Read};

/// Prefix marking a text value that is really an extraction failure.
pub const ERROR_SENTINEL: &str = "[ERROR";

/// Largest decompressed invoice accepted from the archive.
const MAX_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Could not extract text from PDF: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("Could not open ZIP file: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One PDF entry of the invoice archive.
#[derive(Debug, Clone)]
pub struct ExtractedInvoice {
    /// Entry name inside the archive, used as the invoice id
    pub name: String,
    /// Extracted text, or why extraction failed for this entry
    pub text: Result<String, String>,
}

/// Concatenated text of every page.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let document = lopdf::Document::load_mem(bytes)?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Ok(String::new());
    }
    Ok(document.extract_text(&pages)?)
}

/// Extract every `.pdf` entry of a ZIP archive, in archive order.
///
/// An unreadable archive fails the whole call; an unreadable entry is
/// reported on that entry and the rest are still extracted. Entries that
/// are not PDFs are skipped.
pub fn extract_invoices_from_zip(bytes: &[u8]) -> Result<Vec<ExtractedInvoice>, ExtractError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut invoices = Vec::new();

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(err) => {
                log::error!("Failed to read ZIP entry #{i}: {err}");
                invoices.push(ExtractedInvoice {
                    name: format!("entry-{i}"),
                    text: Err(format!("Could not extract PDF: {err}")),
                });
                continue;
            }
        };

        let name = entry.name().to_string();
        if entry.is_dir() || !name.to_lowercase().ends_with(".pdf") {
            log::debug!("Skipping non-PDF entry {name}");
            continue;
        }

        let text = match read_capped(&mut entry, MAX_ENTRY_BYTES) {
            Ok(buf) => extract_pdf_text(&buf).map_err(|err| err.to_string()),
            Err(err) => Err(format!("Could not extract PDF: {err}")),
        };

        if let Err(err) = &text {
            log::error!("Failed to extract {name} from ZIP: {err}");
        }

        invoices.push(ExtractedInvoice { name, text });
    }

    Ok(invoices)
}

/// Read at most `limit` bytes, ignoring whatever size the archive declares.
fn read_capped(reader: impl Read, limit: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.take(limit + 1).read_to_end(&mut buf)?;
    if buf.len() as u64 > limit {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("entry is larger than {limit} bytes"),
        ));
    }
    Ok(buf)
}
