//! CSV persistence for invoice records, position-aligned with `invoices.vec`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::invoice::InvoiceRecord;

pub struct MetadataStorage {
    path: PathBuf,
}

impl MetadataStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read every record in file order.
    pub fn load(&self) -> Result<Vec<InvoiceRecord>, csv::Error> {
        let now = Instant::now();
        let mut reader = csv::Reader::from_path(&self.path)?;

        let records = reader
            .deserialize()
            .collect::<Result<Vec<InvoiceRecord>, _>>()?;

        log::debug!(
            "took {}ms to read {} records",
            now.elapsed().as_micros() as f64 / 1000.0,
            records.len()
        );

        Ok(records)
    }

    /// Rewrite the whole file through a temp file and rename.
    pub fn save(&self, records: &[InvoiceRecord]) -> Result<(), csv::Error> {
        let temp_path = self.path.with_extension("csv.tmp");

        let result = Self::write_to_file(&temp_path, records);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn write_to_file(path: &Path, records: &[InvoiceRecord]) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        if records.is_empty() {
            writer.write_record(CSV_HEADERS)?;
        }
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Written explicitly for an empty store; serde emits them otherwise.
const CSV_HEADERS: [&str; 5] = crate::invoice::FIELD_NAMES;
