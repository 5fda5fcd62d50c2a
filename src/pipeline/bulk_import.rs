use crate::apis::export::ExportReader;
use crate::constants::IMPORT_PROGRESS_INTERVAL;
use crate::error::Result;
use crate::storage::CatalogStore;
use crate::types::record_id;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Default, Clone)]
pub struct BulkImportStats {
    pub inserted: u64,
    pub already_present: u64,
    pub skipped_lines: u64,
    pub missing_id: u64,
}

impl BulkImportStats {
    pub fn total_seen(&self) -> u64 {
        self.inserted + self.already_present
    }
}

/// Load the saved export into the store as stub records.
///
/// Insert-only: an id already in the store, enriched or not, is left
/// untouched, so importing the same export twice is a no-op.
pub async fn import_export(path: &Path, store: &dyn CatalogStore) -> Result<BulkImportStats> {
    let mut reader = ExportReader::open(path)?;
    let mut stats = BulkImportStats::default();

    info!("Importing bulk export from {}", path.display());
    for record in reader.by_ref() {
        let record = record?;
        let Some(id) = record_id(&record) else {
            stats.missing_id += 1;
            warn!("Export record without integer id, skipping");
            continue;
        };

        if store.insert_if_absent(id, &record).await? {
            stats.inserted += 1;
        } else {
            stats.already_present += 1;
        }

        if stats.total_seen() % IMPORT_PROGRESS_INTERVAL == 0 {
            info!("Imported {} movies ({} new)", stats.total_seen(), stats.inserted);
        }
    }
    stats.skipped_lines = reader.skipped();

    info!(
        "Finished bulk import: {} new, {} already present, {} malformed lines, {} without id",
        stats.inserted, stats.already_present, stats.skipped_lines, stats.missing_id
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryCatalog;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn export_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut encoder = GzEncoder::new(file.reopen().unwrap(), Compression::default());
        for line in lines {
            writeln!(encoder, "{line}").unwrap();
        }
        encoder.finish().unwrap();
        file
    }

    #[tokio::test]
    async fn duplicate_lines_yield_one_stub() {
        let file = export_file(&[
            r#"{"id":1,"original_title":"A"}"#,
            r#"{"id":1,"original_title":"A"}"#,
        ]);
        let store = InMemoryCatalog::new();

        let stats = import_export(file.path(), &store).await.unwrap();

        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.already_present, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn reimport_is_idempotent() {
        let file = export_file(&[
            r#"{"id":1,"original_title":"A"}"#,
            r#"{"id":2,"original_title":"B"}"#,
        ]);
        let store = InMemoryCatalog::new();

        let first = import_export(file.path(), &store).await.unwrap();
        assert_eq!(first.inserted, 2);

        let second = import_export(file.path(), &store).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.already_present, 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn malformed_and_idless_records_are_counted() {
        let file = export_file(&[
            r#"{"id":1,"original_title":"A"}"#,
            "garbage",
            r#"{"original_title":"no id"}"#,
        ]);
        let store = InMemoryCatalog::new();

        let stats = import_export(file.path(), &store).await.unwrap();

        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.skipped_lines, 1);
        assert_eq!(stats.missing_id, 1);
    }
}
