//! Flat per-card files: the append-only transaction record and the
//! statement export cache.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use crate::card_number::CardNumber;
use crate::error::Result;
use crate::reconcile::symmetric_difference;
use crate::statement::DocumentKind;
use crate::transaction::{Transaction, COLUMNS};

const DELIMITER: u8 = b';';

/// Directory of `<card>.csv` files, one row per transaction.
///
/// Rows are only ever appended. A header row is written when a file is
/// empty at open time; readers skip it.
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, card: &CardNumber) -> PathBuf {
        self.dir.join(format!("{}.csv", card))
    }

    /// Every recorded transaction of `card`, in file order.
    pub fn read(&self, card: &CardNumber) -> Result<Vec<Transaction>> {
        let path = self.path_for(card);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .from_path(&path)?;

        let mut out = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            if i == 0 && record.get(0) == Some(COLUMNS[0]) {
                continue;
            }
            out.push(record.deserialize(None)?);
        }
        Ok(out)
    }

    pub fn append(&self, card: &CardNumber, transactions: &[Transaction]) -> Result<()> {
        if transactions.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(card);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let empty = file.metadata()?.len() == 0;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .from_writer(file);
        if empty {
            writer.write_record(COLUMNS)?;
        }
        for txn in transactions {
            writer.serialize(txn)?;
        }
        writer.flush()?;
        tracing::debug!("Appended {} rows to {}", transactions.len(), path.display());
        Ok(())
    }

    /// Appends the transactions of `fresh` that the record lacks and returns them.
    pub fn sync(&self, card: &CardNumber, fresh: Vec<Transaction>) -> Result<Vec<Transaction>> {
        let stored = self.read(card)?;
        let diff = symmetric_difference(
            fresh,
            stored,
            Transaction::clone,
            Transaction::clone,
            Transaction::equivalence_key,
        );
        if !diff.only_b.is_empty() {
            tracing::debug!(
                "{} recorded transactions of {} no longer shown by the portal",
                diff.only_b.len(),
                card
            );
        }
        self.append(card, &diff.only_a)?;
        Ok(diff.only_a)
    }
}

/// Statement exports, stored as `<dir>/<card>/<date>.<ext>`.
///
/// The presence of a file alone marks the statement as fetched.
pub struct StatementCache {
    dir: PathBuf,
}

impl StatementCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, card: &CardNumber, date: &str, kind: DocumentKind) -> PathBuf {
        self.dir
            .join(card.as_str())
            .join(format!("{}.{}", date, kind.extension()))
    }

    pub fn contains(&self, card: &CardNumber, date: &str, kind: DocumentKind) -> bool {
        self.path_for(card, date, kind).exists()
    }

    pub fn write(&self, card: &CardNumber, date: &str, kind: DocumentKind, data: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(card, date, kind);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample, temp_dir};

    #[test]
    fn sync_twice_adds_nothing_the_second_time() {
        let dir = temp_dir("store-idem");
        let store = RecordStore::new(&dir);
        let card = CardNumber::parse("4277 19xx xxxx 0001").unwrap();
        let scraped = vec![
            sample("10", "-1,00", "A"),
            sample("", "-2,00", "B"),
            sample("", "-2,00", "B"),
        ];

        let first = store.sync(&card, scraped.clone()).unwrap();
        assert_eq!(first.len(), 3);
        let second = store.sync(&card, scraped).unwrap();
        assert!(second.is_empty());
        assert_eq!(store.read(&card).unwrap().len(), 3);

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn header_written_once_and_skipped_on_read() {
        let dir = temp_dir("store-header");
        let store = RecordStore::new(&dir);
        let card = CardNumber::parse("1234").unwrap();

        store.append(&card, &[sample("1", "-1,00", "A")]).unwrap();
        store.append(&card, &[sample("2", "+3,00", "Refund; partial")]).unwrap();

        let raw = fs::read_to_string(store.path_for(&card)).unwrap();
        assert_eq!(raw.matches("card_number;amount").count(), 1);
        assert!(raw.starts_with("card_number;"));

        let rows = store.read(&card).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].description, "Refund; partial");
        assert_eq!(rows[1].card_number.as_str(), "427719xxxxxx0001");

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = temp_dir("store-missing");
        let store = RecordStore::new(&dir);
        let card = CardNumber::parse("9999").unwrap();
        assert!(store.read(&card).unwrap().is_empty());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn statement_cache_presence() {
        let dir = temp_dir("cache");
        let cache = StatementCache::new(&dir);
        let card = CardNumber::parse("1234").unwrap();
        assert!(!cache.contains(&card, "2026-09-30", DocumentKind::Csv));
        let path = cache
            .write(&card, "2026-09-30", DocumentKind::Csv, b"a;b\n")
            .unwrap();
        assert!(path.ends_with("xxxxxxxxxxxx1234/2026-09-30.csv"));
        assert!(cache.contains(&card, "2026-09-30", DocumentKind::Csv));
        assert!(!cache.contains(&card, "2026-09-30", DocumentKind::Pdf));
        fs::remove_dir_all(dir).ok();
    }
}
