//! Ledger of `(entity, day)` periods that were fetched and confirmed empty.
//!
//! Kept beside the dataset as `<kind>.empty.bin` so gap detection can tell
//! "never attempted" from "attempted, nothing there".

use crate::store::error::StoreError;
use crate::store::frame::write_bytes_atomic;
use bincode::config::{Configuration, Fixint, LittleEndian};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();
const LEDGER_EXTENSION: &str = "empty.bin";

pub type EmptyPeriods = BTreeSet<(String, NaiveDate)>;

pub fn ledger_path(dataset_path: &Path) -> PathBuf {
    dataset_path.with_extension(LEDGER_EXTENSION)
}

pub fn read_ledger(path: &Path) -> Result<EmptyPeriods, StoreError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(EmptyPeriods::new()),
        Err(e) => return Err(StoreError::Io(path.to_path_buf(), e)),
    };
    let (periods, _) = bincode::serde::decode_from_slice::<EmptyPeriods, _>(&bytes, BINCODE_CONFIG)
        .map_err(|e| StoreError::LedgerDecode(path.to_path_buf(), Box::new(e)))?;
    Ok(periods)
}

pub fn write_ledger(path: &Path, periods: &EmptyPeriods) -> Result<(), StoreError> {
    let bytes = bincode::serde::encode_to_vec(periods, BINCODE_CONFIG)
        .map_err(|e| StoreError::LedgerEncode(Box::new(e)))?;
    write_bytes_atomic(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_sits_beside_dataset() {
        assert_eq!(
            ledger_path(Path::new("/data/daily_climatology.parquet")),
            PathBuf::from("/data/daily_climatology.empty.bin")
        );
    }

    #[test]
    fn test_ledger_survives_rewrite() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("observation.empty.bin");
        assert!(read_ledger(&path)?.is_empty());

        let mut periods = EmptyPeriods::new();
        periods.insert(("E1".into(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()));
        write_ledger(&path, &periods)?;
        periods.insert(("E2".into(), NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()));
        write_ledger(&path, &periods)?;
        assert_eq!(read_ledger(&path)?, periods);
        Ok(())
    }
}
