//! Conversion between records and the on-disk Parquet layout, plus the
//! atomic replace used for every dataset write.
//!
//! These functions block. Callers run them inside `spawn_blocking`.

use crate::store::error::StoreError;
use crate::types::record::{Record, SourceTag};
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// All temporal columns are `Datetime(ms)` without a time zone. `fetched_at`
/// and `issued_at` hold UTC wall time.
const TIME_UNIT: TimeUnit = TimeUnit::Milliseconds;

pub const COL_ENTITY_ID: &str = "entity_id";
pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_VARIABLE: &str = "variable";
pub const COL_VALUE: &str = "value";
pub const COL_FETCHED_AT: &str = "fetched_at";
pub const COL_SOURCE_TAG: &str = "source_tag";
pub const COL_ISSUED_AT: &str = "issued_at";

fn datetime_dtype() -> DataType {
    DataType::Datetime(TIME_UNIT, None)
}

fn datetime_column(name: &str, millis: Vec<Option<i64>>) -> PolarsResult<Column> {
    Column::new(name.into(), millis).cast(&datetime_dtype())
}

pub fn records_to_frame(records: &[Record]) -> PolarsResult<DataFrame> {
    let mut entity_ids = Vec::with_capacity(records.len());
    let mut timestamps = Vec::with_capacity(records.len());
    let mut variables = Vec::with_capacity(records.len());
    let mut values = Vec::with_capacity(records.len());
    let mut fetched = Vec::with_capacity(records.len());
    let mut tags = Vec::with_capacity(records.len());
    let mut issued = Vec::with_capacity(records.len());
    for r in records {
        entity_ids.push(r.entity_id.as_str());
        timestamps.push(Some(r.timestamp.and_utc().timestamp_millis()));
        variables.push(r.variable.as_str());
        values.push(r.value);
        fetched.push(Some(r.fetched_at.timestamp_millis()));
        tags.push(r.source_tag.as_str());
        issued.push(r.issued_at.map(|t| t.timestamp_millis()));
    }
    DataFrame::new(vec![
        Column::new(COL_ENTITY_ID.into(), entity_ids),
        datetime_column(COL_TIMESTAMP, timestamps)?,
        Column::new(COL_VARIABLE.into(), variables),
        Column::new(COL_VALUE.into(), values),
        datetime_column(COL_FETCHED_AT, fetched)?,
        Column::new(COL_SOURCE_TAG.into(), tags),
        datetime_column(COL_ISSUED_AT, issued)?,
    ])
}

pub fn frame_to_records(df: &DataFrame, path: &Path) -> Result<Vec<Record>, StoreError> {
    let read_err = |e| StoreError::ParquetRead(path.to_path_buf(), e);
    let invalid = |column: &'static str, message: String| StoreError::InvalidColumn {
        path: path.to_path_buf(),
        column,
        message,
    };
    // Normalizes whatever unit the file was written with.
    let as_datetime = |name: &str| {
        df.column(name)
            .and_then(|c| c.cast(&datetime_dtype()))
            .map_err(read_err)
    };
    let timestamp_col = as_datetime(COL_TIMESTAMP)?;
    let fetched_col = as_datetime(COL_FETCHED_AT)?;
    let issued_col = as_datetime(COL_ISSUED_AT)?;

    let entity_ids = df.column(COL_ENTITY_ID).and_then(|c| c.str()).map_err(read_err)?;
    let timestamps = timestamp_col.datetime().map_err(read_err)?;
    let variables = df.column(COL_VARIABLE).and_then(|c| c.str()).map_err(read_err)?;
    let values = df.column(COL_VALUE).and_then(|c| c.f64()).map_err(read_err)?;
    let fetched = fetched_col.datetime().map_err(read_err)?;
    let tags = df.column(COL_SOURCE_TAG).and_then(|c| c.str()).map_err(read_err)?;
    let issued = issued_col.datetime().map_err(read_err)?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let required = |column: &'static str, raw: Option<&str>| {
            raw.map(str::to_string)
                .ok_or_else(|| invalid(column, format!("null at row {i}")))
        };
        let instant = |column: &'static str, millis: Option<i64>| {
            let millis = millis.ok_or_else(|| invalid(column, format!("null at row {i}")))?;
            from_millis(millis)
                .ok_or_else(|| invalid(column, format!("row {i}: {millis} ms is out of range")))
        };
        let timestamp = instant(COL_TIMESTAMP, timestamps.get(i))?.naive_utc();
        let fetched_at = instant(COL_FETCHED_AT, fetched.get(i))?;
        let source_tag: SourceTag = required(COL_SOURCE_TAG, tags.get(i))?
            .parse()
            .map_err(|e| invalid(COL_SOURCE_TAG, format!("row {i}: {e}")))?;
        let issued_at = match issued.get(i) {
            Some(millis) => Some(instant(COL_ISSUED_AT, Some(millis))?),
            None => None,
        };
        records.push(Record {
            entity_id: required(COL_ENTITY_ID, entity_ids.get(i))?,
            timestamp,
            variable: required(COL_VARIABLE, variables.get(i))?,
            value: values.get(i),
            fetched_at,
            source_tag,
            issued_at,
        });
    }
    Ok(records)
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Reads every record of the dataset at `path`. A missing file is an empty
/// dataset.
pub fn read_records(path: &Path) -> Result<Vec<Record>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Io(path.to_path_buf(), e)),
    };
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::ParquetRead(path.to_path_buf(), e))?;
    frame_to_records(&df, path)
}

/// Writes `records` to `path` through a temporary sibling file that is
/// renamed into place, so readers see either the old or the new dataset.
pub fn write_records_atomic(path: &Path, records: &[Record]) -> Result<(), StoreError> {
    let mut df =
        records_to_frame(records).map_err(|e| StoreError::ParquetWrite(path.to_path_buf(), e))?;
    write_atomic(path, |file| {
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Snappy)
            .finish(&mut df)
            .map(|_| ())
            .map_err(|e| StoreError::ParquetWrite(path.to_path_buf(), e))
    })
}

pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    write_atomic(path, |file| {
        file.write_all(bytes)
            .map_err(|e| StoreError::Io(path.to_path_buf(), e))
    })
}

fn write_atomic<F>(path: &Path, write: F) -> Result<(), StoreError>
where
    F: FnOnce(&mut File) -> Result<(), StoreError>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
    let mut tmp =
        NamedTempFile::new_in(parent).map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
    write(tmp.as_file_mut())?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::Io(tmp.path().to_path_buf(), e))?;
    tmp.persist(path)
        .map_err(|e| StoreError::Persist(path.to_path_buf(), e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn sample() -> Vec<Record> {
        let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap();
        vec![
            Record {
                entity_id: "0076".into(),
                timestamp: ts,
                variable: "temperature".into(),
                value: Some(12.5),
                fetched_at: Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap(),
                source_tag: SourceTag::Observation,
                issued_at: None,
            },
            Record {
                entity_id: "08019".into(),
                timestamp: ts,
                variable: "temp_max".into(),
                value: None,
                fetched_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
                source_tag: SourceTag::Forecast,
                issued_at: Some(Utc.with_ymd_and_hms(2024, 2, 29, 9, 0, 0).unwrap()),
            },
        ]
    }

    #[test]
    fn test_parquet_file_preserves_nulls_and_issue_time() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("mixed.parquet");
        write_records_atomic(&path, &sample())?;
        assert_eq!(read_records(&path)?, sample());

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.path() != path)
            .collect();
        assert!(leftovers.is_empty(), "temporary files left behind");
        Ok(())
    }

    #[test]
    fn test_temporal_columns_are_typed() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("typed.parquet");
        write_records_atomic(&path, &sample())?;
        let df = ParquetReader::new(File::open(&path).expect("open"))
            .finish()
            .expect("read parquet");
        for column in [COL_TIMESTAMP, COL_FETCHED_AT, COL_ISSUED_AT] {
            assert_eq!(
                df.column(column).expect("column").dtype(),
                &DataType::Datetime(TimeUnit::Milliseconds, None),
                "{column}"
            );
        }
        assert_eq!(df.column(COL_ISSUED_AT).expect("column").null_count(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_file_reads_as_empty() -> Result<(), StoreError> {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(read_records(&dir.path().join("absent.parquet"))?.is_empty());
        Ok(())
    }
}
