use crate::types::dataset_kind::DatasetKind;
use crate::types::record::Record;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Shape of a persisted dataset at a glance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub dataset_kind: DatasetKind,
    pub rows: usize,
    pub entities: usize,
    pub variables: BTreeSet<String>,
    pub min_timestamp: Option<NaiveDateTime>,
    pub max_timestamp: Option<NaiveDateTime>,
    pub latest_fetched_at: Option<DateTime<Utc>>,
    /// Distinct entities with data per period, for the trailing days.
    pub entities_per_day: BTreeMap<NaiveDate, usize>,
}

impl DatasetSummary {
    pub fn from_records(
        records: &[Record],
        kind: DatasetKind,
        today: NaiveDate,
        recent_days: u32,
    ) -> Self {
        let since = today
            .checked_sub_days(Days::new(u64::from(recent_days.saturating_sub(1))))
            .unwrap_or(NaiveDate::MIN);
        let mut entities = BTreeSet::new();
        let mut variables = BTreeSet::new();
        let mut per_day: BTreeMap<NaiveDate, BTreeSet<&str>> = BTreeMap::new();
        for r in records {
            entities.insert(r.entity_id.as_str());
            if !variables.contains(&r.variable) {
                variables.insert(r.variable.clone());
            }
            let period = r.period(kind);
            if recent_days > 0 && period >= since && period <= today {
                per_day.entry(period).or_default().insert(&r.entity_id);
            }
        }
        Self {
            dataset_kind: kind,
            rows: records.len(),
            entities: entities.len(),
            variables,
            min_timestamp: records.iter().map(|r| r.timestamp).min(),
            max_timestamp: records.iter().map(|r| r.timestamp).max(),
            latest_fetched_at: records.iter().map(|r| r.fetched_at).max(),
            entities_per_day: per_day
                .into_iter()
                .map(|(day, ids)| (day, ids.len()))
                .collect(),
        }
    }
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset:   {}", self.dataset_kind)?;
        writeln!(f, "Rows:      {}", self.rows)?;
        writeln!(f, "Entities:  {}", self.entities)?;
        writeln!(
            f,
            "Variables: {}",
            self.variables.iter().cloned().collect::<Vec<_>>().join(", ")
        )?;
        match (self.min_timestamp, self.max_timestamp) {
            (Some(min), Some(max)) => writeln!(f, "Range:     {min} .. {max}")?,
            _ => writeln!(f, "Range:     (empty)")?,
        }
        if let Some(fetched) = self.latest_fetched_at {
            writeln!(f, "Fetched:   {fetched}")?;
        }
        for (day, count) in &self.entities_per_day {
            writeln!(f, "  {day}: {count} entities")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::record::SourceTag;
    use chrono::TimeZone;

    fn record(entity: &str, d: u32, variable: &str) -> Record {
        Record {
            entity_id: entity.to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, d)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            variable: variable.to_string(),
            value: Some(1.0),
            fetched_at: Utc.with_ymd_and_hms(2024, 1, d, 13, 0, 0).unwrap(),
            source_tag: SourceTag::Observation,
            issued_at: None,
        }
    }

    #[test]
    fn test_summary_counts_recent_entities() {
        let records = vec![
            record("E1", 1, "temperature"),
            record("E1", 9, "temperature"),
            record("E1", 9, "humidity"),
            record("E2", 9, "temperature"),
            record("E2", 10, "temperature"),
        ];
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let summary = DatasetSummary::from_records(&records, DatasetKind::Observation, today, 2);
        assert_eq!(summary.rows, 5);
        assert_eq!(summary.entities, 2);
        assert_eq!(summary.variables.len(), 2);
        assert_eq!(
            summary.entities_per_day,
            BTreeMap::from([
                (NaiveDate::from_ymd_opt(2024, 1, 9).unwrap(), 2),
                (today, 1)
            ])
        );
        assert_eq!(
            summary.latest_fetched_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 10, 13, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_empty_dataset_summary() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let summary = DatasetSummary::from_records(&[], DatasetKind::Forecast, today, 7);
        assert_eq!(summary.rows, 0);
        assert!(summary.min_timestamp.is_none());
        assert!(summary.to_string().contains("(empty)"));
    }
}
