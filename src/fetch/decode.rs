//! Turns remote payloads into [`Record`]s.
//!
//! Every dataset kind has a fixed mapping from the remote's field names to
//! canonical variable names. The mapping is applied once here, so stored
//! datasets never carry remote naming.

use crate::fetch::error::DecodeError;
use crate::types::dataset_kind::DatasetKind;
use crate::types::record::Record;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use serde_json::{Map, Value};

/// Value stored for a precipitation reported as a trace ("Ip"): present, but
/// below what the gauge can measure.
pub const TRACE_PRECIPITATION: f64 = 0.1;

const TRACE_MARKER: &str = "Ip";
/// Precipitation accumulated over several days; no per-day value exists.
const ACCUMULATED_MARKER: &str = "Acum";
/// Time-of-extreme fields sometimes hold this instead of a time.
const SEVERAL_MARKER: &str = "Varias";

const DAILY_CLIMATOLOGY_FIELDS: &[(&str, &str)] = &[
    ("tmed", "temp_mean"),
    ("tmax", "temp_max"),
    ("tmin", "temp_min"),
    ("prec", "precipitation"),
    ("velmedia", "wind_speed_mean"),
    ("racha", "wind_gust"),
    ("dir", "wind_direction"),
    ("sol", "sunshine_hours"),
    ("presMax", "pressure_max"),
    ("presMin", "pressure_min"),
    ("hrMedia", "humidity_mean"),
    ("hrMax", "humidity_max"),
    ("hrMin", "humidity_min"),
];

const OBSERVATION_FIELDS: &[(&str, &str)] = &[
    ("ta", "temperature"),
    ("tamax", "temp_max"),
    ("tamin", "temp_min"),
    ("tpr", "dew_point"),
    ("prec", "precipitation"),
    ("hr", "humidity"),
    ("vv", "wind_speed"),
    ("vmax", "wind_gust"),
    ("dv", "wind_direction"),
    ("pres", "pressure"),
];

/// Forecast fields as (object, member, variable).
const FORECAST_RANGE_FIELDS: &[(&str, &str, &str)] = &[
    ("temperatura", "maxima", "temp_max"),
    ("temperatura", "minima", "temp_min"),
    ("humedadRelativa", "maxima", "humidity_max"),
    ("humedadRelativa", "minima", "humidity_min"),
    ("sensTermica", "maxima", "apparent_temp_max"),
    ("sensTermica", "minima", "apparent_temp_min"),
];

/// Parses one raw measurement.
///
/// Numbers pass through. Strings are trimmed and may use a decimal comma. An
/// empty string is a missing value, not zero, and the trace marker maps to
/// [`TRACE_PRECIPITATION`].
pub fn parse_measurement(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_measurement_str(s),
        _ => None,
    }
}

fn parse_measurement_str(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.eq_ignore_ascii_case(TRACE_MARKER) {
        return Some(TRACE_PRECIPITATION);
    }
    if trimmed.eq_ignore_ascii_case(ACCUMULATED_MARKER)
        || trimmed.eq_ignore_ascii_case(SEVERAL_MARKER)
    {
        return None;
    }
    let normalized = trimmed.replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => Some(value),
        _ => {
            debug!("Unparseable measurement '{}' treated as missing", raw);
            None
        }
    }
}

/// Parses the timestamp formats the remote emits, interpreting naive values
/// as UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim().trim_end_matches("UTC");
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Decodes a payload for `kind`. Rows without an entity field are attributed
/// to `requested_entity`.
pub fn decode_payload(
    kind: DatasetKind,
    requested_entity: &str,
    payload: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<Record>, DecodeError> {
    let rows = payload.as_array().ok_or(DecodeError::NotAnArray)?;
    let mut records = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        let row = row.as_object().ok_or(DecodeError::RowNotObject(index))?;
        match kind {
            DatasetKind::DailyClimatology => decode_flat_row(
                kind,
                row,
                index,
                ("indicativo", "fecha"),
                DAILY_CLIMATOLOGY_FIELDS,
                requested_entity,
                fetched_at,
                &mut records,
            )?,
            DatasetKind::Observation => decode_flat_row(
                kind,
                row,
                index,
                ("idema", "fint"),
                OBSERVATION_FIELDS,
                requested_entity,
                fetched_at,
                &mut records,
            )?,
            DatasetKind::Forecast => {
                decode_forecast(row, index, requested_entity, fetched_at, &mut records)?
            }
        }
    }
    Ok(records)
}

fn entity_of(kind: DatasetKind, row: &Map<String, Value>, field: &str, fallback: &str) -> String {
    let raw = match row.get(field) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    raw.and_then(|id| kind.entity_kind().normalize_id(&id))
        .unwrap_or_else(|| fallback.to_string())
}

fn timestamp_field(
    row: &Map<String, Value>,
    field: &'static str,
    index: usize,
) -> Result<NaiveDateTime, DecodeError> {
    let raw = row
        .get(field)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingField { field, row: index })?;
    parse_timestamp(raw).ok_or_else(|| DecodeError::BadTimestamp {
        field,
        row: index,
        value: raw.to_string(),
    })
}

#[allow(clippy::too_many_arguments)]
fn decode_flat_row(
    kind: DatasetKind,
    row: &Map<String, Value>,
    index: usize,
    (entity_field, time_field): (&str, &'static str),
    fields: &[(&str, &str)],
    requested_entity: &str,
    fetched_at: DateTime<Utc>,
    out: &mut Vec<Record>,
) -> Result<(), DecodeError> {
    let entity_id = entity_of(kind, row, entity_field, requested_entity);
    let timestamp = timestamp_field(row, time_field, index)?;
    for (raw_name, variable) in fields {
        let Some(raw) = row.get(*raw_name) else {
            continue;
        };
        out.push(Record {
            entity_id: entity_id.clone(),
            timestamp,
            variable: (*variable).to_string(),
            value: parse_measurement(raw),
            fetched_at,
            source_tag: kind.source_tag(),
            issued_at: None,
        });
    }
    Ok(())
}

fn decode_forecast(
    row: &Map<String, Value>,
    index: usize,
    requested_entity: &str,
    fetched_at: DateTime<Utc>,
    out: &mut Vec<Record>,
) -> Result<(), DecodeError> {
    let kind = DatasetKind::Forecast;
    let entity_id = entity_of(kind, row, "id", requested_entity);
    let issued_at = timestamp_field(row, "elaborado", index)?.and_utc();
    let days = row
        .get("prediccion")
        .and_then(|p| p.get("dia"))
        .and_then(Value::as_array)
        .ok_or(DecodeError::MissingField {
            field: "prediccion.dia",
            row: index,
        })?;

    for day in days {
        let Some(day) = day.as_object() else {
            return Err(DecodeError::RowNotObject(index));
        };
        let timestamp = timestamp_field(day, "fecha", index)?;
        let mut push = |variable: &str, value: Option<f64>| {
            out.push(Record {
                entity_id: entity_id.clone(),
                timestamp,
                variable: variable.to_string(),
                value,
                fetched_at,
                source_tag: kind.source_tag(),
                issued_at: Some(issued_at),
            })
        };
        for (object, member, variable) in FORECAST_RANGE_FIELDS {
            if let Some(raw) = day.get(*object).and_then(|o| o.get(*member)) {
                push(*variable, parse_measurement(raw));
            }
        }
        if let Some(raw) = day.get("uvMax") {
            push("uv_max", parse_measurement(raw));
        }
        if let Some(periods) = day.get("probPrecipitacion").and_then(Value::as_array) {
            let whole_day = periods
                .iter()
                .find(|p| p.get("periodo").and_then(Value::as_str) == Some("00-24"))
                .or_else(|| periods.first());
            if let Some(period) = whole_day {
                push(
                    "precip_probability",
                    period.get("value").and_then(parse_measurement),
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap()
    }

    fn value_of(records: &[Record], variable: &str) -> Option<f64> {
        records
            .iter()
            .find(|r| r.variable == variable)
            .unwrap_or_else(|| panic!("no record for {variable}"))
            .value
    }

    #[test]
    fn test_trace_precipitation_is_small_constant() {
        assert_eq!(parse_measurement(&json!("Ip")), Some(TRACE_PRECIPITATION));
        assert_eq!(parse_measurement(&json!(" ip ")), Some(0.1));
    }

    #[test]
    fn test_decimal_comma_and_empty_values() {
        assert_eq!(parse_measurement(&json!("12,4")), Some(12.4));
        assert_eq!(parse_measurement(&json!("-0,5")), Some(-0.5));
        assert_eq!(parse_measurement(&json!("")), None);
        assert_eq!(parse_measurement(&json!("   ")), None);
        assert_eq!(parse_measurement(&json!("Acum")), None);
        assert_eq!(parse_measurement(&json!(null)), None);
        assert_eq!(parse_measurement(&json!(7)), Some(7.0));
        assert_eq!(parse_measurement(&json!("0,0")), Some(0.0));
    }

    #[test]
    fn test_daily_climatology_rows_map_to_canonical_names() {
        let payload = json!([
            {"fecha": "2024-01-01", "indicativo": "0076", "tmed": "10,2", "prec": "Ip", "sol": ""},
            {"fecha": "2024-01-02", "indicativo": "0076", "tmed": "9,8", "prec": "0,0"}
        ]);
        let records =
            decode_payload(DatasetKind::DailyClimatology, "0076", &payload, fetched_at()).unwrap();
        assert_eq!(records.len(), 5);
        let first_day: Vec<_> = records
            .iter()
            .filter(|r| r.timestamp.date() == NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .cloned()
            .collect();
        assert_eq!(value_of(&first_day, "temp_mean"), Some(10.2));
        assert_eq!(value_of(&first_day, "precipitation"), Some(TRACE_PRECIPITATION));
        assert_eq!(value_of(&first_day, "sunshine_hours"), None);
        assert!(records.iter().all(|r| r.entity_id == "0076"));
        assert!(records
            .iter()
            .all(|r| r.source_tag == crate::types::record::SourceTag::Climatology));
    }

    #[test]
    fn test_observation_timestamps_with_offset() {
        let payload = json!([{"idema": "0201D", "fint": "2024-01-01T10:00:00+0000", "ta": 11.5}]);
        let records =
            decode_payload(DatasetKind::Observation, "0201D", &payload, fetched_at()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].timestamp,
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_forecast_rows_carry_issue_time() {
        let payload = json!([{
            "elaborado": "2024-01-01T09:15:00",
            "id": 8019,
            "prediccion": {"dia": [
                {
                    "fecha": "2024-01-02T00:00:00",
                    "temperatura": {"maxima": 15, "minima": 7},
                    "probPrecipitacion": [
                        {"value": 40, "periodo": "00-12"},
                        {"value": 55, "periodo": "00-24"}
                    ]
                },
                {
                    "fecha": "2024-01-03T00:00:00",
                    "temperatura": {"maxima": 14, "minima": 6},
                    "probPrecipitacion": [{"value": 5}]
                }
            ]}
        }]);
        let records =
            decode_payload(DatasetKind::Forecast, "08019", &payload, fetched_at()).unwrap();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.entity_id == "08019"));
        assert!(records
            .iter()
            .all(|r| r.issued_at == Some(Utc.with_ymd_and_hms(2024, 1, 1, 9, 15, 0).unwrap())));
        assert_eq!(value_of(&records[..3], "precip_probability"), Some(55.0));
        assert_eq!(value_of(&records[3..], "precip_probability"), Some(5.0));
    }

    #[test]
    fn test_structural_failures() {
        assert!(matches!(
            decode_payload(DatasetKind::DailyClimatology, "x", &json!({"a": 1}), fetched_at()),
            Err(DecodeError::NotAnArray)
        ));
        assert!(matches!(
            decode_payload(DatasetKind::DailyClimatology, "x", &json!([1]), fetched_at()),
            Err(DecodeError::RowNotObject(0))
        ));
        assert!(matches!(
            decode_payload(
                DatasetKind::DailyClimatology,
                "x",
                &json!([{"fecha": "yesterday"}]),
                fetched_at()
            ),
            Err(DecodeError::BadTimestamp { .. })
        ));
    }
}
