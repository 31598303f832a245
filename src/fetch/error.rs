use thiserror::Error;

/// A payload that does not have the expected structure.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Payload is not a JSON array")]
    NotAnArray,

    #[error("Row {0} is not a JSON object")]
    RowNotObject(usize),

    #[error("Row {row} is missing required field '{field}'")]
    MissingField { field: &'static str, row: usize },

    #[error("Row {row} has unparseable {field} '{value}'")]
    BadTimestamp {
        field: &'static str,
        row: usize,
        value: String,
    },
}
