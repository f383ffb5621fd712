use thiserror::Error;

/// Domain errors raised inside the crate.
///
/// Collaborator seams and the pipeline wrap these in `anyhow` with context;
/// the typed variants exist so callers (and tests) can tell a bad config
/// from a malformed sheet row.
#[derive(Debug, Error)]
pub enum QuantError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("sheet '{sheet}': missing required field '{field}'")]
    MissingField { sheet: String, field: String },

    #[error("sheet '{sheet}': invalid value {value:?} for field '{field}'")]
    InvalidField {
        sheet: String,
        field: String,
        value: String,
    },

    #[error("sheet '{sheet}': row has {got} cells, header has {expected}")]
    RowShape {
        sheet: String,
        expected: usize,
        got: usize,
    },

    #[error("data source error: {0}")]
    Source(String),

    #[error("text generation error: {0}")]
    Generation(String),
}
