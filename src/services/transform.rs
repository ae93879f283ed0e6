use thiserror::Error;

/// Cell values treated as missing, matching common dataframe defaults
pub const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Input is empty: no header row")]
    Empty,

    #[error("Malformed CSV at line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Turns raw file bytes into the bytes that get staged and uploaded
pub trait Transform: Send + Sync {
    fn apply(&self, raw: &[u8]) -> Result<Vec<u8>, TransformError>;
}

/// Drops every data row with a missing cell. The header is kept as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct DropIncompleteRows;

impl Transform for DropIncompleteRows {
    fn apply(&self, raw: &[u8]) -> Result<Vec<u8>, TransformError> {
        drop_incomplete_rows(raw)
    }
}

fn is_missing(field: &str) -> bool {
    MISSING_MARKERS.contains(&field.trim())
}

pub fn drop_incomplete_rows(raw: &[u8]) -> Result<Vec<u8>, TransformError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(raw);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(TransformError::Empty);
    }
    let width = headers.len();

    let mut writer = csv::WriterBuilder::new().from_writer(Vec::with_capacity(raw.len()));
    writer.write_record(&headers)?;

    for result in reader.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        if record.len() > width {
            return Err(TransformError::Malformed {
                line,
                reason: format!("expected {} fields, saw {}", width, record.len()),
            });
        }

        // Short rows are padded with missing cells, so they are dropped too
        if record.len() < width || record.iter().any(is_missing) {
            continue;
        }

        writer.write_record(&record)?;
    }

    writer
        .into_inner()
        .map_err(|e| TransformError::Malformed {
            line: 0,
            reason: e.error().to_string(),
        })
}
