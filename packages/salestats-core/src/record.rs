//! Raw dataset row parsing and validation.

use serde::{Deserialize, Serialize};

/// Field delimiter of the raw dataset rows.
pub const FIELD_DELIMITER: char = ',';
/// First field of the dataset header row, compared case-insensitively.
pub const HEADER_TOKEN: &str = "Model";
/// Minimum field count for a raw row to be considered at all.
pub const MIN_RAW_FIELDS: usize = 11;
/// Classification literal marking a high-sales row, compared case-insensitively.
pub const HIGH_SALES_LITERAL: &str = "high";

const MODEL_FIELD: usize = 0;
const REGION_FIELD: usize = 2;
const PRICE_FIELD: usize = 8;
const VOLUME_FIELD: usize = 9;
const CLASSIFICATION_FIELD: usize = 10;

/// A validated, normalized sales row.
///
/// `model` and `region` are trimmed and lower-cased and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub model: String,
    pub region: String,
    pub price: i64,
    pub volume: i64,
    pub high_sales: bool,
}

/// Parses an integer field, falling back to 0 on any failure.
pub fn parse_count(field: &str) -> i64 {
    field.trim().parse().unwrap_or(0)
}

/// Parses one raw dataset line into a normalized record.
///
/// Returns `None` for empty lines, the header row, rows with fewer than
/// [`MIN_RAW_FIELDS`] fields, and rows whose model or region is empty
/// after trimming. Numeric fields fall back to 0 instead of rejecting
/// the row.
pub fn parse_sales_line(line: &str) -> Option<SalesRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    if fields.len() < MIN_RAW_FIELDS || fields[MODEL_FIELD].eq_ignore_ascii_case(HEADER_TOKEN) {
        return None;
    }

    let model = fields[MODEL_FIELD].trim().to_lowercase();
    let region = fields[REGION_FIELD].trim().to_lowercase();
    if model.is_empty() || region.is_empty() {
        return None;
    }

    Some(SalesRecord {
        price: parse_count(fields[PRICE_FIELD]),
        volume: parse_count(fields[VOLUME_FIELD]),
        high_sales: fields[CLASSIFICATION_FIELD]
            .trim()
            .eq_ignore_ascii_case(HIGH_SALES_LITERAL),
        model,
        region,
    })
}
