use chrono::DateTime;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;

use super::parser::{Parser, ParserError, ParserResult};
use crate::storage::data::{Point, Row};

const CSV_COLUMNS: [&str; 4] = ["source", "metric", "timestamp", "value"];

/// Parser for JSON input: one row object or an array of them
#[derive(Debug, Default)]
pub struct JsonParser;

#[derive(Deserialize)]
#[serde(untagged)]
enum JsonInput {
    One(Row),
    Many(Vec<Row>),
}

impl JsonParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for JsonParser {
    fn parse(&self, input: &[u8]) -> ParserResult<Vec<Row>> {
        let value: serde_json::Value = serde_json::from_slice(input)
            .map_err(|e| ParserError::InvalidFormat(e.to_string()))?;

        if !value.is_object() && !value.is_array() {
            return Err(ParserError::InvalidFormat(
                "Input must be a JSON object or array".to_string(),
            ));
        }
        if let Some(obj) = value.as_object() {
            for field in CSV_COLUMNS {
                if !obj.contains_key(field) {
                    return Err(ParserError::MissingField(field.to_string()));
                }
            }
        }

        let rows = match serde_json::from_value::<JsonInput>(value) {
            Ok(JsonInput::One(row)) => vec![row],
            Ok(JsonInput::Many(rows)) => rows,
            Err(e) => return Err(ParserError::InvalidFieldType(e.to_string())),
        };

        for row in &rows {
            row.validate()?;
        }
        Ok(rows)
    }

    fn supported_formats(&self) -> Vec<&'static str> {
        vec!["application/json", "json"]
    }
}

/// Parser for `source,metric,timestamp,value` records.
///
/// A header row is detected and skipped. Timestamps are integers or
/// RFC 3339 strings, the latter converted to nanoseconds.
#[derive(Debug, Default)]
pub struct CsvParser;

impl CsvParser {
    pub fn new() -> Self {
        Self
    }

    fn is_header(record: &StringRecord) -> bool {
        record.iter().eq(CSV_COLUMNS.iter().copied())
    }

    fn parse_timestamp(field: &str) -> ParserResult<i64> {
        if let Ok(ts) = field.parse::<i64>() {
            return Ok(ts);
        }

        DateTime::parse_from_rfc3339(field)
            .ok()
            .and_then(|dt| dt.timestamp_nanos_opt())
            .ok_or_else(|| ParserError::InvalidFieldType(format!("timestamp: {}", field)))
    }

    fn parse_record(record: &StringRecord) -> ParserResult<Row> {
        let field = |i: usize| {
            record
                .get(i)
                .filter(|f| !f.is_empty())
                .ok_or_else(|| ParserError::MissingField(CSV_COLUMNS[i].to_string()))
        };

        let timestamp = Self::parse_timestamp(field(2)?)?;
        let raw_value = field(3)?;
        let value = raw_value
            .parse::<f64>()
            .map_err(|_| ParserError::InvalidFieldType(format!("value: {}", raw_value)))?;

        let row = Row::new(field(0)?, field(1)?, Point::new(timestamp, value));
        row.validate()?;
        Ok(row)
    }
}

impl Parser for CsvParser {
    fn parse(&self, input: &[u8]) -> ParserResult<Vec<Row>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .trim(Trim::All)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(input);

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record.map_err(|e| ParserError::InvalidFormat(e.to_string()))?;
            if i == 0 && Self::is_header(&record) {
                continue;
            }
            if record.len() != CSV_COLUMNS.len() {
                return Err(ParserError::InvalidFormat(format!(
                    "expected {} fields, found {}",
                    CSV_COLUMNS.len(),
                    record.len()
                )));
            }
            rows.push(Self::parse_record(&record)?);
        }

        Ok(rows)
    }

    fn supported_formats(&self) -> Vec<&'static str> {
        vec!["text/csv", "csv"]
    }
}
