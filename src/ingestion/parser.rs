use thiserror::Error;

use crate::storage::data::{DataError, Row};

/// Errors that can occur during parsing
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Invalid input format: {0}")]
    InvalidFormat(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid field type: {0}")]
    InvalidFieldType(String),
    #[error("Data validation error: {0}")]
    ValidationError(#[from] DataError),
}

/// Result type for parser operations
pub type ParserResult<T> = Result<T, ParserError>;

/// Trait for parsing input data into Rows
pub trait Parser: Send + Sync {
    /// Parses a single input into a vector of Rows
    fn parse(&self, input: &[u8]) -> ParserResult<Vec<Row>>;

    /// Returns the supported input formats
    fn supported_formats(&self) -> Vec<&'static str>;
}

