//! Ingestion module for Tessera
//! Turns raw payloads into rows for the write path.

pub mod formats;
pub mod parser;

pub use formats::{CsvParser, JsonParser};
pub use parser::{Parser, ParserError, ParserResult};
