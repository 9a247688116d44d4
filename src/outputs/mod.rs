//! Output writers for a finished [`crate::aggregate::ResultTable`].
//!
//! # Submodules
//!
//! - [`spreadsheet`]: SpreadsheetML workbook, one worksheet per query
//! - [`json`]: the same results as JSON, enabled with `output.json`

pub mod json;
pub mod spreadsheet;
