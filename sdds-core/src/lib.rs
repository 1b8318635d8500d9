//! SDDS (Self Describing Data Set) reader library.
//!
//! This crate decodes SDDS files: a text header declaring typed parameters and
//! columns, followed by zero or more data pages stored as ASCII tokens or
//! fixed-width binary values.
//!
//! # Example
//!
//! ```no_run
//! use sdds_core::load_dataset;
//!
//! let dataset = load_dataset("beam_status.sdds").unwrap();
//!
//! for (name, value) in &dataset.parameters {
//!     println!("{} = {}", name, value);
//! }
//! for column in dataset.columns() {
//!     println!("column {} ({})", column.name, column.data_type);
//! }
//! println!("{} pages, {} rows", dataset.pages.len(), dataset.total_rows());
//! ```
//!
//! # Features
//!
//! - `long`, `long64`, `float`, `double`, `string` and `character` values
//! - ASCII and binary pages, row-major or column-major, either byte order
//! - Fixed-value parameters and column selection
//! - Writers for ASCII/binary SDDS and CSV export

pub mod config;
pub mod decoder;
pub mod header;
pub mod output;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use config::DecoderConfig;
pub use decoder::{decode, load_dataset, DataLocation, DecodeError, SddsDecoder};
pub use header::parse_header;
pub use output::{CsvWriter, OutputError, SddsWriter};
pub use types::{
    ColumnData, ColumnDef, DataMode, DataType, Dataset, Endianness, Page, ParameterDef, Schema,
    Value,
};
