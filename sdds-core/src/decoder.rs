//! SDDS page decoder.
//!
//! This module reads the header and then decodes ASCII or binary pages until
//! the stream is exhausted. The decoder holds only its configuration, so one
//! instance can serve any number of independent decode calls.

use crate::config::DecoderConfig;
use crate::header;
use crate::parser::{self, AsciiTokenizer, FieldError};
use crate::types::{ColumnData, DataMode, DataType, Dataset, Endianness, Page, Schema, Value};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, trace};

/// Upper bound on rows reserved ahead of a declared row count.
const MAX_PREALLOCATED_ROWS: usize = 1 << 16;

/// Field name used in errors about the row count itself.
const ROW_COUNT_FIELD: &str = "row count";

/// Position of a data error. Page and row are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLocation {
    pub page: usize,
    pub row: Option<usize>,
}

impl DataLocation {
    fn page(page: usize) -> Self {
        Self { page, row: None }
    }

    fn row(page: usize, row: usize) -> Self {
        Self {
            page,
            row: Some(row),
        }
    }
}

impl fmt::Display for DataLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "page {}, row {}", self.page, row),
            None => write!(f, "page {}", self.page),
        }
    }
}

/// Errors that can occur during SDDS decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Header parse error at line {line}: {message}")]
    HeaderParse { line: usize, message: String },

    #[error("Schema mismatch in page {page}: {message}")]
    SchemaMismatch { page: usize, message: String },

    #[error("Value conversion error at {location} for {name:?} ({data_type}): {message}")]
    ValueConversion {
        location: DataLocation,
        name: String,
        data_type: DataType,
        message: String,
    },

    #[error("Unknown column: {0}")]
    UnknownColumn(String),
}

fn mismatch(page: usize, message: impl Into<String>) -> DecodeError {
    DecodeError::SchemaMismatch {
        page,
        message: message.into(),
    }
}

fn conversion(
    location: DataLocation,
    name: &str,
    data_type: DataType,
    message: String,
) -> DecodeError {
    DecodeError::ValueConversion {
        location,
        name: name.to_string(),
        data_type,
        message,
    }
}

/// Maps a field read failure. Running out of data inside a page is a schema
/// mismatch; other I/O failures stay I/O errors.
fn field_error(
    err: FieldError,
    location: DataLocation,
    name: &str,
    data_type: DataType,
    truncated: impl FnOnce() -> String,
) -> DecodeError {
    match err {
        FieldError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            mismatch(location.page, truncated())
        }
        FieldError::Io(e) => DecodeError::Io(e),
        FieldError::Invalid(message) => conversion(location, name, data_type, message),
    }
}

fn row_count_from(raw: i64, page: usize) -> Result<usize, DecodeError> {
    usize::try_from(raw).map_err(|_| mismatch(page, format!("invalid row count {}", raw)))
}

fn empty_columns(schema: &Schema, row_count: usize) -> Vec<ColumnData> {
    let capacity = row_count.min(MAX_PREALLOCATED_ROWS);
    schema
        .columns
        .iter()
        .map(|c| ColumnData::with_capacity(c.data_type, capacity))
        .collect()
}

fn truncated_rows(declared: usize, row: usize, column: &str) -> String {
    format!(
        "declared {} rows but the data ended at row {} of column {:?}",
        declared,
        row + 1,
        column
    )
}

/// Stateless SDDS decoder.
///
/// ```no_run
/// use sdds_core::{DecoderConfig, SddsDecoder};
///
/// let decoder = SddsDecoder::with_config(DecoderConfig::new().with_max_pages(1));
/// let dataset = decoder.decode_file("status.sdds").unwrap();
/// println!("{} columns", dataset.columns().len());
/// ```
#[derive(Debug, Clone, Default)]
pub struct SddsDecoder {
    config: DecoderConfig,
}

impl SddsDecoder {
    /// Creates a decoder that keeps all columns and pages.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes an SDDS file from disk.
    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> Result<Dataset, DecodeError> {
        let file = File::open(path.as_ref())?;
        self.decode_reader(file)
    }

    /// Decodes an SDDS document held in memory.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<Dataset, DecodeError> {
        let mut reader = bytes;
        self.decode_buffered(&mut reader)
    }

    /// Decodes from any byte stream, buffering it internally.
    pub fn decode_reader<R: Read>(&self, reader: R) -> Result<Dataset, DecodeError> {
        let mut reader = BufReader::new(reader);
        self.decode_buffered(&mut reader)
    }

    /// Decodes from a buffered stream.
    ///
    /// The stream is consumed up to the end of the last decoded page.
    pub fn decode_buffered<R: BufRead>(&self, reader: &mut R) -> Result<Dataset, DecodeError> {
        let (schema, header_lines) = header::read_header(reader)?;
        let keep = self.column_mask(&schema)?;

        let mut pages = Vec::new();
        match (schema.layout.mode, schema.layout.endianness) {
            (DataMode::Ascii, _) => {
                let mut tokens = AsciiTokenizer::new(reader, header_lines);
                while !self.page_limit_reached(pages.len()) {
                    match decode_ascii_page(&schema, &mut tokens, pages.len() + 1)? {
                        Some(page) => pages.push(page),
                        None => break,
                    }
                }
            }
            (DataMode::Binary, Endianness::Little) => {
                self.decode_binary_pages::<_, LittleEndian>(&schema, reader, &mut pages)?
            }
            (DataMode::Binary, Endianness::Big) => {
                self.decode_binary_pages::<_, BigEndian>(&schema, reader, &mut pages)?
            }
        }

        let dataset = assemble(schema, keep.as_deref(), pages);
        debug!(
            pages = dataset.pages.len(),
            rows = dataset.total_rows(),
            "decoded SDDS dataset"
        );
        Ok(dataset)
    }

    fn decode_binary_pages<R: BufRead, B: ByteOrder>(
        &self,
        schema: &Schema,
        reader: &mut R,
        pages: &mut Vec<Page>,
    ) -> Result<(), DecodeError> {
        while !self.page_limit_reached(pages.len()) {
            match decode_binary_page::<R, B>(schema, reader, pages.len() + 1)? {
                Some(page) => pages.push(page),
                None => break,
            }
        }
        Ok(())
    }

    fn page_limit_reached(&self, decoded: usize) -> bool {
        self.config.max_pages.is_some_and(|max| decoded >= max)
    }

    /// Validates the column selection against the schema.
    fn column_mask(&self, schema: &Schema) -> Result<Option<Vec<bool>>, DecodeError> {
        let Some(selected) = &self.config.columns else {
            return Ok(None);
        };

        if let Some(unknown) = selected.iter().find(|n| schema.column_index(n).is_none()) {
            return Err(DecodeError::UnknownColumn(unknown.clone()));
        }

        Ok(Some(
            schema
                .columns
                .iter()
                .map(|c| self.config.keeps_column(&c.name))
                .collect(),
        ))
    }
}

/// Builds the final dataset, dropping unselected columns.
fn assemble(mut schema: Schema, keep: Option<&[bool]>, mut pages: Vec<Page>) -> Dataset {
    if let Some(keep) = keep {
        schema.columns = retain_mask(std::mem::take(&mut schema.columns), keep);
        for page in &mut pages {
            page.columns = retain_mask(std::mem::take(&mut page.columns), keep);
        }
    }

    let parameters: BTreeMap<String, Value> = match pages.first() {
        Some(page) => schema
            .parameters
            .iter()
            .zip(&page.parameters)
            .map(|(def, value)| (def.name.clone(), value.clone()))
            .collect(),
        None => schema
            .parameters
            .iter()
            .filter_map(|def| def.fixed_value.clone().map(|v| (def.name.clone(), v)))
            .collect(),
    };

    Dataset {
        schema,
        parameters,
        pages,
    }
}

fn retain_mask<T>(items: Vec<T>, keep: &[bool]) -> Vec<T> {
    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, &kept)| kept.then_some(item))
        .collect()
}

/// Visits every cell of a page in storage order.
fn fill_columns(
    columns: &mut [ColumnData],
    row_count: usize,
    column_major: bool,
    mut read_cell: impl FnMut(&mut ColumnData, usize, usize) -> Result<(), DecodeError>,
) -> Result<(), DecodeError> {
    // A row count without columns carries no cells
    if columns.is_empty() {
        return Ok(());
    }

    if column_major {
        for (index, column) in columns.iter_mut().enumerate() {
            for row in 0..row_count {
                read_cell(column, index, row)?;
            }
        }
    } else {
        for row in 0..row_count {
            for (index, column) in columns.iter_mut().enumerate() {
                read_cell(column, index, row)?;
            }
        }
    }
    Ok(())
}

/// Reads the next ASCII token for a field.
fn next_ascii_token<R: BufRead>(
    tokens: &mut AsciiTokenizer<R>,
    location: DataLocation,
    name: &str,
    data_type: DataType,
) -> Result<Option<String>, DecodeError> {
    tokens.next_token().map_err(|err| match err {
        FieldError::Io(e) => DecodeError::Io(e),
        FieldError::Invalid(message) => conversion(location, name, data_type, message),
    })
}

/// Decodes one ASCII page, or returns `None` at the end of the data.
fn decode_ascii_page<R: BufRead>(
    schema: &Schema,
    tokens: &mut AsciiTokenizer<R>,
    number: usize,
) -> Result<Option<Page>, DecodeError> {
    let location = DataLocation::page(number);
    let mut started = false;

    let mut parameters = Vec::with_capacity(schema.parameters.len());
    for def in &schema.parameters {
        if let Some(value) = &def.fixed_value {
            parameters.push(value.clone());
            continue;
        }

        let Some(token) = next_ascii_token(tokens, location, &def.name, def.data_type)? else {
            if !started {
                return Ok(None);
            }
            return Err(mismatch(
                number,
                format!("data ended before parameter {:?}", def.name),
            ));
        };
        started = true;

        let value = parser::parse_value(&token, def.data_type)
            .map_err(|message| conversion(location, &def.name, def.data_type, message))?;
        parameters.push(value);
    }

    // Pages without columns carry no row count.
    if schema.columns.is_empty() {
        if !started {
            return Ok(None);
        }
        trace!(page = number, "decoded ASCII page without columns");
        return Ok(Some(Page {
            row_count: 0,
            parameters,
            columns: Vec::new(),
        }));
    }

    let Some(token) = next_ascii_token(tokens, location, ROW_COUNT_FIELD, DataType::Long64)? else {
        if !started {
            return Ok(None);
        }
        return Err(mismatch(number, "data ended before the row count"));
    };
    let raw: i64 = token.parse().map_err(|_| {
        conversion(
            location,
            ROW_COUNT_FIELD,
            DataType::Long64,
            format!("invalid row count {:?}", token),
        )
    })?;
    let row_count = row_count_from(raw, number)?;

    let mut columns = empty_columns(schema, row_count);
    let read_cell =
        |column: &mut ColumnData, index: usize, row: usize| -> Result<(), DecodeError> {
            let def = &schema.columns[index];
            let location = DataLocation::row(number, row + 1);
            let token = next_ascii_token(tokens, location, &def.name, def.data_type)?
                .ok_or_else(|| mismatch(number, truncated_rows(row_count, row, &def.name)))?;
            parser::parse_into(column, &token)
                .map_err(|message| conversion(location, &def.name, def.data_type, message))
        };

    fill_columns(&mut columns, row_count, schema.layout.column_major, read_cell)?;

    trace!(page = number, rows = row_count, line = tokens.line(), "decoded ASCII page");
    Ok(Some(Page {
        row_count,
        parameters,
        columns,
    }))
}

/// Decodes one binary page, or returns `None` at the end of the stream.
///
/// A stream ending inside the row count is an I/O error; ending anywhere after
/// it is a schema mismatch.
fn decode_binary_page<R: BufRead, B: ByteOrder>(
    schema: &Schema,
    reader: &mut R,
    number: usize,
) -> Result<Option<Page>, DecodeError> {
    if reader.fill_buf()?.is_empty() {
        return Ok(None);
    }

    let row_count = row_count_from(i64::from(reader.read_i32::<B>()?), number)?;
    let location = DataLocation::page(number);

    let mut parameters = Vec::with_capacity(schema.parameters.len());
    for def in &schema.parameters {
        if let Some(value) = &def.fixed_value {
            parameters.push(value.clone());
            continue;
        }

        let value = parser::read_value::<R, B>(reader, def.data_type).map_err(|err| {
            field_error(err, location, &def.name, def.data_type, || {
                format!("data ended before parameter {:?}", def.name)
            })
        })?;
        parameters.push(value);
    }

    let mut columns = empty_columns(schema, row_count);
    let read_cell =
        |column: &mut ColumnData, index: usize, row: usize| -> Result<(), DecodeError> {
            let def = &schema.columns[index];
            parser::read_into::<R, B>(reader, column).map_err(|err| {
                field_error(
                    err,
                    DataLocation::row(number, row + 1),
                    &def.name,
                    def.data_type,
                    || truncated_rows(row_count, row, &def.name),
                )
            })
        };

    fill_columns(&mut columns, row_count, schema.layout.column_major, read_cell)?;

    trace!(page = number, rows = row_count, "decoded binary page");
    Ok(Some(Page {
        row_count,
        parameters,
        columns,
    }))
}

/// Decodes an SDDS document from a byte stream with the default configuration.
pub fn decode<R: Read>(source: R) -> Result<Dataset, DecodeError> {
    SddsDecoder::new().decode_reader(source)
}

/// Loads an SDDS file with the default configuration.
pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset, DecodeError> {
    SddsDecoder::new().decode_file(path)
}
