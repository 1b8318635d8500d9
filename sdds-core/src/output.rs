//! Output format writers for decoded SDDS data.
//!
//! Supports re-encoding a dataset as ASCII or binary SDDS and exporting a
//! single page as CSV.

use crate::types::{ColumnData, ColumnDef, DataMode, Dataset, Endianness, Page, Schema, Value};
use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl std::str::FromStr for DataMode {
    type Err = OutputError;

    /// Parses a data mode name such as "ascii" or "binary".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataMode::from_name(s.trim()).ok_or_else(|| {
            OutputError::InvalidFormat(format!("Unknown data mode: {}. Use ascii or binary", s))
        })
    }
}

/// Quotes a header attribute value when the namelist lexer would split it.
fn quote_attribute(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, ',' | '&' | '"' | '\\'));
    if plain {
        value.to_string()
    } else {
        quote(value)
    }
}

fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Formats a value as one ASCII data token.
fn format_token(value: &Value) -> Result<String, OutputError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Character(c) => c.to_string(),
        other => return Ok(other.to_string()),
    };

    if text.contains(&['\n', '\r'][..]) {
        return Err(OutputError::InvalidValue(format!(
            "line break in ASCII value {:?}",
            text
        )));
    }

    let needs_quotes = text.is_empty()
        || text.starts_with(&['"', '!'][..])
        || text.chars().any(char::is_whitespace);
    Ok(if needs_quotes { quote(&text) } else { text })
}

/// Writes one binary value in byte order `B`.
fn write_value<W: Write, B: ByteOrder>(writer: &mut W, value: &Value) -> Result<(), OutputError> {
    match value {
        Value::Long(v) => writer.write_i32::<B>(*v)?,
        Value::Long64(v) => writer.write_i64::<B>(*v)?,
        Value::Float(v) => writer.write_f32::<B>(*v)?,
        Value::Double(v) => writer.write_f64::<B>(*v)?,
        Value::Character(c) => writer.write_u8(latin1(*c)?)?,
        Value::String(s) => {
            let len = i32::try_from(s.len())
                .map_err(|_| OutputError::InvalidValue("string too long".to_string()))?;
            writer.write_i32::<B>(len)?;
            writer.write_all(s.as_bytes())?;
        }
    }
    Ok(())
}

fn latin1(c: char) -> Result<u8, OutputError> {
    u8::try_from(u32::from(c))
        .map_err(|_| OutputError::InvalidValue(format!("character {:?} is not Latin-1", c)))
}

/// Checks that a page matches the schema before it is written.
fn validate_page(schema: &Schema, page: &Page) -> Result<(), OutputError> {
    if page.parameters.len() != schema.parameters.len() {
        return Err(OutputError::InvalidFormat(format!(
            "page has {} parameters, schema declares {}",
            page.parameters.len(),
            schema.parameters.len()
        )));
    }
    for (def, value) in schema.parameters.iter().zip(&page.parameters) {
        if value.data_type() != def.data_type {
            return Err(OutputError::InvalidValue(format!(
                "parameter {:?} is {} but holds a {} value",
                def.name,
                def.data_type,
                value.data_type()
            )));
        }
    }

    if page.columns.len() != schema.columns.len() {
        return Err(OutputError::InvalidFormat(format!(
            "page has {} columns, schema declares {}",
            page.columns.len(),
            schema.columns.len()
        )));
    }
    for (def, column) in schema.columns.iter().zip(&page.columns) {
        if column.data_type() != def.data_type {
            return Err(OutputError::InvalidValue(format!(
                "column {:?} is {} but holds {} data",
                def.name,
                def.data_type,
                column.data_type()
            )));
        }
        if column.len() != page.row_count {
            return Err(OutputError::InvalidFormat(format!(
                "column {:?} has {} values for {} rows",
                def.name,
                column.len(),
                page.row_count
            )));
        }
    }
    Ok(())
}

/// Visits every cell of a page in the order the layout stores them.
fn for_each_cell(
    columns: &[ColumnData],
    row_count: usize,
    column_major: bool,
    mut visit: impl FnMut(usize, Value) -> Result<(), OutputError>,
) -> Result<(), OutputError> {
    let mut cell = |column: &ColumnData, index: usize, row: usize| match column.get(row) {
        Some(value) => visit(index, value),
        None => Err(OutputError::InvalidFormat(format!(
            "column {} has no row {}",
            index, row
        ))),
    };

    if column_major {
        for (index, column) in columns.iter().enumerate() {
            for row in 0..row_count {
                cell(column, index, row)?;
            }
        }
    } else {
        for row in 0..row_count {
            for (index, column) in columns.iter().enumerate() {
                cell(column, index, row)?;
            }
        }
    }
    Ok(())
}

/// SDDS writer producing ASCII or binary documents.
///
/// Row-major or column-major storage follows the schema being written.
pub struct SddsWriter<W: Write> {
    writer: BufWriter<W>,
    mode: DataMode,
    endianness: Endianness,
}

impl<W: Write> SddsWriter<W> {
    /// Creates a new SDDS writer for the given data mode.
    pub fn new(writer: W, mode: DataMode) -> Self {
        Self {
            writer: BufWriter::new(writer),
            mode,
            endianness: Endianness::Little,
        }
    }

    /// Sets the byte order used for binary pages.
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    /// Writes the header and every page of a dataset.
    pub fn write_dataset(&mut self, dataset: &Dataset) -> Result<(), OutputError> {
        self.write_header(&dataset.schema)?;
        for page in &dataset.pages {
            self.write_page(&dataset.schema, page)?;
        }
        Ok(())
    }

    /// Writes the text header, ending with the `&data` directive.
    pub fn write_header(&mut self, schema: &Schema) -> Result<(), OutputError> {
        writeln!(self.writer, "SDDS{}", schema.version)?;
        if self.mode == DataMode::Binary {
            let order = match self.endianness {
                Endianness::Little => "little-endian",
                Endianness::Big => "big-endian",
            };
            writeln!(self.writer, "!# {}", order)?;
        }

        if let Some(description) = &schema.description {
            let attributes = [
                ("text", description.text.clone()),
                ("contents", description.contents.clone()),
            ];
            self.write_directive("description", &attributes)?;
        }

        for def in &schema.parameters {
            let attributes = [
                ("name", Some(def.name.clone())),
                ("symbol", def.symbol.clone()),
                ("units", def.units.clone()),
                ("description", def.description.clone()),
                ("format_string", def.format_string.clone()),
                ("type", Some(def.data_type.name().to_string())),
                ("fixed_value", def.fixed_value.as_ref().map(Value::to_string)),
            ];
            self.write_directive("parameter", &attributes)?;
        }

        for def in &schema.columns {
            let attributes = [
                ("name", Some(def.name.clone())),
                ("symbol", def.symbol.clone()),
                ("units", def.units.clone()),
                ("description", def.description.clone()),
                ("format_string", def.format_string.clone()),
                ("type", Some(def.data_type.name().to_string())),
                (
                    "field_length",
                    (def.field_length != 0).then(|| def.field_length.to_string()),
                ),
            ];
            self.write_directive("column", &attributes)?;
        }

        let attributes = [
            ("mode", Some(self.mode.name().to_string())),
            (
                "column_major_order",
                schema.layout.column_major.then(|| "1".to_string()),
            ),
        ];
        self.write_directive("data", &attributes)?;
        Ok(())
    }

    fn write_directive(
        &mut self,
        keyword: &str,
        attributes: &[(&str, Option<String>)],
    ) -> Result<(), OutputError> {
        write!(self.writer, "&{}", keyword)?;
        for (name, value) in attributes {
            if let Some(value) = value {
                write!(self.writer, " {}={},", name, quote_attribute(value))?;
            }
        }
        writeln!(self.writer, " &end")?;
        Ok(())
    }

    /// Writes one page in the writer's data mode.
    pub fn write_page(&mut self, schema: &Schema, page: &Page) -> Result<(), OutputError> {
        validate_page(schema, page)?;
        match (self.mode, self.endianness) {
            (DataMode::Ascii, _) => self.write_ascii_page(schema, page),
            (DataMode::Binary, Endianness::Little) => {
                self.write_binary_page::<LittleEndian>(schema, page)
            }
            (DataMode::Binary, Endianness::Big) => self.write_binary_page::<BigEndian>(schema, page),
        }
    }

    fn write_ascii_page(&mut self, schema: &Schema, page: &Page) -> Result<(), OutputError> {
        // Such a page would be written as no text at all
        if schema.columns.is_empty() && schema.parameters.iter().all(|p| p.fixed_value.is_some())
        {
            return Err(OutputError::InvalidFormat(
                "ASCII pages need a column or a non-fixed parameter; use binary mode".to_string(),
            ));
        }

        for (def, value) in schema.parameters.iter().zip(&page.parameters) {
            if def.fixed_value.is_none() {
                writeln!(self.writer, "{}", format_token(value)?)?;
            }
        }

        if schema.columns.is_empty() {
            return Ok(());
        }
        writeln!(self.writer, "{}", page.row_count)?;

        // One line per row, or one line per column when column-major
        let per_line = if schema.layout.column_major {
            page.row_count
        } else {
            page.columns.len()
        };
        let writer = &mut self.writer;
        let mut in_line = 0;
        for_each_cell(
            &page.columns,
            page.row_count,
            schema.layout.column_major,
            |_, value| {
                if in_line > 0 {
                    writer.write_all(b" ")?;
                }
                writer.write_all(format_token(&value)?.as_bytes())?;
                in_line += 1;
                if in_line == per_line {
                    writer.write_all(b"\n")?;
                    in_line = 0;
                }
                Ok(())
            },
        )
    }

    fn write_binary_page<B: ByteOrder>(
        &mut self,
        schema: &Schema,
        page: &Page,
    ) -> Result<(), OutputError> {
        let row_count = i32::try_from(page.row_count).map_err(|_| {
            OutputError::InvalidValue(format!("row count {} exceeds i32", page.row_count))
        })?;
        self.writer.write_i32::<B>(row_count)?;

        for (def, value) in schema.parameters.iter().zip(&page.parameters) {
            if def.fixed_value.is_none() {
                write_value::<_, B>(&mut self.writer, value)?;
            }
        }

        let writer = &mut self.writer;
        for_each_cell(
            &page.columns,
            page.row_count,
            schema.layout.column_major,
            |_, value| write_value::<_, B>(writer, &value),
        )
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer for one page of column data.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> CsvWriter<W> {
    /// Creates a new CSV writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    /// Writes the column names as the CSV header row.
    pub fn write_header(&mut self, columns: &[ColumnDef]) -> Result<(), OutputError> {
        let names: Vec<String> = columns.iter().map(|c| csv_field(&c.name)).collect();
        writeln!(self.writer, "{}", names.join(","))?;
        Ok(())
    }

    /// Writes every row of a page.
    pub fn write_rows(&mut self, page: &Page) -> Result<(), OutputError> {
        for row in 0..page.row_count {
            let values = page.row(row).ok_or_else(|| {
                OutputError::InvalidFormat(format!("page has no complete row {}", row))
            })?;
            let fields: Vec<String> = values.iter().map(|v| csv_field(&v.to_string())).collect();
            writeln!(self.writer, "{}", fields.join(","))?;
        }
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn csv_field(text: &str) -> String {
    if text.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Writes a dataset to an SDDS file in the given data mode.
pub fn write_sdds<P: AsRef<Path>>(
    path: P,
    dataset: &Dataset,
    mode: DataMode,
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = SddsWriter::new(file, mode);
    writer.write_dataset(dataset)?;
    writer.flush()?;
    Ok(())
}

/// Writes one page (0-based index) of a dataset to a CSV file.
pub fn write_csv<P: AsRef<Path>>(
    path: P,
    dataset: &Dataset,
    page_index: usize,
) -> Result<(), OutputError> {
    let page = dataset.pages.get(page_index).ok_or_else(|| {
        OutputError::InvalidFormat(format!(
            "page {} out of range, dataset has {} pages",
            page_index + 1,
            dataset.pages.len()
        ))
    })?;

    let file = File::create(path)?;
    let mut writer = CsvWriter::new(file);
    writer.write_header(dataset.columns())?;
    writer.write_rows(page)?;
    writer.flush()?;
    Ok(())
}
