//! Core types for decoded SDDS data.
//!
//! This module defines the schema declared by an SDDS header, the closed set
//! of scalar value types, and the decoded [`Dataset`] with its pages.

use crate::decoder::DecodeError;
use std::collections::BTreeMap;
use std::fmt;

/// Element type of a parameter or column.
///
/// SDDS headers name these types with the `type=` attribute of a
/// `&parameter` or `&column` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// 32-bit signed integer (`long`)
    Long,
    /// 64-bit signed integer (`long64`)
    Long64,
    /// 32-bit IEEE float (`float`)
    Float,
    /// 64-bit IEEE float (`double`)
    Double,
    /// Variable-length text (`string`)
    String,
    /// Single character (`character`)
    Character,
}

impl DataType {
    /// Parses a type from its header name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "long" => Some(Self::Long),
            "long64" => Some(Self::Long64),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "string" => Some(Self::String),
            "character" => Some(Self::Character),
            _ => None,
        }
    }

    /// Returns the name used for this type in SDDS headers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Long64 => "long64",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Character => "character",
        }
    }

    /// Width of one encoded value in binary mode, `None` for strings.
    #[inline]
    pub fn binary_width(&self) -> Option<usize> {
        match self {
            Self::Long | Self::Float => Some(4),
            Self::Long64 | Self::Double => Some(8),
            Self::Character => Some(1),
            Self::String => None,
        }
    }

    /// Returns true for the integer and floating point types.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::String | Self::Character)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// A single typed scalar value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Long(i32),
    Long64(i64),
    Float(f32),
    Double(f64),
    String(String),
    Character(char),
}

impl Value {
    /// Returns the type tag of this value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Long(_) => DataType::Long,
            Self::Long64(_) => DataType::Long64,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::String(_) => DataType::String,
            Self::Character(_) => DataType::Character,
        }
    }

    /// Widens a numeric value to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Long(v) => Some(v as f64),
            Self::Long64(v) => Some(v as f64),
            Self::Float(v) => Some(v as f64),
            Self::Double(v) => Some(v),
            Self::String(_) | Self::Character(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long(v) => write!(f, "{}", v),
            Self::Long64(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
            Self::Character(v) => write!(f, "{}", v),
        }
    }
}

/// Values of one column within one page, stored as a typed vector.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Long(Vec<i32>),
    Long64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    String(Vec<String>),
    Character(Vec<char>),
}

impl ColumnData {
    /// Creates an empty column of the given type.
    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::Long => Self::Long(Vec::with_capacity(capacity)),
            DataType::Long64 => Self::Long64(Vec::with_capacity(capacity)),
            DataType::Float => Self::Float(Vec::with_capacity(capacity)),
            DataType::Double => Self::Double(Vec::with_capacity(capacity)),
            DataType::String => Self::String(Vec::with_capacity(capacity)),
            DataType::Character => Self::Character(Vec::with_capacity(capacity)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::Long(_) => DataType::Long,
            Self::Long64(_) => DataType::Long64,
            Self::Float(_) => DataType::Float,
            Self::Double(_) => DataType::Double,
            Self::String(_) => DataType::String,
            Self::Character(_) => DataType::Character,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Long(v) => v.len(),
            Self::Long64(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Double(v) => v.len(),
            Self::String(v) => v.len(),
            Self::Character(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the value at `index` as a [`Value`].
    pub fn get(&self, index: usize) -> Option<Value> {
        match self {
            Self::Long(v) => v.get(index).map(|&x| Value::Long(x)),
            Self::Long64(v) => v.get(index).map(|&x| Value::Long64(x)),
            Self::Float(v) => v.get(index).map(|&x| Value::Float(x)),
            Self::Double(v) => v.get(index).map(|&x| Value::Double(x)),
            Self::String(v) => v.get(index).map(|x| Value::String(x.clone())),
            Self::Character(v) => v.get(index).map(|&x| Value::Character(x)),
        }
    }

    /// Appends a value, handing it back if its type does not match the column.
    pub fn push(&mut self, value: Value) -> Result<(), Value> {
        match (self, value) {
            (Self::Long(v), Value::Long(x)) => v.push(x),
            (Self::Long64(v), Value::Long64(x)) => v.push(x),
            (Self::Float(v), Value::Float(x)) => v.push(x),
            (Self::Double(v), Value::Double(x)) => v.push(x),
            (Self::String(v), Value::String(x)) => v.push(x),
            (Self::Character(v), Value::Character(x)) => v.push(x),
            (_, other) => return Err(other),
        }
        Ok(())
    }

    /// Widens a numeric column to `f64` values, e.g. for plotting.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::Long(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Long64(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Float(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Self::Double(v) => Some(v.clone()),
            Self::String(_) | Self::Character(_) => None,
        }
    }
}

/// Encoding of the data pages that follow the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataMode {
    #[default]
    Ascii,
    Binary,
}

impl DataMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ascii" => Some(Self::Ascii),
            "binary" => Some(Self::Binary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Binary => "binary",
        }
    }
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Byte order of binary pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Little,
    Big,
}

/// Layout of the data section, taken from the `&data` directive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataLayout {
    pub mode: DataMode,
    pub endianness: Endianness,
    /// Column values are stored column by column instead of row by row
    pub column_major: bool,
    /// ASCII lines to skip between the header and the first page
    pub additional_header_lines: usize,
}

/// Free-form dataset description from the `&description` directive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Description {
    pub text: Option<String>,
    pub contents: Option<String>,
}

/// A `&parameter` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    pub data_type: DataType,
    pub units: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub format_string: Option<String>,
    /// Value given in the header; fixed parameters are absent from page data
    pub fixed_value: Option<Value>,
}

impl ParameterDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            units: None,
            symbol: None,
            description: None,
            format_string: None,
            fixed_value: None,
        }
    }
}

/// A `&column` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub units: Option<String>,
    pub symbol: Option<String>,
    pub description: Option<String>,
    pub format_string: Option<String>,
    pub field_length: i32,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            units: None,
            symbol: None,
            description: None,
            format_string: None,
            field_length: 0,
        }
    }
}

/// The frozen header of an SDDS file.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Version number from the `SDDS<n>` marker
    pub version: u32,
    pub description: Option<Description>,
    pub parameters: Vec<ParameterDef>,
    pub columns: Vec<ColumnDef>,
    pub layout: DataLayout,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            version: 1,
            description: None,
            parameters: Vec::new(),
            columns: Vec::new(),
            layout: DataLayout::default(),
        }
    }
}

impl Schema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }
}

/// One page of data: parameter values and equal-length columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub row_count: usize,
    /// Parameter values in declaration order, fixed values included
    pub parameters: Vec<Value>,
    /// Column values in declaration order
    pub columns: Vec<ColumnData>,
}

impl Page {
    pub fn column(&self, index: usize) -> Option<&ColumnData> {
        self.columns.get(index)
    }

    /// Collects one row across all columns.
    pub fn row(&self, index: usize) -> Option<Vec<Value>> {
        if index >= self.row_count {
            return None;
        }
        self.columns.iter().map(|c| c.get(index)).collect()
    }
}

/// Result of decoding an SDDS file.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub schema: Schema,
    /// Parameter values of the first page, or fixed values when there are no pages
    pub parameters: BTreeMap<String, Value>,
    pub pages: Vec<Page>,
}

impl Dataset {
    pub fn columns(&self) -> &[ColumnDef] {
        &self.schema.columns
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Resolves a column name to its declaration index.
    pub fn column_index(&self, name: &str) -> Result<usize, DecodeError> {
        self.schema
            .column_index(name)
            .ok_or_else(|| DecodeError::UnknownColumn(name.to_string()))
    }

    /// Returns the named column's data from every page, in page order.
    pub fn column_pages(&self, name: &str) -> Result<Vec<&ColumnData>, DecodeError> {
        let index = self.column_index(name)?;
        Ok(self.pages.iter().map(|p| &p.columns[index]).collect())
    }

    /// Total number of rows across all pages.
    pub fn total_rows(&self) -> usize {
        self.pages.iter().map(|p| p.row_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_parsing() {
        assert_eq!(DataType::from_name("long"), Some(DataType::Long));
        assert_eq!(DataType::from_name("DOUBLE"), Some(DataType::Double));
        assert_eq!(DataType::from_name("character"), Some(DataType::Character));
        assert_eq!(DataType::from_name("short"), None);
        assert_eq!(DataType::from_name("longdouble"), None);
    }

    #[test]
    fn test_column_data_push_checks_type() {
        let mut column = ColumnData::with_capacity(DataType::Double, 2);
        assert!(column.push(Value::Double(1.5)).is_ok());
        assert_eq!(column.push(Value::Long(3)), Err(Value::Long(3)));
        assert_eq!(column.len(), 1);
        assert_eq!(column.get(0), Some(Value::Double(1.5)));
        assert_eq!(column.get(1), None);
    }

    #[test]
    fn test_page_row() {
        let page = Page {
            row_count: 2,
            parameters: Vec::new(),
            columns: vec![
                ColumnData::Long(vec![1, 2]),
                ColumnData::String(vec!["a".into(), "b".into()]),
            ],
        };
        assert_eq!(
            page.row(1),
            Some(vec![Value::Long(2), Value::String("b".into())])
        );
        assert_eq!(page.row(2), None);
    }

    #[test]
    fn test_unknown_column_lookup() {
        let dataset = Dataset {
            schema: Schema {
                columns: vec![ColumnDef::new("X", DataType::Double)],
                ..Schema::default()
            },
            parameters: BTreeMap::new(),
            pages: Vec::new(),
        };
        assert_eq!(dataset.column_index("X").unwrap(), 0);
        assert!(matches!(
            dataset.column_pages("Y"),
            Err(DecodeError::UnknownColumn(name)) if name == "Y"
        ));
    }
}
