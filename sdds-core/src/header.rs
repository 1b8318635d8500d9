//! Parsing of the SDDS text header.
//!
//! A header starts with an `SDDS<n>` version line followed by namelist
//! directives of the form `&keyword name=value, ... &end`. A directive may
//! span several lines and a line may hold several directives. The `&data`
//! directive closes the header; the data pages start on the next line.

use crate::decoder::DecodeError;
use crate::parser::{parse_value, take_quoted};
use crate::types::{
    ColumnDef, DataLayout, DataMode, DataType, Description, Endianness, ParameterDef, Schema,
};
use std::io::BufRead;
use std::ops::RangeInclusive;
use tracing::{debug, trace};

/// SDDS protocol versions this reader accepts.
const SUPPORTED_VERSIONS: RangeInclusive<u32> = 1..=5;

const PARAMETER_ATTRIBUTES: &[&str] = &[
    "name",
    "symbol",
    "units",
    "description",
    "format_string",
    "type",
    "fixed_value",
];
const COLUMN_ATTRIBUTES: &[&str] = &[
    "name",
    "symbol",
    "units",
    "description",
    "format_string",
    "type",
    "field_length",
];
const DESCRIPTION_ATTRIBUTES: &[&str] = &["text", "contents"];
const DATA_ATTRIBUTES: &[&str] = &[
    "mode",
    "lines_per_row",
    "no_row_counts",
    "additional_header_lines",
    "column_major_order",
];

/// A single namelist directive such as `&column name=x, type=double, &end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Lowercased keyword without the leading `&`
    pub keyword: String,
    /// Attributes in source order; names are lowercased
    pub attributes: Vec<(String, String)>,
}

impl Directive {
    /// Returns the value of the first attribute with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn get_owned(&self, name: &str) -> Option<String> {
        self.get(name).map(str::to_string)
    }
}

/// Parses the header of an SDDS stream.
///
/// On success the reader is positioned at the first byte of the data
/// section.
pub fn parse_header<R: BufRead>(reader: &mut R) -> Result<Schema, DecodeError> {
    read_header(reader).map(|(schema, _)| schema)
}

/// Parses the header and also returns the number of lines consumed.
pub(crate) fn read_header<R: BufRead>(reader: &mut R) -> Result<(Schema, usize), DecodeError> {
    let mut lines = LineReader::new(reader);

    let first = lines
        .next_line()?
        .ok_or_else(|| header_error(1, "missing SDDS version marker"))?;
    let version = parse_version(first.trim()).map_err(|msg| header_error(1, msg))?;

    let mut builder = SchemaBuilder::new(version);
    let mut pending = String::new();
    let mut pending_line = 0;
    let mut in_quote = false;

    loop {
        let Some(line) = lines.next_line()? else {
            if in_quote {
                return Err(header_error(pending_line, "unterminated quote in directive"));
            }
            let line = if pending.trim().is_empty() {
                lines.line
            } else {
                pending_line
            };
            return Err(header_error(
                line.max(1),
                "stream ended before the &data directive",
            ));
        };

        // Comment lines may sit between the lines of an open directive,
        // but not inside a quoted value
        if !in_quote {
            let trimmed = line.trim();
            if trimmed.is_empty() && pending.trim().is_empty() {
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix('!') {
                builder.apply_comment(comment);
                continue;
            }
        }
        if pending.trim().is_empty() {
            pending.clear();
            pending_line = lines.line;
        }
        pending.push_str(&line);
        pending.push('\n');

        loop {
            let rest = pending.trim_start();
            if rest.is_empty() {
                break;
            }

            let (directive, consumed) =
                match lex(rest).map_err(|msg| header_error(pending_line, msg))? {
                    Lexed::Complete(directive, consumed) => (directive, consumed),
                    Lexed::Incomplete { in_quote: open } => {
                        in_quote = open;
                        break;
                    }
                };
            in_quote = false;
            let remainder = rest[consumed..].to_string();

            if builder.apply(directive, pending_line)? {
                if builder.layout.mode == DataMode::Ascii {
                    for _ in 0..builder.layout.additional_header_lines {
                        if lines.next_line()?.is_none() {
                            break;
                        }
                    }
                }
                let schema = builder.finish();
                debug!(
                    version = schema.version,
                    parameters = schema.parameters.len(),
                    columns = schema.columns.len(),
                    mode = %schema.layout.mode,
                    "parsed SDDS header"
                );
                return Ok((schema, lines.line));
            }
            pending = remainder;
        }
    }
}

fn header_error(line: usize, message: impl Into<String>) -> DecodeError {
    DecodeError::HeaderParse {
        line,
        message: message.into(),
    }
}

fn parse_version(line: &str) -> Result<u32, String> {
    let digits = line
        .strip_prefix("SDDS")
        .ok_or_else(|| format!("missing SDDS version marker, found {:?}", line))?;
    let version: u32 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid SDDS version marker {:?}", line))?;

    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(format!("unsupported SDDS version {}", version));
    }
    Ok(version)
}

/// Reads header lines as text while counting them.
struct LineReader<'a, R> {
    reader: &'a mut R,
    buf: Vec<u8>,
    line: usize,
}

impl<'a, R: BufRead> LineReader<'a, R> {
    fn new(reader: &'a mut R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
        }
    }

    fn next_line(&mut self) -> Result<Option<String>, DecodeError> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;

        let text = std::str::from_utf8(&self.buf)
            .map_err(|_| header_error(self.line, "header line is not valid UTF-8"))?;
        Ok(Some(
            text.trim_end_matches(|c: char| c == '\n' || c == '\r').to_string(),
        ))
    }
}

/// Byte-offset cursor over directive text.
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.text[start..self.pos]
    }

    fn take_quoted(&mut self) -> Result<String, String> {
        let mut chars = self.rest().chars();
        let result = take_quoted(&mut chars);
        self.pos = self.text.len() - chars.as_str().len();
        result
    }
}

fn is_value_end(c: char) -> bool {
    c == ',' || c == '&' || c.is_whitespace()
}

/// Outcome of lexing the start of the pending header text.
enum Lexed {
    Complete(Directive, usize),
    /// The text ends before `&end`; `in_quote` is set inside a quoted value.
    Incomplete { in_quote: bool },
}

/// Lexes one directive from the start of `text`.
///
/// Returns the directive and the number of bytes consumed, or `None` when the
/// text ends before `&end`, including inside a quoted value.
pub fn lex_directive(text: &str) -> Result<Option<(Directive, usize)>, String> {
    Ok(match lex(text)? {
        Lexed::Complete(directive, consumed) => Some((directive, consumed)),
        Lexed::Incomplete { .. } => None,
    })
}

fn lex(text: &str) -> Result<Lexed, String> {
    let mut cur = Cursor::new(text);
    cur.take_while(char::is_whitespace);

    if cur.bump() != Some('&') {
        let word = cur.rest().split_whitespace().next().unwrap_or_default();
        return Err(format!("expected a directive, found {:?}", word));
    }

    let keyword = cur
        .take_while(|c| c.is_ascii_alphanumeric() || c == '_')
        .to_ascii_lowercase();
    if keyword.is_empty() {
        return Err("missing directive keyword after '&'".to_string());
    }
    if keyword == "end" {
        return Err("&end without an open directive".to_string());
    }

    let mut attributes = Vec::new();
    loop {
        cur.take_while(|c| c.is_whitespace() || c == ',');

        match cur.peek() {
            None => return Ok(Lexed::Incomplete { in_quote: false }),
            Some('&') => {
                cur.bump();
                let word = cur.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
                if !word.eq_ignore_ascii_case("end") {
                    return Err(format!("unexpected &{} inside &{}", word, keyword));
                }
                let directive = Directive {
                    keyword,
                    attributes,
                };
                return Ok(Lexed::Complete(directive, cur.pos));
            }
            Some(_) => {
                let name = cur
                    .take_while(|c| c != '=' && !is_value_end(c))
                    .to_ascii_lowercase();
                cur.take_while(char::is_whitespace);
                if cur.bump() != Some('=') {
                    return Err(format!("attribute {:?} is missing '='", name));
                }
                cur.take_while(char::is_whitespace);

                let value = if cur.peek() == Some('"') {
                    cur.bump();
                    match cur.take_quoted() {
                        Ok(value) => value,
                        // The closing quote may be on a later line
                        Err(_) => return Ok(Lexed::Incomplete { in_quote: true }),
                    }
                } else {
                    cur.take_while(|c| !is_value_end(c)).to_string()
                };
                attributes.push((name, value));
            }
        }
    }
}

/// Accumulates directives into a [`Schema`].
struct SchemaBuilder {
    version: u32,
    description: Option<Description>,
    parameters: Vec<ParameterDef>,
    columns: Vec<ColumnDef>,
    layout: DataLayout,
}

impl SchemaBuilder {
    fn new(version: u32) -> Self {
        Self {
            version,
            description: None,
            parameters: Vec::new(),
            columns: Vec::new(),
            layout: DataLayout::default(),
        }
    }

    fn finish(self) -> Schema {
        Schema {
            version: self.version,
            description: self.description,
            parameters: self.parameters,
            columns: self.columns,
            layout: self.layout,
        }
    }

    /// Handles `!` comment lines; `!# big-endian` selects the binary byte order.
    fn apply_comment(&mut self, comment: &str) {
        match comment.trim() {
            "# big-endian" => self.layout.endianness = Endianness::Big,
            "# little-endian" => self.layout.endianness = Endianness::Little,
            _ => {}
        }
    }

    /// Applies one directive. Returns true once `&data` closes the header.
    fn apply(&mut self, directive: Directive, line: usize) -> Result<bool, DecodeError> {
        let err = |msg: String| header_error(line, msg);

        match directive.keyword.as_str() {
            "description" => {
                warn_unknown(&directive, DESCRIPTION_ATTRIBUTES, line);
                self.description = Some(Description {
                    text: directive.get_owned("text"),
                    contents: directive.get_owned("contents"),
                });
            }
            "parameter" => {
                warn_unknown(&directive, PARAMETER_ATTRIBUTES, line);
                let parameter = parameter_def(&directive).map_err(err)?;
                if self.parameters.iter().any(|p| p.name == parameter.name) {
                    return Err(err(format!("duplicate parameter {:?}", parameter.name)));
                }
                self.parameters.push(parameter);
            }
            "column" => {
                warn_unknown(&directive, COLUMN_ATTRIBUTES, line);
                let column = column_def(&directive).map_err(err)?;
                if self.columns.iter().any(|c| c.name == column.name) {
                    return Err(err(format!("duplicate column {:?}", column.name)));
                }
                self.columns.push(column);
            }
            "associate" => {
                trace!(line, "ignoring &associate directive");
            }
            "data" => {
                warn_unknown(&directive, DATA_ATTRIBUTES, line);
                self.apply_data(&directive).map_err(err)?;
                return Ok(true);
            }
            "array" | "include" => {
                return Err(err(format!(
                    "&{} directives are not supported",
                    directive.keyword
                )));
            }
            other => {
                return Err(err(format!("unrecognized directive &{}", other)));
            }
        }

        Ok(false)
    }

    fn apply_data(&mut self, directive: &Directive) -> Result<(), String> {
        if let Some(mode) = directive.get("mode") {
            self.layout.mode = DataMode::from_name(mode)
                .ok_or_else(|| format!("unsupported data mode {:?}", mode))?;
        }
        if parse_int(directive, "no_row_counts")?.unwrap_or(0) != 0 {
            return Err("no_row_counts is not supported".to_string());
        }
        if let Some(lines) = parse_int(directive, "additional_header_lines")? {
            self.layout.additional_header_lines = usize::try_from(lines)
                .map_err(|_| format!("invalid additional_header_lines {}", lines))?;
        }
        self.layout.column_major = parse_int(directive, "column_major_order")?.unwrap_or(0) != 0;
        Ok(())
    }
}

/// Notes attributes this reader does not know; they are otherwise ignored.
fn warn_unknown(directive: &Directive, known: &[&str], line: usize) {
    for (name, _) in &directive.attributes {
        if !known.contains(&name.as_str()) {
            trace!(
                line,
                directive = %directive.keyword,
                attribute = %name,
                "ignoring unknown attribute"
            );
        }
    }
}

fn parse_int(directive: &Directive, name: &str) -> Result<Option<i64>, String> {
    directive
        .get(name)
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| format!("invalid integer {:?} for {}", v, name))
        })
        .transpose()
}

fn required_name(directive: &Directive) -> Result<String, String> {
    match directive.get("name") {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(format!("&{} is missing a name", directive.keyword)),
    }
}

fn required_type(directive: &Directive, name: &str) -> Result<DataType, String> {
    let type_name = directive
        .get("type")
        .ok_or_else(|| format!("{:?} is missing a type", name))?;
    DataType::from_name(type_name)
        .ok_or_else(|| format!("unsupported type {:?} for {:?}", type_name, name))
}

fn parameter_def(directive: &Directive) -> Result<ParameterDef, String> {
    let name = required_name(directive)?;
    let data_type = required_type(directive, &name)?;

    let fixed_value = directive
        .get("fixed_value")
        .map(|v| {
            parse_value(v, data_type)
                .map_err(|e| format!("invalid fixed_value for {:?}: {}", name, e))
        })
        .transpose()?;

    Ok(ParameterDef {
        units: directive.get_owned("units"),
        symbol: directive.get_owned("symbol"),
        description: directive.get_owned("description"),
        format_string: directive.get_owned("format_string"),
        fixed_value,
        ..ParameterDef::new(name, data_type)
    })
}

fn column_def(directive: &Directive) -> Result<ColumnDef, String> {
    let name = required_name(directive)?;
    let data_type = required_type(directive, &name)?;

    let field_length = match parse_int(directive, "field_length")? {
        Some(v) => i32::try_from(v).map_err(|_| format!("field_length {} out of range", v))?,
        None => 0,
    };

    Ok(ColumnDef {
        units: directive.get_owned("units"),
        symbol: directive.get_owned("symbol"),
        description: directive.get_owned("description"),
        format_string: directive.get_owned("format_string"),
        field_length,
        ..ColumnDef::new(name, data_type)
    })
}
