//! Low-level parsing of SDDS data fields.
//!
//! This module splits ASCII data lines into tokens, converts tokens to typed
//! values, and reads fixed-width binary fields in either byte order.

use crate::types::{ColumnData, DataType, Value};
use byteorder::{ByteOrder, ReadBytesExt};
use std::collections::VecDeque;
use std::io::{self, BufRead, Read};

/// Upper bound on bytes reserved ahead of a declared string length.
const MAX_PREALLOCATED_BYTES: usize = 1 << 16;

/// Error raised while reading a single field.
#[derive(Debug)]
pub enum FieldError {
    /// The underlying reader failed or ran out of data
    Io(io::Error),
    /// The field was read but is not valid for its declared type
    Invalid(String),
}

impl From<io::Error> for FieldError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Reads the rest of a quoted string whose opening quote was already consumed.
///
/// Handles `\"` and `\\` escapes. Returns `Err` with the collected text when
/// the input ends before the closing quote.
pub(crate) fn take_quoted<I: Iterator<Item = char>>(chars: &mut I) -> Result<String, String> {
    let mut text = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(text),
            '\\' => match chars.next() {
                Some(escaped @ ('"' | '\\')) => text.push(escaped),
                Some(other) => {
                    text.push('\\');
                    text.push(other);
                }
                None => text.push('\\'),
            },
            _ => text.push(c),
        }
    }
    Err(text)
}

/// Splits one ASCII data line into whitespace-separated tokens.
///
/// A token starting with `"` extends to the matching closing quote and may
/// contain whitespace. An unterminated quote yields `Err` with a description.
pub fn split_tokens(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(&first) = chars.peek() else {
            break;
        };

        if first == '"' {
            chars.next();
            let token = take_quoted(&mut chars)
                .map_err(|partial| format!("unterminated quote in \"{}", partial))?;
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                token.push(c);
            }
            tokens.push(token);
        }
    }

    Ok(tokens)
}

/// Converts an ASCII token to a value of the declared type.
///
/// Numeric tokens must parse exactly; `"2.5"` is not a valid `long`.
pub fn parse_value(token: &str, data_type: DataType) -> Result<Value, String> {
    let invalid = || format!("invalid {} value {:?}", data_type, token);

    match data_type {
        DataType::Long => token.parse().map(Value::Long).map_err(|_| invalid()),
        DataType::Long64 => token.parse().map(Value::Long64).map_err(|_| invalid()),
        DataType::Float => token.parse().map(Value::Float).map_err(|_| invalid()),
        DataType::Double => token.parse().map(Value::Double).map_err(|_| invalid()),
        DataType::String => Ok(Value::String(token.to_string())),
        DataType::Character => {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Character(c)),
                _ => Err(invalid()),
            }
        }
    }
}

/// Converts an ASCII token and appends it to a typed column.
pub fn parse_into(column: &mut ColumnData, token: &str) -> Result<(), String> {
    let data_type = column.data_type();
    let invalid = || format!("invalid {} value {:?}", data_type, token);

    match column {
        ColumnData::Long(v) => v.push(token.parse().map_err(|_| invalid())?),
        ColumnData::Long64(v) => v.push(token.parse().map_err(|_| invalid())?),
        ColumnData::Float(v) => v.push(token.parse().map_err(|_| invalid())?),
        ColumnData::Double(v) => v.push(token.parse().map_err(|_| invalid())?),
        ColumnData::String(v) => v.push(token.to_string()),
        ColumnData::Character(v) => {
            let mut chars = token.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => v.push(c),
                _ => return Err(invalid()),
            }
        }
    }
    Ok(())
}

/// Streaming tokenizer over the ASCII data section.
///
/// Lines are read on demand. Blank lines and lines whose first non-blank
/// character is `!` are skipped.
pub struct AsciiTokenizer<R> {
    reader: R,
    pending: VecDeque<String>,
    line: usize,
    buf: Vec<u8>,
}

impl<R: BufRead> AsciiTokenizer<R> {
    /// Creates a tokenizer; `line` is the number of lines already consumed.
    pub fn new(reader: R, line: usize) -> Self {
        Self {
            reader,
            pending: VecDeque::new(),
            line,
            buf: Vec::new(),
        }
    }

    /// Line number of the most recently read line (1-based).
    pub fn line(&self) -> usize {
        self.line
    }

    /// Returns the next token, or `None` once the stream is exhausted.
    pub fn next_token(&mut self) -> Result<Option<String>, FieldError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }

            self.buf.clear();
            if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
                return Ok(None);
            }
            self.line += 1;

            let text = std::str::from_utf8(&self.buf)
                .map_err(|_| FieldError::Invalid(format!("line {} is not valid UTF-8", self.line)))?;
            if text.trim_start().starts_with('!') {
                continue;
            }

            let tokens = split_tokens(text).map_err(FieldError::Invalid)?;
            self.pending.extend(tokens);
        }
    }
}

/// Reads one fixed-width binary value in byte order `B`.
pub fn read_value<R: Read, B: ByteOrder>(
    reader: &mut R,
    data_type: DataType,
) -> Result<Value, FieldError> {
    let value = match data_type {
        DataType::Long => Value::Long(reader.read_i32::<B>()?),
        DataType::Long64 => Value::Long64(reader.read_i64::<B>()?),
        DataType::Float => Value::Float(reader.read_f32::<B>()?),
        DataType::Double => Value::Double(reader.read_f64::<B>()?),
        // Characters are single Latin-1 bytes
        DataType::Character => Value::Character(reader.read_u8()? as char),
        DataType::String => Value::String(read_string::<R, B>(reader)?),
    };
    Ok(value)
}

/// Reads one binary value in byte order `B` and appends it to a typed column.
pub fn read_into<R: Read, B: ByteOrder>(
    reader: &mut R,
    column: &mut ColumnData,
) -> Result<(), FieldError> {
    match column {
        ColumnData::Long(v) => v.push(reader.read_i32::<B>()?),
        ColumnData::Long64(v) => v.push(reader.read_i64::<B>()?),
        ColumnData::Float(v) => v.push(reader.read_f32::<B>()?),
        ColumnData::Double(v) => v.push(reader.read_f64::<B>()?),
        // Characters are single Latin-1 bytes
        ColumnData::Character(v) => v.push(reader.read_u8()? as char),
        ColumnData::String(v) => v.push(read_string::<R, B>(reader)?),
    }
    Ok(())
}

/// Reads an `i32` length-prefixed UTF-8 string.
pub fn read_string<R: Read, B: ByteOrder>(reader: &mut R) -> Result<String, FieldError> {
    let len = reader.read_i32::<B>()?;
    if len < 0 {
        return Err(FieldError::Invalid(format!("negative string length {}", len)));
    }

    let len = len as usize;
    let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOCATED_BYTES));
    reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(FieldError::Io(io::ErrorKind::UnexpectedEof.into()));
    }

    String::from_utf8(bytes)
        .map_err(|e| FieldError::Invalid(format!("string is not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, LittleEndian};

    #[test]
    fn test_split_plain_tokens() {
        let tokens = split_tokens("  1.0\t2  abc \n").unwrap();
        assert_eq!(tokens, vec!["1.0", "2", "abc"]);
        assert!(split_tokens("   \n").unwrap().is_empty());
    }

    #[test]
    fn test_split_quoted_tokens() {
        let tokens = split_tokens(r#"3 "hello world" "" x"#).unwrap();
        assert_eq!(tokens, vec!["3", "hello world", "", "x"]);

        let tokens = split_tokens(r#""say \"hi\"" "a\\b""#).unwrap();
        assert_eq!(tokens, vec![r#"say "hi""#, r"a\b"]);
    }

    #[test]
    fn test_split_unterminated_quote() {
        let err = split_tokens("1 \"hello world\n").unwrap_err();
        assert!(err.contains("unterminated quote"));
    }

    #[test]
    fn test_parse_value_conversions() {
        assert_eq!(parse_value("42", DataType::Long), Ok(Value::Long(42)));
        assert_eq!(
            parse_value("-9000000000", DataType::Long64),
            Ok(Value::Long64(-9_000_000_000))
        );
        assert_eq!(parse_value("1.5e3", DataType::Double), Ok(Value::Double(1500.0)));
        assert_eq!(parse_value("0.25", DataType::Float), Ok(Value::Float(0.25)));
        assert_eq!(parse_value("x", DataType::Character), Ok(Value::Character('x')));
        assert_eq!(
            parse_value("a b", DataType::String),
            Ok(Value::String("a b".to_string()))
        );
    }

    #[test]
    fn test_parse_value_rejects_truncation() {
        assert!(parse_value("2.5", DataType::Long).is_err());
        assert!(parse_value("3000000000", DataType::Long).is_err());
        assert!(parse_value("abc", DataType::Double).is_err());
        assert!(parse_value("xy", DataType::Character).is_err());
        assert!(parse_value("", DataType::Character).is_err());
    }

    #[test]
    fn test_parse_into_column() {
        let mut column = ColumnData::with_capacity(DataType::Long, 2);
        parse_into(&mut column, "5").unwrap();
        parse_into(&mut column, "-6").unwrap();
        assert!(parse_into(&mut column, "7.0").is_err());
        assert_eq!(column, ColumnData::Long(vec![5, -6]));
    }

    #[test]
    fn test_read_into_column() {
        let mut data = Vec::new();
        data.extend_from_slice(&1.5f32.to_be_bytes());
        data.extend_from_slice(&(-2.0f32).to_be_bytes());

        let mut reader = data.as_slice();
        let mut column = ColumnData::with_capacity(DataType::Float, 2);
        read_into::<_, BigEndian>(&mut reader, &mut column).unwrap();
        read_into::<_, BigEndian>(&mut reader, &mut column).unwrap();
        assert_eq!(column, ColumnData::Float(vec![1.5, -2.0]));
        assert!(matches!(
            read_into::<_, BigEndian>(&mut reader, &mut column),
            Err(FieldError::Io(_))
        ));
    }

    #[test]
    fn test_tokenizer_skips_comments_and_blank_lines() {
        let data = "! a comment\n\n1 2\n   ! indented comment\n\"a b\"\n";
        let mut tokenizer = AsciiTokenizer::new(data.as_bytes(), 10);

        assert_eq!(tokenizer.next_token().unwrap().as_deref(), Some("1"));
        assert_eq!(tokenizer.line(), 13);
        assert_eq!(tokenizer.next_token().unwrap().as_deref(), Some("2"));
        assert_eq!(tokenizer.next_token().unwrap().as_deref(), Some("a b"));
        assert_eq!(tokenizer.line(), 15);
        assert!(tokenizer.next_token().unwrap().is_none());
    }

    #[test]
    fn test_tokenizer_reports_unterminated_quote() {
        let mut tokenizer = AsciiTokenizer::new("\"open\n".as_bytes(), 0);
        assert!(matches!(tokenizer.next_token(), Err(FieldError::Invalid(_))));
    }

    #[test]
    fn test_read_binary_values() {
        let mut data = Vec::new();
        data.extend_from_slice(&7i32.to_le_bytes());
        data.extend_from_slice(&2.5f64.to_le_bytes());
        data.push(b'Q');
        data.extend_from_slice(&3i32.to_le_bytes());
        data.extend_from_slice(b"abc");

        let mut reader = data.as_slice();
        let read = |r: &mut &[u8], t| read_value::<_, LittleEndian>(r, t).unwrap();
        assert_eq!(read(&mut reader, DataType::Long), Value::Long(7));
        assert_eq!(read(&mut reader, DataType::Double), Value::Double(2.5));
        assert_eq!(read(&mut reader, DataType::Character), Value::Character('Q'));
        assert_eq!(
            read(&mut reader, DataType::String),
            Value::String("abc".to_string())
        );
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_big_endian_value() {
        let data = 0x0102_0304i32.to_be_bytes();
        let value = read_value::<_, BigEndian>(&mut data.as_slice(), DataType::Long).unwrap();
        assert_eq!(value, Value::Long(0x0102_0304));
    }

    #[test]
    fn test_read_truncated_string() {
        let mut data = Vec::new();
        data.extend_from_slice(&10i32.to_le_bytes());
        data.extend_from_slice(b"abc");

        let result = read_string::<_, LittleEndian>(&mut data.as_slice());
        match result {
            Err(FieldError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("expected EOF, got {:?}", other),
        }
    }

    #[test]
    fn test_read_invalid_utf8_string() {
        let mut data = Vec::new();
        data.extend_from_slice(&2i32.to_le_bytes());
        data.extend_from_slice(&[0xFF, 0xFE]);

        let result = read_string::<_, LittleEndian>(&mut data.as_slice());
        assert!(matches!(result, Err(FieldError::Invalid(_))));
    }
}
