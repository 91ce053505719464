// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Control file lexing and parsing
//!
//! Debian control files are sequences of paragraphs separated by empty lines.
//! Each paragraph consists of `Name: value` fields where additional value
//! lines are marked by a leading space. [ControlLexer] turns a reader into a
//! stream of [ControlToken]s; [parse_fields] decodes a stream into a typed
//! record through a table mapping field names to setters.
//!
//! The lexer is strict: a field must not end with an empty line, and lines
//! that are neither fields, continuations nor paragraph separators are
//! rejected. The parser is equally strict: fields without a table entry are
//! rejected, entries without a setter are accepted and ignored, and required
//! fields must appear.

use std::io::{self, BufRead};

use chrono::{DateTime, Utc};
use hex::FromHex;
use thiserror::Error;

use crate::package::FileReference;

/// Errors produced by the lexer and the table-driven parser.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A line that is neither a field, a continuation nor a separator
    #[error("Got unexpected line '{0}'")]
    UnexpectedLine(String),
    /// A field whose last value line is empty
    #[error("Invalid field {0}, as it ends with an empty line")]
    FieldEndsWithEmptyLine(String),
    /// A field that has no entry in the parser table
    #[error("Unexpected field {0}")]
    UnknownField(String),
    /// A required field that did not appear
    #[error("Missing required field {0}")]
    MissingField(&'static str),
    /// A single-line field with continuation lines
    #[error("Field {0} expects a single line")]
    ExpectedSingleLine(String),
    /// A multi-line field whose first value line is not empty
    #[error("Field {0} expects an empty first line")]
    ExpectedMultiLine(String),
    /// A field value that does not parse
    #[error("Invalid {field} value: {message}")]
    Value {
        /// Name of the offending field
        field: String,
        /// What went wrong
        message: String,
    },
}

impl ControlError {
    pub(crate) fn value(field: &ControlField, message: impl Into<String>) -> Self {
        ControlError::Value {
            field: field.name.clone(),
            message: message.into(),
        }
    }
}

/// A single field of a control file paragraph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlField {
    /// Field name without the trailing colon
    pub name: String,
    /// Value lines, whitespace-trimmed; index 0 is the rest of the name line
    pub lines: Vec<String>,
}

/// One lexed unit: a field or a paragraph separator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlToken {
    /// A `Name: value` field including its continuation lines
    Field(ControlField),
    /// One or more empty lines
    ParagraphBreak,
}

fn is_field_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Lexer over control-file formatted data.
#[derive(Debug)]
pub struct ControlLexer<R> {
    reader: R,
    peeked: Option<String>,
    done: bool,
}

impl<R: BufRead> ControlLexer<R> {
    /// Create a lexer reading from `reader`.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            peeked: None,
            done: false,
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.peeked.take() {
            return Ok(Some(line));
        }
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn peek_line(&mut self) -> io::Result<Option<&str>> {
        if self.peeked.is_none() {
            self.peeked = self.read_line()?;
        }
        Ok(self.peeked.as_deref())
    }

    fn lex_field(&mut self, line: &str) -> Result<ControlField, ControlError> {
        let Some((name, value)) = line.split_once(':') else {
            return Err(ControlError::UnexpectedLine(line.to_owned()));
        };
        if !is_field_name(name) {
            return Err(ControlError::UnexpectedLine(line.to_owned()));
        }

        let mut field = ControlField {
            name: name.to_owned(),
            lines: vec![value.trim().to_owned()],
        };
        while let Some(next) = self.peek_line()? {
            if !next.starts_with(' ') {
                break;
            }
            let Some(next) = self.read_line()? else { break };
            field.lines.push(next.trim().to_owned());
        }

        if field.lines.last().is_some_and(String::is_empty) {
            return Err(ControlError::FieldEndsWithEmptyLine(field.name));
        }
        Ok(field)
    }
}

impl<R: BufRead> Iterator for ControlLexer<R> {
    type Item = Result<ControlToken, ControlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let line = match self.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(err) => {
                self.done = true;
                return Some(Err(err.into()));
            }
        };

        if line.is_empty() {
            // collapse a run of empty lines into one separator
            loop {
                match self.peek_line() {
                    Ok(Some("")) => {
                        let _ = self.read_line();
                    }
                    Ok(_) => break,
                    Err(err) => {
                        self.done = true;
                        return Some(Err(err.into()));
                    }
                }
            }
            return Some(Ok(ControlToken::ParagraphBreak));
        }

        match self.lex_field(&line) {
            Ok(field) => Some(Ok(ControlToken::Field(field))),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// Setter decoding one field into the target record.
pub type FieldSetter<T> = fn(&ControlField, &mut T) -> Result<(), ControlError>;

/// One row of a parser table.
#[derive(Debug)]
pub struct FieldSpec<T: 'static> {
    /// Field name as it appears in the file
    pub name: &'static str,
    /// Setter, or `None` for accepted-and-ignored fields
    pub setter: Option<FieldSetter<T>>,
    /// Whether the field must appear; only meaningful with a setter
    pub required: bool,
}

impl<T> FieldSpec<T> {
    /// A field that is decoded and must appear.
    pub const fn required(name: &'static str, setter: FieldSetter<T>) -> Self {
        Self {
            name,
            setter: Some(setter),
            required: true,
        }
    }

    /// A field that is decoded when present.
    pub const fn optional(name: &'static str, setter: FieldSetter<T>) -> Self {
        Self {
            name,
            setter: Some(setter),
            required: false,
        }
    }

    /// A field that is accepted and ignored.
    pub const fn ignored(name: &'static str) -> Self {
        Self {
            name,
            setter: None,
            required: false,
        }
    }
}

/// Decode a lexed stream into `target` according to `specs`.
///
/// Unknown fields fail the parse; fields with a `None` setter are skipped;
/// required fields that never appeared fail the parse once the stream is
/// exhausted.
pub fn parse_fields<T, R: BufRead>(
    lexer: &mut ControlLexer<R>,
    specs: &[FieldSpec<T>],
    target: &mut T,
) -> Result<(), ControlError> {
    let mut seen = vec![false; specs.len()];

    for token in lexer {
        let field = match token? {
            ControlToken::Field(field) => field,
            ControlToken::ParagraphBreak => continue,
        };
        let Some(idx) = specs.iter().position(|spec| spec.name == field.name) else {
            return Err(ControlError::UnknownField(field.name));
        };
        if let Some(setter) = specs[idx].setter {
            setter(&field, target)?;
            seen[idx] = true;
        }
    }

    for (spec, seen) in specs.iter().zip(seen) {
        if spec.required && !seen {
            return Err(ControlError::MissingField(spec.name));
        }
    }
    Ok(())
}

/// Return the value of a field that must fit on a single line.
pub fn expect_single_line(field: &ControlField) -> Result<&str, ControlError> {
    match field.lines.as_slice() {
        [line] => Ok(line),
        _ => Err(ControlError::ExpectedSingleLine(field.name.clone())),
    }
}

/// Return the value lines of a field whose first value line must be empty.
pub fn expect_multi_line(field: &ControlField) -> Result<&[String], ControlError> {
    match field.lines.split_first() {
        Some((first, rest)) if first.is_empty() => Ok(rest),
        _ => Err(ControlError::ExpectedMultiLine(field.name.clone())),
    }
}

/// Decode a `Date:` field and normalize to UTC.
pub fn parse_date(field: &ControlField) -> Result<DateTime<Utc>, ControlError> {
    let value = expect_single_line(field)?;
    DateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S %z")
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| ControlError::value(field, err.to_string()))
}

/// Decode a file-list field: an empty first line followed by lines of either
/// `hash size basename` or `hash size section priority basename`.
pub fn parse_file_list(field: &ControlField) -> Result<Vec<FileReference>, ControlError> {
    let lines = expect_multi_line(field)?;
    let mut files = Vec::with_capacity(lines.len());
    for line in lines {
        let tokens: Vec<_> = line.split_ascii_whitespace().collect();
        let (hash, size, name) = match tokens.as_slice() {
            [hash, size, name] => (hash, size, name),
            [hash, size, _section, _priority, name] => (hash, size, name),
            _ => {
                return Err(ControlError::value(
                    field,
                    format!("expected 3 or 5 tokens in '{line}'"),
                ));
            }
        };
        files.push(FileReference {
            checksum: Vec::from_hex(hash)
                .map_err(|err| ControlError::value(field, err.to_string()))?,
            size: size
                .parse()
                .map_err(|_| ControlError::value(field, format!("invalid size '{size}'")))?,
            name: (*name).to_owned(),
        });
    }
    Ok(files)
}

#[cfg(test)]
mod test {
    use super::*;

    fn lex(input: &str) -> Result<Vec<ControlToken>, ControlError> {
        ControlLexer::new(input.as_bytes()).collect()
    }

    #[test]
    fn single_field() {
        let tokens = lex("Source: aha\n").unwrap();
        assert_eq!(
            tokens,
            vec![ControlToken::Field(ControlField {
                name: "Source".into(),
                lines: vec!["aha".into()],
            })]
        );
    }

    #[test]
    fn continuation_lines() {
        let tokens = lex("Description:\n aha - ANSI color to HTML converter\n").unwrap();
        assert_eq!(
            tokens,
            vec![ControlToken::Field(ControlField {
                name: "Description".into(),
                lines: vec!["".into(), "aha - ANSI color to HTML converter".into()],
            })]
        );
    }

    #[test]
    fn paragraph_separation() {
        let tokens = lex("A: 1\n\n\n\nB: 2\n").unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1], ControlToken::ParagraphBreak);
    }

    #[test]
    fn field_must_not_end_empty() {
        let err = lex("Description:\n value\n \nNext: x\n").unwrap_err();
        assert!(matches!(err, ControlError::FieldEndsWithEmptyLine(_)));
    }

    #[test]
    fn unexpected_line() {
        let err = lex("no colon here\n").unwrap_err();
        assert!(matches!(err, ControlError::UnexpectedLine(_)));
        let err = lex("1Bad: name\n").unwrap_err();
        assert!(matches!(err, ControlError::UnexpectedLine(_)));
    }

    #[derive(Default)]
    struct Record {
        source: String,
    }

    fn set_source(field: &ControlField, record: &mut Record) -> Result<(), ControlError> {
        record.source = expect_single_line(field)?.to_owned();
        Ok(())
    }

    const SPECS: &[FieldSpec<Record>] = &[
        FieldSpec::required("Source", set_source),
        FieldSpec::ignored("Homepage"),
    ];

    #[test]
    fn table_parse() {
        let mut record = Record::default();
        let mut lexer = ControlLexer::new("Source: aha\nHomepage: ignored\n".as_bytes());
        parse_fields(&mut lexer, SPECS, &mut record).unwrap();
        assert_eq!(record.source, "aha");
    }

    #[test]
    fn unknown_field_fails() {
        let mut record = Record::default();
        let mut lexer = ControlLexer::new("Source: aha\nNope: x\n".as_bytes());
        let err = parse_fields(&mut lexer, SPECS, &mut record).unwrap_err();
        assert!(matches!(err, ControlError::UnknownField(name) if name == "Nope"));
    }

    #[test]
    fn missing_required_field_fails() {
        let mut record = Record::default();
        let mut lexer = ControlLexer::new("Homepage: x\n".as_bytes());
        let err = parse_fields(&mut lexer, SPECS, &mut record).unwrap_err();
        assert!(matches!(err, ControlError::MissingField("Source")));
    }

    #[test]
    fn date_normalized_to_utc() {
        let field = ControlField {
            name: "Date".into(),
            lines: vec!["Sat, 14 Dec 2013 12:17:50 +0100".into()],
        };
        let date = parse_date(&field).unwrap();
        assert_eq!(date.to_rfc3339(), "2013-12-14T11:17:50+00:00");
    }

    #[test]
    fn file_list_three_and_five_tokens() {
        let field = ControlField {
            name: "Files".into(),
            lines: vec![
                "".into(),
                "ec8ed1ab14b6a363d06d2b58cca2e85d 1059 text optional aha_0.4.7.2-1.dsc".into(),
                "e3505c58dbacecab32031a4e6df60d4e 12288 aha_0.4.7.2.orig.tar.gz".into(),
            ],
        };
        let files = parse_file_list(&field).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "aha_0.4.7.2-1.dsc");
        assert_eq!(files[0].size, 1059);
        assert_eq!(files[1].name, "aha_0.4.7.2.orig.tar.gz");
        assert_eq!(hex::encode(&files[1].checksum), "e3505c58dbacecab32031a4e6df60d4e");
    }

    #[test]
    fn file_list_rejects_other_shapes() {
        let field = ControlField {
            name: "Files".into(),
            lines: vec!["".into(), "ec8ed1 1059 a b".into()],
        };
        assert!(parse_file_list(&field).is_err());
    }
}
