use anyhow::Result;
use regex::Regex;
use std::io::BufRead;

use crate::failure::{FailureKind, TaskError};

/// A parsed line (or multi-line group) pulled lazily from an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Reader-defined: the first physical line of a multi-line group.
    pub line_number: u64,
    pub content: String,
}

/// Lazy, finite, single-pass, non-restartable record source.
///
/// Readers are constructed per file by the log type's factory and consumed
/// entirely inside one worker; they are never shared or rewound.
pub trait RecordReader {
    fn next_record(&mut self) -> Option<Result<RawRecord>>;
}

/// Builds a reader over an opened stream for one file.
///
/// The stream borrows from the task-local archive handle, so the factory is
/// generic over its lifetime rather than demanding `'static`.
pub trait ReaderFactory: Send + Sync {
    fn make<'a>(&self, stream: Box<dyn BufRead + 'a>, path: &str) -> Box<dyn RecordReader + 'a>;
}

/// Plain line reader with an explicit per-line byte ceiling.
///
/// A line longer than the ceiling yields a typed `LineTooLong` failure
/// instead of growing the buffer without bound; the reader is spent after
/// that, which is fine because the file task aborts anyway.
pub struct LineReader<R> {
    inner: R,
    next_line: u64,
    max_line_bytes: usize,
    done: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            next_line: 0,
            max_line_bytes,
            done: false,
        }
    }

    fn pull_line(&mut self) -> Result<Option<String>> {
        let mut buf: Vec<u8> = Vec::new();
        loop {
            let available = self.inner.fill_buf()?;
            if available.is_empty() {
                if buf.is_empty() {
                    return Ok(None);
                }
                break;
            }

            match available.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    buf.extend_from_slice(&available[..pos]);
                    self.inner.consume(pos + 1);
                    break;
                }
                None => {
                    let len = available.len();
                    buf.extend_from_slice(available);
                    self.inner.consume(len);
                }
            }

            if buf.len() > self.max_line_bytes {
                return Err(TaskError::new(
                    FailureKind::LineTooLong,
                    format!(
                        "line {} exceeds the configured ceiling of {} bytes",
                        self.next_line + 1,
                        self.max_line_bytes
                    ),
                )
                .into());
            }
        }

        if buf.ends_with(b"\r") {
            buf.pop();
        }
        if buf.len() > self.max_line_bytes {
            return Err(TaskError::new(
                FailureKind::LineTooLong,
                format!(
                    "line {} exceeds the configured ceiling of {} bytes",
                    self.next_line + 1,
                    self.max_line_bytes
                ),
            )
            .into());
        }

        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

impl<R: BufRead> RecordReader for LineReader<R> {
    fn next_record(&mut self) -> Option<Result<RawRecord>> {
        if self.done {
            return None;
        }
        match self.pull_line() {
            Ok(Some(content)) => {
                self.next_line += 1;
                Some(Ok(RawRecord {
                    line_number: self.next_line,
                    content,
                }))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Groups continuation lines under the group's first line number.
///
/// A line matching `start` begins a new record; everything else is appended
/// to the pending record. A leading continuation (file starting mid-group)
/// opens its own record rather than being dropped.
pub struct MultilineReader<R> {
    inner: LineReader<R>,
    start: Regex,
    pending: Option<RawRecord>,
}

impl<R: BufRead> MultilineReader<R> {
    pub fn new(inner: R, start: Regex, max_line_bytes: usize) -> Self {
        Self {
            inner: LineReader::new(inner, max_line_bytes),
            start,
            pending: None,
        }
    }
}

impl<R: BufRead> RecordReader for MultilineReader<R> {
    fn next_record(&mut self) -> Option<Result<RawRecord>> {
        loop {
            match self.inner.next_record() {
                Some(Ok(rec)) => {
                    if self.start.is_match(&rec.content) {
                        match self.pending.replace(rec) {
                            Some(complete) => return Some(Ok(complete)),
                            None => continue,
                        }
                    }
                    match self.pending.as_mut() {
                        Some(group) => {
                            group.content.push('\n');
                            group.content.push_str(&rec.content);
                        }
                        None => self.pending = Some(rec),
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => return self.pending.take().map(Ok),
            }
        }
    }
}

/// Factory for [`LineReader`].
pub struct LineReaderFactory {
    max_line_bytes: usize,
}

impl LineReaderFactory {
    pub fn new(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }
}

impl ReaderFactory for LineReaderFactory {
    fn make<'a>(&self, stream: Box<dyn BufRead + 'a>, _path: &str) -> Box<dyn RecordReader + 'a> {
        Box::new(LineReader::new(stream, self.max_line_bytes))
    }
}

/// Factory for [`MultilineReader`].
pub struct MultilineReaderFactory {
    start: Regex,
    max_line_bytes: usize,
}

impl MultilineReaderFactory {
    pub fn new(start: Regex, max_line_bytes: usize) -> Self {
        Self {
            start,
            max_line_bytes,
        }
    }
}

impl ReaderFactory for MultilineReaderFactory {
    fn make<'a>(&self, stream: Box<dyn BufRead + 'a>, _path: &str) -> Box<dyn RecordReader + 'a> {
        Box::new(MultilineReader::new(
            stream,
            self.start.clone(),
            self.max_line_bytes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::classify;
    use std::io::Cursor;

    fn collect(reader: &mut dyn RecordReader) -> Vec<RawRecord> {
        let mut out = Vec::new();
        while let Some(item) = reader.next_record() {
            out.push(item.expect("unexpected reader error"));
        }
        out
    }

    #[test]
    fn test_line_reader_basic() {
        let mut reader = LineReader::new(Cursor::new("alpha\nbeta\r\ngamma"), 1024);
        let records = collect(&mut reader);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].line_number, 1);
        assert_eq!(records[0].content, "alpha");
        assert_eq!(records[1].content, "beta");
        assert_eq!(records[2].line_number, 3);
        assert_eq!(records[2].content, "gamma");
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_line_reader_empty_input() {
        let mut reader = LineReader::new(Cursor::new(""), 64);
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_line_too_long_is_typed() {
        let mut reader = LineReader::new(Cursor::new("ok\nxxxxxxxxxxxxxxxxxxxx\nnever"), 8);
        assert_eq!(reader.next_record().unwrap().unwrap().content, "ok");
        let err = reader.next_record().unwrap().unwrap_err();
        assert_eq!(classify(&err), FailureKind::LineTooLong);
        // Reader is spent after a fatal line error.
        assert!(reader.next_record().is_none());
    }

    #[test]
    fn test_multiline_grouping_keeps_first_line_number() {
        let input = "2024-01-01 start one\n  continued\n  more\n2024-01-02 start two\n";
        let start = Regex::new(r"^\d{4}-\d{2}-\d{2} ").unwrap();
        let mut reader = MultilineReader::new(Cursor::new(input), start, 1024);
        let records = collect(&mut reader);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line_number, 1);
        assert_eq!(records[0].content, "2024-01-01 start one\n  continued\n  more");
        assert_eq!(records[1].line_number, 4);
        assert_eq!(records[1].content, "2024-01-02 start two");
    }

    #[test]
    fn test_multiline_leading_continuation_forms_group() {
        let input = "  orphan continuation\n2024-01-01 start\n";
        let start = Regex::new(r"^\d{4}").unwrap();
        let mut reader = MultilineReader::new(Cursor::new(input), start, 1024);
        let records = collect(&mut reader);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line_number, 1);
        assert_eq!(records[0].content, "  orphan continuation");
        assert_eq!(records[1].content, "2024-01-01 start");
    }
}
