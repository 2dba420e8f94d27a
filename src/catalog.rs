use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::io::BufRead;
use std::sync::Arc;

use crate::readers::{ReaderFactory, RecordReader};

/// Classification of a file driving which reader and which consumers apply.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogType(String);

impl LogType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type PathPredicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// One log type: the path predicate deciding membership and the factory
/// producing a reader for an opened stream.
pub struct LogTypeDescriptor {
    log_type: LogType,
    matcher: PathPredicate,
    factory: Arc<dyn ReaderFactory>,
}

impl LogTypeDescriptor {
    pub fn new(
        log_type: LogType,
        matcher: impl Fn(&str) -> bool + Send + Sync + 'static,
        factory: Arc<dyn ReaderFactory>,
    ) -> Self {
        Self {
            log_type,
            matcher: Box::new(matcher),
            factory,
        }
    }

    /// Match on a path suffix, with `.gz`-compressed members included.
    pub fn with_suffix(log_type: LogType, suffix: &str, factory: Arc<dyn ReaderFactory>) -> Self {
        let suffix = suffix.to_string();
        let gz_suffix = format!("{}.gz", suffix);
        Self::new(
            log_type,
            move |path| path.ends_with(&suffix) || path.ends_with(&gz_suffix),
            factory,
        )
    }

    /// Match on a compiled path pattern.
    pub fn with_pattern(log_type: LogType, pattern: Regex, factory: Arc<dyn ReaderFactory>) -> Self {
        Self::new(log_type, move |path| pattern.is_match(path), factory)
    }

    pub fn log_type(&self) -> &LogType {
        &self.log_type
    }

    pub fn belongs_to_type(&self, path: &str) -> bool {
        (self.matcher)(path)
    }

    pub fn make_reader<'a>(
        &self,
        stream: Box<dyn BufRead + 'a>,
        path: &str,
    ) -> Box<dyn RecordReader + 'a> {
        self.factory.make(stream, path)
    }
}

/// Registry of log types known to a run. Registration order is not
/// significant; lookup is by type.
#[derive(Default)]
pub struct LogTypeCatalog {
    entries: Vec<LogTypeDescriptor>,
}

impl LogTypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: LogTypeDescriptor) {
        self.entries.push(descriptor);
    }

    pub fn get(&self, log_type: &LogType) -> Option<&LogTypeDescriptor> {
        self.entries.iter().find(|d| d.log_type() == log_type)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::LineReaderFactory;

    #[test]
    fn test_suffix_matcher_includes_gz() {
        let descriptor = LogTypeDescriptor::with_suffix(
            LogType::new("server"),
            ".log",
            Arc::new(LineReaderFactory::new(1024)),
        );
        assert!(descriptor.belongs_to_type("node1/server.log"));
        assert!(descriptor.belongs_to_type("node1/server.log.gz"));
        assert!(!descriptor.belongs_to_type("node1/server.trc"));
    }

    #[test]
    fn test_catalog_lookup() {
        let mut catalog = LogTypeCatalog::new();
        catalog.register(LogTypeDescriptor::with_suffix(
            LogType::new("server"),
            ".log",
            Arc::new(LineReaderFactory::new(1024)),
        ));
        assert!(catalog.get(&LogType::new("server")).is_some());
        assert!(catalog.get(&LogType::new("audit")).is_none());
    }
}
