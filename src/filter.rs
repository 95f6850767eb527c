//! Consumer-side record filters

use crate::level::Level;
use crate::memory::levels::LevelTable;
use crate::record::LogRecord;

/// Decides whether a record is delivered to the sinks
pub trait Filter: Send {
    /// `true` to keep the record
    fn accept(&self, record: &LogRecord) -> bool;

    /// The keyed level rule behind this filter, if any
    ///
    /// A handler publishes such rules to the shared level table so producers
    /// build records the filter would keep.
    fn level_rule(&self) -> Option<&LevelFilter> {
        None
    }
}

impl<F> Filter for F
where
    F: Fn(&LogRecord) -> bool + Send,
{
    fn accept(&self, record: &LogRecord) -> bool {
        self(record)
    }
}

/// Ordered list of filters; a record passes only if every filter accepts it
///
/// Evaluation stops at the first rejection. Filters run on the consumer
/// thread only.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn Filter>>,
}

impl FilterChain {
    /// Empty chain that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the end of the chain
    pub fn add(&mut self, filter: impl Filter + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Run the chain against a record
    pub fn evaluate(&self, record: &LogRecord) -> bool {
        self.filters.iter().all(|filter| filter.accept(record))
    }

    /// Number of filters in the chain
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether the chain has no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Minimum level, optionally restricted to a component, tag and file
///
/// A record matching every configured key must be at or above `level`.
/// Records that miss a key are not governed by this filter and pass. Files
/// are compared by file name, so `"tcp.rs"` and `"src/net/tcp.rs"` name the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFilter {
    level: Level,
    component: Option<String>,
    tag: Option<String>,
    file: Option<String>,
}

impl LevelFilter {
    /// Filter on level alone
    pub fn new(level: Level) -> Self {
        Self {
            level,
            component: None,
            tag: None,
            file: None,
        }
    }

    /// Only govern records from `component`
    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.component = non_empty(component.into());
        self
    }

    /// Only govern records tagged `tag`
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = non_empty(tag.into());
        self
    }

    /// Only govern records from the source file `file`
    pub fn file(mut self, file: impl Into<String>) -> Self {
        let file: String = file.into();
        self.file = non_empty(file_name(&file).to_owned());
        self
    }

    /// Minimum level of governed records
    pub fn level(&self) -> Level {
        self.level
    }

    /// Whether any of component, tag or file is set
    pub fn is_keyed(&self) -> bool {
        self.component.is_some() || self.tag.is_some() || self.file.is_some()
    }

    /// Enable this filter's level at the call sites it governs
    ///
    /// Keyless filters are left to the global threshold.
    pub fn publish(&self, table: &LevelTable<'_>) {
        if self.is_keyed() {
            table.lower(
                self.level,
                self.component.as_deref(),
                self.tag.as_deref(),
                self.file.as_deref(),
            );
        }
    }

    fn governs(&self, record: &LogRecord) -> bool {
        key_matches(self.component.as_deref(), Some(record.component()))
            && key_matches(self.tag.as_deref(), record.tag())
            && key_matches(self.file.as_deref(), Some(file_name(record.file())))
    }
}

impl Filter for LevelFilter {
    fn accept(&self, record: &LogRecord) -> bool {
        !self.governs(record) || record.level() >= self.level
    }

    fn level_rule(&self) -> Option<&LevelFilter> {
        Some(self)
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn key_matches(key: Option<&str>, value: Option<&str>) -> bool {
    match (key, value) {
        (None, _) => true,
        (Some(key), Some(value)) => key == value,
        (Some(_), None) => false,
    }
}
