//! Error types for the rotunda round-robin database.

use thiserror::Error;

/// The main error type for all rotunda operations.
///
/// Covers the full lifecycle: definition parsing and validation, file
/// creation and mapping, the update write path, and the fetch read path.
/// Every variant renders a human-readable message suitable for passing
/// straight through a binding layer.
#[derive(Error, Debug)]
pub enum RotundaError {
    /// Error parsing or validating data-source/archive definitions.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Error in database file lifecycle or I/O.
    #[error("file error: {0}")]
    File(#[from] FileError),

    /// Error during an update operation (write path).
    #[error("update error: {0}")]
    Update(#[from] UpdateError),

    /// Error during a fetch operation (read path).
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),
}

/// Errors raised while parsing or validating database definitions.
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// A top-level argument is malformed or missing.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// A `DS:` data-source definition failed to parse or validate.
    #[error("invalid data source '{spec}': {reason}")]
    InvalidDataSource {
        /// The offending definition token.
        spec: String,
        /// What was invalid about it.
        reason: String,
    },

    /// An `RRA:` archive definition failed to parse or validate.
    #[error("invalid archive '{spec}': {reason}")]
    InvalidArchive {
        /// The offending definition token.
        spec: String,
        /// What was invalid about it.
        reason: String,
    },

    /// Two data sources share the same name.
    #[error("duplicate data source name '{name}'")]
    DuplicateDataSource {
        /// The duplicated name.
        name: String,
    },
}

/// Errors raised by database file lifecycle and I/O operations.
#[derive(Error, Debug)]
pub enum FileError {
    /// Creation target already exists.
    #[error("database file '{path}' already exists")]
    AlreadyExists {
        /// The path that was refused.
        path: String,
    },

    /// The database file does not exist.
    #[error("database file '{path}' not found")]
    NotFound {
        /// The missing path.
        path: String,
    },

    /// An underlying filesystem operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The file path involved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Memory mapping failed.
    #[error("memory mapping failed for '{path}': {source}")]
    MemoryMap {
        /// The file path that failed to map.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file exists but fails structural validation.
    #[error("corrupt database file '{path}': {reason}")]
    Corrupt {
        /// The file path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },
}

/// Errors raised on the update write path.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// The update timestamp is not newer than the last update.
    #[error(
        "illegal attempt to update using time {timestamp} when last update time is {last_update} (minimum one second step)"
    )]
    TimestampOutOfOrder {
        /// The rejected timestamp.
        timestamp: i64,
        /// The database's last-update timestamp.
        last_update: i64,
    },

    /// The update timestamp predates the retention window entirely.
    #[error("update time {timestamp} is older than the earliest retained time {earliest}")]
    TimestampTooOld {
        /// The rejected timestamp.
        timestamp: i64,
        /// The earliest time still addressed by the first archive.
        earliest: i64,
    },

    /// The update supplied the wrong number of values.
    #[error("expected {expected} data source values, got {got}")]
    WrongValueCount {
        /// Number of data sources in the database.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },

    /// A value token could not be interpreted for its data-source type.
    #[error("bad value '{token}': {reason}")]
    BadValue {
        /// The offending value token.
        token: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An update line is structurally malformed.
    #[error("malformed update '{line}': {reason}")]
    MalformedLine {
        /// The offending update line.
        line: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A template names a data source that does not exist.
    #[error("unknown data source name '{name}'")]
    UnknownDataSource {
        /// The unmatched name.
        name: String,
    },
}

/// Errors raised on the fetch read path.
#[derive(Error, Debug)]
pub enum FetchError {
    /// No archive uses the requested consolidation function.
    #[error("no archive with consolidation function {cf}")]
    NoMatchingArchive {
        /// The requested function name.
        cf: String,
    },

    /// The time range is invalid (start >= end).
    #[error("invalid time range: start {start} >= end {end}")]
    InvalidTimeRange {
        /// The start time.
        start: i64,
        /// The end time.
        end: i64,
    },
}

/// Type alias for `Result<T, RotundaError>`.
pub type Result<T> = std::result::Result<T, RotundaError>;
