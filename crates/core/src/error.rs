//! # Error Types
//!
//! Every failure in the engine is raised at the point of detection and
//! propagated unchanged to the caller. No internal layer retries or
//! swallows these; EM non-convergence is reported through its final
//! difference and is not an error.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the matrix primitive, network ingestion, learning and inference.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CausalError {
    /// No node carries this identifier.
    #[error("Identifier not found: {id}")]
    IdNotFound { id: u32 },

    /// No node, row or column carries this name.
    #[error("Name not found: {name}")]
    NameNotFound { name: String },

    /// The file extension does not select a known network format.
    #[error("Unsupported file type: {extension:?}")]
    UnsupportedFormat { extension: String },

    /// An operation needs data that has not been loaded yet.
    #[error("Missing prerequisite: {reason}")]
    MissingPrerequisite { reason: String },

    /// A (row, col) coordinate lies outside the matrix.
    #[error("Invalid matrix position ({row}, {col}) for a {rows}x{cols} matrix")]
    IndexOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// Resize requested a smaller dimension.
    #[error("Matrices can not be shrunk: {rows}x{cols} -> {new_rows}x{new_cols}")]
    ShrinkRejected {
        rows: usize,
        cols: usize,
        new_rows: usize,
        new_cols: usize,
    },

    /// The file could not be opened or read.
    #[error("Cannot read {path:?}: {reason}")]
    FileUnreadable { path: PathBuf, reason: String },

    /// A data row has a different token count than the header.
    #[error("Row {row} does not contain the specified number of samples: expected {expected}, got {got}")]
    RowLengthMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },

    /// A cell could not be parsed as the matrix element type.
    #[error("Row {row}: cannot parse {token:?}")]
    ParseCell { row: usize, token: String },

    /// A network file line is missing required fields.
    #[error("Line {line} is malformed: {content:?}")]
    MalformedLine { line: usize, content: String },

    /// The configuration file could not be decoded.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Conditional probability with zero-probability evidence.
    #[error("Conditional probability undefined: evidence has zero probability")]
    DivisionUndefined,

    /// Inference revisited a node on its own ancestor path.
    #[error("Cycle detected at node {id}")]
    CycleDetected { id: u32 },

    /// A node with this identifier or name already exists.
    #[error("Duplicate node {id} ({name})")]
    DuplicateNode { id: u32, name: String },

    /// A name vector does not match its axis length or repeats a name.
    #[error("Invalid {axis} names: {reason}")]
    InvalidNames { axis: &'static str, reason: String },
}

impl CausalError {
    /// Wrap an I/O failure on `path`.
    pub fn unreadable(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Self::FileUnreadable {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}
