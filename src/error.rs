//! Error taxonomy for the engine.
//!
//! Parsing errors are aggregated over the whole file and raised once;
//! everything else is a single typed failure.

use thiserror::Error;

/// One collected parse failure: line number, offending line, message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub line_no: usize,
    pub line: String,
    pub message: String,
}

/// Aggregate of every parse failure found in one pass over a script.
///
/// The parser keeps reading after the first failure so that a single run
/// surfaces as many problems as possible.
#[derive(Debug, Clone, Default)]
pub struct ParsingError {
    /// Script path, or `<string>` for in-memory sources.
    pub source_name: String,
    pub issues: Vec<ParseIssue>,
}

impl ParsingError {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            issues: Vec::new(),
        }
    }

    /// Record a failure and keep going.
    pub fn append(&mut self, line_no: usize, line: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ParseIssue {
            line_no,
            line: line.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

impl std::fmt::Display for ParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "File contains parsing errors: {}", self.source_name)?;
        for issue in &self.issues {
            writeln!(
                f,
                "\t[line {:2}]: {}\n{}",
                issue.line_no, issue.line, issue.message
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ParsingError {}

/// Errors raised outside the parser's aggregation pass.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parsing(#[from] ParsingError),

    /// Two sections of one workflow claimed the same step index.
    #[error("section {workflow}_{index} already exists")]
    DuplicateSection { workflow: String, index: u32 },

    /// Bad or unknown command-line parameter override.
    #[error("argument error: {0}")]
    Argument(String),

    /// The scheduler found no ready node while incomplete nodes remain,
    /// or the declared dependencies form a cycle.
    #[error("scheduler fault: {0}")]
    Scheduler(String),

    /// Expression evaluation failed outside the tolerated cases.
    #[error("evaluation error: {0}")]
    Eval(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
