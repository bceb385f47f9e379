// Copyright 2025 Cornell University
// released under MIT License

use thiserror::Error;

/// Errors that abort the generation of environment models.
/// Specification errors point at the offending process / action names,
/// the remaining variants indicate a defect in the generator itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("process `{process}` requires unknown process `{required}`")]
    UnknownProcess { process: String, required: String },

    #[error("process `{process}` requires unknown action `{action}` of process `{required}`")]
    UnknownAction {
        process: String,
        required: String,
        action: String,
    },

    #[error("process `{process}` must be present in the model but has no admissible scenario")]
    NoAdmissibleScenario { process: String },

    #[error("savepoint `{savepoint}` is declared by both `{first}` and `{second}`")]
    SavepointCollision {
        savepoint: String,
        first: String,
        second: String,
    },

    #[error("subprocesses {} of process `{process}` recurse without an exit path", subprocesses.join(", "))]
    NonTerminatingRecursion {
        process: String,
        subprocesses: Vec<String>,
    },

    #[error("{stage} of process `{process}` stopped making progress ({remaining} items left)")]
    FixpointStalled {
        stage: &'static str,
        process: String,
        remaining: usize,
    },

    #[error("expected exactly one initial action in `{process}`, found {found}")]
    InitialAction { process: String, found: usize },
}

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Errors produced while turning a process expression into an action tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{message}")]
    Syntax {
        message: String,
        start: usize,
        end: usize,
    },

    #[error("action `{name}` is not declared in process `{process}`")]
    UndeclaredAction {
        process: String,
        name: String,
        start: usize,
        end: usize,
    },

    #[error("action `{name}` of process `{process}` is a {declared} but is used as a {used}")]
    KindMismatch {
        process: String,
        name: String,
        declared: &'static str,
        used: &'static str,
        start: usize,
        end: usize,
    },
}

impl ParseError {
    /// Byte range of the process expression the error refers to
    pub fn span(&self) -> (usize, usize) {
        match self {
            ParseError::Syntax { start, end, .. }
            | ParseError::UndeclaredAction { start, end, .. }
            | ParseError::KindMismatch { start, end, .. } => (*start, *end),
        }
    }
}

/// Errors produced while decoding a process collection description
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed description: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read description: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid process expression in `{process}`: {source}")]
    Expression {
        process: String,
        expression: String,
        #[source]
        source: ParseError,
    },

    #[error("action `{action}` of process `{process}` is used as {first} and as {second}")]
    ConflictingUse {
        process: String,
        action: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("subprocess `{action}` of process `{process}` has no `process` expression")]
    MissingBody { process: String, action: String },

    #[error("environment process key `{key}` does not match its identity `{identity}`")]
    KeyMismatch { key: String, identity: String },
}
