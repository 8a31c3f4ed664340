use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::entity::EntityKind;

pub type Result<T> = std::result::Result<T, MapError>;

/// Failures raised while building or querying entity maps.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MapError {
    /// Malformed literal input. `fragment` is the exact offending text.
    #[error("could not parse '{fragment}': {reason}")]
    ParseFailure { fragment: String, reason: String },

    /// A referenced entity, collection, track or partition does not exist
    /// or is of the wrong kind.
    #[error("unknown {kind} '{name}'")]
    ReferenceFailure { kind: ReferenceKind, name: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("no such result: '{expression}'")]
    NoSuchResult { expression: String },
}

impl MapError {
    pub fn parse(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        MapError::ParseFailure {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }

    pub fn reference(kind: ReferenceKind, name: impl Into<String>) -> Self {
        MapError::ReferenceFailure {
            kind,
            name: name.into(),
        }
    }

    pub fn no_such_result(expression: impl Into<String>) -> Self {
        MapError::NoSuchResult {
            expression: expression.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            MapError::ParseFailure { .. } => ErrorCode::InvalidInput,
            MapError::ReferenceFailure { .. } => ErrorCode::NotFound,
            MapError::Cancelled => ErrorCode::Cancelled,
            MapError::NoSuchResult { .. } => ErrorCode::NoSuchResult,
        }
    }
}

/// What a `ReferenceFailure` was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceKind {
    Entity(EntityKind),
    Collection,
    Track,
    Partition,
    Property,
    Map,
    Statistic,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Entity(kind) => write!(f, "{}", kind.singular()),
            ReferenceKind::Collection => write!(f, "collection"),
            ReferenceKind::Track => write!(f, "track"),
            ReferenceKind::Partition => write!(f, "partition"),
            ReferenceKind::Property => write!(f, "property"),
            ReferenceKind::Map => write!(f, "map"),
            ReferenceKind::Statistic => write!(f, "statistic evaluator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidInput,
    NotFound,
    Cancelled,
    NoSuchResult,
    Unsupported,
    Io,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

impl From<MapError> for EngineError {
    fn from(err: MapError) -> Self {
        EngineError {
            code: err.code(),
            message: err.to_string(),
        }
    }
}
