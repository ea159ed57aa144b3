use std::fmt;
use thiserror::Error;

use crate::core::state::Slice;
use crate::services::stages::Stage;

/// Failure of the response extractor on structured output.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON object or array found in the response")]
    NoStructuredData,
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A required slice that is absent, or present only as an unparsed raw response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingSlice {
    pub slice: Slice,
    pub unparsed: bool,
}

impl fmt::Display for MissingSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unparsed {
            write!(f, "{} (unparsed response, regenerate or recover it)", self.slice)
        } else {
            write!(f, "{}", self.slice)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Prerequisite,
    Validation,
    Parse,
    Transport,
    Busy,
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("cannot run '{stage}' yet, missing: {}", join_missing(.missing))]
    Prerequisite { stage: Stage, missing: Vec<MissingSlice> },

    #[error("'{stage}' needs a chapter between 1 and {len}, got chapter {}", .index.saturating_add(1))]
    ChapterOutOfRange { stage: Stage, index: usize, len: usize },

    #[error("{0}")]
    Validation(String),

    #[error("could not parse the '{stage}' response ({source}); raw response kept: {raw}")]
    Parse {
        stage: Stage,
        #[source]
        source: ExtractError,
        raw: String,
    },

    #[error("could not reach the text-generation service for '{stage}': {message}. Check your connection or try again later")]
    Transport { stage: Stage, message: String },

    #[error("'{running}' is still running, wait for it before starting '{requested}'")]
    Busy { requested: Stage, running: Stage },
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Prerequisite { .. } | StageError::ChapterOutOfRange { .. } => {
                ErrorKind::Prerequisite
            }
            StageError::Validation(_) => ErrorKind::Validation,
            StageError::Parse { .. } => ErrorKind::Parse,
            StageError::Transport { .. } => ErrorKind::Transport,
            StageError::Busy { .. } => ErrorKind::Busy,
        }
    }
}

fn join_missing(missing: &[MissingSlice]) -> String {
    missing
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
