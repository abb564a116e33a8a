use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search engine error: {0}")]
    Engine(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("structural violation: {0}")]
    Structural(String),

    #[error("corrupt taxonomy: {0}")]
    Taxonomy(String),

    #[error("failed to close {} resource(s): {}", .0.len(), join_errors(.0))]
    Close(Vec<Error>),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

/// Coarse classification of an [`Error`], as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Storage could not be reached, read or written.
    Io,
    /// Invalid arguments or configuration, rejected up front.
    Config,
    /// A programming error such as a cycle in a navigation tree.
    Structural,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Engine(_)
            | Error::Taxonomy(_)
            | Error::DataDir(_) => ErrorKind::Io,
            Error::Json(_) | Error::Config(_) => ErrorKind::Config,
            Error::Structural(_) => ErrorKind::Structural,
            Error::Close(errors) => errors
                .first()
                .map(Error::kind)
                .unwrap_or(ErrorKind::Io),
        }
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
