//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the classification pipeline.
///
/// `Configuration` is always raised before any processing starts.
/// `InputData` is only returned when filtering leaves nothing usable; single
/// bad records are skipped with a warning and counted in the run summary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("input data error: {0}")]
    InputData(String),

    #[error("external service `{service}` failed: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("failed to write {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("run cancelled before stage `{0}`")]
    Cancelled(&'static str),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn input(msg: impl Into<String>) -> Self {
        Error::InputData(msg.into())
    }

    pub(crate) fn service(service: &'static str, msg: impl Into<String>) -> Self {
        Error::ExternalService {
            service,
            message: msg.into(),
        }
    }

    pub(crate) fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Persistence {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
