use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::{HistoryId, JobId, UserId};

#[derive(Debug, Error, Diagnostic)]
pub enum ImpExpError {
    #[error("missing config file imp-exp.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("history not found: {0}")]
    HistoryNotFound(HistoryId),

    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("more than one history import record for job {0}")]
    DuplicateImportRecord(JobId),

    #[error("session state is unusable: {0}")]
    Session(String),

    #[error("failed to change ownership of {path} ({reason}): {message}")]
    ChownFailed {
        path: PathBuf,
        reason: String,
        message: String,
    },

    #[error("invalid archive attributes in {file}: {message}")]
    ArchiveAttributes { file: String, message: String },

    #[error("file missing from archive: {0}")]
    MissingArchiveFile(PathBuf),

    #[error("invalid archive type: {0}")]
    InvalidArchiveType(String),

    #[error("download request failed: {0}")]
    Http(String),

    #[error("download returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("download exceeds maximum size of {max} bytes")]
    TooLarge { max: u64 },

    #[error("invalid base64 argument: {0}")]
    InvalidEncoding(String),

    #[error("file sources path [{0}] does not exist")]
    MissingFileSources(PathBuf),

    #[error("invalid file sources: {0}")]
    FileSources(String),

    #[error("export task failed: {0}")]
    TaskQueue(String),
}
