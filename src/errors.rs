use std::path::PathBuf;

use thiserror::Error;
use unseal_macho::PatchError;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bundle error: {0}")]
    Bundle(String),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error("No live image for {} ({candidates} candidates)", path.display())]
    MissingLiveModule { path: PathBuf, candidates: usize },

    #[error("Cannot read live image {} for {}: {source}", image.display(), path.display())]
    UnreadableLiveModule {
        path: PathBuf,
        image: PathBuf,
        source: std::io::Error,
    },

    #[error("Packaging error: {0}")]
    Package(#[from] zip::result::ZipError),
}

impl AppError {
    /// Whether the run has to stop instead of moving on to the next binary
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Patch(e) => e.is_fatal(),
            AppError::Io(_) | AppError::Package(_) | AppError::Config(_) | AppError::Bundle(_) => {
                true
            }
            AppError::MissingLiveModule { .. } | AppError::UnreadableLiveModule { .. } => false,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
