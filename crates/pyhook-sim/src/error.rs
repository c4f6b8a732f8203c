/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The source code is not valid.
    #[error("{filename}:{line}: {message}")]
    Syntax {
        /// Source filename.
        filename: String,
        /// Line of the error.
        line: i32,
        /// Error description.
        message: String,
    },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
