/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A wire protocol error occurred.
    #[error(transparent)]
    Proto(#[from] pyhook_proto::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The controller could not be reached.
    #[error("failed to attach to 127.0.0.1:{port} after {attempts} attempts")]
    AttachFailed {
        /// Controller port.
        port: u16,
        /// Number of connection attempts made.
        attempts: u32,
    },

    /// The debugger is already connected to a controller.
    #[error("debugger already attached")]
    AlreadyAttached,

    /// The calling thread has no tracer.
    #[error("current thread is not traced")]
    ThreadNotTraced,
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
