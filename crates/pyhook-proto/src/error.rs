/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O error on the underlying transport.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Disconnected,

    /// A command tag that no request is registered for.
    #[error("unknown command tag {0:?}")]
    UnknownCommand([u8; 4]),

    /// A string field holding bytes that are not valid UTF-8.
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),

    /// A string type tag other than `A`, `U` or `N`.
    #[error("invalid string tag {0:#x}")]
    InvalidStringTag(u8),

    /// A length prefix that cannot describe a payload.
    #[error("invalid length prefix: {0}")]
    InvalidLength(i32),

    /// The channel is detached, no frame can be sent.
    #[error("channel is detached")]
    Detached,
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
