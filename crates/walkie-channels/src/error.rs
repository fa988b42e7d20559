use thiserror::Error;

/// Errors produced by membership operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No channel with the given code exists.
    #[error("canal no encontrado: {0}")]
    ChannelNotFound(String),

    /// No user with the given id exists.
    #[error("usuario no encontrado: {0}")]
    UserNotFound(i64),

    /// The channel is at capacity.
    #[error("canal lleno: {0}")]
    ChannelFull(String),

    /// The underlying SQLite operation failed.
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}
