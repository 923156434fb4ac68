/// Crate-wide result type for broker operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Amqp(#[from] amqprs::error::Error),

    /// The network link under an established connection failed.
    #[error("broker connection lost")]
    ConnectionLost,
}
