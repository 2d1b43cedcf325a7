use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("Empty message id")]
    Empty,

    #[error("Invalid provisional id: {0}")]
    InvalidProvisional(String),

    #[error("Empty user id")]
    EmptyUser,
}
