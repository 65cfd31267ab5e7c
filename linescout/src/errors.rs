use thiserror::Error;

pub type Result<T> = std::result::Result<T, GrepError>;

#[derive(Debug, Error)]
pub enum GrepError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Pattern(String),

    #[error("{0}")]
    Config(String),

    #[error("input is too large to count")]
    Overflow,
}

impl GrepError {
    pub fn pattern(msg: impl Into<String>) -> Self {
        GrepError::Pattern(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        GrepError::Config(msg.into())
    }
}
