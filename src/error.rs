use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("a reply is still streaming")]
    Busy,

    #[error("message is empty")]
    EmptyInput,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream model error: {0}")]
    Upstream(String),

    #[error("context document error: {0}")]
    Document(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}
