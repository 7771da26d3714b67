//! Error of iris_node

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("overlay error: {0}")]
    Core(#[from] iris_core::Error),

    #[error("invalid logging level: {0}")]
    InvalidLoggingLevel(String),

    #[error("seed file error: {0}")]
    SeedFile(#[from] std::io::Error),

    #[error("seed file parse error: {0}")]
    SeedParse(#[from] serde_json::Error),
}
