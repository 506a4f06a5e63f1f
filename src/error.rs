use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("output unwritable: {0}")]
    OutputUnwritable(String),

    #[error("detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    #[inline]
    pub fn detector<E: std::fmt::Display>(err: E) -> Self {
        Error::DetectorUnavailable(err.to_string())
    }
}
