//! I/O and paging error types.

use thiserror::Error;

/// Result type for paging operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Paging and workspace error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error outside of block paging.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading or writing a block from a backing store failed.
    #[error("storage I/O error on block {block}: {source}")]
    Storage {
        block: usize,
        source: std::io::Error,
    },

    /// Invalid file layout or content.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// Malformed arguments such as zero-sized dimensions.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Spectrum or row index outside the valid range.
    #[error("index {index} out of range (length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// A block that should be resident after loading is missing.
    #[error("block {0} is not resident")]
    NotResident(usize),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] histpage_core::Error),
}

impl Error {
    /// Attributes a raw I/O failure to the block being paged.
    pub(crate) fn for_block(self, block: usize) -> Self {
        match self {
            Self::Io(source) => Self::Storage { block, source },
            other => other,
        }
    }
}
