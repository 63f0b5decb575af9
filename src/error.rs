use thiserror::Error;

/// Errors raised while building an allocator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to reserve {pages} pages of address space")]
    Reserve {
        pages: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("alignment {align} is not a power of two")]
    InvalidAlignment { align: usize },

    #[error("{what} must not be zero")]
    ZeroSized { what: &'static str },

    #[error("blocks of {size} bytes can't be cached, at least {min} bytes are needed")]
    BlockTooSmall { size: usize, min: usize },
}

/// Errors returned by the non-`try` allocation entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("out of memory while allocating {size} bytes aligned to {align}")]
    OutOfMemory { size: usize, align: usize },

    #[error("alignment {align} is not a power of two")]
    InvalidAlignment { align: usize },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
