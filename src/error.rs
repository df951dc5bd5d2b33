//! Typed errors returned at the library's API boundaries.
//!
//! Most fallible code in this crate returns [`anyhow::Result`]. The errors here are the ones a
//! caller may want to match on.

use thiserror::Error;

use crate::image::PixelFormat;
use crate::resolution::Resolution;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A caller passed data of the wrong shape (eg. a landmark list of the wrong length).
    InvalidInput,
    /// A pixel buffer does not match its declared resolution and format.
    InvalidFrame,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid input: expected {expected} landmarks, got {actual}")]
    InvalidInput { expected: usize, actual: usize },

    #[error("{format:?} frame at {resolution} needs {expected} bytes, got {actual}")]
    FrameSize {
        format: PixelFormat,
        resolution: Resolution,
        expected: usize,
        actual: usize,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput { .. } => ErrorKind::InvalidInput,
            Error::FrameSize { .. } => ErrorKind::InvalidFrame,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
