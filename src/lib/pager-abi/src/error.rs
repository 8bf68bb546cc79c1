//! Error kinds shared by every pager surface. The rich [PagerError] type is
//! what service code propagates; the flat [ErrorCode] is what crosses a queue
//! inside an `Err` completion.

use thiserror::Error;

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PagerError {
    #[error("no such object or range")]
    NotFound,
    #[error("malformed offset or length")]
    InvalidRange,
    #[error("no free pages available")]
    OutOfMemory,
    #[error("cyclic or overlapping copy-chain resolution")]
    CopyConflict,
    #[error("storage read or write failed")]
    StorageIo,
    #[error("malformed or duplicate protocol message")]
    Protocol,
}

/// Wire representation of [PagerError].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    NotFound = 1,
    InvalidRange = 2,
    OutOfMemory = 3,
    CopyConflict = 4,
    StorageIo = 5,
    #[default]
    Protocol = 6,
}

impl From<PagerError> for ErrorCode {
    fn from(err: PagerError) -> Self {
        match err {
            PagerError::NotFound => ErrorCode::NotFound,
            PagerError::InvalidRange => ErrorCode::InvalidRange,
            PagerError::OutOfMemory => ErrorCode::OutOfMemory,
            PagerError::CopyConflict => ErrorCode::CopyConflict,
            PagerError::StorageIo => ErrorCode::StorageIo,
            PagerError::Protocol => ErrorCode::Protocol,
        }
    }
}

impl From<ErrorCode> for PagerError {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NotFound => PagerError::NotFound,
            ErrorCode::InvalidRange => PagerError::InvalidRange,
            ErrorCode::OutOfMemory => PagerError::OutOfMemory,
            ErrorCode::CopyConflict => PagerError::CopyConflict,
            ErrorCode::StorageIo => PagerError::StorageIo,
            ErrorCode::Protocol => PagerError::Protocol,
        }
    }
}

/// Shorthand used throughout the pager crates.
pub type Result<T, E = PagerError> = core::result::Result<T, E>;
