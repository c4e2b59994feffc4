//! Error taxonomy for the sync core.
//!
//! Transient network failures never appear here from the caller's point of
//! view; they surface as status changes. Only authentication rejections and
//! precondition violations (unknown record ids) propagate to calling code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("local store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("document error: {0}")]
    Doc(#[from] automerge::AutomergeError),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Terminal for the current attempt; never silently retried.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    #[error("invite code invalid or already used")]
    InvalidInvite,

    #[error("unknown record id: {0}")]
    UnknownRecord(String),

    #[error("chore rotation requires a non-empty roster")]
    EmptyRoster,
}

pub type Result<T> = std::result::Result<T, Error>;
