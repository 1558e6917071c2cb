//! Errors the store layer reports upward.
use thiserror::Error;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("no such session")]
    NoSuchSession,

    #[error("randomness source failure: {0}")]
    Random(String),

    #[error("store backend error: {0}")]
    Backend(String),
}
