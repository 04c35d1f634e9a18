//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// Composite id is not of the form `chainId:tokenId`.
    #[error("Invalid composite id: {0} (expected `chainId:tokenId`)")]
    InvalidCompositeId(String),

    /// Chain id is zero or not a number.
    #[error("Invalid chain id: {0}")]
    InvalidChainId(String),

    /// Token id is not a valid uint256.
    #[error("Invalid token id: {0}")]
    InvalidTokenId(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
