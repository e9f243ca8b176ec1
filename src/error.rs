//! Error types for vault operations.

use thiserror::Error;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    /// No salt has been persisted yet, so no key can be derived.
    #[error("no credentials configured for this vault")]
    InvalidCredentials,

    /// A password failed verification against the stored verifier
    /// or a backup's verification token.
    #[error("wrong password")]
    WrongPassword,

    /// A backup manifest declared a version this codec does not handle.
    #[error("unsupported backup version: {0}")]
    UnsupportedVersion(u32),

    /// An operation needed the vault key but the vault is locked.
    #[error("vault is locked")]
    LockedVault,

    /// A cached key session is already active.
    #[error("another cached key session is already active")]
    SessionActive,

    /// The blob bytes are not validly encrypted under the resolved key.
    /// Recoverable: batch engines count this per entry and continue.
    #[error("data is not encrypted under the resolved key")]
    WrongKey,

    /// An entry name does not follow the blob naming grammar.
    #[error("invalid blob name: {0}")]
    BadBlobName(String),

    /// Malformed blob header, chunk framing, or archive structure.
    #[error("corrupted data: {0}")]
    Corrupted(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("vault already exists at {0}")]
    AlreadyExists(String),

    #[error("vault not found at {0}")]
    NotFound(String),

    #[error("unknown media: {0}")]
    UnknownMedia(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
