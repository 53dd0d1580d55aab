//! Error taxonomy for all TapVault operations.
//!
//! Every failure is a value of this one enum, and every variant carries a
//! stable numeric code for the foreign boundary. Messages never contain raw
//! key material.

use bitcoin::Network;
use thiserror::Error;

/// Unified error type for the vault engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid xpub: {0}")]
    InvalidXpub(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("network mismatch: expected {expected}, got {found}")]
    NetworkMismatch { expected: Network, found: String },

    #[error("PSBT build failed: {0}")]
    PsbtBuildFailed(String),

    #[error("insufficient funds: need {needed} sat, have {available} sat")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("output of {value} sat is below the {limit} sat dust limit")]
    DustOutput { value: u64, limit: u64 },

    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("metadata decode failed: {0}")]
    MetadataDecodeFailed(String),

    #[error("metadata too long: {len} bytes (max {max})")]
    MetadataEncodeTooLong { len: usize, max: usize },

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transient adapter error: {0}")]
    AdapterTransient(String),

    #[error("permanent adapter error: {0}")]
    AdapterPermanent(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Stable numeric code carried across the foreign boundary.
    pub fn code(&self) -> u16 {
        match self {
            Error::InvalidXpub(_) => 1001,
            Error::InvalidAddress(_) => 1002,
            Error::NetworkMismatch { .. } => 1003,
            Error::PsbtBuildFailed(_) => 2001,
            Error::InsufficientFunds { .. } => 2002,
            Error::PolicyViolation(_) => 2003,
            Error::DustOutput { .. } => 2004,
            Error::KeyDerivationFailed(_) => 3001,
            Error::MetadataDecodeFailed(_) => 3002,
            Error::MetadataEncodeTooLong { .. } => 3003,
            Error::SerializationError(_) => 4001,
            Error::InvalidInput(_) => 4002,
            Error::AdapterTransient(_) => 5001,
            Error::AdapterPermanent(_) => 5002,
            Error::Cancelled => 5003,
        }
    }

    /// Machine-readable kind name, matching the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidXpub(_) => "InvalidXpub",
            Error::InvalidAddress(_) => "InvalidAddress",
            Error::NetworkMismatch { .. } => "NetworkMismatch",
            Error::PsbtBuildFailed(_) => "PsbtBuildFailed",
            Error::InsufficientFunds { .. } => "InsufficientFunds",
            Error::PolicyViolation(_) => "PolicyViolation",
            Error::DustOutput { .. } => "DustOutput",
            Error::KeyDerivationFailed(_) => "KeyDerivationFailed",
            Error::MetadataDecodeFailed(_) => "MetadataDecodeFailed",
            Error::MetadataEncodeTooLong { .. } => "MetadataEncodeTooLong",
            Error::SerializationError(_) => "SerializationError",
            Error::InvalidInput(_) => "InvalidInput",
            Error::AdapterTransient(_) => "AdapterTransient",
            Error::AdapterPermanent(_) => "AdapterPermanent",
            Error::Cancelled => "Cancelled",
        }
    }

    /// Whether the scanner may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AdapterTransient(_))
    }
}
