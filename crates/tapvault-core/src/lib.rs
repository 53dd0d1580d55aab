//! TapVault Core
//!
//! Shared types and key derivation for the TapVault vault engine.
//!
//! The core consumes extended public keys only: it never sees private key
//! material, never touches the network, and holds no state between calls.
//! Everything here is a value type handed to the caller, who owns
//! persistence.

pub mod error;
pub mod keys;
pub mod metadata;
pub mod types;

mod encoding;

pub use error::Error;
pub use keys::{derive_vault_key, parse_xpub, secp};
pub use metadata::{VaultMetadata, METADATA_VERSION};
pub use types::*;
