//! Key derivation from extended public keys.
//!
//! Vault keys are derived at the non-hardened path `0/<vault_index>` below
//! the account-level xpub. The canonical account path `m/86'/<coin>'/0'` is
//! assumed to have been derived by the hardware signer before export, since
//! hardened derivation from an xpub is impossible.

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::key::XOnlyPublicKey;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Network, NetworkKind};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::Error;

/// Canonical account-level derivation path performed by the signer (BIP-86).
pub const ACCOUNT_PATH_MAINNET: &str = "m/86'/0'/0'";

/// Account-level path for test networks (coin type 1).
pub const ACCOUNT_PATH_TESTNET: &str = "m/86'/1'/0'";

static SECP: OnceLock<Secp256k1<All>> = OnceLock::new();

/// Process-wide secp256k1 context, initialized on first use and immutable
/// thereafter.
pub fn secp() -> &'static Secp256k1<All> {
    SECP.get_or_init(Secp256k1::new)
}

/// Parse an extended public key and check it against the expected network.
///
/// Fails with [`Error::InvalidXpub`] on checksum, length or format problems
/// and with [`Error::NetworkMismatch`] when the version bytes belong to the
/// wrong network family (`xpub` vs `tpub`).
pub fn parse_xpub(s: &str, network: Network) -> Result<Xpub, Error> {
    let xpub = Xpub::from_str(s.trim()).map_err(|e| Error::InvalidXpub(e.to_string()))?;

    let expected = NetworkKind::from(network);
    if xpub.network != expected {
        let found = if xpub.network == NetworkKind::Main {
            "mainnet xpub"
        } else {
            "test-network tpub"
        };
        return Err(Error::NetworkMismatch {
            expected: network,
            found: found.to_string(),
        });
    }

    Ok(xpub)
}

/// Derive the x-only vault key at `0/<vault_index>`.
///
/// Same inputs always produce the same 32-byte key.
pub fn derive_vault_key(xpub: &Xpub, vault_index: u32) -> Result<XOnlyPublicKey, Error> {
    let path = [
        ChildNumber::from_normal_idx(0)
            .map_err(|e| Error::KeyDerivationFailed(e.to_string()))?,
        ChildNumber::from_normal_idx(vault_index)
            .map_err(|e| Error::KeyDerivationFailed(e.to_string()))?,
    ];

    let child = xpub
        .derive_pub(secp(), &path)
        .map_err(|e| Error::KeyDerivationFailed(e.to_string()))?;

    Ok(child.public_key.x_only_public_key().0)
}
