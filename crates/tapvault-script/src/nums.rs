//! Provably-unspendable internal keys.
//!
//! When a vault has no emergency key path, the Taproot internal key must not
//! be spendable by anyone. We start from the BIP-341 NUMS point (whose
//! discrete log is unknown by construction) and add a tweak derived from the
//! vault's metadata, so each vault gets a distinct internal key whose
//! unspendability anyone can re-verify from public data.

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::key::XOnlyPublicKey;
use bitcoin::secp256k1::Scalar;

use tapvault_core::{secp, Error};

/// The BIP-341 NUMS point, `lift_x(H(G))`.
pub const NUMS_POINT: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a,
    0x5e, 0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80,
    0x3a, 0xc0,
];

/// Domain tag binding the internal-key tweak to the metadata record.
const NUMS_TWEAK_TAG: &[u8] = b"TapVault/nums";

/// BIP-340 style tagged hash: `SHA256(SHA256(tag) || SHA256(tag) || msg)`.
pub fn tagged_hash(tag: &[u8], msg: &[u8]) -> [u8; 32] {
    let tag_hash = sha256::Hash::hash(tag);
    let mut engine = sha256::Hash::engine();
    engine.input(tag_hash.as_byte_array());
    engine.input(tag_hash.as_byte_array());
    engine.input(msg);
    sha256::Hash::from_engine(engine).to_byte_array()
}

/// Derive the unspendable internal key for a vault: `NUMS + H(metadata)·G`.
///
/// The tweak is a public hash of the encoded metadata, so the derivation is
/// deterministic and the key provably has no known discrete log.
pub fn unspendable_internal_key(metadata_bytes: &[u8]) -> Result<XOnlyPublicKey, Error> {
    let nums = XOnlyPublicKey::from_slice(&NUMS_POINT)
        .map_err(|e| Error::KeyDerivationFailed(format!("NUMS point rejected: {}", e)))?;

    let salt = tagged_hash(NUMS_TWEAK_TAG, metadata_bytes);
    let tweak = Scalar::from_be_bytes(salt)
        .map_err(|e| Error::KeyDerivationFailed(format!("metadata tweak out of range: {}", e)))?;

    let (tweaked, _parity) = nums
        .add_tweak(secp(), &tweak)
        .map_err(|e| Error::KeyDerivationFailed(format!("NUMS tweak failed: {}", e)))?;

    Ok(tweaked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nums_point_is_valid() {
        assert!(XOnlyPublicKey::from_slice(&NUMS_POINT).is_ok());
    }

    #[test]
    fn test_internal_key_deterministic() {
        let k1 = unspendable_internal_key(b"metadata").unwrap();
        let k2 = unspendable_internal_key(b"metadata").unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_distinct_metadata_distinct_keys() {
        let k1 = unspendable_internal_key(b"vault-0").unwrap();
        let k2 = unspendable_internal_key(b"vault-1").unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_tweaked_key_differs_from_nums() {
        let k = unspendable_internal_key(b"anything").unwrap();
        assert_ne!(k.serialize(), NUMS_POINT);
    }

    #[test]
    fn test_tagged_hash_domain_separation() {
        assert_ne!(tagged_hash(b"tag-a", b"msg"), tagged_hash(b"tag-b", b"msg"));
        assert_ne!(tagged_hash(b"tag", b"msg-a"), tagged_hash(b"tag", b"msg-b"));
    }
}
