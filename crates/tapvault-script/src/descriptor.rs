//! Output descriptor serialization for vault outputs.
//!
//! The metadata leaf is an `OP_RETURN` script, which miniscript cannot
//! express, so the descriptor uses Bitcoin Core's `raw()` leaf notation:
//!
//! ```text
//! tr(INTERNAL_KEY,{raw(SPEND_LEAF_HEX),raw(META_LEAF_HEX)})#checksum
//! ```
//!
//! The 8-character checksum is the standard BIP-380 descriptor checksum,
//! computed and verified through miniscript. [`parse_descriptor`] is the
//! strict inverse of [`encode_descriptor`]; every emitted descriptor
//! round-trips.

use bitcoin::key::XOnlyPublicKey;
use bitcoin::taproot::{TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, ScriptBuf};
use miniscript::descriptor::checksum::desc_checksum;
use std::str::FromStr;

use tapvault_core::{secp, Error, VaultMetadata};

use crate::leaves::decode_metadata_script;

/// Serialize a vault descriptor with its checksum.
pub fn encode_descriptor(
    internal_key: &XOnlyPublicKey,
    spend_script: &ScriptBuf,
    metadata_script: &ScriptBuf,
) -> Result<String, Error> {
    let body = format!(
        "tr({},{{raw({}),raw({})}})",
        internal_key,
        spend_script.to_hex_string(),
        metadata_script.to_hex_string(),
    );
    let checksum =
        desc_checksum(&body).map_err(|e| Error::SerializationError(e.to_string()))?;
    Ok(format!("{}#{}", body, checksum))
}

/// A parsed vault descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDescriptor {
    pub internal_key: XOnlyPublicKey,
    pub spend_script: ScriptBuf,
    pub metadata_script: ScriptBuf,
}

impl ParsedDescriptor {
    /// Rebuild the Taproot commitment this descriptor encodes.
    pub fn spend_info(&self) -> Result<TaprootSpendInfo, Error> {
        TaprootBuilder::new()
            .add_leaf(1, self.spend_script.clone())
            .and_then(|b| b.add_leaf(1, self.metadata_script.clone()))
            .map_err(|e| Error::SerializationError(format!("taproot leaf insertion: {}", e)))?
            .finalize(secp(), self.internal_key)
            .map_err(|_| Error::SerializationError("taproot tree finalization failed".into()))
    }

    /// Derive the P2TR address for this descriptor on `network`.
    pub fn address(&self, network: Network) -> Result<Address, Error> {
        let spend_info = self.spend_info()?;
        Ok(Address::p2tr_tweaked(spend_info.output_key(), network))
    }

    /// Decode the committed metadata record.
    pub fn metadata(&self) -> Result<VaultMetadata, Error> {
        decode_metadata_script(&self.metadata_script)
    }
}

/// Parse a descriptor produced by [`encode_descriptor`], verifying the
/// checksum.
pub fn parse_descriptor(descriptor: &str) -> Result<ParsedDescriptor, Error> {
    let (body, checksum) = descriptor
        .split_once('#')
        .ok_or_else(|| Error::SerializationError("descriptor is missing its checksum".into()))?;

    let expected =
        desc_checksum(body).map_err(|e| Error::SerializationError(e.to_string()))?;
    if checksum != expected {
        return Err(Error::SerializationError(format!(
            "descriptor checksum mismatch: expected {}, got {}",
            expected, checksum
        )));
    }

    let inner = body
        .strip_prefix("tr(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| Error::SerializationError("descriptor is not a tr() form".into()))?;

    let (key_part, tree_part) = inner
        .split_once(',')
        .ok_or_else(|| Error::SerializationError("tr() descriptor has no script tree".into()))?;

    let internal_key = XOnlyPublicKey::from_str(key_part)
        .map_err(|e| Error::SerializationError(format!("bad internal key: {}", e)))?;

    let tree = tree_part
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| Error::SerializationError("script tree is not brace-delimited".into()))?;

    let (first, second) = tree
        .split_once(',')
        .ok_or_else(|| Error::SerializationError("script tree must carry two leaves".into()))?;

    let spend_script = parse_raw_leaf(first)?;
    let metadata_script = parse_raw_leaf(second)?;

    Ok(ParsedDescriptor {
        internal_key,
        spend_script,
        metadata_script,
    })
}

fn parse_raw_leaf(leaf: &str) -> Result<ScriptBuf, Error> {
    let hex = leaf
        .strip_prefix("raw(")
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| Error::SerializationError(format!("leaf {:?} is not raw()", leaf)))?;
    ScriptBuf::from_hex(hex)
        .map_err(|e| Error::SerializationError(format!("bad leaf script hex: {}", e)))
}
