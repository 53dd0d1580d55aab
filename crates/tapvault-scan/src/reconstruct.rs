//! Rebuilding vault configurations from on-chain data.
//!
//! The proof obligation is always the same: whatever source the metadata
//! came from, re-deriving the Taproot output from it must reproduce the
//! address observed on-chain.

use bitcoin::{Address, Network, Script};
use std::str::FromStr;

use tapvault_core::types::{Utxo, VaultConfig, VaultPolicy};
use tapvault_core::{derive_vault_key, parse_xpub, Error, VaultMetadata};
use tapvault_script::leaves::decode_metadata_script;
use tapvault_script::taproot::{assemble_vault_output, generate_vault_output, VaultOutput};

use crate::adapter::BlockchainAdapter;

/// The closed template set the scanner enumerates.
pub(crate) fn known_templates() -> [tapvault_core::types::VaultTemplate; 2] {
    [
        tapvault_core::types::VaultTemplate::savings(),
        tapvault_core::types::VaultTemplate::spending(),
    ]
}

/// Build the recovered [`VaultConfig`] for a derived output that matched
/// on-chain UTXOs.
pub(crate) fn config_for_found(
    output: VaultOutput,
    xpub: &str,
    network: Network,
    utxos: &[Utxo],
) -> Result<VaultConfig, Error> {
    let name = format!(
        "Recovered {} #{}",
        output.metadata.template_id, output.metadata.vault_index
    );
    let created_at_height = utxos.iter().filter_map(|u| u.block_height).min();

    let mut config = output.into_config(name, xpub, None, network)?;
    config.created_at_height = created_at_height;
    Ok(config)
}

/// Reconstruct a vault from an address known to hold funds, searching the
/// canonical template/index universe for the derivation that produces it.
///
/// Returns `Ok(None)` when the address is not a canonical vault of this
/// xpub within the policy's scan window.
pub fn reconstruct_vault(
    address: &str,
    utxos: &[Utxo],
    xpub: &str,
    network: Network,
    policy: &VaultPolicy,
) -> Result<Option<VaultConfig>, Error> {
    let target = Address::from_str(address)
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?
        .require_network(network)
        .map_err(|_| Error::NetworkMismatch {
            expected: network,
            found: format!("address {}", address),
        })?;

    // Validates the xpub once up front; derivation below cannot then fail
    // for format reasons.
    parse_xpub(xpub, network)?;

    for index in 0..policy.default_scan_count {
        for template in known_templates() {
            let output =
                generate_vault_output(xpub, None, &template, index, vec![], network, policy)?;
            if output.address == target {
                return Ok(Some(config_for_found(output, xpub, network, utxos)?));
            }
        }
    }

    Ok(None)
}

/// Like [`reconstruct_vault`], but falls back to the adapter's witness cache
/// when the address is outside the canonical universe (e.g. a vault created
/// with non-default destination indices). The metadata leaf recovered from
/// the witness must re-derive the observed address exactly.
pub fn reconstruct_vault_with_adapter<A: BlockchainAdapter + ?Sized>(
    adapter: &A,
    address: &str,
    utxos: &[Utxo],
    xpub: &str,
    network: Network,
    policy: &VaultPolicy,
) -> Result<Option<VaultConfig>, Error> {
    if let Some(config) = reconstruct_vault(address, utxos, xpub, network, policy)? {
        return Ok(Some(config));
    }

    for utxo in utxos {
        let stack = match adapter.get_tx_witness(&utxo.txid, utxo.vout) {
            Ok(Some(stack)) => stack,
            Ok(None) => continue,
            Err(err) => {
                log::debug!("witness lookup failed for {}:{}: {}", utxo.txid, utxo.vout, err);
                continue;
            }
        };

        let Some(metadata) = metadata_from_witness(&stack) else {
            continue;
        };

        let config = reconstruct_from_metadata(&metadata, address, utxos, xpub, network)?;
        return Ok(Some(config));
    }

    Ok(None)
}

/// Scan a witness stack for an element that decodes as a metadata leaf.
pub fn metadata_from_witness(stack: &[Vec<u8>]) -> Option<VaultMetadata> {
    stack
        .iter()
        .find_map(|element| decode_metadata_script(Script::from_bytes(element)).ok())
}

/// Assemble a config from an explicit metadata record, proving it derives
/// the observed address.
fn reconstruct_from_metadata(
    metadata: &VaultMetadata,
    address: &str,
    utxos: &[Utxo],
    xpub: &str,
    network: Network,
) -> Result<VaultConfig, Error> {
    let parsed = parse_xpub(xpub, network)?;
    let primary_key = derive_vault_key(&parsed, metadata.vault_index)?;

    let output = assemble_vault_output(&primary_key, None, metadata.clone(), network)?;
    if output.address.to_string() != address {
        return Err(Error::MetadataDecodeFailed(format!(
            "recovered metadata derives {} but the funds sit at {}",
            output.address, address
        )));
    }

    config_for_found(output, xpub, network, utxos)
}
