//! Unsigned PSBT construction for the three vault spend flavors.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bitcoin::absolute::LockTime;
use bitcoin::psbt::Psbt;
use bitcoin::taproot::LeafVersion;
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use tapvault_core::types::{SpendIntent, SpendPath, Utxo, VaultConfig, VaultPolicy};
use tapvault_core::Error;
use tapvault_script::taproot::{vault_output_from_config, VaultOutput};

use crate::fees;
use crate::verify::verify_psbt_policy;

/// nSequence for emergency inputs: BIP-68 enforcement disabled.
pub const EMERGENCY_SEQUENCE: Sequence = Sequence(0xFFFF_FFFE);

/// Human-auditable description of a built spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendSummary {
    pub vault_id: String,
    pub from_address: String,
    pub to_address: String,
    /// Value delivered to the destination, in sats.
    pub amount_sats: u64,
    pub fee_sats: u64,
    pub fee_rate: u64,
    pub path: SpendPath,
    pub delay_blocks: Option<u16>,
    pub estimated_unlock_height: Option<u32>,
}

/// A built PSBT plus its audit summary and self-check verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PsbtData {
    pub psbt_base64: String,
    pub summary: SpendSummary,
    pub is_valid: bool,
    pub warnings: Vec<String>,
}

/// Build a script-path spend through the CSV-delayed leaf.
///
/// Every input's nSequence carries the vault delay in BIP-68 block units, so
/// the transaction is only valid once each spent UTXO has aged past the
/// delay.
pub fn build_delayed_spend_psbt(
    vault: &VaultConfig,
    intent: &SpendIntent,
    utxos: &[Utxo],
    policy: &VaultPolicy,
) -> Result<PsbtData, Error> {
    if intent.path != SpendPath::Delayed {
        return Err(Error::InvalidInput(
            "intent path must be delayed for a delayed spend".into(),
        ));
    }
    if intent.vault_id != vault.id {
        return Err(Error::InvalidInput(format!(
            "intent targets vault {} but config is vault {}",
            intent.vault_id, vault.id
        )));
    }

    build_spend(
        vault,
        &intent.destination,
        intent.amount_sats,
        intent.fee_rate,
        SpendPath::Delayed,
        utxos,
        policy,
    )
}

/// Build a key-path sweep through the emergency internal key.
///
/// Always sweeps: emergencies move everything. Fails with
/// [`Error::PolicyViolation`] when the vault has no emergency key path.
pub fn build_emergency_psbt(
    vault: &VaultConfig,
    destination: &str,
    fee_rate: u64,
    utxos: &[Utxo],
    policy: &VaultPolicy,
) -> Result<PsbtData, Error> {
    build_spend(
        vault,
        destination,
        None,
        fee_rate,
        SpendPath::Emergency,
        utxos,
        policy,
    )
}

/// Build the replacement for an in-flight spend: an emergency sweep to an
/// owner-held destination that strictly outbids the original fee rate.
pub fn build_cancel_psbt(
    vault: &VaultConfig,
    original_txid: &str,
    original_fee_rate: u64,
    destination: &str,
    fee_rate: u64,
    utxos: &[Utxo],
    policy: &VaultPolicy,
) -> Result<PsbtData, Error> {
    Txid::from_str(original_txid)
        .map_err(|e| Error::InvalidInput(format!("bad original txid: {}", e)))?;

    if fee_rate <= original_fee_rate {
        return Err(Error::PolicyViolation(format!(
            "replacement rate of {} sat/vB does not outbid the original {} sat/vB",
            fee_rate, original_fee_rate
        )));
    }

    build_spend(
        vault,
        destination,
        None,
        fee_rate,
        SpendPath::Emergency,
        utxos,
        policy,
    )
}

/// Oldest-first, fully deterministic: (height, txid, vout), unconfirmed last.
fn selection_order(utxos: &[Utxo]) -> Vec<&Utxo> {
    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    sorted.sort_by_key(|u| (u.block_height.unwrap_or(u32::MAX), u.txid, u.vout));
    sorted
}

fn build_spend(
    vault: &VaultConfig,
    destination: &str,
    amount_sats: Option<u64>,
    fee_rate: u64,
    path: SpendPath,
    utxos: &[Utxo],
    policy: &VaultPolicy,
) -> Result<PsbtData, Error> {
    if fee_rate < policy.min_fee_rate || fee_rate > policy.max_fee_rate {
        return Err(Error::PolicyViolation(format!(
            "fee rate {} sat/vB outside the accepted band {}..={}",
            fee_rate, policy.min_fee_rate, policy.max_fee_rate
        )));
    }
    if amount_sats == Some(0) {
        return Err(Error::InvalidInput("amount must be positive".into()));
    }

    let output = vault_output_from_config(vault)?;

    if path == SpendPath::Emergency && !output.emergency_key_path {
        return Err(Error::PolicyViolation(
            "vault has no emergency key path".into(),
        ));
    }

    let vault_spk = output.script_pubkey();
    for utxo in utxos {
        utxo.validate()?;
        if utxo.script_pubkey != vault_spk {
            return Err(Error::PolicyViolation(format!(
                "utxo {}:{} does not belong to this vault",
                utxo.txid, utxo.vout
            )));
        }
    }

    let dest = Address::from_str(destination)
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", destination, e)))?
        .require_network(vault.network)
        .map_err(|_| Error::NetworkMismatch {
            expected: vault.network,
            found: format!("address {}", destination),
        })?;

    let spend_script_len = output.spend_script.len();
    let available: u64 = utxos.iter().map(|u| u.value_sats).sum();
    let sorted = selection_order(utxos);

    // Coin selection. Sweep takes everything; a targeted amount accumulates
    // oldest-first until the selection covers amount + fee at its own size.
    let selected: Vec<&Utxo> = match amount_sats {
        None => {
            let fee = fees::fee_for(
                fees::estimate_vsize(sorted.len(), path, spend_script_len),
                fee_rate,
            );
            if available <= fee || sorted.is_empty() {
                return Err(Error::InsufficientFunds {
                    needed: fee + policy.dust_limit_sats,
                    available,
                });
            }
            sorted
        }
        Some(amount) => {
            let mut picked = Vec::new();
            let mut sum = 0u64;
            let mut covered = false;
            for utxo in sorted {
                picked.push(utxo);
                sum += utxo.value_sats;
                let fee = fees::fee_for(
                    fees::estimate_vsize(picked.len(), path, spend_script_len),
                    fee_rate,
                );
                if sum >= amount.saturating_add(fee) {
                    covered = true;
                    break;
                }
            }
            if !covered {
                let fee_upper_bound = fees::fee_for(
                    fees::estimate_vsize(utxos.len().max(1), path, spend_script_len),
                    fee_rate,
                );
                return Err(Error::InsufficientFunds {
                    needed: amount.saturating_add(fee_upper_bound),
                    available,
                });
            }
            picked
        }
    };

    let selected_sum: u64 = selected.iter().map(|u| u.value_sats).sum();
    let vsize = fees::estimate_vsize(selected.len(), path, spend_script_len);
    let fee = fees::fee_for(vsize, fee_rate);

    // The vault makes no change: the single output takes everything selected,
    // net of fee.
    let output_value = selected_sum - fee;
    if output_value < policy.dust_limit_sats {
        return Err(Error::DustOutput {
            value: output_value,
            limit: policy.dust_limit_sats,
        });
    }

    let delay = vault.delay_blocks();
    let sequence = match path {
        SpendPath::Delayed => Sequence::from_height(delay),
        SpendPath::Emergency => EMERGENCY_SEQUENCE,
    };

    let inputs: Vec<TxIn> = selected
        .iter()
        .map(|utxo| TxIn {
            previous_output: utxo.outpoint(),
            script_sig: bitcoin::ScriptBuf::new(),
            sequence,
            witness: Witness::new(),
        })
        .collect();

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: vec![TxOut {
            value: Amount::from_sat(output_value),
            script_pubkey: dest.script_pubkey(),
        }],
    };

    let mut psbt = Psbt::from_unsigned_tx(tx)
        .map_err(|e| Error::PsbtBuildFailed(format!("PSBT creation failed: {}", e)))?;

    annotate_inputs(&mut psbt, &output, &selected, path)?;

    let psbt_base64 = BASE64.encode(psbt.serialize());

    let estimated_unlock_height = match path {
        SpendPath::Delayed => selected
            .iter()
            .filter_map(|u| u.block_height)
            .max()
            .map(|h| h + delay as u32),
        SpendPath::Emergency => None,
    };

    let summary = SpendSummary {
        vault_id: vault.id.clone(),
        from_address: vault.address.clone(),
        to_address: dest.to_string(),
        amount_sats: output_value,
        fee_sats: fee,
        fee_rate,
        path,
        delay_blocks: match path {
            SpendPath::Delayed => Some(delay),
            SpendPath::Emergency => None,
        },
        estimated_unlock_height,
    };

    // Self-check: every PSBT we hand out must pass our own policy gate.
    let report = verify_psbt_policy(&psbt_base64, vault, policy)?;

    Ok(PsbtData {
        psbt_base64,
        summary,
        is_valid: report.valid,
        warnings: report.warnings,
    })
}

/// Attach the per-input Taproot annotations an external signer needs.
fn annotate_inputs(
    psbt: &mut Psbt,
    output: &VaultOutput,
    selected: &[&Utxo],
    path: SpendPath,
) -> Result<(), Error> {
    let merkle_root = output.spend_info.merkle_root();

    for (i, utxo) in selected.iter().enumerate() {
        let input = &mut psbt.inputs[i];

        input.witness_utxo = Some(TxOut {
            value: utxo.value(),
            script_pubkey: utxo.script_pubkey.clone(),
        });

        match path {
            SpendPath::Delayed => {
                let control_block = output.control_block()?;
                input.tap_scripts.insert(
                    control_block,
                    (output.spend_script.clone(), LeafVersion::TapScript),
                );
                input.tap_internal_key = Some(output.internal_key);
                input.tap_merkle_root = merkle_root;
            }
            SpendPath::Emergency => {
                input.tap_internal_key = Some(output.internal_key);
                input.tap_merkle_root = merkle_root;
            }
        }
    }

    Ok(())
}
