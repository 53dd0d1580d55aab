//! Offline policy verification of a (possibly signed) PSBT against its vault.
//!
//! Re-derives the vault's Taproot output from the config and proves the PSBT
//! spends it the way the policy says it must. Violations are collected as an
//! ordered error list; warnings never invalidate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bitcoin::absolute::LockTime;
use bitcoin::psbt::Psbt;
use bitcoin::taproot::LeafVersion;
use bitcoin::{Address, Sequence};
use serde::{Deserialize, Serialize};

use tapvault_core::types::{SpendPath, VaultConfig, VaultPolicy};
use tapvault_core::{secp, Error};
use tapvault_script::taproot::vault_output_from_config;

use crate::builder::EMERGENCY_SEQUENCE;
use crate::fees;

/// Outcome of a policy check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Check a PSBT against the vault's policy without touching the network.
pub fn verify_psbt_policy(
    psbt_base64: &str,
    vault: &VaultConfig,
    policy: &VaultPolicy,
) -> Result<PolicyReport, Error> {
    let bytes = BASE64
        .decode(psbt_base64)
        .map_err(|e| Error::SerializationError(format!("PSBT base64: {}", e)))?;
    let psbt = Psbt::deserialize(&bytes)
        .map_err(|e| Error::SerializationError(format!("PSBT decode: {}", e)))?;

    let output = vault_output_from_config(vault)?;
    let vault_spk = output.script_pubkey();

    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if psbt.inputs.is_empty() {
        errors.push("PSBT has no inputs".to_string());
    }

    if psbt.unsigned_tx.lock_time != LockTime::ZERO {
        errors.push(format!(
            "nLockTime is {}, vault spends use 0",
            psbt.unsigned_tx.lock_time
        ));
    }

    // Every input must spend the vault's own script pubkey.
    for (i, input) in psbt.inputs.iter().enumerate() {
        match &input.witness_utxo {
            None => errors.push(format!("input {} is missing its witness UTXO", i)),
            Some(txo) if txo.script_pubkey != vault_spk => {
                errors.push(format!("input {} does not spend this vault", i))
            }
            Some(_) => {}
        }
    }

    // Exactly one destination output on the declared network.
    if psbt.unsigned_tx.output.len() != 1 {
        errors.push(format!(
            "expected exactly one output, found {}",
            psbt.unsigned_tx.output.len()
        ));
    } else {
        let txo = &psbt.unsigned_tx.output[0];
        if Address::from_script(&txo.script_pubkey, vault.network).is_err() {
            errors.push(format!(
                "output is not a valid {} address",
                vault.network
            ));
        }
    }

    // Infer the spending path from the annotations: a revealed tapscript leaf
    // means script-path, a bare internal key means key-path.
    let script_path_inputs = psbt
        .inputs
        .iter()
        .filter(|input| !input.tap_scripts.is_empty())
        .count();
    let path = if script_path_inputs == psbt.inputs.len() {
        Some(SpendPath::Delayed)
    } else if script_path_inputs == 0 && !psbt.inputs.is_empty() {
        Some(SpendPath::Emergency)
    } else {
        errors.push("inputs mix script-path and key-path annotations".to_string());
        None
    };

    match path {
        Some(SpendPath::Delayed) => {
            let expected_sequence = Sequence::from_height(vault.delay_blocks());
            let output_key = output.output_key();

            for (i, input) in psbt.inputs.iter().enumerate() {
                for (control_block, (script, leaf_version)) in &input.tap_scripts {
                    if *script != output.spend_script {
                        errors.push(format!(
                            "input {} reveals a leaf that is not this vault's spending leaf",
                            i
                        ));
                        continue;
                    }
                    if *leaf_version != LeafVersion::TapScript {
                        errors.push(format!(
                            "input {} uses leaf version {:?}, expected tapscript",
                            i, leaf_version
                        ));
                    }
                    if !control_block.verify_taproot_commitment(secp(), output_key, script) {
                        errors.push(format!(
                            "input {} control block does not commit to the vault output",
                            i
                        ));
                    }
                }
            }

            for (i, txin) in psbt.unsigned_tx.input.iter().enumerate() {
                if txin.sequence != expected_sequence {
                    errors.push(format!(
                        "input {} nSequence is {:#010x}, delayed spends require {} blocks",
                        i,
                        txin.sequence.0,
                        vault.delay_blocks()
                    ));
                }
            }
        }
        Some(SpendPath::Emergency) => {
            if !output.emergency_key_path {
                errors.push(
                    "key-path spend, but the vault's recovery type has no emergency key".to_string(),
                );
            }

            for (i, input) in psbt.inputs.iter().enumerate() {
                if input.tap_internal_key != Some(output.internal_key) {
                    errors.push(format!(
                        "input {} internal key does not match the emergency key",
                        i
                    ));
                }
            }

            for (i, txin) in psbt.unsigned_tx.input.iter().enumerate() {
                if txin.sequence != EMERGENCY_SEQUENCE {
                    errors.push(format!(
                        "input {} nSequence is {:#010x}, emergency spends use 0xfffffffe",
                        i, txin.sequence.0
                    ));
                }
            }
        }
        None => {}
    }

    // Fee-rate band, using the same conservative estimator the builder uses.
    if let Some(path) = path {
        let input_sum: u64 = psbt
            .inputs
            .iter()
            .filter_map(|input| input.witness_utxo.as_ref())
            .map(|txo| txo.value.to_sat())
            .sum();
        let output_sum: u64 = psbt
            .unsigned_tx
            .output
            .iter()
            .map(|txo| txo.value.to_sat())
            .sum();

        if input_sum < output_sum {
            errors.push("outputs exceed inputs".to_string());
        } else if !psbt.inputs.is_empty() {
            let fee = input_sum - output_sum;
            let vsize =
                fees::estimate_vsize(psbt.inputs.len(), path, output.spend_script.len()) as u64;
            let fee_rate = fee / vsize;

            if fee_rate < policy.min_fee_rate {
                errors.push(format!(
                    "fee rate of {} sat/vB is below the {} sat/vB minimum",
                    fee_rate, policy.min_fee_rate
                ));
            } else if fee_rate > policy.max_fee_rate {
                errors.push(format!(
                    "fee rate of {} sat/vB exceeds the {} sat/vB maximum",
                    fee_rate, policy.max_fee_rate
                ));
            } else if fee_rate > policy.warn_fee_rate {
                warnings.push(format!(
                    "unusually high fee rate: {} sat/vB",
                    fee_rate
                ));
            }
        }
    }

    Ok(PolicyReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    })
}
