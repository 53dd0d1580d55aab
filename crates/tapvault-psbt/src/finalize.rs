//! Turn a fully signed PSBT into broadcastable transaction bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bitcoin::psbt::Psbt;
use bitcoin::taproot::TapLeafHash;
use bitcoin::Witness;
use serde::{Deserialize, Serialize};

use tapvault_core::Error;

/// A finalized transaction ready for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedTx {
    pub tx_hex: String,
    pub txid: String,
    pub vsize: usize,
}

/// Assemble witnesses from the PSBT's signature fields and extract the
/// transaction.
///
/// Key-path inputs need `tap_key_sig`; script-path inputs need a revealed
/// leaf in `tap_scripts` plus a matching entry in `tap_script_sigs`. Any
/// input missing its witness material fails the whole finalization.
pub fn finalize_psbt(psbt_base64: &str) -> Result<FinalizedTx, Error> {
    let bytes = BASE64
        .decode(psbt_base64)
        .map_err(|e| Error::SerializationError(format!("PSBT base64: {}", e)))?;
    let mut psbt = Psbt::deserialize(&bytes)
        .map_err(|e| Error::SerializationError(format!("PSBT decode: {}", e)))?;

    for i in 0..psbt.inputs.len() {
        let witness = build_input_witness(&psbt, i)?;
        let input = &mut psbt.inputs[i];
        input.final_script_witness = Some(witness);
        // Spent annotations must not survive into a finalized input.
        input.tap_key_sig = None;
        input.tap_script_sigs.clear();
        input.tap_scripts.clear();
        input.tap_internal_key = None;
        input.tap_merkle_root = None;
    }

    let tx = psbt
        .extract_tx()
        .map_err(|e| Error::PsbtBuildFailed(format!("extraction failed: {}", e)))?;

    Ok(FinalizedTx {
        tx_hex: bitcoin::consensus::encode::serialize_hex(&tx),
        txid: tx.compute_txid().to_string(),
        vsize: tx.vsize(),
    })
}

fn build_input_witness(psbt: &Psbt, index: usize) -> Result<Witness, Error> {
    let input = &psbt.inputs[index];

    // Key path: a lone Schnorr signature.
    if let Some(sig) = &input.tap_key_sig {
        let mut witness = Witness::new();
        witness.push(sig.to_vec());
        return Ok(witness);
    }

    // Script path: signature, revealed leaf, control block.
    if let Some((control_block, (script, leaf_version))) = input.tap_scripts.iter().next() {
        let leaf_hash = TapLeafHash::from_script(script, *leaf_version);
        let sig = input
            .tap_script_sigs
            .iter()
            .find(|((_, sig_leaf), _)| *sig_leaf == leaf_hash)
            .map(|(_, sig)| sig)
            .ok_or_else(|| {
                Error::PsbtBuildFailed(format!(
                    "input {} has no signature for its revealed leaf",
                    index
                ))
            })?;

        let mut witness = Witness::new();
        witness.push(sig.to_vec());
        witness.push(script.to_bytes());
        witness.push(control_block.serialize());
        return Ok(witness);
    }

    Err(Error::PsbtBuildFailed(format!(
        "input {} is missing signatures and witness data",
        index
    )))
}
