//! Spend-path classification for monitoring layers.
//!
//! Given the witness of an input that spent a vault UTXO, decide which path
//! was exercised:
//!
//! - **Key path** (emergency): a lone 64/65-byte Schnorr signature.
//! - **Script path** (delayed): `[signature, leaf script, control block]`,
//!   where the leaf parses as a vault spending leaf.
//!
//! When the witness is unavailable or ambiguous, timing still settles one
//! case: a spend confirmed before `utxo_height + delay_blocks` cannot have
//! used the delayed path.

use serde::{Deserialize, Serialize};

use bitcoin::Script;

use crate::reconstruct::metadata_from_witness;
use tapvault_script::leaves::parse_spend_script;

/// Which vault path a spend used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendKind {
    Delayed,
    Emergency,
    Unknown,
}

/// How the verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    WitnessShape,
    Timing,
    Indeterminate,
}

/// Classification verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendClassification {
    pub kind: SpendKind,
    pub method: DetectionMethod,
    pub witness_items: usize,
}

/// Classify from witness structure alone.
pub fn classify_witness(stack: &[Vec<u8>]) -> SpendClassification {
    let items = stack.len();

    match stack {
        [signature] if signature.len() == 64 || signature.len() == 65 => SpendClassification {
            kind: SpendKind::Emergency,
            method: DetectionMethod::WitnessShape,
            witness_items: items,
        },
        [signature, script, control_block]
            if (signature.len() == 64 || signature.len() == 65)
                && parse_spend_script(Script::from_bytes(script)).is_ok()
                && control_block.len() >= 33
                && (control_block.len() - 33) % 32 == 0 =>
        {
            SpendClassification {
                kind: SpendKind::Delayed,
                method: DetectionMethod::WitnessShape,
                witness_items: items,
            }
        }
        _ => SpendClassification {
            kind: SpendKind::Unknown,
            method: DetectionMethod::Indeterminate,
            witness_items: items,
        },
    }
}

/// Timing fallback: before the unlock height only the emergency path can
/// spend. After it, timing alone proves nothing.
pub fn classify_timing(spend_height: u32, utxo_height: u32, delay_blocks: u16) -> Option<SpendKind> {
    let elapsed = spend_height.saturating_sub(utxo_height);
    if elapsed < delay_blocks as u32 {
        Some(SpendKind::Emergency)
    } else {
        None
    }
}

/// Combined analysis: witness shape first, then timing.
pub fn classify_spend(
    stack: &[Vec<u8>],
    spend_height: u32,
    utxo_height: u32,
    delay_blocks: u16,
) -> SpendClassification {
    let mut verdict = classify_witness(stack);

    if verdict.kind == SpendKind::Unknown && spend_height > 0 && utxo_height > 0 {
        if let Some(kind) = classify_timing(spend_height, utxo_height, delay_blocks) {
            verdict = SpendClassification {
                kind,
                method: DetectionMethod::Timing,
                witness_items: verdict.witness_items,
            };
        }
    }

    // A witness that reveals the metadata leaf is a malformed spend attempt,
    // never a real path.
    if metadata_from_witness(stack).is_some() {
        verdict.kind = SpendKind::Unknown;
        verdict.method = DetectionMethod::Indeterminate;
    }

    verdict
}
