//! Request and response types for every gateway operation.
//!
//! These are the exact shapes a foreign caller sees (after JSON
//! serialization by the shim); the engine's own types pass through where
//! they already serialize cleanly.

use serde::{Deserialize, Serialize};

use tapvault_core::types::{SpendIntent, Utxo, VaultConfig, VaultTemplate};
use tapvault_core::{Error, VaultMetadata};

/// Inputs for `generate_vault_address`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateVaultAddressRequest {
    pub primary_xpub: String,
    #[serde(default)]
    pub emergency_xpub: Option<String>,
    pub template: VaultTemplate,
    pub vault_index: u32,
    /// Caller bookkeeping committed into the metadata leaf. Non-default
    /// values move the vault outside the canonical scan universe.
    #[serde(default)]
    pub destination_indices: Vec<u8>,
    /// Display name recorded in the returned config.
    #[serde(default)]
    pub name: Option<String>,
}

/// Result of `generate_vault_address`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedVault {
    pub address: String,
    pub descriptor: String,
    pub internal_key: String,
    pub spending_script_hex: String,
    pub metadata_script_hex: String,
    pub metadata: VaultMetadata,
    /// The full config, ready to feed back into the PSBT operations.
    pub vault: VaultConfig,
}

/// Inputs for `build_delayed_spend_psbt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayedSpendRequest {
    pub vault: VaultConfig,
    pub intent: SpendIntent,
    pub utxos: Vec<Utxo>,
}

/// Inputs for `build_emergency_psbt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencySpendRequest {
    pub vault: VaultConfig,
    pub destination: String,
    pub fee_rate: u64,
    pub utxos: Vec<Utxo>,
}

/// Inputs for `build_cancel_psbt`: an emergency sweep that replaces an
/// in-flight spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSpendRequest {
    pub vault: VaultConfig,
    pub original_txid: String,
    pub original_fee_rate: u64,
    pub destination: String,
    pub fee_rate: u64,
    pub utxos: Vec<Utxo>,
}

/// Inputs for `verify_psbt_policy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPsbtRequest {
    pub psbt_base64: String,
    pub vault: VaultConfig,
}

/// Inputs for `finalize_psbt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizePsbtRequest {
    pub psbt_base64: String,
}

/// Inputs for `derive_scan_addresses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeriveScanAddressesRequest {
    pub xpub: String,
    #[serde(default)]
    pub start_index: u32,
    /// Defaults to the policy's scan window size.
    #[serde(default)]
    pub count: Option<u32>,
}

/// Inputs for `reconstruct_vault`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructVaultRequest {
    pub address: String,
    pub utxos: Vec<Utxo>,
    pub xpub: String,
}

/// Result of `validate_address`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressValidation {
    pub valid: bool,
    pub address_type: Option<String>,
    pub network: Option<String>,
}

/// Result of `validate_xpub`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XpubValidation {
    pub valid: bool,
    pub network: Option<String>,
}

/// Stable error shape for the foreign boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub kind: String,
    pub message: String,
}

impl From<&Error> for ErrorPayload {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_payload_carries_code() {
        let err = Error::InsufficientFunds {
            needed: 10,
            available: 5,
        };
        let payload = ErrorPayload::from(&err);
        assert_eq!(payload.code, 2002);
        assert_eq!(payload.kind, "InsufficientFunds");
        assert!(payload.message.contains("10"));
    }

    #[test]
    fn test_generate_request_defaults() {
        let json = r#"{
            "primary_xpub": "xpub",
            "template": {"savings": {"delay_blocks": 1008}},
            "vault_index": 0
        }"#;
        let req: GenerateVaultAddressRequest = serde_json::from_str(json).unwrap();
        assert!(req.emergency_xpub.is_none());
        assert!(req.destination_indices.is_empty());
        assert!(req.name.is_none());
    }
}
