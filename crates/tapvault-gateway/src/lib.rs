//! TapVault Gateway
//!
//! The typed request surface of the vault engine. Every operation is total:
//! it validates its inputs, delegates to the right pipeline, and returns a
//! typed result or a coded error. A thin JSON shim ([`json`]) serializes the
//! same surface for foreign callers.

pub mod json;
pub mod requests;

pub use requests::*;

use bitcoin::{Address, Network};
use std::str::FromStr;

use tapvault_core::types::{blocks_to_time_estimate, VaultConfig, VaultPolicy};
use tapvault_core::{parse_xpub, Error, VaultMetadata};
use tapvault_psbt::{
    build_cancel_psbt, build_delayed_spend_psbt, build_emergency_psbt, finalize_psbt,
    verify_psbt_policy, FinalizedTx, PolicyReport, PsbtData,
};
use tapvault_scan::{
    derive_scan_candidates, reconstruct_vault, BlockchainAdapter, CancelToken, RecoveryScanner,
    ScanCandidate, ScanReport, ScanWindow,
};
use tapvault_script::leaves::decode_metadata_script;
use tapvault_script::taproot::generate_vault_output;

/// Engine version, "MAJOR.MINOR.PATCH".
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// The vault engine's request gateway, bound to one network.
#[derive(Debug, Clone)]
pub struct Gateway {
    network: Network,
    policy: VaultPolicy,
}

impl Gateway {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            policy: VaultPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: VaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn policy(&self) -> &VaultPolicy {
        &self.policy
    }

    /// Create a vault: derive keys, commit metadata, return address,
    /// descriptor, scripts and the ready-to-persist config.
    pub fn generate_vault_address(
        &self,
        req: &GenerateVaultAddressRequest,
    ) -> Result<GeneratedVault, Error> {
        let output = generate_vault_output(
            &req.primary_xpub,
            req.emergency_xpub.as_deref(),
            &req.template,
            req.vault_index,
            req.destination_indices.clone(),
            self.network,
            &self.policy,
        )?;

        let name = req
            .name
            .clone()
            .unwrap_or_else(|| format!("{} #{}", req.template.template_id(), req.vault_index));

        let response = GeneratedVault {
            address: output.address.to_string(),
            descriptor: output.descriptor.clone(),
            internal_key: output.internal_key.to_string(),
            spending_script_hex: output.spend_script.to_hex_string(),
            metadata_script_hex: output.metadata_script.to_hex_string(),
            metadata: output.metadata.clone(),
            vault: output.into_config(
                name,
                &req.primary_xpub,
                req.emergency_xpub.as_deref(),
                self.network,
            )?,
        };
        Ok(response)
    }

    /// Decode a metadata leaf given its script bytes (hex at this boundary).
    pub fn decode_metadata_leaf(&self, script_hex: &str) -> Result<VaultMetadata, Error> {
        let script = bitcoin::ScriptBuf::from_hex(script_hex.trim())
            .map_err(|e| Error::InvalidInput(format!("script hex: {}", e)))?;
        decode_metadata_script(&script)
    }

    pub fn build_delayed_spend_psbt(&self, req: &DelayedSpendRequest) -> Result<PsbtData, Error> {
        self.check_vault_network(&req.vault)?;
        build_delayed_spend_psbt(&req.vault, &req.intent, &req.utxos, &self.policy)
    }

    pub fn build_emergency_psbt(&self, req: &EmergencySpendRequest) -> Result<PsbtData, Error> {
        self.check_vault_network(&req.vault)?;
        build_emergency_psbt(
            &req.vault,
            &req.destination,
            req.fee_rate,
            &req.utxos,
            &self.policy,
        )
    }

    pub fn build_cancel_psbt(&self, req: &CancelSpendRequest) -> Result<PsbtData, Error> {
        self.check_vault_network(&req.vault)?;
        build_cancel_psbt(
            &req.vault,
            &req.original_txid,
            req.original_fee_rate,
            &req.destination,
            req.fee_rate,
            &req.utxos,
            &self.policy,
        )
    }

    pub fn verify_psbt_policy(&self, req: &VerifyPsbtRequest) -> Result<PolicyReport, Error> {
        self.check_vault_network(&req.vault)?;
        verify_psbt_policy(&req.psbt_base64, &req.vault, &self.policy)
    }

    pub fn finalize_psbt(&self, req: &FinalizePsbtRequest) -> Result<FinalizedTx, Error> {
        finalize_psbt(&req.psbt_base64)
    }

    pub fn derive_scan_addresses(
        &self,
        req: &DeriveScanAddressesRequest,
    ) -> Result<Vec<ScanCandidate>, Error> {
        let window = ScanWindow::new(
            req.start_index,
            req.count.unwrap_or(self.policy.default_scan_count),
        );
        derive_scan_candidates(&req.xpub, self.network, &window, &self.policy)
    }

    /// Reconstruct a vault from an address holding funds. `Ok(None)` when
    /// the address is not a canonical vault of this xpub.
    pub fn reconstruct_vault(
        &self,
        req: &ReconstructVaultRequest,
    ) -> Result<Option<VaultConfig>, Error> {
        for utxo in &req.utxos {
            utxo.validate()?;
        }
        reconstruct_vault(
            &req.address,
            &req.utxos,
            &req.xpub,
            self.network,
            &self.policy,
        )
    }

    /// Run a recovery sweep through the injected adapter.
    pub fn scan_for_vaults<A: BlockchainAdapter + ?Sized>(
        &self,
        adapter: &A,
        xpub: &str,
        window: &ScanWindow,
        token: &CancelToken,
    ) -> Result<ScanReport, Error> {
        RecoveryScanner::new(adapter, self.network)
            .with_policy(self.policy.clone())
            .scan(xpub, window, token)
    }

    pub fn validate_address(&self, address: &str) -> AddressValidation {
        match Address::from_str(address.trim()) {
            Err(_) => AddressValidation {
                valid: false,
                address_type: None,
                network: None,
            },
            Ok(unchecked) => match unchecked.require_network(self.network) {
                Ok(checked) => AddressValidation {
                    valid: true,
                    address_type: checked.address_type().map(|t| t.to_string()),
                    network: Some(self.network.to_string()),
                },
                Err(_) => AddressValidation {
                    valid: false,
                    address_type: None,
                    network: None,
                },
            },
        }
    }

    pub fn validate_xpub(&self, xpub: &str) -> XpubValidation {
        match parse_xpub(xpub, self.network) {
            Ok(_) => XpubValidation {
                valid: true,
                network: Some(self.network.to_string()),
            },
            Err(_) => XpubValidation {
                valid: false,
                network: None,
            },
        }
    }

    pub fn blocks_to_time_estimate(&self, blocks: u32) -> String {
        blocks_to_time_estimate(blocks)
    }

    fn check_vault_network(&self, vault: &VaultConfig) -> Result<(), Error> {
        if vault.network != self.network {
            return Err(Error::NetworkMismatch {
                expected: self.network,
                found: format!("vault on {}", vault.network),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapvault_core::types::VaultTemplate;

    const TEST_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn gateway() -> Gateway {
        Gateway::new(Network::Bitcoin)
    }

    fn generate_request(index: u32) -> GenerateVaultAddressRequest {
        GenerateVaultAddressRequest {
            primary_xpub: TEST_XPUB.into(),
            emergency_xpub: None,
            template: VaultTemplate::savings(),
            vault_index: index,
            destination_indices: vec![],
            name: None,
        }
    }

    #[test]
    fn test_version_is_semver() {
        let parts: Vec<&str> = version().split('.').collect();
        assert_eq!(parts.len(), 3);
        for part in parts {
            part.parse::<u32>().unwrap();
        }
    }

    #[test]
    fn test_generate_vault_address() {
        let generated = gateway().generate_vault_address(&generate_request(0)).unwrap();

        assert!(generated.address.starts_with("bc1p"));
        assert_eq!(generated.address.len(), 62);
        assert_eq!(generated.metadata.version, 1);
        assert_eq!(generated.metadata.delay_blocks, 1008);
        assert_eq!(generated.vault.address, generated.address);
        assert!(generated.spending_script_hex.len() > 60);

        // The returned metadata script decodes back to the same record.
        let decoded = gateway()
            .decode_metadata_leaf(&generated.metadata_script_hex)
            .unwrap();
        assert_eq!(decoded, generated.metadata);
    }

    #[test]
    fn test_vault_network_guard() {
        let generated = gateway().generate_vault_address(&generate_request(0)).unwrap();
        let testnet_gateway = Gateway::new(Network::Testnet);

        let err = testnet_gateway
            .build_emergency_psbt(&EmergencySpendRequest {
                vault: generated.vault,
                destination: generated.address,
                fee_rate: 5,
                utxos: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, Error::NetworkMismatch { .. }));
    }

    #[test]
    fn test_validate_address() {
        let generated = gateway().generate_vault_address(&generate_request(0)).unwrap();

        let verdict = gateway().validate_address(&generated.address);
        assert!(verdict.valid);
        assert_eq!(verdict.address_type.as_deref(), Some("p2tr"));
        assert_eq!(verdict.network.as_deref(), Some("bitcoin"));

        assert!(!gateway().validate_address("bc1qnonsense").valid);
        // Right encoding, wrong network.
        assert!(
            !gateway()
                .validate_address("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx")
                .valid
        );
    }

    #[test]
    fn test_validate_xpub() {
        assert!(gateway().validate_xpub(TEST_XPUB).valid);
        assert!(!gateway().validate_xpub("xpub-junk").valid);
        assert!(!Gateway::new(Network::Signet).validate_xpub(TEST_XPUB).valid);
    }

    #[test]
    fn test_blocks_to_time() {
        assert_eq!(gateway().blocks_to_time_estimate(1008), "~7 days");
    }

    #[test]
    fn test_derive_scan_addresses_matches_generation() {
        let gw = gateway();
        let candidates = gw
            .derive_scan_addresses(&DeriveScanAddressesRequest {
                xpub: TEST_XPUB.into(),
                start_index: 0,
                count: Some(2),
            })
            .unwrap();

        assert_eq!(candidates.len(), 4);
        let generated = gw.generate_vault_address(&generate_request(1)).unwrap();
        assert!(candidates
            .iter()
            .any(|c| c.index == 1 && c.address == generated.address));
    }

    #[test]
    fn test_template_floor_enforced() {
        let mut req = generate_request(0);
        req.template = VaultTemplate::Custom {
            delay_blocks: 5,
            recovery_type: tapvault_core::types::RecoveryType::TimelockOnly,
        };
        assert!(matches!(
            gateway().generate_vault_address(&req),
            Err(Error::PolicyViolation(_))
        ));
    }
}
