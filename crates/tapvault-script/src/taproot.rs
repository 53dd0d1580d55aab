//! Vault Taproot assembly.
//!
//! Builds the two-leaf tree (delayed spend + metadata), selects the internal
//! key, and produces the P2TR address and descriptor. Address determinism is
//! the load-bearing property here: the recovery scanner re-derives the same
//! addresses from nothing but an xpub.

use bitcoin::key::XOnlyPublicKey;
use bitcoin::taproot::{ControlBlock, LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, ScriptBuf};

use tapvault_core::{
    derive_vault_key, parse_xpub, secp, Error, VaultConfig, VaultMetadata, VaultPolicy,
    VaultTemplate,
};

use crate::descriptor::encode_descriptor;
use crate::leaves::{delayed_spend_script, metadata_script};
use crate::nums::unspendable_internal_key;

/// A fully assembled vault Taproot output.
#[derive(Debug, Clone)]
pub struct VaultOutput {
    pub internal_key: XOnlyPublicKey,
    /// True when the internal key is the derived emergency key (key-path
    /// spendable), false when it is the metadata-bound NUMS key.
    pub emergency_key_path: bool,
    pub spend_script: ScriptBuf,
    pub metadata_script: ScriptBuf,
    pub spend_info: TaprootSpendInfo,
    pub address: Address,
    pub descriptor: String,
    pub metadata: VaultMetadata,
}

impl VaultOutput {
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// Vault id: hash of the script pubkey.
    pub fn vault_id(&self) -> String {
        VaultConfig::id_for_script(&self.script_pubkey())
    }

    pub fn output_key(&self) -> XOnlyPublicKey {
        self.spend_info.output_key().to_x_only_public_key()
    }

    /// Control block proving the spending leaf's tree membership.
    pub fn control_block(&self) -> Result<ControlBlock, Error> {
        self.spend_info
            .control_block(&(self.spend_script.clone(), LeafVersion::TapScript))
            .ok_or_else(|| {
                Error::KeyDerivationFailed("no control block for spending leaf".into())
            })
    }

    /// Assemble a [`VaultConfig`] for this output.
    pub fn into_config(
        self,
        name: impl Into<String>,
        primary_xpub: &str,
        emergency_xpub: Option<&str>,
        network: Network,
    ) -> Result<VaultConfig, Error> {
        Ok(VaultConfig {
            id: self.vault_id(),
            name: name.into(),
            template: self.metadata.template()?,
            primary_xpub: primary_xpub.to_string(),
            emergency_xpub: emergency_xpub.map(str::to_string),
            network,
            descriptor: self.descriptor.clone(),
            address: self.address.to_string(),
            metadata: self.metadata,
            created_at_height: None,
        })
    }
}

/// Assemble the Taproot output for already-derived keys and metadata.
///
/// Internal key selection: the derived emergency key when the metadata's
/// recovery type allows immediate recovery and a key was supplied, otherwise
/// the metadata-bound unspendable key.
pub fn assemble_vault_output(
    primary_key: &XOnlyPublicKey,
    emergency_key: Option<&XOnlyPublicKey>,
    metadata: VaultMetadata,
    network: Network,
) -> Result<VaultOutput, Error> {
    let delay = u16::try_from(metadata.delay_blocks).map_err(|_| {
        Error::InvalidInput(format!(
            "delay of {} blocks does not fit BIP-68 block encoding",
            metadata.delay_blocks
        ))
    })?;

    let spend_script = delayed_spend_script(primary_key, delay);
    let metadata_bytes = metadata.encode()?;
    let meta_script = metadata_script(&metadata)?;

    let (internal_key, emergency_key_path) = match emergency_key {
        Some(key) if metadata.recovery_type.permits_immediate_recovery() => (*key, true),
        _ => (unspendable_internal_key(&metadata_bytes)?, false),
    };

    let spend_info = TaprootBuilder::new()
        .add_leaf(1, spend_script.clone())
        .and_then(|b| b.add_leaf(1, meta_script.clone()))
        .map_err(|e| Error::KeyDerivationFailed(format!("taproot leaf insertion: {}", e)))?
        .finalize(secp(), internal_key)
        .map_err(|_| Error::KeyDerivationFailed("taproot tree finalization failed".into()))?;

    let address = Address::p2tr_tweaked(spend_info.output_key(), network);
    let descriptor = encode_descriptor(&internal_key, &spend_script, &meta_script)?;

    Ok(VaultOutput {
        internal_key,
        emergency_key_path,
        spend_script,
        metadata_script: meta_script,
        spend_info,
        address,
        descriptor,
        metadata,
    })
}

/// Derive keys from xpubs and assemble the vault output for `vault_index`.
///
/// This is the creation entry point: it validates the template against
/// policy, checks both xpubs against the network, and commits the canonical
/// metadata record.
pub fn generate_vault_output(
    primary_xpub: &str,
    emergency_xpub: Option<&str>,
    template: &VaultTemplate,
    vault_index: u32,
    destination_indices: Vec<u8>,
    network: Network,
    policy: &VaultPolicy,
) -> Result<VaultOutput, Error> {
    template.validate(policy)?;

    let primary = parse_xpub(primary_xpub, network)?;
    let primary_key = derive_vault_key(&primary, vault_index)?;

    let emergency_key = match emergency_xpub {
        Some(xpub) => {
            let parsed = parse_xpub(xpub, network)?;
            Some(derive_vault_key(&parsed, vault_index)?)
        }
        None => None,
    };

    let metadata = VaultMetadata::canonical(template, vault_index, destination_indices);

    assemble_vault_output(&primary_key, emergency_key.as_ref(), metadata, network)
}

/// Re-derive the Taproot output a [`VaultConfig`] describes and prove it
/// still matches the config's recorded address.
pub fn vault_output_from_config(config: &VaultConfig) -> Result<VaultOutput, Error> {
    let primary = parse_xpub(&config.primary_xpub, config.network)?;
    let primary_key = derive_vault_key(&primary, config.metadata.vault_index)?;

    let emergency_key = match config.emergency_xpub.as_deref() {
        Some(xpub) => {
            let parsed = parse_xpub(xpub, config.network)?;
            Some(derive_vault_key(&parsed, config.metadata.vault_index)?)
        }
        None => None,
    };

    let output = assemble_vault_output(
        &primary_key,
        emergency_key.as_ref(),
        config.metadata.clone(),
        config.network,
    )?;

    if output.address.to_string() != config.address {
        return Err(Error::PolicyViolation(format!(
            "vault config is inconsistent: derived address {} but config records {}",
            output.address, config.address
        )));
    }

    Ok(output)
}
