//! Vault data model.
//!
//! Tagged sums with exhaustive matching, not trait hierarchies: adding a
//! variant must break every match site.

use bitcoin::hashes::{sha256, Hash};
use bitcoin::{Amount, Network, Script};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::metadata::VaultMetadata;

/// Default delay for the savings template (~1 week at 10 min/block).
pub const SAVINGS_DELAY_BLOCKS: u16 = 1008;

/// Default delay for the spending template (~1 day).
pub const SPENDING_DELAY_BLOCKS: u16 = 144;

/// How a vault can be recovered outside the delayed spending path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryType {
    /// An emergency key provides an always-available key-path spend.
    EmergencyKey,
    /// Only the delayed script path exists.
    TimelockOnly,
    /// Threshold recovery. Byte layout in metadata: discriminant 2 plus
    /// `threshold` and `total` as single bytes.
    MultiSig { threshold: u8, total: u8 },
}

impl RecoveryType {
    pub fn discriminant(&self) -> u8 {
        match self {
            RecoveryType::EmergencyKey => 0,
            RecoveryType::TimelockOnly => 1,
            RecoveryType::MultiSig { .. } => 2,
        }
    }

    /// Whether this recovery type allows an immediate key-path spend.
    pub fn permits_immediate_recovery(&self) -> bool {
        matches!(self, RecoveryType::EmergencyKey)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let RecoveryType::MultiSig { threshold, total } = self {
            if *threshold == 0 || threshold > total || *total < 2 {
                return Err(Error::InvalidInput(format!(
                    "invalid multisig quorum: {}-of-{}",
                    threshold, total
                )));
            }
        }
        Ok(())
    }
}

/// Vault policy template selected at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultTemplate {
    Savings { delay_blocks: u16 },
    Spending { delay_blocks: u16 },
    Custom {
        delay_blocks: u16,
        recovery_type: RecoveryType,
    },
}

impl VaultTemplate {
    /// Savings template with the default one-week delay.
    pub fn savings() -> Self {
        VaultTemplate::Savings {
            delay_blocks: SAVINGS_DELAY_BLOCKS,
        }
    }

    /// Spending template with the default one-day delay.
    pub fn spending() -> Self {
        VaultTemplate::Spending {
            delay_blocks: SPENDING_DELAY_BLOCKS,
        }
    }

    pub fn custom(delay_blocks: u16, recovery_type: RecoveryType) -> Self {
        VaultTemplate::Custom {
            delay_blocks,
            recovery_type,
        }
    }

    /// CSV delay in blocks. Fits BIP-68 block-based encoding by construction.
    pub fn delay_blocks(&self) -> u16 {
        match self {
            VaultTemplate::Savings { delay_blocks }
            | VaultTemplate::Spending { delay_blocks }
            | VaultTemplate::Custom { delay_blocks, .. } => *delay_blocks,
        }
    }

    /// The recovery rule this template implies. The built-in templates use an
    /// emergency key when one is supplied and fall back to timelock-only
    /// behavior otherwise (the internal key degrades to a NUMS point).
    pub fn recovery_type(&self) -> RecoveryType {
        match self {
            VaultTemplate::Savings { .. } | VaultTemplate::Spending { .. } => {
                RecoveryType::EmergencyKey
            }
            VaultTemplate::Custom { recovery_type, .. } => *recovery_type,
        }
    }

    /// Identifier committed into the metadata leaf.
    pub fn template_id(&self) -> &'static str {
        match self {
            VaultTemplate::Savings { .. } => "savings_v1",
            VaultTemplate::Spending { .. } => "spending_v1",
            VaultTemplate::Custom { .. } => "custom_v1",
        }
    }

    /// Rebuild a template from the fields stored in a metadata leaf.
    pub fn from_metadata_fields(
        template_id: &str,
        delay_blocks: u16,
        recovery_type: RecoveryType,
    ) -> Result<Self, Error> {
        match template_id {
            "savings_v1" => Ok(VaultTemplate::Savings { delay_blocks }),
            "spending_v1" => Ok(VaultTemplate::Spending { delay_blocks }),
            "custom_v1" => Ok(VaultTemplate::Custom {
                delay_blocks,
                recovery_type,
            }),
            other => Err(Error::MetadataDecodeFailed(format!(
                "unknown template id {:?}",
                other
            ))),
        }
    }

    pub fn validate(&self, policy: &VaultPolicy) -> Result<(), Error> {
        let delay = self.delay_blocks();
        if delay == 0 {
            return Err(Error::InvalidInput(
                "delay_blocks must be at least 1".into(),
            ));
        }
        if delay < policy.min_delay_blocks {
            return Err(Error::PolicyViolation(format!(
                "delay of {} blocks is below the policy minimum of {}",
                delay, policy.min_delay_blocks
            )));
        }
        self.recovery_type().validate()
    }
}

/// Which Taproot spending path a PSBT exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendPath {
    /// Script-path spend through the CSV-delayed leaf.
    Delayed,
    /// Key-path spend with the emergency internal key.
    Emergency,
}

/// An unspent vault output as reported by a blockchain adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: bitcoin::Txid,
    pub vout: u32,
    pub value_sats: u64,
    pub script_pubkey: bitcoin::ScriptBuf,
    pub confirmations: u32,
    pub block_height: Option<u32>,
}

impl Utxo {
    pub fn outpoint(&self) -> bitcoin::OutPoint {
        bitcoin::OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }

    pub fn value(&self) -> Amount {
        Amount::from_sat(self.value_sats)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.value_sats == 0 {
            return Err(Error::InvalidInput(format!(
                "utxo {}:{} has zero value",
                self.txid, self.vout
            )));
        }
        Ok(())
    }
}

/// A caller's request to spend from a vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendIntent {
    pub vault_id: String,
    pub destination: String,
    /// `None` sweeps every available UTXO.
    pub amount_sats: Option<u64>,
    /// Fee rate in sat/vB; must be positive.
    pub fee_rate: u64,
    pub path: SpendPath,
}

/// Logical identity of a vault. Owns its metadata and descriptor; xpubs are
/// held by value as their string encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Hash of the vault's script pubkey, hex-encoded.
    pub id: String,
    pub name: String,
    pub template: VaultTemplate,
    pub primary_xpub: String,
    pub emergency_xpub: Option<String>,
    pub network: Network,
    pub descriptor: String,
    pub address: String,
    pub metadata: VaultMetadata,
    /// Height the vault was first funded at, when known.
    pub created_at_height: Option<u32>,
}

impl VaultConfig {
    /// Vault id: SHA-256 of the script pubkey, hex-encoded.
    pub fn id_for_script(script: &Script) -> String {
        hex::encode(sha256::Hash::hash(script.as_bytes()).to_byte_array())
    }

    pub fn delay_blocks(&self) -> u16 {
        self.template.delay_blocks()
    }
}

/// Tunable policy constants. Defaults match the shipped vault profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultPolicy {
    /// Smallest CSV delay the engine will commit to a script.
    pub min_delay_blocks: u16,
    /// Dust floor for P2TR outputs.
    pub dust_limit_sats: u64,
    /// Accepted fee-rate band for policy verification, in sat/vB.
    pub min_fee_rate: u64,
    pub max_fee_rate: u64,
    /// Fee rate above which verification attaches a warning.
    pub warn_fee_rate: u64,
    /// Default recovery scan window size.
    pub default_scan_count: u32,
}

impl Default for VaultPolicy {
    fn default() -> Self {
        Self {
            min_delay_blocks: 144,
            dust_limit_sats: 330,
            min_fee_rate: 1,
            max_fee_rate: 1000,
            warn_fee_rate: 100,
            default_scan_count: 100,
        }
    }
}

/// Where a delayed spend stands relative to its CSV unlock height.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnlockStatus {
    pub current_height: u32,
    pub utxo_height: u32,
    pub unlock_height: u32,
    pub blocks_remaining: i64,
    pub expired: bool,
}

impl UnlockStatus {
    pub fn calculate(current_height: u32, utxo_height: u32, delay_blocks: u16) -> Self {
        let unlock_height = utxo_height.saturating_add(delay_blocks as u32);
        let blocks_remaining = unlock_height as i64 - current_height as i64;

        Self {
            current_height,
            utxo_height,
            unlock_height,
            blocks_remaining,
            expired: blocks_remaining <= 0,
        }
    }
}

/// Render a block count as an approximate human duration, e.g. "~7 days".
pub fn blocks_to_time_estimate(blocks: u32) -> String {
    let days = blocks / 144;
    if days >= 365 {
        format!("~{:.1} years", days as f32 / 365.0)
    } else if days >= 60 {
        format!("~{:.1} months", days as f32 / 30.0)
    } else if days >= 2 {
        format!("~{} days", days)
    } else if days == 1 {
        "~1 day".to_string()
    } else {
        let hours = blocks / 6;
        match hours {
            0 => "less than an hour".to_string(),
            1 => "~1 hour".to_string(),
            h => format!("~{} hours", h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_defaults() {
        assert_eq!(VaultTemplate::savings().delay_blocks(), 1008);
        assert_eq!(VaultTemplate::spending().delay_blocks(), 144);
        assert_eq!(VaultTemplate::savings().template_id(), "savings_v1");
    }

    #[test]
    fn test_template_validation() {
        let policy = VaultPolicy::default();

        assert!(VaultTemplate::savings().validate(&policy).is_ok());

        let short = VaultTemplate::custom(10, RecoveryType::TimelockOnly);
        assert!(matches!(
            short.validate(&policy),
            Err(Error::PolicyViolation(_))
        ));

        let zero = VaultTemplate::Custom {
            delay_blocks: 0,
            recovery_type: RecoveryType::TimelockOnly,
        };
        assert!(matches!(zero.validate(&policy), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_multisig_quorum_validation() {
        assert!(RecoveryType::MultiSig {
            threshold: 2,
            total: 3
        }
        .validate()
        .is_ok());

        assert!(RecoveryType::MultiSig {
            threshold: 4,
            total: 3
        }
        .validate()
        .is_err());

        assert!(RecoveryType::MultiSig {
            threshold: 0,
            total: 3
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_template_from_metadata_fields() {
        let t = VaultTemplate::from_metadata_fields("savings_v1", 1008, RecoveryType::EmergencyKey)
            .unwrap();
        assert_eq!(t, VaultTemplate::savings());

        assert!(VaultTemplate::from_metadata_fields(
            "mystery_v9",
            144,
            RecoveryType::TimelockOnly
        )
        .is_err());
    }

    #[test]
    fn test_utxo_validation() {
        let utxo = Utxo {
            txid: "1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef"
                .parse()
                .unwrap(),
            vout: 0,
            value_sats: 0,
            script_pubkey: bitcoin::ScriptBuf::new(),
            confirmations: 1,
            block_height: Some(830_000),
        };
        assert!(utxo.validate().is_err());
    }

    #[test]
    fn test_unlock_status() {
        let status = UnlockStatus::calculate(830_500, 830_000, 1008);
        assert_eq!(status.unlock_height, 831_008);
        assert_eq!(status.blocks_remaining, 508);
        assert!(!status.expired);

        let expired = UnlockStatus::calculate(832_000, 830_000, 1008);
        assert!(expired.expired);
    }

    #[test]
    fn test_blocks_to_time_estimate() {
        assert_eq!(blocks_to_time_estimate(1008), "~7 days");
        assert_eq!(blocks_to_time_estimate(144), "~1 day");
        assert_eq!(blocks_to_time_estimate(12), "~2 hours");
        assert_eq!(blocks_to_time_estimate(0), "less than an hour");
        assert!(blocks_to_time_estimate(26_280).contains("months"));
        assert!(blocks_to_time_estimate(52_560 * 2).contains("years"));
    }

    #[test]
    fn test_spend_intent_serde_roundtrip() {
        let intent = SpendIntent {
            vault_id: "abc".into(),
            destination: "bc1p...".into(),
            amount_sats: Some(50_000),
            fee_rate: 5,
            path: SpendPath::Delayed,
        };
        let json = serde_json::to_string(&intent).unwrap();
        let back: SpendIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.amount_sats, Some(50_000));
        assert_eq!(back.path, SpendPath::Delayed);
    }
}
