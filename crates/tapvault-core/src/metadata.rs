//! Self-describing recovery metadata committed into the Taproot tree.
//!
//! The codec is a fixed little-endian layout with single-byte length
//! prefixes:
//!
//! ```text
//! version             u8
//! template_id         u8 len || bytes
//! delay_blocks        u32 LE
//! destination_indices u8 len || bytes
//! recovery_type       u8 discriminant (MultiSig adds threshold, total)
//! created_at_block    u32 LE
//! vault_index         u32 LE
//! ```
//!
//! The encoded record must stay under the 520-byte script push limit so the
//! whole payload fits a single push in the metadata leaf.

use serde::{Deserialize, Serialize};

use crate::encoding::{put_prefixed, put_u32_le, ByteReader};
use crate::error::Error;
use crate::types::{RecoveryType, VaultTemplate};

/// Current codec schema version.
pub const METADATA_VERSION: u8 = 1;

/// Hard ceiling from Bitcoin's script element push limit.
pub const MAX_METADATA_BYTES: usize = 520;

/// Recovery payload stored in the vault's unspendable metadata leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetadata {
    pub version: u8,
    pub template_id: String,
    pub delay_blocks: u32,
    /// Opaque to the engine; carried for the caller's destination bookkeeping.
    pub destination_indices: Vec<u8>,
    pub recovery_type: RecoveryType,
    pub created_at_block: u32,
    pub vault_index: u32,
}

impl VaultMetadata {
    /// The canonical record committed at creation time.
    ///
    /// `created_at_block` is zero here: address generation takes no chain
    /// state, and recovery derives the same record from the xpub alone.
    pub fn canonical(
        template: &VaultTemplate,
        vault_index: u32,
        destination_indices: Vec<u8>,
    ) -> Self {
        Self {
            version: METADATA_VERSION,
            template_id: template.template_id().to_string(),
            delay_blocks: template.delay_blocks() as u32,
            destination_indices,
            recovery_type: template.recovery_type(),
            created_at_block: 0,
            vault_index,
        }
    }

    /// Rebuild the [`VaultTemplate`] this record describes.
    pub fn template(&self) -> Result<VaultTemplate, Error> {
        let delay = u16::try_from(self.delay_blocks).map_err(|_| {
            Error::MetadataDecodeFailed(format!(
                "delay of {} blocks exceeds BIP-68 block range",
                self.delay_blocks
            ))
        })?;
        VaultTemplate::from_metadata_fields(&self.template_id, delay, self.recovery_type)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(32 + self.template_id.len());

        out.push(self.version);
        put_prefixed(&mut out, self.template_id.as_bytes())?;
        put_u32_le(&mut out, self.delay_blocks);
        put_prefixed(&mut out, &self.destination_indices)?;

        out.push(self.recovery_type.discriminant());
        if let RecoveryType::MultiSig { threshold, total } = self.recovery_type {
            out.push(threshold);
            out.push(total);
        }

        put_u32_le(&mut out, self.created_at_block);
        put_u32_le(&mut out, self.vault_index);

        if out.len() >= MAX_METADATA_BYTES {
            return Err(Error::MetadataEncodeTooLong {
                len: out.len(),
                max: MAX_METADATA_BYTES,
            });
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = ByteReader::new(bytes);

        let version = reader.read_u8()?;
        if version != METADATA_VERSION {
            return Err(Error::MetadataDecodeFailed(format!(
                "unsupported schema version {}",
                version
            )));
        }

        let template_id = String::from_utf8(reader.read_prefixed()?.to_vec())
            .map_err(|_| Error::MetadataDecodeFailed("template id is not UTF-8".into()))?;
        let delay_blocks = reader.read_u32_le()?;
        let destination_indices = reader.read_prefixed()?.to_vec();

        let recovery_type = match reader.read_u8()? {
            0 => RecoveryType::EmergencyKey,
            1 => RecoveryType::TimelockOnly,
            2 => {
                let threshold = reader.read_u8()?;
                let total = reader.read_u8()?;
                RecoveryType::MultiSig { threshold, total }
            }
            other => {
                return Err(Error::MetadataDecodeFailed(format!(
                    "unknown recovery type discriminant {}",
                    other
                )))
            }
        };

        let created_at_block = reader.read_u32_le()?;
        let vault_index = reader.read_u32_le()?;

        if reader.remaining() != 0 {
            return Err(Error::MetadataDecodeFailed(format!(
                "{} trailing bytes after record",
                reader.remaining()
            )));
        }

        Ok(Self {
            version,
            template_id,
            delay_blocks,
            destination_indices,
            recovery_type,
            created_at_block,
            vault_index,
        })
    }
}
