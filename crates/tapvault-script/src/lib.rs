//! TapVault Script
//!
//! Taproot output construction for vaults: the CSV-delayed spending leaf, the
//! provably-unspendable metadata leaf, the two-leaf tree commitment, and the
//! descriptor form that round-trips both.
//!
//! # Output structure
//!
//! ```text
//! Output key = taptweak(internal_key, merkle_root)
//!   Leaf 1: <primary_key> OP_CHECKSIGVERIFY <delay> OP_CSV   <- delayed spend
//!   Leaf 2: OP_RETURN <metadata bytes>                       <- recovery record
//! Internal key: emergency key when configured, else NUMS + H(metadata)·G
//! ```
//!
//! The metadata leaf can never be executed (OP_RETURN fails immediately), but
//! its bytes are committed to the output key, so the full vault configuration
//! is recoverable from the UTXO by revealing the leaf.

pub mod descriptor;
pub mod leaves;
pub mod nums;
pub mod taproot;

pub use descriptor::{encode_descriptor, parse_descriptor, ParsedDescriptor};
pub use leaves::{decode_metadata_script, delayed_spend_script, metadata_script};
pub use nums::unspendable_internal_key;
pub use taproot::{assemble_vault_output, generate_vault_output, vault_output_from_config, VaultOutput};
