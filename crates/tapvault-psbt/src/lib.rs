//! TapVault PSBT
//!
//! Turns spend intents into unsigned BIP-174 PSBTs, checks returned PSBTs
//! against vault policy without network access, and finalizes fully signed
//! ones into broadcastable transactions.
//!
//! All vault spends are sweep-or-single-output: a vault cannot make change,
//! so every produced PSBT has exactly one output and consumes its selected
//! UTXOs entirely.

pub mod builder;
pub mod fees;
pub mod finalize;
pub mod verify;

pub use builder::{
    build_cancel_psbt, build_delayed_spend_psbt, build_emergency_psbt, PsbtData, SpendSummary,
    EMERGENCY_SEQUENCE,
};
pub use finalize::{finalize_psbt, FinalizedTx};
pub use verify::{verify_psbt_policy, PolicyReport};
