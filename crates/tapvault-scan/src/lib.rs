//! TapVault Scan
//!
//! Deterministic vault recovery: from an xpub alone, re-derive the universe
//! of candidate vault addresses, ask an injected blockchain adapter which
//! ones exist on-chain, and rebuild full vault configurations from the
//! metadata committed in each hit.
//!
//! All I/O goes through the [`BlockchainAdapter`] trait; the scanner itself
//! is pure and synchronous. Transient adapter errors are retried with
//! exponential backoff; per-address failures are aggregated in the report
//! instead of aborting the sweep, and a cancelled sweep returns everything
//! confirmed so far.

pub mod adapter;
pub mod classify;
pub mod reconstruct;
pub mod scanner;

pub use adapter::{AdapterError, BlockchainAdapter, CancelToken};
pub use classify::{classify_spend, classify_witness, DetectionMethod, SpendClassification, SpendKind};
pub use reconstruct::{metadata_from_witness, reconstruct_vault, reconstruct_vault_with_adapter};
pub use scanner::{
    derive_scan_candidates, RecoveryScanner, ScanCandidate, ScanFailure, ScanReport, ScanStatus,
    ScanWindow,
};
