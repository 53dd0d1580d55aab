//! The blockchain adapter seam.
//!
//! The engine depends on this interface, never on a concrete backend.
//! Electrum, Esplora or an in-memory double all plug in from the outside.

use bitcoin::{Address, Txid};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use tapvault_core::types::Utxo;
use tapvault_core::Error as CoreError;

/// Adapter failures, split by whether a retry can help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Worth retrying: timeouts, dropped connections, rate limits.
    #[error("transient adapter failure: {0}")]
    Transient(String),

    /// Retrying cannot help: malformed data, unsupported queries.
    #[error("permanent adapter failure: {0}")]
    Permanent(String),
}

impl From<AdapterError> for CoreError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Transient(msg) => CoreError::AdapterTransient(msg),
            AdapterError::Permanent(msg) => CoreError::AdapterPermanent(msg),
        }
    }
}

/// Read-only view of the chain, injected by the caller.
pub trait BlockchainAdapter {
    /// Unspent outputs paying `address`.
    fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, AdapterError>;

    /// Current chain tip height.
    fn get_tip_height(&self) -> Result<u32, AdapterError>;

    /// Witness data associated with `txid:vout`, when the backend keeps it:
    /// either the stack that spent the output or a cached copy of the
    /// revealed leaves. Returns `None` when unavailable.
    fn get_tx_witness(&self, txid: &Txid, vout: u32)
        -> Result<Option<Vec<Vec<u8>>>, AdapterError>;
}

/// Cooperative cancellation handle checked between per-index queries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
