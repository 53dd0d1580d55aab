//! The recovery sweep.
//!
//! For every index in the window and every known template, derive the
//! candidate address and ask the adapter whether it holds funds. Candidates
//! move through a small state machine, terminal on first transition:
//!
//! ```text
//! Pending -> Queried -> Empty | Found | TransientError | PermanentError
//! ```
//!
//! Transient failures are retried up to three times with exponential
//! backoff; whatever still fails is reported per-address without aborting
//! the sweep.

use bitcoin::Network;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

use tapvault_core::types::{Utxo, VaultConfig, VaultPolicy, VaultTemplate};
use tapvault_core::{parse_xpub, Error};
use tapvault_script::taproot::generate_vault_output;

use crate::adapter::{AdapterError, BlockchainAdapter, CancelToken};
use crate::reconstruct::{config_for_found, known_templates};

/// Half-open index window `[start_index, start_index + count)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanWindow {
    pub start_index: u32,
    pub count: u32,
}

impl ScanWindow {
    pub fn new(start_index: u32, count: u32) -> Self {
        Self { start_index, count }
    }

    /// Window starting at zero with the policy's default size.
    pub fn default_for(policy: &VaultPolicy) -> Self {
        Self::new(0, policy.default_scan_count)
    }

    pub fn indices(&self) -> std::ops::Range<u32> {
        self.start_index..self.start_index.saturating_add(self.count)
    }
}

/// A derived candidate address, before any chain query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCandidate {
    pub index: u32,
    pub template_id: String,
    pub address: String,
    pub descriptor: String,
}

/// Per-candidate progress. Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    Pending,
    Queried,
    Empty,
    Found,
    TransientError,
    PermanentError,
}

impl CandidateState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CandidateState::Pending | CandidateState::Queried)
    }

    /// Move to `next`, enforcing the forward-only state machine.
    fn advance(&mut self, next: CandidateState) {
        debug_assert!(
            !self.is_terminal(),
            "candidate state {:?} is terminal, cannot move to {:?}",
            self,
            next
        );
        *self = next;
    }
}

/// How a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

/// A candidate the adapter kept failing on.
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub vault_index: u32,
    pub template_id: String,
    pub address: String,
    pub error: Error,
}

/// Sweep result: recovered vaults sorted by index, plus aggregated failures.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub vaults: Vec<VaultConfig>,
    pub failures: Vec<ScanFailure>,
    pub status: ScanStatus,
    /// Chain tip at sweep start, when the adapter could report it. Lets the
    /// caller compute unlock heights for what was found.
    pub tip_height: Option<u32>,
}

/// Derive the candidate addresses for a window without querying anything.
pub fn derive_scan_candidates(
    xpub: &str,
    network: Network,
    window: &ScanWindow,
    policy: &VaultPolicy,
) -> Result<Vec<ScanCandidate>, Error> {
    parse_xpub(xpub, network)?;

    let mut candidates = Vec::with_capacity(window.count as usize * known_templates().len());
    for index in window.indices() {
        for template in known_templates() {
            let output = generate_vault_output(xpub, None, &template, index, vec![], network, policy)?;
            candidates.push(ScanCandidate {
                index,
                template_id: template.template_id().to_string(),
                address: output.address.to_string(),
                descriptor: output.descriptor,
            });
        }
    }
    Ok(candidates)
}

/// Synchronous recovery scanner over an injected adapter.
pub struct RecoveryScanner<'a, A: BlockchainAdapter + ?Sized> {
    adapter: &'a A,
    network: Network,
    policy: VaultPolicy,
    max_attempts: u32,
    backoff_base: Duration,
}

impl<'a, A: BlockchainAdapter + ?Sized> RecoveryScanner<'a, A> {
    pub fn new(adapter: &'a A, network: Network) -> Self {
        Self {
            adapter,
            network,
            policy: VaultPolicy::default(),
            max_attempts: 3,
            backoff_base: Duration::from_millis(100),
        }
    }

    pub fn with_policy(mut self, policy: VaultPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Tune the retry schedule (tests use a zero backoff).
    pub fn with_retry(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff_base = backoff_base;
        self
    }

    /// Sweep the window. Cancellation is honored between candidate queries
    /// and returns everything already confirmed.
    pub fn scan(
        &self,
        xpub: &str,
        window: &ScanWindow,
        token: &CancelToken,
    ) -> Result<ScanReport, Error> {
        parse_xpub(xpub, self.network)?;

        let tip_height = match self.adapter.get_tip_height() {
            Ok(height) => Some(height),
            Err(err) => {
                log::debug!("tip height unavailable: {}", err);
                None
            }
        };

        let mut vaults: Vec<VaultConfig> = Vec::new();
        let mut failures: Vec<ScanFailure> = Vec::new();

        'sweep: for index in window.indices() {
            for template in known_templates() {
                if token.is_cancelled() {
                    log::debug!("sweep cancelled at index {}", index);
                    break 'sweep;
                }
                self.query_candidate(xpub, index, &template, &mut vaults, &mut failures)?;
            }
        }

        vaults.sort_by_key(|v| v.metadata.vault_index);

        let status = if token.is_cancelled() {
            ScanStatus::Cancelled
        } else {
            ScanStatus::Completed
        };

        log::debug!(
            "sweep finished: {} vaults, {} failures, {:?}",
            vaults.len(),
            failures.len(),
            status
        );

        Ok(ScanReport {
            vaults,
            failures,
            status,
            tip_height,
        })
    }

    fn query_candidate(
        &self,
        xpub: &str,
        index: u32,
        template: &VaultTemplate,
        vaults: &mut Vec<VaultConfig>,
        failures: &mut Vec<ScanFailure>,
    ) -> Result<(), Error> {
        let output =
            generate_vault_output(xpub, None, template, index, vec![], self.network, &self.policy)?;
        let address = output.address.clone();

        let mut state = CandidateState::Pending;
        state.advance(CandidateState::Queried);

        match self.query_with_retry(&address) {
            Ok(utxos) if utxos.is_empty() => state.advance(CandidateState::Empty),
            Ok(utxos) => {
                let config = config_for_found(output, xpub, self.network, &utxos)?;
                log::debug!(
                    "found vault {} at index {} ({} utxos)",
                    config.id,
                    index,
                    utxos.len()
                );
                vaults.push(config);
                state.advance(CandidateState::Found);
            }
            Err(err) => {
                state.advance(match err {
                    AdapterError::Transient(_) => CandidateState::TransientError,
                    AdapterError::Permanent(_) => CandidateState::PermanentError,
                });
                failures.push(ScanFailure {
                    vault_index: index,
                    template_id: template.template_id().to_string(),
                    address: address.to_string(),
                    error: err.into(),
                });
            }
        }

        debug_assert!(state.is_terminal());
        Ok(())
    }

    /// Query one address, retrying transient failures with exponential
    /// backoff.
    fn query_with_retry(&self, address: &bitcoin::Address) -> Result<Vec<Utxo>, AdapterError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.adapter.get_utxos(address) {
                Ok(utxos) => return Ok(utxos),
                Err(AdapterError::Transient(msg)) if attempt < self.max_attempts => {
                    let delay = self.backoff_base * 2u32.saturating_pow(attempt - 1);
                    log::warn!(
                        "transient failure for {} (attempt {}/{}): {}; retrying in {:?}",
                        address,
                        attempt,
                        self.max_attempts,
                        msg,
                        delay
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{Address, Txid};
    use std::cell::RefCell;
    use std::collections::HashMap;

    const TEST_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    /// Deterministic in-memory adapter double with failure injection.
    #[derive(Default)]
    struct MockAdapter {
        utxos: HashMap<String, Vec<Utxo>>,
        tip: u32,
        /// Addresses that fail transiently this many times before succeeding.
        flaky: RefCell<HashMap<String, u32>>,
        /// Addresses that always fail permanently.
        broken: Vec<String>,
        witnesses: HashMap<(Txid, u32), Vec<Vec<u8>>>,
        calls: RefCell<u32>,
    }

    impl BlockchainAdapter for MockAdapter {
        fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, AdapterError> {
            *self.calls.borrow_mut() += 1;
            let key = address.to_string();

            if self.broken.contains(&key) {
                return Err(AdapterError::Permanent("index corrupted".into()));
            }
            if let Some(remaining) = self.flaky.borrow_mut().get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AdapterError::Transient("connection reset".into()));
                }
            }
            Ok(self.utxos.get(&key).cloned().unwrap_or_default())
        }

        fn get_tip_height(&self) -> Result<u32, AdapterError> {
            Ok(self.tip)
        }

        fn get_tx_witness(
            &self,
            txid: &Txid,
            vout: u32,
        ) -> Result<Option<Vec<Vec<u8>>>, AdapterError> {
            Ok(self.witnesses.get(&(*txid, vout)).cloned())
        }
    }

    fn fund(adapter: &mut MockAdapter, index: u32, template: &VaultTemplate, height: u32) -> String {
        let output = generate_vault_output(
            TEST_XPUB,
            None,
            template,
            index,
            vec![],
            Network::Bitcoin,
            &VaultPolicy::default(),
        )
        .unwrap();
        let address = output.address.to_string();
        adapter.utxos.insert(
            address.clone(),
            vec![Utxo {
                txid: Txid::from_byte_array([index as u8; 32]),
                vout: 0,
                value_sats: 100_000,
                script_pubkey: output.script_pubkey(),
                confirmations: 6,
                block_height: Some(height),
            }],
        );
        address
    }

    fn scanner(adapter: &MockAdapter) -> RecoveryScanner<'_, MockAdapter> {
        RecoveryScanner::new(adapter, Network::Bitcoin).with_retry(3, Duration::ZERO)
    }

    #[test]
    fn test_sweep_finds_funded_vaults_in_index_order() {
        let mut adapter = MockAdapter::default();
        // Funded out of order; the report must come back sorted.
        fund(&mut adapter, 9, &VaultTemplate::savings(), 830_200);
        fund(&mut adapter, 2, &VaultTemplate::spending(), 830_100);

        let report = scanner(&adapter)
            .scan(TEST_XPUB, &ScanWindow::new(0, 12), &CancelToken::new())
            .unwrap();

        assert_eq!(report.status, ScanStatus::Completed);
        assert!(report.failures.is_empty());
        assert_eq!(report.vaults.len(), 2);
        assert_eq!(report.vaults[0].metadata.vault_index, 2);
        assert_eq!(report.vaults[1].metadata.vault_index, 9);
        assert_eq!(report.vaults[0].template, VaultTemplate::spending());
        assert_eq!(report.vaults[0].created_at_height, Some(830_100));
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let mut adapter = MockAdapter::default();
        let address = fund(&mut adapter, 0, &VaultTemplate::savings(), 830_000);
        // Fail twice, succeed on the third (and final) attempt.
        adapter.flaky.borrow_mut().insert(address, 2);

        let report = scanner(&adapter)
            .scan(TEST_XPUB, &ScanWindow::new(0, 1), &CancelToken::new())
            .unwrap();

        assert_eq!(report.vaults.len(), 1);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_exhausted_retries_become_failures_without_aborting() {
        let mut adapter = MockAdapter::default();
        let flaky_address = fund(&mut adapter, 0, &VaultTemplate::savings(), 830_000);
        fund(&mut adapter, 1, &VaultTemplate::savings(), 830_050);
        // More failures than the retry budget.
        adapter.flaky.borrow_mut().insert(flaky_address, 10);

        let report = scanner(&adapter)
            .scan(TEST_XPUB, &ScanWindow::new(0, 2), &CancelToken::new())
            .unwrap();

        assert_eq!(report.status, ScanStatus::Completed);
        assert_eq!(report.vaults.len(), 1);
        assert_eq!(report.vaults[0].metadata.vault_index, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].vault_index, 0);
        assert_eq!(report.failures[0].error.code(), 5001);
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        let mut adapter = MockAdapter::default();
        let address = fund(&mut adapter, 0, &VaultTemplate::savings(), 830_000);
        adapter.broken.push(address);

        let report = scanner(&adapter)
            .scan(TEST_XPUB, &ScanWindow::new(0, 1), &CancelToken::new())
            .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error.code(), 5002);
        // 1 query for the broken savings candidate + 1 for the empty
        // spending candidate; no retries on permanent failure.
        assert_eq!(*adapter.calls.borrow(), 2);
    }

    #[test]
    fn test_cancellation_preserves_progress() {
        let mut adapter = MockAdapter::default();
        fund(&mut adapter, 0, &VaultTemplate::savings(), 830_000);

        let token = CancelToken::new();
        token.cancel();

        let report = scanner(&adapter)
            .scan(TEST_XPUB, &ScanWindow::new(0, 50), &CancelToken::new())
            .unwrap();
        assert_eq!(report.status, ScanStatus::Completed);

        let cancelled = scanner(&adapter)
            .scan(TEST_XPUB, &ScanWindow::new(0, 50), &token)
            .unwrap();
        assert_eq!(cancelled.status, ScanStatus::Cancelled);
        assert!(cancelled.vaults.is_empty());
    }

    #[test]
    fn test_candidate_derivation_is_deterministic() {
        let policy = VaultPolicy::default();
        let window = ScanWindow::new(0, 3);
        let a = derive_scan_candidates(TEST_XPUB, Network::Bitcoin, &window, &policy).unwrap();
        let b = derive_scan_candidates(TEST_XPUB, Network::Bitcoin, &window, &policy).unwrap();

        assert_eq!(a.len(), 6); // 3 indices x 2 templates
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.address, y.address);
            assert_eq!(x.descriptor, y.descriptor);
        }
    }

    #[test]
    fn test_scan_rejects_wrong_network_xpub() {
        let adapter = MockAdapter::default();
        let err = RecoveryScanner::new(&adapter, Network::Testnet)
            .scan(TEST_XPUB, &ScanWindow::new(0, 1), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::NetworkMismatch { .. }));
    }
}
