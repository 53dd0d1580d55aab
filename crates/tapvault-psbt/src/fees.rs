//! Weight-unit fee estimation.
//!
//! Conservative witness-size accounting per spending path:
//!
//! ```text
//! Input base: (36 outpoint + 4 sequence + 1 empty script_sig) * 4 = 164 WU
//! Key path witness:    count(1) + sig(1+64)                          =  66 WU
//! Script path witness: count(1) + sig(1+64) + script(1+len)
//!                      + control block(1 + 33 + 32*depth)            = 133+len WU
//! P2TR output: (8 value + 1 len + 34 script) * 4                     = 172 WU
//! ```
//!
//! The vault tree has depth 1, so the control block is always 65 bytes.

use tapvault_core::types::SpendPath;

/// Version, locktime, input/output counts and the segwit marker.
pub const TX_OVERHEAD_WU: usize = 42;

/// Non-witness weight of one input.
pub const INPUT_BASE_WU: usize = 164;

/// Weight of one P2TR-sized output (an upper bound for smaller script types).
pub const P2TR_OUTPUT_WU: usize = 172;

/// Witness weight for a key-path spend: one Schnorr signature.
pub const KEY_PATH_WITNESS_WU: usize = 66;

/// Witness weight for a script-path spend through the delayed leaf.
pub fn script_path_witness_wu(spend_script_len: usize) -> usize {
    1 + 65 + (1 + spend_script_len) + (1 + 65)
}

/// Witness weight for `path`, given the vault's spending-leaf size.
pub fn witness_wu(path: SpendPath, spend_script_len: usize) -> usize {
    match path {
        SpendPath::Delayed => script_path_witness_wu(spend_script_len),
        SpendPath::Emergency => KEY_PATH_WITNESS_WU,
    }
}

/// Estimate the virtual size of a spend with `num_inputs` vault inputs and a
/// single destination output.
pub fn estimate_vsize(num_inputs: usize, path: SpendPath, spend_script_len: usize) -> usize {
    let wu = TX_OVERHEAD_WU
        + num_inputs * (INPUT_BASE_WU + witness_wu(path, spend_script_len))
        + P2TR_OUTPUT_WU;
    wu.div_ceil(4) + 1
}

/// Fee in sats: `ceil(vsize * fee_rate)` (exact, the rate is integral).
pub fn fee_for(vsize: usize, fee_rate_sat_vb: u64) -> u64 {
    vsize as u64 * fee_rate_sat_vb
}

#[cfg(test)]
mod tests {
    use super::*;

    // The delayed leaf is 33 (keypush) + 1 + 3 (delay push) + 1 bytes.
    const SPEND_SCRIPT_LEN: usize = 38;

    #[test]
    fn test_key_path_lighter_than_script_path() {
        let key = estimate_vsize(1, SpendPath::Emergency, SPEND_SCRIPT_LEN);
        let script = estimate_vsize(1, SpendPath::Delayed, SPEND_SCRIPT_LEN);
        assert!(key < script, "key {} vs script {}", key, script);
    }

    #[test]
    fn test_single_input_estimates_are_sane() {
        let vsize = estimate_vsize(1, SpendPath::Delayed, SPEND_SCRIPT_LEN);
        assert!(vsize > 100 && vsize < 200, "{}", vsize);

        let vsize = estimate_vsize(1, SpendPath::Emergency, SPEND_SCRIPT_LEN);
        assert!(vsize > 90 && vsize < 150, "{}", vsize);
    }

    #[test]
    fn test_vsize_grows_with_inputs() {
        let one = estimate_vsize(1, SpendPath::Delayed, SPEND_SCRIPT_LEN);
        let two = estimate_vsize(2, SpendPath::Delayed, SPEND_SCRIPT_LEN);
        assert!(two > one + 50);
    }

    #[test]
    fn test_fee_scales_linearly() {
        let vsize = estimate_vsize(1, SpendPath::Delayed, SPEND_SCRIPT_LEN);
        assert_eq!(fee_for(vsize, 10), 2 * fee_for(vsize, 5));
        assert!(fee_for(vsize, 1) >= vsize as u64);
    }
}
