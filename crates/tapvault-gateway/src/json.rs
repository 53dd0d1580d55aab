//! JSON compatibility shim for foreign callers.
//!
//! Wraps the typed gateway in a string-in/string-out dispatch: requests are
//! JSON payloads, responses are `{"ok": ...}` or
//! `{"error": {"code", "kind", "message"}}` envelopes. The shim owns every
//! string it returns; nothing borrows from the engine across the boundary.
//!
//! Operations that need a blockchain adapter (`scan_for_vaults`) stay on the
//! typed surface; an adapter cannot cross a string boundary.

use bitcoin::Network;
use serde::Serialize;
use serde_json::json;

use tapvault_core::Error;

use crate::requests::ErrorPayload;
use crate::Gateway;

/// Parse a caller-supplied network name.
pub fn network_from_name(name: &str) -> Result<Network, Error> {
    match name.trim().to_ascii_lowercase().as_str() {
        "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        other => Err(Error::InvalidInput(format!("unknown network {:?}", other))),
    }
}

/// Dispatch one operation against the gateway.
///
/// `payload` is the JSON-encoded request for `op`; operations without inputs
/// ignore it. The result is always a JSON envelope, never a panic.
pub fn handle_request(gateway: &Gateway, op: &str, payload: &str) -> String {
    match dispatch(gateway, op, payload) {
        Ok(value) => json!({ "ok": value }).to_string(),
        Err(err) => json!({ "error": ErrorPayload::from(&err) }).to_string(),
    }
}

fn dispatch(gateway: &Gateway, op: &str, payload: &str) -> Result<serde_json::Value, Error> {
    match op {
        "version" => to_value(json!({ "version": crate::version() })),
        "init" => {
            let req: serde_json::Value = parse(payload)?;
            let name = req
                .get("network")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("init requires a network name".into()))?;
            let network = network_from_name(name)?;
            if network != gateway.network() {
                return Err(Error::NetworkMismatch {
                    expected: gateway.network(),
                    found: name.to_string(),
                });
            }
            to_value(json!({ "network": network.to_string() }))
        }
        "generate_vault_address" => to_value(gateway.generate_vault_address(&parse(payload)?)?),
        "decode_metadata_leaf" => {
            let req: serde_json::Value = parse(payload)?;
            let hex = req
                .get("script_hex")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("expected a script_hex field".into()))?;
            to_value(gateway.decode_metadata_leaf(hex)?)
        }
        "build_delayed_spend_psbt" => to_value(gateway.build_delayed_spend_psbt(&parse(payload)?)?),
        "build_emergency_psbt" => to_value(gateway.build_emergency_psbt(&parse(payload)?)?),
        "build_cancel_psbt" => to_value(gateway.build_cancel_psbt(&parse(payload)?)?),
        "verify_psbt_policy" => to_value(gateway.verify_psbt_policy(&parse(payload)?)?),
        "finalize_psbt" => to_value(gateway.finalize_psbt(&parse(payload)?)?),
        "derive_scan_addresses" => to_value(gateway.derive_scan_addresses(&parse(payload)?)?),
        "reconstruct_vault" => to_value(gateway.reconstruct_vault(&parse(payload)?)?),
        "validate_address" => {
            let req: serde_json::Value = parse(payload)?;
            let address = req
                .get("address")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("expected an address field".into()))?;
            to_value(gateway.validate_address(address))
        }
        "validate_xpub" => {
            let req: serde_json::Value = parse(payload)?;
            let xpub = req
                .get("xpub")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::InvalidInput("expected an xpub field".into()))?;
            to_value(gateway.validate_xpub(xpub))
        }
        "blocks_to_time_estimate" => {
            let req: serde_json::Value = parse(payload)?;
            let blocks = req
                .get("blocks")
                .and_then(|v| v.as_u64())
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::InvalidInput("expected a blocks field".into()))?;
            to_value(json!({ "estimate": gateway.blocks_to_time_estimate(blocks) }))
        }
        other => Err(Error::InvalidInput(format!("unknown operation {:?}", other))),
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: &str) -> Result<T, Error> {
    serde_json::from_str(payload).map_err(|e| Error::SerializationError(format!("request: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value, Error> {
    serde_json::to_value(value).map_err(|e| Error::SerializationError(format!("response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    fn gateway() -> Gateway {
        Gateway::new(Network::Bitcoin)
    }

    fn ok_value(response: &str) -> serde_json::Value {
        let envelope: serde_json::Value = serde_json::from_str(response).unwrap();
        assert!(
            envelope.get("error").is_none(),
            "unexpected error: {}",
            envelope
        );
        envelope["ok"].clone()
    }

    #[test]
    fn test_version_envelope() {
        let value = ok_value(&handle_request(&gateway(), "version", ""));
        assert!(value["version"].as_str().unwrap().contains('.'));
    }

    #[test]
    fn test_init_checks_network() {
        let value = ok_value(&handle_request(&gateway(), "init", r#"{"network":"mainnet"}"#));
        assert_eq!(value["network"], "bitcoin");

        let response = handle_request(&gateway(), "init", r#"{"network":"signet"}"#);
        let envelope: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(envelope["error"]["code"], 1003);

        let response = handle_request(&gateway(), "init", r#"{"network":"litecoin"}"#);
        let envelope: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(envelope["error"]["code"], 4002);
    }

    #[test]
    fn test_generate_and_decode_roundtrip_through_json() {
        let payload = format!(
            r#"{{
                "primary_xpub": "{}",
                "template": {{"savings": {{"delay_blocks": 1008}}}},
                "vault_index": 4
            }}"#,
            TEST_XPUB
        );
        let generated = ok_value(&handle_request(&gateway(), "generate_vault_address", &payload));
        let address = generated["address"].as_str().unwrap();
        assert!(address.starts_with("bc1p"));

        let decode_payload = format!(
            r#"{{"script_hex": "{}"}}"#,
            generated["metadata_script_hex"].as_str().unwrap()
        );
        let metadata = ok_value(&handle_request(&gateway(), "decode_metadata_leaf", &decode_payload));
        assert_eq!(metadata["vault_index"], 4);
        assert_eq!(metadata["template_id"], "savings_v1");
    }

    #[test]
    fn test_unknown_operation() {
        let response = handle_request(&gateway(), "mint_money", "{}");
        let envelope: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(envelope["error"]["code"], 4002);
        assert_eq!(envelope["error"]["kind"], "InvalidInput");
    }

    #[test]
    fn test_malformed_payload_is_serialization_error() {
        let response = handle_request(&gateway(), "generate_vault_address", "{not json");
        let envelope: serde_json::Value = serde_json::from_str(&response).unwrap();
        assert_eq!(envelope["error"]["code"], 4001);
    }

    #[test]
    fn test_blocks_to_time_through_json() {
        let value = ok_value(&handle_request(
            &gateway(),
            "blocks_to_time_estimate",
            r#"{"blocks": 1008}"#,
        ));
        assert_eq!(value["estimate"], "~7 days");
    }

    #[test]
    fn test_validate_xpub_through_json() {
        let payload = format!(r#"{{"xpub": "{}"}}"#, TEST_XPUB);
        let value = ok_value(&handle_request(&gateway(), "validate_xpub", &payload));
        assert_eq!(value["valid"], true);
    }
}
