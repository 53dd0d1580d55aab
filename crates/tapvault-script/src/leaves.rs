//! The two tapscript leaves committed by every vault output.

use bitcoin::key::XOnlyPublicKey;
use bitcoin::opcodes::all::{OP_CHECKSIGVERIFY, OP_CSV, OP_PUSHNUM_1, OP_PUSHNUM_16, OP_RETURN};
use bitcoin::script::{Instruction, PushBytesBuf};
use bitcoin::{Script, ScriptBuf};

use tapvault_core::{Error, VaultMetadata};

/// Build the delayed spending leaf:
///
/// ```text
/// <primary_key> OP_CHECKSIGVERIFY <delay_blocks> OP_CSV
/// ```
///
/// OP_CHECKSIGVERIFY consumes the signature and aborts unless it is valid;
/// OP_CSV then requires the input's nSequence to satisfy the BIP-68 relative
/// timelock in block units, leaving the (non-zero) delay on the stack as the
/// script's success value.
pub fn delayed_spend_script(primary_key: &XOnlyPublicKey, delay_blocks: u16) -> ScriptBuf {
    ScriptBuf::builder()
        .push_x_only_key(primary_key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(delay_blocks as i64)
        .push_opcode(OP_CSV)
        .into_script()
}

/// Build the metadata leaf: `OP_RETURN <encoded metadata>`.
///
/// OP_RETURN fails immediately, so the leaf is unspendable, yet the record is
/// committed to the Taproot merkle root and recoverable by revealing the
/// leaf.
pub fn metadata_script(metadata: &VaultMetadata) -> Result<ScriptBuf, Error> {
    let bytes = metadata.encode()?;
    let len = bytes.len();
    let push = PushBytesBuf::try_from(bytes).map_err(|_| Error::MetadataEncodeTooLong {
        len,
        max: tapvault_core::metadata::MAX_METADATA_BYTES,
    })?;

    Ok(ScriptBuf::builder()
        .push_opcode(OP_RETURN)
        .push_slice(push)
        .into_script())
}

/// Decode the metadata record out of a metadata leaf.
pub fn decode_metadata_script(script: &Script) -> Result<VaultMetadata, Error> {
    let mut instructions = script
        .instructions()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::MetadataDecodeFailed(format!("malformed script: {}", e)))?
        .into_iter();

    match instructions.next() {
        Some(Instruction::Op(op)) if op == OP_RETURN => {}
        _ => {
            return Err(Error::MetadataDecodeFailed(
                "metadata leaf must start with OP_RETURN".into(),
            ))
        }
    }

    let payload = match instructions.next() {
        Some(Instruction::PushBytes(bytes)) => bytes.as_bytes().to_vec(),
        _ => {
            return Err(Error::MetadataDecodeFailed(
                "metadata leaf carries no payload push".into(),
            ))
        }
    };

    if instructions.next().is_some() {
        return Err(Error::MetadataDecodeFailed(
            "unexpected opcodes after metadata payload".into(),
        ));
    }

    VaultMetadata::decode(&payload)
}

/// Pull the primary key and CSV delay back out of a spending leaf.
///
/// Used by policy verification to prove a PSBT's revealed leaf matches the
/// leaf this vault would commit.
pub fn parse_spend_script(script: &Script) -> Result<(XOnlyPublicKey, u16), Error> {
    let instructions: Vec<Instruction> = script
        .instructions()
        .collect::<Result<_, _>>()
        .map_err(|e| Error::PolicyViolation(format!("malformed spend script: {}", e)))?;

    match instructions.as_slice() {
        [Instruction::PushBytes(key), Instruction::Op(checksig), delay_push, Instruction::Op(csv)]
            if *checksig == OP_CHECKSIGVERIFY && *csv == OP_CSV =>
        {
            let key = XOnlyPublicKey::from_slice(key.as_bytes()).map_err(|_| {
                Error::PolicyViolation("spend script key is not a valid x-only key".into())
            })?;
            let delay = decode_pushed_number(delay_push)?;
            let delay = u16::try_from(delay).map_err(|_| {
                Error::PolicyViolation(format!("CSV delay {} outside block range", delay))
            })?;
            Ok((key, delay))
        }
        _ => Err(Error::PolicyViolation(
            "script is not a vault spending leaf".into(),
        )),
    }
}

/// Decode a minimally-encoded script number push (OP_PUSHNUM or raw LE bytes).
fn decode_pushed_number(instruction: &Instruction) -> Result<i64, Error> {
    match instruction {
        Instruction::Op(op)
            if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&op.to_u8()) =>
        {
            Ok((op.to_u8() - OP_PUSHNUM_1.to_u8()) as i64 + 1)
        }
        Instruction::PushBytes(bytes) => {
            let bytes = bytes.as_bytes();
            if bytes.is_empty() || bytes.len() > 4 {
                return Err(Error::PolicyViolation(
                    "CSV delay push has invalid length".into(),
                ));
            }
            let mut value: i64 = 0;
            for (i, b) in bytes.iter().enumerate() {
                value |= ((b & if i == bytes.len() - 1 { 0x7f } else { 0xff }) as i64) << (8 * i);
            }
            if bytes[bytes.len() - 1] & 0x80 != 0 {
                value = -value;
            }
            Ok(value)
        }
        _ => Err(Error::PolicyViolation(
            "expected a number push before OP_CSV".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tapvault_core::types::VaultTemplate;

    fn test_key() -> XOnlyPublicKey {
        XOnlyPublicKey::from_str(
            "18845781f631c48f1c9709e23092067d06837f30aa0cd0544ac887fe91ddd166",
        )
        .unwrap()
    }

    #[test]
    fn test_spend_script_shape() {
        let script = delayed_spend_script(&test_key(), 1008);
        let asm = script.to_asm_string();
        assert!(asm.contains("OP_CHECKSIGVERIFY"), "{}", asm);
        assert!(
            asm.contains("OP_CSV") || asm.contains("OP_CHECKSEQUENCEVERIFY"),
            "{}",
            asm
        );
    }

    #[test]
    fn test_spend_script_roundtrip() {
        for delay in [1u16, 15, 144, 1008, u16::MAX] {
            let script = delayed_spend_script(&test_key(), delay);
            let (key, parsed_delay) = parse_spend_script(&script).unwrap();
            assert_eq!(key, test_key());
            assert_eq!(parsed_delay, delay, "delay {} did not round-trip", delay);
        }
    }

    #[test]
    fn test_parse_rejects_foreign_script() {
        let script = ScriptBuf::builder()
            .push_x_only_key(&test_key())
            .push_opcode(bitcoin::opcodes::all::OP_CHECKSIG)
            .into_script();
        assert!(parse_spend_script(&script).is_err());
    }

    #[test]
    fn test_metadata_script_roundtrip() {
        let metadata = VaultMetadata::canonical(&VaultTemplate::savings(), 3, vec![0, 1]);
        let script = metadata_script(&metadata).unwrap();

        let asm = script.to_asm_string();
        assert!(asm.starts_with("OP_RETURN"), "{}", asm);

        assert_eq!(decode_metadata_script(&script).unwrap(), metadata);
    }

    #[test]
    fn test_decode_rejects_spend_leaf() {
        let script = delayed_spend_script(&test_key(), 144);
        assert!(decode_metadata_script(&script).is_err());
    }

    #[test]
    fn test_decode_rejects_bare_op_return() {
        let script = ScriptBuf::builder().push_opcode(OP_RETURN).into_script();
        assert!(decode_metadata_script(&script).is_err());
    }
}
