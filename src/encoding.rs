use crate::types::UserOperation;
use ethers::types::{Address, Bytes, H256, U256};

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b.as_ref()))
}

/// Renders a UserOperation in the EntryPoint v0.7 JSON-RPC shape.
///
/// Paymaster fields are only emitted when a paymaster is set; bundlers reject
/// a `paymaster` key with a null or zero address.
pub fn user_op_to_json(op: &UserOperation) -> serde_json::Value {
    let mut json = serde_json::json!({
        "sender": fmt_address(op.sender),
        "nonce": fmt_u256(op.nonce),
        "callData": fmt_bytes(&op.call_data),
        "callGasLimit": fmt_u256(op.call_gas_limit),
        "verificationGasLimit": fmt_u256(op.verification_gas_limit),
        "preVerificationGas": fmt_u256(op.pre_verification_gas),
        "maxFeePerGas": fmt_u256(op.max_fee_per_gas),
        "maxPriorityFeePerGas": fmt_u256(op.max_priority_fee_per_gas),
        "signature": fmt_bytes(&op.signature),
    });

    if let (Some(paymaster), Some(obj)) = (op.paymaster, json.as_object_mut()) {
        obj.insert("paymaster".into(), fmt_address(paymaster).into());
        obj.insert(
            "paymasterData".into(),
            fmt_bytes(&op.paymaster_data).into(),
        );
        obj.insert(
            "paymasterVerificationGasLimit".into(),
            fmt_u256(op.paymaster_verification_gas_limit).into(),
        );
        obj.insert(
            "paymasterPostOpGasLimit".into(),
            fmt_u256(op.paymaster_post_op_gas_limit).into(),
        );
    }

    json
}

pub fn parse_u256_quantity(s: &str) -> anyhow::Result<U256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Ok(U256::zero());
    }
    Ok(U256::from_str_radix(s, 16)?)
}

pub fn parse_h256(s: &str) -> anyhow::Result<H256> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        anyhow::bail!("expected 32-byte hex, got {} bytes", bytes.len());
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(H256(arr))
}

pub fn parse_address(s: &str) -> anyhow::Result<Address> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s)?;
    if bytes.len() != 20 {
        anyhow::bail!("expected 20-byte hex, got {} bytes", bytes.len());
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_bytes(s: &str) -> anyhow::Result<Bytes> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(Bytes::from(hex::decode(s)?))
}
