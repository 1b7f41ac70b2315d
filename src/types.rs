use ethers::types::{Address, Bytes, H256, U256};
use serde::Deserialize;

/// ERC-4337 UserOperation (EntryPoint v0.7, unpacked form).
///
/// `paymaster_verification_gas_limit` and `paymaster_post_op_gas_limit` are
/// part of the v0.7 wire format but are not populated by the current
/// sponsorship flow; they only enter the packed encoding when
/// [`PaymasterPacking::Full`](crate::entrypoint::PaymasterPacking) is
/// selected.
///
/// `signature` is empty until the hash returned by
/// [`Client::user_operation_and_hash_to_sign`](crate::client::Client::user_operation_and_hash_to_sign)
/// has been signed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Option<Address>,
    pub paymaster_data: Bytes,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub signature: Bytes,
}

/// Decoded `eth_getUserOperationReceipt` payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub success: bool,
    #[serde(default)]
    pub actual_gas_cost: U256,
    #[serde(default)]
    pub actual_gas_used: U256,
    #[serde(default)]
    pub reason: Option<String>,
    /// Receipt of the bundle transaction that included the operation.
    #[serde(default)]
    pub receipt: serde_json::Value,
    #[serde(default)]
    pub logs: serde_json::Value,
}

/// Outcome of a bounded receipt poll.
///
/// Exhausting the retry budget is a legitimate pending state on the bundler
/// side, distinct from an infrastructure failure (which surfaces as a
/// [`ClientError`](crate::error::ClientError)).
#[derive(Clone, Debug)]
pub enum ReceiptOutcome {
    Delivered(UserOperationReceipt),
    NotYetAvailable,
}

impl ReceiptOutcome {
    pub fn delivered(self) -> Option<UserOperationReceipt> {
        match self {
            Self::Delivered(receipt) => Some(receipt),
            Self::NotYetAvailable => None,
        }
    }
}

/// Result of submitting a UserOperation to the bundler.
///
/// `receipt` is only present when the caller asked to wait and the bundler
/// produced one within the polling budget.
#[derive(Clone, Debug)]
pub struct UserOperationResult {
    pub user_op_hash: H256,
    pub receipt: Option<UserOperationReceipt>,
}
