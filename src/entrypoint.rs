use crate::error::ClientError;
use crate::types::UserOperation;
use ethers::abi::{encode, AbiParser, Token};
use ethers::contract::{Contract, ContractError};
use ethers::providers::Middleware;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{keccak256, to_checksum};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

pub const ENTRY_POINT_VERSION_0_7: &str = "0.7";

/// EntryPoint v0.7 singleton, 0x0000000071727De22E5E9d8BAf0edAc6f37da032.
/// Deployed at the same address on every supported chain.
const ENTRY_POINT_ADDRESS_0_7: [u8; 20] = [
    0x00, 0x00, 0x00, 0x00, 0x71, 0x72, 0x7d, 0xe2, 0x2e, 0x5e, 0x9d, 0x8b, 0xaf, 0x0e, 0xda,
    0xc6, 0xf3, 0x7d, 0xa0, 0x32,
];

const GET_NONCE_SIGNATURE: &str =
    "function getNonce(address sender, uint192 key) view returns (uint256)";

/// Pure policy deriving the 192-bit nonce key from the sender account.
///
/// The EntryPoint scopes nonces to `(sender, key)`, so swapping the policy
/// selects an independent nonce sequence without touching the gateway.
pub type NonceKeyPolicy = fn(Address) -> U256;

/// Default policy: every account uses the zero nonce sequence.
pub fn zero_nonce_key(_account: Address) -> U256 {
    U256::zero()
}

/// Alternate multi-key scheme: a slice of the checksummed address wrapped in
/// delimiter markers, read as a big-endian integer. Not active by default.
pub fn delimited_address_key(account: Address) -> U256 {
    let checksummed = to_checksum(&account, None);
    let partial = &checksummed[5..10];
    let mut key = Vec::with_capacity(partial.len() + 2);
    key.push(b'>');
    key.extend_from_slice(partial.as_bytes());
    key.push(b'<');
    U256::from_big_endian(&key)
}

/// How the paymaster section is folded into the packed operation.
///
/// The current sponsorship flow hashes an empty payload even when the
/// paymaster fields are populated (`Disabled`). `Full` packs the real
/// paymaster section; enabling it is a policy swap, not a rewrite.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PaymasterPacking {
    #[default]
    Disabled,
    Full,
}

/// Gateway to a versioned EntryPoint contract.
///
/// Implemented for the v0.7 revision; future revisions carry their own
/// address and packing rules behind the same trait.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait EntryPoint: Send + Sync {
    /// Address of the EntryPoint revision this gateway talks to.
    fn address(&self) -> Address;

    /// Current nonce for `account` under the gateway's nonce-key policy.
    async fn get_nonce(&self, account: Address) -> Result<U256, ClientError>;

    /// Protocol hash binding the operation to this EntryPoint and chain.
    fn user_operation_hash(&self, op: &UserOperation) -> Result<H256, ClientError>;

    /// Canonical packed encoding, exposed so callers can verify or log the
    /// packed form independently.
    fn pack_user_operation(&self, op: &UserOperation) -> Result<Bytes, ClientError>;
}

/// EntryPoint v0.7 gateway over a live chain connection.
#[derive(Debug)]
pub struct EntryPointV0_7<M> {
    provider: Arc<M>,
    address: Address,
    chain_id: u64,
    nonce_key: NonceKeyPolicy,
    paymaster_packing: PaymasterPacking,
}

impl<M> EntryPointV0_7<M> {
    pub fn new(provider: Arc<M>, chain_id: u64) -> Self {
        Self {
            provider,
            address: Address::from(ENTRY_POINT_ADDRESS_0_7),
            chain_id,
            nonce_key: zero_nonce_key,
            paymaster_packing: PaymasterPacking::Disabled,
        }
    }

    pub fn with_nonce_key_policy(mut self, policy: NonceKeyPolicy) -> Self {
        self.nonce_key = policy;
        self
    }

    pub fn with_paymaster_packing(mut self, packing: PaymasterPacking) -> Self {
        self.paymaster_packing = packing;
        self
    }
}

#[async_trait::async_trait]
impl<M: Middleware + 'static> EntryPoint for EntryPointV0_7<M> {
    fn address(&self) -> Address {
        self.address
    }

    async fn get_nonce(&self, account: Address) -> Result<U256, ClientError> {
        let abi = AbiParser::default()
            .parse(&[GET_NONCE_SIGNATURE])
            .map_err(|e| ClientError::encoding("getNonce", e.to_string()))?;
        let contract = Contract::new(self.address, abi, self.provider.clone());
        let key = (self.nonce_key)(account);

        contract
            .method::<_, U256>("getNonce", (account, key))
            .map_err(|e| ClientError::encoding("getNonce", e.to_string()))?
            .call()
            .await
            .map_err(|e| match e {
                ContractError::DecodingError(inner) => {
                    ClientError::decoding("getNonce", inner.to_string())
                }
                ContractError::DetokenizationError(inner) => {
                    ClientError::decoding("getNonce", inner.to_string())
                }
                other => ClientError::rpc("getNonce", other),
            })
    }

    fn user_operation_hash(&self, op: &UserOperation) -> Result<H256, ClientError> {
        user_operation_hash(op, self.address, self.chain_id, self.paymaster_packing)
    }

    fn pack_user_operation(&self, op: &UserOperation) -> Result<Bytes, ClientError> {
        pack_user_operation(op, self.paymaster_packing)
    }
}

/// Packs a UserOperation into the canonical EntryPoint v0.7 hash preimage.
///
/// Fixed positional tuple of (sender, nonce, hashInitCode, hashCallData,
/// accountGasLimits, preVerificationGas, gasFees, hashPaymasterAndData).
/// The two 32-byte pair slots each hold two 128-bit quantities, each half
/// left-padded to 16 bytes independently.
pub fn pack_user_operation(
    op: &UserOperation,
    packing: PaymasterPacking,
) -> Result<Bytes, ClientError> {
    // Account deployment is out of scope, so the init code is always empty.
    let hash_init_code = keccak256([0u8; 0]);
    let hash_call_data = keccak256(&op.call_data);

    let account_gas_limits = pack_u128_pair(
        ("verificationGasLimit", op.verification_gas_limit),
        ("callGasLimit", op.call_gas_limit),
    )?;
    let gas_fees = pack_u128_pair(
        ("maxPriorityFeePerGas", op.max_priority_fee_per_gas),
        ("maxFeePerGas", op.max_fee_per_gas),
    )?;

    let hash_paymaster_and_data = keccak256(pack_paymaster_and_data(op, packing)?);

    let packed = encode(&[
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(hash_init_code.to_vec()),
        Token::FixedBytes(hash_call_data.to_vec()),
        Token::FixedBytes(account_gas_limits.to_vec()),
        Token::Uint(op.pre_verification_gas),
        Token::FixedBytes(gas_fees.to_vec()),
        Token::FixedBytes(hash_paymaster_and_data.to_vec()),
    ]);

    Ok(packed.into())
}

/// Computes the v0.7 userOpHash:
/// `keccak256(encode(keccak256(pack(op)), entryPoint, chainId))`.
///
/// The outer encoding binds the signature to one EntryPoint instance on one
/// chain, preventing cross-chain and cross-contract replay.
pub fn user_operation_hash(
    op: &UserOperation,
    entry_point: Address,
    chain_id: u64,
    packing: PaymasterPacking,
) -> Result<H256, ClientError> {
    let packed = pack_user_operation(op, packing)?;
    let inner = keccak256(&packed);

    let outer = encode(&[
        Token::FixedBytes(inner.to_vec()),
        Token::Address(entry_point),
        Token::Uint(chain_id.into()),
    ]);

    Ok(keccak256(outer).into())
}

fn pack_paymaster_and_data(
    op: &UserOperation,
    packing: PaymasterPacking,
) -> Result<Vec<u8>, ClientError> {
    match (packing, op.paymaster) {
        (PaymasterPacking::Full, Some(paymaster)) => {
            let mut out = Vec::with_capacity(20 + 32 + op.paymaster_data.len());
            out.extend_from_slice(paymaster.as_bytes());
            out.extend_from_slice(&u128_be((
                "paymasterVerificationGasLimit",
                op.paymaster_verification_gas_limit,
            ))?);
            out.extend_from_slice(&u128_be((
                "paymasterPostOpGasLimit",
                op.paymaster_post_op_gas_limit,
            ))?);
            out.extend_from_slice(&op.paymaster_data);
            Ok(out)
        }
        _ => Ok(Vec::new()),
    }
}

fn pack_u128_pair(
    high: (&'static str, U256),
    low: (&'static str, U256),
) -> Result<[u8; 32], ClientError> {
    let mut out = [0u8; 32];
    out[..16].copy_from_slice(&u128_be(high)?);
    out[16..].copy_from_slice(&u128_be(low)?);
    Ok(out)
}

fn u128_be((name, value): (&'static str, U256)) -> Result<[u8; 16], ClientError> {
    if value.bits() > 128 {
        return Err(ClientError::encoding(
            "packUserOperation",
            format!("{name} does not fit in 128 bits"),
        ));
    }
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let mut half = [0u8; 16];
    half.copy_from_slice(&buf[16..]);
    Ok(half)
}
