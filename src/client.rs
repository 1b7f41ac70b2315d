use crate::bundler::{BundlerClient, Submission};
use crate::entrypoint::{EntryPoint, EntryPointV0_7, ENTRY_POINT_VERSION_0_7};
use crate::error::ClientError;
use crate::paymaster::{PaymasterClient, Sponsorship};
use crate::signer::UserOperationSigner;
use crate::types::{ReceiptOutcome, UserOperation, UserOperationResult};
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_RECEIPT_POLLING_DELAY_SECS: u64 = 10;
const DEFAULT_RECEIPT_POLLING_RETRIES: u32 = 24;

/// Construction parameters for [`Client`].
///
/// The account private key, paymaster URL, bundler URL, chain id and a
/// supported entry point version are required; polling knobs fall back to
/// defaults when unset or zero.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub account_private_key: Option<String>,
    pub entry_point_version: String,
    pub rpc_url: String,
    pub paymaster_url: Option<String>,
    pub bundler_url: Option<String>,
    pub chain_id: Option<u64>,
    pub receipt_polling_delay_secs: Option<u64>,
    pub receipt_polling_retries: Option<u32>,
}

/// Orchestrates the build → sponsor → hash → sign → submit pipeline.
///
/// One operation's flow is strictly sequential: each step's input depends on
/// the previous step's output, so there is no internal parallelism. Distinct
/// operations can be driven concurrently from separate tasks; the underlying
/// HTTP clients are safe for concurrent use.
#[derive(Debug)]
pub struct Client<
    E = EntryPointV0_7<Provider<Http>>,
    P = PaymasterClient,
    B = BundlerClient,
    S = LocalWallet,
> {
    signer: S,
    entry_point: E,
    paymaster: P,
    bundler: B,
    receipt_polling_delay: Duration,
    receipt_polling_retries: u32,
}

impl Client {
    /// Wires the default gateways: an ethers HTTP provider for the chain
    /// node, JSON-RPC clients for the paymaster and bundler, and a local
    /// wallet signer. Fails fast on missing or invalid parameters.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let key = config
            .account_private_key
            .as_deref()
            .ok_or_else(|| ClientError::Config("account private key is required".into()))?;
        let paymaster_url = config
            .paymaster_url
            .clone()
            .ok_or_else(|| ClientError::Config("paymaster URL is required".into()))?;
        let bundler_url = config
            .bundler_url
            .clone()
            .ok_or_else(|| ClientError::Config("bundler URL is required".into()))?;
        let chain_id = config
            .chain_id
            .ok_or_else(|| ClientError::Config("chain ID is required".into()))?;
        if config.entry_point_version != ENTRY_POINT_VERSION_0_7 {
            return Err(ClientError::Config(format!(
                "unsupported entry point version {:?} (only {} is supported)",
                config.entry_point_version, ENTRY_POINT_VERSION_0_7
            )));
        }

        let wallet = LocalWallet::from_str(key)
            .map_err(|e| ClientError::Config(format!("invalid account private key: {e}")))?
            .with_chain_id(chain_id);

        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| ClientError::Config(format!("invalid RPC URL: {e}")))?;

        let entry_point = EntryPointV0_7::new(Arc::new(provider), chain_id);
        let paymaster = PaymasterClient::new(paymaster_url, entry_point.address(), chain_id);
        let bundler = BundlerClient::new(bundler_url, entry_point.address());

        let (delay, retries) = polling_budget(
            config.receipt_polling_delay_secs,
            config.receipt_polling_retries,
        );

        Ok(Self::from_parts(
            wallet,
            entry_point,
            paymaster,
            bundler,
            delay,
            retries,
        ))
    }
}

impl<E, P, B, S> Client<E, P, B, S>
where
    E: EntryPoint,
    P: Sponsorship,
    B: Submission,
    S: UserOperationSigner,
{
    /// Assembles a client from already-built gateways. Useful for custom
    /// wiring (alternate nonce-key or paymaster-packing policies) and tests.
    pub fn from_parts(
        signer: S,
        entry_point: E,
        paymaster: P,
        bundler: B,
        receipt_polling_delay: Duration,
        receipt_polling_retries: u32,
    ) -> Self {
        Self {
            signer,
            entry_point,
            paymaster,
            bundler,
            receipt_polling_delay,
            receipt_polling_retries,
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    pub fn entry_point(&self) -> &E {
        &self.entry_point
    }

    /// Builds a UserOperation for `(sender, call_data)` and computes its
    /// hash to sign.
    ///
    /// Each step is a hard dependency on the previous one: nonce fetch, then
    /// the bundler's standard fee tier, then sponsorship (whose gas limits
    /// are authoritative and overwrite any prior value), then the hash. Any
    /// failure aborts with that step's error; no partial operation is
    /// returned. Adding a signature to the returned operation makes it
    /// acceptable to [`send_signed_user_operation`](Self::send_signed_user_operation).
    pub async fn user_operation_and_hash_to_sign(
        &self,
        sender: Address,
        call_data: Bytes,
    ) -> Result<(UserOperation, H256), ClientError> {
        let nonce = self.entry_point.get_nonce(sender).await?;

        let mut op = UserOperation {
            sender,
            nonce,
            call_data,
            ..Default::default()
        };

        let tiers = self.bundler.get_user_operation_gas_price().await?;
        op.max_fee_per_gas = tiers.standard.max_fee_per_gas;
        op.max_priority_fee_per_gas = tiers.standard.max_priority_fee_per_gas;

        let sponsorship = self.paymaster.sponsor_user_operation(&op).await?;
        op.paymaster = Some(sponsorship.paymaster);
        op.paymaster_data = sponsorship.paymaster_data;
        op.pre_verification_gas = sponsorship.pre_verification_gas;
        op.verification_gas_limit = sponsorship.verification_gas_limit;
        op.call_gas_limit = sponsorship.call_gas_limit;

        let hash = self.entry_point.user_operation_hash(&op)?;
        tracing::debug!(sender = ?sender, nonce = %nonce, hash = ?hash, "built user operation");

        Ok((op, hash))
    }

    /// Submits a pre-signed operation to the bundler.
    ///
    /// When `wait_for_receipt` is set, polls within the configured budget; a
    /// poll failure or an exhausted budget leaves the receipt absent rather
    /// than failing the submission, which is already final at that point.
    pub async fn send_signed_user_operation(
        &self,
        signed_op: &UserOperation,
        wait_for_receipt: bool,
    ) -> Result<UserOperationResult, ClientError> {
        let user_op_hash = self.bundler.send_user_operation(signed_op).await?;

        let receipt = if wait_for_receipt {
            match self
                .bundler
                .get_user_operation_receipt(
                    user_op_hash,
                    self.receipt_polling_delay,
                    self.receipt_polling_retries,
                )
                .await
            {
                Ok(outcome) => outcome.delivered(),
                Err(err) => {
                    tracing::warn!(error = %err, "receipt poll failed; returning without receipt");
                    None
                }
            }
        } else {
            None
        };

        Ok(UserOperationResult {
            user_op_hash,
            receipt,
        })
    }

    /// Builds, signs with the client's own signer, and submits an operation
    /// carrying `call_data` for the signer's account.
    pub async fn send_user_operation(
        &self,
        call_data: Bytes,
        wait_for_receipt: bool,
    ) -> Result<UserOperationResult, ClientError> {
        let (mut op, hash) = self
            .user_operation_and_hash_to_sign(self.signer.address(), call_data)
            .await?;

        op.signature = self.signer.sign_user_operation_hash(hash).await?;

        self.send_signed_user_operation(&op, wait_for_receipt).await
    }

    /// Explicit re-poll for callers who submitted without waiting.
    pub async fn user_operation_receipt(
        &self,
        result: &UserOperationResult,
    ) -> Result<ReceiptOutcome, ClientError> {
        self.bundler
            .get_user_operation_receipt(
                result.user_op_hash,
                self.receipt_polling_delay,
                self.receipt_polling_retries,
            )
            .await
    }
}

/// Unset or non-positive polling knobs fall back to the defaults.
fn polling_budget(delay_secs: Option<u64>, retries: Option<u32>) -> (Duration, u32) {
    let delay = match delay_secs {
        Some(d) if d > 0 => d,
        _ => DEFAULT_RECEIPT_POLLING_DELAY_SECS,
    };
    let retries = match retries {
        Some(r) if r > 0 => r,
        _ => DEFAULT_RECEIPT_POLLING_RETRIES,
    };
    (Duration::from_secs(delay), retries)
}
