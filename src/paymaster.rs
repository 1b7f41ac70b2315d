use crate::encoding::{self, parse_address, parse_bytes, parse_u256_quantity};
use crate::error::ClientError;
use crate::types::UserOperation;
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

/// Sponsorship granted by the paymaster service.
///
/// The gas quantities are authoritative: the orchestrator overwrites any
/// prior estimate with these before hashing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SponsorshipResponse {
    pub paymaster: Address,
    pub paymaster_data: Bytes,
    pub pre_verification_gas: U256,
    pub verification_gas_limit: U256,
    pub call_gas_limit: U256,
}

/// Gas sponsorship service consumed by the orchestrator.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Sponsorship: Send + Sync {
    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
    ) -> Result<SponsorshipResponse, ClientError>;
}

/// JSON-RPC client for a zerodev-style paymaster web service.
#[derive(Debug, Clone)]
pub struct PaymasterClient {
    url: String,
    http: reqwest::Client,
    entry_point: Address,
    chain_id: u64,
}

impl PaymasterClient {
    pub fn new(url: String, entry_point: Address, chain_id: u64) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
            entry_point,
            chain_id,
        }
    }

    async fn rpc(&self, method: &'static str, params: Value) -> Result<Value, ClientError> {
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ClientError::rpc(method, e))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .map_err(|e| ClientError::decoding(method, e.to_string()))?;

        if !status.is_success() {
            return Err(ClientError::rpc(method, anyhow::anyhow!("HTTP {status}: {body}")));
        }

        if let Some(err) = body.get("error") {
            return Err(ClientError::rpc(method, anyhow::anyhow!("RPC error: {err}")));
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ClientError::decoding(method, "missing result field"))
    }
}

#[async_trait::async_trait]
impl Sponsorship for PaymasterClient {
    async fn sponsor_user_operation(
        &self,
        op: &UserOperation,
    ) -> Result<SponsorshipResponse, ClientError> {
        let params = serde_json::json!([
            encoding::user_op_to_json(op),
            encoding::fmt_address(self.entry_point),
            encoding::fmt_u256(U256::from(self.chain_id)),
        ]);

        let result = self.rpc("pm_sponsorUserOperation", params).await?;
        parse_sponsorship_response(&result)
    }
}

fn parse_sponsorship_response(result: &Value) -> Result<SponsorshipResponse, ClientError> {
    const STEP: &str = "pm_sponsorUserOperation";

    let field = |key: &str| -> Result<&str, ClientError> {
        result
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| ClientError::decoding(STEP, format!("missing or invalid field {key}")))
    };

    Ok(SponsorshipResponse {
        paymaster: parse_address(field("paymaster")?)
            .map_err(|e| ClientError::decoding(STEP, e.to_string()))?,
        paymaster_data: parse_bytes(field("paymasterData")?)
            .map_err(|e| ClientError::decoding(STEP, e.to_string()))?,
        pre_verification_gas: parse_u256_quantity(field("preVerificationGas")?)
            .map_err(|e| ClientError::decoding(STEP, e.to_string()))?,
        verification_gas_limit: parse_u256_quantity(field("verificationGasLimit")?)
            .map_err(|e| ClientError::decoding(STEP, e.to_string()))?,
        call_gas_limit: parse_u256_quantity(field("callGasLimit")?)
            .map_err(|e| ClientError::decoding(STEP, e.to_string()))?,
    })
}
