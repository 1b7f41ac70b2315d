use crate::encoding::{self, parse_h256, parse_u256_quantity};
use crate::error::ClientError;
use crate::types::{ReceiptOutcome, UserOperation};
use ethers::types::{H256, U256};
use serde_json::Value;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/// EIP-1559-style fee pair for one recommendation tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasFees {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Fee recommendations by tier. The orchestrator applies the standard tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPriceTiers {
    pub slow: GasFees,
    pub standard: GasFees,
    pub fast: GasFees,
}

/// Submission service (bundler) consumed by the orchestrator.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Submission: Send + Sync {
    async fn get_user_operation_gas_price(&self) -> Result<GasPriceTiers, ClientError>;

    async fn send_user_operation(&self, op: &UserOperation) -> Result<H256, ClientError>;

    /// Bounded receipt poll: fixed delay between attempts, no backoff.
    /// Exhausting the budget yields `NotYetAvailable`, not an error.
    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
        poll_delay: Duration,
        max_retries: u32,
    ) -> Result<ReceiptOutcome, ClientError>;
}

/// JSON-RPC client for an ERC-4337 bundler.
#[derive(Debug, Clone)]
pub struct BundlerClient {
    url: String,
    http: reqwest::Client,
    entry_point: ethers::types::Address,
}

impl BundlerClient {
    pub fn new(url: String, entry_point: ethers::types::Address) -> Self {
        Self {
            url,
            http: reqwest::Client::new(),
            entry_point,
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
impl Submission for BundlerClient {
    async fn get_user_operation_gas_price(&self) -> Result<GasPriceTiers, ClientError> {
        let result = self
            .rpc("zd_getUserOperationGasPrice", serde_json::json!([]))
            .await?;
        parse_gas_tiers(&result)
    }

    async fn send_user_operation(&self, op: &UserOperation) -> Result<H256, ClientError> {
        let params = serde_json::json!([
            encoding::user_op_to_json(op),
            encoding::fmt_address(self.entry_point),
        ]);
        let result = self.rpc("eth_sendUserOperation", params).await?;
        parse_userop_hash(&result)
    }

    async fn get_user_operation_receipt(
        &self,
        user_op_hash: H256,
        poll_delay: Duration,
        max_retries: u32,
    ) -> Result<ReceiptOutcome, ClientError> {
        let params = serde_json::json!([encoding::fmt_h256(user_op_hash)]);

        for attempt in 0..max_retries {
            if attempt > 0 {
                tokio::time::sleep(poll_delay).await;
            }

            match self.rpc("eth_getUserOperationReceipt", params.clone()).await {
                Ok(Value::Null) => {
                    tracing::debug!(attempt, "user operation receipt not yet available");
                }
                Ok(value) => {
                    let receipt = serde_json::from_value(value).map_err(|e| {
                        ClientError::decoding("eth_getUserOperationReceipt", e.to_string())
                    })?;
                    return Ok(ReceiptOutcome::Delivered(receipt));
                }
                // Transient errors are common on free-tier bundlers; keep polling.
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "bundler receipt poll error");
                }
            }
        }

        Ok(ReceiptOutcome::NotYetAvailable)
    }
}

fn parse_gas_tiers(result: &Value) -> Result<GasPriceTiers, ClientError> {
    const STEP: &str = "zd_getUserOperationGasPrice";

    let tier = |key: &str| -> Result<GasFees, ClientError> {
        let v = result
            .get(key)
            .ok_or_else(|| ClientError::decoding(STEP, format!("missing gas price tier {key}")))?;
        Ok(GasFees {
            max_fee_per_gas: parse_u256_field(v, "maxFeePerGas")?,
            max_priority_fee_per_gas: parse_u256_field(v, "maxPriorityFeePerGas")?,
        })
    };

    Ok(GasPriceTiers {
        slow: tier("slow")?,
        standard: tier("standard")?,
        fast: tier("fast")?,
    })
}

fn parse_u256_field(v: &Value, key: &str) -> Result<U256, ClientError> {
    const STEP: &str = "zd_getUserOperationGasPrice";
    let s = v
        .get(key)
        .and_then(|x| x.as_str())
        .ok_or_else(|| ClientError::decoding(STEP, format!("missing or invalid field {key}")))?;
    parse_u256_quantity(s).map_err(|e| ClientError::decoding(STEP, e.to_string()))
}

fn parse_userop_hash(res: &Value) -> Result<H256, ClientError> {
    const STEP: &str = "eth_sendUserOperation";

    // Most bundlers return the userOpHash directly as a JSON string; some
    // wrap it in an object. Accept both shapes.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = res.get("result").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOpHash").and_then(|v| v.as_str()) {
        s
    } else if let Some(s) = res.get("userOperationHash").and_then(|v| v.as_str()) {
        s
    } else {
        return Err(ClientError::decoding(
            STEP,
            format!("unexpected result shape (expected string or {{result: ...}}): {res}"),
        ));
    };

    parse_h256(hash_str).map_err(|e| ClientError::decoding(STEP, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const HASH: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    #[test]
    fn parse_userop_hash_from_string() {
        let res = json!(HASH);
        assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_result_object() {
        let res = json!({ "result": HASH });
        assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_userop_hash_object() {
        let res = json!({ "userOpHash": HASH });
        assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_from_useroperation_hash_object() {
        let res = json!({ "userOperationHash": HASH });
        assert_eq!(parse_userop_hash(&res).unwrap(), parse_h256(HASH).unwrap());
    }

    #[test]
    fn parse_userop_hash_rejects_unknown_shape() {
        let res = json!({ "foo": "bar" });
        assert!(parse_userop_hash(&res).is_err());
    }

    #[test]
    fn parse_gas_tiers_full() {
        let res = json!({
            "slow": { "maxFeePerGas": "0x64", "maxPriorityFeePerGas": "0xa" },
            "standard": { "maxFeePerGas": "0x3e8", "maxPriorityFeePerGas": "0x64" },
            "fast": { "maxFeePerGas": "0x7d0", "maxPriorityFeePerGas": "0xc8" },
        });

        let tiers = parse_gas_tiers(&res).unwrap();
        assert_eq!(tiers.standard.max_fee_per_gas, U256::from(1_000));
        assert_eq!(tiers.standard.max_priority_fee_per_gas, U256::from(100));
        assert_eq!(tiers.fast.max_fee_per_gas, U256::from(2_000));
    }

    #[test]
    fn parse_gas_tiers_missing_tier() {
        let res = json!({
            "standard": { "maxFeePerGas": "0x3e8", "maxPriorityFeePerGas": "0x64" },
        });
        let err = parse_gas_tiers(&res).unwrap_err();
        assert!(matches!(err, ClientError::Decoding { .. }), "{err}");
    }

    /// Spawns a one-response-per-connection HTTP stub returning `body` as the
    /// JSON-RPC envelope for every request.
    async fn spawn_stub(body: &'static str) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    loop {
                        if read == buf.len() {
                            return;
                        }
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) => break,
                            Ok(n) => {
                                read += n;
                                if request_complete(&buf[..read]) {
                                    break;
                                }
                            }
                            Err(_) => return,
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        addr
    }

    fn request_complete(buf: &[u8]) -> bool {
        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        buf.len() >= header_end + 4 + content_length
    }

    #[tokio::test]
    async fn receipt_polling_terminates_when_no_receipt_exists() {
        let addr = spawn_stub(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).await;
        let bundler = BundlerClient::new(format!("http://{addr}"), Address::zero());

        let start = std::time::Instant::now();
        let outcome = bundler
            .get_user_operation_receipt(H256::repeat_byte(0x11), Duration::from_millis(5), 3)
            .await
            .unwrap();

        assert!(matches!(outcome, ReceiptOutcome::NotYetAvailable));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn receipt_polling_delivers_a_receipt() {
        let addr = spawn_stub(
            r#"{"jsonrpc":"2.0","id":1,"result":{
                "userOpHash":"0x1111111111111111111111111111111111111111111111111111111111111111",
                "sender":"0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                "nonce":"0x0",
                "success":true,
                "actualGasCost":"0x5208",
                "actualGasUsed":"0x5208",
                "receipt":{},
                "logs":[]
            }}"#,
        )
        .await;
        let bundler = BundlerClient::new(format!("http://{addr}"), Address::zero());

        let outcome = bundler
            .get_user_operation_receipt(H256::repeat_byte(0x11), Duration::from_millis(5), 3)
            .await
            .unwrap();

        match outcome {
            ReceiptOutcome::Delivered(receipt) => {
                assert!(receipt.success);
                assert_eq!(receipt.sender, Address::repeat_byte(0xaa));
            }
            ReceiptOutcome::NotYetAvailable => panic!("expected a delivered receipt"),
        }
    }
}
