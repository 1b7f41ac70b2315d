use crate::error::ClientError;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};

#[cfg(test)]
use mockall::automock;

/// Capability that turns a userOpHash into signature bytes.
///
/// The hash must come from the same EntryPoint revision the operation will be
/// submitted to; signing any other digest produces an unverifiable operation.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait UserOperationSigner: Send + Sync {
    fn address(&self) -> Address;

    async fn sign_user_operation_hash(&self, hash: H256) -> Result<Bytes, ClientError>;
}

/// EIP-191 personal-sign over the userOpHash, the scheme SimpleAccount-style
/// validation expects.
#[async_trait::async_trait]
impl UserOperationSigner for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign_user_operation_hash(&self, hash: H256) -> Result<Bytes, ClientError> {
        let signature = self
            .sign_message(hash.as_bytes())
            .await
            .map_err(|e| ClientError::rpc("signUserOperationHash", e))?;
        Ok(Bytes::from(signature.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn local_wallet_signs_a_hash() {
        let wallet = LocalWallet::from_str(
            "0x0000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();

        let hash = H256::repeat_byte(0x42);
        let signature = wallet.sign_user_operation_hash(hash).await.unwrap();
        // 65-byte ECDSA signature (r, s, v).
        assert_eq!(signature.len(), 65);

        // Recoverable against the EIP-191 message of the hash bytes.
        let sig = ethers::types::Signature::try_from(signature.as_ref()).unwrap();
        sig.verify(hash.as_bytes().to_vec(), UserOperationSigner::address(&wallet))
            .unwrap();
    }
}
