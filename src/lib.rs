//! ERC-4337 client for EntryPoint v0.7.
//!
//! Builds a UserOperation from a sender and call data, fetches its nonce and
//! a fee recommendation, requests paymaster sponsorship, computes the
//! versioned userOpHash, and submits the signed operation to a bundler with
//! optional bounded receipt polling.

pub mod bundler;
pub mod client;
pub mod encoding;
pub mod entrypoint;
pub mod error;
pub mod paymaster;
pub mod signer;
pub mod types;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
pub use types::{ReceiptOutcome, UserOperation, UserOperationReceipt, UserOperationResult};
