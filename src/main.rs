use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ethers::types::H256;
use userop_client::encoding::{self, parse_address, parse_bytes, parse_h256};
use userop_client::{Client, ClientConfig, ReceiptOutcome};

#[derive(Parser, Debug)]
#[command(name = "userop-client", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a sponsored UserOperation and print it with its hash to sign.
    Build(BuildArgs),

    /// Build, sign and submit a UserOperation.
    Send(SendArgs),

    /// Poll for the receipt of a previously submitted operation.
    Receipt(ReceiptArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Chain node RPC URL.
    #[arg(long, env = "USEROP_RPC_URL")]
    rpc: String,

    /// Paymaster RPC URL.
    #[arg(long, env = "USEROP_PAYMASTER_URL")]
    paymaster: String,

    /// Bundler RPC URL (must support ERC-4337 JSON-RPC methods).
    #[arg(long, env = "USEROP_BUNDLER_URL")]
    bundler: String,

    /// Chain id the operation is bound to.
    #[arg(long, env = "USEROP_CHAIN_ID")]
    chain_id: u64,

    /// Smart account private key.
    ///
    /// Recommended: set via env var USEROP_ACCOUNT_PRIVATE_KEY.
    #[arg(long, env = "USEROP_ACCOUNT_PRIVATE_KEY")]
    private_key: String,

    /// EntryPoint version (only "0.7" is supported).
    #[arg(long, env = "USEROP_ENTRYPOINT_VERSION", default_value = "0.7")]
    entry_point_version: String,

    /// Seconds between receipt poll attempts (0 = default of 10).
    #[arg(long, default_value_t = 0)]
    receipt_poll_delay: u64,

    /// Max receipt poll attempts (0 = default of 24).
    #[arg(long, default_value_t = 0)]
    receipt_poll_retries: u32,
}

#[derive(Args, Debug)]
struct BuildArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Sender account address (defaults to the signer's address).
    #[arg(long)]
    sender: Option<String>,

    /// Hex-encoded call data the account will execute.
    #[arg(long)]
    call_data: String,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Hex-encoded call data the account will execute.
    #[arg(long)]
    call_data: String,

    /// Do not wait for the userOp receipt.
    #[arg(long)]
    no_wait: bool,
}

#[derive(Args, Debug)]
struct ReceiptArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// userOpHash returned by a previous submission.
    #[arg(long)]
    user_op_hash: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // Logs go to stderr so stdout stays script-friendly.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Build(args) => cmd_build(args).await,
        Command::Send(args) => cmd_send(args).await,
        Command::Receipt(args) => cmd_receipt(args).await,
    }
}

fn build_client(common: &CommonArgs) -> Result<Client> {
    let client = Client::new(ClientConfig {
        account_private_key: Some(common.private_key.clone()),
        entry_point_version: common.entry_point_version.clone(),
        rpc_url: common.rpc.clone(),
        paymaster_url: Some(common.paymaster.clone()),
        bundler_url: Some(common.bundler.clone()),
        chain_id: Some(common.chain_id),
        receipt_polling_delay_secs: Some(common.receipt_poll_delay),
        receipt_polling_retries: Some(common.receipt_poll_retries),
    })?;
    Ok(client)
}

async fn cmd_build(args: BuildArgs) -> Result<()> {
    let client = build_client(&args.common)?;

    let sender = match args.sender.as_deref() {
        Some(s) => parse_address(s).context("invalid --sender address")?,
        None => client.signer_address(),
    };
    let call_data = parse_bytes(&args.call_data).context("invalid --call-data hex")?;

    let (op, hash) = client
        .user_operation_and_hash_to_sign(sender, call_data)
        .await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "userOperation": encoding::user_op_to_json(&op),
            "hashToSign": encoding::fmt_h256(hash),
        }))?
    );

    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let client = build_client(&args.common)?;
    let call_data = parse_bytes(&args.call_data).context("invalid --call-data hex")?;

    let result = client
        .send_user_operation(call_data, !args.no_wait)
        .await?;

    tracing::info!(user_op_hash = %encoding::fmt_h256(result.user_op_hash), "user operation submitted");

    match &result.receipt {
        Some(receipt) => {
            tracing::info!(success = receipt.success, "receipt delivered");
        }
        None if !args.no_wait => {
            tracing::warn!("no receipt within the polling budget; try the receipt command later");
        }
        None => {}
    }

    println!("{}", encoding::fmt_h256(result.user_op_hash));
    Ok(())
}

async fn cmd_receipt(args: ReceiptArgs) -> Result<()> {
    let client = build_client(&args.common)?;
    let user_op_hash: H256 =
        parse_h256(&args.user_op_hash).context("invalid --user-op-hash")?;

    let result = userop_client::UserOperationResult {
        user_op_hash,
        receipt: None,
    };

    match client.user_operation_receipt(&result).await? {
        ReceiptOutcome::Delivered(receipt) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "userOpHash": encoding::fmt_h256(receipt.user_op_hash),
                    "sender": encoding::fmt_address(receipt.sender),
                    "success": receipt.success,
                    "actualGasCost": encoding::fmt_u256(receipt.actual_gas_cost),
                    "actualGasUsed": encoding::fmt_u256(receipt.actual_gas_used),
                    "reason": receipt.reason,
                    "receipt": receipt.receipt,
                }))?
            );
        }
        ReceiptOutcome::NotYetAvailable => {
            tracing::warn!("receipt not yet available");
            println!("null");
        }
    }

    Ok(())
}
