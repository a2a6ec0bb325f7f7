//! Payment client implementation for the Sui chain, speaking JSON-RPC to a
//! fullnode for transaction handling and GraphQL for deposit lookups.

use super::{DepositTransfer, PaymentClient, PaymentError, PreparedTransaction, TransactionStatus, TransferInfo};
use crate::sui::{blake2b256, derive_address};
use anyhow::{anyhow, bail, Context, Result};
use ed25519_dalek::{Signer, SigningKey};
use model::Address;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

const GAS_BUDGET: i64 = 1_000_000;
const TRANSACTION_INTENT: [u8; 3] = [0, 0, 0];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
    Localnet,
}

impl Network {
    fn rpc_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "https://fullnode.mainnet.sui.io",
            Self::Testnet => "https://fullnode.testnet.sui.io",
            Self::Devnet => "https://fullnode.devnet.sui.io",
            Self::Localnet => "http://127.0.0.1:9000",
        }
    }

    fn graphql_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "https://sui-mainnet.mystenlabs.com/graphql",
            Self::Testnet => "https://sui-testnet.mystenlabs.com/graphql",
            Self::Devnet => "https://sui-devnet.mystenlabs.com/graphql",
            Self::Localnet => "http://127.0.0.1:9125",
        }
    }
}

impl FromStr for Network {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "devnet" => Ok(Self::Devnet),
            "localnet" => Ok(Self::Localnet),
            other => bail!("unknown network {:?}", other),
        }
    }
}

pub struct SuiPaymentClient {
    client: Client,
    rpc_url: Url,
    graphql_url: Url,
    signer: SigningKey,
    address: Address,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    #[serde(default = "empty_data")]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
struct RpcError {
    code: i64,
    message: String,
}

/// A GraphQL query response. Invalid responses (missing data, errors) are
/// converted into a Rust `Result`.
#[derive(Deserialize)]
struct GraphqlResponse<T> {
    #[serde(default = "empty_data")]
    data: Option<T>,
    #[serde(default)]
    errors: Option<Vec<GraphqlError>>,
}

/// Works around the fact that `#[serde(default)]` on an `Option<T>` requires
/// `T: Default`.
fn empty_data<T>() -> Option<T> {
    None
}

#[derive(Debug, Deserialize, thiserror::Error)]
#[error("{}", .message)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
struct TxnMetaData {
    #[serde(rename = "txBytes")]
    tx_bytes: String,
}

#[derive(Deserialize)]
struct DryRunResult {
    effects: TransactionEffects,
}

#[derive(Deserialize)]
struct TransactionEffects {
    #[serde(rename = "transactionDigest")]
    transaction_digest: String,
    status: Option<ExecutionStatus>,
}

#[derive(Deserialize)]
struct ExecutionStatus {
    status: String,
}

#[derive(Deserialize)]
struct TransactionBlockResponse {
    digest: String,
    effects: Option<TransactionEffects>,
}

#[derive(Deserialize)]
struct SystemStateSummary {
    epoch: String,
}

#[derive(Deserialize)]
struct CoinPage {
    data: Vec<Coin>,
}

#[derive(Deserialize)]
struct Coin {
    #[serde(rename = "coinObjectId")]
    coin_object_id: String,
}

#[derive(Deserialize)]
struct DepositQuery {
    #[serde(rename = "transactionBlock")]
    transaction_block: Option<DepositTransactionBlock>,
}

#[derive(Deserialize)]
struct DepositTransactionBlock {
    sender: Option<GraphqlAddress>,
    effects: Option<DepositEffects>,
}

#[derive(Deserialize)]
struct GraphqlAddress {
    address: String,
}

#[derive(Deserialize)]
struct DepositEffects {
    #[serde(rename = "balanceChanges")]
    balance_changes: BalanceChanges,
    epoch: EpochId,
}

#[derive(Deserialize)]
struct BalanceChanges {
    nodes: Vec<BalanceChange>,
}

#[derive(Deserialize)]
struct BalanceChange {
    owner: Option<GraphqlAddress>,
    amount: Option<String>,
}

#[derive(Deserialize)]
struct EpochId {
    #[serde(rename = "epochId")]
    epoch_id: i64,
}

impl SuiPaymentClient {
    pub fn new(network: Network, wallet_mnemonic: &str) -> Result<Self> {
        // The wallet key is derived by hashing the mnemonic phrase rather
        // than through the full derivation path of external wallets. The
        // platform wallet only ever talks to this client so both sides agree.
        let signer = SigningKey::from_bytes(&blake2b256(wallet_mnemonic.as_bytes()));
        let address = derive_address(&signer.verifying_key());
        Ok(Self {
            client: Client::new(),
            rpc_url: Url::parse(network.rpc_url()).context("invalid fullnode url")?,
            graphql_url: Url::parse(network.graphql_url()).context("invalid graphql url")?,
            signer,
            address,
        })
    }

    async fn rpc<T>(&self, method: &str, params: Value) -> Result<T, RpcCallError>
    where
        T: DeserializeOwned,
    {
        let response: RpcResponse<T> = self
            .client
            .post(self.rpc_url.clone())
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id: 1,
                method,
                params,
            })
            .send()
            .await
            .map_err(|err| RpcCallError::Transport(err.into()))?
            .json()
            .await
            .map_err(|err| RpcCallError::Transport(err.into()))?;
        match response {
            RpcResponse { result: Some(result), .. } => Ok(result),
            RpcResponse { error: Some(error), .. } => Err(RpcCallError::Rpc(error)),
            _ => Err(RpcCallError::Transport(anyhow!("empty json-rpc response"))),
        }
    }

    async fn graphql<T>(&self, query: &str, variables: Value) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response: GraphqlResponse<T> = self
            .client
            .post(self.graphql_url.clone())
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?
            .json()
            .await?;
        match response {
            GraphqlResponse { data: Some(data), errors: None } => Ok(data),
            GraphqlResponse { errors: Some(errors), .. } if !errors.is_empty() => {
                // Make sure to log additional errors if there are more than
                // one, and just bubble up the first error.
                for error in &errors[1..] {
                    tracing::warn!("additional GraphQL error: {}", error.message);
                }
                bail!("{}", errors[0])
            }
            _ => bail!("invalid GraphQL response"),
        }
    }

    async fn current_epoch(&self) -> Result<i64> {
        let summary: SystemStateSummary = self
            .rpc("suix_getLatestSuiSystemState", json!([]))
            .await
            .context("failed to get system state")?;
        summary
            .epoch
            .parse()
            .with_context(|| format!("unparsable epoch {:?}", summary.epoch))
    }

    /// Signs raw transaction bytes under the transaction intent, producing
    /// the serialized signature blob execution expects.
    fn sign_transaction(&self, tx_bytes: &str) -> Result<String> {
        let raw = base64::decode(tx_bytes).context("transaction bytes are not valid base64")?;
        let mut preimage = Vec::with_capacity(3 + raw.len());
        preimage.extend_from_slice(&TRANSACTION_INTENT);
        preimage.extend_from_slice(&raw);
        let signature = self.signer.sign(&blake2b256(&preimage));
        let mut blob = Vec::with_capacity(1 + 64 + 32);
        blob.push(0x00);
        blob.extend_from_slice(&signature.to_bytes());
        blob.extend_from_slice(self.signer.verifying_key().as_bytes());
        Ok(base64::encode(blob))
    }
}

#[derive(Debug, thiserror::Error)]
enum RpcCallError {
    #[error(transparent)]
    Rpc(RpcError),
    #[error(transparent)]
    Transport(anyhow::Error),
}

impl From<RpcCallError> for PaymentError {
    fn from(err: RpcCallError) -> Self {
        match err {
            RpcCallError::Rpc(err) => Self::Other(err.into()),
            RpcCallError::Transport(err) => Self::Other(err),
        }
    }
}

#[async_trait::async_trait]
impl PaymentClient for SuiPaymentClient {
    fn address(&self) -> Address {
        self.address
    }

    async fn check_deposit(
        &self,
        digest: &str,
        max_gap_epochs: i64,
    ) -> Result<DepositTransfer, PaymentError> {
        let current_epoch = self.current_epoch().await?;
        const QUERY: &str = "\
            query ($digest: String!) { \
                transactionBlock(digest: $digest) { \
                    digest \
                    sender { address } \
                    effects { \
                        balanceChanges { nodes { owner { address } amount } } \
                        epoch { epochId } \
                    } \
                } \
            }";
        let response: DepositQuery = self
            .graphql(QUERY, json!({ "digest": digest }))
            .await
            .map_err(PaymentError::Other)?;
        let block = response.transaction_block.ok_or(PaymentError::NotFound)?;
        let sender = block
            .sender
            .ok_or_else(|| anyhow!("transaction has no sender"))?;
        let sender: Address = sender
            .address
            .parse()
            .map_err(|err| anyhow!("unparsable sender address: {}", err))?;
        let effects = block
            .effects
            .ok_or_else(|| anyhow!("transaction has no effects"))?;
        if effects.epoch.epoch_id + max_gap_epochs < current_epoch {
            return Err(PaymentError::DepositTooLate);
        }
        // Only the first balance change crediting the platform address is
        // counted; depositors are told to use a single transfer per deposit.
        for node in &effects.balance_changes.nodes {
            let owner = match &node.owner {
                Some(owner) => owner,
                None => continue,
            };
            if owner.address.parse::<Address>().ok() != Some(self.address) {
                continue;
            }
            if let Some(amount) = &node.amount {
                let amount: i64 = amount
                    .parse()
                    .map_err(|_| anyhow!("failed to parse amount {:?}", amount))?;
                if amount <= 0 {
                    continue;
                }
                return Ok(DepositTransfer {
                    sender,
                    amount,
                    epoch: effects.epoch.epoch_id,
                });
            }
        }
        Err(PaymentError::NotFound)
    }

    async fn prepare_withdraw(
        &self,
        transfers: &[TransferInfo],
        total_priority_fee: i64,
    ) -> Result<PreparedTransaction, PaymentError> {
        let coins: CoinPage = self
            .rpc("suix_getAllCoins", json!([self.address.to_string()]))
            .await
            .map_err(PaymentError::from)?;
        let coin_ids: Vec<String> = coins.data.into_iter().map(|coin| coin.coin_object_id).collect();

        let gas_price: String = self
            .rpc("suix_getReferenceGasPrice", json!([]))
            .await
            .map_err(PaymentError::from)?;
        let gas_price: i64 = gas_price
            .parse()
            .map_err(|_| anyhow!("unparsable reference gas price {:?}", gas_price))?;
        if gas_price < 0 || gas_price > total_priority_fee {
            return Err(PaymentError::Other(anyhow!(
                "gas price {} is higher than the fee budget {}",
                gas_price,
                total_priority_fee
            )));
        }

        let recipients: Vec<String> = transfers.iter().map(|t| t.address.to_string()).collect();
        let amounts: Vec<String> = transfers.iter().map(|t| t.amount.to_string()).collect();
        let metadata: TxnMetaData = self
            .rpc(
                "unsafe_paySui",
                json!([
                    self.address.to_string(),
                    coin_ids,
                    recipients,
                    amounts,
                    GAS_BUDGET.to_string(),
                ]),
            )
            .await
            .map_err(PaymentError::from)?;
        Ok(PreparedTransaction {
            tx_bytes: metadata.tx_bytes,
        })
    }

    async fn dry_run(&self, transaction: &PreparedTransaction) -> Result<String, PaymentError> {
        let result: DryRunResult = self
            .rpc("sui_dryRunTransactionBlock", json!([transaction.tx_bytes]))
            .await
            .map_err(PaymentError::from)?;
        if result.effects.transaction_digest.is_empty() {
            return Err(PaymentError::Other(anyhow!(
                "dry run returned an empty transaction digest"
            )));
        }
        Ok(result.effects.transaction_digest)
    }

    async fn submit(&self, transaction: &PreparedTransaction) -> Result<String, PaymentError> {
        let expected_digest = self.dry_run(transaction).await?;
        let signature = self.sign_transaction(&transaction.tx_bytes)?;
        let response: TransactionBlockResponse = self
            .rpc(
                "sui_executeTransactionBlock",
                json!([
                    transaction.tx_bytes,
                    [signature],
                    { "showEffects": true },
                    "WaitForLocalExecution",
                ]),
            )
            .await
            .map_err(PaymentError::from)?;
        // Sanity check: submitting must land the exact transaction the dry
        // run identified, otherwise the persisted digest is worthless.
        if response.digest != expected_digest {
            return Err(PaymentError::Other(anyhow!(
                "digest mismatch with dry run: {} vs {}",
                response.digest,
                expected_digest
            )));
        }
        Ok(response.digest)
    }

    async fn check_transaction_status(
        &self,
        digest: &str,
    ) -> Result<TransactionStatus, PaymentError> {
        let response: Result<TransactionBlockResponse, RpcCallError> = self
            .rpc("sui_getTransactionBlock", json!([digest, { "showEffects": true }]))
            .await;
        match response {
            Ok(block) => {
                let status = block
                    .effects
                    .and_then(|effects| effects.status)
                    .map(|status| status.status);
                match status.as_deref() {
                    None | Some("success") => Ok(TransactionStatus::Success),
                    Some("failure") => Ok(TransactionStatus::Fail),
                    Some(other) => {
                        tracing::warn!(%digest, status = other, "unexpected execution status");
                        Ok(TransactionStatus::Unknown)
                    }
                }
            }
            // A digest the node does not know about yet is in flight, not an
            // error.
            Err(RpcCallError::Rpc(err))
                if err.message.contains("Could not find the referenced transaction") =>
            {
                Ok(TransactionStatus::Pending)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_parsing() {
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("localnet".parse::<Network>().unwrap(), Network::Localnet);
        assert!("ropsten".parse::<Network>().is_err());
    }

    #[test]
    fn wallet_address_is_stable_per_mnemonic() {
        let first = SuiPaymentClient::new(Network::Localnet, "abandon ability able").unwrap();
        let second = SuiPaymentClient::new(Network::Localnet, "abandon ability able").unwrap();
        assert_eq!(first.address(), second.address());
        let other = SuiPaymentClient::new(Network::Localnet, "zebra zesty zone").unwrap();
        assert_ne!(first.address(), other.address());
    }

    #[test]
    fn deposit_query_response_parses() {
        let json = serde_json::json!({
            "transactionBlock": {
                "digest": "9oQ9fw2h",
                "sender": { "address": format!("0x{}", "11".repeat(32)) },
                "effects": {
                    "balanceChanges": {
                        "nodes": [
                            { "owner": { "address": format!("0x{}", "22".repeat(32)) }, "amount": "-1100" },
                            { "owner": { "address": format!("0x{}", "33".repeat(32)) }, "amount": "1000" },
                        ]
                    },
                    "epoch": { "epochId": 412 }
                }
            }
        });
        let parsed: DepositQuery = serde_json::from_value(json).unwrap();
        let block = parsed.transaction_block.unwrap();
        assert_eq!(block.effects.unwrap().epoch.epoch_id, 412);
    }
}
