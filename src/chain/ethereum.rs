/// Pointer contract client over Ethereum JSON-RPC.
///
/// The contract is a key-value slot keyed by `msg.sender`:
///
/// ```text
/// setPointer(string)  → overwrite caller's slot, present = true
/// clearPointer()      → present = false, address kept
/// getPointer(address) → (contentAddress, lastModified, present)
/// ```
///
/// Transactions are built and signed locally with the identity's key and
/// submitted with `eth_sendRawTransaction`. Receipts are polled separately,
/// so submission never blocks on block inclusion.
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Pointer, PointerStore, TxHandle, TxStatus};
use crate::error::{Result, VaultError};
use crate::storage::ContentAddress;

sol! {
    function setPointer(string contentAddress) external;
    function clearPointer() external;
    function getPointer(address owner) external view returns (string contentAddress, uint64 lastModified, bool present);
}

/// Configuration for the pointer contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EthereumConfig {
    /// JSON-RPC endpoint (e.g., Infura, Alchemy, local node).
    pub rpc_url: String,
    /// Deployed pointer contract address (hex).
    pub contract_address: String,
    /// Gas limit used when `eth_estimateGas` is unavailable.
    pub fallback_gas_limit: u64,
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: String::new(),
            fallback_gas_limit: 200_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

/// Pointer store backed by the on-chain contract.
pub struct EthereumPointerStore {
    config: EthereumConfig,
    chain_id: u64,
    contract: Address,
    signer: PrivateKeySigner,
    client: Client,
}

/// Wallet and relay errors that mean "the user said no".
fn is_user_rejection(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("user rejected") || lower.contains("user denied") || lower.contains("rejected by user")
}

fn parse_quantity(hex_value: &str) -> Result<u128> {
    u128::from_str_radix(hex_value.trim_start_matches("0x"), 16)
        .map_err(|e| VaultError::Transaction(format!("invalid quantity {hex_value}: {e}")))
}

fn parse_address(value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| VaultError::Config(format!("invalid address {value}: {e}")))
}

impl EthereumPointerStore {
    pub fn new(config: EthereumConfig, chain_id: u64, signer: PrivateKeySigner) -> Result<Self> {
        let contract = parse_address(&config.contract_address)?;
        let signer = signer.with_chain_id(Some(chain_id));
        Ok(Self {
            config,
            chain_id,
            contract,
            signer,
            client: Client::new(),
        })
    }

    /// Send a JSON-RPC request to the node.
    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VaultError::Transaction(format!("{method}: {e}")))?
            .json()
            .await
            .map_err(|e| VaultError::Serialization(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            if is_user_rejection(&err.message) {
                return Err(VaultError::Cancelled);
            }
            return Err(VaultError::Transaction(format!(
                "{method}: {}",
                err.message
            )));
        }

        Ok(resp.result)
    }

    async fn rpc_required<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        self.rpc_call(method, params)
            .await?
            .ok_or_else(|| VaultError::Transaction(format!("{method}: empty RPC response")))
    }

    fn ensure_own_slot(&self, identity: &str) -> Result<()> {
        let requested = parse_address(identity)?;
        if requested != self.signer.address() {
            return Err(VaultError::Transaction(format!(
                "signer {} cannot write the slot of {requested}",
                self.signer.address()
            )));
        }
        Ok(())
    }

    /// Build, sign, and send a call to the pointer contract.
    async fn send_call(&self, calldata: Vec<u8>) -> Result<TxHandle> {
        let from = self.signer.address();
        let data_hex = format!("0x{}", hex::encode(&calldata));

        let nonce_hex: String = self
            .rpc_required(
                "eth_getTransactionCount",
                serde_json::json!([from.to_string(), "pending"]),
            )
            .await?;
        let nonce = u64::try_from(parse_quantity(&nonce_hex)?)
            .map_err(|e| VaultError::Transaction(format!("nonce out of range: {e}")))?;

        let gas_price_hex: String = self.rpc_required("eth_gasPrice", serde_json::json!([])).await?;
        let gas_price = parse_quantity(&gas_price_hex)?;

        let estimate: Result<String> = self
            .rpc_required(
                "eth_estimateGas",
                serde_json::json!([{
                    "from": from.to_string(),
                    "to": self.contract.to_string(),
                    "data": data_hex,
                }]),
            )
            .await;
        let gas_limit = match estimate {
            Ok(hex_value) => u64::try_from(parse_quantity(&hex_value)?)
                .map(|g| g.saturating_add(g / 5))
                .unwrap_or(self.config.fallback_gas_limit),
            // A revert during estimation is the contract refusing the call.
            Err(VaultError::Transaction(msg)) if msg.contains("revert") => {
                return Err(VaultError::Transaction(msg))
            }
            Err(VaultError::Cancelled) => return Err(VaultError::Cancelled),
            Err(_) => self.config.fallback_gas_limit,
        };

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(self.contract),
            value: U256::ZERO,
            input: Bytes::from(calldata),
        };

        let sig_hash = tx.signature_hash();
        let sig = self
            .signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| VaultError::Transaction(format!("signing failed: {e}")))?;

        let signed = TxEnvelope::Legacy(tx.into_signed(sig));
        let mut raw_tx = Vec::new();
        signed.encode_2718(&mut raw_tx);

        let tx_hash: String = self
            .rpc_required(
                "eth_sendRawTransaction",
                serde_json::json!([format!("0x{}", hex::encode(&raw_tx))]),
            )
            .await?;

        info!(tx = %tx_hash, nonce, gas_limit, "Pointer transaction submitted");
        Ok(TxHandle { hash: tx_hash })
    }
}

#[async_trait]
impl PointerStore for EthereumPointerStore {
    fn chain_name(&self) -> &str {
        "Ethereum"
    }

    async fn get_pointer(&self, identity: &str) -> Result<Pointer> {
        let owner = parse_address(identity)?;
        let calldata = getPointerCall { owner }.abi_encode();

        let result: String = self
            .rpc_required(
                "eth_call",
                serde_json::json!([
                    {
                        "to": self.contract.to_string(),
                        "data": format!("0x{}", hex::encode(calldata)),
                    },
                    "latest"
                ]),
            )
            .await?;

        let raw = hex::decode(result.trim_start_matches("0x"))
            .map_err(|e| VaultError::Serialization(format!("eth_call result: {e}")))?;
        if raw.is_empty() {
            return Ok(Pointer::absent());
        }

        let decoded = getPointerCall::abi_decode_returns(&raw)
            .map_err(|e| VaultError::Serialization(format!("getPointer decode: {e}")))?;

        debug!(identity, present = decoded.present, "Read pointer");
        Ok(Pointer {
            content_address: ContentAddress::new(decoded.contentAddress),
            last_modified: decoded.lastModified,
            present: decoded.present,
        })
    }

    async fn set_pointer(&self, identity: &str, address: &ContentAddress) -> Result<TxHandle> {
        self.ensure_own_slot(identity)?;
        let calldata = setPointerCall {
            contentAddress: address.to_string(),
        }
        .abi_encode();
        self.send_call(calldata).await
    }

    async fn clear_pointer(&self, identity: &str) -> Result<TxHandle> {
        self.ensure_own_slot(identity)?;
        self.send_call(clearPointerCall {}.abi_encode()).await
    }

    async fn tx_status(&self, tx: &TxHandle) -> Result<TxStatus> {
        let receipt: Option<serde_json::Value> = self
            .rpc_call("eth_getTransactionReceipt", serde_json::json!([&tx.hash]))
            .await?;

        let Some(receipt) = receipt else {
            return Ok(TxStatus::Pending);
        };

        match receipt.get("status").and_then(|s| s.as_str()) {
            Some("0x1") => Ok(TxStatus::Confirmed),
            Some("0x0") => Ok(TxStatus::Failed("reverted".to_string())),
            _ if receipt.get("blockNumber").is_some() => Ok(TxStatus::Confirmed),
            _ => Ok(TxStatus::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolValue;

    #[test]
    fn test_user_rejection_detection() {
        assert!(is_user_rejection("MetaMask Tx Signature: User denied transaction signature."));
        assert!(is_user_rejection("User rejected the request."));
        assert!(!is_user_rejection("execution reverted"));
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_set_pointer_calldata_selector() {
        let calldata = setPointerCall {
            contentAddress: "bafkreiabc".to_string(),
        }
        .abi_encode();
        assert_eq!(&calldata[..4], &setPointerCall::SELECTOR);
        assert!(calldata.len() > 4 + 64);
    }

    #[test]
    fn test_get_pointer_return_decoding() {
        let encoded = ("bafkreiabc".to_string(), 1_700_000_000u64, true).abi_encode_params();
        let decoded = getPointerCall::abi_decode_returns(&encoded).unwrap();
        assert_eq!(decoded.contentAddress, "bafkreiabc");
        assert_eq!(decoded.lastModified, 1_700_000_000);
        assert!(decoded.present);
    }

    #[test]
    fn test_write_requires_own_slot() {
        let signer = PrivateKeySigner::random();
        let store = EthereumPointerStore::new(
            EthereumConfig {
                contract_address: "0x00000000000000000000000000000000000000aa".to_string(),
                ..EthereumConfig::default()
            },
            11_155_111,
            signer.clone(),
        )
        .unwrap();

        assert!(store.ensure_own_slot(&signer.address().to_string()).is_ok());
        assert!(store
            .ensure_own_slot("0x00000000000000000000000000000000000000bb")
            .is_err());
    }

    #[test]
    fn test_bad_contract_address_is_config_error() {
        let result = EthereumPointerStore::new(
            EthereumConfig {
                contract_address: "not-an-address".to_string(),
                ..EthereumConfig::default()
            },
            1,
            PrivateKeySigner::random(),
        );
        assert!(matches!(result, Err(VaultError::Config(_))));
    }
}
