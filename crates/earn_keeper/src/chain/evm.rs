//! EVM JSON-RPC client, addresses, and EIP-155 legacy transaction signing.

use crate::chain::abi::{parse_hex_bytes, parse_quantity, to_quantity};
use crate::chain::rpc::{HttpTransport, RpcConfig, RpcError};
use crate::error::{DecodeError, KeeperError, Result};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use rlp::RlpStream;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EvmAddress(pub [u8; 20]);

impl FromStr for EvmAddress {
    type Err = DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let raw = parse_hex_bytes(s)?;
        let arr: [u8; 20] = raw
            .try_into()
            .map_err(|_| DecodeError::Abi(format!("address {s} is not 20 bytes")))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmAddress({self})")
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parameters of `eth_call` / `eth_estimateGas`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<EvmAddress>,
    pub to: EvmAddress,
    pub data: Vec<u8>,
    pub value: u128,
}

impl CallRequest {
    pub fn new(to: EvmAddress, data: Vec<u8>) -> Self {
        Self {
            from: None,
            to,
            data,
            value: 0,
        }
    }

    fn to_json(&self) -> Value {
        let mut obj = json!({
            "to": self.to.to_string(),
            "data": format!("0x{}", hex::encode(&self.data)),
        });
        if let Some(from) = self.from {
            obj["from"] = json!(from.to_string());
        }
        if self.value > 0 {
            obj["value"] = json!(to_quantity(self.value));
        }
        obj
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block_number: u64,
    pub success: bool,
    pub gas_used: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    gas_used: Option<String>,
}

impl RawReceipt {
    fn into_receipt(self) -> std::result::Result<Option<TxReceipt>, DecodeError> {
        // Pending receipts (no block yet) are reported as absent.
        let Some(block) = self.block_number else {
            return Ok(None);
        };
        let status = self
            .status
            .as_deref()
            .map(parse_quantity)
            .transpose()?
            .ok_or_else(|| DecodeError::Response("receipt without status".to_string()))?;
        Ok(Some(TxReceipt {
            transaction_hash: self.transaction_hash,
            block_number: narrow(parse_quantity(&block)?)?,
            success: status == 1,
            gas_used: self
                .gas_used
                .as_deref()
                .map(parse_quantity)
                .transpose()?
                .map(narrow)
                .transpose()?
                .unwrap_or_default(),
        }))
    }
}

fn narrow(n: u128) -> std::result::Result<u64, DecodeError> {
    u64::try_from(n).map_err(|_| DecodeError::Abi(format!("quantity {n} exceeds 64 bits")))
}

/// EVM node access used by the earner source and the portal.
#[async_trait]
pub trait EvmRpc: Send + Sync {
    async fn call(&self, req: &CallRequest) -> Result<Vec<u8>>;
    async fn estimate_gas(&self, req: &CallRequest) -> Result<u64>;
    async fn gas_price(&self) -> Result<u64>;
    async fn transaction_count(&self, address: &EvmAddress) -> Result<u64>;
    async fn chain_id(&self) -> Result<u64>;
    /// Broadcast a signed transaction; returns its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String>;
    async fn transaction_receipt(&self, hash: &str) -> Result<Option<TxReceipt>>;
}

pub struct EvmClient {
    transport: HttpTransport,
}

impl EvmClient {
    pub fn new(url: &str, config: RpcConfig) -> std::result::Result<Self, RpcError> {
        Ok(Self {
            transport: HttpTransport::new(url, config)?,
        })
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128> {
        let raw: String = self.transport.call(method, params).await?;
        Ok(parse_quantity(&raw)?)
    }
}

#[async_trait]
impl EvmRpc for EvmClient {
    async fn call(&self, req: &CallRequest) -> Result<Vec<u8>> {
        let raw: String = self
            .transport
            .call("eth_call", json!([req.to_json(), "latest"]))
            .await?;
        debug!(to = %req.to, bytes = raw.len(), "eth_call");
        Ok(parse_hex_bytes(&raw)?)
    }

    async fn estimate_gas(&self, req: &CallRequest) -> Result<u64> {
        let n = self.quantity("eth_estimateGas", json!([req.to_json()])).await?;
        Ok(narrow(n)?)
    }

    async fn gas_price(&self) -> Result<u64> {
        Ok(narrow(self.quantity("eth_gasPrice", json!([])).await?)?)
    }

    async fn transaction_count(&self, address: &EvmAddress) -> Result<u64> {
        let n = self
            .quantity(
                "eth_getTransactionCount",
                json!([address.to_string(), "pending"]),
            )
            .await?;
        Ok(narrow(n)?)
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(narrow(self.quantity("eth_chainId", json!([])).await?)?)
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String> {
        self.transport
            .call(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Option<TxReceipt>> {
        let raw: Option<RawReceipt> = self
            .transport
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?;
        match raw {
            Some(r) => Ok(r.into_receipt()?),
            None => Ok(None),
        }
    }
}

/// Legacy (type 0) transaction fields.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LegacyTx {
    pub nonce: u64,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub to: EvmAddress,
    pub value: u128,
    pub data: Vec<u8>,
}

/// Big-endian bytes without leading zeros; zero is the empty string, as RLP expects.
fn trim_leading_zeros(b: &[u8]) -> &[u8] {
    let first = b.iter().position(|x| *x != 0).unwrap_or(b.len());
    &b[first..]
}

impl LegacyTx {
    fn append_body(&self, s: &mut RlpStream) {
        s.append(&self.nonce);
        s.append(&self.gas_price);
        s.append(&self.gas_limit);
        let to: &[u8] = &self.to.0;
        s.append(&to);
        let value = self.value.to_be_bytes();
        s.append(&trim_leading_zeros(&value));
        s.append(&self.data.as_slice());
    }

    /// EIP-155 signing payload: body followed by `chain_id, 0, 0`.
    pub fn signing_payload(&self, chain_id: u64) -> Vec<u8> {
        let mut s = RlpStream::new();
        s.begin_list(9);
        self.append_body(&mut s);
        s.append(&chain_id);
        s.append(&0u8);
        s.append(&0u8);
        s.out().to_vec()
    }
}

/// secp256k1 key for the EVM submitter account.
pub struct EvmSigner {
    key: SigningKey,
    address: EvmAddress,
}

impl EvmSigner {
    pub fn from_bytes(secret: &[u8; 32]) -> Result<Self> {
        let key = SigningKey::from_bytes(secret.into())
            .map_err(|e| KeeperError::Signer(format!("invalid secp256k1 key: {e}")))?;
        let point = key.verifying_key().to_encoded_point(false);
        let digest = Keccak256::digest(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        Ok(Self {
            key,
            address: EvmAddress(address),
        })
    }

    /// Parse a hex private key (optional `0x`).
    pub fn from_hex(secret: &str) -> Result<Self> {
        let raw = parse_hex_bytes(secret).map_err(|e| KeeperError::Signer(e.to_string()))?;
        let arr: [u8; 32] = raw
            .try_into()
            .map_err(|_| KeeperError::Signer("private key must be 32 bytes".to_string()))?;
        Self::from_bytes(&arr)
    }

    pub fn address(&self) -> EvmAddress {
        self.address
    }

    /// Sign and RLP-encode; `v = chain_id * 2 + 35 + recovery id`.
    pub fn sign_legacy(&self, tx: &LegacyTx, chain_id: u64) -> Result<Vec<u8>> {
        let payload = tx.signing_payload(chain_id);
        let (signature, recovery_id) = self
            .key
            .sign_digest_recoverable(Keccak256::new_with_prefix(payload))
            .map_err(|e| KeeperError::Signer(format!("sign failed: {e}")))?;
        let v = chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35))
            .and_then(|x| x.checked_add(u64::from(recovery_id.to_byte())))
            .ok_or_else(|| KeeperError::Signer(format!("chain id {chain_id} overflows v")))?;
        let sig = signature.to_bytes();
        let mut s = RlpStream::new();
        s.begin_list(9);
        tx.append_body(&mut s);
        s.append(&v);
        s.append(&trim_leading_zeros(&sig[..32]));
        s.append(&trim_leading_zeros(&sig[32..]));
        Ok(s.out().to_vec())
    }
}

/// Keccak-256 of a raw signed transaction, i.e. its hash.
pub fn transaction_hash(raw: &[u8]) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(raw)))
}
