//! Typed views of the EVM source-of-truth and portal contracts.

use crate::chain::abi::{self, Token, Word};
use crate::chain::evm::{CallRequest, EvmAddress, EvmRpc};
use crate::error::{DecodeError, Result};
use crate::tx::Pubkey;

pub const GET_EARNERS: &str = "getEarners()";
pub const CURRENT_INDEX: &str = "currentIndex()";
pub const EARNER_RATE: &str = "earnerRate()";
pub const QUOTE_DELIVERY_PRICE: &str = "quoteDeliveryPrice(uint16,bytes)";
pub const SEND_INDEX: &str = "sendMTokenIndex(uint16,bytes32)";

/// Transceiver instructions selecting the default transceiver with no extra options.
pub const DEFAULT_TRANSCEIVER_INSTRUCTIONS: [u8; 4] = [0x01, 0x00, 0x01, 0x00];

/// Read-only access to the contract holding the canonical earner list and index.
pub struct EarnerSource<'a> {
    rpc: &'a dyn EvmRpc,
    address: EvmAddress,
}

impl<'a> EarnerSource<'a> {
    pub fn new(rpc: &'a dyn EvmRpc, address: EvmAddress) -> Self {
        Self { rpc, address }
    }

    async fn view(&self, signature: &str) -> Result<Vec<u8>> {
        let req = CallRequest::new(self.address, abi::encode_call(signature, &[]));
        self.rpc.call(&req).await
    }

    /// Earner accounts; each returned word is one 32-byte account key.
    pub async fn earners(&self) -> Result<Vec<Pubkey>> {
        let data = self.view(GET_EARNERS).await?;
        Ok(abi::decode_word_array(&data, 0)?
            .into_iter()
            .map(Pubkey::new_from_array)
            .collect())
    }

    pub async fn current_index(&self) -> Result<u64> {
        let data = self.view(CURRENT_INDEX).await?;
        Ok(abi::decode_u64(&data, 0)?)
    }

    /// Earner rate in basis points.
    pub async fn earner_rate(&self) -> Result<u32> {
        let data = self.view(EARNER_RATE).await?;
        let n = abi::decode_u64(&data, 0)?;
        Ok(u32::try_from(n).map_err(|_| DecodeError::Abi(format!("earner rate {n} exceeds uint32")))?)
    }
}

/// Cross-chain portal that relays the index to the destination chain.
pub struct Portal<'a> {
    rpc: &'a dyn EvmRpc,
    address: EvmAddress,
}

impl<'a> Portal<'a> {
    pub fn new(rpc: &'a dyn EvmRpc, address: EvmAddress) -> Self {
        Self { rpc, address }
    }

    pub fn address(&self) -> EvmAddress {
        self.address
    }

    /// Total delivery price in wei for a message to `destination_chain`.
    pub async fn quote_delivery_price(
        &self,
        destination_chain: u16,
        transceiver_instructions: &[u8],
    ) -> Result<u128> {
        let data = abi::encode_call(
            QUOTE_DELIVERY_PRICE,
            &[
                Token::Uint(u128::from(destination_chain)),
                Token::Bytes(transceiver_instructions.to_vec()),
            ],
        );
        let ret = self.rpc.call(&CallRequest::new(self.address, data)).await?;
        // (uint256[] per-transceiver quotes, uint256 total)
        Ok(abi::decode_u128(&ret, 1)?)
    }

    /// Calldata for the payable index push.
    pub fn send_index_calldata(destination_chain: u16, refund_address: Word) -> Vec<u8> {
        abi::encode_call(
            SEND_INDEX,
            &[
                Token::Uint(u128::from(destination_chain)),
                Token::FixedBytes(refund_address),
            ],
        )
    }
}

/// Left-pad an EVM address into a bytes32 word.
pub fn address_word(address: &EvmAddress) -> Word {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(&address.0);
    w
}
