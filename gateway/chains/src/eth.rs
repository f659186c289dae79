// Copyright 2022-2023 Futureverse Corporation Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
// You may obtain a copy of the License at the root of this project source code

//! Ethereum host-chain binding: burn log lookups over JSON-RPC

use crate::{BurnEvent, ChainClient, Error, LockedOutput, SourceEntity, LOG_TARGET};
use ethereum_types::U64;
use mintgate_primitives::{
	hash::keccak256,
	jsonrpc::Request,
	types::{Amount, BlockNumber, BurnRef, EthAddress, Hash},
	Asset, Chain,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::OnceLock};

/// `LogBurn(bytes _to, uint256 _amount, uint256 indexed _n, bytes indexed _indexedTo)`
/// as emitted by the gateway contracts
fn burn_event_topic() -> &'static Hash {
	static TOPIC: OnceLock<Hash> = OnceLock::new();
	TOPIC.get_or_init(|| keccak256(b"LogBurn(bytes,uint256,uint256,bytes)"))
}

/// A log entry as returned by `eth_getLogs`
#[derive(Debug, Clone, Deserialize)]
pub struct EthLog {
	pub address: EthAddress,
	pub topics: Vec<Hash>,
	#[serde(with = "mintgate_primitives::serde_hex")]
	pub data: Vec<u8>,
	#[serde(rename = "blockNumber")]
	pub block_number: U64,
}

pub struct EthereumClient {
	http: mintgate_http::Client,
	url: String,
	/// The gateway contract per asset, the source of burn events
	gateway_contracts: HashMap<Asset, EthAddress>,
	/// The wrapped token contract per asset
	tokens: HashMap<Asset, EthAddress>,
}

impl EthereumClient {
	pub fn new(
		http: mintgate_http::Client,
		url: String,
		gateway_contracts: HashMap<Asset, EthAddress>,
		tokens: HashMap<Asset, EthAddress>,
	) -> Self {
		Self { http, url, gateway_contracts, tokens }
	}

	async fn call<T: serde::de::DeserializeOwned>(
		&self,
		method: &str,
		params: Value,
	) -> Result<T, Error> {
		let request = Request {
			jsonrpc: mintgate_primitives::jsonrpc::JSONRPC_VERSION.into(),
			id: json!(1),
			method: method.into(),
			params,
		};
		let response = self.http.send(&self.url, &request).await?;
		if let Some(err) = response.error {
			return Err(Error::Rpc { code: err.code, message: err.message })
		}
		let result = response.result.ok_or_else(|| Error::Decode("missing result".into()))?;
		serde_json::from_value(result).map_err(|e| Error::Decode(e.to_string()))
	}

	fn contract(&self, asset: Asset) -> Result<EthAddress, Error> {
		self.gateway_contracts.get(&asset).copied().ok_or(Error::NotFound)
	}

	fn decode_burn(&self, log: &EthLog) -> Result<BurnEvent, Error> {
		// topics: [signature, n]; data: (bytes to, uint256 amount)
		let burn_ref = log
			.topics
			.get(1)
			.map(|topic| U64::from_big_endian(&topic.as_bytes()[24..]).as_u64())
			.ok_or_else(|| Error::Decode("burn log missing ref topic".into()))?;
		let tokens = ethabi::decode(
			&[ethabi::ParamType::Bytes, ethabi::ParamType::Uint(256)],
			&log.data,
		)
		.map_err(|e| Error::Decode(format!("burn log data: {e}")))?;
		let to_bytes = tokens[0]
			.clone()
			.into_bytes()
			.ok_or_else(|| Error::Decode("burn log to field".into()))?;
		let amount = tokens[1]
			.clone()
			.into_uint()
			.ok_or_else(|| Error::Decode("burn log amount field".into()))?;
		Ok(BurnEvent {
			burn_ref,
			to: String::from_utf8(to_bytes)
				.map_err(|e| Error::Decode(format!("burn log recipient: {e}")))?,
			amount: amount.as_u128() as Amount,
			block_number: log.block_number.as_u64(),
		})
	}

	async fn logs(
		&self,
		asset: Asset,
		from: BlockNumber,
		to: BlockNumber,
		burn_ref: Option<BurnRef>,
	) -> Result<Vec<BurnEvent>, Error> {
		let contract = self.contract(asset)?;
		let mut topics: Vec<Value> =
			vec![json!(format!("0x{}", hex::encode(burn_event_topic())))];
		if let Some(n) = burn_ref {
			let mut padded = [0u8; 32];
			padded[24..].copy_from_slice(&n.to_be_bytes());
			topics.push(json!(format!("0x{}", hex::encode(padded))));
		}
		let filter = json!([{
			"address": format!("0x{}", hex::encode(contract)),
			"fromBlock": format!("{:#x}", from),
			"toBlock": format!("{:#x}", to),
			"topics": topics,
		}]);
		let logs: Vec<EthLog> = self.call("eth_getLogs", filter).await?;
		log::trace!(
			target: LOG_TARGET,
			"eth_getLogs {}..{} for {:?}: {} entries",
			from,
			to,
			asset,
			logs.len()
		);
		logs.iter().map(|log| self.decode_burn(log)).collect()
	}
}

#[async_trait::async_trait]
impl ChainClient for EthereumClient {
	fn chain(&self) -> Chain {
		Chain::Ethereum
	}

	async fn lookup_utxo(&self, _txid: &Hash, _txindex: u32) -> Result<LockedOutput, Error> {
		Err(Error::Unsupported("utxo lookup"))
	}

	async fn lookup_account_entry(&self, _txid: &Hash) -> Result<LockedOutput, Error> {
		Err(Error::Unsupported("account entry lookup"))
	}

	async fn lookup_log_event(
		&self,
		asset: Asset,
		burn_ref: BurnRef,
	) -> Result<BurnEvent, Error> {
		let tip = self.latest_block().await?;
		self.logs(asset, 0, tip, Some(burn_ref))
			.await?
			.into_iter()
			.next()
			.ok_or(Error::NotFound)
	}

	async fn confirmations(&self, entity: &SourceEntity) -> Result<u64, Error> {
		let SourceEntity::LogEvent { asset, burn_ref } = entity else {
			return Err(Error::Unsupported("confirmations for non-log entities"))
		};
		let event = self.lookup_log_event(*asset, *burn_ref).await?;
		let tip = self.latest_block().await?;
		Ok(tip.saturating_sub(event.block_number).saturating_add(1))
	}

	async fn latest_block(&self) -> Result<BlockNumber, Error> {
		let raw: U64 = self.call("eth_blockNumber", json!([])).await?;
		Ok(raw.as_u64())
	}

	async fn burn_logs(
		&self,
		asset: Asset,
		from: BlockNumber,
		to: BlockNumber,
	) -> Result<Vec<BurnEvent>, Error> {
		self.logs(asset, from, to, None).await
	}

	fn token_for_asset(&self, asset: Asset) -> Option<EthAddress> {
		self.tokens.get(&asset).copied()
	}
}
