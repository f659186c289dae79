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

//! UTXO-chain binding over the bitcoind JSON-RPC family
//! (Bitcoin, Bitcoin Cash, Zcash share the wire surface used here)

use crate::{BurnEvent, ChainClient, Error, LockedOutput, SourceEntity, LOG_TARGET};
use mintgate_primitives::{
	hash::keccak256,
	jsonrpc::Request,
	types::{Amount, BlockNumber, BurnRef, EthAddress, Hash},
	Asset, Chain,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Satoshis per coin for the value conversion of `gettxout`
const COIN: f64 = 100_000_000.0;

/// `gettxout` response subset
#[derive(Debug, Deserialize)]
struct TxOut {
	/// Value in whole coins
	value: f64,
	confirmations: u64,
	#[serde(rename = "scriptPubKey")]
	script_pub_key: ScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct ScriptPubKey {
	hex: String,
}

pub struct UtxoClient {
	http: mintgate_http::Client,
	url: String,
	chain: Chain,
}

impl UtxoClient {
	pub fn new(http: mintgate_http::Client, url: String, chain: Chain) -> Self {
		Self { http, url, chain }
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

	/// `gettxout` with mempool inclusion, the zero-confirmation view.
	/// Returns `null` (decoded as `None`) for unknown or spent outputs.
	async fn txout(&self, txid: &Hash, txindex: u32) -> Result<TxOut, Error> {
		let out: Option<TxOut> = self
			.call("gettxout", json!([hex::encode(txid), txindex, true]))
			.await?;
		out.ok_or(Error::NotFound)
	}
}

#[async_trait::async_trait]
impl ChainClient for UtxoClient {
	fn chain(&self) -> Chain {
		self.chain
	}

	async fn lookup_utxo(&self, txid: &Hash, txindex: u32) -> Result<LockedOutput, Error> {
		let out = self.txout(txid, txindex).await?;
		let script = hex::decode(&out.script_pub_key.hex)
			.map_err(|e| Error::Decode(format!("scriptPubKey: {e}")))?;
		let amount = (out.value * COIN).round() as Amount;
		log::trace!(
			target: LOG_TARGET,
			"utxo {}:{} on {:?}: {} sats",
			hex::encode(txid),
			txindex,
			self.chain,
			amount
		);
		Ok(LockedOutput { amount, script_hash: keccak256(&script) })
	}

	async fn lookup_account_entry(&self, _txid: &Hash) -> Result<LockedOutput, Error> {
		Err(Error::Unsupported("account entry lookup"))
	}

	async fn lookup_log_event(
		&self,
		_asset: Asset,
		_burn_ref: BurnRef,
	) -> Result<BurnEvent, Error> {
		Err(Error::Unsupported("log event lookup"))
	}

	async fn confirmations(&self, entity: &SourceEntity) -> Result<u64, Error> {
		let SourceEntity::Utxo { txid, txindex } = entity else {
			return Err(Error::Unsupported("confirmations for non-utxo entities"))
		};
		Ok(self.txout(txid, *txindex).await?.confirmations)
	}

	async fn latest_block(&self) -> Result<BlockNumber, Error> {
		self.call("getblockcount", json!([])).await
	}

	async fn burn_logs(
		&self,
		_asset: Asset,
		_from: BlockNumber,
		_to: BlockNumber,
	) -> Result<Vec<BurnEvent>, Error> {
		Err(Error::Unsupported("burn logs"))
	}

	fn token_for_asset(&self, _asset: Asset) -> Option<EthAddress> {
		None
	}
}
