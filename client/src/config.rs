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

//! The network config file: chains, bootstrap peers, whitelist, limiter
//! overrides. Scalar runtime knobs come from the CLI; this file carries the
//! structured parts, JSON in the manner of a chain spec.

use anyhow::Context;
use mintgate_peers::Peer;
use mintgate_primitives::{jsonrpc::Method, types::EthAddress, Chain, Network, Selector};
use serde::Deserialize;
use std::{collections::HashMap, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct ChainEntry {
	pub rpc_url: String,
	pub confirmation_threshold: u64,
	pub min_amount: u128,
	/// Host-chain gateway contract per asset (burn event source)
	#[serde(default)]
	pub gateway_contracts: HashMap<String, EthAddress>,
	/// Host-chain token contract per asset
	#[serde(default)]
	pub tokens: HashMap<String, EthAddress>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
	#[serde(default)]
	pub network: Network,
	pub bootstrap_addrs: Vec<Peer>,
	pub whitelist: Vec<Selector>,
	/// Hex-encoded distributed public key of the custody network
	pub dist_pubkey: String,
	pub chains: HashMap<Chain, ChainEntry>,
	/// Per-method global rate overrides, requests per second
	#[serde(default)]
	pub limiter_global_rates: HashMap<String, f64>,
	/// Per-method per-IP rate overrides, requests per second
	#[serde(default)]
	pub limiter_ip_rates: HashMap<String, f64>,
}

impl NetworkConfig {
	pub fn load(path: &Path) -> anyhow::Result<Self> {
		let raw = std::fs::read_to_string(path)
			.with_context(|| format!("reading config {}", path.display()))?;
		let config: NetworkConfig =
			serde_json::from_str(&raw).with_context(|| "parsing config")?;
		config.validate()?;
		Ok(config)
	}

	fn validate(&self) -> anyhow::Result<()> {
		for selector in &self.whitelist {
			let source = selector.source_chain();
			anyhow::ensure!(
				self.chains.contains_key(&source),
				"whitelisted selector {selector} needs a binding for chain {source}",
			);
		}
		self.dist_pubkey_bytes()?;
		Ok(())
	}

	pub fn dist_pubkey_bytes(&self) -> anyhow::Result<Vec<u8>> {
		let stripped = self.dist_pubkey.strip_prefix("0x").unwrap_or(&self.dist_pubkey);
		hex::decode(stripped).context("dist_pubkey is not valid hex")
	}

	/// The (host chain, asset) pairs that need a watcher: one per
	/// whitelisted burn/release selector
	pub fn watch_pairs(&self) -> Vec<Selector> {
		self.whitelist.iter().copied().filter(Selector::is_burn_release).collect()
	}

	/// Per-method rate overrides parsed into the limiter's key type
	pub fn method_rates(raw: &HashMap<String, f64>) -> HashMap<Method, f64> {
		raw.iter()
			.filter_map(|(name, rate)| match name.parse::<Method>() {
				Ok(method) => Some((method, *rate)),
				Err(_) => {
					log::warn!(target: "config", "ignoring rate for unknown method {name}");
					None
				},
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mintgate_primitives::Asset;

	fn sample() -> NetworkConfig {
		serde_json::from_value(serde_json::json!({
			"network": "testnet",
			"bootstrap_addrs": [
				{
					"id": "b1",
					"network_address": "http://b1.example:5000",
					"signature": "0x01",
					"nonce": 0
				}
			],
			"whitelist": ["BTC/toEthereum", "BTC/fromEthereum"],
			"dist_pubkey": "0x03030303",
			"chains": {
				"Bitcoin": {
					"rpc_url": "http://bitcoind:8332",
					"confirmation_threshold": 6,
					"min_amount": 10000
				},
				"Ethereum": {
					"rpc_url": "http://geth:8545",
					"confirmation_threshold": 30,
					"min_amount": 10000,
					"gateway_contracts": {"BTC": "0x00000000000000000000000000000000000000aa"},
					"tokens": {"BTC": "0x00000000000000000000000000000000000000bb"}
				}
			},
			"limiter_ip_rates": {"submitTx": 2.0, "notAMethod": 9.0}
		}))
		.unwrap()
	}

	#[test]
	fn sample_config_parses_and_validates() {
		let config = sample();
		config.validate().unwrap();
		assert_eq!(config.network, Network::Testnet);
		assert_eq!(config.bootstrap_addrs.len(), 1);
		assert_eq!(config.dist_pubkey_bytes().unwrap(), vec![3u8; 4]);
	}

	#[test]
	fn burn_selectors_become_watch_pairs() {
		let pairs = sample().watch_pairs();
		assert_eq!(pairs.len(), 1);
		assert_eq!(pairs[0].asset, Asset::Btc);
		assert_eq!(pairs[0].host_chain, Chain::Ethereum);
	}

	#[test]
	fn unknown_method_rates_are_dropped() {
		let rates = NetworkConfig::method_rates(&sample().limiter_ip_rates);
		assert_eq!(rates.len(), 1);
		assert_eq!(rates.get(&Method::SubmitTx), Some(&2.0));
	}

	#[test]
	fn whitelist_without_chain_binding_fails_validation() {
		let mut config = sample();
		config.whitelist.push("ZEC/toEthereum".parse().unwrap());
		assert!(config.validate().is_err());
	}
}
