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

//! Cross-chain transaction selectors, `ASSET/{to,from}CHAIN`

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// A wrapped asset moved through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Asset {
	Btc,
	Bch,
	Zec,
}

impl Asset {
	/// The chain the asset is native to, i.e. where locks and releases happen
	pub fn native_chain(&self) -> Chain {
		match self {
			Asset::Btc => Chain::Bitcoin,
			Asset::Bch => Chain::BitcoinCash,
			Asset::Zec => Chain::Zcash,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Asset::Btc => "BTC",
			Asset::Bch => "BCH",
			Asset::Zec => "ZEC",
		}
	}
}

impl FromStr for Asset {
	type Err = SelectorError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"BTC" => Ok(Asset::Btc),
			"BCH" => Ok(Asset::Bch),
			"ZEC" => Ok(Asset::Zec),
			_ => Err(SelectorError::UnknownAsset(s.into())),
		}
	}
}

impl fmt::Display for Asset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A chain the gateway can observe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
	Bitcoin,
	BitcoinCash,
	Zcash,
	Ethereum,
}

impl Chain {
	pub fn as_str(&self) -> &'static str {
		match self {
			Chain::Bitcoin => "Bitcoin",
			Chain::BitcoinCash => "BitcoinCash",
			Chain::Zcash => "Zcash",
			Chain::Ethereum => "Ethereum",
		}
	}

	/// Whether entities on this chain are UTXOs (vs. account-ledger entries)
	pub fn is_utxo_based(&self) -> bool {
		!matches!(self, Chain::Ethereum)
	}
}

impl FromStr for Chain {
	type Err = SelectorError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"Bitcoin" => Ok(Chain::Bitcoin),
			"BitcoinCash" => Ok(Chain::BitcoinCash),
			"Zcash" => Ok(Chain::Zcash),
			"Ethereum" => Ok(Chain::Ethereum),
			_ => Err(SelectorError::UnknownChain(s.into())),
		}
	}
}

impl fmt::Display for Chain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Direction of a cross-chain move relative to the host chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
	/// Lock on the native chain, mint on the host chain
	To,
	/// Burn on the host chain, release on the native chain
	From,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
	#[error("malformed selector: {0}")]
	Malformed(String),
	#[error("unknown asset: {0}")]
	UnknownAsset(String),
	#[error("unknown chain: {0}")]
	UnknownChain(String),
}

/// Discriminates a gateway transaction: `ASSET/{to,from}CHAIN`, e.g. `BTC/toEthereum`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector {
	pub asset: Asset,
	pub host_chain: Chain,
	pub direction: Direction,
}

impl Selector {
	pub fn new(asset: Asset, host_chain: Chain, direction: Direction) -> Self {
		Self { asset, host_chain, direction }
	}

	/// True for `ASSET/toCHAIN`: a lock on the native chain minting on `host_chain`
	pub fn is_lock_mint(&self) -> bool {
		self.direction == Direction::To
	}

	/// True for `ASSET/fromCHAIN`: a burn on `host_chain` releasing on the native chain
	pub fn is_burn_release(&self) -> bool {
		self.direction == Direction::From
	}

	/// The chain holding the entity the verifier must look up.
	///
	/// Lock/mint transactions reference a UTXO or ledger entry on the asset's
	/// native chain; burn/release transactions reference a log event on the
	/// host chain.
	pub fn source_chain(&self) -> Chain {
		match self.direction {
			Direction::To => self.asset.native_chain(),
			Direction::From => self.host_chain,
		}
	}
}

impl FromStr for Selector {
	type Err = SelectorError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (asset, rest) =
			s.split_once('/').ok_or_else(|| SelectorError::Malformed(s.into()))?;
		let asset = asset.parse()?;
		if let Some(chain) = rest.strip_prefix("to") {
			return Ok(Selector::new(asset, chain.parse()?, Direction::To))
		}
		if let Some(chain) = rest.strip_prefix("from") {
			return Ok(Selector::new(asset, chain.parse()?, Direction::From))
		}
		Err(SelectorError::Malformed(s.into()))
	}
}

impl fmt::Display for Selector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let direction = match self.direction {
			Direction::To => "to",
			Direction::From => "from",
		};
		write!(f, "{}/{}{}", self.asset, direction, self.host_chain)
	}
}

impl Serialize for Selector {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for Selector {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(serde::de::Error::custom)
	}
}
