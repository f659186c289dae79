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

//! Common types across the gateway subsystems

pub use selector::*;
pub use tx::*;
pub use types::*;

pub mod hash;
pub mod jsonrpc;
mod selector;
mod tx;

pub mod types {
	/// A block height on some source chain
	pub type BlockNumber = u64;

	/// Amount of an asset, in the asset's smallest unit
	pub type Amount = u128;

	/// A hash of some data used by the gateway
	pub type Hash = ethereum_types::H256;

	/// The derived identity of a gateway transaction
	pub type TxHash = ethereum_types::H256;

	/// An address on an account-model host chain
	pub type EthAddress = ethereum_types::H160;

	/// Identifies a backend node
	pub type PeerId = String;

	/// Monotonic counter attached to a burn event by the host contract
	pub type BurnRef = u64;
}

/// The network the gateway fronts
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	#[default]
	Mainnet,
	Testnet,
	Devnet,
	Localnet,
}

impl std::str::FromStr for Network {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"mainnet" => Ok(Network::Mainnet),
			"testnet" => Ok(Network::Testnet),
			"devnet" => Ok(Network::Devnet),
			"localnet" => Ok(Network::Localnet),
			other => Err(format!("unknown network: {other}")),
		}
	}
}

impl std::fmt::Display for Network {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Network::Mainnet => write!(f, "mainnet"),
			Network::Testnet => write!(f, "testnet"),
			Network::Devnet => write!(f, "devnet"),
			Network::Localnet => write!(f, "localnet"),
		}
	}
}

/// Serialize byte vectors as `0x` prefixed hex strings
pub mod serde_hex {
	use serde::{de::Visitor, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format!("0x{}", hex::encode(value)))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		struct HexVisitor;

		impl<'de> Visitor<'de> for HexVisitor {
			type Value = Vec<u8>;

			fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
				write!(formatter, "a 0x prefixed hex string")
			}

			fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Self::Value, E> {
				let stripped = value.strip_prefix("0x").unwrap_or(value);
				hex::decode(stripped).map_err(E::custom)
			}
		}

		deserializer.deserialize_str(HexVisitor)
	}
}
