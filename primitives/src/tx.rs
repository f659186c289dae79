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

//! Gateway transaction shapes and lifecycle

use crate::{
	serde_hex,
	types::{Amount, BurnRef, EthAddress, Hash, TxHash},
	Selector,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Status of a gateway transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
	/// Admitted at zero confirmations, awaiting the chain-specific threshold
	Confirming,
	/// Buried under enough blocks and submitted to the backend
	Confirmed,
	/// The backend reported the transaction as already executed
	Done,
	/// The source entity was rolled back or invalidated
	Reverted,
}

impl TxStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			TxStatus::Confirming => "confirming",
			TxStatus::Confirmed => "confirmed",
			TxStatus::Done => "done",
			TxStatus::Reverted => "reverted",
		}
	}
}

impl FromStr for TxStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"confirming" => Ok(TxStatus::Confirming),
			"confirmed" => Ok(TxStatus::Confirmed),
			"done" => Ok(TxStatus::Done),
			"reverted" => Ok(TxStatus::Reverted),
			other => Err(format!("unknown tx status: {other}")),
		}
	}
}

impl fmt::Display for TxStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Input of a lock/mint transaction: references a UTXO or account-ledger
/// entry on the asset's native chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMintInput {
	/// Source chain transaction hash holding the locked output
	pub txid: Hash,
	/// Output index within `txid`
	pub txindex: u32,
	/// Locked amount in the asset's smallest unit
	pub amount: Amount,
	/// Application payload forwarded to the host chain contract
	#[serde(with = "serde_hex")]
	pub payload: Vec<u8>,
	/// Keccak-256 of `payload`
	pub phash: Hash,
	/// Recipient of the minted asset on the host chain
	pub to: EthAddress,
	/// Caller-chosen uniqueness nonce
	pub nonce: Hash,
	/// Derived nonce hash, filled by the verifier when absent
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nhash: Option<Hash>,
	/// Forbidden legacy field; submissions carrying it are compat-translated
	#[serde(default, skip_serializing_if = "Option::is_none", with = "opt_serde_hex")]
	pub gpubkey: Option<Vec<u8>>,
	/// Derived gateway hash, filled by the verifier when absent
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ghash: Option<Hash>,
}

/// Input of a burn/release transaction: references a burn log event on the
/// host chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnReleaseInput {
	/// The burn event counter assigned by the host contract
	#[serde(rename = "ref")]
	pub burn_ref: BurnRef,
	/// Release recipient address on the asset's native chain
	pub to: String,
	/// Burned amount in the asset's smallest unit
	pub amount: Amount,
	/// Caller-chosen uniqueness nonce
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nonce: Option<Hash>,
}

/// Tagged union over the two transaction shapes.
///
/// Serialized untagged: the two shapes are distinguished by their required
/// fields (`txid`/`txindex` vs `ref`). The verifier still checks the decoded
/// variant against the selector's direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TxInput {
	LockMint(LockMintInput),
	BurnRelease(BurnReleaseInput),
}

/// `submitTx` request params as they arrive on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTxParams {
	pub selector: Selector,
	/// Expected derived hash; checked against the derivation when present,
	/// filled when absent
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hash: Option<TxHash>,
	#[serde(flatten)]
	pub input: TxInput,
}

/// A verified gateway transaction as persisted and returned to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	pub hash: TxHash,
	pub selector: Selector,
	#[serde(flatten)]
	pub input: TxInput,
	pub status: TxStatus,
}

/// `queryTx` request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryTxParams {
	pub hash: TxHash,
}

/// `queryTxs` request params
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryTxsParams {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<TxStatus>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub selector: Option<Selector>,
	/// Page offset in rows
	#[serde(default)]
	pub offset: u64,
	/// Page size; clamped to the configured maximum
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub limit: Option<u64>,
}

mod opt_serde_hex {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(
		value: &Option<Vec<u8>>,
		serializer: S,
	) -> Result<S::Ok, S::Error> {
		match value {
			Some(bytes) => crate::serde_hex::serialize(bytes, serializer),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(
		deserializer: D,
	) -> Result<Option<Vec<u8>>, D::Error> {
		let raw = Option::<String>::deserialize(deserializer)?;
		match raw {
			None => Ok(None),
			Some(s) => {
				let stripped = s.strip_prefix("0x").unwrap_or(&s);
				hex::decode(stripped).map(Some).map_err(serde::de::Error::custom)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ethereum_types::{H160, H256};

	fn lock_mint_json() -> serde_json::Value {
		serde_json::json!({
			"selector": "BTC/toEthereum",
			"txid": format!("0x{}", hex::encode(H256::repeat_byte(1))),
			"txindex": 0,
			"amount": 100000u64,
			"payload": "0xdeadbeef",
			"phash": format!("0x{}", hex::encode(H256::repeat_byte(3))),
			"to": format!("0x{}", hex::encode(H160::repeat_byte(0xab))),
			"nonce": format!("0x{}", hex::encode(H256::repeat_byte(2))),
		})
	}

	#[test]
	fn decode_lock_mint_submit_params() {
		let params: SubmitTxParams = serde_json::from_value(lock_mint_json()).unwrap();
		assert!(params.hash.is_none());
		let TxInput::LockMint(input) = params.input else {
			panic!("expected a lock/mint input");
		};
		assert_eq!(input.txid, H256::repeat_byte(1));
		assert_eq!(input.amount, 100000);
		assert_eq!(input.payload, vec![0xde, 0xad, 0xbe, 0xef]);
		assert!(input.gpubkey.is_none());
	}

	#[test]
	fn decode_burn_release_submit_params() {
		let params: SubmitTxParams = serde_json::from_value(serde_json::json!({
			"selector": "BTC/fromEthereum",
			"ref": 7,
			"to": "miKLp9BKYVy6S4TzQWtrHsPiMczBAwvFJo",
			"amount": 50000u64,
		}))
		.unwrap();
		let TxInput::BurnRelease(input) = params.input else {
			panic!("expected a burn/release input");
		};
		assert_eq!(input.burn_ref, 7);
		assert_eq!(input.amount, 50000);
	}

	#[test]
	fn status_round_trips_through_str() {
		for status in
			[TxStatus::Confirming, TxStatus::Confirmed, TxStatus::Done, TxStatus::Reverted]
		{
			assert_eq!(status.as_str().parse::<TxStatus>().unwrap(), status);
		}
	}
}
