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

//! Compat translation for legacy client shapes.
//!
//! Three generations of clients are still in the wild: ones using the old
//! underscore-free selector names, ones sending the now-forbidden `gpubkey`
//! field (which changed the derived hash), and ones submitting only a UTXO
//! plus a known gateway address. All are translated to the current shape
//! before verification; hash changes are recorded in the compat map so
//! polling by the old hash still resolves.

use mintgate_primitives::{
	hash::keccak256,
	types::{Hash, TxHash},
};
use mintgate_store::Store;
use serde_json::Value;

/// Selector names accepted before the `ASSET/{to,from}CHAIN` form
const SELECTOR_ALIASES: &[(&str, &str)] = &[
	("BTC0Btc2Eth", "BTC/toEthereum"),
	("BTC0Eth2Btc", "BTC/fromEthereum"),
	("ZEC0Zec2Eth", "ZEC/toEthereum"),
	("ZEC0Eth2Zec", "ZEC/fromEthereum"),
	("BCH0Bch2Eth", "BCH/toEthereum"),
	("BCH0Eth2Bch", "BCH/fromEthereum"),
];

/// What a translation pass changed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Translation {
	/// Any legacy shape was present
	pub legacy: bool,
	/// The hash the legacy client believes the transaction has
	pub old_hash: Option<TxHash>,
	/// The stripped `gpubkey`, kept for legacy hash derivation
	pub gpubkey: Option<Vec<u8>>,
}

pub fn selector_alias(name: &str) -> Option<&'static str> {
	SELECTOR_ALIASES
		.iter()
		.find(|(alias, _)| *alias == name)
		.map(|(_, current)| *current)
}

/// Rewrite legacy `submitTx` params in place
pub fn translate_submit(params: &mut Value) -> Translation {
	let mut translation = Translation::default();
	let Some(object) = params.as_object_mut() else { return translation };

	if let Some(alias) = object.get("selector").and_then(Value::as_str) {
		if let Some(current) = selector_alias(alias) {
			object.insert("selector".into(), Value::String(current.into()));
			translation.legacy = true;
		}
	}

	if let Some(raw_gpubkey) = object.remove("gpubkey") {
		translation.legacy = true;
		translation.gpubkey = raw_gpubkey
			.as_str()
			.and_then(|s| hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok());
		// the hash the client derived covers gpubkey; it cannot match the
		// re-derived one, so lift it out for the compat mapping
		if let Some(raw_hash) = object.remove("hash") {
			translation.old_hash = raw_hash.as_str().and_then(parse_hash);
		}
	}

	translation
}

/// The pre-translation hash for a lock/mint submission that carried a
/// `gpubkey`: the field was appended to the hash preimage
pub fn legacy_lock_mint_tx_hash(
	selector: &str,
	ghash: &Hash,
	txid: &Hash,
	txindex: u32,
	gpubkey: &[u8],
) -> TxHash {
	let preimage = format!(
		"txHash_{}_{}_{}_{}_{}",
		selector,
		hex::encode(ghash),
		hex::encode(txid),
		txindex,
		hex::encode(gpubkey)
	);
	keccak256(preimage.as_bytes())
}

/// Reconstruct full `submitTx` params from a gateway recovery row when the
/// submission carries only `{gateway, txid, txindex, amount}`
pub fn try_recover_submit(params: &Value, store: &Store) -> Option<Value> {
	let object = params.as_object()?;
	// a full submission carries phash; a recovery submission names the
	// gateway instead
	if object.contains_key("phash") {
		return None
	}
	let gateway = parse_hash(object.get("gateway")?.as_str()?)?;
	let row = store.gateway_recovery(&gateway).ok()?;

	let recovered = serde_json::json!({
		"selector": row.selector.to_string(),
		"txid": object.get("txid")?,
		"txindex": object.get("txindex")?,
		"amount": object.get("amount")?,
		"payload": format!("0x{}", hex::encode(&row.payload)),
		"phash": format!("0x{}", hex::encode(row.phash)),
		"to": format!("0x{}", hex::encode(row.to)),
		"nonce": format!("0x{}", hex::encode(row.nonce)),
		"nhash": format!("0x{}", hex::encode(row.nhash)),
	});
	Some(recovered)
}

/// Translate a legacy selector inside non-submit params (e.g. `queryTxs`
/// filters)
pub fn translate_selector_filter(params: &mut Value) {
	if let Some(object) = params.as_object_mut() {
		if let Some(alias) = object.get("selector").and_then(Value::as_str) {
			if let Some(current) = selector_alias(alias) {
				object.insert("selector".into(), Value::String(current.into()));
			}
		}
	}
}

fn parse_hash(raw: &str) -> Option<Hash> {
	let stripped = raw.strip_prefix("0x").unwrap_or(raw);
	let bytes = hex::decode(stripped).ok()?;
	(bytes.len() == 32).then(|| Hash::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn alias_selectors_are_rewritten() {
		let mut params = json!({"selector": "BTC0Btc2Eth", "ref": 1});
		let translation = translate_submit(&mut params);
		assert!(translation.legacy);
		assert_eq!(params["selector"], json!("BTC/toEthereum"));
	}

	#[test]
	fn current_selectors_pass_untouched() {
		let mut params = json!({"selector": "BTC/toEthereum", "ref": 1});
		let translation = translate_submit(&mut params);
		assert!(!translation.legacy);
		assert_eq!(params["selector"], json!("BTC/toEthereum"));
	}

	#[test]
	fn gpubkey_is_stripped_and_remembered() {
		let old_hash = Hash::repeat_byte(9);
		let mut params = json!({
			"selector": "BTC/toEthereum",
			"gpubkey": "0x02aa",
			"hash": format!("0x{}", hex::encode(old_hash)),
			"txid": "0x01",
		});
		let translation = translate_submit(&mut params);
		assert!(translation.legacy);
		assert_eq!(translation.gpubkey, Some(vec![0x02, 0xaa]));
		assert_eq!(translation.old_hash, Some(old_hash));
		assert!(params.get("gpubkey").is_none());
		assert!(params.get("hash").is_none());
	}

	#[test]
	fn legacy_hash_differs_from_current() {
		let ghash = Hash::repeat_byte(1);
		let txid = Hash::repeat_byte(2);
		let legacy =
			legacy_lock_mint_tx_hash("BTC/toEthereum", &ghash, &txid, 0, &[0x02, 0xaa]);
		let current =
			mintgate_primitives::hash::lock_mint_tx_hash("BTC/toEthereum", &ghash, &txid, 0);
		assert_ne!(legacy, current);
	}

	#[test]
	fn recovery_rebuilds_full_params() {
		let store = Store::open_in_memory().unwrap();
		let row = mintgate_store::GatewayRecovery {
			gateway_address: Hash::repeat_byte(7),
			selector: "BTC/toEthereum".parse().unwrap(),
			payload: vec![0xde, 0xad],
			phash: Hash::repeat_byte(1),
			nonce: Hash::repeat_byte(2),
			nhash: Hash::repeat_byte(3),
			to: ethereum_types::H160::repeat_byte(0xab),
		};
		store.put_gateway_recovery(&row).unwrap();

		let params = json!({
			"gateway": format!("0x{}", hex::encode(Hash::repeat_byte(7))),
			"txid": format!("0x{}", hex::encode(Hash::repeat_byte(4))),
			"txindex": 1,
			"amount": 25000u64,
		});
		let recovered = try_recover_submit(&params, &store).unwrap();
		assert_eq!(recovered["selector"], json!("BTC/toEthereum"));
		assert_eq!(recovered["payload"], json!("0xdead"));
		assert_eq!(recovered["txindex"], json!(1));

		// a full submission is left alone
		let full = json!({"phash": "0x00", "txid": "0x01"});
		assert!(try_recover_submit(&full, &store).is_none());
	}
}
