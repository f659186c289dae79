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

//! Hash derivations for gateway transactions and request fingerprints.
//!
//! All transaction digests are Keccak-256 over ABI encodings or canonical
//! string forms; request fingerprints are SHA3-256. Hex in string forms is
//! lowercase and unprefixed.

use crate::types::{BurnRef, EthAddress, Hash, TxHash};
use ethabi::Token;
use ethereum_types::U256;
use sha3::{Digest, Keccak256, Sha3_256};

pub fn keccak256(data: &[u8]) -> Hash {
	Hash::from_slice(Keccak256::digest(data).as_slice())
}

pub fn sha3_256(data: &[u8]) -> Hash {
	Hash::from_slice(Sha3_256::digest(data).as_slice())
}

/// `ghash = Keccak256(abi_encode(phash, token, to, nonce))`
pub fn ghash(phash: &Hash, token: EthAddress, to: EthAddress, nonce: &Hash) -> Hash {
	let encoded = ethabi::encode(&[
		Token::FixedBytes(phash.as_bytes().to_vec()),
		Token::Address(token),
		Token::Address(to),
		Token::FixedBytes(nonce.as_bytes().to_vec()),
	]);
	keccak256(&encoded)
}

/// `nhash = Keccak256(abi_encode(nonce, txid, txindex))`
pub fn nhash(nonce: &Hash, txid: &Hash, txindex: u32) -> Hash {
	let encoded = ethabi::encode(&[
		Token::FixedBytes(nonce.as_bytes().to_vec()),
		Token::FixedBytes(txid.as_bytes().to_vec()),
		Token::Uint(U256::from(txindex)),
	]);
	keccak256(&encoded)
}

/// `txhash = Keccak256("txHash_<selector>_<ghash>_<txid>_<txindex>")`
pub fn lock_mint_tx_hash(selector: &str, ghash: &Hash, txid: &Hash, txindex: u32) -> TxHash {
	let preimage = format!(
		"txHash_{}_{}_{}_{}",
		selector,
		hex::encode(ghash),
		hex::encode(txid),
		txindex
	);
	keccak256(preimage.as_bytes())
}

/// `txhash = Keccak256("txHash_<selector>_<ref>")`
pub fn burn_release_tx_hash(selector: &str, burn_ref: BurnRef) -> TxHash {
	let preimage = format!("txHash_{}_{}", selector, burn_ref);
	keccak256(preimage.as_bytes())
}

/// The script commitment a gateway output must carry, derived from the
/// network distributed public key and the transaction's `ghash`
pub fn gateway_script_hash(dist_pubkey: &[u8], ghash: &Hash) -> Hash {
	let mut preimage = Vec::with_capacity(dist_pubkey.len() + 32);
	preimage.extend_from_slice(dist_pubkey);
	preimage.extend_from_slice(ghash.as_bytes());
	keccak256(&preimage)
}

/// SHA3-256 fingerprint of a request: method name concatenated with the
/// canonical JSON encoding of its params.
///
/// `serde_json` maps are keyed by `BTreeMap`, so re-serializing a parsed
/// `Value` yields sorted keys at every nesting level; two payloads equal up
/// to key ordering fingerprint identically.
pub fn request_fingerprint(method: &str, params: &serde_json::Value) -> Hash {
	let canonical = serde_json::to_vec(params).unwrap_or_default();
	let mut preimage = Vec::with_capacity(method.len() + canonical.len());
	preimage.extend_from_slice(method.as_bytes());
	preimage.extend_from_slice(&canonical);
	sha3_256(&preimage)
}
