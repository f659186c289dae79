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

//! Chain bindings as a capability set.
//!
//! The verifier, confirmer and watchers each need a narrow view of a source
//! chain: fetch a locked output, fetch a burn event, count confirmations.
//! [`ChainClient`] is that view; concrete chain types never leak upward.

use mintgate_primitives::{
	types::{Amount, BlockNumber, BurnRef, EthAddress, Hash},
	Asset, Chain, Selector, Transaction, TxInput,
};
use std::{collections::HashMap, sync::Arc};

pub mod eth;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod utxo;

pub(crate) const LOG_TARGET: &str = "chains";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("http: {0}")]
	Http(#[from] mintgate_http::Error),
	#[error("chain rpc error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("entity not found on chain")]
	NotFound,
	#[error("{0} is not supported on this chain")]
	Unsupported(&'static str),
	#[error("no binding configured for chain {0}")]
	UnknownChain(Chain),
	#[error("decoding chain response: {0}")]
	Decode(String),
}

/// A locked output on a source chain: a UTXO or an account-ledger entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedOutput {
	/// Amount held by the output, smallest unit
	pub amount: Amount,
	/// Commitment carried by the output's script / public key, compared
	/// against the gateway derivation
	pub script_hash: Hash,
}

/// A burn event logged by the host-chain gateway contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnEvent {
	pub burn_ref: BurnRef,
	/// Release recipient on the asset's native chain
	pub to: String,
	pub amount: Amount,
	pub block_number: BlockNumber,
}

/// The on-chain entity a transaction references; what the confirmer counts
/// confirmations of
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEntity {
	Utxo { txid: Hash, txindex: u32 },
	AccountEntry { txid: Hash },
	LogEvent { asset: Asset, burn_ref: BurnRef },
}

/// The entity referenced by a verified transaction
pub fn source_entity(tx: &Transaction) -> SourceEntity {
	match &tx.input {
		TxInput::LockMint(input) =>
			if tx.selector.source_chain().is_utxo_based() {
				SourceEntity::Utxo { txid: input.txid, txindex: input.txindex }
			} else {
				SourceEntity::AccountEntry { txid: input.txid }
			},
		TxInput::BurnRelease(input) =>
			SourceEntity::LogEvent { asset: tx.selector.asset, burn_ref: input.burn_ref },
	}
}

/// The capability set a chain binding must provide
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
	fn chain(&self) -> Chain;

	/// Fetch the output at `(txid, txindex)`; zero-confirmation view
	async fn lookup_utxo(&self, txid: &Hash, txindex: u32) -> Result<LockedOutput, Error>;

	/// Fetch the ledger entry written by `txid`; zero-confirmation view
	async fn lookup_account_entry(&self, txid: &Hash) -> Result<LockedOutput, Error>;

	/// Fetch the burn event with counter `burn_ref` for `asset`
	async fn lookup_log_event(&self, asset: Asset, burn_ref: BurnRef)
		-> Result<BurnEvent, Error>;

	/// Current confirmation count of `entity`; 0 while unconfirmed
	async fn confirmations(&self, entity: &SourceEntity) -> Result<u64, Error>;

	/// Current chain tip height
	async fn latest_block(&self) -> Result<BlockNumber, Error>;

	/// Burn events for `asset` in the inclusive block range `[from, to]`
	async fn burn_logs(
		&self,
		asset: Asset,
		from: BlockNumber,
		to: BlockNumber,
	) -> Result<Vec<BurnEvent>, Error>;

	/// The host-chain token contract minted for `asset`, if any
	fn token_for_asset(&self, asset: Asset) -> Option<EthAddress>;
}

/// Per-chain verification parameters from configuration
#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
	/// Blocks an entity must be buried under before the confirmer accepts it
	pub confirmation_threshold: u64,
	/// Smallest admissible transaction amount
	pub min_amount: Amount,
}

/// The configured chains and their verification parameters
#[derive(Clone, Default)]
pub struct ChainSet {
	clients: HashMap<Chain, Arc<dyn ChainClient>>,
	params: HashMap<Chain, ChainParams>,
}

impl ChainSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_chain(
		mut self,
		client: Arc<dyn ChainClient>,
		params: ChainParams,
	) -> Self {
		self.params.insert(client.chain(), params);
		self.clients.insert(client.chain(), client);
		self
	}

	pub fn client(&self, chain: Chain) -> Result<&Arc<dyn ChainClient>, Error> {
		self.clients.get(&chain).ok_or(Error::UnknownChain(chain))
	}

	pub fn params(&self, chain: Chain) -> Result<ChainParams, Error> {
		self.params.get(&chain).copied().ok_or(Error::UnknownChain(chain))
	}

	/// Minimum amount for a selector, read from its source chain
	pub fn min_amount(&self, selector: &Selector) -> Result<Amount, Error> {
		Ok(self.params(selector.source_chain())?.min_amount)
	}

	/// Confirmation threshold for a selector's source chain
	pub fn confirmation_threshold(&self, selector: &Selector) -> Result<u64, Error> {
		Ok(self.params(selector.source_chain())?.confirmation_threshold)
	}
}
