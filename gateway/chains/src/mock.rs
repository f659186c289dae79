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

//! A programmable in-memory chain for tests

use crate::{BurnEvent, ChainClient, Error, LockedOutput, SourceEntity};
use mintgate_primitives::{
	types::{BlockNumber, BurnRef, EthAddress, Hash},
	Asset, Chain,
};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct State {
	utxos: HashMap<(Hash, u32), LockedOutput>,
	account_entries: HashMap<Hash, LockedOutput>,
	events: HashMap<(Asset, BurnRef), BurnEvent>,
	confirmations: HashMap<String, u64>,
	tokens: HashMap<Asset, EthAddress>,
	latest_block: BlockNumber,
	fail_next: Option<String>,
}

pub struct MockChain {
	chain: Chain,
	state: Mutex<State>,
}

fn entity_key(entity: &SourceEntity) -> String {
	format!("{entity:?}")
}

impl MockChain {
	pub fn new(chain: Chain) -> Self {
		Self { chain, state: Mutex::new(State::default()) }
	}

	pub fn set_utxo(&self, txid: Hash, txindex: u32, output: LockedOutput) {
		self.state.lock().utxos.insert((txid, txindex), output);
	}

	pub fn set_account_entry(&self, txid: Hash, output: LockedOutput) {
		self.state.lock().account_entries.insert(txid, output);
	}

	pub fn push_burn_event(&self, asset: Asset, event: BurnEvent) {
		let mut state = self.state.lock();
		state.latest_block = state.latest_block.max(event.block_number);
		state.events.insert((asset, event.burn_ref), event);
	}

	pub fn set_confirmations(&self, entity: &SourceEntity, confirmations: u64) {
		self.state.lock().confirmations.insert(entity_key(entity), confirmations);
	}

	pub fn set_latest_block(&self, block: BlockNumber) {
		self.state.lock().latest_block = block;
	}

	pub fn set_token(&self, asset: Asset, token: EthAddress) {
		self.state.lock().tokens.insert(asset, token);
	}

	/// Make the next chain call fail with `message`
	pub fn fail_next(&self, message: impl Into<String>) {
		self.state.lock().fail_next = Some(message.into());
	}

	fn check_fail(&self) -> Result<(), Error> {
		if let Some(message) = self.state.lock().fail_next.take() {
			return Err(Error::Rpc { code: -1, message })
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
	fn chain(&self) -> Chain {
		self.chain
	}

	async fn lookup_utxo(&self, txid: &Hash, txindex: u32) -> Result<LockedOutput, Error> {
		self.check_fail()?;
		self.state.lock().utxos.get(&(*txid, txindex)).cloned().ok_or(Error::NotFound)
	}

	async fn lookup_account_entry(&self, txid: &Hash) -> Result<LockedOutput, Error> {
		self.check_fail()?;
		self.state.lock().account_entries.get(txid).cloned().ok_or(Error::NotFound)
	}

	async fn lookup_log_event(
		&self,
		asset: Asset,
		burn_ref: BurnRef,
	) -> Result<BurnEvent, Error> {
		self.check_fail()?;
		self.state.lock().events.get(&(asset, burn_ref)).cloned().ok_or(Error::NotFound)
	}

	async fn confirmations(&self, entity: &SourceEntity) -> Result<u64, Error> {
		self.check_fail()?;
		Ok(self.state.lock().confirmations.get(&entity_key(entity)).copied().unwrap_or(0))
	}

	async fn latest_block(&self) -> Result<BlockNumber, Error> {
		self.check_fail()?;
		Ok(self.state.lock().latest_block)
	}

	async fn burn_logs(
		&self,
		asset: Asset,
		from: BlockNumber,
		to: BlockNumber,
	) -> Result<Vec<BurnEvent>, Error> {
		self.check_fail()?;
		let state = self.state.lock();
		let mut logs: Vec<BurnEvent> = state
			.events
			.iter()
			.filter(|((a, _), event)| {
				*a == asset && event.block_number >= from && event.block_number <= to
			})
			.map(|(_, event)| event.clone())
			.collect();
		logs.sort_by_key(|event| (event.block_number, event.burn_ref));
		Ok(logs)
	}

	fn token_for_asset(&self, asset: Asset) -> Option<EthAddress> {
		self.state.lock().tokens.get(&asset).copied()
	}
}
