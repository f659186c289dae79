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

//! Watches a host chain's gateway contract for burn events and lifts them
//! into the backend as synthesized burn/release submissions.
//!
//! One watcher runs per (chain, asset). Each round reads the persistent
//! checkpoint `H`, queries logs in `(H, min(tip − confidence, H +
//! max_advance)]` and injects one submission per log through the resolver's
//! [`SubmitSink`] seam. The checkpoint advances past a log only when its
//! submission succeeded, so a failed log is replayed next round; the
//! verifier's hash dedup makes the replay harmless.

use mintgate_chains::ChainSet;
use mintgate_primitives::{
	types::BlockNumber, Asset, BurnReleaseInput, Chain, Direction, Selector, SubmitTxParams,
	TxInput,
};
use mintgate_resolver::SubmitSink;
use mintgate_store::Store;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

pub(crate) const LOG_TARGET: &str = "watcher";

pub struct WatcherParams<S> {
	/// The host chain whose gateway contract is observed
	pub chain: Chain,
	pub asset: Asset,
	pub chains: ChainSet,
	pub store: Arc<Store>,
	pub sink: Arc<S>,
	pub poll_rate: Duration,
	/// Cap on blocks processed per round
	pub max_block_advance: u64,
	/// Blocks a log must be buried under before it is lifted
	pub confidence_interval: u64,
	pub shutdown: CancellationToken,
}

pub struct Watcher<S> {
	chain: Chain,
	asset: Asset,
	selector: Selector,
	chains: ChainSet,
	store: Arc<Store>,
	sink: Arc<S>,
	poll_rate: Duration,
	max_block_advance: u64,
	confidence_interval: u64,
	shutdown: CancellationToken,
}

impl<S: SubmitSink> Watcher<S> {
	pub fn new(params: WatcherParams<S>) -> Self {
		let WatcherParams {
			chain,
			asset,
			chains,
			store,
			sink,
			poll_rate,
			max_block_advance,
			confidence_interval,
			shutdown,
		} = params;
		let selector = Selector::new(asset, chain, Direction::From);
		Self {
			chain,
			asset,
			selector,
			chains,
			store,
			sink,
			poll_rate,
			max_block_advance,
			confidence_interval,
			shutdown,
		}
	}

	pub async fn run(self) {
		log::debug!(
			target: LOG_TARGET,
			"watcher for {} started at checkpoint {}",
			self.selector,
			self.checkpoint()
		);
		loop {
			tokio::select! {
				_ = tokio::time::sleep(self.poll_rate) => self.round().await,
				_ = self.shutdown.cancelled() => {
					log::debug!(target: LOG_TARGET, "watcher for {} stopped", self.selector);
					return
				},
			}
		}
	}

	fn checkpoint_key(&self) -> String {
		format!("watcher/checkpoint/{}/{}", self.chain, self.asset)
	}

	/// Highest block fully processed; 0 before the first round
	pub fn checkpoint(&self) -> BlockNumber {
		match self.store.kv_get(&self.checkpoint_key()) {
			Ok(Some(raw)) => raw.parse().unwrap_or(0),
			Ok(None) => 0,
			Err(err) => {
				log::error!(target: LOG_TARGET, "reading checkpoint: {}", err);
				0
			},
		}
	}

	/// Monotonic advance; lower values are ignored
	fn advance_checkpoint(&self, height: BlockNumber) {
		if height <= self.checkpoint() {
			return
		}
		if let Err(err) = self.store.kv_put(&self.checkpoint_key(), &height.to_string()) {
			log::error!(target: LOG_TARGET, "writing checkpoint: {}", err);
		}
	}

	/// One polling round. On any failure the checkpoint stays at the last
	/// fully-processed block so the next round replays.
	pub async fn round(&self) {
		let from = self.checkpoint();
		let client = match self.chains.client(self.chain) {
			Ok(client) => client,
			Err(err) => {
				log::error!(target: LOG_TARGET, "{}", err);
				return
			},
		};
		let tip = match client.latest_block().await {
			Ok(tip) => tip,
			Err(err) => {
				log::debug!(target: LOG_TARGET, "reading {} tip: {}", self.chain, err);
				return
			},
		};

		let safe_tip = tip.saturating_sub(self.confidence_interval);
		let to = safe_tip.min(from.saturating_add(self.max_block_advance));
		if to <= from {
			return
		}

		let logs = match client.burn_logs(self.asset, from + 1, to).await {
			Ok(logs) => logs,
			Err(err) => {
				log::debug!(target: LOG_TARGET, "reading {} burn logs: {}", self.selector, err);
				return
			},
		};
		log::trace!(
			target: LOG_TARGET,
			"{} blocks ({}, {}]: {} burn logs",
			self.selector,
			from,
			to,
			logs.len()
		);

		for event in logs {
			let params = SubmitTxParams {
				selector: self.selector,
				hash: None,
				input: TxInput::BurnRelease(BurnReleaseInput {
					burn_ref: event.burn_ref,
					to: event.to.clone(),
					amount: event.amount,
					nonce: None,
				}),
			};
			match self.sink.inject_submit(params).await {
				Ok(hash) => {
					log::info!(
						target: LOG_TARGET,
						"lifted burn #{} on {} into {}",
						event.burn_ref,
						self.selector,
						hash
					);
					self.advance_checkpoint(event.block_number);
				},
				Err(err) => {
					// replay from here next round
					log::warn!(
						target: LOG_TARGET,
						"submitting burn #{} on {} failed: {}, will replay",
						event.burn_ref,
						self.selector,
						err
					);
					return
				},
			}
		}
		// the tail of the range held no events; it is still processed
		self.advance_checkpoint(to);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mintgate_chains::{mock::MockChain, BurnEvent, ChainParams};
	use mintgate_primitives::types::{BurnRef, TxHash};
	use mintgate_resolver::InjectError;
	use parking_lot::Mutex;
	use std::collections::HashSet;

	#[derive(Default)]
	struct RecordingSink {
		seen: Mutex<Vec<BurnRef>>,
		failing: Mutex<HashSet<BurnRef>>,
	}

	impl RecordingSink {
		fn fail_on(&self, burn_ref: BurnRef) {
			self.failing.lock().insert(burn_ref);
		}

		fn clear_failures(&self) {
			self.failing.lock().clear();
		}

		fn seen(&self) -> Vec<BurnRef> {
			self.seen.lock().clone()
		}
	}

	#[async_trait::async_trait]
	impl SubmitSink for RecordingSink {
		async fn inject_submit(&self, params: SubmitTxParams) -> Result<TxHash, InjectError> {
			let TxInput::BurnRelease(input) = params.input else {
				return Err(InjectError::Rejected("wrong shape".into()))
			};
			self.seen.lock().push(input.burn_ref);
			if self.failing.lock().contains(&input.burn_ref) {
				return Err(InjectError::Rejected("verifier said no".into()))
			}
			Ok(TxHash::repeat_byte(input.burn_ref as u8))
		}
	}

	struct Fixture {
		watcher: Watcher<RecordingSink>,
		ethereum: Arc<MockChain>,
		sink: Arc<RecordingSink>,
	}

	fn fixture(max_advance: u64, confidence: u64) -> Fixture {
		let ethereum = Arc::new(MockChain::new(Chain::Ethereum));
		let chains = ChainSet::new().with_chain(
			ethereum.clone(),
			ChainParams { confirmation_threshold: 30, min_amount: 1 },
		);
		let sink = Arc::new(RecordingSink::default());
		let watcher = Watcher::new(WatcherParams {
			chain: Chain::Ethereum,
			asset: Asset::Btc,
			chains,
			store: Arc::new(Store::open_in_memory().unwrap()),
			sink: sink.clone(),
			poll_rate: Duration::from_millis(10),
			max_block_advance: max_advance,
			confidence_interval: confidence,
			shutdown: CancellationToken::new(),
		});
		Fixture { watcher, ethereum, sink }
	}

	fn burn(burn_ref: BurnRef, block: u64) -> BurnEvent {
		BurnEvent { burn_ref, to: "miKLp9BKYVy6S4Tz".into(), amount: 50_000, block_number: block }
	}

	#[tokio::test]
	async fn lifts_buried_logs_and_advances() {
		let fx = fixture(1000, 10);
		fx.ethereum.push_burn_event(Asset::Btc, burn(1, 100));
		fx.ethereum.push_burn_event(Asset::Btc, burn(2, 101));
		fx.ethereum.set_latest_block(200);

		fx.watcher.round().await;
		assert_eq!(fx.sink.seen(), vec![1, 2]);
		// advanced to the confidence-capped tip
		assert_eq!(fx.watcher.checkpoint(), 190);
	}

	#[tokio::test]
	async fn failed_submission_replays_next_round() {
		let fx = fixture(1000, 0);
		fx.ethereum.push_burn_event(Asset::Btc, burn(1, 100));
		fx.ethereum.push_burn_event(Asset::Btc, burn(2, 101));
		fx.sink.fail_on(2);

		fx.watcher.round().await;
		assert_eq!(fx.sink.seen(), vec![1, 2]);
		// L1 processed, L2 failed: checkpoint parks at 100
		assert_eq!(fx.watcher.checkpoint(), 100);

		fx.sink.clear_failures();
		fx.watcher.round().await;
		// only L2 is replayed
		assert_eq!(fx.sink.seen(), vec![1, 2, 2]);
		assert_eq!(fx.watcher.checkpoint(), 101);
	}

	#[tokio::test]
	async fn confidence_interval_delays_fresh_logs() {
		let fx = fixture(1000, 10);
		fx.ethereum.push_burn_event(Asset::Btc, burn(1, 195));
		fx.ethereum.set_latest_block(200);

		fx.watcher.round().await;
		assert!(fx.sink.seen().is_empty());
		assert_eq!(fx.watcher.checkpoint(), 190);

		// once buried, the log is lifted
		fx.ethereum.set_latest_block(210);
		fx.watcher.round().await;
		assert_eq!(fx.sink.seen(), vec![1]);
	}

	#[tokio::test]
	async fn advance_is_capped_per_round() {
		let fx = fixture(50, 0);
		fx.ethereum.set_latest_block(1000);

		fx.watcher.round().await;
		assert_eq!(fx.watcher.checkpoint(), 50);
		fx.watcher.round().await;
		assert_eq!(fx.watcher.checkpoint(), 100);
	}

	#[tokio::test]
	async fn chain_errors_do_not_advance() {
		let fx = fixture(1000, 0);
		fx.ethereum.push_burn_event(Asset::Btc, burn(1, 100));
		fx.ethereum.fail_next("rpc node down");

		fx.watcher.round().await;
		assert!(fx.sink.seen().is_empty());
		assert_eq!(fx.watcher.checkpoint(), 0);
	}

	#[tokio::test]
	async fn checkpoint_never_decreases() {
		let fx = fixture(1000, 0);
		fx.ethereum.set_latest_block(500);
		fx.watcher.round().await;
		assert_eq!(fx.watcher.checkpoint(), 500);

		// a lagging tip must not move the checkpoint backwards
		fx.ethereum.set_latest_block(300);
		fx.watcher.round().await;
		assert_eq!(fx.watcher.checkpoint(), 500);
	}
}
