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

//! Background observation of pending transactions.
//!
//! Every poll interval the confirmer re-checks all `confirming` rows
//! against their source chains. Rows whose entity has reached the
//! chain-specific threshold are re-submitted to the backend and promoted to
//! `confirmed` (or `done` when the backend reports the transaction as
//! already executed). An hourly prune removes rows past the retention
//! window. Errors never surface to clients; rows simply stay where they
//! are until the next round.

use futures::StreamExt;
use mintgate_chains::{source_entity, ChainSet, Error as ChainError};
use mintgate_dispatch::{Dispatcher, Error as DispatchError};
use mintgate_primitives::{
	jsonrpc::{Error as RpcError, Method, Request},
	SubmitTxParams, Transaction, TxStatus,
};
use mintgate_store::Store;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

pub(crate) const LOG_TARGET: &str = "confirmer";

/// Parallel chain lookups per round
const CHECKS_PER_ROUND: usize = 8;
/// Cadence of the retention prune
const PRUNE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct ConfirmerParams {
	pub store: Arc<Store>,
	pub chains: ChainSet,
	pub dispatcher: Arc<Dispatcher>,
	pub poll_interval: Duration,
	/// Rows older than this are pruned
	pub expiry: Duration,
	pub shutdown: CancellationToken,
}

pub struct Confirmer {
	store: Arc<Store>,
	chains: ChainSet,
	dispatcher: Arc<Dispatcher>,
	poll_interval: Duration,
	expiry: Duration,
	shutdown: CancellationToken,
}

impl Confirmer {
	pub fn new(params: ConfirmerParams) -> Self {
		let ConfirmerParams { store, chains, dispatcher, poll_interval, expiry, shutdown } =
			params;
		Self { store, chains, dispatcher, poll_interval, expiry, shutdown }
	}

	pub async fn run(self) {
		log::debug!(
			target: LOG_TARGET,
			"confirmer started, poll interval {:?}",
			self.poll_interval
		);
		let mut prune = tokio::time::interval(PRUNE_INTERVAL);
		// the first tick fires immediately; skip it so start-up does not prune
		prune.tick().await;
		loop {
			tokio::select! {
				_ = tokio::time::sleep(self.poll_interval) => self.check_round().await,
				_ = prune.tick() => self.prune(),
				_ = self.shutdown.cancelled() => {
					log::debug!(target: LOG_TARGET, "confirmer stopped");
					return
				},
			}
		}
	}

	/// One check round over every `confirming` row, in parallel
	pub async fn check_round(&self) {
		let pending = match self.store.txs_with_status(TxStatus::Confirming) {
			Ok(pending) => pending,
			Err(err) => {
				log::error!(target: LOG_TARGET, "reading pending rows: {}", err);
				return
			},
		};
		if pending.is_empty() {
			return
		}
		log::trace!(target: LOG_TARGET, "checking {} pending transactions", pending.len());
		futures::stream::iter(pending)
			.for_each_concurrent(CHECKS_PER_ROUND, |tx| self.check_one(tx))
			.await;
	}

	async fn check_one(&self, tx: Transaction) {
		let entity = source_entity(&tx);
		let chain = tx.selector.source_chain();
		let (client, threshold) = match (
			self.chains.client(chain),
			self.chains.confirmation_threshold(&tx.selector),
		) {
			(Ok(client), Ok(threshold)) => (client, threshold),
			_ => {
				log::error!(
					target: LOG_TARGET,
					"no binding for {} referenced by {}",
					chain,
					tx.hash
				);
				return
			},
		};

		let confirmations = match client.confirmations(&entity).await {
			Ok(confirmations) => confirmations,
			Err(ChainError::NotFound) => {
				// the referenced entity vanished from the source chain
				log::warn!(target: LOG_TARGET, "source entity for {} is gone, reverting", tx.hash);
				if let Err(err) = self.store.update_status(&tx.hash, TxStatus::Reverted) {
					log::error!(target: LOG_TARGET, "reverting {}: {}", tx.hash, err);
				}
				return
			},
			Err(err) => {
				log::debug!(target: LOG_TARGET, "confirmations for {}: {}", tx.hash, err);
				return
			},
		};
		if confirmations < threshold {
			log::trace!(
				target: LOG_TARGET,
				"{} at {}/{} confirmations",
				tx.hash,
				confirmations,
				threshold
			);
			return
		}

		let request = Request::new(
			json!(0),
			Method::SubmitTx,
			serde_json::to_value(SubmitTxParams {
				selector: tx.selector,
				hash: Some(tx.hash),
				input: tx.input.clone(),
			})
			.unwrap_or_default(),
		);
		match self.dispatcher.try_dispatch(Method::SubmitTx, request).await {
			Ok(response) if response.is_ok() => {
				log::info!(
					target: LOG_TARGET,
					"{} confirmed at {} confirmations",
					tx.hash,
					confirmations
				);
				if let Err(err) = self.store.update_status(&tx.hash, TxStatus::Confirmed) {
					log::error!(target: LOG_TARGET, "promoting {}: {}", tx.hash, err);
				}
			},
			Ok(response) =>
				if response.error.as_ref().is_some_and(is_already_done) {
					log::info!(target: LOG_TARGET, "{} already executed by the backend", tx.hash);
					if let Err(err) = self.store.update_status(&tx.hash, TxStatus::Done) {
						log::error!(target: LOG_TARGET, "completing {}: {}", tx.hash, err);
					}
				} else {
					log::debug!(
						target: LOG_TARGET,
						"backend rejected {}: {:?}, leaving pending",
						tx.hash,
						response.error
					);
				},
			Err(DispatchError::Overloaded) => {
				// back-pressure: skip this round rather than block
				log::debug!(target: LOG_TARGET, "dispatch queue full, skipping {}", tx.hash);
			},
			Err(err) => {
				log::debug!(target: LOG_TARGET, "submitting {}: {}, leaving pending", tx.hash, err);
			},
		}
	}

	/// Remove rows past the retention window
	pub fn prune(&self) {
		match self.store.prune_txs_older_than(self.expiry.as_secs()) {
			Ok(removed) if removed > 0 =>
				log::info!(target: LOG_TARGET, "pruned {} expired transactions", removed),
			Ok(_) => {},
			Err(err) => log::error!(target: LOG_TARGET, "pruning: {}", err),
		}
	}
}

/// The backend's duplicate-submission signal
fn is_already_done(error: &RpcError) -> bool {
	error.message.to_lowercase().contains("already done")
}
