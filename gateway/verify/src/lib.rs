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

//! Validation of `submitTx` requests.
//!
//! The checks run in order: structural (whitelist, shape), hash derivation
//! equality, zero-confirmation source-chain lookup (amount minimum, gateway
//! match), then a mutex-guarded dedup insert. A transaction is admitted the
//! moment it appears on the source chain; the confirmer enforces the real
//! thresholds afterwards.

use mintgate_chains::{ChainSet, Error as ChainError};
use mintgate_primitives::{
	hash,
	types::{Amount, TxHash},
	Asset, LockMintInput, Selector, SubmitTxParams, Transaction, TxInput, TxStatus,
};
use mintgate_store::{GatewayRecovery, Store};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};

pub(crate) const LOG_TARGET: &str = "verify";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("selector not whitelisted: {0}")]
	SelectorNotWhitelisted(Selector),
	#[error("input shape does not match selector {0}")]
	WrongShape(Selector),
	#[error("forbidden field: {0}")]
	ForbiddenField(&'static str),
	#[error("{field} mismatch: expected {expected}, got {got}")]
	HashMismatch { field: &'static str, expected: TxHash, got: TxHash },
	#[error("amount {amount} below configured minimum {minimum}")]
	AmountBelowMinimum { amount: Amount, minimum: Amount },
	#[error("claimed amount {claimed} does not match on-chain amount {actual}")]
	AmountMismatch { claimed: Amount, actual: Amount },
	#[error("recipient does not match the burn event")]
	RecipientMismatch,
	#[error("output script does not match the derived gateway")]
	GatewayMismatch,
	#[error("no token configured for asset {0}")]
	MissingToken(Asset),
	#[error("chain lookup failed: {0}")]
	Chain(#[from] ChainError),
	#[error("store: {0}")]
	Store(#[from] mintgate_store::Error),
}

impl Error {
	/// Everything except store trouble is a permanent client-facing
	/// rejection (JSON-RPC invalid params)
	pub fn is_rejection(&self) -> bool {
		!matches!(self, Error::Store(_))
	}
}

pub struct Verifier {
	whitelist: HashSet<Selector>,
	chains: ChainSet,
	store: Arc<Store>,
	dist_pubkey: Vec<u8>,
	/// Serialises the dedup read-modify-write between concurrent
	/// submissions of the same transaction
	dedup: Mutex<()>,
}

impl Verifier {
	pub fn new(
		whitelist: HashSet<Selector>,
		chains: ChainSet,
		store: Arc<Store>,
		dist_pubkey: Vec<u8>,
	) -> Self {
		Self { whitelist, chains, store, dist_pubkey, dedup: Mutex::new(()) }
	}

	/// Validate `params` and persist the resulting transaction. Submitting
	/// the same input twice returns the stored transaction unchanged.
	pub async fn verify_submit(&self, params: SubmitTxParams) -> Result<Transaction, Error> {
		let selector = params.selector;
		if !self.whitelist.contains(&selector) {
			return Err(Error::SelectorNotWhitelisted(selector))
		}

		match (&params.input, selector.is_lock_mint()) {
			(TxInput::LockMint(input), true) =>
				self.verify_lock_mint(params.hash, selector, input.clone()).await,
			(TxInput::BurnRelease(input), false) =>
				self.verify_burn_release(params.hash, selector, input.clone()).await,
			_ => Err(Error::WrongShape(selector)),
		}
	}

	async fn verify_lock_mint(
		&self,
		claimed_hash: Option<TxHash>,
		selector: Selector,
		mut input: LockMintInput,
	) -> Result<Transaction, Error> {
		if input.gpubkey.is_some() {
			return Err(Error::ForbiddenField("gpubkey"))
		}

		// derive and check the hash chain: phash is client-supplied, the
		// rest is a pure function of the input
		let host = self.chains.client(selector.host_chain)?;
		let token = host
			.token_for_asset(selector.asset)
			.ok_or(Error::MissingToken(selector.asset))?;
		let ghash = hash::ghash(&input.phash, token, input.to, &input.nonce);
		let nhash = hash::nhash(&input.nonce, &input.txid, input.txindex);
		check_or_fill("ghash", &mut input.ghash, ghash)?;
		check_or_fill("nhash", &mut input.nhash, nhash)?;

		let selector_name = selector.to_string();
		let tx_hash =
			hash::lock_mint_tx_hash(&selector_name, &ghash, &input.txid, input.txindex);
		if let Some(claimed) = claimed_hash {
			if claimed != tx_hash {
				return Err(Error::HashMismatch {
					field: "hash",
					expected: tx_hash,
					got: claimed,
				})
			}
		}

		// zero-confirmation source lookup
		let source = self.chains.client(selector.source_chain())?;
		let output = if selector.source_chain().is_utxo_based() {
			source.lookup_utxo(&input.txid, input.txindex).await?
		} else {
			source.lookup_account_entry(&input.txid).await?
		};
		let minimum = self.chains.min_amount(&selector)?;
		if output.amount < minimum {
			return Err(Error::AmountBelowMinimum { amount: output.amount, minimum })
		}
		if output.amount != input.amount {
			return Err(Error::AmountMismatch { claimed: input.amount, actual: output.amount })
		}
		let gateway = hash::gateway_script_hash(&self.dist_pubkey, &ghash);
		if output.script_hash != gateway {
			return Err(Error::GatewayMismatch)
		}

		let recovery = GatewayRecovery {
			gateway_address: gateway,
			selector,
			payload: input.payload.clone(),
			phash: input.phash,
			nonce: input.nonce,
			nhash,
			to: input.to,
		};
		let tx = Transaction {
			hash: tx_hash,
			selector,
			input: TxInput::LockMint(input),
			status: TxStatus::Confirming,
		};
		self.dedup_insert(tx, Some(recovery))
	}

	async fn verify_burn_release(
		&self,
		claimed_hash: Option<TxHash>,
		selector: Selector,
		input: mintgate_primitives::BurnReleaseInput,
	) -> Result<Transaction, Error> {
		let selector_name = selector.to_string();
		let tx_hash = hash::burn_release_tx_hash(&selector_name, input.burn_ref);
		if let Some(claimed) = claimed_hash {
			if claimed != tx_hash {
				return Err(Error::HashMismatch {
					field: "hash",
					expected: tx_hash,
					got: claimed,
				})
			}
		}

		// the burn event on the host chain is authoritative for recipient
		// and amount
		let source = self.chains.client(selector.source_chain())?;
		let event = source.lookup_log_event(selector.asset, input.burn_ref).await?;
		let minimum = self.chains.min_amount(&selector)?;
		if event.amount < minimum {
			return Err(Error::AmountBelowMinimum { amount: event.amount, minimum })
		}
		if event.amount != input.amount {
			return Err(Error::AmountMismatch { claimed: input.amount, actual: event.amount })
		}
		if event.to != input.to {
			return Err(Error::RecipientMismatch)
		}

		let tx = Transaction {
			hash: tx_hash,
			selector,
			input: TxInput::BurnRelease(input),
			status: TxStatus::Confirming,
		};
		self.dedup_insert(tx, None)
	}

	/// Look up by derived hash and insert when absent, under the dedup
	/// mutex. Present rows win: the stored transaction is returned
	/// unchanged.
	fn dedup_insert(
		&self,
		tx: Transaction,
		recovery: Option<GatewayRecovery>,
	) -> Result<Transaction, Error> {
		let _guard = self.dedup.lock();
		match self.store.get_tx(&tx.hash) {
			Ok(existing) => {
				log::debug!(
					target: LOG_TARGET,
					"duplicate submission for {}, returning stored row",
					tx.hash
				);
				Ok(existing)
			},
			Err(mintgate_store::Error::NotFound) => {
				let gateway_address = recovery.as_ref().map(|r| r.gateway_address);
				self.store.insert_tx(&tx, gateway_address.as_ref())?;
				if let Some(recovery) = recovery {
					self.store.put_gateway_recovery(&recovery)?;
				}
				log::info!(
					target: LOG_TARGET,
					"admitted {} ({}) at zero confirmations",
					tx.hash,
					tx.selector
				);
				Ok(tx)
			},
			Err(err) => Err(err.into()),
		}
	}
}

fn check_or_fill(
	field: &'static str,
	slot: &mut Option<TxHash>,
	derived: TxHash,
) -> Result<(), Error> {
	match slot {
		Some(got) if *got != derived =>
			Err(Error::HashMismatch { field, expected: derived, got: *got }),
		_ => {
			*slot = Some(derived);
			Ok(())
		},
	}
}
