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

//! Method-level glue between the HTTP front door and the pipeline.
//!
//! Every RPC lands here: rate limit, typed decode, then the method's path —
//! reads go through the response cache to the dispatcher, `submitTx` goes
//! through compat translation, verification and persistence before being
//! forwarded, and the transaction queries consult local state first.
//!
//! Watchers inject synthesized submissions through the narrow
//! [`SubmitSink`] seam rather than depending on the resolver type.

use mintgate_cache::ResponseCache;
use mintgate_dispatch::{Dispatcher, Error as DispatchError};
use mintgate_primitives::{
	hash,
	jsonrpc::{
		Error as RpcError, Method, Request, Response, ERR_METHOD_NOT_FOUND, ERR_PEER_FORWARDING,
		ERR_RATE_LIMIT_EXCEEDED,
	},
	types::TxHash,
	QueryTxParams, QueryTxsParams, SubmitTxParams, Transaction, TxInput,
};
use mintgate_store::{Store, TxFilter};
use mintgate_verify::Verifier;
use serde_json::json;
use std::{net::IpAddr, sync::Arc};

pub mod compat;
mod limiter;

pub use limiter::{LimiterConfig, RateLimiter};

pub(crate) const LOG_TARGET: &str = "resolver";

/// The capability watchers use to inject synthesized submissions
#[async_trait::async_trait]
pub trait SubmitSink: Send + Sync {
	/// Verify and persist `params`; forwarding to the network is
	/// best-effort (the confirmer re-submits pending rows)
	async fn inject_submit(&self, params: SubmitTxParams) -> Result<TxHash, InjectError>;
}

#[derive(Debug, thiserror::Error)]
pub enum InjectError {
	#[error("rejected: {0}")]
	Rejected(String),
	#[error("internal: {0}")]
	Internal(String),
}

pub struct ResolverParams {
	pub cache: Arc<ResponseCache>,
	pub dispatcher: Arc<Dispatcher>,
	pub verifier: Arc<Verifier>,
	pub store: Arc<Store>,
	pub limiter: LimiterConfig,
	pub max_page_size: u64,
}

pub struct Resolver {
	cache: Arc<ResponseCache>,
	dispatcher: Arc<Dispatcher>,
	verifier: Arc<Verifier>,
	store: Arc<Store>,
	limiter: RateLimiter,
	max_page_size: u64,
}

impl Resolver {
	pub fn new(params: ResolverParams) -> Self {
		let ResolverParams { cache, dispatcher, verifier, store, limiter, max_page_size } =
			params;
		Self {
			cache,
			dispatcher,
			verifier,
			store,
			limiter: RateLimiter::new(limiter),
			max_page_size,
		}
	}

	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Resolve one request from `ip` into a response
	pub async fn handle(&self, ip: IpAddr, request: Request) -> Response {
		let id = request.id.clone();
		let Ok(method) = request.method.parse::<Method>() else {
			return Response::err(
				id,
				RpcError::new(
					ERR_METHOD_NOT_FOUND,
					format!("unknown method: {}", request.method),
				),
			)
		};
		if !self.limiter.allow(method, ip) {
			return Response::err(
				id,
				RpcError::new(ERR_RATE_LIMIT_EXCEEDED, "rate limit exceeded"),
			)
		}
		log::debug!(target: LOG_TARGET, "{} from {} (id {})", method, ip, id);

		match method {
			Method::SubmitTx => self.submit_tx(request).await,
			Method::QueryTx => self.query_tx(request).await,
			Method::QueryTxs => self.query_txs(request).await,
			_ => self.cached_query(method, request).await,
		}
	}

	/// Read path: response cache in front of the dispatcher
	async fn cached_query(&self, method: Method, request: Request) -> Response {
		let fingerprint = hash::request_fingerprint(method.as_str(), &request.params);
		let id = request.id.clone();
		let produced = self
			.cache
			.lookup_or_compute(fingerprint, || {
				let request = request.clone();
				async move {
					let fallback_id = request.id.clone();
					match self.dispatcher.try_dispatch(method, request).await {
						Ok(response) => response,
						Err(err) => Response::err(fallback_id, dispatch_error(err)),
					}
				}
			})
			.await;
		// the fingerprint ignores request ids; echo the caller's
		Response { id, ..produced }
	}

	async fn submit_tx(&self, request: Request) -> Response {
		let id = request.id.clone();
		let mut params = request.params.clone();
		if let Some(recovered) = compat::try_recover_submit(&params, &self.store) {
			log::debug!(target: LOG_TARGET, "reconstructed submission from gateway recovery");
			params = recovered;
		}
		let translation = compat::translate_submit(&mut params);

		let submit: SubmitTxParams = match serde_json::from_value(params) {
			Ok(submit) => submit,
			Err(err) =>
				return Response::err(
					id,
					RpcError::invalid_params(format!("malformed submitTx params: {err}")),
				),
		};

		let tx = match self.verifier.verify_submit(submit).await {
			Ok(tx) => tx,
			Err(err) if err.is_rejection() =>
				return Response::err(id, RpcError::invalid_params(err.to_string())),
			Err(err) => {
				log::error!(target: LOG_TARGET, "verifier storage failure: {}", err);
				return Response::err(id, RpcError::internal("storage failure"))
			},
		};

		let v0hash = self.record_legacy_hash(&translation, &tx);

		let forward = Request::new(
			id.clone(),
			Method::SubmitTx,
			serde_json::to_value(SubmitTxParams {
				selector: tx.selector,
				hash: Some(tx.hash),
				input: tx.input.clone(),
			})
			.unwrap_or_default(),
		);
		match self.dispatcher.try_dispatch(Method::SubmitTx, forward).await {
			Ok(response) if response.is_ok() => {},
			Ok(response) => {
				// the row is persisted; the confirmer keeps submitting it
				log::warn!(
					target: LOG_TARGET,
					"peer rejected forwarded submission {}: {:?}",
					tx.hash,
					response.error
				);
				return Response { id, ..response }
			},
			Err(err) => {
				log::warn!(
					target: LOG_TARGET,
					"forwarding submission {} failed: {}",
					tx.hash,
					err
				);
				return Response::err(id, dispatch_error(err))
			},
		}

		let mut result = json!({ "hash": tx.hash });
		if let Some(old) = v0hash {
			result["v0hash"] = json!(old);
		}
		Response::ok(id, result)
	}

	/// Record the old→new mapping for a translated legacy submission and
	/// return the old hash for the response downgrade
	fn record_legacy_hash(
		&self,
		translation: &compat::Translation,
		tx: &Transaction,
	) -> Option<TxHash> {
		if !translation.legacy {
			return None
		}
		let old_hash = translation.old_hash.or_else(|| {
			let gpubkey = translation.gpubkey.as_ref()?;
			let TxInput::LockMint(input) = &tx.input else { return None };
			Some(compat::legacy_lock_mint_tx_hash(
				&tx.selector.to_string(),
				&input.ghash?,
				&input.txid,
				input.txindex,
				gpubkey,
			))
		})?;
		if old_hash == tx.hash {
			return None
		}
		if let Err(err) = self.store.put_compat_mapping(&old_hash, &tx.hash) {
			log::warn!(target: LOG_TARGET, "recording compat mapping: {}", err);
		}
		Some(old_hash)
	}

	async fn query_tx(&self, request: Request) -> Response {
		let id = request.id.clone();
		let params: QueryTxParams = match serde_json::from_value(request.params.clone()) {
			Ok(params) => params,
			Err(err) =>
				return Response::err(
					id,
					RpcError::invalid_params(format!("malformed queryTx params: {err}")),
				),
		};

		match self.store.get_tx(&params.hash) {
			Ok(tx) => return Response::ok(id, json!({ "tx": tx })),
			Err(mintgate_store::Error::NotFound) => {},
			Err(err) => {
				log::error!(target: LOG_TARGET, "queryTx storage failure: {}", err);
				return Response::err(id, RpcError::internal("storage failure"))
			},
		}

		// a legacy hash resolves through the compat map once
		if let Ok(Some(new_hash)) = self.store.compat_new_hash(&params.hash) {
			if let Ok(tx) = self.store.get_tx(&new_hash) {
				return Response::ok(id, json!({ "tx": tx, "v0hash": params.hash }))
			}
		}

		// not ours; ask the network
		match self.dispatcher.try_dispatch(Method::QueryTx, request).await {
			Ok(response) => Response { id, ..response },
			Err(err) => Response::err(id, dispatch_error(err)),
		}
	}

	async fn query_txs(&self, request: Request) -> Response {
		let id = request.id.clone();
		let mut params_value = request.params.clone();
		if params_value.is_null() {
			params_value = json!({});
		}
		compat::translate_selector_filter(&mut params_value);
		let params: QueryTxsParams = match serde_json::from_value(params_value) {
			Ok(params) => params,
			Err(err) =>
				return Response::err(
					id,
					RpcError::invalid_params(format!("malformed queryTxs params: {err}")),
				),
		};

		let limit = params.limit.unwrap_or(self.max_page_size).min(self.max_page_size);
		let filter = TxFilter {
			status: params.status,
			selector: params.selector,
			offset: params.offset,
			limit,
		};
		match self.store.list_txs(&filter) {
			Ok(txs) => Response::ok(id, json!({ "txs": txs })),
			Err(err) => {
				log::error!(target: LOG_TARGET, "queryTxs storage failure: {}", err);
				Response::err(id, RpcError::internal("storage failure"))
			},
		}
	}
}

#[async_trait::async_trait]
impl SubmitSink for Resolver {
	async fn inject_submit(&self, params: SubmitTxParams) -> Result<TxHash, InjectError> {
		let tx = match self.verifier.verify_submit(params).await {
			Ok(tx) => tx,
			Err(err) if err.is_rejection() => return Err(InjectError::Rejected(err.to_string())),
			Err(err) => return Err(InjectError::Internal(err.to_string())),
		};

		// forwarding is best-effort here; pending rows are re-submitted by
		// the confirmer once thresholds are met
		let forward = Request::new(
			json!(0),
			Method::SubmitTx,
			serde_json::to_value(SubmitTxParams {
				selector: tx.selector,
				hash: Some(tx.hash),
				input: tx.input.clone(),
			})
			.unwrap_or_default(),
		);
		if let Err(err) = self.dispatcher.try_dispatch(Method::SubmitTx, forward).await {
			log::debug!(
				target: LOG_TARGET,
				"forwarding injected submission {} failed: {}",
				tx.hash,
				err
			);
		}
		Ok(tx.hash)
	}
}

fn dispatch_error(err: DispatchError) -> RpcError {
	match err {
		DispatchError::Overloaded => RpcError::internal("overloaded"),
		DispatchError::NoPeers =>
			RpcError::new(ERR_PEER_FORWARDING, "no backend peers available"),
		DispatchError::NoQuorum =>
			RpcError::new(ERR_PEER_FORWARDING, "unable to query the network"),
		DispatchError::AllPeersFailed(failures) => {
			let detail: Vec<_> = failures
				.iter()
				.map(|f| json!({ "peer": f.peer, "error": f.error }))
				.collect();
			RpcError::with_data(ERR_PEER_FORWARDING, "every peer failed", json!(detail))
		},
	}
}
