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

//! Fans a request out to a method-specific peer set and folds the replies
//! with a method-specific aggregation iterator.
//!
//! `submitTx` goes to the first peer and takes the first success; network
//! state queries go to three random peers and take the structural majority.
//! Replies funnel through a bounded channel in arrival order; once the
//! iterator returns, remaining sends are aborted.

use mintgate_peers::PeerStore;
use mintgate_primitives::{
	jsonrpc::{Method, Request, Response},
	types::PeerId,
};
use std::sync::Arc;
use tokio::{
	sync::{mpsc, Semaphore, TryAcquireError},
	task::JoinSet,
};

mod aggregate;

pub use aggregate::majority_threshold;

pub(crate) const LOG_TARGET: &str = "dispatch";

/// A failed reply, kept for the aggregated error report
#[derive(Debug, Clone, PartialEq)]
pub struct PeerError {
	pub peer: PeerId,
	pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("no peers available")]
	NoPeers,
	#[error("every peer failed: {}", format_peer_errors(.0))]
	AllPeersFailed(Vec<PeerError>),
	#[error("unable to query the network")]
	NoQuorum,
	#[error("dispatcher overloaded")]
	Overloaded,
}

fn format_peer_errors(errors: &[PeerError]) -> String {
	errors
		.iter()
		.map(|e| format!("{}: {}", e.peer, e.error))
		.collect::<Vec<_>>()
		.join("; ")
}

/// How many peers a method fans out to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerPolicy {
	First,
	Random(usize),
}

/// How replies are folded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregation {
	FirstSuccess,
	Majority,
}

fn peer_policy(method: Method) -> PeerPolicy {
	match method {
		Method::SubmitTx => PeerPolicy::First,
		_ => PeerPolicy::Random(3),
	}
}

fn aggregation(method: Method) -> Aggregation {
	match method {
		// network-wide state converges across peers; take the majority view
		Method::QueryBlock |
		Method::QueryBlocks |
		Method::QueryEpoch |
		Method::QueryConfig |
		Method::QueryState |
		Method::QueryBlockState |
		Method::QueryFees |
		Method::QueryShards => Aggregation::Majority,
		// per-peer answers (peer lists, stats) and submissions take the
		// first success
		_ => Aggregation::FirstSuccess,
	}
}

pub struct Dispatcher {
	peers: Arc<PeerStore>,
	client: mintgate_http::Client,
	/// Reply-channel capacity per dispatch
	cap: usize,
	/// Bounds concurrent dispatches; `try_dispatch` fails immediately when
	/// exhausted
	permits: Arc<Semaphore>,
}

impl Dispatcher {
	pub fn new(
		peers: Arc<PeerStore>,
		client: mintgate_http::Client,
		cap: usize,
		max_in_flight: usize,
	) -> Self {
		Self { peers, client, cap, permits: Arc::new(Semaphore::new(max_in_flight)) }
	}

	/// Dispatch, waiting for an in-flight slot
	pub async fn dispatch(&self, method: Method, request: Request) -> Result<Response, Error> {
		let _permit =
			self.permits.acquire().await.map_err(|_| Error::Overloaded)?;
		self.dispatch_inner(method, request).await
	}

	/// Dispatch, failing immediately when the in-flight queue is full.
	/// Back-pressure is a first-class response; the caller retries later.
	pub async fn try_dispatch(
		&self,
		method: Method,
		request: Request,
	) -> Result<Response, Error> {
		let _permit = match self.permits.try_acquire() {
			Ok(permit) => permit,
			Err(TryAcquireError::NoPermits) => return Err(Error::Overloaded),
			Err(TryAcquireError::Closed) => return Err(Error::Overloaded),
		};
		self.dispatch_inner(method, request).await
	}

	async fn dispatch_inner(&self, method: Method, request: Request) -> Result<Response, Error> {
		let peers = match peer_policy(method) {
			PeerPolicy::First => vec![self.peers.first().map_err(|_| Error::NoPeers)?],
			PeerPolicy::Random(n) => self.peers.random(n),
		};
		if peers.is_empty() {
			return Err(Error::NoPeers)
		}
		let fanout = peers.len();
		log::trace!(target: LOG_TARGET, "dispatching {} to {} peers", method, fanout);

		let (tx, rx) = mpsc::channel(self.cap.max(fanout));
		let mut sends = JoinSet::new();
		for peer in peers {
			let client = self.client.clone();
			let request = request.clone();
			let tx = tx.clone();
			sends.spawn(async move {
				let result = client.send(&peer.network_address, &request).await;
				// receiver dropping means the iterator already returned
				let _ = tx.send((peer.id, result)).await;
			});
		}
		drop(tx);

		let outcome = match aggregation(method) {
			Aggregation::FirstSuccess => aggregate::first_success(rx).await,
			Aggregation::Majority => aggregate::majority(rx, fanout).await,
		};
		// cancel stragglers
		sends.abort_all();
		outcome
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{routing::post, Json, Router};
	use mintgate_peers::Peer;
	use serde_json::{json, Value};
	use std::time::Duration;

	async fn spawn_backend(result: Value, delay: Duration) -> String {
		let app = Router::new().route(
			"/",
			post(move |Json(request): Json<Value>| {
				let result = result.clone();
				async move {
					tokio::time::sleep(delay).await;
					Json(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}))
				}
			}),
		);
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
		format!("http://{addr}/")
	}

	fn peer(id: &str, address: String) -> Peer {
		Peer { id: id.into(), network_address: address, signature: vec![], nonce: 0 }
	}

	fn dispatcher(store: Arc<PeerStore>) -> Dispatcher {
		Dispatcher::new(
			store,
			mintgate_http::Client::new(Duration::from_millis(500)).unwrap(),
			8,
			4,
		)
	}

	#[tokio::test]
	async fn submit_goes_to_first_peer_only() {
		let fast = spawn_backend(json!("first"), Duration::ZERO).await;
		let store = Arc::new(PeerStore::new());
		store.insert(peer("a", fast));
		// unreachable second peer would fail the dispatch if selected
		store.insert(peer("b", "http://127.0.0.1:9/".into()));

		let dispatcher = dispatcher(store);
		let request = Request::new(json!(1), Method::SubmitTx, json!({}));
		let response = dispatcher.dispatch(Method::SubmitTx, request).await.unwrap();
		assert_eq!(response.result, Some(json!("first")));
	}

	#[tokio::test]
	async fn first_success_skips_failing_peers() {
		let good = spawn_backend(json!("ok"), Duration::from_millis(50)).await;
		let store = Arc::new(PeerStore::new());
		store.insert(peer("dead1", "http://127.0.0.1:9/".into()));
		store.insert(peer("dead2", "http://127.0.0.1:9/".into()));
		store.insert(peer("live", good));

		let dispatcher = dispatcher(store);
		let request = Request::new(json!(1), Method::QueryPeers, json!({}));
		let response = dispatcher.dispatch(Method::QueryPeers, request).await.unwrap();
		assert_eq!(response.result, Some(json!("ok")));
	}

	#[tokio::test]
	async fn all_failures_aggregate_per_peer_detail() {
		let store = Arc::new(PeerStore::new());
		store.insert(peer("dead1", "http://127.0.0.1:9/".into()));
		store.insert(peer("dead2", "http://127.0.0.1:9/".into()));
		store.insert(peer("dead3", "http://127.0.0.1:9/".into()));

		let dispatcher = dispatcher(store);
		let request = Request::new(json!(1), Method::QueryPeers, json!({}));
		match dispatcher.dispatch(Method::QueryPeers, request).await {
			Err(Error::AllPeersFailed(errors)) => assert_eq!(errors.len(), 3),
			other => panic!("expected aggregated failure, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn majority_agrees_across_random_peers() {
		let store = Arc::new(PeerStore::new());
		for i in 0..3 {
			let address = spawn_backend(json!({"height": 42}), Duration::ZERO).await;
			store.insert(peer(&format!("p{i}"), address));
		}

		let dispatcher = dispatcher(store);
		let request = Request::new(json!(1), Method::QueryState, json!({}));
		let response = dispatcher.dispatch(Method::QueryState, request).await.unwrap();
		assert_eq!(response.result, Some(json!({"height": 42})));
	}

	#[tokio::test]
	async fn empty_store_is_no_peers() {
		let dispatcher = dispatcher(Arc::new(PeerStore::new()));
		let request = Request::new(json!(1), Method::QueryState, json!({}));
		assert!(matches!(
			dispatcher.dispatch(Method::QueryState, request).await,
			Err(Error::NoPeers)
		));
	}

	#[tokio::test]
	async fn try_dispatch_reports_overload() {
		let slow = spawn_backend(json!("slow"), Duration::from_millis(300)).await;
		let store = Arc::new(PeerStore::new());
		store.insert(peer("slow", slow));

		let dispatcher = Arc::new(Dispatcher::new(
			store,
			mintgate_http::Client::new(Duration::from_secs(1)).unwrap(),
			8,
			1,
		));
		let request = Request::new(json!(1), Method::SubmitTx, json!({}));

		let busy = dispatcher.clone();
		let held_request = request.clone();
		let hold =
			tokio::spawn(async move { busy.dispatch(Method::SubmitTx, held_request).await });
		tokio::time::sleep(Duration::from_millis(50)).await;

		assert!(matches!(
			dispatcher.try_dispatch(Method::SubmitTx, request).await,
			Err(Error::Overloaded)
		));
		hold.await.unwrap().unwrap();
	}
}
