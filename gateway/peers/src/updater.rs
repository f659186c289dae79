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

//! Periodic peer-set refresh via `queryPeers` fan-out

use crate::{Peer, PeerStore, LOG_TARGET};
use futures::{stream::FuturesUnordered, StreamExt};
use mintgate_primitives::jsonrpc::{Method, Request};
use serde_json::json;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

pub struct UpdaterParams {
	pub store: Arc<PeerStore>,
	pub client: mintgate_http::Client,
	pub poll_rate: Duration,
	pub shutdown: CancellationToken,
}

/// Asks every known peer for its view of the network and replaces the
/// learned subset with the answers. Bootstrap peers are never evicted.
pub struct Updater {
	store: Arc<PeerStore>,
	client: mintgate_http::Client,
	poll_rate: Duration,
	shutdown: CancellationToken,
}

impl Updater {
	pub fn new(params: UpdaterParams) -> Self {
		let UpdaterParams { store, client, poll_rate, shutdown } = params;
		Self { store, client, poll_rate, shutdown }
	}

	pub async fn run(self) {
		log::debug!(target: LOG_TARGET, "updater started, poll rate {:?}", self.poll_rate);
		loop {
			tokio::select! {
				_ = tokio::time::sleep(self.poll_rate) => self.refresh().await,
				_ = self.shutdown.cancelled() => {
					log::debug!(target: LOG_TARGET, "updater stopped");
					return
				},
			}
		}
	}

	/// One refresh round: fan out `queryPeers`, merge the answers, evict
	/// learned peers nobody reported
	pub async fn refresh(&self) {
		let current = self.store.all();
		if current.is_empty() {
			log::warn!(target: LOG_TARGET, "no peers to refresh from");
			return
		}

		let request = Request::new(json!(1), Method::QueryPeers, json!({}));
		let mut queries: FuturesUnordered<_> = current
			.iter()
			.map(|peer| {
				let client = self.client.clone();
				let request = request.clone();
				let address = peer.network_address.clone();
				let id = peer.id.clone();
				async move { (id, client.send(&address, &request).await) }
			})
			.collect();

		let mut discovered: HashMap<String, Peer> = HashMap::new();
		while let Some((id, result)) = queries.next().await {
			match result {
				Ok(response) if response.is_ok() => {
					let peers: Vec<Peer> = match serde_json::from_value(
						response.result.unwrap_or_default(),
					) {
						Ok(peers) => peers,
						Err(err) => {
							log::debug!(
								target: LOG_TARGET,
								"peer {} returned malformed peer list: {}",
								id,
								err
							);
							continue
						},
					};
					for peer in peers {
						discovered.insert(peer.id.clone(), peer);
					}
				},
				Ok(response) => log::debug!(
					target: LOG_TARGET,
					"peer {} answered queryPeers with error: {:?}",
					id,
					response.error
				),
				Err(err) =>
					log::debug!(target: LOG_TARGET, "queryPeers to {} failed: {}", id, err),
			}
		}

		if discovered.is_empty() {
			log::debug!(target: LOG_TARGET, "refresh round discovered no peers, keeping set");
			return
		}

		// evict learned peers nobody reported, then merge in the answers
		for id in self.store.learned_ids() {
			if !discovered.contains_key(&id) {
				let _ = self.store.delete(&id);
			}
		}
		let count = discovered.len();
		for (_, peer) in discovered {
			self.store.insert(peer);
		}
		log::debug!(
			target: LOG_TARGET,
			"refresh complete: {} reported, table size {}",
			count,
			self.store.size()
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{routing::post, Json, Router};
	use serde_json::Value;

	async fn spawn_peer(reported: Vec<Peer>) -> String {
		let app = Router::new().route(
			"/",
			post(move |Json(request): Json<Value>| {
				let reported = reported.clone();
				async move {
					Json(json!({
						"jsonrpc": "2.0",
						"id": request["id"],
						"result": reported,
					}))
				}
			}),
		);
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
		format!("http://{addr}/")
	}

	fn peer_at(id: &str, address: &str) -> Peer {
		Peer { id: id.into(), network_address: address.into(), signature: vec![], nonce: 0 }
	}

	#[tokio::test]
	async fn bootstrap_survives_refresh_and_learned_are_replaced() {
		let p3 = peer_at("p3", "http://p3.example/");
		let address = spawn_peer(vec![p3.clone()]).await;

		let store = Arc::new(PeerStore::new());
		store.bootstrap_init(vec![peer_at("b1", &address), peer_at("b2", &address)]);
		store.insert(peer_at("p1", "http://127.0.0.1:9/"));
		store.insert(peer_at("p2", "http://127.0.0.1:9/"));

		let updater = Updater::new(UpdaterParams {
			store: store.clone(),
			client: mintgate_http::Client::new(Duration::from_millis(500)).unwrap(),
			poll_rate: Duration::from_secs(60),
			shutdown: CancellationToken::new(),
		});
		updater.refresh().await;

		assert!(store.get(&"b1".into()).is_ok());
		assert!(store.get(&"b2".into()).is_ok());
		assert!(store.get(&"p3".into()).is_ok());
		assert!(store.get(&"p1".into()).is_err());
		assert!(store.get(&"p2".into()).is_err());
	}

	#[tokio::test]
	async fn refresh_keeps_set_when_nothing_reported() {
		let store = Arc::new(PeerStore::new());
		store.bootstrap_init(vec![peer_at("b1", "http://127.0.0.1:9/")]);
		store.insert(peer_at("p1", "http://127.0.0.1:9/"));

		let updater = Updater::new(UpdaterParams {
			store: store.clone(),
			client: mintgate_http::Client::new(Duration::from_millis(100)).unwrap(),
			poll_rate: Duration::from_secs(60),
			shutdown: CancellationToken::new(),
		});
		updater.refresh().await;

		// every send failed; the learned peer is retained
		assert!(store.get(&"p1".into()).is_ok());
		assert_eq!(store.size(), 2);
	}
}
