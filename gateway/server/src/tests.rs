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

use super::*;
use axum::{routing::post as axum_post, Json};
use mintgate_cache::ResponseCache;
use mintgate_chains::{mock::MockChain, ChainParams, ChainSet};
use mintgate_dispatch::Dispatcher;
use mintgate_peers::{Peer, PeerStore};
use mintgate_primitives::{jsonrpc::ERR_RATE_LIMIT_EXCEEDED, Chain};
use mintgate_resolver::{LimiterConfig, ResolverParams};
use mintgate_store::Store;
use mintgate_verify::Verifier;
use serde_json::json;
use std::collections::HashSet;

async fn spawn_backend(delay: Duration) -> String {
	let app = Router::new().route(
		"/",
		axum_post(move |Json(request): Json<Value>| async move {
			tokio::time::sleep(delay).await;
			Json(json!({"jsonrpc": "2.0", "id": request["id"], "result": {"ok": true}}))
		}),
	);
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
	format!("http://{addr}/")
}

async fn spawn_gateway(
	config: ServerConfig,
	limiter: LimiterConfig,
	backend_delay: Duration,
) -> String {
	let bitcoin = Arc::new(MockChain::new(Chain::Bitcoin));
	let chains = ChainSet::new().with_chain(
		bitcoin,
		ChainParams { confirmation_threshold: 6, min_amount: 10_000 },
	);
	let store = Arc::new(Store::open_in_memory().unwrap());
	let whitelist: HashSet<_> = HashSet::from(["BTC/toEthereum".parse().unwrap()]);
	let verifier = Arc::new(Verifier::new(whitelist, chains, store.clone(), vec![3u8; 33]));

	let peers = Arc::new(PeerStore::new());
	peers.insert(Peer {
		id: "backend".into(),
		network_address: spawn_backend(backend_delay).await,
		signature: vec![],
		nonce: 0,
	});
	let dispatcher = Arc::new(Dispatcher::new(
		peers,
		mintgate_http::Client::new(Duration::from_secs(2)).unwrap(),
		8,
		8,
	));

	let resolver = Arc::new(mintgate_resolver::Resolver::new(ResolverParams {
		cache: Arc::new(ResponseCache::new(Duration::from_secs(60))),
		dispatcher,
		verifier,
		store,
		limiter,
		max_page_size: 10,
	}));

	let state = AppState::new(resolver, config, Arc::new(Registry::new()));
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(
			listener,
			router(state).into_make_service_with_connect_info::<SocketAddr>(),
		)
		.await
		.unwrap()
	});
	format!("http://{addr}")
}

async fn gateway() -> String {
	spawn_gateway(ServerConfig::default(), LimiterConfig::default(), Duration::ZERO).await
}

fn rpc(id: u64, method: &str, params: Value) -> Value {
	json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

#[tokio::test]
async fn health_answers_200_with_empty_body() {
	let base = gateway().await;
	let response = reqwest::get(format!("{base}/health")).await.unwrap();
	assert_eq!(response.status(), 200);
	assert_eq!(response.text().await.unwrap(), "");
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
	let base = gateway().await;
	let client = reqwest::Client::new();
	let body: Value = client
		.post(format!("{base}/"))
		.header("content-type", "application/json")
		.body("{not json")
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body["error"]["code"], json!(ERR_PARSE));
}

#[tokio::test]
async fn single_request_round_trips() {
	let base = gateway().await;
	let client = reqwest::Client::new();
	let body: Value = client
		.post(format!("{base}/"))
		.json(&rpc(1, "queryBlock", json!({})))
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body["result"], json!({"ok": true}));
	assert_eq!(body["id"], json!(1));
}

#[tokio::test]
async fn batch_responses_preserve_request_order() {
	let base = gateway().await;
	let client = reqwest::Client::new();
	let batch = json!([
		rpc(1, "queryBlock", json!({"height": 1})),
		rpc(2, "queryBlock", json!({"height": 2})),
		rpc(3, "queryNumPeers", json!({})),
	]);
	let body: Value =
		client.post(format!("{base}/")).json(&batch).send().await.unwrap().json().await.unwrap();
	let responses = body.as_array().unwrap();
	assert_eq!(responses.len(), 3);
	for (i, response) in responses.iter().enumerate() {
		assert_eq!(response["id"], json!(i as u64 + 1));
	}
}

#[tokio::test]
async fn oversized_batch_is_refused() {
	let base = spawn_gateway(
		ServerConfig { max_batch_size: 2, ..Default::default() },
		LimiterConfig::default(),
		Duration::ZERO,
	)
	.await;
	let client = reqwest::Client::new();
	let batch = json!([
		rpc(1, "queryBlock", json!({})),
		rpc(2, "queryBlock", json!({})),
		rpc(3, "queryBlock", json!({})),
	]);
	let body: Value =
		client.post(format!("{base}/")).json(&batch).send().await.unwrap().json().await.unwrap();
	assert_eq!(body["error"]["code"], json!(ERR_BATCH_SIZE_EXCEEDED));
}

#[tokio::test]
async fn empty_batch_is_an_invalid_request() {
	let base = gateway().await;
	let client = reqwest::Client::new();
	let body: Value = client
		.post(format!("{base}/"))
		.json(&json!([]))
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body["error"]["code"], json!(ERR_INVALID_REQUEST));
}

#[tokio::test]
async fn wrong_version_is_an_invalid_request() {
	let base = gateway().await;
	let client = reqwest::Client::new();
	let body: Value = client
		.post(format!("{base}/"))
		.json(&json!({"jsonrpc": "1.0", "id": 1, "method": "queryBlock", "params": {}}))
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body["error"]["code"], json!(ERR_INVALID_REQUEST));
}

#[tokio::test]
async fn rate_limited_batch_element_fails_alone() {
	let base = spawn_gateway(
		ServerConfig::default(),
		LimiterConfig {
			ip_rates: std::collections::HashMap::from([(
				mintgate_primitives::jsonrpc::Method::QueryStat,
				1.0,
			)]),
			..Default::default()
		},
		Duration::ZERO,
	)
	.await;
	let client = reqwest::Client::new();

	// exhaust the queryStat bucket for this client
	client
		.post(format!("{base}/"))
		.json(&rpc(99, "queryStat", json!({})))
		.send()
		.await
		.unwrap();

	let batch = json!([
		rpc(1, "queryBlock", json!({"height": 10})),
		rpc(2, "queryStat", json!({})),
		rpc(3, "queryBlock", json!({"height": 11})),
	]);
	let body: Value =
		client.post(format!("{base}/")).json(&batch).send().await.unwrap().json().await.unwrap();
	let responses = body.as_array().unwrap();
	assert_eq!(responses.len(), 3);
	assert!(responses[0]["error"].is_null());
	assert_eq!(responses[1]["error"]["code"], json!(ERR_RATE_LIMIT_EXCEEDED));
	assert!(responses[2]["error"].is_null());
}

#[tokio::test]
async fn slow_upstream_hits_the_server_deadline() {
	let base = spawn_gateway(
		ServerConfig { server_timeout: Duration::from_millis(100), ..Default::default() },
		LimiterConfig::default(),
		Duration::from_millis(500),
	)
	.await;
	let client = reqwest::Client::new();
	let body: Value = client
		.post(format!("{base}/"))
		.json(&rpc(1, "queryBlock", json!({})))
		.send()
		.await
		.unwrap()
		.json()
		.await
		.unwrap();
	assert_eq!(body["error"]["code"], json!(ERR_REQUEST_TIMEOUT));
	assert_eq!(body["id"], json!(1));
}

#[tokio::test]
async fn metrics_endpoint_exposes_counters() {
	let base = gateway().await;
	let client = reqwest::Client::new();
	client
		.post(format!("{base}/"))
		.json(&rpc(1, "queryBlock", json!({})))
		.send()
		.await
		.unwrap();

	let text = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
	assert!(text.contains("gateway_requests_received"));
}
