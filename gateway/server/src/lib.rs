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

//! The HTTP front door.
//!
//! POST `/` accepts a single JSON-RPC request or an array; arrays larger
//! than the configured cap are refused outright. Each request runs under
//! the server deadline behind a panic fence; batch responses come back in
//! request order. `/health` answers 200 with an empty body, `/metrics`
//! serves the Prometheus registry. CORS is open.

use axum::{
	extract::{ConnectInfo, State},
	http::StatusCode,
	response::{IntoResponse, Response as HttpResponse},
	routing::{get, post},
	Router,
};
use futures::{future::join_all, FutureExt};
use mintgate_primitives::jsonrpc::{
	Error as RpcError, Request, RequestEnvelope, Response, ERR_BATCH_SIZE_EXCEEDED,
	ERR_INVALID_REQUEST, ERR_PARSE, ERR_REQUEST_TIMEOUT, JSONRPC_VERSION,
};
use mintgate_resolver::Resolver;
use prometheus::Registry;
use serde_json::Value;
use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

mod metrics;

pub use metrics::Metrics;

pub(crate) const LOG_TARGET: &str = "server";

#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub max_batch_size: usize,
	pub server_timeout: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self { max_batch_size: 10, server_timeout: Duration::from_secs(15) }
	}
}

#[derive(Clone)]
pub struct AppState {
	resolver: Arc<Resolver>,
	config: Arc<ServerConfig>,
	metrics: Option<Arc<Metrics>>,
	registry: Arc<Registry>,
}

impl AppState {
	pub fn new(resolver: Arc<Resolver>, config: ServerConfig, registry: Arc<Registry>) -> Self {
		let metrics = match Metrics::register(&registry) {
			Ok(metrics) => Some(Arc::new(metrics)),
			Err(err) => {
				log::warn!(target: LOG_TARGET, "metrics registration failed: {}", err);
				None
			},
		};
		Self { resolver, config: Arc::new(config), metrics, registry }
	}
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/", post(handle_rpc))
		.route("/health", get(|| async { StatusCode::OK }))
		.route("/metrics", get(handle_metrics))
		.layer(CorsLayer::permissive())
		.with_state(state)
}

/// Bind and serve until the token fires
pub async fn serve(
	addr: SocketAddr,
	state: AppState,
	shutdown: CancellationToken,
) -> std::io::Result<()> {
	let listener = tokio::net::TcpListener::bind(addr).await?;
	log::info!(target: LOG_TARGET, "listening on {}", listener.local_addr()?);
	axum::serve(
		listener,
		router(state).into_make_service_with_connect_info::<SocketAddr>(),
	)
	.with_graceful_shutdown(async move { shutdown.cancelled().await })
	.await
}

async fn handle_rpc(
	State(state): State<AppState>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	body: String,
) -> axum::Json<Value> {
	let envelope: RequestEnvelope = match serde_json::from_str(&body) {
		Ok(envelope) => envelope,
		Err(err) => {
			let response = Response::err(
				Value::Null,
				RpcError::new(ERR_PARSE, format!("parse error: {err}")),
			);
			return axum::Json(encode(&response))
		},
	};

	match envelope {
		RequestEnvelope::Single(request) => {
			let response = serve_one(&state, addr, request).await;
			axum::Json(encode(&response))
		},
		RequestEnvelope::Batch(requests) => {
			if requests.is_empty() {
				let response = Response::err(
					Value::Null,
					RpcError::new(ERR_INVALID_REQUEST, "empty batch"),
				);
				return axum::Json(encode(&response))
			}
			if requests.len() > state.config.max_batch_size {
				if let Some(metrics) = &state.metrics {
					metrics.batches_rejected.inc();
				}
				let response = Response::err(
					Value::Null,
					RpcError::new(
						ERR_BATCH_SIZE_EXCEEDED,
						format!(
							"batch of {} exceeds the maximum of {}",
							requests.len(),
							state.config.max_batch_size
						),
					),
				);
				return axum::Json(encode(&response))
			}
			// responses come back in request order
			let responses = join_all(
				requests.into_iter().map(|request| serve_one(&state, addr, request)),
			)
			.await;
			axum::Json(serde_json::to_value(&responses).unwrap_or(Value::Null))
		},
	}
}

/// Run one request under the server deadline, behind a panic fence
async fn serve_one(state: &AppState, addr: SocketAddr, request: Request) -> Response {
	if let Some(metrics) = &state.metrics {
		metrics.requests_received.inc();
	}
	let id = request.id.clone();
	if request.jsonrpc != JSONRPC_VERSION {
		return Response::err(
			id,
			RpcError::new(ERR_INVALID_REQUEST, "jsonrpc must be \"2.0\""),
		)
	}

	let fenced = AssertUnwindSafe(state.resolver.handle(addr.ip(), request)).catch_unwind();
	let response = match tokio::time::timeout(state.config.server_timeout, fenced).await {
		Ok(Ok(response)) => response,
		Ok(Err(panic)) => {
			let detail = panic
				.downcast_ref::<&str>()
				.map(|s| s.to_string())
				.or_else(|| panic.downcast_ref::<String>().cloned())
				.unwrap_or_else(|| "opaque panic payload".into());
			log::error!(target: LOG_TARGET, "panic while serving request: {}", detail);
			Response::err(id, RpcError::internal("internal error"))
		},
		Err(_) => {
			if let Some(metrics) = &state.metrics {
				metrics.requests_timed_out.inc();
			}
			Response::err(id, RpcError::new(ERR_REQUEST_TIMEOUT, "request timed out"))
		},
	};
	if !response.is_ok() {
		if let Some(metrics) = &state.metrics {
			metrics.responses_errored.inc();
		}
	}
	response
}

async fn handle_metrics(State(state): State<AppState>) -> HttpResponse {
	use prometheus::Encoder;
	let encoder = prometheus::TextEncoder::new();
	let mut buffer = Vec::new();
	if let Err(err) = encoder.encode(&state.registry.gather(), &mut buffer) {
		log::warn!(target: LOG_TARGET, "encoding metrics: {}", err);
		return StatusCode::INTERNAL_SERVER_ERROR.into_response()
	}
	(StatusCode::OK, buffer).into_response()
}

fn encode(response: &Response) -> Value {
	serde_json::to_value(response).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests;
