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

//! JSON-RPC POST client used for all outbound traffic: backend peers and
//! source-chain full nodes.
//!
//! Every call carries a bounded timeout. Callers that pass [`RetryOptions`]
//! get transport-error retry with a wait that grows by `prev * (1 + factor)`
//! capped at `max`, until the cancellation token fires or a response
//! decodes.

use mintgate_primitives::jsonrpc::{Request, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) const LOG_TARGET: &str = "http";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("building http client: {0}")]
	Build(reqwest::Error),
	#[error("transport: {0}")]
	Transport(reqwest::Error),
	#[error("decoding response: {0}")]
	Decode(reqwest::Error),
	#[error("timed out{}", fmt_last_error(last_error))]
	Timeout { last_error: Option<String> },
}

fn fmt_last_error(last_error: &Option<String>) -> String {
	last_error.as_ref().map(|e| format!(", last error: {e}")).unwrap_or_default()
}

/// Retry policy for [`Client::send_with_retry`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryOptions {
	/// First wait after a failed attempt
	pub base: Duration,
	/// Cap on the wait between attempts
	pub max: Duration,
	/// Growth applied to the previous wait, `prev * (1 + factor)`
	pub factor: f64,
}

impl RetryOptions {
	/// The wait following `prev`
	pub fn next_wait(&self, prev: Duration) -> Duration {
		let grown = prev.mul_f64(1.0 + self.factor);
		grown.min(self.max)
	}
}

#[derive(Clone)]
pub struct Client {
	inner: reqwest::Client,
}

impl Client {
	/// A client applying `timeout` to every individual attempt
	pub fn new(timeout: Duration) -> Result<Self, Error> {
		let inner = reqwest::Client::builder().timeout(timeout).build().map_err(Error::Build)?;
		Ok(Self { inner })
	}

	/// POST `request` to `url` and decode the JSON-RPC response
	pub async fn send(&self, url: &str, request: &Request) -> Result<Response, Error> {
		let http_response = self
			.inner
			.post(url)
			.header(reqwest::header::CONTENT_TYPE, "application/json")
			.json(request)
			.send()
			.await
			.map_err(Error::Transport)?;
		http_response.json::<Response>().await.map_err(Error::Decode)
	}

	/// POST with transport-error retry.
	///
	/// Attempts repeat until one decodes or `token` is cancelled, at which
	/// point the last transport error is surfaced inside [`Error::Timeout`].
	pub async fn send_with_retry(
		&self,
		token: &CancellationToken,
		url: &str,
		request: &Request,
		retry: RetryOptions,
	) -> Result<Response, Error> {
		let mut wait = retry.base;
		let mut last_error: Option<String> = None;
		loop {
			if token.is_cancelled() {
				return Err(Error::Timeout { last_error })
			}
			let attempt = tokio::select! {
				result = self.send(url, request) => result,
				_ = token.cancelled() => return Err(Error::Timeout { last_error }),
			};
			match attempt {
				Ok(response) => return Ok(response),
				Err(err) => {
					log::debug!(
						target: LOG_TARGET,
						"send to {} failed, retrying in {:?}: {}",
						url,
						wait,
						err
					);
					last_error = Some(err.to_string());
				},
			}
			tokio::select! {
				_ = tokio::time::sleep(wait) => {},
				_ = token.cancelled() => return Err(Error::Timeout { last_error }),
			}
			wait = retry.next_wait(wait);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mintgate_primitives::jsonrpc::{Method, JSONRPC_VERSION};
	use serde_json::json;

	fn request() -> Request {
		Request::new(json!(1), Method::QueryNumPeers, json!({}))
	}

	#[test]
	fn retry_wait_grows_and_caps() {
		let retry = RetryOptions {
			base: Duration::from_millis(100),
			max: Duration::from_millis(450),
			factor: 1.0,
		};
		let first = retry.next_wait(retry.base);
		assert_eq!(first, Duration::from_millis(200));
		let second = retry.next_wait(first);
		assert_eq!(second, Duration::from_millis(400));
		// capped at max from here on
		assert_eq!(retry.next_wait(second), Duration::from_millis(450));
		assert_eq!(retry.next_wait(retry.max), Duration::from_millis(450));
	}

	#[tokio::test]
	async fn send_decodes_a_response() {
		let app = axum::Router::new().route(
			"/",
			axum::routing::post(|| async {
				axum::Json(json!({"jsonrpc": JSONRPC_VERSION, "id": 1, "result": 3}))
			}),
		);
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

		let client = Client::new(Duration::from_secs(1)).unwrap();
		let response = client.send(&format!("http://{addr}/"), &request()).await.unwrap();
		assert_eq!(response.result, Some(json!(3)));
	}

	#[tokio::test]
	async fn cancelled_retry_surfaces_last_transport_error() {
		// nothing listens on this port; every attempt is a transport error
		let client = Client::new(Duration::from_millis(100)).unwrap();
		let retry = RetryOptions {
			base: Duration::from_millis(10),
			max: Duration::from_millis(20),
			factor: 0.5,
		};
		let token = CancellationToken::new();
		let cancel = token.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(300)).await;
			cancel.cancel();
		});

		let err = client
			.send_with_retry(&token, "http://127.0.0.1:9/", &request(), retry)
			.await
			.unwrap_err();
		match err {
			Error::Timeout { last_error } => assert!(last_error.is_some()),
			other => panic!("expected timeout, got {other:?}"),
		}
	}
}
