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

//! Aggregation iterators over peer replies, consumed in arrival order

use crate::{Error, PeerError, LOG_TARGET};
use mintgate_primitives::{jsonrpc::Response, types::PeerId};
use tokio::sync::mpsc;

type Reply = (PeerId, Result<Response, mintgate_http::Error>);

/// The count a group must exceed for an early majority return,
/// `⌊(N − 1)/3⌋ × 2` for a fan-out of `n`
pub fn majority_threshold(n: usize) -> usize {
	(n.saturating_sub(1) / 3) * 2
}

/// Yield the first reply whose error is nil; collect everything else into
/// the aggregated failure
pub(crate) async fn first_success(mut rx: mpsc::Receiver<Reply>) -> Result<Response, Error> {
	let mut failures = Vec::new();
	while let Some((peer, result)) = rx.recv().await {
		match result {
			Ok(response) if response.is_ok() => return Ok(response),
			Ok(response) => {
				let detail = response
					.error
					.map(|e| e.to_string())
					.unwrap_or_else(|| "empty error".into());
				failures.push(PeerError { peer, error: detail });
			},
			Err(err) => failures.push(PeerError { peer, error: err.to_string() }),
		}
	}
	Err(Error::AllPeersFailed(failures))
}

/// Group replies by deep structural equality and return the group that
/// clears the majority threshold, or the most frequent successful group at
/// channel close
pub(crate) async fn majority(
	mut rx: mpsc::Receiver<Reply>,
	fanout: usize,
) -> Result<Response, Error> {
	let threshold = majority_threshold(fanout);
	// key is the canonical encoding of (result, error); ids are echoed from
	// the same request so they agree across peers
	let mut groups: Vec<(String, Response, usize)> = Vec::new();

	while let Some((peer, result)) = rx.recv().await {
		let response = match result {
			Ok(response) => response,
			Err(err) => {
				log::debug!(target: LOG_TARGET, "peer {} failed: {}", peer, err);
				continue
			},
		};
		let key = group_key(&response);
		let count = match groups.iter_mut().find(|(existing, _, _)| *existing == key) {
			Some((_, _, count)) => {
				*count += 1;
				*count
			},
			None => {
				groups.push((key, response.clone(), 1));
				1
			},
		};
		if count > threshold {
			return Ok(response)
		}
	}

	// no group cleared the threshold before the channel closed; settle for
	// the most frequent successful answer
	groups
		.into_iter()
		.filter(|(_, response, _)| response.is_ok())
		.max_by_key(|(_, _, count)| *count)
		.map(|(_, response, _)| Ok(response))
		.unwrap_or(Err(Error::NoQuorum))
}

fn group_key(response: &Response) -> String {
	let body = serde_json::json!({
		"result": response.result,
		"error": response.error.as_ref().map(|e| (e.code, &e.message)),
	});
	body.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn ok(value: serde_json::Value) -> Result<Response, mintgate_http::Error> {
		Ok(Response::ok(json!(1), value))
	}

	fn rpc_err(message: &str) -> Result<Response, mintgate_http::Error> {
		Ok(Response::err(
			json!(1),
			mintgate_primitives::jsonrpc::Error::internal(message),
		))
	}

	fn transport_err() -> Result<Response, mintgate_http::Error> {
		Err(mintgate_http::Error::Timeout { last_error: Some("connection refused".into()) })
	}

	async fn feed(replies: Vec<Result<Response, mintgate_http::Error>>) -> mpsc::Receiver<Reply> {
		let (tx, rx) = mpsc::channel(replies.len().max(1));
		for (i, reply) in replies.into_iter().enumerate() {
			tx.send((format!("peer{i}"), reply)).await.unwrap();
		}
		rx
	}

	#[test]
	fn threshold_matches_spec_table() {
		// ⌊(13 − 1)/3⌋ × 2 = 8
		assert_eq!(majority_threshold(13), 8);
		assert_eq!(majority_threshold(3), 0);
		assert_eq!(majority_threshold(1), 0);
	}

	#[tokio::test]
	async fn first_success_returns_first_ok_reply() {
		let rx = feed(vec![transport_err(), rpc_err("nope"), ok(json!("yes")), ok(json!("later"))])
			.await;
		let response = first_success(rx).await.unwrap();
		assert_eq!(response.result, Some(json!("yes")));
	}

	#[tokio::test]
	async fn first_success_aggregates_every_failure() {
		let rx = feed(vec![transport_err(), rpc_err("bad state"), transport_err()]).await;
		match first_success(rx).await {
			Err(Error::AllPeersFailed(failures)) => {
				assert_eq!(failures.len(), 3);
				assert!(failures[1].error.contains("bad state"));
			},
			other => panic!("expected aggregated failure, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn majority_returns_early_at_threshold() {
		// fanout 13 → threshold 8; nine agreeing replies, four dissenting
		let mut replies = Vec::new();
		for _ in 0..9 {
			replies.push(ok(json!("R")));
		}
		for _ in 0..4 {
			replies.push(ok(json!("R'")));
		}
		let rx = feed(replies).await;
		let response = majority(rx, 13).await.unwrap();
		assert_eq!(response.result, Some(json!("R")));
	}

	#[tokio::test]
	async fn majority_settles_for_most_frequent_success() {
		// nothing clears threshold 2 for fanout 4
		let rx = feed(vec![ok(json!("A")), ok(json!("B")), ok(json!("A")), transport_err()])
			.await;
		let response = majority(rx, 4).await.unwrap();
		assert_eq!(response.result, Some(json!("A")));
	}

	#[tokio::test]
	async fn majority_without_any_success_is_no_quorum() {
		// fanout 4 → threshold 2; no error group exceeds it, no success exists
		let rx = feed(vec![transport_err(), rpc_err("a"), rpc_err("b"), transport_err()]).await;
		assert!(matches!(majority(rx, 4).await, Err(Error::NoQuorum)));
	}

	#[tokio::test]
	async fn majority_ignores_transport_errors_in_grouping() {
		let rx = feed(vec![transport_err(), transport_err(), ok(json!("only"))]).await;
		let response = majority(rx, 3).await.unwrap();
		assert_eq!(response.result, Some(json!("only")));
	}
}
