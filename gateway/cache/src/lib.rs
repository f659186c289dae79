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

//! Fingerprint-keyed cache of completed RPC responses.
//!
//! On a miss, exactly one caller becomes the producer; concurrent callers
//! for the same fingerprint park on a watch channel and receive the
//! producer's response. Entries live for the configured TTL and are removed
//! by a periodic sweep. Error responses are cached only when their code is
//! in the negative-caching set (empty by default).

use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use mintgate_primitives::{jsonrpc::Response, types::Hash};
use parking_lot::RwLock;
use std::{
	collections::{HashMap, HashSet},
	future::Future,
	sync::Arc,
	time::{Duration, Instant},
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub(crate) const LOG_TARGET: &str = "cache";

struct Entry {
	response: Response,
	expires_at: Instant,
}

enum Role {
	Produce(watch::Sender<Option<Response>>),
	Wait(watch::Receiver<Option<Response>>),
}

pub struct ResponseCache {
	ttl: Duration,
	entries: RwLock<HashMap<Hash, Entry>>,
	inflight: DashMap<Hash, watch::Receiver<Option<Response>>>,
	/// Error codes whose responses may be cached
	negative_codes: HashSet<i64>,
}

impl ResponseCache {
	pub fn new(ttl: Duration) -> Self {
		Self::with_negative_codes(ttl, HashSet::new())
	}

	pub fn with_negative_codes(ttl: Duration, negative_codes: HashSet<i64>) -> Self {
		Self {
			ttl,
			entries: RwLock::new(HashMap::new()),
			inflight: DashMap::new(),
			negative_codes,
		}
	}

	/// Return the cached response for `fingerprint`, or run `producer` to
	/// fill it. Concurrent callers share a single producer run.
	pub async fn lookup_or_compute<F, Fut>(&self, fingerprint: Hash, producer: F) -> Response
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Response>,
	{
		if let Some(hit) = self.lookup(&fingerprint) {
			return hit
		}

		// lock scope kept synchronous; the guard must not live across awaits
		let role = match self.inflight.entry(fingerprint) {
			MapEntry::Occupied(occupied) => Role::Wait(occupied.get().clone()),
			MapEntry::Vacant(vacant) => {
				let (tx, rx) = watch::channel(None);
				vacant.insert(rx);
				Role::Produce(tx)
			},
		};

		match role {
			Role::Produce(tx) => {
				let response = producer().await;
				self.store(fingerprint, &response);
				self.inflight.remove(&fingerprint);
				let _ = tx.send(Some(response.clone()));
				response
			},
			Role::Wait(mut rx) => {
				loop {
					if let Some(response) = rx.borrow().clone() {
						return response
					}
					if rx.changed().await.is_err() {
						break
					}
				}
				// producer dropped without a value; very unlikely, serve a miss
				log::warn!(target: LOG_TARGET, "in-flight producer vanished, recomputing");
				self.lookup(&fingerprint).unwrap_or_else(|| {
					Response::err(
						serde_json::Value::Null,
						mintgate_primitives::jsonrpc::Error::internal("cache producer failed"),
					)
				})
			},
		}
	}

	pub fn lookup(&self, fingerprint: &Hash) -> Option<Response> {
		let entries = self.entries.read();
		let entry = entries.get(fingerprint)?;
		if entry.expires_at <= Instant::now() {
			return None
		}
		Some(entry.response.clone())
	}

	fn store(&self, fingerprint: Hash, response: &Response) {
		let cacheable = match &response.error {
			None => true,
			Some(err) => self.negative_codes.contains(&err.code),
		};
		if !cacheable {
			return
		}
		self.entries.write().insert(
			fingerprint,
			Entry { response: response.clone(), expires_at: Instant::now() + self.ttl },
		);
	}

	/// Drop expired entries
	pub fn sweep(&self) {
		let now = Instant::now();
		let mut entries = self.entries.write();
		let before = entries.len();
		entries.retain(|_, entry| entry.expires_at > now);
		let removed = before - entries.len();
		if removed > 0 {
			log::trace!(target: LOG_TARGET, "swept {} expired responses", removed);
		}
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Periodic expiry sweep until shutdown
	pub async fn run_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
		loop {
			tokio::select! {
				_ = tokio::time::sleep(interval) => self.sweep(),
				_ = shutdown.cancelled() => return,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mintgate_primitives::jsonrpc::{Error as RpcError, ERR_PEER_FORWARDING};
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn fingerprint(byte: u8) -> Hash {
		Hash::repeat_byte(byte)
	}

	fn ok_response(value: u64) -> Response {
		Response::ok(json!(1), json!(value))
	}

	#[tokio::test]
	async fn hit_within_ttl_skips_producer() {
		let cache = ResponseCache::new(Duration::from_secs(60));
		let first = cache.lookup_or_compute(fingerprint(1), || async { ok_response(7) }).await;
		let second = cache
			.lookup_or_compute(fingerprint(1), || async { panic!("producer must not run") })
			.await;
		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn expired_entries_recompute() {
		let cache = ResponseCache::new(Duration::from_millis(20));
		cache.lookup_or_compute(fingerprint(1), || async { ok_response(1) }).await;
		tokio::time::sleep(Duration::from_millis(40)).await;
		let fresh = cache.lookup_or_compute(fingerprint(1), || async { ok_response(2) }).await;
		assert_eq!(fresh.result, Some(json!(2)));
	}

	#[tokio::test]
	async fn concurrent_misses_share_one_producer() {
		let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
		let runs = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..16 {
			let cache = cache.clone();
			let runs = runs.clone();
			handles.push(tokio::spawn(async move {
				cache
					.lookup_or_compute(fingerprint(9), move || async move {
						runs.fetch_add(1, Ordering::SeqCst);
						tokio::time::sleep(Duration::from_millis(30)).await;
						ok_response(42)
					})
					.await
			}));
		}

		let mut responses = Vec::new();
		for handle in handles {
			responses.push(handle.await.unwrap());
		}
		assert_eq!(runs.load(Ordering::SeqCst), 1);
		assert!(responses.iter().all(|r| r.result == Some(json!(42))));
	}

	#[tokio::test]
	async fn errors_are_not_cached_by_default() {
		let cache = ResponseCache::new(Duration::from_secs(60));
		let error =
			Response::err(json!(1), RpcError::new(ERR_PEER_FORWARDING, "no peer answered"));
		cache.lookup_or_compute(fingerprint(1), || async { error.clone() }).await;
		assert_eq!(cache.len(), 0);

		let retried =
			cache.lookup_or_compute(fingerprint(1), || async { ok_response(5) }).await;
		assert!(retried.is_ok());
	}

	#[tokio::test]
	async fn negative_codes_opt_into_caching() {
		let cache = ResponseCache::with_negative_codes(
			Duration::from_secs(60),
			HashSet::from([ERR_PEER_FORWARDING]),
		);
		let error =
			Response::err(json!(1), RpcError::new(ERR_PEER_FORWARDING, "no peer answered"));
		cache.lookup_or_compute(fingerprint(1), || async { error.clone() }).await;
		assert_eq!(cache.len(), 1);
	}

	#[tokio::test]
	async fn sweep_removes_expired_only() {
		let cache = ResponseCache::new(Duration::from_millis(20));
		cache.lookup_or_compute(fingerprint(1), || async { ok_response(1) }).await;
		tokio::time::sleep(Duration::from_millis(40)).await;
		cache.lookup_or_compute(fingerprint(2), || async { ok_response(2) }).await;

		// first entry has expired but still occupies the map until swept
		assert_eq!(cache.len(), 2);
		cache.sweep();
		assert_eq!(cache.len(), 1);
		assert!(cache.lookup(&fingerprint(2)).is_some());
	}
}
