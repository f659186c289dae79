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

//! Per-method, per-client-IP token-bucket rate limiting

use crate::LOG_TARGET;
use dashmap::DashMap;
use mintgate_primitives::jsonrpc::Method;
use parking_lot::Mutex;
use std::{
	collections::HashMap,
	net::IpAddr,
	time::{Duration, Instant},
};

/// Requests per second; burst capacity is the same figure, floored at one
pub type Rate = f64;

#[derive(Debug, Clone)]
pub struct LimiterConfig {
	/// Per-method global rates; methods not listed use `default_global`
	pub global_rates: HashMap<Method, Rate>,
	pub default_global: Rate,
	/// Per-method per-IP rates; methods not listed use `default_ip`
	pub ip_rates: HashMap<Method, Rate>,
	pub default_ip: Rate,
	/// Idle time after which a client's buckets are dropped
	pub ttl: Duration,
	/// Upper bound on tracked clients; new clients beyond it are refused
	pub max_clients: usize,
}

impl Default for LimiterConfig {
	fn default() -> Self {
		Self {
			global_rates: HashMap::new(),
			default_global: 200.0,
			ip_rates: HashMap::new(),
			default_ip: 10.0,
			ttl: Duration::from_secs(60),
			max_clients: 16_384,
		}
	}
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
	tokens: f64,
	refilled_at: Instant,
}

impl Bucket {
	fn new(rate: Rate) -> Self {
		Self { tokens: burst(rate), refilled_at: Instant::now() }
	}

	fn take(&mut self, rate: Rate) -> bool {
		let now = Instant::now();
		let elapsed = now.duration_since(self.refilled_at).as_secs_f64();
		self.tokens = (self.tokens + elapsed * rate).min(burst(rate));
		self.refilled_at = now;
		if self.tokens >= 1.0 {
			self.tokens -= 1.0;
			true
		} else {
			false
		}
	}
}

fn burst(rate: Rate) -> f64 {
	rate.max(1.0)
}

struct ClientBuckets {
	buckets: HashMap<Method, Bucket>,
	last_seen: Instant,
}

pub struct RateLimiter {
	config: LimiterConfig,
	global: Mutex<HashMap<Method, Bucket>>,
	clients: DashMap<IpAddr, ClientBuckets>,
}

impl RateLimiter {
	pub fn new(config: LimiterConfig) -> Self {
		Self { config, global: Mutex::new(HashMap::new()), clients: DashMap::new() }
	}

	/// Whether `ip` may run `method` now. Both the global and the per-IP
	/// bucket must have a token.
	pub fn allow(&self, method: Method, ip: IpAddr) -> bool {
		let global_rate =
			*self.config.global_rates.get(&method).unwrap_or(&self.config.default_global);
		{
			let mut global = self.global.lock();
			let bucket = global.entry(method).or_insert_with(|| Bucket::new(global_rate));
			if !bucket.take(global_rate) {
				return false
			}
		}

		let ip_rate = *self.config.ip_rates.get(&method).unwrap_or(&self.config.default_ip);
		if !self.clients.contains_key(&ip) && self.clients.len() >= self.config.max_clients {
			self.sweep();
			if self.clients.len() >= self.config.max_clients {
				log::warn!(target: LOG_TARGET, "limiter at client capacity, refusing {}", ip);
				return false
			}
		}
		let mut client = self.clients.entry(ip).or_insert_with(|| ClientBuckets {
			buckets: HashMap::new(),
			last_seen: Instant::now(),
		});
		client.last_seen = Instant::now();
		client.buckets.entry(method).or_insert_with(|| Bucket::new(ip_rate)).take(ip_rate)
	}

	/// Drop clients idle longer than the TTL
	pub fn sweep(&self) {
		let ttl = self.config.ttl;
		let now = Instant::now();
		self.clients.retain(|_, client| now.duration_since(client.last_seen) < ttl);
	}

	pub fn tracked_clients(&self) -> usize {
		self.clients.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ip(last: u8) -> IpAddr {
		IpAddr::from([127, 0, 0, last])
	}

	fn limiter(ip_rate: Rate) -> RateLimiter {
		RateLimiter::new(LimiterConfig {
			default_ip: ip_rate,
			default_global: 1000.0,
			..Default::default()
		})
	}

	#[test]
	fn per_ip_burst_is_bounded() {
		let limiter = limiter(2.0);
		assert!(limiter.allow(Method::QueryTx, ip(1)));
		assert!(limiter.allow(Method::QueryTx, ip(1)));
		// burst of two exhausted
		assert!(!limiter.allow(Method::QueryTx, ip(1)));
		// other clients are unaffected
		assert!(limiter.allow(Method::QueryTx, ip(2)));
	}

	#[test]
	fn methods_have_independent_buckets() {
		let limiter = limiter(1.0);
		assert!(limiter.allow(Method::QueryTx, ip(1)));
		assert!(!limiter.allow(Method::QueryTx, ip(1)));
		assert!(limiter.allow(Method::QueryBlock, ip(1)));
	}

	#[test]
	fn global_rate_caps_all_clients_together() {
		let limiter = RateLimiter::new(LimiterConfig {
			global_rates: HashMap::from([(Method::SubmitTx, 2.0)]),
			default_ip: 100.0,
			..Default::default()
		});
		assert!(limiter.allow(Method::SubmitTx, ip(1)));
		assert!(limiter.allow(Method::SubmitTx, ip(2)));
		assert!(!limiter.allow(Method::SubmitTx, ip(3)));
	}

	#[test]
	fn sweep_drops_idle_clients() {
		let limiter = RateLimiter::new(LimiterConfig {
			ttl: Duration::from_millis(0),
			..Default::default()
		});
		assert!(limiter.allow(Method::QueryTx, ip(1)));
		assert_eq!(limiter.tracked_clients(), 1);
		limiter.sweep();
		assert_eq!(limiter.tracked_clients(), 0);
	}

	#[test]
	fn client_capacity_refuses_new_ips() {
		let limiter = RateLimiter::new(LimiterConfig {
			max_clients: 2,
			ttl: Duration::from_secs(600),
			..Default::default()
		});
		assert!(limiter.allow(Method::QueryTx, ip(1)));
		assert!(limiter.allow(Method::QueryTx, ip(2)));
		assert!(!limiter.allow(Method::QueryTx, ip(3)));
		// known clients keep working
		assert!(limiter.allow(Method::QueryBlock, ip(1)));
	}
}
