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

//! Gateway Prometheus metrics definition

use prometheus::{IntCounter, Registry};

/// Front-door metrics exposed through Prometheus
pub struct Metrics {
	/// Total requests received (batch elements counted individually)
	pub requests_received: IntCounter,
	/// Responses carrying an error object
	pub responses_errored: IntCounter,
	/// Batches refused for exceeding the size cap
	pub batches_rejected: IntCounter,
	/// Requests cut off by the server deadline
	pub requests_timed_out: IntCounter,
}

impl Metrics {
	pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
		let metrics = Self {
			requests_received: IntCounter::new(
				"gateway_requests_received",
				"Total JSON-RPC requests received.",
			)?,
			responses_errored: IntCounter::new(
				"gateway_responses_errored",
				"Responses answered with a JSON-RPC error.",
			)?,
			batches_rejected: IntCounter::new(
				"gateway_batches_rejected",
				"Batches refused for exceeding the size cap.",
			)?,
			requests_timed_out: IntCounter::new(
				"gateway_requests_timed_out",
				"Requests cut off by the server deadline.",
			)?,
		};
		registry.register(Box::new(metrics.requests_received.clone()))?;
		registry.register(Box::new(metrics.responses_errored.clone()))?;
		registry.register(Box::new(metrics.batches_rejected.clone()))?;
		registry.register(Box::new(metrics.requests_timed_out.clone()))?;
		Ok(metrics)
	}
}
