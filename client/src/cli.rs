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

use std::path::PathBuf;

/// The mintgate gateway node
#[derive(Debug, clap::Parser)]
#[command(name = "mintgate", version)]
pub struct Cli {
	/// Network config file (chains, bootstrap peers, whitelist)
	#[arg(long)]
	pub config: PathBuf,

	/// Listen port
	#[arg(long, default_value = "5000", env = "MINTGATE_PORT")]
	pub port: u16,

	/// SQLite database path; ":memory:" for an ephemeral store
	#[arg(long, default_value = "mintgate.db", env = "MINTGATE_DB")]
	pub db: String,

	/// Queue capacity for inter-component channels and in-flight dispatches
	#[arg(long, default_value = "128")]
	pub cap: usize,

	/// Maximum requests accepted in one batch
	#[arg(long, default_value = "10")]
	pub max_batch_size: usize,

	/// Maximum page size for queryTxs
	#[arg(long, default_value = "50")]
	pub max_page_size: u64,

	/// Per-request deadline, seconds
	#[arg(long, default_value = "15")]
	pub server_timeout: u64,

	/// Per-peer-call timeout, seconds
	#[arg(long, default_value = "10")]
	pub client_timeout: u64,

	/// Response cache TTL, seconds
	#[arg(long, default_value = "10")]
	pub ttl: u64,

	/// Peer-set refresh cadence, seconds
	#[arg(long, default_value = "300")]
	pub updater_poll_rate: u64,

	/// Pending-transaction check cadence, seconds
	#[arg(long, default_value = "30")]
	pub confirmer_poll_rate: u64,

	/// Burn-log poll cadence, seconds
	#[arg(long, default_value = "15")]
	pub watcher_poll_rate: u64,

	/// Cap on blocks a watcher processes per round
	#[arg(long, default_value = "1000")]
	pub watcher_max_block_advance: u64,

	/// Blocks a burn log must be buried under before it is lifted
	#[arg(long, default_value = "12")]
	pub watcher_confidence_interval: u64,

	/// Retention for transaction rows, seconds
	#[arg(long, default_value = "1209600")]
	pub transaction_expiry: u64,

	/// Default global rate per method, requests per second
	#[arg(long, default_value = "200.0")]
	pub limiter_global_rate: f64,

	/// Default per-IP rate per method, requests per second
	#[arg(long, default_value = "10.0")]
	pub limiter_ip_rate: f64,

	/// Idle time before a client's limiter state is dropped, seconds
	#[arg(long, default_value = "60")]
	pub limiter_ttl: u64,

	/// Upper bound on limiter-tracked clients
	#[arg(long, default_value = "16384")]
	pub limiter_max_clients: usize,
}
