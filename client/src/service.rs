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

//! Assembles the gateway from its subsystems and runs it to completion

use crate::{cli::Cli, config::NetworkConfig};
use anyhow::Context;
use mintgate_cache::ResponseCache;
use mintgate_chains::{eth::EthereumClient, utxo::UtxoClient, ChainParams, ChainSet};
use mintgate_confirmer::{Confirmer, ConfirmerParams};
use mintgate_dispatch::Dispatcher;
use mintgate_peers::{PeerStore, Updater, UpdaterParams};
use mintgate_primitives::{Asset, Chain, Selector};
use mintgate_resolver::{LimiterConfig, Resolver, ResolverParams};
use mintgate_server::{AppState, ServerConfig};
use mintgate_store::Store;
use mintgate_verify::Verifier;
use mintgate_watcher::{Watcher, WatcherParams};
use prometheus::Registry;
use std::{collections::HashMap, net::SocketAddr, path::Path, sync::Arc, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "service";

fn build_chains(
	config: &NetworkConfig,
	http: &mintgate_http::Client,
) -> anyhow::Result<ChainSet> {
	let mut chains = ChainSet::new();
	for (chain, entry) in &config.chains {
		let params = ChainParams {
			confirmation_threshold: entry.confirmation_threshold,
			min_amount: entry.min_amount,
		};
		let client: Arc<dyn mintgate_chains::ChainClient> = match chain {
			Chain::Ethereum => Arc::new(EthereumClient::new(
				http.clone(),
				entry.rpc_url.clone(),
				parse_asset_map(&entry.gateway_contracts)?,
				parse_asset_map(&entry.tokens)?,
			)),
			utxo_chain => Arc::new(UtxoClient::new(
				http.clone(),
				entry.rpc_url.clone(),
				*utxo_chain,
			)),
		};
		chains = chains.with_chain(client, params);
	}
	Ok(chains)
}

fn parse_asset_map(
	raw: &HashMap<String, mintgate_primitives::types::EthAddress>,
) -> anyhow::Result<HashMap<Asset, mintgate_primitives::types::EthAddress>> {
	raw.iter()
		.map(|(name, address)| {
			let asset = name
				.parse::<Asset>()
				.map_err(|e| anyhow::anyhow!("unknown asset in config: {e}"))?;
			Ok((asset, *address))
		})
		.collect()
}

pub async fn run(cli: Cli, config: NetworkConfig) -> anyhow::Result<()> {
	let shutdown = CancellationToken::new();

	let store = if cli.db == ":memory:" {
		Arc::new(Store::open_in_memory()?)
	} else {
		Arc::new(Store::open(Path::new(&cli.db))?)
	};

	let peers = Arc::new(PeerStore::with_persistence(store.clone()));
	peers.bootstrap_init(config.bootstrap_addrs.clone());

	let http = mintgate_http::Client::new(Duration::from_secs(cli.client_timeout))
		.context("building http client")?;
	let chains = build_chains(&config, &http)?;

	let verifier = Arc::new(Verifier::new(
		config.whitelist.iter().copied().collect(),
		chains.clone(),
		store.clone(),
		config.dist_pubkey_bytes()?,
	));
	let dispatcher = Arc::new(Dispatcher::new(peers.clone(), http.clone(), cli.cap, cli.cap));
	let cache = Arc::new(ResponseCache::new(Duration::from_secs(cli.ttl)));

	let limiter = LimiterConfig {
		global_rates: NetworkConfig::method_rates(&config.limiter_global_rates),
		default_global: cli.limiter_global_rate,
		ip_rates: NetworkConfig::method_rates(&config.limiter_ip_rates),
		default_ip: cli.limiter_ip_rate,
		ttl: Duration::from_secs(cli.limiter_ttl),
		max_clients: cli.limiter_max_clients,
	};
	let resolver = Arc::new(Resolver::new(ResolverParams {
		cache: cache.clone(),
		dispatcher: dispatcher.clone(),
		verifier,
		store: store.clone(),
		limiter,
		max_page_size: cli.max_page_size,
	}));

	let mut workers = JoinSet::new();

	workers.spawn(
		cache
			.clone()
			.run_sweeper(Duration::from_secs(cli.ttl.max(1)), shutdown.child_token()),
	);

	workers.spawn(
		Updater::new(UpdaterParams {
			store: peers.clone(),
			client: http.clone(),
			poll_rate: Duration::from_secs(cli.updater_poll_rate),
			shutdown: shutdown.child_token(),
		})
		.run(),
	);

	workers.spawn(
		Confirmer::new(ConfirmerParams {
			store: store.clone(),
			chains: chains.clone(),
			dispatcher,
			poll_interval: Duration::from_secs(cli.confirmer_poll_rate),
			expiry: Duration::from_secs(cli.transaction_expiry),
			shutdown: shutdown.child_token(),
		})
		.run(),
	);

	for selector in config.watch_pairs() {
		let Selector { asset, host_chain, .. } = selector;
		log::info!(target: LOG_TARGET, "starting watcher for {}", selector);
		workers.spawn(
			Watcher::new(WatcherParams {
				chain: host_chain,
				asset,
				chains: chains.clone(),
				store: store.clone(),
				sink: resolver.clone(),
				poll_rate: Duration::from_secs(cli.watcher_poll_rate),
				max_block_advance: cli.watcher_max_block_advance,
				confidence_interval: cli.watcher_confidence_interval,
				shutdown: shutdown.child_token(),
			})
			.run(),
		);
	}

	// the limiter forgets idle clients on its own cadence
	{
		let resolver = resolver.clone();
		let token = shutdown.child_token();
		let sweep_every = Duration::from_secs(cli.limiter_ttl.max(1));
		workers.spawn(async move {
			loop {
				tokio::select! {
					_ = tokio::time::sleep(sweep_every) => resolver.limiter().sweep(),
					_ = token.cancelled() => return,
				}
			}
		});
	}

	let state = AppState::new(
		resolver,
		ServerConfig {
			max_batch_size: cli.max_batch_size,
			server_timeout: Duration::from_secs(cli.server_timeout),
		},
		Arc::new(Registry::new()),
	);
	let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
	log::info!(
		target: LOG_TARGET,
		"mintgate starting on {} ({} network, {} bootstrap peers)",
		addr,
		config.network,
		config.bootstrap_addrs.len()
	);

	let server = {
		let shutdown = shutdown.clone();
		tokio::spawn(mintgate_server::serve(addr, state, shutdown))
	};

	tokio::select! {
		result = server => {
			result.context("server task")??;
		},
		_ = shutdown_signal() => {
			log::info!(target: LOG_TARGET, "received shutdown signal");
		},
	}

	shutdown.cancel();
	while workers.join_next().await.is_some() {}
	log::info!(target: LOG_TARGET, "bye");
	Ok(())
}

/// Completes on SIGINT or SIGTERM
async fn shutdown_signal() {
	let ctrl_c = tokio::signal::ctrl_c();
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};
		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(sigterm) => sigterm,
			Err(err) => {
				log::warn!(target: LOG_TARGET, "installing SIGTERM handler: {}", err);
				let _ = ctrl_c.await;
				return
			},
		};
		tokio::select! {
			_ = ctrl_c => {},
			_ = sigterm.recv() => {},
		}
	}
	#[cfg(not(unix))]
	{
		let _ = ctrl_c.await;
	}
}
