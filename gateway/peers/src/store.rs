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

//! The ordered peer table.
//!
//! Bootstrap peers are pinned at initialisation and survive every refresh;
//! learned peers come and go with the updater. Insertion order is stable so
//! `first()` does not move within a refresh epoch. Mutations snapshot the
//! learned subset into the persistent `kv` table so a restart does not
//! forget the network.

use crate::{Error, LOG_TARGET};
use mintgate_primitives::{serde_hex, types::PeerId};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

const SNAPSHOT_KEY: &str = "peers/learned";

/// A backend node endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
	pub id: PeerId,
	/// URL the gateway POSTs JSON-RPC requests to
	pub network_address: String,
	#[serde(with = "serde_hex")]
	pub signature: Vec<u8>,
	pub nonce: u64,
}

#[derive(Default)]
struct Table {
	order: Vec<PeerId>,
	peers: HashMap<PeerId, Peer>,
	bootstrap: HashSet<PeerId>,
}

pub struct PeerStore {
	table: RwLock<Table>,
	/// Learned-peer snapshots land here when attached
	persistence: Option<Arc<mintgate_store::Store>>,
}

impl PeerStore {
	pub fn new() -> Self {
		Self { table: RwLock::new(Table::default()), persistence: None }
	}

	/// A store that snapshots learned peers into `persistence` and reloads
	/// them now
	pub fn with_persistence(persistence: Arc<mintgate_store::Store>) -> Self {
		let store = Self { table: RwLock::new(Table::default()), persistence: Some(persistence) };
		store.load_snapshot();
		store
	}

	/// Pin `peers` as the bootstrap subset. Pinned peers are never removed
	/// by `delete`.
	pub fn bootstrap_init(&self, peers: Vec<Peer>) {
		{
			let mut table = self.table.write();
			for peer in peers {
				table.bootstrap.insert(peer.id.clone());
				if !table.peers.contains_key(&peer.id) {
					table.order.push(peer.id.clone());
				}
				table.peers.insert(peer.id.clone(), peer);
			}
		}
		log::info!(target: LOG_TARGET, "pinned {} bootstrap peers", self.size());
	}

	/// Insert or replace a peer. Fresh ids append to the order; replacing
	/// keeps the existing position.
	pub fn insert(&self, peer: Peer) {
		{
			let mut table = self.table.write();
			if !table.peers.contains_key(&peer.id) {
				table.order.push(peer.id.clone());
			}
			table.peers.insert(peer.id.clone(), peer);
		}
		self.write_snapshot();
	}

	/// Remove a learned peer. Bootstrap peers are left in place and `false`
	/// is returned.
	pub fn delete(&self, id: &PeerId) -> Result<bool, Error> {
		let removed = {
			let mut table = self.table.write();
			if !table.peers.contains_key(id) {
				return Err(Error::NotFound)
			}
			if table.bootstrap.contains(id) {
				false
			} else {
				table.peers.remove(id);
				table.order.retain(|existing| existing != id);
				true
			}
		};
		if removed {
			self.write_snapshot();
		}
		Ok(removed)
	}

	pub fn get(&self, id: &PeerId) -> Result<Peer, Error> {
		self.table.read().peers.get(id).cloned().ok_or(Error::NotFound)
	}

	pub fn size(&self) -> usize {
		self.table.read().peers.len()
	}

	/// Every peer in insertion order
	pub fn all(&self) -> Vec<Peer> {
		let table = self.table.read();
		table.order.iter().filter_map(|id| table.peers.get(id).cloned()).collect()
	}

	/// Up to `n` distinct peers, uniformly without replacement
	pub fn random(&self, n: usize) -> Vec<Peer> {
		let all = self.all();
		let mut rng = rand::thread_rng();
		all.choose_multiple(&mut rng, n).cloned().collect()
	}

	/// The oldest peer in the table
	pub fn first(&self) -> Result<Peer, Error> {
		let table = self.table.read();
		let id = table.order.first().ok_or(Error::Empty)?;
		table.peers.get(id).cloned().ok_or(Error::Empty)
	}

	/// Ids of peers the updater may evict
	pub fn learned_ids(&self) -> Vec<PeerId> {
		let table = self.table.read();
		table
			.order
			.iter()
			.filter(|id| !table.bootstrap.contains(*id))
			.cloned()
			.collect()
	}

	fn load_snapshot(&self) {
		let Some(persistence) = &self.persistence else { return };
		match persistence.kv_get(SNAPSHOT_KEY) {
			Ok(Some(raw)) => match serde_json::from_str::<Vec<Peer>>(&raw) {
				Ok(peers) => {
					let count = peers.len();
					let mut table = self.table.write();
					for peer in peers {
						if !table.peers.contains_key(&peer.id) {
							table.order.push(peer.id.clone());
						}
						table.peers.insert(peer.id.clone(), peer);
					}
					log::info!(target: LOG_TARGET, "restored {} learned peers", count);
				},
				Err(err) => {
					log::warn!(target: LOG_TARGET, "discarding corrupt peer snapshot: {}", err)
				},
			},
			Ok(None) => {},
			Err(err) => log::warn!(target: LOG_TARGET, "reading peer snapshot: {}", err),
		}
	}

	fn write_snapshot(&self) {
		let Some(persistence) = &self.persistence else { return };
		let learned: Vec<Peer> = {
			let table = self.table.read();
			table
				.order
				.iter()
				.filter(|id| !table.bootstrap.contains(*id))
				.filter_map(|id| table.peers.get(id).cloned())
				.collect()
		};
		match serde_json::to_string(&learned) {
			Ok(raw) =>
				if let Err(err) = persistence.kv_put(SNAPSHOT_KEY, &raw) {
					log::warn!(target: LOG_TARGET, "writing peer snapshot: {}", err);
				},
			Err(err) => log::warn!(target: LOG_TARGET, "encoding peer snapshot: {}", err),
		}
	}
}

impl Default for PeerStore {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	pub(crate) fn peer(id: &str) -> Peer {
		Peer {
			id: id.into(),
			network_address: format!("http://{id}.example:18515"),
			signature: vec![1, 2, 3],
			nonce: 0,
		}
	}

	#[test]
	fn bootstrap_peers_survive_deletion() {
		let store = PeerStore::new();
		store.bootstrap_init(vec![peer("b1"), peer("b2")]);
		store.insert(peer("p1"));

		assert_eq!(store.delete(&"p1".into()).unwrap(), true);
		assert_eq!(store.delete(&"b1".into()).unwrap(), false);
		assert!(store.get(&"b1".into()).is_ok());
		assert_eq!(store.delete(&"missing".into()), Err(Error::NotFound));
		assert_eq!(store.size(), 2);
	}

	#[test]
	fn first_is_stable_across_inserts() {
		let store = PeerStore::new();
		store.bootstrap_init(vec![peer("b1")]);
		store.insert(peer("p1"));
		store.insert(peer("p2"));
		assert_eq!(store.first().unwrap().id, "b1");

		// replacing does not move the peer
		store.insert(peer("b1"));
		assert_eq!(store.first().unwrap().id, "b1");
	}

	#[test]
	fn random_selects_without_replacement() {
		let store = PeerStore::new();
		for i in 0..10 {
			store.insert(peer(&format!("p{i}")));
		}
		for _ in 0..20 {
			let picked = store.random(3);
			assert_eq!(picked.len(), 3);
			let ids: std::collections::HashSet<_> = picked.iter().map(|p| &p.id).collect();
			assert_eq!(ids.len(), 3);
		}
		// asking for more than exists returns everything
		assert_eq!(store.random(50).len(), 10);
	}

	#[test]
	fn empty_store_has_no_first() {
		let store = PeerStore::new();
		assert_eq!(store.first().unwrap_err(), Error::Empty);
	}

	#[test]
	fn learned_peers_round_trip_through_persistence() {
		let persistence = Arc::new(mintgate_store::Store::open_in_memory().unwrap());
		{
			let store = PeerStore::with_persistence(persistence.clone());
			store.bootstrap_init(vec![peer("b1")]);
			store.insert(peer("p1"));
			store.insert(peer("p2"));
		}

		let restored = PeerStore::with_persistence(persistence);
		// bootstrap peers are re-pinned from config, not the snapshot
		assert!(restored.get(&"b1".into()).is_err());
		assert!(restored.get(&"p1".into()).is_ok());
		assert!(restored.get(&"p2".into()).is_ok());
	}
}
