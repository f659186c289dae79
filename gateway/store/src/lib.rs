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

//! Embedded SQL persistence for the gateway.
//!
//! One SQLite database holds verified transactions, gateway recovery rows,
//! the legacy/current hash compat map and a generic `kv` table used for
//! watcher checkpoints and peer snapshots. The connection is wrapped in a
//! mutex; SQLite serialises writers, readers take short-lived guards.

use mintgate_primitives::{
	types::{Hash, TxHash},
	Selector, Transaction, TxInput, TxStatus,
};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::{
	path::Path,
	time::{SystemTime, UNIX_EPOCH},
};

pub(crate) const LOG_TARGET: &str = "store";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("not found")]
	NotFound,
	#[error("sql: {0}")]
	Sql(#[from] rusqlite::Error),
	#[error("corrupt row: {0}")]
	Corrupt(String),
}

impl Error {
	fn corrupt(context: &str, err: impl std::fmt::Display) -> Self {
		Error::Corrupt(format!("{context}: {err}"))
	}
}

/// Filter for paged transaction listings
#[derive(Debug, Clone, Default)]
pub struct TxFilter {
	pub status: Option<TxStatus>,
	pub selector: Option<Selector>,
	pub offset: u64,
	pub limit: u64,
}

/// Enough state to rebuild a lock/mint transaction from an incoming UTXO
/// whose destination matches a known gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRecovery {
	pub gateway_address: Hash,
	pub selector: Selector,
	pub payload: Vec<u8>,
	pub phash: Hash,
	pub nonce: Hash,
	pub nhash: Hash,
	pub to: mintgate_primitives::types::EthAddress,
}

pub struct Store {
	conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS txs (
	hash            TEXT PRIMARY KEY,
	selector        TEXT NOT NULL,
	input           TEXT NOT NULL,
	status          TEXT NOT NULL,
	gateway_address TEXT,
	created_at      INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_txs_selector ON txs(selector);
CREATE INDEX IF NOT EXISTS idx_txs_status ON txs(status);
CREATE INDEX IF NOT EXISTS idx_txs_created_at ON txs(created_at);
CREATE INDEX IF NOT EXISTS idx_txs_gateway ON txs(gateway_address);

CREATE TABLE IF NOT EXISTS gateway_recovery (
	gateway_address TEXT PRIMARY KEY,
	selector        TEXT NOT NULL,
	payload         TEXT NOT NULL,
	phash           TEXT NOT NULL,
	nonce           TEXT NOT NULL,
	nhash           TEXT NOT NULL,
	to_address      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS compat_hash (
	old_hash TEXT PRIMARY KEY,
	new_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_compat_new ON compat_hash(new_hash);

CREATE TABLE IF NOT EXISTS kv (
	key   TEXT PRIMARY KEY,
	value TEXT NOT NULL
);
";

fn hash_to_col(hash: &Hash) -> String {
	format!("0x{}", hex::encode(hash))
}

fn hash_from_col(raw: &str) -> Result<Hash, Error> {
	let stripped = raw.strip_prefix("0x").unwrap_or(raw);
	let bytes = hex::decode(stripped).map_err(|e| Error::corrupt("hash column", e))?;
	if bytes.len() != 32 {
		return Err(Error::Corrupt(format!("hash column has {} bytes", bytes.len())))
	}
	Ok(Hash::from_slice(&bytes))
}

fn unix_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl Store {
	pub fn open(path: &Path) -> Result<Self, Error> {
		Self::init(Connection::open(path)?)
	}

	pub fn open_in_memory() -> Result<Self, Error> {
		Self::init(Connection::open_in_memory()?)
	}

	fn init(conn: Connection) -> Result<Self, Error> {
		conn.execute_batch(SCHEMA)?;
		Ok(Self { conn: Mutex::new(conn) })
	}

	// --- transactions ---

	/// Insert a freshly verified transaction. The primary key on `hash`
	/// rejects concurrent duplicate inserts that slip past the verifier's
	/// dedup mutex.
	pub fn insert_tx(&self, tx: &Transaction, gateway_address: Option<&Hash>) -> Result<(), Error> {
		self.insert_tx_at(tx, gateway_address, unix_now())
	}

	pub fn insert_tx_at(
		&self,
		tx: &Transaction,
		gateway_address: Option<&Hash>,
		created_at: u64,
	) -> Result<(), Error> {
		let input = serde_json::to_string(&tx.input)
			.map_err(|e| Error::corrupt("encoding input", e))?;
		self.conn.lock().execute(
			"INSERT INTO txs (hash, selector, input, status, gateway_address, created_at)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
			params![
				hash_to_col(&tx.hash),
				tx.selector.to_string(),
				input,
				tx.status.as_str(),
				gateway_address.map(hash_to_col),
				created_at,
			],
		)?;
		Ok(())
	}

	pub fn get_tx(&self, hash: &TxHash) -> Result<Transaction, Error> {
		self.conn
			.lock()
			.query_row(
				"SELECT hash, selector, input, status FROM txs WHERE hash = ?1",
				params![hash_to_col(hash)],
				row_to_tx,
			)
			.optional()?
			.ok_or(Error::NotFound)
	}

	pub fn update_status(&self, hash: &TxHash, status: TxStatus) -> Result<(), Error> {
		let changed = self.conn.lock().execute(
			"UPDATE txs SET status = ?2 WHERE hash = ?1",
			params![hash_to_col(hash), status.as_str()],
		)?;
		if changed == 0 {
			return Err(Error::NotFound)
		}
		Ok(())
	}

	/// All rows with the given status, oldest first
	pub fn txs_with_status(&self, status: TxStatus) -> Result<Vec<Transaction>, Error> {
		let conn = self.conn.lock();
		let mut statement = conn.prepare(
			"SELECT hash, selector, input, status FROM txs
			 WHERE status = ?1 ORDER BY created_at ASC",
		)?;
		let rows = statement
			.query_map(params![status.as_str()], row_to_tx)?
			.collect::<Result<Vec<_>, _>>()?;
		Ok(rows)
	}

	/// Paged listing ordered by creation time, newest first
	pub fn list_txs(&self, filter: &TxFilter) -> Result<Vec<Transaction>, Error> {
		let mut sql = String::from("SELECT hash, selector, input, status FROM txs WHERE 1=1");
		let mut args: Vec<String> = Vec::new();
		if let Some(status) = filter.status {
			sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
			args.push(status.as_str().into());
		}
		if let Some(selector) = filter.selector {
			sql.push_str(&format!(" AND selector = ?{}", args.len() + 1));
			args.push(selector.to_string());
		}
		sql.push_str(&format!(
			" ORDER BY created_at DESC LIMIT {} OFFSET {}",
			filter.limit, filter.offset
		));

		let conn = self.conn.lock();
		let mut statement = conn.prepare(&sql)?;
		let rows = statement
			.query_map(rusqlite::params_from_iter(args.iter()), row_to_tx)?
			.collect::<Result<Vec<_>, _>>()?;
		Ok(rows)
	}

	/// Delete rows older than `expiry_secs`; returns the count removed
	pub fn prune_txs_older_than(&self, expiry_secs: u64) -> Result<usize, Error> {
		let cutoff = unix_now().saturating_sub(expiry_secs);
		let removed = self
			.conn
			.lock()
			.execute("DELETE FROM txs WHERE created_at < ?1", params![cutoff])?;
		if removed > 0 {
			log::debug!(target: LOG_TARGET, "pruned {} expired transactions", removed);
		}
		Ok(removed)
	}

	// --- gateway recovery ---

	pub fn put_gateway_recovery(&self, row: &GatewayRecovery) -> Result<(), Error> {
		self.conn.lock().execute(
			"INSERT OR REPLACE INTO gateway_recovery
			 (gateway_address, selector, payload, phash, nonce, nhash, to_address)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
			params![
				hash_to_col(&row.gateway_address),
				row.selector.to_string(),
				hex::encode(&row.payload),
				hash_to_col(&row.phash),
				hash_to_col(&row.nonce),
				hash_to_col(&row.nhash),
				format!("0x{}", hex::encode(row.to)),
			],
		)?;
		Ok(())
	}

	pub fn gateway_recovery(&self, gateway_address: &Hash) -> Result<GatewayRecovery, Error> {
		self.conn
			.lock()
			.query_row(
				"SELECT gateway_address, selector, payload, phash, nonce, nhash, to_address
				 FROM gateway_recovery WHERE gateway_address = ?1",
				params![hash_to_col(gateway_address)],
				row_to_recovery,
			)
			.optional()?
			.ok_or(Error::NotFound)
	}

	// --- compat hash map ---

	pub fn put_compat_mapping(&self, old_hash: &TxHash, new_hash: &TxHash) -> Result<(), Error> {
		self.conn.lock().execute(
			"INSERT OR REPLACE INTO compat_hash (old_hash, new_hash) VALUES (?1, ?2)",
			params![hash_to_col(old_hash), hash_to_col(new_hash)],
		)?;
		Ok(())
	}

	pub fn compat_new_hash(&self, old_hash: &TxHash) -> Result<Option<TxHash>, Error> {
		let raw: Option<String> = self
			.conn
			.lock()
			.query_row(
				"SELECT new_hash FROM compat_hash WHERE old_hash = ?1",
				params![hash_to_col(old_hash)],
				|row| row.get(0),
			)
			.optional()?;
		raw.map(|r| hash_from_col(&r)).transpose()
	}

	pub fn compat_old_hash(&self, new_hash: &TxHash) -> Result<Option<TxHash>, Error> {
		let raw: Option<String> = self
			.conn
			.lock()
			.query_row(
				"SELECT old_hash FROM compat_hash WHERE new_hash = ?1",
				params![hash_to_col(new_hash)],
				|row| row.get(0),
			)
			.optional()?;
		raw.map(|r| hash_from_col(&r)).transpose()
	}

	// --- kv ---

	pub fn kv_put(&self, key: &str, value: &str) -> Result<(), Error> {
		self.conn.lock().execute(
			"INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
			params![key, value],
		)?;
		Ok(())
	}

	pub fn kv_get(&self, key: &str) -> Result<Option<String>, Error> {
		Ok(self
			.conn
			.lock()
			.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
			.optional()?)
	}
}

fn row_to_tx(row: &Row) -> rusqlite::Result<Transaction> {
	// column decode failures surface as FromSql errors so query_map can
	// propagate them
	let hash: String = row.get(0)?;
	let selector: String = row.get(1)?;
	let input: String = row.get(2)?;
	let status: String = row.get(3)?;

	let decode = |context: &str, err: String| {
		rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Text,
			format!("{context}: {err}").into(),
		)
	};

	Ok(Transaction {
		hash: hash_from_col(&hash).map_err(|e| decode("hash", e.to_string()))?,
		selector: selector.parse().map_err(|e: mintgate_primitives::SelectorError| {
			decode("selector", e.to_string())
		})?,
		input: serde_json::from_str::<TxInput>(&input)
			.map_err(|e| decode("input", e.to_string()))?,
		status: status.parse().map_err(|e: String| decode("status", e))?,
	})
}

fn row_to_recovery(row: &Row) -> rusqlite::Result<GatewayRecovery> {
	let decode = |context: &str, err: String| {
		rusqlite::Error::FromSqlConversionFailure(
			0,
			rusqlite::types::Type::Text,
			format!("{context}: {err}").into(),
		)
	};
	let gateway_address: String = row.get(0)?;
	let selector: String = row.get(1)?;
	let payload: String = row.get(2)?;
	let phash: String = row.get(3)?;
	let nonce: String = row.get(4)?;
	let nhash: String = row.get(5)?;
	let to_address: String = row.get(6)?;

	let to_stripped = to_address.strip_prefix("0x").unwrap_or(&to_address).to_string();
	let to_bytes =
		hex::decode(&to_stripped).map_err(|e| decode("to_address", e.to_string()))?;
	if to_bytes.len() != 20 {
		return Err(decode("to_address", format!("{} bytes", to_bytes.len())))
	}

	Ok(GatewayRecovery {
		gateway_address: hash_from_col(&gateway_address)
			.map_err(|e| decode("gateway_address", e.to_string()))?,
		selector: selector.parse().map_err(|e: mintgate_primitives::SelectorError| {
			decode("selector", e.to_string())
		})?,
		payload: hex::decode(&payload).map_err(|e| decode("payload", e.to_string()))?,
		phash: hash_from_col(&phash).map_err(|e| decode("phash", e.to_string()))?,
		nonce: hash_from_col(&nonce).map_err(|e| decode("nonce", e.to_string()))?,
		nhash: hash_from_col(&nhash).map_err(|e| decode("nhash", e.to_string()))?,
		to: mintgate_primitives::types::EthAddress::from_slice(&to_bytes),
	})
}
