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

//! JSON-RPC 2.0 wire types and the gateway's method set

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC 2.0 error codes
pub const ERR_PARSE: i64 = -32700;
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INTERNAL: i64 = -32603;

// Implementation-defined error codes
pub const ERR_BATCH_SIZE_EXCEEDED: i64 = -32001;
pub const ERR_RATE_LIMIT_EXCEEDED: i64 = -32002;
pub const ERR_PEER_FORWARDING: i64 = -32003;
pub const ERR_REQUEST_TIMEOUT: i64 = -32004;

/// The RPC methods the gateway serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
	QueryBlock,
	QueryBlocks,
	SubmitTx,
	QueryTx,
	QueryTxs,
	QueryPeers,
	QueryNumPeers,
	QueryEpoch,
	QueryStat,
	QueryConfig,
	QueryState,
	QueryBlockState,
	QueryFees,
	QueryShards,
}

impl Method {
	pub const ALL: [Method; 14] = [
		Method::QueryBlock,
		Method::QueryBlocks,
		Method::SubmitTx,
		Method::QueryTx,
		Method::QueryTxs,
		Method::QueryPeers,
		Method::QueryNumPeers,
		Method::QueryEpoch,
		Method::QueryStat,
		Method::QueryConfig,
		Method::QueryState,
		Method::QueryBlockState,
		Method::QueryFees,
		Method::QueryShards,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Method::QueryBlock => "queryBlock",
			Method::QueryBlocks => "queryBlocks",
			Method::SubmitTx => "submitTx",
			Method::QueryTx => "queryTx",
			Method::QueryTxs => "queryTxs",
			Method::QueryPeers => "queryPeers",
			Method::QueryNumPeers => "queryNumPeers",
			Method::QueryEpoch => "queryEpoch",
			Method::QueryStat => "queryStat",
			Method::QueryConfig => "queryConfig",
			Method::QueryState => "queryState",
			Method::QueryBlockState => "queryBlockState",
			Method::QueryFees => "queryFees",
			Method::QueryShards => "queryShards",
		}
	}

	/// Reads answered from the response cache and the network; everything
	/// except `submitTx`, `queryTx` and `queryTxs` (which consult local
	/// state first)
	pub fn is_cached_query(&self) -> bool {
		!matches!(self, Method::SubmitTx | Method::QueryTx | Method::QueryTxs)
	}
}

impl FromStr for Method {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Method::ALL
			.iter()
			.find(|m| m.as_str() == s)
			.copied()
			.ok_or_else(|| format!("unknown method: {s}"))
	}
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A JSON-RPC 2.0 request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	pub jsonrpc: String,
	/// Null, number or string; echoed verbatim in the response
	#[serde(default)]
	pub id: Value,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

impl Request {
	pub fn new(id: Value, method: Method, params: Value) -> Self {
		Self { jsonrpc: JSONRPC_VERSION.into(), id, method: method.as_str().into(), params }
	}
}

/// A JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Error {
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl Error {
	pub fn new(code: i64, message: impl Into<String>) -> Self {
		Self { code, message: message.into(), data: None }
	}

	pub fn with_data(code: i64, message: impl Into<String>, data: Value) -> Self {
		Self { code, message: message.into(), data: Some(data) }
	}

	pub fn invalid_params(message: impl Into<String>) -> Self {
		Self::new(ERR_INVALID_PARAMS, message)
	}

	pub fn internal(message: impl Into<String>) -> Self {
		Self::new(ERR_INTERNAL, message)
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "jsonrpc error {}: {}", self.code, self.message)
	}
}

impl std::error::Error for Error {}

/// A JSON-RPC 2.0 response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub jsonrpc: String,
	#[serde(default)]
	pub id: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<Error>,
}

impl Response {
	pub fn ok(id: Value, result: Value) -> Self {
		Self { jsonrpc: JSONRPC_VERSION.into(), id, result: Some(result), error: None }
	}

	pub fn err(id: Value, error: Error) -> Self {
		Self { jsonrpc: JSONRPC_VERSION.into(), id, result: None, error: Some(error) }
	}

	pub fn is_ok(&self) -> bool {
		self.error.is_none()
	}
}

/// A single request or a batch, as accepted by the HTTP front door
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestEnvelope {
	Single(Request),
	Batch(Vec<Request>),
}

/// Mirror of [`RequestEnvelope`] for replies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseEnvelope {
	Single(Response),
	Batch(Vec<Response>),
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn method_strings_round_trip() {
		for method in Method::ALL {
			assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
		}
		assert!("eth_call".parse::<Method>().is_err());
	}

	#[test]
	fn envelope_decodes_single_and_batch() {
		let single: RequestEnvelope =
			serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "queryTx"}))
				.unwrap();
		assert!(matches!(single, RequestEnvelope::Single(_)));

		let batch: RequestEnvelope = serde_json::from_value(json!([
			{"jsonrpc": "2.0", "id": 1, "method": "queryTx"},
			{"jsonrpc": "2.0", "id": 2, "method": "queryBlock"}
		]))
		.unwrap();
		let RequestEnvelope::Batch(requests) = batch else { panic!("expected a batch") };
		assert_eq!(requests.len(), 2);
	}

	#[test]
	fn error_responses_carry_no_result() {
		let response = Response::err(json!(3), Error::new(ERR_REQUEST_TIMEOUT, "timed out"));
		let encoded = serde_json::to_value(&response).unwrap();
		assert!(encoded.get("result").is_none());
		assert_eq!(encoded["error"]["code"], json!(ERR_REQUEST_TIMEOUT));
	}
}
