//! JSON-RPC 2.0 message types.

use std::fmt;

use lsp_types::NumberOrString;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The only protocol version spoken.
pub const JSONRPC_VERSION: &str = "2.0";

/// Identity correlating a request with its response.
///
/// Immutable once constructed. A client never reuses an id for two distinct live requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
	/// Integer id. JSON-RPC allows any integer, so the full `i64` range is kept.
	Int(i64),
	/// String id.
	String(String),
	/// Explicit `null`, used by responses to requests whose id could not be recovered.
	Null,
}

impl MessageId {
	/// Returns true for integer ids.
	pub fn is_int(&self) -> bool {
		matches!(self, Self::Int(_))
	}

	/// Returns the integer id, if this is one.
	pub fn as_int(&self) -> Option<i64> {
		match self {
			Self::Int(id) => Some(*id),
			_ => None,
		}
	}

	/// Returns true for string ids.
	pub fn is_string(&self) -> bool {
		matches!(self, Self::String(_))
	}

	/// Returns the string id, if this is one.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(id) => Some(id),
			_ => None,
		}
	}

	/// Returns true for the explicit `null` id.
	pub fn is_null(&self) -> bool {
		matches!(self, Self::Null)
	}

	/// Extracts an id from a raw `id` member. Only integers and strings are accepted.
	pub(crate) fn from_json(value: &JsonValue) -> Option<Self> {
		match value {
			JsonValue::Number(n) => n.as_i64().map(Self::Int),
			JsonValue::String(s) => Some(Self::String(s.clone())),
			_ => None,
		}
	}
}

impl From<i32> for MessageId {
	fn from(id: i32) -> Self {
		Self::Int(i64::from(id))
	}
}

impl From<String> for MessageId {
	fn from(id: String) -> Self {
		Self::String(id)
	}
}

impl From<&str> for MessageId {
	fn from(id: &str) -> Self {
		Self::String(id.to_owned())
	}
}

impl From<NumberOrString> for MessageId {
	fn from(id: NumberOrString) -> Self {
		match id {
			NumberOrString::Number(n) => Self::Int(n.into()),
			NumberOrString::String(s) => Self::String(s),
		}
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Int(id) => write!(f, "{id}"),
			Self::String(id) => write!(f, "{id:?}"),
			Self::Null => f.write_str("null"),
		}
	}
}

/// JSON-RPC error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
	/// Invalid JSON was received.
	pub const PARSE_ERROR: Self = Self(-32700);
	/// The JSON sent is not a valid request object.
	pub const INVALID_REQUEST: Self = Self(-32600);
	/// The method does not exist or is not available.
	pub const METHOD_NOT_FOUND: Self = Self(-32601);
	/// Invalid method parameters.
	pub const INVALID_PARAMS: Self = Self(-32602);
	/// Internal JSON-RPC error.
	pub const INTERNAL_ERROR: Self = Self(-32603);
	/// The client canceled a request.
	pub const REQUEST_CANCELLED: Self = Self(-32800);
	/// The content of a document changed out from under a request.
	pub const CONTENT_MODIFIED: Self = Self(-32801);
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Error member of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct ResponseError {
	/// Error code.
	pub code: ErrorCode,
	/// Short description.
	pub message: String,
	/// Additional information.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<JsonValue>,
}

impl ResponseError {
	/// Creates an error without extra data.
	pub fn new(code: ErrorCode, message: impl fmt::Display) -> Self {
		Self {
			code,
			message: message.to_string(),
			data: None,
		}
	}
}

/// A request, which must be answered with a [`ResponseMessage`] carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
	/// Protocol version.
	pub jsonrpc: String,
	/// Correlation id.
	pub id: MessageId,
	/// Method name.
	pub method: String,
	/// Method parameters.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<JsonValue>,
}

impl RequestMessage {
	/// Creates a request.
	pub fn new(id: impl Into<MessageId>, method: impl Into<String>, params: Option<JsonValue>) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_owned(),
			id: id.into(),
			method: method.into(),
			params,
		}
	}
}

/// A notification, which is never answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
	/// Protocol version.
	pub jsonrpc: String,
	/// Method name.
	pub method: String,
	/// Method parameters.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub params: Option<JsonValue>,
}

impl NotificationMessage {
	/// Creates a notification.
	pub fn new(method: impl Into<String>, params: Option<JsonValue>) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_owned(),
			method: method.into(),
			params,
		}
	}
}

/// A response to a request. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
	/// Protocol version.
	pub jsonrpc: String,
	/// Id of the request being answered.
	pub id: MessageId,
	/// Successful result.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<JsonValue>,
	/// Failure.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ResponseError>,
}

impl ResponseMessage {
	/// Creates a successful response.
	pub fn ok(id: impl Into<MessageId>, result: JsonValue) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_owned(),
			id: id.into(),
			result: Some(result),
			error: None,
		}
	}

	/// Creates an error response.
	pub fn err(id: impl Into<MessageId>, error: ResponseError) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_owned(),
			id: id.into(),
			result: None,
			error: Some(error),
		}
	}

	/// Returns true if this response carries an error.
	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}

	/// Encodes the response as JSON text.
	pub fn to_json(&self) -> crate::Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}
