//! Inbound message model for the analysis server.
//!
//! Every protocol exchange is correlated by a [`MessageId`] and arrives as an [`InboundMessage`]
//! with exactly one [`Payload`] variant. Parsing never fails: malformed input becomes an
//! error-shaped response so dispatch has a single path.
//!
//! * [`parse`]: raw text to [`InboundMessage`].
//! * [`serialize`]: [`Payload`] to raw text, including synthetic cancellation responses.
#![warn(missing_docs)]

mod message;
mod method;
mod timer;
mod types;

pub use message::{InboundMessage, LATENCY_TIMER, Payload};
pub use method::{CANCEL_REQUEST, is_delayable_notification};
pub use serde_json::Value as JsonValue;
pub use timer::{FlowId, Timer};
pub use types::{
	ErrorCode, JSONRPC_VERSION, MessageId, NotificationMessage, RequestMessage, ResponseError,
	ResponseMessage,
};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// A narrowing accessor was used against the wrong payload variant.
	#[error("expected a {expected} message, found a {actual}")]
	WrongVariant {
		/// Variant the caller asked for.
		expected: &'static str,
		/// Variant the message actually holds.
		actual: &'static str,
	},
	/// A `$/cancelRequest` notification carried unusable parameters.
	#[error("invalid cancel parameters: {0}")]
	InvalidCancelParams(String),
	/// Encoding an outbound message failed.
	#[error("serialization failed: {0}")]
	Serialize(#[from] serde_json::Error),
}

/// Parses raw client text. See [`InboundMessage::from_client`].
pub fn parse(raw: &str) -> InboundMessage {
	InboundMessage::from_client(raw)
}

/// Encodes an outbound payload as JSON text.
pub fn serialize(payload: &Payload) -> Result<String> {
	payload.to_json()
}
