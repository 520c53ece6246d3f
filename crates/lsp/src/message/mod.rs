//! Classified inbound protocol messages.

use std::time::Instant;

use lsp_types::CancelParams;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::method::{CANCEL_REQUEST, is_delayable_notification};
use crate::timer::{FlowId, Timer};
use crate::types::{
	ErrorCode, JSONRPC_VERSION, MessageId, NotificationMessage, RequestMessage, ResponseError,
	ResponseMessage,
};
use crate::{Error, Result};


/// Name of the overall latency timer.
pub const LATENCY_TIMER: &str = "message.latency";

/// The three kinds of JSON-RPC traffic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
	/// A request.
	Request(RequestMessage),
	/// A notification.
	Notification(NotificationMessage),
	/// A response.
	Response(ResponseMessage),
}

impl Payload {
	const fn kind(&self) -> &'static str {
		match self {
			Self::Request(_) => "request",
			Self::Notification(_) => "notification",
			Self::Response(_) => "response",
		}
	}

	fn method(&self) -> Option<&str> {
		match self {
			Self::Request(req) => Some(&req.method),
			Self::Notification(notif) => Some(&notif.method),
			Self::Response(_) => None,
		}
	}

	/// Encodes the payload as JSON text.
	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string(self)?)
	}
}

impl From<RequestMessage> for Payload {
	fn from(req: RequestMessage) -> Self {
		Self::Request(req)
	}
}

impl From<NotificationMessage> for Payload {
	fn from(notif: NotificationMessage) -> Self {
		Self::Notification(notif)
	}
}

impl From<ResponseMessage> for Payload {
	fn from(resp: ResponseMessage) -> Self {
		Self::Response(resp)
	}
}

/// A parsed unit of inbound traffic with its timing instrumentation.
///
/// The payload variant is fixed at construction. Several physical messages may be coalesced into
/// one logical message with [`InboundMessage::merge_timing`].
#[derive(Debug)]
pub struct InboundMessage {
	payload: Payload,
	start_tracers: Vec<FlowId>,
	timer: Timer,
	method_timer: Option<Timer>,
	delayable: bool,
	canceled: bool,
}

impl InboundMessage {
	/// Wraps a payload, starting its timers now.
	pub fn new(payload: impl Into<Payload>) -> Self {
		Self::received_at(payload, Instant::now())
	}

	/// Wraps a payload whose first byte arrived at `received`.
	pub fn received_at(payload: impl Into<Payload>, received: Instant) -> Self {
		let payload = payload.into();
		let method_timer = payload
			.method()
			.map(|method| Timer::started_at(format!("{LATENCY_TIMER}.{method}"), received));
		let delayable = match &payload {
			Payload::Notification(notif) => is_delayable_notification(&notif.method),
			Payload::Request(_) | Payload::Response(_) => false,
		};
		Self {
			payload,
			start_tracers: vec![FlowId::next()],
			timer: Timer::started_at(LATENCY_TIMER, received),
			method_timer,
			delayable,
			canceled: false,
		}
	}

	/// Parses a message received from the client.
	///
	/// Never fails: input that is not valid JSON-RPC yields an error-shaped response carrying the
	/// id of the original message when one could be recovered, else `null`. Dispatch answers such
	/// messages by sending their payload back.
	pub fn from_client(raw: &str) -> Self {
		let received = Instant::now();
		let payload = match serde_json::from_str::<JsonValue>(raw) {
			Ok(value) => classify(value),
			Err(err) => {
				debug!(error = %err, "unparseable inbound message");
				Payload::Response(ResponseMessage::err(
					MessageId::Null,
					ResponseError::new(ErrorCode::PARSE_ERROR, format_args!("Unable to parse message: {err}")),
				))
			}
		};
		Self::received_at(payload, received)
	}

	/// Returns the payload.
	pub fn payload(&self) -> &Payload {
		&self.payload
	}

	/// Consumes the message, returning its payload. Running timers report on drop.
	pub fn into_payload(self) -> Payload {
		let Self { payload, .. } = self;
		payload
	}

	/// Trace markers of every physical message folded into this one.
	pub fn start_tracers(&self) -> &[FlowId] {
		&self.start_tracers
	}

	/// Overall latency timer.
	pub fn timer(&self) -> &Timer {
		&self.timer
	}

	/// Method-specific latency timer. Absent for responses.
	pub fn method_timer(&self) -> Option<&Timer> {
		self.method_timer.as_ref()
	}

	/// Returns the id of requests and responses.
	pub fn id(&self) -> Option<&MessageId> {
		match &self.payload {
			Payload::Request(req) => Some(&req.id),
			Payload::Response(resp) => Some(&resp.id),
			Payload::Notification(_) => None,
		}
	}

	/// Returns true if processing may be deferred in favour of newer messages.
	pub fn is_delayable(&self) -> bool {
		self.delayable
	}

	/// Returns true for requests.
	pub fn is_request(&self) -> bool {
		matches!(self.payload, Payload::Request(_))
	}

	/// Returns true for notifications.
	pub fn is_notification(&self) -> bool {
		matches!(self.payload, Payload::Notification(_))
	}

	/// Returns true for responses.
	pub fn is_response(&self) -> bool {
		matches!(self.payload, Payload::Response(_))
	}

	/// Returns true once [`Self::cancel_request`] or [`Self::cancel_timers`] was called.
	pub fn is_canceled(&self) -> bool {
		self.canceled
	}

	fn wrong_variant(&self, expected: &'static str) -> Error {
		Error::WrongVariant {
			expected,
			actual: self.payload.kind(),
		}
	}

	/// Narrows to the request payload.
	pub fn as_request(&self) -> Result<&RequestMessage> {
		match &self.payload {
			Payload::Request(req) => Ok(req),
			_ => Err(self.wrong_variant("request")),
		}
	}

	/// Narrows to the request payload, mutably.
	pub fn as_request_mut(&mut self) -> Result<&mut RequestMessage> {
		match &mut self.payload {
			Payload::Request(req) => Ok(req),
			other => Err(Error::WrongVariant {
				expected: "request",
				actual: other.kind(),
			}),
		}
	}

	/// Narrows to the notification payload.
	pub fn as_notification(&self) -> Result<&NotificationMessage> {
		match &self.payload {
			Payload::Notification(notif) => Ok(notif),
			_ => Err(self.wrong_variant("notification")),
		}
	}

	/// Narrows to the response payload.
	pub fn as_response(&self) -> Result<&ResponseMessage> {
		match &self.payload {
			Payload::Response(resp) => Ok(resp),
			_ => Err(self.wrong_variant("response")),
		}
	}

	/// Method of a request or notification.
	pub fn method(&self) -> Result<&str> {
		self.payload
			.method()
			.ok_or_else(|| self.wrong_variant("request or notification"))
	}

	/// Decodes the target of a `$/cancelRequest` notification.
	pub fn cancel_params(&self) -> Result<MessageId> {
		let notif = self.as_notification()?;
		if notif.method != CANCEL_REQUEST {
			return Err(Error::InvalidCancelParams(format!("not a cancellation: {}", notif.method)));
		}
		let params = notif.params.clone().unwrap_or(JsonValue::Null);
		let params: CancelParams =
			serde_json::from_value(params).map_err(|err| Error::InvalidCancelParams(err.to_string()))?;
		Ok(params.id.into())
	}

	/// Cancels this request and its timers, returning the response to send to the client.
	///
	/// Terminal: must be called at most once per message.
	pub fn cancel_request(&mut self) -> Result<ResponseMessage> {
		debug_assert!(!self.canceled, "message canceled twice");
		let id = self.as_request()?.id.clone();
		self.cancel_timers();
		debug!(%id, "request canceled");
		Ok(ResponseMessage::err(
			id,
			ResponseError::new(ErrorCode::REQUEST_CANCELLED, "Request was canceled"),
		))
	}

	/// Cancels the timers without producing a response.
	pub fn cancel_timers(&mut self) {
		debug_assert!(!self.canceled, "message canceled twice");
		self.timer.cancel();
		if let Some(timer) = &mut self.method_timer {
			timer.cancel();
		}
		self.canceled = true;
	}

	/// Folds the timing of `other`, coalesced into this message, into `self`.
	///
	/// Trace markers accumulate and the older of each pair of timers survives; the younger one is
	/// canceled. The payload of `other` is dropped.
	pub fn merge_timing(&mut self, mut other: InboundMessage) {
		self.start_tracers.append(&mut other.start_tracers);
		if other.timer.started() < self.timer.started() {
			std::mem::swap(&mut self.timer, &mut other.timer);
		}
		other.timer.cancel();
		if let Some(mut theirs) = other.method_timer.take() {
			match &mut self.method_timer {
				Some(ours) => {
					if theirs.started() < ours.started() {
						std::mem::swap(ours, &mut theirs);
					}
					theirs.cancel();
				}
				None => self.method_timer = Some(theirs),
			}
		}
	}

	/// Encodes the payload as JSON text.
	pub fn to_json(&self) -> Result<String> {
		self.payload.to_json()
	}
}

fn invalid(id: Option<MessageId>, reason: impl std::fmt::Display) -> Payload {
	debug!(%reason, "invalid inbound message");
	Payload::Response(ResponseMessage::err(
		id.unwrap_or(MessageId::Null),
		ResponseError::new(ErrorCode::INVALID_REQUEST, reason),
	))
}

/// Classifies a decoded JSON value as a request, notification or response.
fn classify(value: JsonValue) -> Payload {
	let JsonValue::Object(mut obj) = value else {
		return invalid(None, "message is not a JSON object");
	};
	let has_id = obj.contains_key("id");
	let id = obj.get("id").and_then(MessageId::from_json);

	match obj.get("jsonrpc") {
		Some(JsonValue::String(v)) if v == JSONRPC_VERSION => {}
		_ => return invalid(id, "missing or unsupported jsonrpc version"),
	}

	let params = take_params(&mut obj);
	match obj.remove("method") {
		Some(JsonValue::String(method)) => match (has_id, id) {
			(false, _) => Payload::Notification(NotificationMessage::new(method, params)),
			(true, Some(id)) => Payload::Request(RequestMessage::new(id, method, params)),
			(true, None) => invalid(None, format_args!("request `{method}` has an invalid id")),
		},
		Some(_) => invalid(id, "method is not a string"),
		None => classify_response(&mut obj, id),
	}
}

fn take_params(obj: &mut Map<String, JsonValue>) -> Option<JsonValue> {
	obj.remove("params")
}

fn classify_response(obj: &mut Map<String, JsonValue>, id: Option<MessageId>) -> Payload {
	let id = match obj.get("id") {
		Some(JsonValue::Null) => MessageId::Null,
		Some(_) => match id {
			Some(id) => id,
			None => return invalid(None, "response has an invalid id"),
		},
		None => return invalid(None, "message has neither a method nor an id"),
	};
	let result = obj.remove("result");
	let error = match obj.remove("error") {
		Some(error) => match serde_json::from_value::<ResponseError>(error) {
			Ok(error) => Some(error),
			Err(err) => return invalid(Some(id), format_args!("malformed response error: {err}")),
		},
		None => None,
	};
	match (result, error) {
		(Some(result), None) => Payload::Response(ResponseMessage::ok(id, result)),
		(None, Some(error)) => Payload::Response(ResponseMessage::err(id, error)),
		_ => invalid(Some(id), "response must carry exactly one of result and error"),
	}
}
