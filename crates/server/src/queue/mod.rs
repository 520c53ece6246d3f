//! Inbound messages waiting for the typechecker.

use std::collections::VecDeque;

use kestrel_lsp::{InboundMessage, MessageId, ResponseMessage};
use parking_lot::Mutex;
use tracing::debug;


/// FIFO of parsed messages shared between the reader and the processing thread.
///
/// Preemption tasks drain it from the typechecker thread while the message-processing thread keeps
/// pushing, so every operation takes the internal lock for its own duration only.
#[derive(Debug, Default)]
pub struct PendingQueue {
	messages: Mutex<VecDeque<InboundMessage>>,
}

impl PendingQueue {
	/// Creates an empty queue.
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends `msg`.
	pub fn push(&self, msg: InboundMessage) {
		self.messages.lock().push_back(msg);
	}

	/// Removes the oldest message.
	pub fn pop_front(&self) -> Option<InboundMessage> {
		self.messages.lock().pop_front()
	}

	/// Removes the oldest message if `pred` accepts it.
	///
	/// The check and the removal are atomic with respect to other queue operations.
	pub fn pop_front_if(&self, pred: impl FnOnce(&InboundMessage) -> bool) -> Option<InboundMessage> {
		let mut messages = self.messages.lock();
		if pred(messages.front()?) { messages.pop_front() } else { None }
	}

	/// Returns true if the oldest message satisfies `pred`.
	pub fn front_matches(&self, pred: impl FnOnce(&InboundMessage) -> bool) -> bool {
		self.messages.lock().front().is_some_and(pred)
	}

	/// Number of queued messages.
	pub fn len(&self) -> usize {
		self.messages.lock().len()
	}

	/// Returns true if nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.messages.lock().is_empty()
	}

	/// Removes the queued request `id` and cancels it.
	///
	/// Returns the cancellation response to send in its place, or `None` if no such request is
	/// still queued, in which case it is already running or answered.
	pub fn cancel(&self, id: &MessageId) -> Option<ResponseMessage> {
		let mut msg = {
			let mut messages = self.messages.lock();
			let pos = messages.iter().position(|msg| msg.is_request() && msg.id() == Some(id))?;
			messages.remove(pos)?
		};
		debug!(%id, "canceling queued request");
		msg.cancel_request().ok()
	}
}
