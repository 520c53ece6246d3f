//! Which messages may run while a slow path is paused.

use std::collections::HashSet;

use kestrel_lsp::InboundMessage;

/// Decides whether a pending message may preempt a running slow path.
///
/// Preemptible messages run against the state committed before the slow path started, so a
/// policy should only admit read-only work that tolerates stale results.
pub trait PreemptionPolicy: Send + Sync {
	/// Returns true if `msg` may run inside a preemption window.
	fn can_preempt(&self, msg: &InboundMessage) -> bool;
}

impl<F> PreemptionPolicy for F
where
	F: Fn(&InboundMessage) -> bool + Send + Sync,
{
	fn can_preempt(&self, msg: &InboundMessage) -> bool {
		self(msg)
	}
}

/// Never preempts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverPreempt;

impl PreemptionPolicy for NeverPreempt {
	fn can_preempt(&self, _msg: &InboundMessage) -> bool {
		false
	}
}

/// Admits requests and notifications whose method is in a fixed set.
#[derive(Debug, Clone, Default)]
pub struct MethodAllowList {
	methods: HashSet<String>,
}

impl MethodAllowList {
	/// Creates a policy admitting `methods`.
	pub fn new(methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self {
			methods: methods.into_iter().map(Into::into).collect(),
		}
	}

	/// Returns true if `method` is admitted.
	pub fn contains(&self, method: &str) -> bool {
		self.methods.contains(method)
	}
}

impl PreemptionPolicy for MethodAllowList {
	fn can_preempt(&self, msg: &InboundMessage) -> bool {
		!msg.is_canceled() && msg.method().is_ok_and(|method| self.contains(method))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn msg(raw: &str) -> InboundMessage {
		InboundMessage::from_client(raw)
	}

	#[test]
	fn allow_list_matches_methods() {
		let policy = MethodAllowList::new(["textDocument/hover", "textDocument/documentHighlight"]);
		assert!(policy.can_preempt(&msg(r#"{"jsonrpc":"2.0","id":1,"method":"textDocument/hover"}"#)));
		assert!(!policy.can_preempt(&msg(r#"{"jsonrpc":"2.0","id":2,"method":"textDocument/rename"}"#)));
		assert!(!policy.can_preempt(&msg(r#"{"jsonrpc":"2.0","id":3,"result":null}"#)));
	}

	#[test]
	fn canceled_messages_never_preempt() {
		let policy = MethodAllowList::new(["textDocument/hover"]);
		let mut hover = msg(r#"{"jsonrpc":"2.0","id":1,"method":"textDocument/hover"}"#);
		hover.cancel_timers();
		assert!(!policy.can_preempt(&hover));
	}

	#[test]
	fn closures_and_never() {
		let notifications = |m: &InboundMessage| m.is_notification();
		let exit = msg(r#"{"jsonrpc":"2.0","method":"exit"}"#);
		assert!(notifications.can_preempt(&exit));
		assert!(!NeverPreempt.can_preempt(&exit));
		assert!(!MethodAllowList::default().can_preempt(&exit));
	}
}
