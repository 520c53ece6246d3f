//! Lazily bound thread roles.

use std::thread::{self, ThreadId};

/// The thread roles that take part in preemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadRole {
	/// The single thread that runs scheduled preemption tasks.
	TypecheckCoordinator,
	/// The single thread that decodes inbound messages and schedules preemption tasks.
	MessageProcessing,
}

impl ThreadRole {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::TypecheckCoordinator => "typecheck coordinator thread",
			Self::MessageProcessing => "message processing thread",
		}
	}
}

/// Identity of the one thread allowed to play a role, bound on first use.
#[derive(Debug, Default)]
pub(crate) struct RoleBinding(Option<ThreadId>);

impl RoleBinding {
	/// Binds the calling thread on first use and asserts it on every later call.
	pub fn check(&mut self, role: ThreadRole, operation: &'static str, enforce: bool) {
		let current = thread::current().id();
		match self.0 {
			None => {
				tracing::trace!(role = role.as_str(), ?current, "binding thread role");
				self.0 = Some(current);
			}
			Some(bound) if enforce => {
				debug_assert_eq!(
					bound,
					current,
					"{operation} must only be called from the {}",
					role.as_str()
				);
			}
			Some(_) => {}
		}
	}

	/// Binds the calling thread, replacing any earlier binding.
	pub fn rebind(&mut self, role: ThreadRole) {
		let current = thread::current().id();
		tracing::debug!(role = role.as_str(), ?current, previous = ?self.0, "rebinding thread role");
		self.0 = Some(current);
	}

	#[cfg(test)]
	pub fn bound(&self) -> Option<ThreadId> {
		self.0
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn each_role_names_its_thread() {
		let roles = [ThreadRole::TypecheckCoordinator, ThreadRole::MessageProcessing];
		let names: Vec<_> = roles.iter().map(|role| role.as_str()).collect();
		assert_eq!(names, vec!["typecheck coordinator thread", "message processing thread"]);
	}

	#[test]
	fn rebind_replaces_first_binding() {
		let mut binding = RoleBinding::default();
		binding.check(ThreadRole::TypecheckCoordinator, "check", true);
		assert_eq!(binding.bound(), Some(thread::current().id()));

		let other = thread::scope(|s| {
			s.spawn(|| {
				binding.rebind(ThreadRole::TypecheckCoordinator);
				binding.check(ThreadRole::TypecheckCoordinator, "check", true);
				thread::current().id()
			})
			.join()
			.unwrap()
		});
		assert_eq!(binding.bound(), Some(other));
	}
}
