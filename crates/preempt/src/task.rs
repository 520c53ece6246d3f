//! Opaque units of preemption work.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A unit of work run on the typecheck-coordinator thread.
///
/// Implementations are shared between the scheduler and the executor until the task runs, so
/// `run` takes `&self`. A task is run at most once and must not re-enter the
/// [`PreemptionManager`](crate::PreemptionManager) that runs it.
pub trait Task: Send + Sync {
	/// Runs the task.
	fn run(&self);
}

/// Shared handle to a scheduled task.
pub type SharedTask = Arc<dyn Task>;

/// Adapts a boxed `FnOnce` closure into a [`Task`].
pub struct FnTask {
	f: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FnTask {
	/// Wraps `f`.
	pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
		Self {
			f: Mutex::new(Some(Box::new(f))),
		}
	}

	/// Wraps `f` and returns a handle ready for scheduling.
	pub fn shared(f: impl FnOnce() + Send + 'static) -> SharedTask {
		Arc::new(Self::new(f))
	}

	/// Returns true once the closure has been consumed.
	pub fn has_run(&self) -> bool {
		self.f.lock().is_none()
	}
}

impl Task for FnTask {
	fn run(&self) {
		let f = self.f.lock().take();
		match f {
			Some(f) => f(),
			None => {
				debug_assert!(false, "FnTask run more than once");
				tracing::warn!("ignoring repeated run of a once-only task");
			}
		}
	}
}

impl fmt::Debug for FnTask {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FnTask").field("has_run", &self.has_run()).finish()
	}
}
