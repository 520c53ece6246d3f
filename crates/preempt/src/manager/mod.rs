//! Single-slot reader/writer preemption primitive.
//!
//! Workers take the gate in shared mode for bounded slices of slow-path work. The coordinator
//! takes it in exclusive mode only while a task is pending, so the common case of "nothing to
//! preempt" costs one uncontended mutex acquisition. `parking_lot`'s task-fair [`RwLock`] makes the
//! writer win against readers that try to re-enter while it waits.

use std::cell::RefCell;
use std::fmt;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, trace};

use crate::role::{RoleBinding, ThreadRole};
use crate::task::SharedTask;


thread_local! {
	/// Addresses of the managers whose gate the current thread holds.
	static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks the gate of one manager as held by the current thread for its lifetime.
struct HeldMarker(usize);

impl HeldMarker {
	fn enter(owner: usize) -> Self {
		HELD.with(|held| held.borrow_mut().push(owner));
		Self(owner)
	}
}

impl Drop for HeldMarker {
	fn drop(&mut self) {
		HELD.with(|held| {
			let mut held = held.borrow_mut();
			if let Some(pos) = held.iter().rposition(|&owner| owner == self.0) {
				held.swap_remove(pos);
			}
		});
	}
}

#[derive(Default)]
struct SlotState {
	pending: Option<SharedTask>,
	typecheck_thread: RoleBinding,
	message_thread: RoleBinding,
}

/// Arbitrates between slow-path workers and one pending preemption task.
///
/// See the crate documentation for the role of each operation.
pub struct PreemptionManager {
	gate: RwLock<()>,
	state: Mutex<SlotState>,
	enforce_roles: bool,
}

impl PreemptionManager {
	/// Creates a manager with no pending task and unbound thread roles.
	pub fn new() -> Self {
		Self {
			gate: RwLock::new(()),
			state: Mutex::new(SlotState::default()),
			enforce_roles: true,
		}
	}

	/// Creates a manager that binds thread roles but never asserts them.
	///
	/// Intended for harnesses that deliberately call [`Self::try_schedule`] from several threads.
	pub fn without_role_checks() -> Self {
		Self {
			enforce_roles: false,
			..Self::new()
		}
	}

	fn owner_key(&self) -> usize {
		self as *const Self as usize
	}

	/// Attempts to install `task` as the pending preemption task.
	///
	/// Message-processing thread only. Returns `true` if the slot was empty; the task is then
	/// guaranteed to run on the next [`Self::try_run_scheduled`] that observes it. Returns `false`
	/// and leaves the slot untouched when another task is already pending. Never waits for workers.
	pub fn try_schedule(&self, task: SharedTask) -> bool {
		let mut state = self.state.lock();
		state
			.message_thread
			.check(ThreadRole::MessageProcessing, "PreemptionManager::try_schedule", self.enforce_roles);
		if state.pending.is_some() {
			trace!("preemption slot occupied, rejecting task");
			return false;
		}
		state.pending = Some(task);
		debug!("preemption task scheduled");
		true
	}

	/// Runs the pending preemption task, if any.
	///
	/// Typecheck-coordinator thread only. Returns `false` at once when nothing is pending.
	/// Otherwise waits until every worker has released its shared acquisition, clears the slot and
	/// runs the task on the calling thread while still holding the exclusive acquisition, then
	/// returns `true`.
	pub fn try_run_scheduled(&self) -> bool {
		{
			let mut state = self.state.lock();
			state.typecheck_thread.check(
				ThreadRole::TypecheckCoordinator,
				"PreemptionManager::try_run_scheduled",
				self.enforce_roles,
			);
			if state.pending.is_none() {
				return false;
			}
		}

		let _exclusive = self.gate.write();
		// Cleared before running: completing the task may unblock the message thread, which is
		// then free to schedule the next one.
		let Some(task) = self.state.lock().pending.take() else {
			return false;
		};
		let _held = HeldMarker::enter(self.owner_key());
		debug!("beginning preemption task");
		task.run();
		debug!("preemption task complete");
		true
	}

	/// Makes the calling thread the typecheck-coordinator thread.
	///
	/// For handing the role over when coordination moves to a new thread. The previous
	/// coordinator must no longer call [`Self::try_run_scheduled`].
	pub fn take_coordinator_role(&self) {
		self.state.lock().typecheck_thread.rebind(ThreadRole::TypecheckCoordinator);
	}

	/// Returns true if a task is waiting to run.
	pub fn has_pending(&self) -> bool {
		self.state.lock().pending.is_some()
	}

	/// Takes the gate in shared mode, preventing preemption until the guard is dropped.
	///
	/// Worker threads only. Workers must not hold the guard for the whole slow path: they release
	/// and retake it at bounded intervals with [`PreemptionGuard::bump`] or by dropping it.
	#[must_use = "preemption is only blocked while the guard is alive"]
	pub fn lock_preemption(&self) -> PreemptionGuard<'_> {
		let guard = self.gate.read();
		PreemptionGuard {
			guard,
			_held: HeldMarker::enter(self.owner_key()),
		}
	}

	/// Panics unless the calling thread holds this manager's gate in either mode.
	///
	/// For tests and debugging only.
	pub fn assert_preemption_held(&self) {
		let key = self.owner_key();
		let held = HELD.with(|held| held.borrow().contains(&key));
		assert!(held, "preemption gate is not held by the current thread");
	}
}

impl Default for PreemptionManager {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for PreemptionManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PreemptionManager")
			.field("has_pending", &self.has_pending())
			.field("gate_locked", &self.gate.is_locked())
			.finish_non_exhaustive()
	}
}

/// Shared acquisition of a [`PreemptionManager`] held by a worker thread.
pub struct PreemptionGuard<'a> {
	guard: RwLockReadGuard<'a, ()>,
	_held: HeldMarker,
}

impl PreemptionGuard<'_> {
	/// Releases and immediately retakes the shared acquisition.
	///
	/// If the coordinator is waiting to run a task, it runs before this returns.
	pub fn bump(&mut self) {
		RwLockReadGuard::bump(&mut self.guard);
	}
}

impl fmt::Debug for PreemptionGuard<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PreemptionGuard").finish_non_exhaustive()
	}
}
