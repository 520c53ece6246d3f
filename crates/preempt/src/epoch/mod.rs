//! Slow-path generations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

#[cfg(test)]
mod tests;

/// A slow-path generation number.
pub type Epoch = u32;

/// Generation counter consulted by slow-path collaborators.
///
/// Advancing the epoch marks every computation started under an older epoch as stale. Workers
/// check [`EpochTracker::is_canceled`] after regaining their shared acquisition to decide whether to
/// abandon their work.
pub trait EpochTracker: Send + Sync {
	/// Returns the newest epoch.
	fn current_epoch(&self) -> Epoch;

	/// Starts a new generation and returns it.
	fn advance_epoch(&self) -> Epoch;

	/// Returns true if work started under `epoch` is stale.
	fn is_canceled(&self, epoch: Epoch) -> bool;
}

/// Consistent snapshot of the slow-path state, see [`TypecheckEpochs::with_epoch_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypecheckingStatus {
	/// A cancelable slow path is in progress.
	pub slow_path_running: bool,
	/// The slow path in progress was canceled.
	pub slow_path_canceled: bool,
	/// Epoch of the slow path in progress, if any.
	pub running_epoch: Option<Epoch>,
	/// Newest epoch.
	pub current_epoch: Epoch,
	/// Epoch of the last slow path that ran to completion.
	pub last_committed: Option<Epoch>,
}

#[derive(Debug, Default)]
struct EpochState {
	running: Option<Epoch>,
	canceled: bool,
	last_committed: Option<Epoch>,
	canceled_at: Option<Instant>,
}

/// [`EpochTracker`] that also tracks whether a cancelable slow path is running.
#[derive(Debug, Default)]
pub struct TypecheckEpochs {
	current: AtomicU32,
	state: Mutex<EpochState>,
}

impl TypecheckEpochs {
	/// Creates a tracker at epoch 0 with no slow path running.
	pub fn new() -> Self {
		Self::default()
	}

	fn status_locked(&self, state: &EpochState) -> TypecheckingStatus {
		TypecheckingStatus {
			slow_path_running: state.running.is_some(),
			slow_path_canceled: state.canceled,
			running_epoch: state.running,
			current_epoch: self.current.load(Ordering::Acquire),
			last_committed: state.last_committed,
		}
	}

	/// Returns a snapshot of the slow-path state.
	pub fn status(&self) -> TypecheckingStatus {
		let state = self.state.lock();
		self.status_locked(&state)
	}

	/// Runs `f` while holding the epoch lock.
	///
	/// Slow paths cannot start, finish or be canceled while `f` runs, so decisions taken from the
	/// snapshot stay valid for its duration. `f` must not call back into this tracker.
	pub fn with_epoch_lock<R>(&self, f: impl FnOnce(TypecheckingStatus) -> R) -> R {
		let state = self.state.lock();
		f(self.status_locked(&state))
	}

	/// Records that a cancelable slow path for `epoch` started.
	pub fn start_slow_path(&self, epoch: Epoch) {
		let mut state = self.state.lock();
		debug_assert!(state.running.is_none(), "slow path started while another is running");
		let previous = self.current.fetch_max(epoch, Ordering::AcqRel);
		state.running = Some(epoch);
		// Starting an already superseded epoch leaves it born canceled.
		state.canceled = epoch < previous;
		debug!(epoch, "slow path started");
	}

	/// Cancels the running slow path in favour of `new_epoch`.
	///
	/// Returns false if no slow path is running, it was already canceled, or `new_epoch` is not
	/// newer than it.
	pub fn try_cancel_slow_path(&self, new_epoch: Epoch) -> bool {
		let mut state = self.state.lock();
		let Some(running) = state.running else {
			return false;
		};
		if state.canceled || new_epoch <= running {
			return false;
		}
		state.canceled = true;
		state.canceled_at = Some(Instant::now());
		self.current.fetch_max(new_epoch, Ordering::AcqRel);
		debug!(running, new_epoch, "slow path canceled");
		true
	}

	/// Records that the slow path for `epoch` finished. Returns true if it committed.
	pub fn finish_slow_path(&self, epoch: Epoch) -> bool {
		let mut state = self.state.lock();
		debug_assert_eq!(state.running, Some(epoch), "finishing a slow path that is not running");
		let committed = !state.canceled;
		state.running = None;
		state.canceled = false;
		if committed {
			state.last_committed = Some(epoch);
		}
		debug!(epoch, committed, "slow path finished");
		committed
	}

	/// Returns when the last successful [`Self::try_cancel_slow_path`] happened, clearing it.
	///
	/// The slow path replacing the canceled one takes this on start to report how long the
	/// cancellation took to land.
	pub fn take_canceled_at(&self) -> Option<Instant> {
		self.state.lock().canceled_at.take()
	}

	/// Returns true if the running slow path was canceled.
	pub fn was_typechecking_canceled(&self) -> bool {
		self.state.lock().canceled
	}
}

impl EpochTracker for TypecheckEpochs {
	fn current_epoch(&self) -> Epoch {
		self.current.load(Ordering::Acquire)
	}

	fn advance_epoch(&self) -> Epoch {
		let mut state = self.state.lock();
		let next = self.current.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		if state.running.is_some_and(|running| running < next) {
			state.canceled = true;
		}
		next
	}

	fn is_canceled(&self, epoch: Epoch) -> bool {
		epoch < self.current.load(Ordering::Acquire)
	}
}
